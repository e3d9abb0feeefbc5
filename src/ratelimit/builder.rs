//! Turns flat rate limit rows into a descriptor tree.
//!
//! Rules without an endpoint become top-level leaves, in rule order. Rules with
//! an endpoint are grouped into one `path` branch per endpoint; branches follow
//! the global leaves, sorted by endpoint.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::descriptor::Descriptor;
use super::rules::{CallerId, RateLimitRule};
use super::secret::Secret;
use crate::error::{Result, SyncError};
use crate::store::StoreError;

/// Output of a successful build.
#[derive(Debug, Default)]
pub struct DescriptorSet {
    /// Top-level descriptors
    pub descriptors: Vec<Descriptor>,
    /// Rules left out because their caller could not be found. Every entry is a
    /// [`SyncError::MissingCaller`].
    pub skipped: Vec<SyncError>,
}

/// Build the descriptor tree for a set of rules.
///
/// An unsupported interval, an invalid count, a secret too short to fingerprint
/// or a store failure while resolving a secret fails the whole build. A rule
/// whose caller is not found is skipped and reported in
/// [`DescriptorSet::skipped`].
pub fn build_descriptors<F>(rules: &[RateLimitRule], mut secret_lookup: F) -> Result<DescriptorSet>
where
    F: FnMut(CallerId) -> std::result::Result<Secret, StoreError>,
{
    let mut descriptors = Vec::with_capacity(rules.len());
    let mut by_endpoint: BTreeMap<&str, Vec<Descriptor>> = BTreeMap::new();
    let mut skipped = Vec::new();

    for rule in rules {
        let unit = rule.unit()?;
        let requests_per_unit = rule.requests_per_unit()?;

        let secret = match secret_lookup(rule.caller_id) {
            Ok(secret) => secret,
            Err(StoreError::NotFound(_)) => {
                let err = SyncError::MissingCaller {
                    rule_id: rule.id,
                    caller_id: rule.caller_id,
                };
                warn!(rule_id = rule.id, caller_id = rule.caller_id, "Skipping rule: {}", err);
                skipped.push(err);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let leaf = Descriptor::leaf(secret.fingerprint(rule.caller_id)?, unit, requests_per_unit);
        match rule.scoped_endpoint() {
            None => descriptors.push(leaf),
            Some(endpoint) => by_endpoint.entry(endpoint).or_default().push(leaf),
        }
    }

    let global = descriptors.len();
    descriptors.extend(
        by_endpoint
            .into_iter()
            .map(|(endpoint, children)| Descriptor::branch(endpoint, children)),
    );

    debug!(
        rules = rules.len(),
        global,
        branches = descriptors.len() - global,
        skipped = skipped.len(),
        "Built rate limit descriptors"
    );

    Ok(DescriptorSet {
        descriptors,
        skipped,
    })
}
