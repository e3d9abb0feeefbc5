//! Versioned, validated configuration snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::proto;
use crate::ratelimit::Descriptor;

/// An immutable bundle holding one rate limit config resource.
///
/// `version` is unique per assembly. `sequence` is reserved from the
/// distribution cache for the target node key and orders publishes to it.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    version: String,
    sequence: u64,
    created_at: DateTime<Utc>,
    name: String,
    domain: String,
    descriptors: Vec<Descriptor>,
}

impl ConfigSnapshot {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// The rate limit config resource carried by this snapshot.
    pub fn to_proto(&self) -> proto::RateLimitConfig {
        proto::RateLimitConfig {
            name: self.name.clone(),
            domain: self.domain.clone(),
            descriptors: self.descriptors.iter().map(Descriptor::to_proto).collect(),
        }
    }

    /// The snapshot's resources, encoded for the discovery protocol.
    pub fn resources(&self) -> Vec<prost_types::Any> {
        vec![self.to_proto().to_any()]
    }

    /// Check the structural invariants of the snapshot.
    pub fn validate(&self) -> Result<()> {
        check_consistency(&self.name, &self.domain, &self.descriptors)
    }
}

/// Assembles descriptor trees into snapshots for one named config and domain.
#[derive(Debug)]
pub struct SnapshotAssembler {
    name: String,
    domain: String,
}

impl SnapshotAssembler {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Validate the descriptors and wrap them in a freshly versioned snapshot
    /// stamped with `sequence`.
    pub fn assemble(&self, sequence: u64, descriptors: Vec<Descriptor>) -> Result<ConfigSnapshot> {
        if let Err(e) = check_consistency(&self.name, &self.domain, &descriptors) {
            warn!(error = %e, "Rejecting inconsistent snapshot");
            return Err(e);
        }

        let snapshot = ConfigSnapshot {
            version: Uuid::new_v4().to_string(),
            sequence,
            created_at: Utc::now(),
            name: self.name.clone(),
            domain: self.domain.clone(),
            descriptors,
        };

        debug!(
            version = %snapshot.version,
            sequence = snapshot.sequence,
            descriptors = snapshot.descriptors.len(),
            "Assembled snapshot"
        );
        Ok(snapshot)
    }
}

fn inconsistent(descriptor: impl Into<String>, reason: &str) -> SyncError {
    SyncError::InconsistentSnapshot {
        descriptor: descriptor.into(),
        reason: reason.to_string(),
    }
}

fn check_consistency(name: &str, domain: &str, descriptors: &[Descriptor]) -> Result<()> {
    if name.is_empty() {
        return Err(inconsistent("<config>", "config name is empty"));
    }
    if domain.is_empty() {
        return Err(inconsistent("<config>", "domain is empty"));
    }
    check_level(descriptors, None)
}

fn check_level(descriptors: &[Descriptor], parent: Option<&str>) -> Result<()> {
    let mut seen = HashSet::with_capacity(descriptors.len());

    for descriptor in descriptors {
        let path = match parent {
            Some(parent) => format!("{} > {}", parent, descriptor),
            None => descriptor.to_string(),
        };

        if !seen.insert((descriptor.key(), descriptor.value())) {
            return Err(inconsistent(path, "duplicate descriptor key and value"));
        }

        match descriptor {
            Descriptor::Leaf { fingerprint, limit } => {
                if fingerprint.is_empty() {
                    return Err(inconsistent(path, "leaf has an empty fingerprint"));
                }
                if limit.requests_per_unit == 0 {
                    return Err(inconsistent(path, "leaf allows zero requests"));
                }
            }
            Descriptor::Branch { endpoint, children } => {
                if parent.is_some() {
                    return Err(inconsistent(path, "branch nested under a branch"));
                }
                if endpoint.is_empty() {
                    return Err(inconsistent(path, "branch has an empty endpoint"));
                }
                if children.is_empty() {
                    return Err(inconsistent(path, "branch has no children"));
                }
                check_level(children, Some(&path))?;
            }
        }
    }

    Ok(())
}
