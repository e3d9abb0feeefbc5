//! Read access to rate limit rules and caller secrets.
//!
//! The relational store itself lives outside this crate; [`RuleStore`] is the
//! seam it plugs into. [`MemoryRuleStore`] stands in for it in the binary and
//! in tests.

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::ratelimit::{CallerId, RateLimitRule, RuleId, Secret};

pub use memory::{Caller, MemoryRuleStore, StoredRule};

/// Errors surfaced by a rule store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No caller exists with this id
    #[error("caller {0} not found")]
    NotFound(CallerId),

    /// No rule exists with this id
    #[error("rule {0} not found")]
    RuleNotFound(RuleId),

    /// The backing storage failed
    #[error("storage failure: {0}")]
    Backend(String),
}

/// Read operations the synchronizer needs from the rule store.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Read every rule, joined with its caller.
    async fn list_all_rules(&self) -> Result<Vec<RateLimitRule>, StoreError>;

    /// Resolve a caller's secret.
    async fn resolve_secret(&self, caller_id: CallerId) -> Result<Secret, StoreError>;
}
