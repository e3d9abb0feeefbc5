//! Error types for the synchronization engine.

use thiserror::Error;

use crate::snapshot::CacheError;
use crate::store::StoreError;

/// Main error type for ratelimit-sync operations.
///
/// Every variant except [`SyncError::MissingCaller`] aborts a refresh cycle and
/// leaves the previously published snapshot in place.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A rule carries an interval that does not map to a known unit.
    #[error("rule {rule_id}: unsupported limit interval {interval:?}")]
    UnsupportedInterval { rule_id: i64, interval: String },

    /// A rule carries a request count that is zero, negative or too large.
    #[error("rule {rule_id}: invalid limit count {count}")]
    InvalidLimit { rule_id: i64, count: i64 },

    /// A caller secret is too short to derive a fingerprint from.
    #[error("caller {caller_id}: secret shorter than {min_len} characters")]
    InvalidSecret { caller_id: i64, min_len: usize },

    /// A rule references a caller that no longer exists. Only ever recorded in a
    /// build report; never returned from a build.
    #[error("rule {rule_id}: caller {caller_id} not found")]
    MissingCaller { rule_id: i64, caller_id: i64 },

    /// The assembled snapshot violates a structural invariant.
    #[error("inconsistent snapshot at {descriptor}: {reason}")]
    InconsistentSnapshot { descriptor: String, reason: String },

    /// The distribution cache refused the snapshot.
    #[error("publish to node {node_key:?} failed: {source}")]
    Publish {
        node_key: String,
        #[source]
        source: CacheError,
    },

    /// The rule store could not be read.
    #[error("rule store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ratelimit-sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
