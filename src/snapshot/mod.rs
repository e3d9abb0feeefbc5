//! Snapshot assembly and publication.
//!
//! A snapshot wraps the single rate limit config resource under a unique
//! version. Publishing replaces the snapshot stored for a node key wholesale;
//! subscribers never see a partial update.

mod assembler;
mod cache;
mod publisher;

pub use assembler::{ConfigSnapshot, SnapshotAssembler};
pub use cache::{CacheError, DistributionCache, SnapshotCache};
pub use publisher::SnapshotPublisher;
