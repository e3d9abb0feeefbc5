//! Hands assembled snapshots to the distribution cache.

use std::sync::Arc;
use tracing::{error, info};

use super::assembler::ConfigSnapshot;
use super::cache::DistributionCache;
use crate::error::{Result, SyncError};

/// Publishes snapshots into a [`DistributionCache`].
///
/// Publishing only updates the cache; subscribed sessions pull the new version
/// on their own schedule. Failures are returned as-is, with no retry.
#[derive(Clone)]
pub struct SnapshotPublisher {
    cache: Arc<dyn DistributionCache>,
}

impl SnapshotPublisher {
    pub fn new(cache: Arc<dyn DistributionCache>) -> Self {
        Self { cache }
    }

    /// Store `snapshot` as the latest snapshot for `node_key`.
    pub fn publish(&self, node_key: &str, snapshot: ConfigSnapshot) -> Result<Arc<ConfigSnapshot>> {
        let snapshot = Arc::new(snapshot);

        self.cache
            .set_snapshot(node_key, snapshot.clone())
            .map_err(|source| {
                error!(
                    node_key = %node_key,
                    version = %snapshot.version(),
                    error = %source,
                    "Distribution cache rejected snapshot"
                );
                SyncError::Publish {
                    node_key: node_key.to_string(),
                    source,
                }
            })?;

        info!(
            node_key = %node_key,
            version = %snapshot.version(),
            sequence = snapshot.sequence(),
            descriptors = snapshot.descriptors().len(),
            "Published rate limit snapshot"
        );
        Ok(snapshot)
    }

    /// Reserve the sequence the next snapshot for `node_key` must carry.
    pub fn reserve_sequence(&self, node_key: &str) -> u64 {
        self.cache.reserve_sequence(node_key)
    }
}

impl std::fmt::Debug for SnapshotPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPublisher").finish_non_exhaustive()
    }
}
