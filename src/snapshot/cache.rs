//! Node-keyed distribution cache holding the latest snapshot per node.
//!
//! Discovery sessions subscribe to a node key and receive every snapshot stored
//! under it from then on. Intermediate snapshots may be skipped by a slow
//! subscriber; the latest one is never lost.

use dashmap::DashMap;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

use super::assembler::ConfigSnapshot;

/// Errors returned when the cache refuses a snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A snapshot with the same or a newer sequence is already stored.
    #[error("snapshot sequence {attempted} is not newer than stored sequence {current}")]
    Stale { current: u64, attempted: u64 },

    /// The snapshot failed the cache's consistency check.
    #[error("snapshot {version} rejected: {reason}")]
    Rejected { version: String, reason: String },
}

/// Storage for the latest snapshot of every node key.
///
/// Implementations must accept concurrent `set_snapshot` calls.
pub trait DistributionCache: Send + Sync {
    /// Reserve the next publish sequence for `node_key`.
    ///
    /// Sequences are shared by every publisher of the key and are always
    /// greater than the sequence of the stored snapshot.
    fn reserve_sequence(&self, node_key: &str) -> u64;

    /// Replace the snapshot stored under `node_key` and notify its subscribers.
    fn set_snapshot(&self, node_key: &str, snapshot: Arc<ConfigSnapshot>) -> Result<(), CacheError>;

    /// The snapshot currently stored under `node_key`.
    fn snapshot(&self, node_key: &str) -> Option<Arc<ConfigSnapshot>>;
}

#[derive(Debug)]
struct Slot {
    sender: watch::Sender<Option<Arc<ConfigSnapshot>>>,
    last_reserved: u64,
}

impl Slot {
    fn new() -> Self {
        Self {
            sender: watch::channel(None).0,
            last_reserved: 0,
        }
    }

    fn stored_sequence(&self) -> u64 {
        match &*self.sender.borrow() {
            Some(stored) => stored.sequence(),
            None => 0,
        }
    }
}

/// In-process [`DistributionCache`] backed by one watch channel per node key.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    nodes: DashMap<String, Slot>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the snapshots stored under `node_key`.
    ///
    /// The stream yields the current snapshot first, if there is one.
    pub fn subscribe(&self, node_key: &str) -> BoxStream<'static, Arc<ConfigSnapshot>> {
        let receiver = self
            .nodes
            .entry(node_key.to_string())
            .or_insert_with(Slot::new)
            .sender
            .subscribe();

        debug!(node_key = %node_key, "New snapshot subscriber");
        WatchStream::new(receiver)
            .filter_map(|snapshot| async move { snapshot })
            .boxed()
    }

    /// Number of live subscribers for `node_key`.
    pub fn subscriber_count(&self, node_key: &str) -> usize {
        self.nodes
            .get(node_key)
            .map(|slot| slot.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Node keys that have a snapshot or a subscriber.
    pub fn node_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.nodes.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl DistributionCache for SnapshotCache {
    fn reserve_sequence(&self, node_key: &str) -> u64 {
        let mut slot = self
            .nodes
            .entry(node_key.to_string())
            .or_insert_with(Slot::new);

        let sequence = slot.last_reserved.max(slot.stored_sequence()) + 1;
        slot.last_reserved = sequence;
        sequence
    }

    fn set_snapshot(&self, node_key: &str, snapshot: Arc<ConfigSnapshot>) -> Result<(), CacheError> {
        snapshot.validate().map_err(|e| CacheError::Rejected {
            version: snapshot.version().to_string(),
            reason: e.to_string(),
        })?;

        // The entry guard locks the shard, so publishes to one key are serialized.
        let slot = self
            .nodes
            .entry(node_key.to_string())
            .or_insert_with(Slot::new);

        let attempted = snapshot.sequence();
        let mut outcome = Ok(());
        let mut incoming = Some(snapshot);
        slot.sender.send_if_modified(|current| {
            if let Some(stored) = current {
                if stored.sequence() >= attempted {
                    outcome = Err(CacheError::Stale {
                        current: stored.sequence(),
                        attempted,
                    });
                    return false;
                }
            }
            *current = incoming.take();
            true
        });

        if outcome.is_ok() {
            info!(
                node_key = %node_key,
                sequence = attempted,
                subscribers = slot.sender.receiver_count(),
                "Snapshot stored"
            );
        }
        outcome
    }

    fn snapshot(&self, node_key: &str) -> Option<Arc<ConfigSnapshot>> {
        let slot = self.nodes.get(node_key)?;
        let snapshot = slot.sender.borrow().clone();
        snapshot
    }
}
