//! The refresh pipeline: read rules, build descriptors, assemble, publish.
//!
//! Refreshes run in the task that triggers them. Concurrent triggers are
//! serialized so that the last snapshot published always comes from the last
//! read of the rule store.

use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use crate::config::SnapshotConfig;
use crate::error::{Result, SyncError};
use crate::ratelimit::{build_descriptors, CallerId, RateLimitRule, Secret};
use crate::snapshot::{DistributionCache, SnapshotAssembler, SnapshotPublisher};
use crate::store::{RuleStore, StoreError};

/// Stage of the refresh pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    Building,
    Assembling,
    Publishing,
    /// The last refresh failed; the previous snapshot stays in place
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncState::Idle => "idle",
            SyncState::Building => "building",
            SyncState::Assembling => "assembling",
            SyncState::Publishing => "publishing",
            SyncState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Summary of a successful refresh.
#[derive(Debug)]
pub struct RefreshReport {
    /// Version of the published snapshot
    pub version: String,
    /// Sequence of the published snapshot
    pub sequence: u64,
    /// Number of rules read from the store
    pub rules: usize,
    /// Number of top-level descriptors published
    pub descriptors: usize,
    /// Rules left out because their caller is gone
    pub skipped: Vec<SyncError>,
}

/// Runs the refresh pipeline for one node key.
pub struct Synchronizer {
    store: Arc<dyn RuleStore>,
    assembler: SnapshotAssembler,
    publisher: SnapshotPublisher,
    node_key: String,
    state: RwLock<SyncState>,
    refresh_lock: Mutex<()>,
}

impl Synchronizer {
    /// Create a synchronizer publishing the configured snapshot into `cache`.
    pub fn new(
        store: Arc<dyn RuleStore>,
        cache: Arc<dyn DistributionCache>,
        config: &SnapshotConfig,
    ) -> Self {
        Self {
            store,
            assembler: SnapshotAssembler::new(config.name.clone(), config.domain.clone()),
            publisher: SnapshotPublisher::new(cache),
            node_key: config.node_key.clone(),
            state: RwLock::new(SyncState::Idle),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn node_key(&self) -> &str {
        &self.node_key
    }

    /// Current pipeline stage, or the outcome of the last refresh when none
    /// is running.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Rebuild the configuration from the rule store and publish it.
    ///
    /// Called by the administrative layer after every rule mutation. On error
    /// the cache is left untouched.
    #[instrument(skip(self), fields(node_key = %self.node_key))]
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let _guard = self.refresh_lock.lock().await;

        let result = self.run().await;
        match &result {
            Ok(report) => {
                self.transition(SyncState::Idle);
                info!(
                    version = %report.version,
                    sequence = report.sequence,
                    rules = report.rules,
                    descriptors = report.descriptors,
                    skipped = report.skipped.len(),
                    "Refresh complete"
                );
            }
            Err(e) => {
                self.transition(SyncState::Failed);
                error!(error = %e, "Refresh failed, previous snapshot left in place");
            }
        }
        result
    }

    async fn run(&self) -> Result<RefreshReport> {
        self.transition(SyncState::Building);
        // Reserved before reading the store so publish order follows read order.
        let sequence = self.publisher.reserve_sequence(&self.node_key);
        let rules = self.store.list_all_rules().await?;
        let secrets = self.resolve_secrets(&rules).await;
        let set = build_descriptors(&rules, |caller_id| {
            secrets
                .get(&caller_id)
                .cloned()
                .unwrap_or(Err(StoreError::NotFound(caller_id)))
        })?;

        self.transition(SyncState::Assembling);
        let descriptors = set.descriptors.len();
        let snapshot = self.assembler.assemble(sequence, set.descriptors)?;

        self.transition(SyncState::Publishing);
        let published = self.publisher.publish(&self.node_key, snapshot)?;

        Ok(RefreshReport {
            version: published.version().to_string(),
            sequence: published.sequence(),
            rules: rules.len(),
            descriptors,
            skipped: set.skipped,
        })
    }

    /// Resolve the secret of every caller referenced by `rules` concurrently.
    ///
    /// Lookup failures are kept per caller and surface when the builder
    /// reaches the first rule that needs them.
    async fn resolve_secrets(
        &self,
        rules: &[RateLimitRule],
    ) -> HashMap<CallerId, std::result::Result<Secret, StoreError>> {
        let caller_ids: BTreeSet<CallerId> = rules.iter().map(|r| r.caller_id).collect();
        let lookups = caller_ids.into_iter().map(|caller_id| async move {
            (caller_id, self.store.resolve_secret(caller_id).await)
        });

        join_all(lookups).await.into_iter().collect()
    }

    fn transition(&self, next: SyncState) {
        let mut state = self.state.write();
        let from = *state;
        debug!(from = %from, to = %next, "Sync state transition");
        *state = next;
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("node_key", &self.node_key)
            .field("assembler", &self.assembler)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Descriptor, LimitUnit};
    use crate::snapshot::SnapshotCache;
    use crate::store::MemoryRuleStore;
    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    const SEED: &str = r#"
callers:
  - { id: 1, name: alice, api_token: "tok-abcde" }
  - { id: 2, name: bob, api_token: "tok-fghij" }
  - { id: 3, name: carol, api_token: "tok-klmno" }
rules:
  - { caller_id: 1, endpoint: "", limit_unit: 100, limit_interval: minute }
  - { caller_id: 2, endpoint: /login, limit_unit: 5, limit_interval: second }
  - { caller_id: 3, endpoint: /login, limit_unit: 5, limit_interval: second }
"#;

    fn setup(seed: &str) -> (Arc<MemoryRuleStore>, Arc<SnapshotCache>, Synchronizer) {
        let store = Arc::new(MemoryRuleStore::from_yaml(seed).unwrap());
        let cache = Arc::new(SnapshotCache::new());
        let sync = Synchronizer::new(store.clone(), cache.clone(), &SnapshotConfig::default());
        (store, cache, sync)
    }

    struct FailingStore;

    /// Serves fixed rules; secret lookups for `broken_caller` fail.
    struct BrokenSecretStore {
        rules: Vec<RateLimitRule>,
        broken_caller: CallerId,
    }

    #[async_trait]
    impl RuleStore for BrokenSecretStore {
        async fn list_all_rules(&self) -> std::result::Result<Vec<RateLimitRule>, StoreError> {
            Ok(self.rules.clone())
        }

        async fn resolve_secret(&self, caller_id: CallerId) -> std::result::Result<Secret, StoreError> {
            if caller_id == self.broken_caller {
                Err(StoreError::Backend("connection reset".to_string()))
            } else {
                Ok(Secret::new(format!("tok-{:05}", caller_id)))
            }
        }
    }

    fn rule(id: i64, caller_id: CallerId, interval: &str) -> RateLimitRule {
        RateLimitRule {
            id,
            caller_id,
            caller_name: String::new(),
            endpoint: None,
            limit_count: 10,
            limit_interval: interval.to_string(),
        }
    }

    #[async_trait]
    impl RuleStore for FailingStore {
        async fn list_all_rules(&self) -> std::result::Result<Vec<RateLimitRule>, StoreError> {
            Err(StoreError::Backend("database is locked".to_string()))
        }

        async fn resolve_secret(&self, caller_id: CallerId) -> std::result::Result<Secret, StoreError> {
            Err(StoreError::NotFound(caller_id))
        }
    }

    #[tokio::test]
    async fn test_refresh_publishes_login_scenario() {
        let (_store, cache, sync) = setup(SEED);

        let report = assert_ok!(sync.refresh().await);
        assert_eq!(report.rules, 3);
        assert_eq!(report.descriptors, 2);
        assert!(report.skipped.is_empty());
        assert_eq!(sync.state(), SyncState::Idle);

        let snapshot = cache.snapshot("test-node").unwrap();
        assert_eq!(snapshot.version(), report.version);
        assert_eq!(snapshot.name(), "demo");
        assert_eq!(snapshot.domain(), "ratelimit");
        assert_eq!(
            snapshot.descriptors(),
            &[
                Descriptor::leaf("abcde", LimitUnit::Minute, 100),
                Descriptor::branch(
                    "/login",
                    vec![
                        Descriptor::leaf("fghij", LimitUnit::Second, 5),
                        Descriptor::leaf("klmno", LimitUnit::Second, 5),
                    ]
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_empty_store() {
        let (_store, cache, sync) = setup("{}");

        let report = assert_ok!(sync.refresh().await);
        assert_eq!(report.descriptors, 0);
        assert!(cache.snapshot("test-node").unwrap().descriptors().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_skips_deleted_caller() {
        let (store, cache, sync) = setup(SEED);
        store.delete_caller(2);

        let report = assert_ok!(sync.refresh().await);
        assert_eq!(report.skipped.len(), 1);
        let snapshot = cache.snapshot("test-node").unwrap();
        let login = &snapshot.descriptors()[1];
        assert_eq!(login.children().len(), 1);
        assert_eq!(login.children()[0].value(), "klmno");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let (store, cache, sync) = setup(SEED);
        let first = assert_ok!(sync.refresh().await);

        let bad_rule = store.create_rule(crate::store::StoredRule {
            caller_id: 1,
            endpoint: "/search".to_string(),
            limit_count: 10,
            limit_interval: "eon".to_string(),
        });
        let err = assert_err!(sync.refresh().await);
        assert!(matches!(err, SyncError::UnsupportedInterval { .. }));
        assert_eq!(sync.state(), SyncState::Failed);
        assert_eq!(cache.snapshot("test-node").unwrap().version(), first.version);

        assert!(store.delete_rule(bad_rule));
        assert_ok!(sync.refresh().await);
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_duplicate_rule_is_inconsistent() {
        let (store, cache, sync) = setup(SEED);
        store.create_rule(crate::store::StoredRule {
            caller_id: 2,
            endpoint: "/login".to_string(),
            limit_count: 50,
            limit_interval: "minute".to_string(),
        });

        let err = assert_err!(sync.refresh().await);
        assert!(matches!(err, SyncError::InconsistentSnapshot { .. }));
        assert!(cache.snapshot("test-node").is_none());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let cache = Arc::new(SnapshotCache::new());
        let sync = Synchronizer::new(Arc::new(FailingStore), cache.clone(), &SnapshotConfig::default());

        let err = assert_err!(sync.refresh().await);
        assert!(matches!(err, SyncError::Store(StoreError::Backend(_))));
        assert_eq!(sync.state(), SyncState::Failed);
        assert!(cache.snapshot("test-node").is_none());
    }

    #[tokio::test]
    async fn test_every_refresh_gets_new_version() {
        let (_store, _cache, sync) = setup(SEED);

        let first = assert_ok!(sync.refresh().await);
        let second = assert_ok!(sync.refresh().await);
        assert_ne!(first.version, second.version);
        assert_eq!(second.sequence, first.sequence + 1);
    }

    #[tokio::test]
    async fn test_errors_follow_rule_order() {
        let cache = Arc::new(SnapshotCache::new());

        let store = BrokenSecretStore {
            rules: vec![rule(1, 1, "fortnight"), rule(2, 2, "second")],
            broken_caller: 2,
        };
        let sync = Synchronizer::new(Arc::new(store), cache.clone(), &SnapshotConfig::default());
        let err = assert_err!(sync.refresh().await);
        assert!(matches!(err, SyncError::UnsupportedInterval { rule_id: 1, .. }));

        let store = BrokenSecretStore {
            rules: vec![rule(1, 2, "second"), rule(2, 1, "fortnight")],
            broken_caller: 2,
        };
        let sync = Synchronizer::new(Arc::new(store), cache.clone(), &SnapshotConfig::default());
        let err = assert_err!(sync.refresh().await);
        assert!(matches!(err, SyncError::Store(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn test_caller_with_several_rules_resolves_once() {
        let store = BrokenSecretStore {
            rules: vec![rule(1, 7, "second"), rule(2, 7, "minute")],
            broken_caller: 0,
        };
        let cache = Arc::new(SnapshotCache::new());
        let sync = Synchronizer::new(Arc::new(store), cache.clone(), &SnapshotConfig::default());

        let report = assert_ok!(sync.refresh().await);
        assert_eq!(report.descriptors, 2);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_new_synchronizer_on_same_node_key_publishes() {
        let (store, cache, first) = setup(SEED);
        assert_ok!(first.refresh().await);
        assert_ok!(first.refresh().await);

        store.create_rule(crate::store::StoredRule {
            caller_id: 1,
            endpoint: "/x".to_string(),
            limit_count: 3,
            limit_interval: "hour".to_string(),
        });
        let second = Synchronizer::new(store.clone(), cache.clone(), &SnapshotConfig::default());

        let report = assert_ok!(second.refresh().await);
        assert_eq!(report.sequence, 3);

        let snapshot = cache.snapshot("test-node").unwrap();
        assert_eq!(snapshot.version(), report.version);
        assert!(snapshot.descriptors().iter().any(|d| d.value() == "/x"));

        // the older synchronizer keeps publishing on top of it
        let report = assert_ok!(first.refresh().await);
        assert_eq!(report.sequence, 4);
    }
}
