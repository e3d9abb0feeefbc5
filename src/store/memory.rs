//! In-memory rule store, seedable from YAML.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use super::{RuleStore, StoreError};
use crate::error::{Result, SyncError};
use crate::ratelimit::{CallerId, RateLimitRule, RuleId, Secret};

/// A caller row.
#[derive(Debug, Clone, Deserialize)]
pub struct Caller {
    pub id: CallerId,
    pub name: String,
    pub api_token: Secret,
}

/// A rate limit row before it is joined with its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRule {
    pub caller_id: CallerId,
    pub endpoint: String,
    pub limit_count: i64,
    pub limit_interval: String,
}

#[derive(Debug, Deserialize)]
struct SeedRule {
    #[serde(default)]
    id: Option<RuleId>,
    caller_id: CallerId,
    #[serde(default)]
    endpoint: String,
    #[serde(alias = "limit_unit")]
    limit_count: i64,
    limit_interval: String,
}

#[derive(Debug, Default, Deserialize)]
struct Seed {
    #[serde(default)]
    callers: Vec<Caller>,
    #[serde(default)]
    rules: Vec<SeedRule>,
}

#[derive(Debug, Default)]
struct Tables {
    callers: BTreeMap<CallerId, Caller>,
    rules: BTreeMap<RuleId, StoredRule>,
    next_rule_id: RuleId,
}

impl Tables {
    fn from_seed(seed: Seed) -> Self {
        let mut tables = Tables {
            next_rule_id: 1,
            ..Default::default()
        };
        for caller in seed.callers {
            tables.callers.insert(caller.id, caller);
        }
        for seed_rule in seed.rules {
            let id = seed_rule.id.unwrap_or(tables.next_rule_id);
            tables.next_rule_id = tables.next_rule_id.max(id + 1);
            tables.rules.insert(
                id,
                StoredRule {
                    caller_id: seed_rule.caller_id,
                    endpoint: seed_rule.endpoint,
                    limit_count: seed_rule.limit_count,
                    limit_interval: seed_rule.limit_interval,
                },
            );
        }
        tables
    }
}

/// A [`RuleStore`] holding callers and rules in process memory.
///
/// Rules are listed in ascending id order, like a table scan on the primary key.
#[derive(Debug)]
pub struct MemoryRuleStore {
    tables: RwLock<Tables>,
}

impl MemoryRuleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::from_seed(Seed::default())),
        }
    }

    /// Load a seed from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rule store seed");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a seed from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let store = Self::new();
        store.reload_from_yaml(yaml)?;
        Ok(store)
    }

    /// Replace the whole content of the store with a YAML seed.
    pub fn reload_from_yaml(&self, yaml: &str) -> Result<()> {
        let seed: Seed = serde_yaml::from_str(yaml)
            .map_err(|e| SyncError::Config(format!("Failed to parse rule store seed: {}", e)))?;
        let tables = Tables::from_seed(seed);
        debug!(
            callers = tables.callers.len(),
            rules = tables.rules.len(),
            "Rule store seeded"
        );
        *self.tables.write() = tables;
        Ok(())
    }

    /// Insert or replace a caller.
    pub fn upsert_caller(&self, caller: Caller) {
        debug!(
            caller_id = caller.id,
            name = %caller.name,
            api_token = %caller.api_token.masked(),
            "Storing caller"
        );
        self.tables.write().callers.insert(caller.id, caller);
    }

    /// Remove a caller. Rules referencing it are left in place.
    pub fn delete_caller(&self, id: CallerId) -> bool {
        self.tables.write().callers.remove(&id).is_some()
    }

    /// Insert a new rule and return its id.
    pub fn create_rule(&self, rule: StoredRule) -> RuleId {
        let mut tables = self.tables.write();
        let id = tables.next_rule_id;
        tables.next_rule_id += 1;
        tables.rules.insert(id, rule);
        id
    }

    /// Replace an existing rule.
    pub fn update_rule(&self, id: RuleId, rule: StoredRule) -> std::result::Result<(), StoreError> {
        let mut tables = self.tables.write();
        match tables.rules.get_mut(&id) {
            Some(existing) => {
                *existing = rule;
                Ok(())
            }
            None => Err(StoreError::RuleNotFound(id)),
        }
    }

    /// Delete a rule.
    pub fn delete_rule(&self, id: RuleId) -> bool {
        self.tables.write().rules.remove(&id).is_some()
    }
}

impl Default for MemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list_all_rules(&self) -> std::result::Result<Vec<RateLimitRule>, StoreError> {
        let tables = self.tables.read();
        let rules = tables
            .rules
            .iter()
            .map(|(id, rule)| RateLimitRule {
                id: *id,
                caller_id: rule.caller_id,
                caller_name: tables
                    .callers
                    .get(&rule.caller_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_default(),
                endpoint: Some(rule.endpoint.clone()),
                limit_count: rule.limit_count,
                limit_interval: rule.limit_interval.clone(),
            })
            .collect();
        Ok(rules)
    }

    async fn resolve_secret(&self, caller_id: CallerId) -> std::result::Result<Secret, StoreError> {
        self.tables
            .read()
            .callers
            .get(&caller_id)
            .map(|c| c.api_token.clone())
            .ok_or(StoreError::NotFound(caller_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"
callers:
  - id: 1
    name: alice
    api_token: "tok-alice-abcde"
  - id: 2
    name: bob
    api_token: "tok-bob-fghij"
rules:
  - caller_id: 1
    endpoint: ""
    limit_unit: 100
    limit_interval: minute
  - id: 10
    caller_id: 2
    endpoint: /login
    limit_count: 5
    limit_interval: second
"#;

    #[tokio::test]
    async fn test_seed_and_list() {
        let store = MemoryRuleStore::from_yaml(SEED).unwrap();
        let rules = store.list_all_rules().await.unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, 1);
        assert_eq!(rules[0].caller_name, "alice");
        assert_eq!(rules[0].scoped_endpoint(), None);
        assert_eq!(rules[0].limit_count, 100);
        assert_eq!(rules[1].id, 10);
        assert_eq!(rules[1].scoped_endpoint(), Some("/login"));
        assert_eq!(rules[1].limit_interval, "second");
    }

    #[tokio::test]
    async fn test_resolve_secret() {
        let store = MemoryRuleStore::from_yaml(SEED).unwrap();

        let secret = store.resolve_secret(2).await.unwrap();
        assert_eq!(secret.fingerprint(2).unwrap(), "fghij");
        assert_eq!(store.resolve_secret(99).await, Err(StoreError::NotFound(99)));
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let store = MemoryRuleStore::from_yaml(SEED).unwrap();

        let id = store.create_rule(StoredRule {
            caller_id: 1,
            endpoint: "/search".to_string(),
            limit_count: 20,
            limit_interval: "hour".to_string(),
        });
        assert_eq!(id, 11);
        assert_eq!(store.list_all_rules().await.unwrap().len(), 3);

        store
            .update_rule(
                id,
                StoredRule {
                    caller_id: 2,
                    endpoint: "/search".to_string(),
                    limit_count: 30,
                    limit_interval: "day".to_string(),
                },
            )
            .unwrap();
        let rules = store.list_all_rules().await.unwrap();
        assert_eq!(rules[2].caller_name, "bob");
        assert_eq!(rules[2].limit_count, 30);

        assert!(store.delete_rule(id));
        assert!(!store.delete_rule(id));
        let missing = StoredRule {
            caller_id: 1,
            endpoint: String::new(),
            limit_count: 1,
            limit_interval: "day".to_string(),
        };
        assert_eq!(store.update_rule(id, missing), Err(StoreError::RuleNotFound(id)));
    }

    #[tokio::test]
    async fn test_deleted_caller_keeps_rule() {
        let store = MemoryRuleStore::from_yaml(SEED).unwrap();
        assert!(store.delete_caller(1));

        let rules = store.list_all_rules().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].caller_name, "");
        assert!(store.resolve_secret(1).await.is_err());
    }

    #[test]
    fn test_invalid_seed() {
        let err = MemoryRuleStore::from_yaml("callers: 12").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
