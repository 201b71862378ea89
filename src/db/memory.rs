use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::adaptive::types::{AlgorithmConfig, StateKey};
use crate::db::{
    BanditStatsRow, ConfigSource, ContextualStatsRow, CustomStatsRow, OptimizerStatsRow,
    StatsBatch, StatsStore, StoreError, StoredStats,
};

type RowKey = (StateKey, String);
type VariantRowKey = (StateKey, String, String);

/// In-process store for embedders without a database, and for tests.
#[derive(Default)]
pub struct MemoryStore {
    bandit: RwLock<BTreeMap<VariantRowKey, BanditStatsRow>>,
    optimizer: RwLock<BTreeMap<RowKey, OptimizerStatsRow>>,
    contextual: RwLock<BTreeMap<VariantRowKey, ContextualStatsRow>>,
    custom: RwLock<BTreeMap<RowKey, CustomStatsRow>>,
    configs: RwLock<BTreeMap<StateKey, AlgorithmConfig>>,
    fail_writes: AtomicBool,
    upserts: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_config(&self, config: AlgorithmConfig) {
        self.configs.write().insert(config.key(), config);
    }

    pub fn delete_config(&self, key: &StateKey) -> bool {
        self.configs.write().remove(key).is_some()
    }

    /// Makes every write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful upsert calls.
    pub fn upsert_count(&self) -> u64 {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn row_count(&self) -> usize {
        self.bandit.read().len()
            + self.optimizer.read().len()
            + self.contextual.read().len()
            + self.custom.read().len()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

fn row_key(feature: &str, environment: &str, algorithm: &str) -> RowKey {
    (StateKey::new(feature, environment), algorithm.to_string())
}

fn variant_row_key(feature: &str, environment: &str, algorithm: &str, variant: &str) -> VariantRowKey {
    (
        StateKey::new(feature, environment),
        algorithm.to_string(),
        variant.to_string(),
    )
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn upsert(&self, batch: &StatsBatch) -> Result<(), StoreError> {
        self.check_writable()?;

        {
            let mut bandit = self.bandit.write();
            for row in &batch.bandit {
                let key = variant_row_key(&row.feature, &row.environment, &row.algorithm, &row.variant);
                bandit.insert(key, row.clone());
            }
        }
        {
            let mut optimizer = self.optimizer.write();
            for row in &batch.optimizer {
                optimizer.insert(row_key(&row.feature, &row.environment, &row.algorithm), row.clone());
            }
        }
        {
            let mut contextual = self.contextual.write();
            for row in &batch.contextual {
                let key = variant_row_key(&row.feature, &row.environment, &row.algorithm, &row.variant);
                contextual.insert(key, row.clone());
            }
        }
        {
            let mut custom = self.custom.write();
            for row in &batch.custom {
                custom.insert(row_key(&row.feature, &row.environment, &row.algorithm), row.clone());
            }
        }

        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, key: &StateKey, algorithm: &str) -> Result<StoredStats, StoreError> {
        let matches = |k: &StateKey, a: &str| k == key && a == algorithm;
        let lookup = (key.clone(), algorithm.to_string());

        Ok(StoredStats {
            bandit: self
                .bandit
                .read()
                .iter()
                .filter(|((k, a, _), _)| matches(k, a))
                .map(|(_, row)| row.clone())
                .collect(),
            optimizer: self.optimizer.read().get(&lookup).cloned(),
            contextual: self
                .contextual
                .read()
                .iter()
                .filter(|((k, a, _), _)| matches(k, a))
                .map(|(_, row)| row.clone())
                .collect(),
            custom: self.custom.read().get(&lookup).cloned(),
        })
    }

    async fn delete(&self, key: &StateKey) -> Result<u64, StoreError> {
        self.check_writable()?;

        let mut deleted = 0u64;
        let mut bandit = self.bandit.write();
        let before = bandit.len();
        bandit.retain(|(k, _, _), _| k != key);
        deleted += (before - bandit.len()) as u64;
        drop(bandit);

        let mut optimizer = self.optimizer.write();
        let before = optimizer.len();
        optimizer.retain(|(k, _), _| k != key);
        deleted += (before - optimizer.len()) as u64;
        drop(optimizer);

        let mut contextual = self.contextual.write();
        let before = contextual.len();
        contextual.retain(|(k, _, _), _| k != key);
        deleted += (before - contextual.len()) as u64;
        drop(contextual);

        let mut custom = self.custom.write();
        let before = custom.len();
        custom.retain(|(k, _), _| k != key);
        deleted += (before - custom.len()) as u64;

        Ok(deleted)
    }
}

#[async_trait]
impl ConfigSource for MemoryStore {
    async fn list_configs(&self) -> Result<Vec<AlgorithmConfig>, StoreError> {
        Ok(self.configs.read().values().cloned().collect())
    }

    async fn get_config(&self, key: &StateKey) -> Result<Option<AlgorithmConfig>, StoreError> {
        Ok(self.configs.read().get(key).cloned())
    }
}
