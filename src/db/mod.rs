//! Durable mirror of the in-memory algorithm states, and the configuration
//! source that says which algorithm runs where.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adaptive::error::EngineError;
use crate::adaptive::types::{AlgorithmConfig, StateKey};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Per-variant counters for the plain bandits and custom algorithms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditStatsRow {
    pub feature: String,
    pub environment: String,
    pub algorithm: String,
    pub variant: String,
    pub evaluations: u64,
    pub successes: u64,
    pub failures: u64,
    pub metric_sum: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerStatsRow {
    pub feature: String,
    pub environment: String,
    pub algorithm: String,
    pub iteration: u64,
    pub current_value: Decimal,
    pub best_value: Option<Decimal>,
    pub best_reward: Option<Decimal>,
    pub metric_sum: Decimal,
    pub last_error: Option<Decimal>,
    pub integral: Option<Decimal>,
    pub step_size: Option<Decimal>,
    pub temperature: Option<Decimal>,
    pub direction: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

/// LinUCB regression state plus the variant's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualStatsRow {
    pub feature: String,
    pub environment: String,
    pub algorithm: String,
    pub variant: String,
    pub feature_dim: usize,
    pub matrix_a: Vec<f64>,
    pub vector_b: Vec<f64>,
    pub pulls: u64,
    pub total_reward: Decimal,
    pub evaluations: u64,
    pub successes: u64,
    pub failures: u64,
    pub metric_sum: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Private state of a custom algorithm with its aggregate counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomStatsRow {
    pub feature: String,
    pub environment: String,
    pub algorithm: String,
    pub state: serde_json::Value,
    pub evaluations: u64,
    pub successes: u64,
    pub failures: u64,
    pub updated_at: DateTime<Utc>,
}

/// One flush worth of rows. Applying the same batch twice is harmless.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsBatch {
    pub bandit: Vec<BanditStatsRow>,
    pub optimizer: Vec<OptimizerStatsRow>,
    pub contextual: Vec<ContextualStatsRow>,
    pub custom: Vec<CustomStatsRow>,
}

impl StatsBatch {
    pub fn len(&self) -> usize {
        self.bandit.len() + self.optimizer.len() + self.contextual.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything stored for one key under one algorithm id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredStats {
    pub bandit: Vec<BanditStatsRow>,
    pub optimizer: Option<OptimizerStatsRow>,
    pub contextual: Vec<ContextualStatsRow>,
    pub custom: Option<CustomStatsRow>,
}

impl StoredStats {
    pub fn is_empty(&self) -> bool {
        self.bandit.is_empty()
            && self.optimizer.is_none()
            && self.contextual.is_empty()
            && self.custom.is_none()
    }
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn upsert(&self, batch: &StatsBatch) -> Result<(), StoreError>;

    /// Rows for `key` written under `algorithm`; rows left by a previously
    /// configured algorithm are not returned.
    async fn load(&self, key: &StateKey, algorithm: &str) -> Result<StoredStats, StoreError>;

    /// Deletes every row for `key` across all tables and returns the count.
    async fn delete(&self, key: &StateKey) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Every configured pair, enabled or not.
    async fn list_configs(&self) -> Result<Vec<AlgorithmConfig>, StoreError>;

    async fn get_config(&self, key: &StateKey) -> Result<Option<AlgorithmConfig>, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid stored {field}: {value}")]
    Decode { field: &'static str, value: String },
    #[error("invalid algorithm for {key}: {source}")]
    Algorithm {
        key: StateKey,
        #[source]
        source: EngineError,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
