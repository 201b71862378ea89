use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::adaptive::error::EngineError;
use crate::adaptive::manager::DecisionManager;
use crate::adaptive::settings;
use crate::adaptive::types::{
    AlgorithmConfig, AlgorithmState, AlgorithmType, ContextualStats, StateKey, VariantStats,
};
use crate::db::{
    BanditStatsRow, ConfigSource, ContextualStatsRow, CustomStatsRow, OptimizerStatsRow,
    StatsBatch, StatsStore, StoreError, StoredStats,
};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("persistence timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Keeps the decision manager and the durable stats mirror in step: restores
/// states at startup, drains dirty states in batches and follows configuration
/// changes.
pub struct PersistenceBridge {
    manager: Arc<DecisionManager>,
    store: Arc<dyn StatsStore>,
    configs: Arc<dyn ConfigSource>,
    timeout: Duration,
    applied: Mutex<HashMap<StateKey, AlgorithmConfig>>,
    /// Serializes store writes against deletes so a flush snapshot taken
    /// before a disable cannot land after it.
    write_lock: tokio::sync::Mutex<()>,
}

impl PersistenceBridge {
    pub fn new(
        manager: Arc<DecisionManager>,
        store: Arc<dyn StatsStore>,
        configs: Arc<dyn ConfigSource>,
        timeout: Duration,
    ) -> Self {
        Self {
            manager,
            store,
            configs,
            timeout,
            applied: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn manager(&self) -> &Arc<DecisionManager> {
        &self.manager
    }

    /// Installs a state for every enabled configuration, restoring stored
    /// counters where they exist.
    pub async fn bootstrap(&self) -> Result<usize, BridgeError> {
        let summary = self.reload_configs().await?;
        tracing::info!(
            count = summary.created,
            failed = summary.failed,
            "adaptive states bootstrapped"
        );
        Ok(summary.created)
    }

    /// Writes every dirty state in one batch. On failure the states are
    /// flagged dirty again so the next tick retries them.
    pub async fn flush(&self) -> Result<usize, BridgeError> {
        let _write_guard = self.write_lock.lock().await;
        let dirty = self.manager.take_dirty();
        if dirty.is_empty() {
            return Ok(0);
        }

        let batch = batch_from_states(&dirty);
        match self.bounded(self.store.upsert(&batch)).await {
            Ok(()) => {
                tracing::debug!(count = dirty.len(), rows = batch.len(), "adaptive stats flushed");
                Ok(dirty.len())
            }
            Err(e) => {
                for state in &dirty {
                    self.manager.mark_dirty(&state.key);
                }
                tracing::warn!(error = %e, count = dirty.len(), "adaptive stats flush failed");
                Err(e)
            }
        }
    }

    /// Diffs the configuration source against the in-memory table.
    pub async fn reload_configs(&self) -> Result<ReloadSummary, BridgeError> {
        let configs = self.configs.list_configs().await?;
        let mut summary = ReloadSummary::default();
        let mut desired = HashSet::new();

        for config in configs.into_iter().filter(|c| c.enabled) {
            let key = config.key();
            desired.insert(key.clone());

            let existed = self.manager.contains(&key);
            let unchanged = existed && self.applied.lock().get(&key) == Some(&config);
            if unchanged {
                continue;
            }

            match self.apply(&config).await {
                Ok(()) if existed => summary.updated += 1,
                Ok(()) => summary.created += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        feature = %key.feature,
                        environment = %key.environment,
                        algorithm = %config.algorithm,
                        error = %e,
                        "algorithm config rejected"
                    );
                }
            }
        }

        for key in self.manager.keys() {
            if desired.contains(&key) {
                continue;
            }
            match self.drop_state(&key).await {
                Ok(_) => summary.removed += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        feature = %key.feature,
                        environment = %key.environment,
                        error = %e,
                        "stale algorithm state kept; stats delete failed"
                    );
                }
            }
        }

        if summary != ReloadSummary::default() {
            tracing::info!(
                created = summary.created,
                updated = summary.updated,
                removed = summary.removed,
                failed = summary.failed,
                "algorithm configs reloaded"
            );
        }
        Ok(summary)
    }

    /// Re-reads one key from the configuration source.
    pub async fn invalidate(&self, key: &StateKey) -> Result<(), BridgeError> {
        match self.configs.get_config(key).await? {
            Some(config) if config.enabled => self.apply(&config).await,
            _ => self.drop_state(key).await.map(|_| ()),
        }
    }

    /// Creates (or updates) the state for `config` and writes its rows before
    /// returning.
    pub async fn enable(&self, config: &AlgorithmConfig) -> Result<(), BridgeError> {
        let key = config.key();
        self.bounded(async {
            self.apply(config).await?;
            self.persist_key(&key).await
        })
        .await
    }

    /// Deletes the stored rows for `key`, then removes its state.
    pub async fn disable(&self, key: &StateKey) -> Result<bool, BridgeError> {
        self.bounded(self.drop_state(key)).await
    }

    async fn apply(&self, config: &AlgorithmConfig) -> Result<(), BridgeError> {
        let key = config.key();
        if self.manager.contains(&key) {
            self.manager.upsert_config(config)?;
        } else {
            self.restore(config).await?;
        }
        self.applied.lock().insert(key, config.clone());
        Ok(())
    }

    async fn restore(&self, config: &AlgorithmConfig) -> Result<(), BridgeError> {
        self.manager.check_config(config)?;
        let mut state = AlgorithmState::from_config(config)?;
        let key = state.key.clone();

        let stored = self.store.load(&key, &config.algorithm.id()).await?;
        let fresh = stored.is_empty();
        let mut repaired = false;
        if !fresh {
            repaired = apply_stored(&mut state, stored);
            tracing::debug!(
                feature = %key.feature,
                environment = %key.environment,
                iteration = state.iteration,
                "algorithm state restored"
            );
        }

        self.manager.install(state);
        if fresh || repaired {
            self.manager.mark_dirty(&key);
        }
        Ok(())
    }

    async fn persist_key(&self, key: &StateKey) -> Result<(), BridgeError> {
        let _write_guard = self.write_lock.lock().await;
        let Some(state) = self.manager.snapshot(&key.feature, &key.environment) else {
            return Ok(());
        };
        let batch = batch_from_states(std::slice::from_ref(&state));
        self.store.upsert(&batch).await?;
        Ok(())
    }

    /// Deletes the stored rows first; the in-memory state only goes once the
    /// store has let go of it.
    async fn drop_state(&self, key: &StateKey) -> Result<bool, BridgeError> {
        let _write_guard = self.write_lock.lock().await;
        let rows = self.store.delete(key).await?;
        let removed = self.manager.remove(&key.feature, &key.environment).is_some();
        self.applied.lock().remove(key);
        tracing::info!(
            feature = %key.feature,
            environment = %key.environment,
            rows = rows,
            "algorithm stats deleted"
        );
        Ok(removed)
    }

    async fn bounded<T, E, F>(&self, fut: F) -> Result<T, BridgeError>
    where
        E: Into<BridgeError>,
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(BridgeError::Timeout(self.timeout)),
        }
    }
}

/// Rows mirroring `states`.
pub fn batch_from_states(states: &[AlgorithmState]) -> StatsBatch {
    let mut batch = StatsBatch::default();
    for state in states {
        push_state(&mut batch, state);
    }
    batch
}

fn push_state(batch: &mut StatsBatch, state: &AlgorithmState) {
    let algorithm = state.algorithm.id();
    let feature = &state.key.feature;
    let environment = &state.key.environment;

    if !state.algorithm.selects_variants() {
        let s = &state.settings;
        batch.optimizer.push(OptimizerStatsRow {
            feature: feature.clone(),
            environment: environment.clone(),
            algorithm,
            iteration: state.iteration,
            current_value: state.current_value,
            best_value: state.best_value,
            best_reward: state.best_reward,
            metric_sum: state.metric_sum,
            last_error: s.get(settings::PREV_ERROR),
            integral: s.get(settings::INTEGRAL),
            step_size: s.get(settings::STEP).or_else(|| s.get(settings::STEP_SCALE)),
            temperature: s.get(settings::TEMP),
            direction: s.get(settings::DIRECTION),
            updated_at: state.updated_at,
        });
        return;
    }

    let counters = state
        .variants_arr
        .iter()
        .map(|v| (v, state.variants.get(v).cloned().unwrap_or_default()));

    if state.algorithm == AlgorithmType::ContextualLinUcb {
        let dim = state.feature_dim();
        for (variant, stats) in counters {
            let model = state
                .contextual
                .get(variant)
                .cloned()
                .unwrap_or_else(|| ContextualStats::new(dim, state.lambda()));
            batch.contextual.push(ContextualStatsRow {
                feature: feature.clone(),
                environment: environment.clone(),
                algorithm: algorithm.clone(),
                variant: variant.clone(),
                feature_dim: model.feature_dim,
                matrix_a: model.matrix_a,
                vector_b: model.vector_b,
                pulls: model.pulls,
                total_reward: model.total_reward,
                evaluations: stats.evaluations,
                successes: stats.successes,
                failures: stats.failures,
                metric_sum: stats.metric_sum,
                updated_at: state.updated_at,
            });
        }
        return;
    }

    let mut totals = VariantStats::default();
    for (variant, stats) in counters {
        totals.evaluations += stats.evaluations;
        totals.successes += stats.successes;
        totals.failures += stats.failures;
        batch.bandit.push(BanditStatsRow {
            feature: feature.clone(),
            environment: environment.clone(),
            algorithm: algorithm.clone(),
            variant: variant.clone(),
            evaluations: stats.evaluations,
            successes: stats.successes,
            failures: stats.failures,
            metric_sum: stats.metric_sum,
            updated_at: state.updated_at,
        });
    }

    if let AlgorithmType::Custom(_) = state.algorithm {
        batch.custom.push(CustomStatsRow {
            feature: feature.clone(),
            environment: environment.clone(),
            algorithm,
            state: state.custom_state.clone().unwrap_or(serde_json::Value::Null),
            evaluations: totals.evaluations,
            successes: totals.successes,
            failures: totals.failures,
            updated_at: state.updated_at,
        });
    }
}

/// Overlays stored rows on a state freshly built from its configuration.
/// Rows for variants no longer configured are ignored. Returns `true` when a
/// stored regression was unusable and reset, so the caller can rewrite it.
pub fn apply_stored(state: &mut AlgorithmState, stored: StoredStats) -> bool {
    if let Some(row) = stored.optimizer {
        state.iteration = row.iteration;
        state.current_value = row.current_value;
        state.best_value = row.best_value;
        state.best_reward = row.best_reward;
        state.metric_sum = row.metric_sum;
        let running = [
            (settings::PREV_ERROR, row.last_error),
            (settings::INTEGRAL, row.integral),
            (settings::TEMP, row.temperature),
            (settings::DIRECTION, row.direction),
        ];
        for (key, value) in running {
            if let Some(value) = value {
                state.settings.set(key, value);
            }
        }
        state.updated_at = row.updated_at;
    }

    for row in stored.bandit {
        if let Some(stats) = state.variant_mut(&row.variant) {
            stats.evaluations = row.evaluations;
            stats.successes = row.successes;
            stats.failures = row.failures;
            stats.metric_sum = row.metric_sum;
        }
    }

    let dim = state.feature_dim();
    let lambda = state.lambda();
    let mut repaired = false;
    for row in stored.contextual {
        let Some(stats) = state.variant_mut(&row.variant) else {
            continue;
        };
        stats.evaluations = row.evaluations;
        stats.successes = row.successes;
        stats.failures = row.failures;
        stats.metric_sum = row.metric_sum;

        let model = ContextualStats {
            feature_dim: row.feature_dim,
            matrix_a: row.matrix_a,
            vector_b: row.vector_b,
            pulls: row.pulls,
            total_reward: row.total_reward,
        };
        // A changed feature_dim invalidates the stored regression.
        if model.feature_dim != dim {
            continue;
        }
        if model.is_well_formed() {
            state.contextual.insert(row.variant, model);
        } else {
            tracing::warn!(
                feature = %state.key.feature,
                environment = %state.key.environment,
                variant = %row.variant,
                "stored regression is malformed; starting from lambda * I"
            );
            state
                .contextual
                .insert(row.variant, ContextualStats::new(dim, lambda));
            repaired = true;
        }
    }

    if let Some(row) = stored.custom {
        state.custom_state = Some(row.state);
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::settings::Settings;
    use crate::db::MemoryStore;
    use rust_decimal_macros::dec;

    #[test]
    fn optimizer_state_maps_to_one_row() {
        let config = AlgorithmConfig::optimizer("ttl", "prod", AlgorithmType::Pid, dec!(5))
            .with_settings(Settings::new().with(settings::KP, dec!(0.5)));
        let mut state = AlgorithmState::from_config(&config).unwrap();
        state.settings.set(settings::INTEGRAL, dec!(2.5));
        state.settings.set(settings::PREV_ERROR, dec!(-1));

        let batch = batch_from_states(&[state]);
        assert_eq!(batch.len(), 1);
        let row = &batch.optimizer[0];
        assert_eq!(row.algorithm, "pid");
        assert_eq!(row.integral, Some(dec!(2.5)));
        assert_eq!(row.last_error, Some(dec!(-1)));
        assert_eq!(row.temperature, None);
    }

    #[test]
    fn custom_state_carries_totals() {
        let config = AlgorithmConfig::bandit(
            "layout",
            "prod",
            AlgorithmType::Custom("softmax".into()),
            &["a", "b"],
        );
        let mut state = AlgorithmState::from_config(&config).unwrap();
        state.variant_mut("a").unwrap().evaluations = 3;
        state.variant_mut("b").unwrap().evaluations = 4;
        state.variant_mut("b").unwrap().successes = 2;
        state.custom_state = Some(serde_json::json!({ "t": 0.5 }));

        let batch = batch_from_states(&[state]);
        assert_eq!(batch.bandit.len(), 2);
        assert_eq!(batch.custom.len(), 1);
        assert_eq!(batch.custom[0].evaluations, 7);
        assert_eq!(batch.custom[0].successes, 2);
        assert_eq!(batch.custom[0].algorithm, "custom:softmax");
    }

    #[test]
    fn stale_contextual_dimension_is_dropped() {
        let with_dim = |dim| Settings::new().with(settings::FEATURE_DIM, dim);
        let old = AlgorithmConfig::bandit("rank", "prod", AlgorithmType::ContextualLinUcb, &["a"])
            .with_settings(with_dim(dec!(2)));
        let mut state = AlgorithmState::from_config(&old).unwrap();
        state.variant_mut("a").unwrap().evaluations = 9;
        let batch = batch_from_states(&[state]);

        let new = old.clone().with_settings(with_dim(dec!(3)));
        let mut restored = AlgorithmState::from_config(&new).unwrap();
        apply_stored(
            &mut restored,
            StoredStats {
                contextual: batch.contextual,
                ..StoredStats::default()
            },
        );
        assert_eq!(restored.variants["a"].evaluations, 9);
        assert_eq!(restored.contextual["a"].feature_dim, 3);
    }

    #[test]
    fn malformed_regression_restarts_from_identity() {
        let config = AlgorithmConfig::bandit("rank", "prod", AlgorithmType::ContextualLinUcb, &["a"])
            .with_settings(Settings::new().with(settings::FEATURE_DIM, dec!(2)));
        let mut state = AlgorithmState::from_config(&config).unwrap();
        state.variant_mut("a").unwrap().evaluations = 4;
        state.contextual.get_mut("a").unwrap().matrix_a[3] = f64::INFINITY;
        let batch = batch_from_states(&[state]);

        let mut restored = AlgorithmState::from_config(&config).unwrap();
        let repaired = apply_stored(
            &mut restored,
            StoredStats {
                contextual: batch.contextual,
                ..StoredStats::default()
            },
        );
        assert!(repaired);
        assert_eq!(restored.variants["a"].evaluations, 4);
        assert_eq!(restored.contextual["a"], ContextualStats::new(2, 1.0));
    }

    #[tokio::test]
    async fn failed_flush_keeps_states_dirty() {
        let manager = Arc::new(DecisionManager::seeded(1));
        let store = Arc::new(MemoryStore::new());
        let bridge = PersistenceBridge::new(
            Arc::clone(&manager),
            store.clone(),
            store.clone(),
            Duration::from_secs(1),
        );
        manager
            .upsert_config(&AlgorithmConfig::bandit("f", "prod", AlgorithmType::Ucb1, &["a"]))
            .unwrap();

        store.set_fail_writes(true);
        assert!(matches!(bridge.flush().await, Err(BridgeError::Store(_))));

        store.set_fail_writes(false);
        assert_eq!(bridge.flush().await.unwrap(), 1);
        assert_eq!(bridge.flush().await.unwrap(), 0);
        assert_eq!(store.upsert_count(), 1);
    }
}
