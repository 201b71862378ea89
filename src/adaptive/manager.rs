use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;

use crate::adaptive::bandit::{self, custom, epsilon_greedy, linucb, thompson, ucb1, CustomAlgorithm};
use crate::adaptive::error::EngineError;
use crate::adaptive::metrics;
use crate::adaptive::optimizer::{annealing, bayes_opt, cem, hill_climbing, pid};
use crate::adaptive::random::{RandomSource, SeededRandom, ThreadRandom};
use crate::adaptive::types::{AlgorithmConfig, AlgorithmKind, AlgorithmState, AlgorithmType, StateKey};
use crate::track_algorithm;

struct StateEntry {
    state: Mutex<AlgorithmState>,
    dirty: AtomicBool,
}

impl StateEntry {
    fn new(state: AlgorithmState, dirty: bool) -> Self {
        Self {
            state: Mutex::new(state),
            dirty: AtomicBool::new(dirty),
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

/// Owns every running algorithm instance and dispatches evaluation and
/// feedback calls to the configured algorithm.
///
/// The table lock is only held long enough to clone an entry handle; each
/// entry serializes its own mutations, so calls on different keys never
/// contend. Nothing here blocks on storage: mutated entries are flagged dirty
/// and drained by the persistence bridge.
pub struct DecisionManager {
    states: RwLock<HashMap<StateKey, Arc<StateEntry>>>,
    custom: RwLock<HashMap<String, Arc<dyn CustomAlgorithm>>>,
    rng: Arc<dyn RandomSource>,
}

impl Default for DecisionManager {
    fn default() -> Self {
        Self::new(Arc::new(ThreadRandom))
    }
}

impl DecisionManager {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            custom: RwLock::new(HashMap::new()),
            rng,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(Arc::new(SeededRandom::new(seed)))
    }

    pub fn register_custom(&self, algorithm: Arc<dyn CustomAlgorithm>) {
        let name = algorithm.name().to_ascii_lowercase();
        tracing::info!(algorithm = %name, "custom algorithm registered");
        self.custom.write().insert(name, algorithm);
    }

    fn custom_algorithm(&self, name: &str) -> Option<Arc<dyn CustomAlgorithm>> {
        self.custom.read().get(name).cloned()
    }

    fn entry(&self, feature: &str, environment: &str) -> Option<Arc<StateEntry>> {
        self.states
            .read()
            .get(&StateKey::new(feature, environment))
            .cloned()
    }

    /// Runs `f` on an enabled state and flags the entry dirty when `f` reports
    /// a change.
    fn with_enabled<T>(
        &self,
        feature: &str,
        environment: &str,
        f: impl FnOnce(&mut AlgorithmState) -> Option<T>,
    ) -> Option<T> {
        let entry = self.entry(feature, environment)?;
        let mut state = entry.state.lock();
        if !state.enabled {
            return None;
        }
        let result = f(&mut state);
        if result.is_some() {
            entry.mark_dirty();
        }
        result
    }

    // ---- configuration -------------------------------------------------

    /// Creates or updates the state for `config.key()`. Invalid
    /// configurations are rejected before any state exists.
    pub fn upsert_config(&self, config: &AlgorithmConfig) -> Result<(), EngineError> {
        self.check_config(config)?;

        let key = config.key();
        let existing = self.states.read().get(&key).cloned();
        if let Some(entry) = existing {
            entry.state.lock().apply_config(config)?;
            entry.mark_dirty();
            tracing::debug!(
                feature = %key.feature,
                environment = %key.environment,
                algorithm = %config.algorithm,
                "algorithm config updated"
            );
            return Ok(());
        }

        let state = AlgorithmState::from_config(config)?;
        let mut states = self.states.write();
        match states.get(&key) {
            // Lost a race with another creator; fold into its entry.
            Some(existing) => {
                existing.state.lock().apply_config(config)?;
                existing.mark_dirty();
            }
            None => {
                states.insert(key.clone(), Arc::new(StateEntry::new(state, true)));
                tracing::info!(
                    feature = %key.feature,
                    environment = %key.environment,
                    algorithm = %config.algorithm,
                    "algorithm state created"
                );
            }
        }
        Ok(())
    }

    /// Validates `config` against the built-in rules and the registered
    /// custom algorithms.
    pub fn check_config(&self, config: &AlgorithmConfig) -> Result<(), EngineError> {
        if let AlgorithmType::Custom(name) = &config.algorithm {
            if self.custom_algorithm(name).is_none() {
                return Err(EngineError::UnknownCustomAlgorithm(name.clone()));
            }
        }
        config.validate()
    }

    /// Installs a previously persisted state, replacing any in-memory one.
    /// Restored states start clean.
    pub fn install(&self, state: AlgorithmState) {
        let key = state.key.clone();
        self.states
            .write()
            .insert(key, Arc::new(StateEntry::new(state, false)));
    }

    pub fn remove(&self, feature: &str, environment: &str) -> Option<AlgorithmState> {
        let key = StateKey::new(feature, environment);
        let entry = self.states.write().remove(&key)?;
        tracing::info!(feature = %feature, environment = %environment, "algorithm state removed");
        let state = entry.state.lock().clone();
        Some(state)
    }

    pub fn set_enabled(&self, feature: &str, environment: &str, enabled: bool) -> bool {
        let Some(entry) = self.entry(feature, environment) else {
            return false;
        };
        let mut state = entry.state.lock();
        if state.enabled != enabled {
            state.enabled = enabled;
            state.touch();
            entry.mark_dirty();
        }
        true
    }

    // ---- queries -------------------------------------------------------

    pub fn has_algorithm(&self, feature: &str, environment: &str) -> bool {
        self.entry(feature, environment)
            .is_some_and(|entry| entry.state.lock().enabled)
    }

    pub fn algorithm_kind(&self, feature: &str, environment: &str) -> Option<AlgorithmKind> {
        let entry = self.entry(feature, environment)?;
        let state = entry.state.lock();
        state.enabled.then(|| state.kind())
    }

    pub fn snapshot(&self, feature: &str, environment: &str) -> Option<AlgorithmState> {
        let entry = self.entry(feature, environment)?;
        let state = entry.state.lock().clone();
        Some(state)
    }

    pub fn keys(&self) -> Vec<StateKey> {
        let mut keys: Vec<StateKey> = self.states.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &StateKey) -> bool {
        self.states.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    // ---- bandit path ---------------------------------------------------

    /// Picks the variant to serve. `None` when the key is absent, disabled,
    /// or configured as a tuner.
    pub fn evaluate_feature(&self, feature: &str, environment: &str) -> Option<String> {
        self.select_variant(feature, environment, None)
    }

    /// Like [`evaluate_feature`](Self::evaluate_feature) with an explicit
    /// context vector for contextual bandits. Other bandits ignore it.
    pub fn evaluate_feature_with_context(
        &self,
        feature: &str,
        environment: &str,
        context: &[f64],
    ) -> Option<String> {
        self.select_variant(feature, environment, Some(context))
    }

    fn select_variant(
        &self,
        feature: &str,
        environment: &str,
        context: Option<&[f64]>,
    ) -> Option<String> {
        let rng = self.rng.as_ref();
        self.with_enabled(feature, environment, |state| {
            if state.is_optimizer || !state.algorithm.selects_variants() {
                return None;
            }
            let metric_id = state.algorithm.metric_id();
            let chosen = track_algorithm!(metric_id, match state.algorithm.clone() {
                AlgorithmType::EpsilonGreedy => epsilon_greedy::select(state, rng),
                AlgorithmType::Ucb1 => ucb1::select(state),
                AlgorithmType::ThompsonSampling => thompson::select(state, rng),
                AlgorithmType::ContextualLinUcb => match context {
                    Some(x) => linucb::select(state, x),
                    None => {
                        let ones = vec![1.0; state.feature_dim()];
                        linucb::select(state, &ones)
                    }
                },
                AlgorithmType::Custom(name) => match self.custom_algorithm(&name) {
                    Some(algorithm) => custom::select(algorithm.as_ref(), state, rng),
                    None => None,
                },
                _ => None,
            });

            chosen.or_else(|| {
                metrics::registry().record_error(metric_id);
                tracing::warn!(
                    feature = %state.key.feature,
                    environment = %state.key.environment,
                    algorithm = %state.algorithm,
                    "selection produced no variant; serving a random one"
                );
                fallback_select(state, rng)
            })
        })
    }

    pub fn report_outcome(
        &self,
        feature: &str,
        environment: &str,
        variant: &str,
        success: bool,
    ) -> bool {
        self.with_enabled(feature, environment, |state| {
            if state.is_optimizer || !bandit::record_outcome(state, variant, success) {
                return None;
            }
            if let AlgorithmType::Custom(name) = state.algorithm.clone() {
                if let Some(algorithm) = self.custom_algorithm(&name) {
                    let reward = if success { Decimal::ONE } else { Decimal::ZERO };
                    custom::observe(algorithm.as_ref(), state, variant, reward);
                }
            }
            Some(())
        })
        .is_some()
    }

    pub fn report_contextual_reward(
        &self,
        feature: &str,
        environment: &str,
        variant: &str,
        context: &[f64],
        reward: Decimal,
    ) -> bool {
        self.with_enabled(feature, environment, |state| {
            if state.algorithm != AlgorithmType::ContextualLinUcb {
                return None;
            }
            linucb::update(state, variant, context, reward).then_some(())
        })
        .is_some()
    }

    // ---- optimizer path ------------------------------------------------

    /// Cached value of a tuner. Steps only happen on feedback.
    pub fn evaluate_optimizer(&self, feature: &str, environment: &str) -> Option<Decimal> {
        let entry = self.entry(feature, environment)?;
        let state = entry.state.lock();
        (state.enabled && state.is_optimizer).then_some(state.current_value)
    }

    /// Feeds an objective reading to hill climbing or simulated annealing and
    /// returns the resulting value.
    pub fn report_reward(&self, feature: &str, environment: &str, reward: Decimal) -> Option<Decimal> {
        let rng = self.rng.as_ref();
        self.with_enabled(feature, environment, |state| {
            if !state.is_optimizer {
                return None;
            }
            let metric_id = state.algorithm.metric_id();
            match state.algorithm {
                AlgorithmType::HillClimbing => {
                    state.record_best(state.current_value, reward);
                    Some(track_algorithm!(metric_id, hill_climbing::step(state, reward)))
                }
                AlgorithmType::SimulatedAnnealing => {
                    state.record_best(state.current_value, reward);
                    track_algorithm!(metric_id, annealing::step(state, reward, rng));
                    Some(state.current_value)
                }
                _ => None,
            }
        })
    }

    pub fn report_measurement(
        &self,
        feature: &str,
        environment: &str,
        measured: Decimal,
        target: Decimal,
    ) -> Option<Decimal> {
        self.with_enabled(feature, environment, |state| {
            if !state.is_optimizer || state.algorithm != AlgorithmType::Pid {
                return None;
            }
            Some(track_algorithm!(
                state.algorithm.metric_id(),
                pid::step(state, measured, target)
            ))
        })
    }

    /// Hands a scored population to Bayesian optimization or CEM. For tuners
    /// the result also becomes the current value.
    pub fn report_samples(
        &self,
        feature: &str,
        environment: &str,
        samples: &[Decimal],
        rewards: &[Decimal],
    ) -> Option<Decimal> {
        let rng = self.rng.as_ref();
        self.with_enabled(feature, environment, |state| {
            let metric_id = state.algorithm.metric_id();
            match state.algorithm {
                AlgorithmType::BayesianOptimization => {
                    track_algorithm!(metric_id, bayes_opt::select(state, samples, rewards, rng))
                }
                AlgorithmType::CrossEntropyMethod => {
                    track_algorithm!(metric_id, cem::step(state, samples, rewards))
                }
                _ => None,
            }
        })
    }

    /// Annealing step for an externally proposed candidate. Returns whether
    /// the candidate was accepted.
    pub fn report_candidate(
        &self,
        feature: &str,
        environment: &str,
        candidate: Decimal,
        reward: Decimal,
    ) -> Option<bool> {
        let rng = self.rng.as_ref();
        self.with_enabled(feature, environment, |state| {
            if !state.is_optimizer || state.algorithm != AlgorithmType::SimulatedAnnealing {
                return None;
            }
            state.record_best(candidate, reward);
            Some(track_algorithm!(
                state.algorithm.metric_id(),
                annealing::step_with_candidate(state, candidate, reward, rng)
            ))
        })
    }

    pub fn propose_candidate(&self, feature: &str, environment: &str) -> Option<Decimal> {
        let entry = self.entry(feature, environment)?;
        let state = entry.state.lock();
        if !state.enabled || !state.is_optimizer || state.algorithm != AlgorithmType::SimulatedAnnealing {
            return None;
        }
        Some(annealing::propose(&state, self.rng.as_ref()))
    }

    // ---- persistence hooks ---------------------------------------------

    /// Clears every dirty flag and returns copies of the states that carried
    /// one.
    pub fn take_dirty(&self) -> Vec<AlgorithmState> {
        let entries: Vec<Arc<StateEntry>> = self.states.read().values().cloned().collect();
        entries
            .iter()
            .filter_map(|entry| {
                let state = entry.state.lock();
                if entry.dirty.swap(false, Ordering::AcqRel) {
                    Some(state.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn mark_dirty(&self, key: &StateKey) -> bool {
        match self.states.read().get(key) {
            Some(entry) => {
                entry.mark_dirty();
                true
            }
            None => false,
        }
    }
}

fn fallback_select(state: &mut AlgorithmState, rng: &dyn RandomSource) -> Option<String> {
    if state.variants_arr.is_empty() {
        return None;
    }
    let chosen = state.variants_arr[rng.index(state.variants_arr.len())].clone();
    state.record_selection(&chosen);
    state.touch();
    Some(chosen)
}
