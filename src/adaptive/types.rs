use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::adaptive::error::EngineError;
use crate::adaptive::settings::{self, Settings};

pub const DEFAULT_LAMBDA: f64 = 1.0;
/// Upper bound on contextual feature vectors; `A` holds `dim * dim` floats.
pub const MAX_FEATURE_DIM: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub feature: String,
    pub environment: String,
}

impl StateKey {
    pub fn new(feature: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            environment: environment.into(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.feature, self.environment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AlgorithmType {
    EpsilonGreedy,
    Ucb1,
    ThompsonSampling,
    BayesianOptimization,
    CrossEntropyMethod,
    HillClimbing,
    SimulatedAnnealing,
    Pid,
    ContextualLinUcb,
    Custom(String),
}

impl AlgorithmType {
    pub fn builtin() -> &'static [AlgorithmType] {
        &[
            AlgorithmType::EpsilonGreedy,
            AlgorithmType::Ucb1,
            AlgorithmType::ThompsonSampling,
            AlgorithmType::BayesianOptimization,
            AlgorithmType::CrossEntropyMethod,
            AlgorithmType::HillClimbing,
            AlgorithmType::SimulatedAnnealing,
            AlgorithmType::Pid,
            AlgorithmType::ContextualLinUcb,
        ]
    }

    pub fn id(&self) -> String {
        match self {
            AlgorithmType::Custom(name) => format!("custom:{name}"),
            other => other.metric_id().to_string(),
        }
    }

    /// Stable id used for metrics; every custom algorithm shares one bucket.
    pub fn metric_id(&self) -> &'static str {
        match self {
            AlgorithmType::EpsilonGreedy => "epsilon_greedy",
            AlgorithmType::Ucb1 => "ucb1",
            AlgorithmType::ThompsonSampling => "thompson_sampling",
            AlgorithmType::BayesianOptimization => "bayesian_optimization",
            AlgorithmType::CrossEntropyMethod => "cross_entropy",
            AlgorithmType::HillClimbing => "hill_climbing",
            AlgorithmType::SimulatedAnnealing => "simulated_annealing",
            AlgorithmType::Pid => "pid",
            AlgorithmType::ContextualLinUcb => "contextual_linucb",
            AlgorithmType::Custom(_) => "custom",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmType::EpsilonGreedy => "Epsilon-Greedy",
            AlgorithmType::Ucb1 => "UCB1",
            AlgorithmType::ThompsonSampling => "Thompson Sampling",
            AlgorithmType::BayesianOptimization => "Bayesian Optimization",
            AlgorithmType::CrossEntropyMethod => "Cross-Entropy Method",
            AlgorithmType::HillClimbing => "Hill Climbing",
            AlgorithmType::SimulatedAnnealing => "Simulated Annealing",
            AlgorithmType::Pid => "PID Controller",
            AlgorithmType::ContextualLinUcb => "Contextual LinUCB",
            AlgorithmType::Custom(_) => "Custom",
        }
    }

    /// True for algorithms that pick among discrete variants.
    pub fn selects_variants(&self) -> bool {
        matches!(
            self,
            AlgorithmType::EpsilonGreedy
                | AlgorithmType::Ucb1
                | AlgorithmType::ThompsonSampling
                | AlgorithmType::ContextualLinUcb
                | AlgorithmType::Custom(_)
        )
    }

    /// True for algorithms that only make sense as single-value tuners.
    pub fn requires_optimizer(&self) -> bool {
        matches!(
            self,
            AlgorithmType::HillClimbing | AlgorithmType::SimulatedAnnealing | AlgorithmType::Pid
        )
    }

    pub fn is_population_based(&self) -> bool {
        matches!(
            self,
            AlgorithmType::BayesianOptimization | AlgorithmType::CrossEntropyMethod
        )
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl FromStr for AlgorithmType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if let Some(name) = normalized.strip_prefix("custom:") {
            if name.is_empty() {
                return Err(EngineError::UnknownAlgorithm(s.to_string()));
            }
            return Ok(AlgorithmType::Custom(name.to_string()));
        }
        match normalized.as_str() {
            "epsilon_greedy" | "epsilon-greedy" | "egreedy" => Ok(AlgorithmType::EpsilonGreedy),
            "ucb1" | "ucb" => Ok(AlgorithmType::Ucb1),
            "thompson_sampling" | "thompson" => Ok(AlgorithmType::ThompsonSampling),
            "bayesian_optimization" | "bayes_opt" | "bayesopt" => {
                Ok(AlgorithmType::BayesianOptimization)
            }
            "cross_entropy" | "cross_entropy_method" | "cem" => {
                Ok(AlgorithmType::CrossEntropyMethod)
            }
            "hill_climbing" | "hillclimb" => Ok(AlgorithmType::HillClimbing),
            "simulated_annealing" | "annealing" => Ok(AlgorithmType::SimulatedAnnealing),
            "pid" => Ok(AlgorithmType::Pid),
            "contextual_linucb" | "linucb" => Ok(AlgorithmType::ContextualLinUcb),
            _ => Err(EngineError::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for AlgorithmType {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AlgorithmType> for String {
    fn from(value: AlgorithmType) -> Self {
        value.id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    Bandit,
    Optimizer,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStats {
    pub evaluations: u64,
    pub successes: u64,
    pub failures: u64,
    /// Accumulated reward reported for this variant.
    #[serde(default)]
    pub metric_sum: Decimal,
}

impl VariantStats {
    pub fn success_rate(&self) -> f64 {
        if self.evaluations == 0 {
            return 0.0;
        }
        self.successes as f64 / self.evaluations as f64
    }

    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.successes += 1;
            self.metric_sum = self.metric_sum.saturating_add(Decimal::ONE);
        } else {
            self.failures += 1;
        }
    }
}

/// Disjoint LinUCB regression state for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualStats {
    pub feature_dim: usize,
    /// Row-major `d x d`, starts at `lambda * I`.
    pub matrix_a: Vec<f64>,
    pub vector_b: Vec<f64>,
    pub pulls: u64,
    pub total_reward: Decimal,
}

impl ContextualStats {
    pub fn new(feature_dim: usize, lambda: f64) -> Self {
        let lambda = if lambda > 0.0 { lambda } else { DEFAULT_LAMBDA };
        let mut matrix_a = vec![0.0; feature_dim * feature_dim];
        for i in 0..feature_dim {
            matrix_a[i * feature_dim + i] = lambda;
        }
        Self {
            feature_dim,
            matrix_a,
            vector_b: vec![0.0; feature_dim],
            pulls: 0,
            total_reward: Decimal::ZERO,
        }
    }

    /// Shape matches `feature_dim` and every entry is finite.
    pub fn is_well_formed(&self) -> bool {
        self.feature_dim > 0
            && self.matrix_a.len() == self.feature_dim * self.feature_dim
            && self.vector_b.len() == self.feature_dim
            && self.matrix_a.iter().chain(&self.vector_b).all(|v| v.is_finite())
    }
}

/// Externally supplied configuration for one (feature, environment) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub feature_key: String,
    pub environment_key: String,
    pub algorithm: AlgorithmType,
    pub enabled: bool,
    pub is_optimizer: bool,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub variants: Vec<String>,
    #[serde(default)]
    pub initial_value: Option<Decimal>,
}

impl AlgorithmConfig {
    pub fn bandit(
        feature: impl Into<String>,
        environment: impl Into<String>,
        algorithm: AlgorithmType,
        variants: &[&str],
    ) -> Self {
        Self {
            feature_key: feature.into(),
            environment_key: environment.into(),
            algorithm,
            enabled: true,
            is_optimizer: false,
            settings: Settings::new(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
            initial_value: None,
        }
    }

    pub fn optimizer(
        feature: impl Into<String>,
        environment: impl Into<String>,
        algorithm: AlgorithmType,
        initial_value: Decimal,
    ) -> Self {
        Self {
            feature_key: feature.into(),
            environment_key: environment.into(),
            algorithm,
            enabled: true,
            is_optimizer: true,
            settings: Settings::new(),
            variants: Vec::new(),
            initial_value: Some(initial_value),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn key(&self) -> StateKey {
        StateKey::new(&self.feature_key, &self.environment_key)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let algorithm = &self.algorithm;
        if algorithm.selects_variants() && self.is_optimizer {
            return Err(EngineError::KindMismatch {
                algorithm: algorithm.id(),
                is_optimizer: true,
            });
        }
        if algorithm.requires_optimizer() && !self.is_optimizer {
            return Err(EngineError::KindMismatch {
                algorithm: algorithm.id(),
                is_optimizer: false,
            });
        }
        if algorithm.selects_variants() && self.variants.is_empty() {
            return Err(EngineError::NoVariants {
                feature: self.feature_key.clone(),
                environment: self.environment_key.clone(),
                algorithm: algorithm.id(),
            });
        }
        if *algorithm == AlgorithmType::ContextualLinUcb
            && !(1..=MAX_FEATURE_DIM).contains(&feature_dim_of(&self.settings))
        {
            return Err(EngineError::InvalidFeatureDimension {
                feature: self.feature_key.clone(),
                environment: self.environment_key.clone(),
            });
        }
        Ok(())
    }
}

/// Full mutable record of one running algorithm instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmState {
    pub key: StateKey,
    pub algorithm: AlgorithmType,
    pub is_optimizer: bool,
    pub enabled: bool,
    pub current_value: Decimal,
    pub metric_sum: Decimal,
    pub iteration: u64,
    pub best_value: Option<Decimal>,
    pub best_reward: Option<Decimal>,
    pub settings: Settings,
    pub variants: HashMap<String, VariantStats>,
    pub variants_arr: Vec<String>,
    #[serde(default)]
    pub contextual: HashMap<String, ContextualStats>,
    #[serde(default)]
    pub custom_state: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl AlgorithmState {
    pub fn from_config(config: &AlgorithmConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let mut state = Self {
            key: config.key(),
            algorithm: config.algorithm.clone(),
            is_optimizer: config.is_optimizer,
            enabled: config.enabled,
            current_value: config.initial_value.unwrap_or(Decimal::ZERO),
            metric_sum: Decimal::ZERO,
            iteration: 0,
            best_value: None,
            best_reward: None,
            settings: config.settings.clone(),
            variants: HashMap::new(),
            variants_arr: Vec::new(),
            contextual: HashMap::new(),
            custom_state: None,
            updated_at: Utc::now(),
        };
        state.sync_variants(&config.variants);
        Ok(state)
    }

    /// Applies a changed configuration in place, keeping counters and
    /// running state where the shape still fits.
    pub fn apply_config(&mut self, config: &AlgorithmConfig) -> Result<(), EngineError> {
        config.validate()?;

        if self.algorithm != config.algorithm {
            *self = Self::from_config(config)?;
            return Ok(());
        }

        self.is_optimizer = config.is_optimizer;
        self.enabled = config.enabled;
        self.settings.merge_config(&config.settings);
        self.sync_variants(&config.variants);
        self.touch();
        Ok(())
    }

    pub fn kind(&self) -> AlgorithmKind {
        if self.is_optimizer {
            AlgorithmKind::Optimizer
        } else {
            AlgorithmKind::Bandit
        }
    }

    pub fn feature_dim(&self) -> usize {
        feature_dim_of(&self.settings)
    }

    pub fn lambda(&self) -> f64 {
        self.settings.get_f64(settings::LAMBDA, DEFAULT_LAMBDA)
    }

    pub fn variant_mut(&mut self, variant: &str) -> Option<&mut VariantStats> {
        self.variants.get_mut(variant)
    }

    pub fn has_variant(&self, variant: &str) -> bool {
        self.variants.contains_key(variant)
    }

    /// Counts one evaluation for `variant`; every selection goes through here.
    pub fn record_selection(&mut self, variant: &str) {
        if let Some(stats) = self.variants.get_mut(variant) {
            stats.evaluations += 1;
        }
    }

    /// Remembers the best reward seen and the value that produced it.
    pub fn record_best(&mut self, value: Decimal, reward: Decimal) {
        let improved = self.best_reward.map(|best| reward > best).unwrap_or(true);
        if improved {
            self.best_reward = Some(reward);
            self.best_value = Some(value);
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn sync_variants(&mut self, variants: &[String]) {
        let mut seen = HashSet::new();
        let ordered: Vec<String> = variants
            .iter()
            .filter(|v| seen.insert(v.as_str()))
            .cloned()
            .collect();

        self.variants.retain(|k, _| seen.contains(k.as_str()));
        self.contextual.retain(|k, _| seen.contains(k.as_str()));
        for variant in &ordered {
            self.variants.entry(variant.clone()).or_default();
        }

        if self.algorithm == AlgorithmType::ContextualLinUcb {
            let dim = self.feature_dim();
            let lambda = self.lambda();
            for variant in &ordered {
                let stale = self
                    .contextual
                    .get(variant)
                    .map(|c| c.feature_dim != dim || !c.is_well_formed())
                    .unwrap_or(true);
                if stale {
                    self.contextual
                        .insert(variant.clone(), ContextualStats::new(dim, lambda));
                }
            }
        }

        self.variants_arr = ordered;
    }
}

fn feature_dim_of(settings: &Settings) -> usize {
    settings
        .get(settings::FEATURE_DIM)
        .and_then(|d| d.trunc().to_i64())
        .filter(|d| *d > 0)
        .and_then(|d| usize::try_from(d).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn algorithm_type_round_trips_through_strings() {
        for algorithm in AlgorithmType::builtin() {
            let parsed: AlgorithmType = algorithm.id().parse().unwrap();
            assert_eq!(&parsed, algorithm);
        }
        let custom: AlgorithmType = "custom:softmax".parse().unwrap();
        assert_eq!(custom, AlgorithmType::Custom("softmax".to_string()));
        assert_eq!(custom.id(), "custom:softmax");
    }

    #[test]
    fn algorithm_type_accepts_aliases() {
        assert_eq!("CEM".parse::<AlgorithmType>().unwrap(), AlgorithmType::CrossEntropyMethod);
        assert_eq!("ucb".parse::<AlgorithmType>().unwrap(), AlgorithmType::Ucb1);
        assert!("simplex".parse::<AlgorithmType>().is_err());
        assert!("custom:".parse::<AlgorithmType>().is_err());
    }

    #[test]
    fn bandit_without_variants_is_rejected() {
        let config = AlgorithmConfig::bandit("f", "prod", AlgorithmType::Ucb1, &[]);
        assert!(matches!(
            AlgorithmState::from_config(&config),
            Err(EngineError::NoVariants { .. })
        ));
    }

    #[test]
    fn contextual_without_dimension_is_rejected() {
        let config =
            AlgorithmConfig::bandit("f", "prod", AlgorithmType::ContextualLinUcb, &["a", "b"]);
        assert!(matches!(
            AlgorithmState::from_config(&config),
            Err(EngineError::InvalidFeatureDimension { .. })
        ));
    }

    #[test]
    fn contextual_dimension_is_bounded() {
        let with_dim = |dim: usize| {
            AlgorithmConfig::bandit("f", "prod", AlgorithmType::ContextualLinUcb, &["a"])
                .with_settings(Settings::new().with(settings::FEATURE_DIM, Decimal::from(dim)))
        };
        let state = AlgorithmState::from_config(&with_dim(MAX_FEATURE_DIM)).unwrap();
        assert_eq!(state.contextual["a"].matrix_a.len(), MAX_FEATURE_DIM * MAX_FEATURE_DIM);

        for dim in [MAX_FEATURE_DIM + 1, 100_000] {
            assert!(matches!(
                with_dim(dim).validate(),
                Err(EngineError::InvalidFeatureDimension { .. })
            ));
        }
    }

    #[test]
    fn optimizer_flag_must_match_algorithm() {
        let mut config = AlgorithmConfig::optimizer("f", "prod", AlgorithmType::Pid, dec!(0));
        config.is_optimizer = false;
        assert!(matches!(
            config.validate(),
            Err(EngineError::KindMismatch { is_optimizer: false, .. })
        ));

        let mut bandit = AlgorithmConfig::bandit("f", "prod", AlgorithmType::Ucb1, &["a"]);
        bandit.is_optimizer = true;
        assert!(bandit.validate().is_err());

        let mut cem = AlgorithmConfig::optimizer("f", "prod", AlgorithmType::CrossEntropyMethod, dec!(0));
        cem.is_optimizer = false;
        assert!(cem.validate().is_ok());
    }

    #[test]
    fn duplicate_variants_keep_first_occurrence() {
        let config =
            AlgorithmConfig::bandit("f", "prod", AlgorithmType::EpsilonGreedy, &["b", "a", "b", "c"]);
        let state = AlgorithmState::from_config(&config).unwrap();
        assert_eq!(state.variants_arr, vec!["b", "a", "c"]);
        assert_eq!(state.variants.len(), 3);
    }

    #[test]
    fn contextual_stats_start_at_scaled_identity() {
        let config = AlgorithmConfig::bandit("f", "prod", AlgorithmType::ContextualLinUcb, &["a"])
            .with_settings(
                Settings::new()
                    .with(settings::FEATURE_DIM, dec!(3))
                    .with(settings::LAMBDA, dec!(2)),
            );
        let state = AlgorithmState::from_config(&config).unwrap();
        let stats = &state.contextual["a"];
        assert_eq!(stats.feature_dim, 3);
        assert_eq!(stats.matrix_a, vec![2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0]);
        assert_eq!(stats.vector_b, vec![0.0; 3]);
    }

    #[test]
    fn apply_config_keeps_counters_and_appends_variants() {
        let config = AlgorithmConfig::bandit("f", "prod", AlgorithmType::Ucb1, &["a", "b"]);
        let mut state = AlgorithmState::from_config(&config).unwrap();
        state.variants.get_mut("a").unwrap().evaluations = 10;

        let updated = AlgorithmConfig::bandit("f", "prod", AlgorithmType::Ucb1, &["a", "c"]);
        state.apply_config(&updated).unwrap();

        assert_eq!(state.variants_arr, vec!["a", "c"]);
        assert_eq!(state.variants["a"].evaluations, 10);
        assert!(!state.has_variant("b"));
    }

    #[test]
    fn apply_config_with_new_algorithm_resets_state() {
        let config = AlgorithmConfig::bandit("f", "prod", AlgorithmType::Ucb1, &["a"]);
        let mut state = AlgorithmState::from_config(&config).unwrap();
        state.variants.get_mut("a").unwrap().evaluations = 4;

        let switched = AlgorithmConfig::bandit("f", "prod", AlgorithmType::ThompsonSampling, &["a"]);
        state.apply_config(&switched).unwrap();
        assert_eq!(state.algorithm, AlgorithmType::ThompsonSampling);
        assert_eq!(state.variants["a"].evaluations, 0);
    }

    #[test]
    fn record_best_only_moves_on_improvement() {
        let config = AlgorithmConfig::optimizer("f", "prod", AlgorithmType::HillClimbing, dec!(1));
        let mut state = AlgorithmState::from_config(&config).unwrap();
        state.record_best(dec!(1.0), dec!(0.4));
        state.record_best(dec!(1.1), dec!(0.3));
        assert_eq!(state.best_value, Some(dec!(1.0)));
        state.record_best(dec!(1.2), dec!(0.9));
        assert_eq!(state.best_value, Some(dec!(1.2)));
        assert_eq!(state.best_reward, Some(dec!(0.9)));
    }
}
