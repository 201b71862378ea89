//! Adaptive decision engine: online bandits and single-value tuners keyed by
//! (feature, environment).

pub mod bandit;
pub mod error;
pub mod manager;
pub mod matrix;
pub mod metrics;
pub mod optimizer;
pub mod persistence;
pub mod random;
pub mod settings;
pub mod types;

pub use error::EngineError;
pub use manager::DecisionManager;
pub use persistence::{BridgeError, PersistenceBridge, ReloadSummary};
pub use random::{RandomSource, SeededRandom, ThreadRandom};
pub use settings::Settings;
pub use types::{
    AlgorithmConfig, AlgorithmKind, AlgorithmState, AlgorithmType, ContextualStats, StateKey,
    VariantStats, MAX_FEATURE_DIM,
};
