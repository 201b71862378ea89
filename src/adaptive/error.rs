use thiserror::Error;

/// Configuration problems detected when a state is created or reconfigured.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("bandit algorithm {algorithm} for {feature}/{environment} has no variants")]
    NoVariants {
        feature: String,
        environment: String,
        algorithm: String,
    },
    #[error(
        "contextual algorithm for {feature}/{environment} needs feature_dim in 1..={max}",
        max = crate::adaptive::types::MAX_FEATURE_DIM
    )]
    InvalidFeatureDimension { feature: String, environment: String },
    #[error("algorithm {algorithm} cannot run with is_optimizer={is_optimizer}")]
    KindMismatch { algorithm: String, is_optimizer: bool },
    #[error("custom algorithm {0} is not registered")]
    UnknownCustomAlgorithm(String),
    #[error("unknown algorithm type: {0}")]
    UnknownAlgorithm(String),
}
