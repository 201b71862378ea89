use rust_decimal::Decimal;

use crate::adaptive::random::RandomSource;
use crate::adaptive::types::{AlgorithmState, VariantStats};

/// Pluggable variant selector registered on the manager by name.
///
/// Implementations keep whatever private state they need in the opaque JSON
/// value; the manager persists it alongside the shared counters.
pub trait CustomAlgorithm: Send + Sync {
    fn name(&self) -> &str;

    /// Picks one of `variants` (in configured order). Returning a key outside
    /// `variants` is treated as no decision.
    fn select(
        &self,
        private_state: &mut serde_json::Value,
        variants: &[(String, VariantStats)],
        rng: &dyn RandomSource,
    ) -> Option<String>;

    /// Observes the reward for a served variant.
    fn observe(&self, private_state: &mut serde_json::Value, variant: &str, reward: Decimal);
}

pub fn select(
    algorithm: &dyn CustomAlgorithm,
    state: &mut AlgorithmState,
    rng: &dyn RandomSource,
) -> Option<String> {
    if state.variants_arr.is_empty() {
        return None;
    }

    let snapshot: Vec<(String, VariantStats)> = state
        .variants_arr
        .iter()
        .map(|v| (v.clone(), state.variants.get(v).cloned().unwrap_or_default()))
        .collect();
    let private_state = state.custom_state.get_or_insert(serde_json::Value::Null);

    let chosen = algorithm
        .select(private_state, &snapshot, rng)
        .filter(|v| state.variants.contains_key(v))?;

    state.record_selection(&chosen);
    state.touch();
    Some(chosen)
}

pub fn observe(
    algorithm: &dyn CustomAlgorithm,
    state: &mut AlgorithmState,
    variant: &str,
    reward: Decimal,
) {
    let private_state = state.custom_state.get_or_insert(serde_json::Value::Null);
    algorithm.observe(private_state, variant, reward);
    state.touch();
}
