use crate::adaptive::bandit::argmax_in_order;
use crate::adaptive::settings;
use crate::adaptive::types::AlgorithmState;

pub const DEFAULT_CONFIDENCE: f64 = std::f64::consts::SQRT_2;

/// UCB1: every variant is tried once in order, then
/// `mean + c * sqrt(ln N / n)` decides.
pub fn select(state: &mut AlgorithmState) -> Option<String> {
    if state.variants_arr.is_empty() {
        return None;
    }

    let unexplored = state
        .variants_arr
        .iter()
        .find(|v| state.variants.get(*v).map_or(true, |s| s.evaluations == 0))
        .cloned();

    let chosen = match unexplored {
        Some(variant) => variant,
        None => {
            let c = state.settings.get_f64(settings::CONFIDENCE, DEFAULT_CONFIDENCE);
            let total: u64 = state.variants.values().map(|s| s.evaluations).sum();
            let ln_total = (total.max(1) as f64).ln();
            let variants = &state.variants;
            argmax_in_order(&state.variants_arr, |v| {
                variants.get(v).map_or(f64::NEG_INFINITY, |s| {
                    let n = s.evaluations as f64;
                    s.success_rate() + c * (ln_total / n).sqrt()
                })
            })?
            .clone()
        }
    };

    state.record_selection(&chosen);
    state.touch();
    Some(chosen)
}
