//! Discrete-variant selectors.
//!
//! Every `select` counts one evaluation on the variant it returns; outcomes
//! arrive later through [`record_outcome`] or the contextual reward path.

pub mod custom;
pub mod epsilon_greedy;
pub mod linucb;
pub mod thompson;
pub mod ucb1;

pub use custom::CustomAlgorithm;

use crate::adaptive::types::AlgorithmState;

/// First variant (in `order`) with the highest score. NaN scores never win.
pub(crate) fn argmax_in_order<F>(order: &[String], mut score: F) -> Option<&String>
where
    F: FnMut(&str) -> f64,
{
    let mut best: Option<(&String, f64)> = None;
    for variant in order {
        let value = score(variant);
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((variant, value)),
        }
    }
    best.map(|(variant, _)| variant).or_else(|| order.first())
}

/// Applies a success/failure report. Unknown variants are ignored.
pub fn record_outcome(state: &mut AlgorithmState, variant: &str, success: bool) -> bool {
    let Some(stats) = state.variant_mut(variant) else {
        return false;
    };
    stats.record_outcome(success);
    state.touch();
    true
}
