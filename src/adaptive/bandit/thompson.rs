use crate::adaptive::bandit::argmax_in_order;
use crate::adaptive::random::RandomSource;
use crate::adaptive::settings;
use crate::adaptive::types::AlgorithmState;

pub const DEFAULT_PRIOR_ALPHA: f64 = 1.0;
pub const DEFAULT_PRIOR_BETA: f64 = 1.0;

/// Draws `Beta(prior_alpha + successes, prior_beta + failures)` per variant and
/// keeps the largest draw. The uniform prior covers cold start.
pub fn select(state: &mut AlgorithmState, rng: &dyn RandomSource) -> Option<String> {
    if state.variants_arr.is_empty() {
        return None;
    }

    let prior_alpha = state
        .settings
        .get_f64(settings::PRIOR_ALPHA, DEFAULT_PRIOR_ALPHA);
    let prior_beta = state.settings.get_f64(settings::PRIOR_BETA, DEFAULT_PRIOR_BETA);

    let variants = &state.variants;
    let chosen = argmax_in_order(&state.variants_arr, |v| {
        let (successes, failures) = variants
            .get(v)
            .map_or((0, 0), |s| (s.successes, s.failures));
        rng.beta(prior_alpha + successes as f64, prior_beta + failures as f64)
    })?
    .clone();

    state.record_selection(&chosen);
    state.touch();
    Some(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::random::SeededRandom;
    use crate::adaptive::types::{AlgorithmConfig, AlgorithmType};

    fn fresh(variants: &[&str]) -> AlgorithmState {
        let config =
            AlgorithmConfig::bandit("onboarding", "prod", AlgorithmType::ThompsonSampling, variants);
        AlgorithmState::from_config(&config).unwrap()
    }

    #[test]
    fn strong_variant_wins_most_draws() {
        let mut state = fresh(&["weak", "strong"]);
        {
            let weak = state.variant_mut("weak").unwrap();
            weak.successes = 10;
            weak.failures = 90;
        }
        {
            let strong = state.variant_mut("strong").unwrap();
            strong.successes = 90;
            strong.failures = 10;
        }
        let rng = SeededRandom::new(42);

        let wins = (0..100)
            .filter(|_| select(&mut state, &rng).as_deref() == Some("strong"))
            .count();
        assert!(wins > 80, "strong variant won only {wins} of 100");
    }

    #[test]
    fn cold_start_spreads_selections() {
        let mut state = fresh(&["a", "b", "c"]);
        let rng = SeededRandom::new(8);
        for _ in 0..300 {
            select(&mut state, &rng);
        }
        for variant in ["a", "b", "c"] {
            assert!(state.variants[variant].evaluations > 50);
        }
    }

    #[test]
    fn selection_counts_evaluations() {
        let mut state = fresh(&["a"]);
        let rng = SeededRandom::new(3);
        assert_eq!(select(&mut state, &rng).as_deref(), Some("a"));
        assert_eq!(state.variants["a"].evaluations, 1);
    }
}
