use crate::adaptive::bandit::argmax_in_order;
use crate::adaptive::random::RandomSource;
use crate::adaptive::settings;
use crate::adaptive::types::AlgorithmState;

pub const DEFAULT_EPSILON: f64 = 0.1;

/// Explores uniformly with probability `epsilon`, otherwise exploits the best
/// observed success rate. A state with no evaluations at all always explores.
pub fn select(state: &mut AlgorithmState, rng: &dyn RandomSource) -> Option<String> {
    if state.variants_arr.is_empty() {
        return None;
    }

    let epsilon = state.settings.get_f64(settings::EPSILON, DEFAULT_EPSILON);
    let u = rng.uniform();
    let cold_start = state
        .variants_arr
        .iter()
        .all(|v| state.variants.get(v).map_or(true, |s| s.evaluations == 0));

    let chosen = if cold_start || u < epsilon {
        state.variants_arr[rng.index(state.variants_arr.len())].clone()
    } else {
        let variants = &state.variants;
        argmax_in_order(&state.variants_arr, |v| {
            variants.get(v).map_or(0.0, |s| s.success_rate())
        })?
        .clone()
    };

    state.record_selection(&chosen);
    state.touch();
    Some(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::random::{ScriptedRandom, SeededRandom};
    use crate::adaptive::settings::Settings;
    use crate::adaptive::types::{AlgorithmConfig, AlgorithmType};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    fn state_with_epsilon(epsilon: Decimal, variants: &[&str]) -> AlgorithmState {
        let config = AlgorithmConfig::bandit("checkout", "prod", AlgorithmType::EpsilonGreedy, variants)
            .with_settings(Settings::new().with(settings::EPSILON, epsilon));
        AlgorithmState::from_config(&config).unwrap()
    }

    fn seed_stats(state: &mut AlgorithmState, variant: &str, evaluations: u64, successes: u64) {
        let stats = state.variant_mut(variant).unwrap();
        stats.evaluations = evaluations;
        stats.successes = successes;
        stats.failures = evaluations - successes;
    }

    #[test]
    fn zero_epsilon_exploits_best_rate() {
        let mut state = state_with_epsilon(dec!(0), &["a", "b", "c"]);
        seed_stats(&mut state, "a", 100, 20);
        seed_stats(&mut state, "b", 100, 70);
        seed_stats(&mut state, "c", 100, 40);
        let rng = SeededRandom::new(5);

        for _ in 0..10 {
            assert_eq!(select(&mut state, &rng).as_deref(), Some("b"));
        }
        assert_eq!(state.variants["b"].evaluations, 110);
    }

    #[test]
    fn full_epsilon_visits_every_variant() {
        let mut state = state_with_epsilon(dec!(1), &["a", "b", "c", "d"]);
        seed_stats(&mut state, "a", 50, 50);
        let rng = SeededRandom::new(17);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(select(&mut state, &rng).unwrap());
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn cold_start_explores_even_without_epsilon() {
        let mut state = state_with_epsilon(dec!(0), &["a", "b"]);
        // u = 0.9 would exploit; index draw 0.75 picks the second variant.
        let rng = ScriptedRandom::new(vec![0.9, 0.75]);
        assert_eq!(select(&mut state, &rng).as_deref(), Some("b"));
        assert_eq!(state.variants["b"].evaluations, 1);
    }

    #[test]
    fn ties_resolve_to_first_variant() {
        let mut state = state_with_epsilon(dec!(0), &["x", "y"]);
        seed_stats(&mut state, "x", 10, 5);
        seed_stats(&mut state, "y", 10, 5);
        let rng = SeededRandom::new(1);
        assert_eq!(select(&mut state, &rng).as_deref(), Some("x"));
    }

    #[test]
    fn selection_never_touches_outcomes() {
        let mut state = state_with_epsilon(dec!(0.5), &["a", "b"]);
        let rng = SeededRandom::new(2);
        for _ in 0..20 {
            select(&mut state, &rng);
        }
        let total: u64 = state.variants.values().map(|s| s.evaluations).sum();
        assert_eq!(total, 20);
        assert!(state.variants.values().all(|s| s.successes == 0 && s.failures == 0));
    }
}
