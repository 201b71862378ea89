//! Property-based tests for the decision algorithms
//!
//! Tests the following invariants:
//! - Membership: every served variant is one of the configured variants
//! - Counting: each selection adds exactly one evaluation
//! - Restore: stored rows overlaid on a fresh state reproduce the counters
//! - Hill climbing moves by exactly one step per report
//! - Cross-entropy centers stay inside the sampled range

use proptest::prelude::*;
use rust_decimal::Decimal;

use adaptive_engine::adaptive::persistence::{apply_stored, batch_from_states};
use adaptive_engine::adaptive::settings;
use adaptive_engine::adaptive::{
    AlgorithmConfig, AlgorithmState, AlgorithmType, DecisionManager, Settings,
};
use adaptive_engine::db::StoredStats;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_variants() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z]{1,6}", 1..6).prop_map(|set| set.into_iter().collect())
}

fn arb_bandit() -> impl Strategy<Value = AlgorithmType> {
    prop_oneof![
        Just(AlgorithmType::EpsilonGreedy),
        Just(AlgorithmType::Ucb1),
        Just(AlgorithmType::ThompsonSampling),
        Just(AlgorithmType::ContextualLinUcb),
    ]
}

fn arb_decimal() -> impl Strategy<Value = Decimal> {
    (-10_000i64..10_000i64).prop_map(|n| Decimal::new(n, 2))
}

fn arb_counts() -> impl Strategy<Value = (u64, u64, u64)> {
    (0u64..1000, 0u64..1000, 0u64..1000)
}

fn bandit_config(algorithm: AlgorithmType, variants: &[String]) -> AlgorithmConfig {
    let names: Vec<&str> = variants.iter().map(String::as_str).collect();
    AlgorithmConfig::bandit("feature", "prod", algorithm, &names)
        .with_settings(Settings::new().with(settings::FEATURE_DIM, Decimal::from(3)))
}

// ============================================================================
// Selection
// ============================================================================

proptest! {
    #[test]
    fn served_variants_are_configured(
        algorithm in arb_bandit(),
        variants in arb_variants(),
        seed in any::<u64>(),
        rounds in 1usize..40,
        successes in prop::collection::vec(any::<bool>(), 40),
    ) {
        let manager = DecisionManager::seeded(seed);
        manager.upsert_config(&bandit_config(algorithm, &variants)).unwrap();

        for success in successes.iter().take(rounds) {
            let served = manager.evaluate_feature("feature", "prod").unwrap();
            prop_assert!(variants.contains(&served));
            manager.report_outcome("feature", "prod", &served, *success);
        }

        let state = manager.snapshot("feature", "prod").unwrap();
        let evaluations: u64 = state.variants.values().map(|s| s.evaluations).sum();
        prop_assert_eq!(evaluations, rounds as u64);
        prop_assert_eq!(&state.variants_arr, &variants);
    }
}

// ============================================================================
// Restore
// ============================================================================

proptest! {
    #[test]
    fn stored_counters_restore_exactly(
        algorithm in arb_bandit(),
        variants in arb_variants(),
        counts in prop::collection::vec(arb_counts(), 6),
        reward in arb_decimal(),
    ) {
        let config = bandit_config(algorithm, &variants);
        let mut state = AlgorithmState::from_config(&config).unwrap();
        for (variant, (evaluations, successes, failures)) in variants.iter().zip(&counts) {
            let stats = state.variant_mut(variant).unwrap();
            stats.evaluations = *evaluations;
            stats.successes = *successes;
            stats.failures = *failures;
            stats.metric_sum = reward;
        }

        let batch = batch_from_states(std::slice::from_ref(&state));
        let mut restored = AlgorithmState::from_config(&config).unwrap();
        apply_stored(
            &mut restored,
            StoredStats {
                bandit: batch.bandit,
                contextual: batch.contextual,
                ..StoredStats::default()
            },
        );

        prop_assert_eq!(restored.variants, state.variants);
        prop_assert_eq!(restored.contextual, state.contextual);
    }

    #[test]
    fn optimizer_row_restores_running_state(
        value in arb_decimal(),
        reward in arb_decimal(),
        iteration in 0u64..100_000,
    ) {
        let config = AlgorithmConfig::optimizer("ttl", "prod", AlgorithmType::HillClimbing, Decimal::ZERO);
        let mut state = AlgorithmState::from_config(&config).unwrap();
        state.current_value = value;
        state.metric_sum = reward;
        state.iteration = iteration;
        state.settings.set(settings::DIRECTION, Decimal::NEGATIVE_ONE);
        state.record_best(value, reward);

        let batch = batch_from_states(std::slice::from_ref(&state));
        let mut restored = AlgorithmState::from_config(&config).unwrap();
        apply_stored(
            &mut restored,
            StoredStats {
                optimizer: batch.optimizer.into_iter().next(),
                ..StoredStats::default()
            },
        );

        prop_assert_eq!(restored.current_value, value);
        prop_assert_eq!(restored.metric_sum, reward);
        prop_assert_eq!(restored.iteration, iteration);
        prop_assert_eq!(restored.best_value, Some(value));
        prop_assert_eq!(restored.settings.get(settings::DIRECTION), Some(Decimal::NEGATIVE_ONE));
    }
}

// ============================================================================
// Tuners
// ============================================================================

proptest! {
    #[test]
    fn hill_climbing_moves_one_step(
        start in arb_decimal(),
        rewards in prop::collection::vec(arb_decimal(), 1..30),
    ) {
        let step = Decimal::new(25, 2);
        let config = AlgorithmConfig::optimizer("ttl", "prod", AlgorithmType::HillClimbing, start)
            .with_settings(Settings::new().with(settings::STEP, step));
        let manager = DecisionManager::seeded(0);
        manager.upsert_config(&config).unwrap();

        let mut previous = start;
        for reward in rewards {
            let next = manager.report_reward("ttl", "prod", reward).unwrap();
            prop_assert_eq!((next - previous).abs(), step);
            previous = next;
        }
    }

    #[test]
    fn cross_entropy_center_stays_in_range(
        population in prop::collection::vec((arb_decimal(), arb_decimal()), 1..40),
    ) {
        let config = AlgorithmConfig::optimizer("workers", "prod", AlgorithmType::CrossEntropyMethod, Decimal::ZERO);
        let manager = DecisionManager::seeded(0);
        manager.upsert_config(&config).unwrap();

        let (samples, rewards): (Vec<Decimal>, Vec<Decimal>) = population.into_iter().unzip();
        let center = manager.report_samples("workers", "prod", &samples, &rewards).unwrap();

        let low = samples.iter().copied().min().unwrap();
        let high = samples.iter().copied().max().unwrap();
        prop_assert!(center >= low && center <= high);
        prop_assert_eq!(manager.evaluate_optimizer("workers", "prod"), Some(center));
    }
}
