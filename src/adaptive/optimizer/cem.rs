use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::adaptive::optimizer::{advance, overflowed, paired, record_population_best};
use crate::adaptive::settings;
use crate::adaptive::types::AlgorithmState;

pub const DEFAULT_POPULATION_SIZE: Decimal = dec!(20);
pub const DEFAULT_ELITE_FRACTION: Decimal = dec!(0.2);

/// Number of elites for a population of `available` samples. The configured
/// population size caps how many samples count, and at least one elite is
/// always kept.
pub fn elite_count(state: &AlgorithmState, available: usize) -> usize {
    if available == 0 {
        return 0;
    }
    let population = state
        .settings
        .get_decimal(settings::POPULATION_SIZE, DEFAULT_POPULATION_SIZE)
        .trunc()
        .to_usize()
        .unwrap_or(available)
        .clamp(1, available);
    let fraction = state
        .settings
        .get_decimal(settings::ELITE_FRACTION, DEFAULT_ELITE_FRACTION);

    (Decimal::from(population) * fraction)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_usize()
        .unwrap_or(1)
        .clamp(1, available)
}

/// Mean of the top-reward samples, the next search center. `None` when the
/// population is empty or the elite sum overflows.
pub fn step(state: &mut AlgorithmState, samples: &[Decimal], rewards: &[Decimal]) -> Option<Decimal> {
    let mut population = paired(samples, rewards);
    if population.is_empty() {
        return None;
    }

    let elites = elite_count(state, population.len());
    // Stable sort keeps input order among equal rewards.
    population.sort_by(|a, b| b.1.cmp(&a.1));
    let elite = &population[..elites];

    let Some(center) = elite
        .iter()
        .try_fold(Decimal::ZERO, |acc, (sample, _)| acc.checked_add(*sample))
        .and_then(|sum| sum.checked_div(Decimal::from(elites)))
    else {
        overflowed(state, "cross_entropy");
        return None;
    };
    let top_reward = elite[0].1;

    record_population_best(state, &population);
    if state.is_optimizer {
        advance(state, center, top_reward);
    } else {
        state.touch();
    }
    Some(center)
}
