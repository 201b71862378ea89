use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::adaptive::optimizer::{advance, paired, record_population_best};
use crate::adaptive::random::RandomSource;
use crate::adaptive::settings;
use crate::adaptive::types::AlgorithmState;

/// Noisy-acquisition pick over caller-supplied candidates:
/// `reward + noise * N(0, 1)`, highest score wins, earliest on ties. With the
/// default zero noise this is a plain argmax of observed reward.
pub fn select(
    state: &mut AlgorithmState,
    samples: &[Decimal],
    rewards: &[Decimal],
    rng: &dyn RandomSource,
) -> Option<Decimal> {
    let population = paired(samples, rewards);
    if population.is_empty() {
        return None;
    }

    let noise = state.settings.get_decimal(settings::NOISE, Decimal::ZERO);
    let mut best: Option<(Decimal, Decimal, Decimal)> = None;
    for &(sample, reward) in &population {
        let acquisition = if noise.is_zero() {
            reward
        } else {
            let z = Decimal::from_f64(rng.normal()).unwrap_or(Decimal::ZERO);
            noise
                .checked_mul(z)
                .and_then(|jitter| reward.checked_add(jitter))
                .unwrap_or(reward)
        };
        if best.map_or(true, |(_, _, score)| acquisition > score) {
            best = Some((sample, reward, acquisition));
        }
    }

    let (chosen, reward, _) = best?;
    record_population_best(state, &population);
    if state.is_optimizer {
        advance(state, chosen, reward);
    } else {
        state.touch();
    }
    Some(chosen)
}
