//! Single-value tuners. Each step mutates `current_value` / `metric_sum` /
//! `iteration` and keeps any private running state in `settings`.

pub mod annealing;
pub mod bayes_opt;
pub mod cem;
pub mod hill_climbing;
pub mod pid;

use rust_decimal::Decimal;

use crate::adaptive::metrics;
use crate::adaptive::types::AlgorithmState;

/// Pairs `samples` with `rewards`, dropping the unmatched tail.
pub(crate) fn paired(samples: &[Decimal], rewards: &[Decimal]) -> Vec<(Decimal, Decimal)> {
    samples
        .iter()
        .copied()
        .zip(rewards.iter().copied())
        .collect()
}

/// Records the best observed (sample, reward) pair of a population.
pub(crate) fn record_population_best(state: &mut AlgorithmState, population: &[(Decimal, Decimal)]) {
    let mut best: Option<(Decimal, Decimal)> = None;
    for &(sample, reward) in population {
        if best.map_or(true, |(_, r)| reward > r) {
            best = Some((sample, reward));
        }
    }
    if let Some((sample, reward)) = best {
        state.record_best(sample, reward);
    }
}

/// Moves a tuner to `value` and counts one step.
pub(crate) fn advance(state: &mut AlgorithmState, value: Decimal, objective: Decimal) {
    state.current_value = value;
    state.metric_sum = objective;
    state.iteration += 1;
    state.touch();
}

/// Logs a Decimal overflow inside a step and counts it against the
/// algorithm. The caller leaves the state untouched.
pub(crate) fn overflowed(state: &AlgorithmState, operation: &'static str) {
    metrics::registry().record_error(state.algorithm.metric_id());
    tracing::warn!(
        feature = %state.key.feature,
        environment = %state.key.environment,
        algorithm = %state.algorithm,
        operation,
        "decimal overflow; keeping previous value"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn paired_drops_unmatched_tail() {
        let pairs = paired(&[dec!(1), dec!(2), dec!(3)], &[dec!(0.1), dec!(0.2)]);
        assert_eq!(pairs, vec![(dec!(1), dec!(0.1)), (dec!(2), dec!(0.2))]);
    }
}
