use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::adaptive::optimizer::overflowed;
use crate::adaptive::random::RandomSource;
use crate::adaptive::settings;
use crate::adaptive::types::AlgorithmState;

pub const DEFAULT_TEMP: Decimal = dec!(1.0);
pub const DEFAULT_COOLING: Decimal = dec!(0.95);
pub const DEFAULT_STEP_SCALE: Decimal = dec!(0.1);

/// Metropolis acceptance against the last accepted reward, followed by one
/// cooling step. Returns whether `reward` was accepted.
pub fn step(state: &mut AlgorithmState, reward: Decimal, rng: &dyn RandomSource) -> bool {
    let temp = state.settings.get_decimal(settings::TEMP, DEFAULT_TEMP);
    let cooling = state.settings.get_decimal(settings::COOLING, DEFAULT_COOLING);

    let accepted = if reward >= state.metric_sum {
        true
    } else {
        // A drop too large to represent is never accepted.
        match reward
            .checked_sub(state.metric_sum)
            .and_then(|delta| delta.checked_div(temp))
        {
            Some(scaled) if temp > Decimal::ZERO => {
                let probability = scaled.to_f64().map(f64::exp).unwrap_or(0.0);
                rng.uniform() < probability
            }
            _ => false,
        }
    };

    if accepted {
        state.metric_sum = reward;
    }
    state
        .settings
        .set(settings::TEMP, temp.checked_mul(cooling).unwrap_or(temp));
    state.iteration += 1;
    state.touch();
    accepted
}

/// Like [`step`], but moves `current_value` to `candidate` on acceptance.
pub fn step_with_candidate(
    state: &mut AlgorithmState,
    candidate: Decimal,
    reward: Decimal,
    rng: &dyn RandomSource,
) -> bool {
    let accepted = step(state, reward, rng);
    if accepted {
        state.current_value = candidate;
    }
    accepted
}

/// Neighbor of the current value: `current + step_scale * N(0, 1)`. Falls
/// back to the current value when the move would overflow.
pub fn propose(state: &AlgorithmState, rng: &dyn RandomSource) -> Decimal {
    let scale = state
        .settings
        .get_decimal(settings::STEP_SCALE, DEFAULT_STEP_SCALE);
    let z = Decimal::from_f64(rng.normal()).unwrap_or(Decimal::ZERO);
    scale
        .checked_mul(z)
        .and_then(|delta| state.current_value.checked_add(delta))
        .unwrap_or_else(|| {
            overflowed(state, "annealing_propose");
            state.current_value
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::random::{ScriptedRandom, SeededRandom};
    use crate::adaptive::settings::Settings;
    use crate::adaptive::types::{AlgorithmConfig, AlgorithmType};

    fn annealer(temp: Decimal, cooling: Decimal, metric: Decimal) -> AlgorithmState {
        let config = AlgorithmConfig::optimizer(
            "batch_size",
            "prod",
            AlgorithmType::SimulatedAnnealing,
            dec!(32),
        )
        .with_settings(
            Settings::new()
                .with(settings::TEMP, temp)
                .with(settings::COOLING, cooling),
        );
        let mut state = AlgorithmState::from_config(&config).unwrap();
        state.metric_sum = metric;
        state
    }

    #[test]
    fn cooling_is_exact() {
        let mut state = annealer(dec!(1.0), dec!(0.9), dec!(0.5));
        step(&mut state, dec!(0.7), &SeededRandom::new(1));
        assert_eq!(state.settings.get(settings::TEMP), Some(dec!(0.9)));
        step(&mut state, dec!(0.1), &SeededRandom::new(1));
        assert_eq!(state.settings.get(settings::TEMP), Some(dec!(0.81)));
    }

    #[test]
    fn better_reward_always_accepted() {
        let mut state = annealer(dec!(0.0001), dec!(0.95), dec!(0.5));
        assert!(step(&mut state, dec!(0.6), &ScriptedRandom::new(vec![0.999])));
        assert_eq!(state.metric_sum, dec!(0.6));
        assert_eq!(state.iteration, 1);
    }

    #[test]
    fn hot_schedule_accepts_worse_reward() {
        let rng = SeededRandom::new(99);
        let accepted = (0..100)
            .filter(|_| {
                let mut state = annealer(dec!(10.0), dec!(0.95), dec!(1.0));
                step(&mut state, dec!(0.5), &rng)
            })
            .count();
        assert!(accepted >= 1);
    }

    #[test]
    fn rejection_keeps_baseline_but_still_cools() {
        let mut state = annealer(dec!(1.0), dec!(0.5), dec!(1.0));
        // exp(-0.5) ~ 0.61, so a draw of 0.99 rejects.
        assert!(!step(&mut state, dec!(0.5), &ScriptedRandom::new(vec![0.99])));
        assert_eq!(state.metric_sum, dec!(1.0));
        assert_eq!(state.settings.get(settings::TEMP), Some(dec!(0.5)));
    }

    #[test]
    fn frozen_schedule_rejects_worse_reward() {
        let mut state = annealer(dec!(0), dec!(0.9), dec!(1.0));
        assert!(!step(&mut state, dec!(0.9), &ScriptedRandom::new(vec![0.0])));
    }

    #[test]
    fn candidate_moves_only_on_acceptance() {
        let mut state = annealer(dec!(1.0), dec!(0.9), dec!(1.0));
        assert!(!step_with_candidate(&mut state, dec!(40), dec!(0.0), &ScriptedRandom::new(vec![0.99])));
        assert_eq!(state.current_value, dec!(32));
        assert!(step_with_candidate(&mut state, dec!(36), dec!(2.0), &ScriptedRandom::new(vec![0.5])));
        assert_eq!(state.current_value, dec!(36));
    }

    #[test]
    fn proposal_is_centered_on_current_value() {
        let state = annealer(dec!(1.0), dec!(0.9), dec!(0.0));
        let rng = SeededRandom::new(4);
        let n = 500;
        let mean: f64 = (0..n)
            .map(|_| propose(&state, &rng).to_f64().unwrap())
            .sum::<f64>()
            / n as f64;
        assert!((mean - 32.0).abs() < 0.05, "mean was {mean}");
    }

    #[test]
    fn unrepresentable_drop_is_rejected() {
        let mut state = annealer(dec!(1.0), dec!(0.9), Decimal::MAX);
        assert!(!step(&mut state, Decimal::MIN, &ScriptedRandom::new(vec![0.0])));
        assert_eq!(state.metric_sum, Decimal::MAX);
        assert_eq!(state.iteration, 1);
    }

    #[test]
    fn proposal_at_the_edge_stays_put() {
        let config = AlgorithmConfig::optimizer(
            "batch_size",
            "prod",
            AlgorithmType::SimulatedAnnealing,
            Decimal::MAX,
        )
        .with_settings(Settings::new().with(settings::STEP_SCALE, dec!(1)));
        let state = AlgorithmState::from_config(&config).unwrap();
        // u1 = 0.1, u2 = 0 gives z ~ 2.15.
        assert_eq!(propose(&state, &ScriptedRandom::new(vec![0.1, 0.0])), Decimal::MAX);
    }
}
