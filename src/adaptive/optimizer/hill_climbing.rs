use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::adaptive::optimizer::overflowed;
use crate::adaptive::settings;
use crate::adaptive::types::AlgorithmState;

pub const DEFAULT_STEP: Decimal = dec!(0.05);

/// Keeps moving while the reward improves on the last one, reverses otherwise.
/// Returns the new value, or the unchanged one if the move would overflow.
pub fn step(state: &mut AlgorithmState, reward: Decimal) -> Decimal {
    let step = state.settings.get_decimal(settings::STEP, DEFAULT_STEP);
    let mut direction = if state.settings.get_decimal(settings::DIRECTION, Decimal::ONE)
        < Decimal::ZERO
    {
        Decimal::NEGATIVE_ONE
    } else {
        Decimal::ONE
    };

    if reward <= state.metric_sum {
        direction = -direction;
    }

    let Some(next) = step
        .checked_mul(direction)
        .and_then(|delta| state.current_value.checked_add(delta))
    else {
        overflowed(state, "hill_climbing");
        return state.current_value;
    };

    state.current_value = next;
    state.settings.set(settings::DIRECTION, direction);
    state.metric_sum = reward;
    state.iteration += 1;
    state.touch();
    state.current_value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::settings::Settings;
    use crate::adaptive::types::{AlgorithmConfig, AlgorithmType};

    fn climber(value: Decimal, metric: Decimal, step: Decimal) -> AlgorithmState {
        let config = AlgorithmConfig::optimizer("timeout_ms", "prod", AlgorithmType::HillClimbing, value)
            .with_settings(
                Settings::new()
                    .with(settings::STEP, step)
                    .with(settings::DIRECTION, Decimal::ONE),
            );
        let mut state = AlgorithmState::from_config(&config).unwrap();
        state.metric_sum = metric;
        state
    }

    #[test]
    fn improvement_keeps_direction() {
        let mut state = climber(dec!(1.0), dec!(0.5), dec!(0.1));
        let value = step(&mut state, dec!(0.8));
        assert_eq!(value, dec!(1.1));
        assert!(state.current_value > dec!(1.0));
        assert_eq!(state.iteration, 1);
        assert_eq!(state.metric_sum, dec!(0.8));
        assert_eq!(state.settings.get(settings::DIRECTION), Some(dec!(1)));
    }

    #[test]
    fn regression_flips_direction() {
        let mut state = climber(dec!(1.0), dec!(0.5), dec!(0.1));
        step(&mut state, dec!(0.8));
        let value = step(&mut state, dec!(0.6));
        assert_eq!(state.settings.get(settings::DIRECTION), Some(dec!(-1)));
        assert_eq!(value, dec!(1.0));
        assert_eq!(state.iteration, 2);
    }

    #[test]
    fn equal_reward_counts_as_no_improvement() {
        let mut state = climber(dec!(2), dec!(0.5), dec!(0.25));
        let value = step(&mut state, dec!(0.5));
        assert_eq!(value, dec!(1.75));
    }

    #[test]
    fn defaults_apply_without_settings() {
        let config = AlgorithmConfig::optimizer("timeout_ms", "prod", AlgorithmType::HillClimbing, dec!(1));
        let mut state = AlgorithmState::from_config(&config).unwrap();
        assert_eq!(step(&mut state, dec!(0.1)), dec!(1.05));
    }

    #[test]
    fn move_past_decimal_range_is_refused() {
        let mut state = climber(Decimal::MAX, dec!(0.5), dec!(1));
        assert_eq!(step(&mut state, dec!(0.9)), Decimal::MAX);
        assert_eq!(state.iteration, 0);
        assert_eq!(state.metric_sum, dec!(0.5));
    }
}
