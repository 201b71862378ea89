use rust_decimal::Decimal;

use crate::adaptive::optimizer::overflowed;
use crate::adaptive::settings;
use crate::adaptive::types::AlgorithmState;

/// One PID update toward `target`. Gains default to zero, so an unconfigured
/// controller holds its value. If any term overflows, the controller keeps
/// its previous value and running state.
pub fn step(state: &mut AlgorithmState, measured: Decimal, target: Decimal) -> Decimal {
    let s = &state.settings;
    let kp = s.get_decimal(settings::KP, Decimal::ZERO);
    let ki = s.get_decimal(settings::KI, Decimal::ZERO);
    let kd = s.get_decimal(settings::KD, Decimal::ZERO);
    let prev_error = s.get_decimal(settings::PREV_ERROR, Decimal::ZERO);
    let integral = s.get_decimal(settings::INTEGRAL, Decimal::ZERO);

    let Some((next, integral, error)) = control(
        state.current_value,
        measured,
        target,
        (kp, ki, kd),
        integral,
        prev_error,
    ) else {
        overflowed(state, "pid");
        return state.current_value;
    };

    state.current_value = next;
    state.settings.set(settings::INTEGRAL, integral);
    state.settings.set(settings::PREV_ERROR, error);
    state.metric_sum = measured;
    state.iteration += 1;
    state.touch();
    state.current_value
}

/// Returns `(next value, integral, error)`, or `None` on overflow.
fn control(
    current: Decimal,
    measured: Decimal,
    target: Decimal,
    (kp, ki, kd): (Decimal, Decimal, Decimal),
    integral: Decimal,
    prev_error: Decimal,
) -> Option<(Decimal, Decimal, Decimal)> {
    let error = target.checked_sub(measured)?;
    let integral = integral.checked_add(error)?;
    let derivative = error.checked_sub(prev_error)?;
    let output = kp
        .checked_mul(error)?
        .checked_add(ki.checked_mul(integral)?)?
        .checked_add(kd.checked_mul(derivative)?)?;
    Some((current.checked_add(output)?, integral, error))
}
