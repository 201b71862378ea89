use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::adaptive::bandit::argmax_in_order;
use crate::adaptive::matrix;
use crate::adaptive::metrics;
use crate::adaptive::settings;
use crate::adaptive::types::{AlgorithmState, ContextualStats};

pub const DEFAULT_ALPHA: f64 = 1.0;

/// Truncates or zero-pads `context` to `dim`.
pub fn fit_context(context: &[f64], dim: usize) -> Vec<f64> {
    let mut x = vec![0.0; dim];
    for (slot, value) in x.iter_mut().zip(context.iter()) {
        *slot = if value.is_finite() { *value } else { 0.0 };
    }
    x
}

/// `x^T theta + alpha * sqrt(x^T A^-1 x)` with `theta = A^-1 b`.
pub fn score(stats: &ContextualStats, x: &[f64], alpha: f64) -> f64 {
    let d = stats.feature_dim;
    let l = matrix::cholesky_decompose(&stats.matrix_a, d);
    let theta = matrix::solve_cholesky(&l, &stats.vector_b, d);
    let exploitation = matrix::dot_product(&theta, x);
    let exploration = matrix::quadratic_form(&l, x, d).max(0.0).sqrt();
    exploitation + alpha * exploration
}

/// Disjoint LinUCB selection for one context vector.
pub fn select(state: &mut AlgorithmState, context: &[f64]) -> Option<String> {
    if state.variants_arr.is_empty() {
        return None;
    }

    let dim = state.feature_dim();
    let alpha = state.settings.get_f64(settings::ALPHA, DEFAULT_ALPHA);
    let x = fit_context(context, dim);

    let contextual = &state.contextual;
    let chosen = argmax_in_order(&state.variants_arr, |v| match contextual.get(v) {
        Some(stats) if stats.is_well_formed() && stats.feature_dim == dim => {
            score(stats, &x, alpha)
        }
        _ => f64::NEG_INFINITY,
    })?
    .clone();

    state.record_selection(&chosen);
    state.touch();
    Some(chosen)
}

/// Regression update `A += x x^T`, `b += r x` for the variant that was served.
/// An update that would leave a non-finite entry in `A` or `b` is skipped and
/// counted as an error, so one extreme context cannot poison the model.
pub fn update(state: &mut AlgorithmState, variant: &str, context: &[f64], reward: Decimal) -> bool {
    let dim = state.feature_dim();
    let lambda = state.lambda();
    if !state.has_variant(variant) {
        return false;
    }

    let x = fit_context(context, dim);
    let r = reward.to_f64().unwrap_or(0.0);

    let stats = state
        .contextual
        .entry(variant.to_string())
        .or_insert_with(|| ContextualStats::new(dim, lambda));
    if stats.feature_dim != dim || !stats.is_well_formed() {
        *stats = ContextualStats::new(dim, lambda);
    }

    let mut matrix_a = stats.matrix_a.clone();
    let mut vector_b = stats.vector_b.clone();
    matrix::rank1_update(&mut matrix_a, &x, dim);
    matrix::add_scaled(&mut vector_b, &x, r);
    if !matrix_a.iter().chain(&vector_b).all(|v| v.is_finite()) {
        metrics::registry().record_error(state.algorithm.metric_id());
        tracing::warn!(
            feature = %state.key.feature,
            environment = %state.key.environment,
            variant,
            "context overflows the regression; update skipped"
        );
        return false;
    }

    stats.matrix_a = matrix_a;
    stats.vector_b = vector_b;
    stats.pulls += 1;
    stats.total_reward = stats.total_reward.saturating_add(reward);

    if let Some(counters) = state.variant_mut(variant) {
        if reward > Decimal::ZERO {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
        counters.metric_sum = counters.metric_sum.saturating_add(reward);
    }
    state.touch();
    true
}
