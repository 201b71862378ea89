//! Small dense linear algebra for the per-variant LinUCB models.
//!
//! Matrices are row-major `Vec<f64>` of size `d * d`. `d` is expected to stay
//! small, so every solve refactorizes from scratch.

const EPSILON: f64 = 1e-10;
const MIN_DIAG: f64 = 1e-6;

/// Cholesky factor `L` with `A = L * L^T`. Non-positive pivots are clamped so
/// the factor stays usable when rounding drifts `A` off definiteness.
pub fn cholesky_decompose(a: &[f64], d: usize) -> Vec<f64> {
    let mut l = vec![0.0; d * d];

    for i in 0..d {
        for j in 0..=i {
            let mut sum = a[i * d + j];
            for k in 0..j {
                sum -= l[i * d + k] * l[j * d + k];
            }

            if i == j {
                l[i * d + i] = if sum <= 0.0 { MIN_DIAG.sqrt() } else { sum.sqrt() };
            } else {
                let diag = l[j * d + j];
                l[i * d + j] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
            }
        }
    }

    l
}

/// Solves `A x = b` given the Cholesky factor of `A`.
pub fn solve_cholesky(l: &[f64], b: &[f64], d: usize) -> Vec<f64> {
    let y = solve_lower(l, b, d);
    solve_upper_transpose(l, &y, d)
}

/// `x^T A^{-1} x` computed as `||L^{-1} x||^2`.
pub fn quadratic_form(l: &[f64], x: &[f64], d: usize) -> f64 {
    solve_lower(l, x, d).iter().map(|v| v * v).sum()
}

fn solve_lower(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * x[j];
        }
        let diag = l[i * n + i];
        x[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }
    x
}

fn solve_upper_transpose(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        let diag = l[i * n + i];
        x[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }
    x
}

pub fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// `A += x x^T`
pub fn rank1_update(a: &mut [f64], x: &[f64], d: usize) {
    for i in 0..d {
        for j in 0..d {
            a[i * d + j] += x[i] * x[j];
        }
    }
}

/// `a += scale * b`
pub fn add_scaled(a: &mut [f64], b: &[f64], scale: f64) {
    for (ai, bi) in a.iter_mut().zip(b.iter()) {
        *ai += scale * bi;
    }
}
