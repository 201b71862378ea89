//! Random sources shared by the stochastic algorithms.
//!
//! Every algorithm draws through [`RandomSource`] so tests can swap in a seeded
//! generator without touching algorithm code. Beta draws use the
//! Marsaglia-Tsang gamma sampler built on the two primitive draws.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const MAX_GAMMA_ITERATIONS: usize = 1000;
const MIN_UNIFORM: f64 = 1e-10;

pub trait RandomSource: Send + Sync {
    /// Uniform draw in `[0, 1)`.
    fn uniform(&self) -> f64;

    /// Uniform index in `0..n`. `n` must be non-zero.
    fn index(&self, n: usize) -> usize {
        let idx = (self.uniform() * n as f64).floor() as usize;
        idx.min(n.saturating_sub(1))
    }

    /// Standard normal draw (Box-Muller).
    fn normal(&self) -> f64 {
        let u1 = self.uniform().max(MIN_UNIFORM);
        let u2 = self.uniform();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    fn gamma(&self, shape: f64) -> f64 {
        sample_gamma(self, shape)
    }

    fn beta(&self, alpha: f64, beta: f64) -> f64 {
        if alpha <= 0.0 || beta <= 0.0 || !alpha.is_finite() || !beta.is_finite() {
            return 0.5;
        }
        let x = self.gamma(alpha);
        let y = self.gamma(beta);
        if x + y == 0.0 {
            return 0.5;
        }
        x / (x + y)
    }
}

fn sample_gamma<R: RandomSource + ?Sized>(rng: &R, shape: f64) -> f64 {
    if shape < 1.0 {
        let u = rng.uniform().max(MIN_UNIFORM);
        return sample_gamma(rng, shape + 1.0) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    for _ in 0..MAX_GAMMA_ITERATIONS {
        let z = rng.normal();
        let v = (1.0 + c * z).powi(3);
        if v <= 0.0 {
            continue;
        }

        let u = rng.uniform().max(MIN_UNIFORM);
        let z_sq = z * z;
        if u < 1.0 - 0.0331 * z_sq * z_sq {
            return d * v;
        }
        if u.ln() < 0.5 * z_sq + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }

    d
}

/// Deterministic ChaCha generator guarded by its own lock.
pub struct SeededRandom {
    rng: Mutex<ChaCha8Rng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn uniform(&self) -> f64 {
        self.rng.lock().random::<f64>()
    }

    fn index(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.rng.lock().random_range(0..n)
    }
}

/// Thread-local generator; no shared lock on the hot path.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn uniform(&self) -> f64 {
        rand::rng().random::<f64>()
    }

    fn index(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        rand::rng().random_range(0..n)
    }
}

/// Replays a fixed sequence of uniform draws, cycling when exhausted.
#[cfg(test)]
pub(crate) struct ScriptedRandom {
    draws: Vec<f64>,
    cursor: Mutex<usize>,
}

#[cfg(test)]
impl ScriptedRandom {
    pub(crate) fn new(draws: Vec<f64>) -> Self {
        Self {
            draws,
            cursor: Mutex::new(0),
        }
    }
}

#[cfg(test)]
impl RandomSource for ScriptedRandom {
    fn uniform(&self) -> f64 {
        let mut cursor = self.cursor.lock();
        let value = self.draws[*cursor % self.draws.len()];
        *cursor += 1;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_sources_are_reproducible() {
        let a = SeededRandom::new(42);
        let b = SeededRandom::new(42);
        for _ in 0..50 {
            assert_eq!(a.uniform(), b.uniform());
        }
    }

    #[test]
    fn uniform_stays_in_unit_interval() {
        let rng = SeededRandom::new(7);
        for _ in 0..1000 {
            let u = rng.uniform();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn index_stays_in_range() {
        let rng = SeededRandom::new(9);
        for _ in 0..500 {
            assert!(rng.index(3) < 3);
        }
        assert!(ThreadRandom.index(5) < 5);
    }

    #[test]
    fn beta_draws_are_in_unit_interval() {
        let rng = SeededRandom::new(11);
        for &(a, b) in &[(1.0, 1.0), (0.5, 0.5), (91.0, 11.0), (2.0, 30.0)] {
            for _ in 0..200 {
                let x = rng.beta(a, b);
                assert!((0.0..=1.0).contains(&x), "beta({a},{b}) produced {x}");
            }
        }
    }

    #[test]
    fn beta_mean_tracks_parameters() {
        let rng = SeededRandom::new(3);
        let n = 4000;
        let mean: f64 = (0..n).map(|_| rng.beta(9.0, 1.0)).sum::<f64>() / n as f64;
        assert!((mean - 0.9).abs() < 0.03, "mean was {mean}");
    }

    #[test]
    fn beta_rejects_degenerate_parameters() {
        let rng = SeededRandom::new(1);
        assert_eq!(rng.beta(0.0, 1.0), 0.5);
        assert_eq!(rng.beta(1.0, -2.0), 0.5);
    }

    #[test]
    fn scripted_source_cycles() {
        let rng = ScriptedRandom::new(vec![0.1, 0.9]);
        assert_eq!(rng.uniform(), 0.1);
        assert_eq!(rng.uniform(), 0.9);
        assert_eq!(rng.uniform(), 0.1);
    }
}
