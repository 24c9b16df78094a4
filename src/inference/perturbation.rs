// src/inference/perturbation.rs

//! Rademacher perturbation directions.

use ndarray::Array1;
use rand::Rng;

/// Source of the ±1 direction used to sense the gradient. The optimizer takes
/// this as a seam so a run can be replayed with a fixed direction.
pub trait Perturbation {
    fn sample(&mut self, n: usize) -> Array1<f64>;
}

/// Draws every component independently from {-1, +1} with equal probability.
pub struct Rademacher<R: Rng> {
    rng: R,
}

impl<R: Rng> Rademacher<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> Perturbation for Rademacher<R> {
    fn sample(&mut self, n: usize) -> Array1<f64> {
        rademacher(n, &mut self.rng)
    }
}

/// Always returns the same direction, repeated or truncated to length `n`.
pub struct FixedDirection(Vec<f64>);

impl FixedDirection {
    /// # Panics
    ///
    /// Panics if `direction` is empty.
    pub fn new(direction: Vec<f64>) -> Self {
        assert!(!direction.is_empty(), "fixed direction needs at least one component");
        Self(direction)
    }
}

impl Perturbation for FixedDirection {
    fn sample(&mut self, n: usize) -> Array1<f64> {
        Array1::from_iter((0..n).map(|i| self.0[i % self.0.len()]))
    }
}

pub fn rademacher<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Array1<f64> {
    Array1::from_iter((0..n).map(|_| if rng.gen_bool(0.5) { 1.0 } else { -1.0 }))
}
