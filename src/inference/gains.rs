// src/inference/gains.rs

//! Decaying SPSA gain sequences.

use ndarray::Array1;

/// Coefficients of the two gain sequences
///
///   ak = a / (A + k + 1)^alpha
///   ck = c / (k + 1)^gamma
///
/// where `A` is the stability constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainSchedule {
    pub a: f64,
    pub c: f64,
    pub stability: f64,
    pub alpha: f64,
    pub gamma: f64,
}

/// Global step sizes for one iteration, before per-dimension scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainPair {
    pub ak: f64,
    pub ck: f64,
}

impl GainPair {
    pub fn scaled_ak(&self, scale: &Array1<f64>) -> Array1<f64> {
        scale * self.ak
    }

    pub fn scaled_ck(&self, scale: &Array1<f64>) -> Array1<f64> {
        scale * self.ck
    }
}

impl GainSchedule {
    pub fn ak(&self, k: usize) -> f64 {
        self.a / (self.stability + k as f64 + 1.0).powf(self.alpha)
    }

    pub fn ck(&self, k: usize) -> f64 {
        self.c / (k as f64 + 1.0).powf(self.gamma)
    }

    pub fn at(&self, k: usize) -> GainPair {
        GainPair {
            ak: self.ak(k),
            ck: self.ck(k),
        }
    }
}
