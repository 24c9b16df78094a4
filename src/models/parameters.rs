// src/models/parameters.rs

//! Named parameter records for each model variant and their conversions to and
//! from the flat optimizer vector.

use crate::error::{FitError, Result};
use ndarray::{array, Array1};
use serde::{Deserialize, Serialize};

fn check_len(theta: &Array1<f64>, expected: usize) -> Result<()> {
    if theta.len() != expected {
        return Err(FitError::DimensionMismatch {
            expected,
            found: theta.len(),
        });
    }
    Ok(())
}

/// Free parameters of the stochastic mitotic-mode model (He et al. 2012).
/// Phase lengths are in hours, the rest are per-phase mode probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StochasticParameters {
    pub phase_2_length: f64,
    pub phase_3_length: f64,
    pub phase_2_ppp: f64,
    pub phase_2_ppd: f64,
    pub phase_3_ppp: f64,
}

impl StochasticParameters {
    pub const DIMENSION: usize = 5;
    pub const NAMES: [&'static str; 5] = ["phase2", "phase3", "PP2", "PD2", "PP3"];

    // Positions in the flat vector.
    pub const PHASE_2_PPP: usize = 2;
    pub const PHASE_2_PPD: usize = 3;
    pub const PHASE_3_PPP: usize = 4;

    pub fn from_theta(theta: &Array1<f64>) -> Result<Self> {
        check_len(theta, Self::DIMENSION)?;
        Ok(Self {
            phase_2_length: theta[0],
            phase_3_length: theta[1],
            phase_2_ppp: theta[2],
            phase_2_ppd: theta[3],
            phase_3_ppp: theta[4],
        })
    }

    pub fn to_theta(&self) -> Array1<f64> {
        array![
            self.phase_2_length,
            self.phase_3_length,
            self.phase_2_ppp,
            self.phase_2_ppd,
            self.phase_3_ppp,
        ]
    }
}

impl Default for StochasticParameters {
    fn default() -> Self {
        Self {
            phase_2_length: 8.0,
            phase_3_length: 7.0,
            phase_2_ppp: 0.2,
            phase_2_ppd: 0.4,
            phase_3_ppp: 0.2,
        }
    }
}

/// Mode probabilities the stochastic model holds fixed during fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedProbabilities {
    pub phase_1_ppp: f64,
    pub phase_1_ppd: f64,
    pub phase_3_ppd: f64,
}

impl Default for FixedProbabilities {
    fn default() -> Self {
        Self {
            phase_1_ppp: 1.0,
            phase_1_ppd: 0.0,
            phase_3_ppd: 0.0,
        }
    }
}

/// Free parameters of the deterministic phase-shift model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeterministicParameters {
    pub phase_1_shape: f64,
    pub phase_1_scale: f64,
    pub phase_2_shape: f64,
    pub phase_2_scale: f64,
    pub sister_shift_width: f64,
    /// May go negative; never clamped.
    pub offset: f64,
}

impl DeterministicParameters {
    pub const DIMENSION: usize = 6;
    pub const NAMES: [&'static str; 6] =
        ["p1Sh", "p1Sc", "p2Sh", "p2Sc", "sisterShift", "offset"];
    pub const OFFSET: usize = 5;

    pub fn from_theta(theta: &Array1<f64>) -> Result<Self> {
        check_len(theta, Self::DIMENSION)?;
        Ok(Self {
            phase_1_shape: theta[0],
            phase_1_scale: theta[1],
            phase_2_shape: theta[2],
            phase_2_scale: theta[3],
            sister_shift_width: theta[4],
            offset: theta[5],
        })
    }

    pub fn to_theta(&self) -> Array1<f64> {
        array![
            self.phase_1_shape,
            self.phase_1_scale,
            self.phase_2_shape,
            self.phase_2_scale,
            self.sister_shift_width,
            self.offset,
        ]
    }
}

impl Default for DeterministicParameters {
    fn default() -> Self {
        Self {
            phase_1_shape: 3.0,
            phase_1_scale: 2.0,
            phase_2_shape: 3.0,
            phase_2_scale: 2.0,
            sister_shift_width: 0.8,
            offset: 0.0,
        }
    }
}
