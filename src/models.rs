// src/models.rs

//! Model variants the optimizer can fit. Each variant fixes the dimensionality,
//! gain scaling, feasible region and simulator argument layout of a run.

pub mod parameters;

use crate::error::Result;
use crate::inference::projection::ProjectionRule;
use ndarray::{array, Array1};
use parameters::{DeterministicParameters, FixedProbabilities, StochasticParameters};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// Three-phase stochastic mitotic-mode model.
    Stochastic,
    /// Gamma-distributed deterministic phase-shift model.
    Deterministic,
}

impl ModelVariant {
    pub fn dimension(&self) -> usize {
        match self {
            ModelVariant::Stochastic => StochasticParameters::DIMENSION,
            ModelVariant::Deterministic => DeterministicParameters::DIMENSION,
        }
    }

    /// Per-dimension gain multipliers. Hour-valued parameters step at full
    /// size, probabilities and the sister shift at a fraction of it.
    pub fn scale_vector(&self) -> Array1<f64> {
        match self {
            ModelVariant::Stochastic => array![1.0, 1.0, 0.05, 0.05, 0.05],
            ModelVariant::Deterministic => array![1.0, 1.0, 1.0, 1.0, 0.1, 1.0],
        }
    }

    /// Parameter count used in the AIC penalty. This counts every parameter of
    /// the simulator, not only the ones being fit.
    pub fn aic_parameter_count(&self) -> usize {
        match self {
            ModelVariant::Stochastic => 15,
            ModelVariant::Deterministic => 13,
        }
    }

    pub fn projection_rule(&self, lower_clamp_epsilon: f64) -> ProjectionRule {
        match self {
            ModelVariant::Stochastic => ProjectionRule::ProbabilitySimplex {
                pair: (
                    StochasticParameters::PHASE_2_PPP,
                    StochasticParameters::PHASE_2_PPD,
                ),
                capped: StochasticParameters::PHASE_3_PPP,
            },
            ModelVariant::Deterministic => ProjectionRule::PositiveWithFreeOffset {
                offset: DeterministicParameters::OFFSET,
                epsilon: lower_clamp_epsilon,
            },
        }
    }

    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            ModelVariant::Stochastic => &StochasticParameters::NAMES,
            ModelVariant::Deterministic => &DeterministicParameters::NAMES,
        }
    }

    /// Value of the simulator's `deterministic_mode` switch.
    pub fn simulator_flag(&self) -> u8 {
        match self {
            ModelVariant::Stochastic => 0,
            ModelVariant::Deterministic => 1,
        }
    }

    /// Trailing model-parameter arguments of a simulator command line.
    pub fn simulator_arguments(
        &self,
        theta: &Array1<f64>,
        fixed: &FixedProbabilities,
    ) -> Result<Vec<String>> {
        let values = match self {
            ModelVariant::Stochastic => {
                let p = StochasticParameters::from_theta(theta)?;
                vec![
                    p.phase_2_length,
                    p.phase_3_length,
                    fixed.phase_1_ppp,
                    fixed.phase_1_ppd,
                    p.phase_2_ppp,
                    p.phase_2_ppd,
                    p.phase_3_ppp,
                    fixed.phase_3_ppd,
                ]
            }
            ModelVariant::Deterministic => {
                DeterministicParameters::from_theta(theta)?.to_theta().to_vec()
            }
        };
        Ok(values.iter().map(|v| v.to_string()).collect())
    }

    /// Prefix of simulator output file names for this variant.
    pub fn file_stem(&self) -> &'static str {
        match self {
            ModelVariant::Stochastic => "HeSPSA",
            ModelVariant::Deterministic => "DetSPSA",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelVariant::Stochastic => write!(f, "stochastic"),
            ModelVariant::Deterministic => write!(f, "deterministic"),
        }
    }
}
