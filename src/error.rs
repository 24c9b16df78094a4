// src/error.rs

//! Error taxonomy for a fitting run.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FitError>;

#[derive(Error, Debug)]
pub enum FitError {
    /// Simulator binary is not on disk; fatal before the first iteration.
    #[error("could not find executable: {}", .0.display())]
    MissingExecutable(PathBuf),

    /// Empirical or configuration file is not on disk.
    #[error("could not find data file: {}", .0.display())]
    MissingDataFile(PathBuf),

    /// A dispatched batch exited abnormally or left no usable output.
    #[error("simulation `{job}` failed: {reason}")]
    SimulationFailure { job: String, reason: String },

    #[error("malformed output in {} at line {line}: {reason}", path.display())]
    MalformedOutput {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("parameter vector has {found} entries, model expects {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl FitError {
    pub fn simulation(job: impl Into<String>, reason: impl Into<String>) -> Self {
        FitError::SimulationFailure {
            job: job.into(),
            reason: reason.into(),
        }
    }
}
