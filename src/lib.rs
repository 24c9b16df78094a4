// src/lib.rs

//! Fits lineage-simulation parameters to He et al. (2012) zebrafish retina
//! data by simultaneous perturbation stochastic approximation, scoring
//! candidates with the AIC of simulated against empirical histograms.

pub mod config;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod inference;
pub mod models;
pub mod progress;
pub mod runner;
pub mod sequences;
pub mod utils;
