// src/config.rs

//! Application configuration: SPSA coefficients, seed schedule, simulator
//! settings and starting points. Defaults reproduce the published fit.

use crate::error::{FitError, Result};
use crate::inference::gains::GainSchedule;
use crate::models::parameters::{DeterministicParameters, FixedProbabilities, StochasticParameters};
use crate::models::ModelVariant;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Variants to fit, in order. Each gets its own full run.
    pub modes: Vec<ModelVariant>,
    /// Added to the margin when a deterministic parameter is clamped from
    /// below, so the simulator never sees a zero shape or scale.
    pub lower_clamp_epsilon: f64,
    pub log_path: PathBuf,
    pub report_dir: Option<PathBuf>,
    /// Seed for the perturbation generator. `None` draws from entropy.
    pub rng_seed: Option<u64>,
    pub spsa: SpsaSettings,
    pub seeds: SeedSchedule,
    pub simulation: SimulationSettings,
    pub histograms: HistogramSettings,
    pub start: StartingPoints,
    pub fixed: FixedProbabilities,
    pub sequences: SequenceSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            modes: vec![ModelVariant::Deterministic, ModelVariant::Stochastic],
            lower_clamp_epsilon: 0.1,
            log_path: PathBuf::from("testoutput/SPSA/HeSPSAOutput"),
            report_dir: None,
            rng_seed: None,
            spsa: SpsaSettings::default(),
            seeds: SeedSchedule::default(),
            simulation: SimulationSettings::default(),
            histograms: HistogramSettings::default(),
            start: StartingPoints::default(),
            fixed: FixedProbabilities::default(),
            sequences: SequenceSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(FitError::MissingDataFile(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| FitError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.modes.is_empty() {
            return Err(FitError::Config("at least one model mode is required".into()));
        }
        self.spsa.validate()?;
        self.seeds.validate()?;
        if self.simulation.induction_times.is_empty() {
            return Err(FitError::Config("induction_times must not be empty".into()));
        }
        if self.histograms.count_bins == 0 {
            return Err(FitError::Config("count_bins must be positive".into()));
        }
        if !(self.histograms.rate_bin_width > 0.0)
            || self.histograms.rate_end <= self.histograms.rate_start
        {
            return Err(FitError::Config("rate bins must have positive width and extent".into()));
        }
        if !(self.lower_clamp_epsilon >= 0.0) {
            return Err(FitError::Config("lower_clamp_epsilon must be non-negative".into()));
        }
        self.sequences.validate()?;
        Ok(())
    }

    pub fn gain_schedule(&self, mode: ModelVariant) -> GainSchedule {
        let coeffs = match mode {
            ModelVariant::Stochastic => self.spsa.stochastic,
            ModelVariant::Deterministic => self.spsa.deterministic,
        };
        GainSchedule {
            a: coeffs.a,
            c: coeffs.c,
            stability: self.spsa.stability,
            alpha: self.spsa.alpha,
            gamma: self.spsa.gamma,
        }
    }

    pub fn starting_theta(&self, mode: ModelVariant) -> Array1<f64> {
        match mode {
            ModelVariant::Stochastic => self.start.stochastic.to_theta(),
            ModelVariant::Deterministic => self.start.deterministic.to_theta(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainCoefficients {
    pub a: f64,
    pub c: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpsaSettings {
    /// Last iteration index; the loop runs k = 0..=max_iterations.
    pub max_iterations: usize,
    /// Stability constant A, roughly 10% of the expected iteration count.
    pub stability: f64,
    pub alpha: f64,
    pub gamma: f64,
    pub stochastic: GainCoefficients,
    pub deterministic: GainCoefficients,
}

impl Default for SpsaSettings {
    fn default() -> Self {
        Self {
            max_iterations: 69,
            stability: 7.0,
            alpha: 0.602,
            gamma: 0.101,
            stochastic: GainCoefficients { a: 0.025, c: 0.5 },
            deterministic: GainCoefficients { a: 0.001, c: 0.25 },
        }
    }
}

impl SpsaSettings {
    fn validate(&self) -> Result<()> {
        for (name, g) in [("stochastic", self.stochastic), ("deterministic", self.deterministic)] {
            if !(g.a > 0.0) || !(g.c > 0.0) {
                return Err(FitError::Config(format!(
                    "{name} gain coefficients must be positive (a = {}, c = {})",
                    g.a, g.c
                )));
            }
        }
        if !(self.stability >= 0.0) {
            return Err(FitError::Config("stability constant A must be non-negative".into()));
        }
        for (name, exponent) in [("alpha", self.alpha), ("gamma", self.gamma)] {
            if !(exponent > 0.0 && exponent <= 1.0) {
                return Err(FitError::Config(format!("{name} must lie in (0, 1], got {exponent}")));
            }
        }
        Ok(())
    }
}

/// Seed ranges handed to the simulator. The size of a range is the number of
/// lineages simulated per batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedSchedule {
    pub start_seed: u64,
    pub count_end_seed: u64,
    pub rate_end_seed: u64,
    /// Iteration from which the widened ranges apply.
    pub widen_at: Option<usize>,
    pub widened_count_end_seed: u64,
    pub widened_rate_end_seed: u64,
}

impl Default for SeedSchedule {
    fn default() -> Self {
        Self {
            start_seed: 0,
            count_end_seed: 999,
            rate_end_seed: 249,
            widen_at: Some(50),
            widened_count_end_seed: 4999,
            widened_rate_end_seed: 1249,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedRanges {
    pub start: u64,
    pub count_end: u64,
    pub rate_end: u64,
}

impl SeedRanges {
    pub fn count_lineages(&self) -> u64 {
        self.count_end - self.start + 1
    }

    pub fn rate_lineages(&self) -> u64 {
        self.rate_end - self.start + 1
    }
}

impl SeedSchedule {
    pub fn ranges_at(&self, k: usize) -> SeedRanges {
        let widened = self.widen_at.is_some_and(|at| k >= at);
        SeedRanges {
            start: self.start_seed,
            count_end: if widened { self.widened_count_end_seed } else { self.count_end_seed },
            rate_end: if widened { self.widened_rate_end_seed } else { self.rate_end_seed },
        }
    }

    fn validate(&self) -> Result<()> {
        let ends = [
            self.count_end_seed,
            self.rate_end_seed,
            self.widened_count_end_seed,
            self.widened_rate_end_seed,
        ];
        if ends.iter().any(|&end| end < self.start_seed) {
            return Err(FitError::Config(format!(
                "every end seed must be >= start seed {}",
                self.start_seed
            )));
        }
        Ok(())
    }
}

/// Settings passed through to the simulator unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub executable: PathBuf,
    /// Root under which the simulator writes `<directory>/<file_name>`.
    pub output_root: PathBuf,
    pub directory: String,
    pub count_output_mode: u8,
    pub event_output_mode: u8,
    /// 0 = He 2012, 1 = Wan 2016.
    pub fixture: u8,
    pub ath5founder: u8,
    pub debug_output: u8,
    pub induction_times: Vec<u32>,
    pub earliest_lineage_start_time: f64,
    pub latest_lineage_start_time: f64,
    pub end_time: f64,
    pub rate_end_time: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/home/main/chaste_build/projects/ISP/apps/HeSimulator"),
            output_root: PathBuf::from("testoutput"),
            directory: "SPSA".to_string(),
            count_output_mode: 0,
            event_output_mode: 1,
            fixture: 0,
            ath5founder: 0,
            debug_output: 0,
            induction_times: vec![24, 32, 48],
            earliest_lineage_start_time: 23.0,
            latest_lineage_start_time: 39.0,
            end_time: 72.0,
            rate_end_time: 80.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramSettings {
    /// Unit-width count bins compared against the empirical data, from 1.
    pub count_bins: usize,
    /// Count bins shown in the iteration report.
    pub display_count_bins: usize,
    pub rate_start: f64,
    pub rate_end: f64,
    pub rate_bin_width: f64,
    /// Bootstrap draws per uncertainty band.
    pub band_draws: usize,
}

impl Default for HistogramSettings {
    fn default() -> Self {
        Self {
            count_bins: 1000,
            display_count_bins: 30,
            rate_start: 30.0,
            rate_end: 80.0,
            rate_bin_width: 5.0,
            band_draws: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartingPoints {
    pub stochastic: StochasticParameters,
    pub deterministic: DeterministicParameters,
}

/// Sequence sampling: every configured simulator run writes its own sampled
/// mitotic-mode sequences, and the traced empirical lineages are traversed
/// into a matching file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceSettings {
    /// Traced lineage table (lineage, event, parent, mode).
    pub empirical_data: PathBuf,
    /// Subdirectory of the simulation output root shared by every run.
    pub directory: String,
    pub empirical_name: String,
    pub output_mode: u8,
    pub debug_output: u8,
    pub start_seed: u64,
    pub end_seed: u64,
    /// Empirical lineage ids are drawn from 1 up to, not including, this value.
    pub traversal_lineages: u32,
    pub traversal_seed: u64,
    pub runs: Vec<SequenceRun>,
}

/// One simulator invocation. The command line is
/// `directory name output_mode [leading..] debug start end [trailing..]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRun {
    pub name: String,
    pub executable: PathBuf,
    #[serde(default)]
    pub leading: Vec<u32>,
    #[serde(default)]
    pub trailing: Vec<f64>,
}

const APPS: &str = "/home/main/chaste_build/projects/ISP/apps";

/// Deterministic flag, fixture, ath5founder.
fn he_leading(deterministic: u32) -> Vec<u32> {
    vec![deterministic, 2, 0]
}

/// Induction, earliest start, latest start and end time, then model parameters.
fn he_trailing(params: &[f64]) -> Vec<f64> {
    [0.0, 0.0, 1.0, 80.0].iter().chain(params).copied().collect()
}

impl Default for SequenceSettings {
    fn default() -> Self {
        let he = PathBuf::from(APPS).join("HeSimulator");
        Self {
            empirical_data: PathBuf::from(
                "/home/main/git/chaste/projects/ISP/empirical_data/empirical_lineages.csv",
            ),
            directory: "KolmogorovSequences".to_string(),
            empirical_name: "EOsequences".to_string(),
            output_mode: 2,
            debug_output: 0,
            start_seed: 0,
            end_seed: 9999,
            traversal_lineages: 60,
            traversal_seed: 0,
            runs: vec![
                SequenceRun {
                    name: "Gomes".to_string(),
                    executable: PathBuf::from(APPS).join("GomesSimulator"),
                    leading: Vec::new(),
                    trailing: vec![480.0, 3.9716, 0.32839, 0.055, 0.221, 0.128, 0.106, 0.028],
                },
                SequenceRun {
                    name: "He".to_string(),
                    executable: he.clone(),
                    leading: he_leading(0),
                    trailing: he_trailing(&[8.0, 7.0, 1.0, 0.0, 0.2, 0.4, 0.2, 0.0]),
                },
                SequenceRun {
                    name: "HeRefit".to_string(),
                    executable: he.clone(),
                    leading: he_leading(0),
                    trailing: he_trailing(&[
                        4.1483, 11.6416, 1.0, 0.0, 0.1959, 0.5168, 0.2934, 0.0,
                    ]),
                },
                SequenceRun {
                    name: "Deterministic".to_string(),
                    executable: he,
                    leading: he_leading(1),
                    trailing: he_trailing(&[3.7371, 1.8114, 2.5769, 1.6814, 1.6326, 1.2333]),
                },
                SequenceRun {
                    name: "Boije".to_string(),
                    executable: PathBuf::from(APPS).join("BoijeSimulator"),
                    leading: Vec::new(),
                    trailing: vec![250.0, 3.0, 5.0, 0.32, 0.3, 0.8],
                },
            ],
        }
    }
}

impl SequenceSettings {
    /// One sequence per seed.
    pub fn sample_count(&self) -> usize {
        (self.end_seed - self.start_seed + 1) as usize
    }

    fn validate(&self) -> Result<()> {
        if self.end_seed < self.start_seed {
            return Err(FitError::Config(format!(
                "sequence end seed {} is below start seed {}",
                self.end_seed, self.start_seed
            )));
        }
        if self.traversal_lineages < 2 {
            return Err(FitError::Config("traversal_lineages must be at least 2".into()));
        }
        let mut names: Vec<&str> = self.runs.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(FitError::Config("sequence run names must be unique".into()));
        }
        Ok(())
    }
}
