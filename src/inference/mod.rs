// src/inference/mod.rs

//! SPSA optimization loop.
//!
//! Each iteration projects the current estimate into the `ck`-shrunk feasible
//! region, perturbs it in both directions along one Rademacher vector,
//! simulates both candidates and turns the single AIC difference into a full
//! gradient estimate. The loop runs a fixed budget of iterations; there is no
//! convergence test.

pub mod cost_functions;
pub mod gains;
pub mod perturbation;
pub mod projection;

use self::cost_functions::ObjectiveEvaluator;
use self::gains::GainSchedule;
use self::perturbation::Perturbation;
use self::projection::{project, ProjectionRule};

use crate::config::{AppConfig, SeedSchedule};
use crate::data::ComparisonGroup;
use crate::diagnostics::IterationReport;
use crate::error::{FitError, Result};
use crate::models::ModelVariant;
use crate::progress::{IterationRecord, ProgressRecord, ProgressSink};
use crate::runner::SimulationRunner;

use chrono::Local;
use log::{info, warn};
use ndarray::Array1;

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initialized,
    Iterating(usize),
    Exhausted,
}

/// Mutable state of one model-mode run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerState {
    pub mode: ModelVariant,
    /// Index of the next iteration to run.
    pub k: usize,
    pub theta: Array1<f64>,
}

impl OptimizerState {
    pub fn phase(&self, max_iterations: usize) -> RunPhase {
        match self.k {
            0 => RunPhase::Initialized,
            k if k > max_iterations => RunPhase::Exhausted,
            k => RunPhase::Iterating(k),
        }
    }
}

/// `ghat_i = (AIC+ - AIC-) / (2 ck) * delta_i`.
pub fn gradient_estimate(difference: f64, ck: f64, delta: &Array1<f64>) -> Array1<f64> {
    delta * (difference / (2.0 * ck))
}

pub struct SpsaDriver<'a, R: SimulationRunner + ?Sized> {
    pub mode: ModelVariant,
    pub gains: GainSchedule,
    pub scale: Array1<f64>,
    pub rule: ProjectionRule,
    pub seeds: SeedSchedule,
    /// Last iteration index; iterations run for k = 0..=max_iterations.
    pub max_iterations: usize,
    pub evaluator: ObjectiveEvaluator<'a, R>,
    pub report: Option<&'a IterationReport>,
}

impl<'a, R: SimulationRunner + ?Sized> SpsaDriver<'a, R> {
    pub fn from_config(
        config: &AppConfig,
        mode: ModelVariant,
        groups: &'a [ComparisonGroup],
        runner: &'a R,
        pool: &'a rayon::ThreadPool,
    ) -> Self {
        Self {
            mode,
            gains: config.gain_schedule(mode),
            scale: mode.scale_vector(),
            rule: mode.projection_rule(config.lower_clamp_epsilon),
            seeds: config.seeds.clone(),
            max_iterations: config.spsa.max_iterations,
            evaluator: ObjectiveEvaluator::new(mode, groups, runner, pool),
            report: None,
        }
    }

    pub fn with_report(mut self, report: &'a IterationReport) -> Self {
        self.report = Some(report);
        self
    }

    pub fn initial_state(&self, theta0: Array1<f64>) -> Result<OptimizerState> {
        let expected = self.mode.dimension();
        if theta0.len() != expected {
            return Err(FitError::DimensionMismatch { expected, found: theta0.len() });
        }
        let theta = project(&theta0, &Array1::zeros(expected), &self.rule);
        Ok(OptimizerState { mode: self.mode, k: 0, theta })
    }

    /// Runs iteration `state.k` and advances the state by one.
    pub fn step(
        &self,
        state: &mut OptimizerState,
        perturbation: &mut dyn Perturbation,
        sink: &mut dyn ProgressSink,
    ) -> Result<IterationRecord> {
        let k = state.k;
        let seeds = self.seeds.ranges_at(k);
        info!(
            "[{}] iteration {k}/{}: theta = {}",
            self.mode, self.max_iterations, state.theta
        );
        sink.append(&ProgressRecord::Estimate { k, theta: state.theta.clone() })?;

        let delta = perturbation.sample(self.mode.dimension());
        let gain = self.gains.at(k);
        let scaled_ak = gain.scaled_ak(&self.scale);
        let scaled_ck = gain.scaled_ck(&self.scale);

        // Sense the gradient from inside the ck-shrunk region so both
        // candidates remain feasible.
        let projected = project(&state.theta, &scaled_ck, &self.rule);
        let step = &scaled_ck * &delta;
        let theta_plus = &projected + &step;
        let theta_minus = &projected - &step;

        info!(
            "[{}] simulating iteration {k} on {} workers: {} lineages for counts, {} for events",
            self.mode,
            self.evaluator.pool.current_num_threads(),
            seeds.count_lineages(),
            seeds.rate_lineages()
        );
        let evaluation = self.evaluator.evaluate_pair(&theta_plus, &theta_minus, seeds)?;
        let ghat = gradient_estimate(evaluation.difference(), gain.ck, &delta);
        info!(
            "[{}] AIC+ = {:.4}, AIC- = {:.4}, ak = {:.6}, ck = {:.6}",
            self.mode, evaluation.plus.aic, evaluation.minus.aic, gain.ak, gain.ck
        );

        if let Some(report) = self.report {
            if let Err(e) = report.write(self.mode, k, self.evaluator.groups, &evaluation) {
                warn!("could not write iteration report for k = {k}: {e}");
            }
        }

        let updated = &state.theta - &(&scaled_ak * &ghat);
        let record = IterationRecord {
            k,
            theta: state.theta.clone(),
            theta_plus,
            theta_minus,
            aic_plus: evaluation.plus.aic,
            aic_minus: evaluation.minus.aic,
            ak: gain.ak,
            ck: gain.ck,
            ghat,
        };
        sink.append(&ProgressRecord::Iteration(record.clone()))?;

        state.theta = project(&updated, &Array1::zeros(updated.len()), &self.rule);
        state.k += 1;
        Ok(record)
    }

    /// Runs iterations 0..=max_iterations from `theta0` and returns the final state.
    pub fn run(
        &self,
        theta0: Array1<f64>,
        perturbation: &mut dyn Perturbation,
        sink: &mut dyn ProgressSink,
    ) -> Result<OptimizerState> {
        let mut state = self.initial_state(theta0)?;
        sink.append(&ProgressRecord::RunStarted { mode: self.mode, started: Local::now() })?;
        info!("began SPSA optimisation of {} model", self.mode);

        while state.phase(self.max_iterations) != RunPhase::Exhausted {
            self.step(&mut state, perturbation, sink)?;
        }

        sink.append(&ProgressRecord::Finished {
            mode: self.mode,
            k: state.k,
            theta: state.theta.clone(),
        })?;
        info!("[{}] final estimate after {} iterations: {}", self.mode, state.k, state.theta);
        Ok(state)
    }
}
