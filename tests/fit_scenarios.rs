//! End-to-end SPSA runs against in-process simulator stubs.
//!
//! The replay stub turns the empirical observations back into simulator
//! samples, so every candidate reproduces the reference histograms exactly.

use approx::assert_abs_diff_eq;
use argmin::core::CostFunction;
use ndarray::{array, Array1};
use std::sync::atomic::{AtomicUsize, Ordering};

use lineage_spsa::config::AppConfig;
use lineage_spsa::data::{
    comparison_groups, ComparisonGroup, EmpiricalData, GroupKind, MitoticEvent, MitoticMode,
};
use lineage_spsa::error::{FitError, Result};
use lineage_spsa::inference::cost_functions::{AicObjective, ObjectiveEvaluator};
use lineage_spsa::inference::perturbation::FixedDirection;
use lineage_spsa::inference::SpsaDriver;
use lineage_spsa::models::ModelVariant;
use lineage_spsa::progress::{MemoryProgressLog, ProgressRecord};
use lineage_spsa::runner::{worker_pool, JobKind, Side, SimulationJob, SimulationOutput, SimulationRunner};

struct ReplayRunner {
    data: EmpiricalData,
    calls: AtomicUsize,
    /// When set, plus-side count jobs come back empty.
    starve_plus: bool,
    /// Jobs from this call index onward fail.
    fail_from_call: Option<usize>,
}

impl ReplayRunner {
    fn new() -> Self {
        Self {
            data: EmpiricalData::he_2012(),
            calls: AtomicUsize::new(0),
            starve_plus: false,
            fail_from_call: None,
        }
    }

    fn observed(&self, kind: GroupKind) -> &[f64] {
        &self.data.group(kind).expect("group present").observed
    }
}

impl SimulationRunner for ReplayRunner {
    fn run(&self, job: &SimulationJob) -> Result<SimulationOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_from_call.is_some_and(|from| call >= from) {
            return Err(FitError::simulation(&job.name, "exited with status 3"));
        }
        match job.kind {
            JobKind::Counts { induction_time } => {
                if self.starve_plus && job.side == Side::Plus {
                    return Ok(SimulationOutput::Counts(Vec::new()));
                }
                let samples = self
                    .observed(GroupKind::Count { induction_time })
                    .iter()
                    .enumerate()
                    .flat_map(|(i, &n)| std::iter::repeat((i + 1) as f64).take(n as usize))
                    .collect();
                Ok(SimulationOutput::Counts(samples))
            }
            JobKind::Events => {
                let mut events = Vec::new();
                for mode in MitoticMode::ALL {
                    for (i, &n) in self.observed(GroupKind::Rate { mode }).iter().enumerate() {
                        let time = 30.0 + 5.0 * i as f64 + 2.5;
                        events.extend((0..n as usize).map(|_| MitoticEvent { time, mode }));
                    }
                }
                Ok(SimulationOutput::Events(events))
            }
        }
    }
}

struct FailingRunner;

impl SimulationRunner for FailingRunner {
    fn run(&self, job: &SimulationJob) -> Result<SimulationOutput> {
        Err(FitError::simulation(&job.name, "exited with status 3"))
    }
}

/// Defaults with one simulated rate lineage per empirically followed lineage,
/// so replayed events normalise exactly like the reference.
fn replay_config(max_iterations: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.spsa.max_iterations = max_iterations;
    config.seeds.rate_end_seed = 59;
    config.seeds.widened_rate_end_seed = 59;
    config
}

fn he_groups(config: &AppConfig) -> Vec<ComparisonGroup> {
    comparison_groups(
        &EmpiricalData::he_2012(),
        &config.simulation.induction_times,
        &config.histograms,
    )
    .unwrap()
}

#[test]
fn test_identical_simulations_leave_theta_unchanged() {
    let config = replay_config(1);
    let groups = he_groups(&config);
    let runner = ReplayRunner::new();
    let pool = worker_pool(Some(4)).unwrap();
    let driver = SpsaDriver::from_config(&config, ModelVariant::Stochastic, &groups, &runner, &pool);

    let theta0 = config.starting_theta(ModelVariant::Stochastic);
    let mut direction = FixedDirection::new(vec![1.0]);
    let mut log = MemoryProgressLog::default();
    let state = driver.run(theta0.clone(), &mut direction, &mut log).unwrap();

    assert_eq!(state.k, 2);
    assert_abs_diff_eq!(state.theta, theta0, epsilon = 1e-15);
    assert_eq!(log.final_theta(), Some(&state.theta));
    // Three count jobs and one event job per side, two iterations.
    assert_eq!(runner.calls.load(Ordering::SeqCst), 16);

    let iterations: Vec<_> = log.iterations().collect();
    assert_eq!(iterations.len(), 2);
    for it in &iterations {
        assert_eq!(it.aic_plus, it.aic_minus);
        assert_eq!(it.ghat, Array1::<f64>::zeros(5));
    }

    // k = 0: ck = 0.5, scaled by [1, 1, .05, .05, .05].
    let first = iterations[0];
    assert_abs_diff_eq!(first.theta_plus, array![8.5, 7.5, 0.225, 0.425, 0.225], epsilon = 1e-12);
    assert_abs_diff_eq!(first.theta_minus, array![7.5, 6.5, 0.175, 0.375, 0.175], epsilon = 1e-12);
}

#[test]
fn test_deterministic_single_iteration() {
    let config = replay_config(0);
    let groups = he_groups(&config);
    let runner = ReplayRunner::new();
    let pool = worker_pool(Some(2)).unwrap();
    let driver =
        SpsaDriver::from_config(&config, ModelVariant::Deterministic, &groups, &runner, &pool);

    let mut log = MemoryProgressLog::default();
    let state = driver
        .run(
            config.starting_theta(ModelVariant::Deterministic),
            &mut FixedDirection::new(vec![1.0, -1.0]),
            &mut log,
        )
        .unwrap();

    assert_eq!(state.k, 1);
    assert_eq!(runner.calls.load(Ordering::SeqCst), 8);
    assert!(matches!(log.records.first(), Some(ProgressRecord::RunStarted { .. })));
    assert!(matches!(log.records.last(), Some(ProgressRecord::Finished { k: 1, .. })));
}

#[test]
fn test_worse_plus_side_moves_theta_and_stays_feasible() {
    let config = replay_config(0);
    let groups = he_groups(&config);
    let runner = ReplayRunner { starve_plus: true, ..ReplayRunner::new() };
    let pool = worker_pool(Some(2)).unwrap();
    let driver = SpsaDriver::from_config(&config, ModelVariant::Stochastic, &groups, &runner, &pool);

    let mut log = MemoryProgressLog::default();
    let state = driver
        .run(
            config.starting_theta(ModelVariant::Stochastic),
            &mut FixedDirection::new(vec![1.0]),
            &mut log,
        )
        .unwrap();

    let it = log.iterations().next().unwrap();
    assert!(it.aic_plus > it.aic_minus);
    assert!(it.ghat.iter().all(|&g| g > 0.0));

    let theta = &state.theta;
    assert!(theta[0] < 8.0);
    assert!(theta.iter().all(|&v| v >= 0.0));
    assert!(theta[4] <= 1.0);
    assert!(theta[2] + theta[3] <= 1.0 + 1e-12);
}

#[test]
fn test_failed_batch_stops_the_run() {
    let config = replay_config(3);
    let groups = he_groups(&config);
    let pool = worker_pool(Some(2)).unwrap();
    let driver =
        SpsaDriver::from_config(&config, ModelVariant::Stochastic, &groups, &FailingRunner, &pool);

    let mut log = MemoryProgressLog::default();
    let result = driver.run(
        config.starting_theta(ModelVariant::Stochastic),
        &mut FixedDirection::new(vec![1.0]),
        &mut log,
    );

    assert!(matches!(result, Err(FitError::SimulationFailure { .. })));
    assert_eq!(log.iterations().count(), 0);
    // The estimate entering the failed iteration is still on record.
    let estimates: Vec<_> = log.estimates().collect();
    assert_eq!(estimates.len(), 1);
    assert_eq!(estimates[0].0, 0);
}

#[test]
fn test_failure_mid_run_keeps_last_estimate() {
    let config = replay_config(3);
    let groups = he_groups(&config);
    // Iteration 0 uses the first eight jobs; iteration 1 fails.
    let runner = ReplayRunner { starve_plus: true, fail_from_call: Some(8), ..ReplayRunner::new() };
    let pool = worker_pool(Some(2)).unwrap();
    let driver = SpsaDriver::from_config(&config, ModelVariant::Stochastic, &groups, &runner, &pool);

    let theta0 = config.starting_theta(ModelVariant::Stochastic);
    let mut log = MemoryProgressLog::default();
    let result = driver.run(theta0.clone(), &mut FixedDirection::new(vec![1.0]), &mut log);
    assert!(matches!(result, Err(FitError::SimulationFailure { .. })));

    assert_eq!(log.iterations().count(), 1);
    let estimates: Vec<_> = log.estimates().collect();
    assert_eq!(estimates.len(), 2);
    assert_eq!(estimates[0], (0, &theta0));

    // The updated, re-projected estimate that iteration 1 started from.
    let (k, theta_1) = estimates[1];
    assert_eq!(k, 1);
    assert_ne!(theta_1, &theta0);
    assert!(theta_1.iter().all(|&v| v >= 0.0));
    assert!(log.final_theta().is_none());
}

#[test]
fn test_wrong_starting_dimension_is_rejected() {
    let config = replay_config(0);
    let groups = he_groups(&config);
    let runner = ReplayRunner::new();
    let pool = worker_pool(Some(1)).unwrap();
    let driver = SpsaDriver::from_config(&config, ModelVariant::Stochastic, &groups, &runner, &pool);

    let result = driver.run(
        array![1.0, 2.0, 3.0],
        &mut FixedDirection::new(vec![1.0]),
        &mut MemoryProgressLog::default(),
    );
    assert!(matches!(result, Err(FitError::DimensionMismatch { expected: 5, found: 3 })));
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_aic_objective_matches_evaluator() {
    let config = replay_config(0);
    let groups = he_groups(&config);
    let runner = ReplayRunner::new();
    let pool = worker_pool(Some(2)).unwrap();
    let evaluator = ObjectiveEvaluator::new(ModelVariant::Stochastic, &groups, &runner, &pool);
    let seeds = config.seeds.ranges_at(0);

    assert_eq!(evaluator.comparison_points(), 3030);
    let theta = config.starting_theta(ModelVariant::Stochastic);
    let score = evaluator.evaluate(&theta, seeds).unwrap();
    assert_eq!(score.rss, 0.0);
    assert_eq!(score.groups.len(), 6);

    let objective = AicObjective { evaluator: &evaluator, seeds };
    let cost = objective.cost(&theta.to_vec()).unwrap();
    assert_eq!(cost, score.aic);
}
