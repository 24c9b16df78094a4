// src/inference/cost_functions.rs

//! AIC objective: simulated vs empirical histogram residuals, aggregated over
//! every comparison group.

use crate::config::SeedRanges;
use crate::data::{ComparisonGroup, GroupKind, MitoticEvent, MitoticMode};
use crate::error::{FitError, Result};
use crate::models::ModelVariant;
use crate::runner::{dispatch_batch, JobKind, Side, SimulationJob, SimulationOutput, SimulationRunner};
use crate::utils::{aic, rss};

use argmin::core::{CostFunction, Error};
use ndarray::Array1;

// =================================================================================
// Scores
// =================================================================================

/// Simulated side of one comparison group.
#[derive(Debug, Clone)]
pub struct GroupFit {
    pub kind: GroupKind,
    /// Raw simulated values (lineage sizes or event times).
    pub samples: Vec<f64>,
    pub simulated: Array1<f64>,
    pub rss: f64,
}

#[derive(Debug, Clone)]
pub struct CandidateScore {
    pub aic: f64,
    pub rss: f64,
    pub groups: Vec<GroupFit>,
}

#[derive(Debug, Clone)]
pub struct PairEvaluation {
    pub plus: CandidateScore,
    pub minus: CandidateScore,
}

impl PairEvaluation {
    /// Numerator of the SPSA gradient estimate.
    pub fn difference(&self) -> f64 {
        self.plus.aic - self.minus.aic
    }
}

// =================================================================================
// Evaluator
// =================================================================================

pub struct ObjectiveEvaluator<'a, R: SimulationRunner + ?Sized> {
    pub mode: ModelVariant,
    pub groups: &'a [ComparisonGroup],
    pub runner: &'a R,
    pub pool: &'a rayon::ThreadPool,
}

impl<'a, R: SimulationRunner + ?Sized> ObjectiveEvaluator<'a, R> {
    pub fn new(
        mode: ModelVariant,
        groups: &'a [ComparisonGroup],
        runner: &'a R,
        pool: &'a rayon::ThreadPool,
    ) -> Self {
        Self { mode, groups, runner, pool }
    }

    /// Total number of empirical comparison points, N in the AIC.
    pub fn comparison_points(&self) -> usize {
        self.groups.iter().map(ComparisonGroup::comparison_points).sum()
    }

    /// Jobs needed to score one candidate: one per count group, plus a single
    /// event run shared by every rate group.
    pub fn jobs_for(&self, side: Side, theta: &Array1<f64>, seeds: SeedRanges) -> Vec<SimulationJob> {
        let mut jobs: Vec<SimulationJob> = self
            .groups
            .iter()
            .filter_map(|g| match g.kind {
                GroupKind::Count { induction_time } => Some(JobKind::Counts { induction_time }),
                GroupKind::Rate { .. } => None,
            })
            .map(|kind| SimulationJob::new(self.mode, kind, side, theta.clone(), seeds))
            .collect();
        if self.groups.iter().any(|g| matches!(g.kind, GroupKind::Rate { .. })) {
            jobs.push(SimulationJob::new(self.mode, JobKind::Events, side, theta.clone(), seeds));
        }
        jobs
    }

    /// Simulates both candidates in one batch and scores each side.
    pub fn evaluate_pair(
        &self,
        theta_plus: &Array1<f64>,
        theta_minus: &Array1<f64>,
        seeds: SeedRanges,
    ) -> Result<PairEvaluation> {
        let mut jobs = self.jobs_for(Side::Plus, theta_plus, seeds);
        jobs.extend(self.jobs_for(Side::Minus, theta_minus, seeds));
        let outputs = dispatch_batch(&jobs, self.runner, self.pool)?;

        Ok(PairEvaluation {
            plus: self.score(Side::Plus, &jobs, &outputs, seeds)?,
            minus: self.score(Side::Minus, &jobs, &outputs, seeds)?,
        })
    }

    pub fn evaluate(&self, theta: &Array1<f64>, seeds: SeedRanges) -> Result<CandidateScore> {
        let jobs = self.jobs_for(Side::Plus, theta, seeds);
        let outputs = dispatch_batch(&jobs, self.runner, self.pool)?;
        self.score(Side::Plus, &jobs, &outputs, seeds)
    }

    fn score(
        &self,
        side: Side,
        jobs: &[SimulationJob],
        outputs: &[SimulationOutput],
        seeds: SeedRanges,
    ) -> Result<CandidateScore> {
        let side_outputs: Vec<(&SimulationJob, &SimulationOutput)> = jobs
            .iter()
            .zip(outputs)
            .filter(|(job, _)| job.side == side)
            .collect();

        let groups = self
            .groups
            .iter()
            .map(|group| {
                let samples = group_samples(group.kind, &side_outputs)?;
                let simulated = simulated_histogram(group, &samples, seeds);
                let group_rss = rss(&simulated, &group.empirical);
                Ok(GroupFit { kind: group.kind, samples, simulated, rss: group_rss })
            })
            .collect::<Result<Vec<_>>>()?;

        let total_rss: f64 = groups.iter().map(|g| g.rss).sum();
        Ok(CandidateScore {
            aic: aic(self.mode.aic_parameter_count(), self.comparison_points(), total_rss),
            rss: total_rss,
            groups,
        })
    }
}

/// Pulls the raw values for `kind` out of one side's batch outputs.
fn group_samples(kind: GroupKind, outputs: &[(&SimulationJob, &SimulationOutput)]) -> Result<Vec<f64>> {
    match kind {
        GroupKind::Count { induction_time } => {
            let (job, output) = outputs
                .iter()
                .find(|(job, _)| job.kind == JobKind::Counts { induction_time })
                .ok_or_else(|| FitError::simulation(kind.to_string(), "no batch produced this group"))?;
            match output {
                SimulationOutput::Counts(counts) => Ok(counts.clone()),
                SimulationOutput::Events(_) => {
                    Err(FitError::simulation(&job.name, "expected lineage counts, got events"))
                }
            }
        }
        GroupKind::Rate { mode } => {
            let (job, output) = outputs
                .iter()
                .find(|(job, _)| job.kind == JobKind::Events)
                .ok_or_else(|| FitError::simulation(kind.to_string(), "no batch produced this group"))?;
            match output {
                SimulationOutput::Events(events) => Ok(event_times(events, mode)),
                SimulationOutput::Counts(_) => {
                    Err(FitError::simulation(&job.name, "expected mitotic events, got counts"))
                }
            }
        }
    }
}

fn event_times(events: &[MitoticEvent], mode: MitoticMode) -> Vec<f64> {
    events.iter().filter(|e| e.mode == mode).map(|e| e.time).collect()
}

/// Count groups become a probability density over lineage size. Rate groups
/// become events per simulated lineage per hour.
pub fn simulated_histogram(group: &ComparisonGroup, samples: &[f64], seeds: SeedRanges) -> Array1<f64> {
    match group.kind {
        GroupKind::Count { .. } => group.bins.density(samples),
        GroupKind::Rate { .. } => {
            let counts = group.bins.counts(samples);
            group.bins.scale_counts(&counts, seeds.rate_lineages() as f64)
        }
    }
}

// =================================================================================
// argmin adapter
// =================================================================================

/// AIC of a single candidate at a fixed seed range.
pub struct AicObjective<'e, 'a, R: SimulationRunner + ?Sized> {
    pub evaluator: &'e ObjectiveEvaluator<'a, R>,
    pub seeds: SeedRanges,
}

impl<R: SimulationRunner + ?Sized> CostFunction for AicObjective<'_, '_, R> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> std::result::Result<Self::Output, Error> {
        let theta = Array1::from_vec(p.clone());
        Ok(self.evaluator.evaluate(&theta, self.seeds)?.aic)
    }
}
