// src/runner.rs

//! Simulation runner seam and parallel batch dispatch.
//!
//! One iteration submits a batch of independent jobs (one per candidate per
//! simulator output kind), blocks until all of them finish and collects the
//! parsed samples. The first failing job fails the whole batch.
//!
//! Plain commands whose output is consumed elsewhere go through the same pool
//! via [`CommandRunner`].

use crate::config::{SeedRanges, SimulationSettings};
use crate::data::{read_count_samples, read_event_samples, MitoticEvent};
use crate::error::{FitError, Result};
use crate::models::parameters::FixedProbabilities;
use crate::models::ModelVariant;

use log::debug;
use ndarray::Array1;
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Plus,
    Minus,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Plus => write!(f, "Plus"),
            Side::Minus => write!(f, "Minus"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Lineage sizes at a fixed time after induction.
    Counts { induction_time: u32 },
    /// Every mitotic event with its time and mode.
    Events,
}

/// One unit of work: a single simulator invocation.
#[derive(Debug, Clone)]
pub struct SimulationJob {
    /// Output file name, unique within an iteration.
    pub name: String,
    pub side: Side,
    pub kind: JobKind,
    pub mode: ModelVariant,
    pub theta: Array1<f64>,
    pub seeds: SeedRanges,
}

impl SimulationJob {
    pub fn new(
        mode: ModelVariant,
        kind: JobKind,
        side: Side,
        theta: Array1<f64>,
        seeds: SeedRanges,
    ) -> Self {
        let name = match kind {
            JobKind::Counts { induction_time } => {
                format!("{}{}{}", mode.file_stem(), induction_time, side)
            }
            JobKind::Events => format!("{}Rate{}", mode.file_stem(), side),
        };
        Self { name, side, kind, mode, theta, seeds }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimulationOutput {
    Counts(Vec<f64>),
    Events(Vec<MitoticEvent>),
}

pub trait SimulationRunner: Sync {
    fn run(&self, job: &SimulationJob) -> Result<SimulationOutput>;
}

/// Runs every job on `pool` and returns outputs in job order.
pub fn dispatch_batch<R: SimulationRunner + ?Sized>(
    jobs: &[SimulationJob],
    runner: &R,
    pool: &rayon::ThreadPool,
) -> Result<Vec<SimulationOutput>> {
    pool.install(|| jobs.par_iter().map(|job| runner.run(job)).collect())
}

/// Worker pool sized to `threads`, or to the available cores when `None`.
pub fn worker_pool(threads: Option<usize>) -> Result<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("sim-worker-{i}"));
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| FitError::Config(format!("could not build worker pool: {e}")))
}

/// Invokes the external simulator executable and ingests the file it writes.
pub struct ProcessRunner {
    executable: PathBuf,
    settings: SimulationSettings,
    fixed: FixedProbabilities,
}

impl ProcessRunner {
    pub fn new(settings: &SimulationSettings, fixed: FixedProbabilities) -> Result<Self> {
        if !settings.executable.is_file() {
            return Err(FitError::MissingExecutable(settings.executable.clone()));
        }
        Ok(Self {
            executable: settings.executable.clone(),
            settings: settings.clone(),
            fixed,
        })
    }

    pub fn output_path(&self, job: &SimulationJob) -> PathBuf {
        self.settings
            .output_root
            .join(&self.settings.directory)
            .join(&job.name)
    }

    /// Command-line arguments in the order the simulator expects.
    pub fn arguments(&self, job: &SimulationJob) -> Result<Vec<String>> {
        let s = &self.settings;
        let mut args = vec![s.directory.clone(), job.name.clone()];
        match job.kind {
            JobKind::Events => {
                args.extend([
                    s.event_output_mode.to_string(),
                    job.mode.simulator_flag().to_string(),
                    s.fixture.to_string(),
                    s.ath5founder.to_string(),
                    s.debug_output.to_string(),
                    job.seeds.start.to_string(),
                    job.seeds.rate_end.to_string(),
                    // Induction and lineage start both sit at the earliest start time.
                    s.earliest_lineage_start_time.to_string(),
                    s.earliest_lineage_start_time.to_string(),
                    s.latest_lineage_start_time.to_string(),
                    s.rate_end_time.to_string(),
                ]);
            }
            JobKind::Counts { induction_time } => {
                args.extend([
                    s.count_output_mode.to_string(),
                    job.mode.simulator_flag().to_string(),
                    s.fixture.to_string(),
                    s.ath5founder.to_string(),
                    s.debug_output.to_string(),
                    job.seeds.start.to_string(),
                    job.seeds.count_end.to_string(),
                    induction_time.to_string(),
                    s.earliest_lineage_start_time.to_string(),
                    s.latest_lineage_start_time.to_string(),
                    s.end_time.to_string(),
                ]);
            }
        }
        args.extend(job.mode.simulator_arguments(&job.theta, &self.fixed)?);
        Ok(args)
    }

    fn ingest(&self, job: &SimulationJob, path: &Path) -> Result<SimulationOutput> {
        let output = match job.kind {
            JobKind::Counts { .. } => read_count_samples(path).map(SimulationOutput::Counts),
            JobKind::Events => read_event_samples(path).map(SimulationOutput::Events),
        };
        output.map_err(|e| FitError::simulation(&job.name, e.to_string()))
    }
}

impl SimulationRunner for ProcessRunner {
    fn run(&self, job: &SimulationJob) -> Result<SimulationOutput> {
        let args = self.arguments(job)?;
        let path = self.output_path(job);

        // A leftover file from the previous iteration must not pass for fresh output.
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        run_process(&self.executable, &args, &job.name)?;
        if !path.is_file() {
            return Err(FitError::simulation(
                &job.name,
                format!("no output file at {}", path.display()),
            ));
        }
        self.ingest(job, &path)
    }
}

// =================================================================================
// Plain commands
// =================================================================================

/// An external program invocation whose only result is its exit status.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessCommand {
    /// Label used in logs and errors.
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program.display(), self.args.join(" "))
    }
}

pub trait CommandRunner: Sync {
    fn execute(&self, command: &ProcessCommand) -> Result<()>;
}

/// Spawns each command as a child process.
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn execute(&self, command: &ProcessCommand) -> Result<()> {
        run_process(&command.program, &command.args, &command.name)
    }
}

/// Runs every command on `pool` and blocks until all have exited.
pub fn dispatch_commands<R: CommandRunner + ?Sized>(
    commands: &[ProcessCommand],
    runner: &R,
    pool: &rayon::ThreadPool,
) -> Result<()> {
    pool.install(|| commands.par_iter().try_for_each(|command| runner.execute(command)))
}

/// Runs `program` to completion. A spawn error or non-zero exit becomes a
/// [`FitError::SimulationFailure`] carrying the child's stderr.
fn run_process(program: &Path, args: &[String], name: &str) -> Result<()> {
    debug!("executing {} {}", program.display(), args.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| FitError::simulation(name, format!("failed to spawn: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FitError::simulation(
            name,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }
    Ok(())
}
