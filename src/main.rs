// src/main.rs

//! Command-line entry point: fit model variants, print the default
//! configuration, or sample simulated and empirical mitotic-mode sequences.

use anyhow::{anyhow, Context, Result};
use argmin::core::CostFunction;
use clap::{Args, Parser, Subcommand};
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::time::Instant;

use lineage_spsa::config::AppConfig;
use lineage_spsa::data::{comparison_groups, EmpiricalData};
use lineage_spsa::diagnostics::IterationReport;
use lineage_spsa::inference::cost_functions::AicObjective;
use lineage_spsa::inference::perturbation::Rademacher;
use lineage_spsa::inference::SpsaDriver;
use lineage_spsa::models::ModelVariant;
use lineage_spsa::progress::TsvProgressLog;
use lineage_spsa::runner::{worker_pool, ProcessRunner, SystemCommandRunner};
use lineage_spsa::sequences::{
    check_executables, empirical_output_path, run_sequence_simulations, sample_sequences,
    write_sequences, LineageTable,
};

#[derive(Parser)]
#[command(name = "lineage-spsa")]
#[command(about = "Fit retinal lineage simulators to He et al. (2012) data by SPSA", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the SPSA optimisation for each configured model variant
    Fit(FitArgs),
    /// Print the default configuration as TOML
    Defaults,
    /// Run the sequence-sampling simulators, then sample mitotic-mode
    /// sequences from traced empirical lineages
    Sequences(SequenceArgs),
}

#[derive(Args)]
struct FitArgs {
    /// TOML configuration file; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model variants to fit, in order (stochastic, deterministic)
    #[arg(long, value_delimiter = ',', value_parser = parse_mode)]
    modes: Vec<ModelVariant>,

    /// Last iteration index
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Worker threads for simulator batches
    #[arg(long)]
    threads: Option<usize>,

    /// Perturbation seed
    #[arg(long)]
    seed: Option<u64>,

    /// Empirical observations CSV; the built-in He 2012 data otherwise
    #[arg(long)]
    data: Option<PathBuf>,

    /// Directory for per-iteration histogram reports
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Simulate the final estimate once more and log its AIC
    #[arg(long)]
    score_final: bool,
}

#[derive(Args)]
struct SequenceArgs {
    /// TOML configuration file; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Traced lineage table (lineage, event, parent, mode)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Output TSV for the empirical sequences
    #[arg(long)]
    out: Option<PathBuf>,

    /// Number of empirical sequences to draw; one per seed otherwise
    #[arg(long)]
    samples: Option<usize>,

    /// Lineage ids are drawn from 1 up to, not including, this value
    #[arg(long)]
    traversal_lineages: Option<u32>,

    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads for the simulator runs
    #[arg(long)]
    threads: Option<usize>,

    /// Skip the simulator runs and only traverse the empirical lineages
    #[arg(long)]
    empirical_only: bool,
}

fn parse_mode(s: &str) -> std::result::Result<ModelVariant, String> {
    match s.to_ascii_lowercase().as_str() {
        "stochastic" => Ok(ModelVariant::Stochastic),
        "deterministic" => Ok(ModelVariant::Deterministic),
        other => Err(format!("unknown model variant `{other}`")),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Fit(args) => fit(args),
        Command::Defaults => {
            print!("{}", AppConfig::default().to_toml_string()?);
            Ok(())
        }
        Command::Sequences(args) => sequences(args),
    }
}

fn load_config(args: &FitArgs) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::default(),
    };
    if !args.modes.is_empty() {
        config.modes = args.modes.clone();
    }
    if let Some(k) = args.max_iterations {
        config.spsa.max_iterations = k;
    }
    if args.seed.is_some() {
        config.rng_seed = args.seed;
    }
    if args.report_dir.is_some() {
        config.report_dir = args.report_dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn fit(args: FitArgs) -> Result<()> {
    let config = load_config(&args)?;

    let data = match &args.data {
        Some(path) => EmpiricalData::from_csv(path)
            .with_context(|| format!("loading empirical data from {}", path.display()))?,
        None => EmpiricalData::he_2012(),
    };
    let groups = comparison_groups(&data, &config.simulation.induction_times, &config.histograms)?;

    let pool = worker_pool(args.threads)?;
    let runner = ProcessRunner::new(&config.simulation, config.fixed)
        .context("the simulator must be built before fitting")?;
    let mut log = TsvProgressLog::create(&config.log_path)
        .with_context(|| format!("opening progress log {}", config.log_path.display()))?;

    let seed = config.rng_seed.unwrap_or_else(rand::random);
    info!("perturbation seed: {seed}");
    let mut perturbation = Rademacher::new(ChaCha8Rng::seed_from_u64(seed));

    let report = config
        .report_dir
        .as_deref()
        .map(|dir| IterationReport::new(dir, &config.histograms, seed))
        .transpose()?;

    for &mode in &config.modes {
        let start = Instant::now();
        let mut driver = SpsaDriver::from_config(&config, mode, &groups, &runner, &pool);
        if let Some(report) = &report {
            driver = driver.with_report(report);
        }

        let state = driver
            .run(config.starting_theta(mode), &mut perturbation, &mut log)
            .with_context(|| format!("{mode} run failed"))?;
        info!("{mode} run took {:.2?}", start.elapsed());

        if args.score_final {
            let objective = AicObjective {
                evaluator: &driver.evaluator,
                seeds: config.seeds.ranges_at(state.k.saturating_sub(1)),
            };
            let aic = objective
                .cost(&state.theta.to_vec())
                .map_err(|e| anyhow!("scoring final {mode} estimate: {e}"))?;
            info!("{mode} final estimate AIC = {aic:.4}");
        }
    }
    Ok(())
}

fn sequences(args: SequenceArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::default(),
    };
    let settings = &mut config.sequences;
    if let Some(data) = &args.data {
        settings.empirical_data = data.clone();
    }
    if let Some(n) = args.traversal_lineages {
        settings.traversal_lineages = n;
    }
    if let Some(seed) = args.seed {
        settings.traversal_seed = seed;
    }
    config.validate()?;
    let settings = &config.sequences;

    if !args.empirical_only {
        check_executables(settings).context("the simulators must be built before sampling")?;
        let pool = worker_pool(args.threads)?;
        let start = Instant::now();
        run_sequence_simulations(settings, &SystemCommandRunner, &pool)?;
        info!("sequence simulations took {:.2?}", start.elapsed());
    }

    let table = LineageTable::load(&settings.empirical_data).with_context(|| {
        format!("loading lineage table {}", settings.empirical_data.display())
    })?;
    info!("loaded {} traced lineages", table.len());

    let samples = args.samples.unwrap_or_else(|| settings.sample_count());
    let sequences =
        sample_sequences(&table, samples, settings.traversal_lineages, settings.traversal_seed)?;
    let out = args
        .out
        .unwrap_or_else(|| empirical_output_path(settings, &config.simulation.output_root));
    write_sequences(&out, &sequences)?;
    info!("wrote {} sequences to {}", sequences.len(), out.display());
    Ok(())
}
