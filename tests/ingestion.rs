//! File-backed behaviour: simulator output ingestion, empirical data files,
//! the progress log, lineage tables and the process runner.

use ndarray::array;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use lineage_spsa::config::{AppConfig, SeedRanges};
use lineage_spsa::data::{
    comparison_groups, read_count_samples, read_event_samples, EmpiricalData, GroupKind, MitoticMode,
};
use lineage_spsa::diagnostics::IterationReport;
use lineage_spsa::inference::cost_functions::{CandidateScore, GroupFit, PairEvaluation};
use lineage_spsa::error::FitError;
use lineage_spsa::models::ModelVariant;
use lineage_spsa::progress::{IterationRecord, ProgressRecord, ProgressSink, TsvProgressLog};
use lineage_spsa::runner::{
    worker_pool, JobKind, ProcessRunner, Side, SimulationJob, SimulationOutput, SimulationRunner,
    SystemCommandRunner,
};
use lineage_spsa::sequences::{
    check_executables, run_sequence_simulations, write_sequences, LineageTable,
};

fn write(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
}

#[test]
fn test_read_count_samples_tab_and_space_separated() {
    let dir = TempDir::new().unwrap();

    let tabbed = dir.path().join("HeSPSA24Plus");
    write(&tabbed, "seed\tstart\tend\tcount\n0\t23\t72\t12\n1\t25.5\t72\t3\n");
    assert_eq!(read_count_samples(&tabbed).unwrap(), vec![12.0, 3.0]);

    let spaced = dir.path().join("HeSPSA32Plus");
    write(&spaced, "seed start end count\n0 23 72 7\n1  30 72  9\n");
    assert_eq!(read_count_samples(&spaced).unwrap(), vec![7.0, 9.0]);
}

#[test]
fn test_read_event_samples() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("HeSPSARatePlus");
    write(&path, "time\tseed\tcell\tmode\n31.5\t0\t1\t0\n44\t0\t2\t2\n52.25\t1\t1\t1\n");

    let events = read_event_samples(&path).unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].time, 31.5);
    assert_eq!(events[0].mode, MitoticMode::PP);
    assert_eq!(events[1].mode, MitoticMode::DD);
    assert_eq!(events[2].mode, MitoticMode::PD);
}

#[test]
fn test_malformed_output_is_reported() {
    let dir = TempDir::new().unwrap();

    let header_only = dir.path().join("header_only");
    write(&header_only, "seed\tstart\tend\tcount\n");
    assert!(matches!(read_count_samples(&header_only), Err(FitError::MalformedOutput { .. })));

    let empty = dir.path().join("empty");
    write(&empty, "");
    assert!(matches!(read_count_samples(&empty), Err(FitError::MalformedOutput { .. })));

    let short = dir.path().join("short");
    write(&short, "a\tb\n1\t2\n");
    assert!(matches!(
        read_count_samples(&short),
        Err(FitError::MalformedOutput { line: 2, .. })
    ));

    let bad_mode = dir.path().join("bad_mode");
    write(&bad_mode, "time\tseed\tcell\tmode\n31\t0\t1\t7\n");
    assert!(matches!(read_event_samples(&bad_mode), Err(FitError::MalformedOutput { .. })));

    let missing = dir.path().join("missing");
    assert!(matches!(read_count_samples(&missing), Err(FitError::MissingDataFile(_))));
}

#[test]
fn test_empirical_data_from_csv() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("observations.csv");
    write(
        &path,
        "# group, lineages, counts...\ncount24,4,1,2,1\nratePP,60,8,23,16\n",
    );

    let data = EmpiricalData::from_csv(&path).unwrap();
    assert_eq!(data.groups.len(), 2);
    let count = data.group(GroupKind::Count { induction_time: 24 }).unwrap();
    assert_eq!(count.lineages, 4);
    assert_eq!(count.observed, vec![1.0, 2.0, 1.0]);
    assert!(data.group(GroupKind::Rate { mode: MitoticMode::PP }).is_some());

    let bad = dir.path().join("bad.csv");
    write(&bad, "count24,x,1\n");
    assert!(matches!(EmpiricalData::from_csv(&bad), Err(FitError::MalformedOutput { .. })));

    assert!(matches!(
        EmpiricalData::from_csv(&dir.path().join("absent.csv")),
        Err(FitError::MissingDataFile(_))
    ));
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fit.toml");
    let mut config = AppConfig::default();
    config.rng_seed = Some(17);
    config.modes = vec![ModelVariant::Stochastic];
    write(&path, &config.to_toml_string().unwrap());

    let loaded = AppConfig::from_file(&path).unwrap();
    assert_eq!(loaded.rng_seed, Some(17));
    assert_eq!(loaded.modes, vec![ModelVariant::Stochastic]);

    assert!(matches!(
        AppConfig::from_file(&dir.path().join("none.toml")),
        Err(FitError::MissingDataFile(_))
    ));
}

#[test]
fn test_tsv_progress_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("SPSA").join("HeSPSAOutput");
    let mut log = TsvProgressLog::create(&path).unwrap();

    let mode = ModelVariant::Stochastic;
    log.append(&ProgressRecord::RunStarted { mode, started: chrono::Local::now() }).unwrap();
    log.append(&ProgressRecord::Estimate { k: 0, theta: array![8.0, 7.0, 0.2, 0.4, 0.2] }).unwrap();
    log.append(&ProgressRecord::Iteration(IterationRecord {
        k: 0,
        theta: array![8.0, 7.0, 0.2, 0.4, 0.2],
        theta_plus: array![8.5, 7.5, 0.225, 0.425, 0.225],
        theta_minus: array![7.5, 6.5, 0.175, 0.375, 0.175],
        aic_plus: -120.5,
        aic_minus: -121.0,
        ak: 0.007,
        ck: 0.5,
        ghat: array![0.5, 0.5, 0.5, 0.5, 0.5],
    }))
    .unwrap();

    // Flushed per record: readable before the run finishes.
    let partial = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = partial.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("# Began SPSA optimisation of stochastic model"));
    assert!(lines[1].starts_with("k\tphase2\tphase3"));
    assert_eq!(lines[2], "estimate\t0\t8\t7\t0.2\t0.4\t0.2");
    assert_eq!(lines[3].split('\t').count(), 1 + 5 * 3 + 4 + 5);
    assert!(lines[3].starts_with("0\t8\t7\t0.2"));

    log.append(&ProgressRecord::Finished { mode, k: 1, theta: array![8.0, 7.0, 0.2, 0.4, 0.2] })
        .unwrap();
    let full = fs::read_to_string(&path).unwrap();
    assert_eq!(full.lines().last(), Some("1\t8\t7\t0.2\t0.4\t0.2"));
}

#[test]
fn test_iteration_report_centres_are_display_densities() {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.histograms.band_draws = 50;
    let groups = comparison_groups(
        &EmpiricalData::he_2012(),
        &config.simulation.induction_times,
        &config.histograms,
    )
    .unwrap();

    // Plus side has real samples; the minus side simulated nothing. The stored
    // comparison histograms are deliberately zero so only the samples count.
    let fits = |with_samples: bool| CandidateScore {
        aic: 0.0,
        rss: 0.0,
        groups: groups
            .iter()
            .map(|group| {
                let samples = match group.kind {
                    _ if !with_samples => Vec::new(),
                    GroupKind::Count { .. } => (0..200).map(|i| (i % 60 + 1) as f64).collect(),
                    GroupKind::Rate { .. } => (0..200).map(|i| 30.0 + (i % 50) as f64).collect(),
                };
                GroupFit {
                    kind: group.kind,
                    samples,
                    simulated: ndarray::Array1::zeros(group.bins.n_bins()),
                    rss: 0.0,
                }
            })
            .collect(),
    };
    let evaluation = PairEvaluation { plus: fits(true), minus: fits(false) };

    let report = IterationReport::new(dir.path(), &config.histograms, 7).unwrap();
    let path = report.write(ModelVariant::Stochastic, 3, &groups, &evaluation).unwrap();
    assert_eq!(path, dir.path().join("report_stochastic_003.csv"));

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    let value = |row: &csv::StringRecord, column: usize| row[column].parse::<f64>().unwrap();

    for group in &groups {
        let name = group.kind.to_string();
        let width = match group.kind {
            GroupKind::Count { .. } => 1.0,
            GroupKind::Rate { .. } => config.histograms.rate_bin_width,
        };
        let shown: Vec<_> = rows.iter().filter(|r| r[0] == name).collect();
        assert!(!shown.is_empty(), "{name} missing from report");

        let plus_mass: f64 = shown.iter().map(|r| value(r, 3) * width).sum();
        assert!((plus_mass - 1.0).abs() < 1e-9, "{name}: plus integrates to {plus_mass}");
        assert!(shown.iter().all(|r| value(r, 4) >= 0.0));
        assert!(shown.iter().all(|r| value(r, 5) == 0.0 && value(r, 6) == 0.0));

        if let GroupKind::Count { .. } = group.kind {
            assert_eq!(shown.len(), config.histograms.display_count_bins);
            let empirical_mass: f64 = shown.iter().map(|r| value(r, 2)).sum();
            assert!((empirical_mass - 1.0).abs() < 1e-9, "{name}: empirical integrates to {empirical_mass}");
        }
    }
}

#[test]
fn test_lineage_table_and_sequence_output() {
    let dir = TempDir::new().unwrap();
    let table_path = dir.path().join("lineages.tsv");
    write(
        &table_path,
        "lineage\tevent\tparent\tmode\n1\t1\t0\t0\n1\t2\t1\t2\n1\t3\t1\t2\n2\t1\t0\t2\n",
    );

    let table = LineageTable::load(&table_path).unwrap();
    assert_eq!(table.len(), 2);

    let out = dir.path().join("out").join("sequences.tsv");
    write_sequences(&out, &["02".to_string(), "2".to_string()]).unwrap();
    let written = fs::read_to_string(&out).unwrap();
    assert_eq!(written, "Entry\tSequence\n1\t02\n2\t2\n");
}

fn seeds() -> SeedRanges {
    SeedRanges { start: 0, count_end: 999, rate_end: 249 }
}

#[test]
fn test_missing_simulator_is_fatal() {
    let mut settings = AppConfig::default().simulation;
    settings.executable = "/nonexistent/HeSimulator".into();
    let result = ProcessRunner::new(&settings, Default::default());
    assert!(matches!(result, Err(FitError::MissingExecutable(_))));
}

#[test]
fn test_process_runner_arguments() {
    let dir = TempDir::new().unwrap();
    let exe = dir.path().join("HeSimulator");
    write(&exe, "");
    let mut settings = AppConfig::default().simulation;
    settings.executable = exe;
    settings.output_root = dir.path().to_path_buf();
    let runner = ProcessRunner::new(&settings, Default::default()).unwrap();

    let theta = array![8.0, 7.0, 0.2, 0.4, 0.2];
    let job = SimulationJob::new(
        ModelVariant::Stochastic,
        JobKind::Counts { induction_time: 32 },
        Side::Minus,
        theta.clone(),
        seeds(),
    );
    assert_eq!(job.name, "HeSPSA32Minus");
    assert_eq!(runner.output_path(&job), dir.path().join("SPSA").join("HeSPSA32Minus"));
    assert_eq!(
        runner.arguments(&job).unwrap(),
        vec![
            "SPSA", "HeSPSA32Minus", "0", "0", "0", "0", "0", "0", "999", "32", "23", "39", "72",
            "8", "7", "1", "0", "0.2", "0.4", "0.2", "0",
        ]
    );

    let rate = SimulationJob::new(ModelVariant::Stochastic, JobKind::Events, Side::Plus, theta, seeds());
    let args = runner.arguments(&rate).unwrap();
    assert_eq!(&args[..13], &[
        "SPSA", "HeSPSARatePlus", "1", "0", "0", "0", "0", "0", "249", "23", "23", "39", "80",
    ]);
}

#[cfg(unix)]
mod process {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{Mutex, MutexGuard};

    // Writing a script while another test forks can leave it busy for exec.
    static SPAWN: Mutex<()> = Mutex::new(());

    fn spawn_lock() -> MutexGuard<'static, ()> {
        SPAWN.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("simulator.sh");
        write(&path, &format!("#!/bin/sh\n{body}\n"));
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn runner(dir: &Path, body: &str) -> ProcessRunner {
        fs::create_dir_all(dir.join("SPSA")).unwrap();
        let mut settings = AppConfig::default().simulation;
        settings.executable = script(dir, body);
        settings.output_root = dir.to_path_buf();
        ProcessRunner::new(&settings, Default::default()).unwrap()
    }

    fn count_job() -> SimulationJob {
        SimulationJob::new(
            ModelVariant::Stochastic,
            JobKind::Counts { induction_time: 24 },
            Side::Plus,
            array![8.0, 7.0, 0.2, 0.4, 0.2],
            seeds(),
        )
    }

    #[test]
    fn test_runner_ingests_simulator_output() {
        let _guard = spawn_lock();
        let dir = TempDir::new().unwrap();
        let body = format!(
            "printf 'seed\\tstart\\tend\\tcount\\n0\\t23\\t72\\t5\\n1\\t24\\t72\\t8\\n' > '{}/'\"$1/$2\"",
            dir.path().display()
        );
        let runner = runner(dir.path(), &body);
        let output = runner.run(&count_job()).unwrap();
        assert_eq!(output, SimulationOutput::Counts(vec![5.0, 8.0]));
    }

    #[test]
    fn test_nonzero_exit_is_a_simulation_failure() {
        let _guard = spawn_lock();
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path(), "echo boom >&2\nexit 3");
        let err = runner.run(&count_job()).unwrap_err();
        match err {
            FitError::SimulationFailure { job, reason } => {
                assert_eq!(job, "HeSPSA24Plus");
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_stale_output_is_not_reused() {
        let _guard = spawn_lock();
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path(), "exit 0");
        let job = count_job();
        write(&runner.output_path(&job), "seed\tstart\tend\tcount\n0\t23\t72\t5\n");
        assert!(matches!(runner.run(&job), Err(FitError::SimulationFailure { .. })));
    }

    #[test]
    fn test_sequence_simulations_spawn_each_executable() {
        let _guard = spawn_lock();
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let body = format!("echo \"$2\" >> '{}'", marker.display());
        let exe = script(dir.path(), &body);

        let mut settings = AppConfig::default().sequences;
        for run in &mut settings.runs {
            run.executable = exe.clone();
        }
        check_executables(&settings).unwrap();
        let pool = worker_pool(Some(2)).unwrap();
        run_sequence_simulations(&settings, &SystemCommandRunner, &pool).unwrap();

        let mut ran: Vec<String> = fs::read_to_string(&marker).unwrap().lines().map(String::from).collect();
        ran.sort();
        assert_eq!(ran, ["Boije", "Deterministic", "Gomes", "He", "HeRefit"]);

        settings.runs[2].executable = dir.path().join("missing");
        assert!(matches!(check_executables(&settings), Err(FitError::MissingExecutable(_))));

        let bad = dir.path().join("bad");
        fs::create_dir(&bad).unwrap();
        settings.runs[2].executable = script(&bad, "exit 4");
        assert!(matches!(
            run_sequence_simulations(&settings, &SystemCommandRunner, &pool),
            Err(FitError::SimulationFailure { .. })
        ));
    }
}
