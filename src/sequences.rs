// src/sequences.rs

//! Mitotic-mode sequences (e.g. `0112`): simulator runs that sample them from
//! each model, and random traversals of empirically traced lineages that
//! produce the matching reference file.

use crate::config::SequenceSettings;
use crate::data::{load_table, MitoticMode};
use crate::error::{FitError, Result};
use crate::runner::{dispatch_commands, CommandRunner, ProcessCommand};

use log::info;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineageEvent {
    pub event: u32,
    pub parent: u32,
    pub mode: MitoticMode,
}

/// Traced mitoses grouped by lineage id.
#[derive(Debug, Clone, Default)]
pub struct LineageTable {
    lineages: HashMap<u32, Vec<LineageEvent>>,
}

impl LineageTable {
    /// Columns: lineage id, event id, parent event id, mitotic mode.
    pub fn load(path: &Path) -> Result<Self> {
        let rows = load_table(path, &[0, 1, 2, 3])?;
        let mut table = Self::default();
        for (i, row) in rows.iter().enumerate() {
            let mode = MitoticMode::from_code(row[3]).ok_or_else(|| FitError::MalformedOutput {
                path: path.to_path_buf(),
                line: i + 2,
                reason: format!("unknown mitotic mode {}", row[3]),
            })?;
            table.insert(
                row[0] as u32,
                LineageEvent { event: row[1] as u32, parent: row[2] as u32, mode },
            );
        }
        Ok(table)
    }

    pub fn insert(&mut self, lineage: u32, event: LineageEvent) {
        self.lineages.entry(lineage).or_default().push(event);
    }

    pub fn len(&self) -> usize {
        self.lineages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lineages.is_empty()
    }

    /// Walks one lineage from its first mitosis. After a PD division the walk
    /// follows the progenitor daughter only half the time; a DD division or a
    /// childless event ends it.
    pub fn traverse<R: Rng + ?Sized>(&self, lineage: u32, rng: &mut R) -> Result<String> {
        let events = self.lineages.get(&lineage).map(Vec::as_slice).unwrap_or_default();
        let root = events.iter().find(|e| e.event == 1).ok_or_else(|| {
            FitError::Config(format!("lineage {lineage} has no first mitotic event"))
        })?;

        let mut sequence = root.mode.code().to_string();
        let (mut current, mut mode) = (root.event, root.mode);

        while mode != MitoticMode::DD {
            if mode == MitoticMode::PD && rng.gen::<f64>() < 0.5 {
                break;
            }
            let children: Vec<&LineageEvent> = events.iter().filter(|e| e.parent == current).collect();
            if children.is_empty() {
                break;
            }
            let child = children[rng.gen_range(0..children.len())];
            current = child.event;
            mode = child.mode;
            sequence.push_str(&mode.code().to_string());
        }
        Ok(sequence)
    }
}

/// Draws `samples` sequences, each from a lineage chosen uniformly in
/// `1..traversal_lineages`.
pub fn sample_sequences(
    table: &LineageTable,
    samples: usize,
    traversal_lineages: u32,
    seed: u64,
) -> Result<Vec<String>> {
    if traversal_lineages < 2 {
        return Err(FitError::Config("traversal_lineages must be at least 2".into()));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..samples)
        .map(|_| {
            let lineage = rng.gen_range(1..traversal_lineages);
            table.traverse(lineage, &mut rng)
        })
        .collect()
}

pub fn write_sequences(path: &Path, sequences: &[String]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["Entry", "Sequence"])?;
    for (i, sequence) in sequences.iter().enumerate() {
        writer.write_record([(i + 1).to_string(), sequence.clone()])?;
    }
    writer.flush()?;
    Ok(())
}

// =================================================================================
// Simulated sequences
// =================================================================================

/// One command per configured run, in configuration order.
pub fn sequence_commands(settings: &SequenceSettings) -> Vec<ProcessCommand> {
    settings
        .runs
        .iter()
        .map(|run| {
            let mut args = vec![
                settings.directory.clone(),
                run.name.clone(),
                settings.output_mode.to_string(),
            ];
            args.extend(run.leading.iter().map(|v| v.to_string()));
            args.extend([
                settings.debug_output.to_string(),
                settings.start_seed.to_string(),
                settings.end_seed.to_string(),
            ]);
            args.extend(run.trailing.iter().map(|v| v.to_string()));
            ProcessCommand { name: run.name.clone(), program: run.executable.clone(), args }
        })
        .collect()
}

/// Fails on the first configured simulator missing from disk.
pub fn check_executables(settings: &SequenceSettings) -> Result<()> {
    match settings.runs.iter().find(|run| !run.executable.is_file()) {
        Some(run) => Err(FitError::MissingExecutable(run.executable.clone())),
        None => Ok(()),
    }
}

/// Runs every configured simulator on `pool` and waits for all of them.
pub fn run_sequence_simulations<R: CommandRunner + ?Sized>(
    settings: &SequenceSettings,
    runner: &R,
    pool: &rayon::ThreadPool,
) -> Result<()> {
    let commands = sequence_commands(settings);
    info!(
        "starting {} sequence simulations on {} workers",
        commands.len(),
        pool.current_num_threads()
    );
    for command in &commands {
        info!("executing {command}");
    }
    dispatch_commands(&commands, runner, pool)
}

/// Where the empirical sequences land alongside the simulated ones.
pub fn empirical_output_path(settings: &SequenceSettings, output_root: &Path) -> PathBuf {
    output_root.join(&settings.directory).join(&settings.empirical_name)
}
