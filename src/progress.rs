// src/progress.rs

//! Append-only record of a fitting run. The optimizer never reads it back.

use crate::error::Result;
use crate::models::ModelVariant;

use chrono::{DateTime, Local};
use ndarray::Array1;
use std::fs::{self, File};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub k: usize,
    pub theta: Array1<f64>,
    pub theta_plus: Array1<f64>,
    pub theta_minus: Array1<f64>,
    pub aic_plus: f64,
    pub aic_minus: f64,
    pub ak: f64,
    pub ck: f64,
    pub ghat: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressRecord {
    RunStarted {
        mode: ModelVariant,
        started: DateTime<Local>,
    },
    /// Estimate entering iteration `k`, written before anything is simulated.
    Estimate {
        k: usize,
        theta: Array1<f64>,
    },
    Iteration(IterationRecord),
    Finished {
        mode: ModelVariant,
        k: usize,
        theta: Array1<f64>,
    },
}

pub trait ProgressSink {
    fn append(&mut self, record: &ProgressRecord) -> Result<()>;
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryProgressLog {
    pub records: Vec<ProgressRecord>,
}

impl MemoryProgressLog {
    pub fn iterations(&self) -> impl Iterator<Item = &IterationRecord> {
        self.records.iter().filter_map(|r| match r {
            ProgressRecord::Iteration(it) => Some(it),
            _ => None,
        })
    }

    pub fn estimates(&self) -> impl Iterator<Item = (usize, &Array1<f64>)> {
        self.records.iter().filter_map(|r| match r {
            ProgressRecord::Estimate { k, theta } => Some((*k, theta)),
            _ => None,
        })
    }

    pub fn final_theta(&self) -> Option<&Array1<f64>> {
        self.records.iter().rev().find_map(|r| match r {
            ProgressRecord::Finished { theta, .. } => Some(theta),
            _ => None,
        })
    }
}

impl ProgressSink for MemoryProgressLog {
    fn append(&mut self, record: &ProgressRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Tab-separated log file. Every record is flushed as soon as it is written,
/// so a run that stops early leaves every completed iteration on disk.
pub struct TsvProgressLog {
    writer: csv::Writer<File>,
}

impl TsvProgressLog {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .has_headers(false)
            .from_path(path)?;
        Ok(Self { writer })
    }
}

fn fmt_values(values: &Array1<f64>) -> impl Iterator<Item = String> + '_ {
    values.iter().map(|v| v.to_string())
}

impl ProgressSink for TsvProgressLog {
    fn append(&mut self, record: &ProgressRecord) -> Result<()> {
        match record {
            ProgressRecord::RunStarted { mode, started } => {
                self.writer.write_record([format!(
                    "# Began SPSA optimisation of {mode} model @ {}",
                    started.format("%Y-%m-%d %H:%M:%S")
                )])?;
                let names = mode.parameter_names();
                let mut header = vec!["k".to_string()];
                header.extend(names.iter().map(|n| n.to_string()));
                header.extend(names.iter().map(|n| format!("plus_{n}")));
                header.extend(names.iter().map(|n| format!("minus_{n}")));
                header.extend(["AIC_plus", "AIC_minus", "ak", "ck"].map(String::from));
                header.extend(names.iter().map(|n| format!("ghat_{n}")));
                self.writer.write_record(&header)?;
            }
            ProgressRecord::Estimate { k, theta } => {
                let mut row = vec!["estimate".to_string(), k.to_string()];
                row.extend(fmt_values(theta));
                self.writer.write_record(&row)?;
            }
            ProgressRecord::Iteration(it) => {
                let mut row = vec![it.k.to_string()];
                row.extend(fmt_values(&it.theta));
                row.extend(fmt_values(&it.theta_plus));
                row.extend(fmt_values(&it.theta_minus));
                row.extend([it.aic_plus, it.aic_minus, it.ak, it.ck].map(|v| v.to_string()));
                row.extend(fmt_values(&it.ghat));
                self.writer.write_record(&row)?;
            }
            ProgressRecord::Finished { mode, k, theta } => {
                self.writer.write_record([format!("# Final {mode} estimate")])?;
                let mut row = vec![k.to_string()];
                row.extend(fmt_values(theta));
                self.writer.write_record(&row)?;
            }
        }
        self.writer.flush()?;
        Ok(())
    }
}
