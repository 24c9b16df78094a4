// src/data.rs

//! Empirical reference histograms, comparison groups and ingestion of
//! simulator output tables.

use crate::config::HistogramSettings;
use crate::error::{FitError, Result};
use crate::utils::BinSchedule;

use ndarray::Array1;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MitoticMode {
    /// Proliferative: both daughters divide again.
    PP,
    PD,
    /// Differentiative: both daughters exit the cycle.
    DD,
}

impl MitoticMode {
    pub const ALL: [MitoticMode; 3] = [MitoticMode::PP, MitoticMode::PD, MitoticMode::DD];

    pub fn from_code(code: f64) -> Option<Self> {
        match code as i64 {
            0 if code == 0.0 => Some(MitoticMode::PP),
            1 if code == 1.0 => Some(MitoticMode::PD),
            2 if code == 2.0 => Some(MitoticMode::DD),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            MitoticMode::PP => 0,
            MitoticMode::PD => 1,
            MitoticMode::DD => 2,
        }
    }
}

impl fmt::Display for MitoticMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MitoticMode::PP => "PP",
            MitoticMode::PD => "PD",
            MitoticMode::DD => "DD",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MitoticEvent {
    pub time: f64,
    pub mode: MitoticMode,
}

/// Which simulated variable a comparison group looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// Clone sizes of lineages induced at `induction_time` hours.
    Count { induction_time: u32 },
    /// Timing of one mitotic mode across all lineages.
    Rate { mode: MitoticMode },
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKind::Count { induction_time } => write!(f, "count{induction_time}"),
            GroupKind::Rate { mode } => write!(f, "rate{mode}"),
        }
    }
}

/// Raw observation counts for one group, as published.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedGroup {
    pub kind: GroupKind,
    pub observed: Vec<f64>,
    pub lineages: usize,
}

/// The full empirical reference set. Loaded once, read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct EmpiricalData {
    pub groups: Vec<ObservedGroup>,
}

// =================================================================================
// He et al. (2012) zebrafish retina lineage observations
// =================================================================================

const HE_24_COUNTS: [f64; 22] = [
    0., 0., 1., 0., 1., 2., 0., 7., 4., 9., 6., 5., 5., 6., 5., 5., 1., 2., 2., 2., 0., 1.,
];
const HE_32_COUNTS: [f64; 24] = [
    6., 20., 25., 22., 24., 17., 11., 7., 8., 5., 6., 3., 1., 6., 4., 1., 0., 0., 0., 2., 0., 0.,
    0., 1.,
];
const HE_48_COUNTS: [f64; 8] = [59., 86., 2., 12., 1., 2., 0., 1.];

// Lineages giving each mitotic mode per 5 h bin from 30 h, out of 60 followed.
const HE_PP_EVENTS: [f64; 10] = [8., 23., 16., 10., 3., 1., 0., 0., 0., 0.];
const HE_PD_EVENTS: [f64; 10] = [2., 21., 7., 10., 2., 0., 0., 0., 0., 0.];
const HE_DD_EVENTS: [f64; 10] = [0., 3., 13., 26., 33., 29., 16., 3., 4., 0.];
const HE_EVENT_LINEAGES: usize = 60;

impl EmpiricalData {
    pub fn he_2012() -> Self {
        let count = |induction_time: u32, observed: &[f64], lineages: usize| ObservedGroup {
            kind: GroupKind::Count { induction_time },
            observed: observed.to_vec(),
            lineages,
        };
        let rate = |mode: MitoticMode, observed: &[f64]| ObservedGroup {
            kind: GroupKind::Rate { mode },
            observed: observed.to_vec(),
            lineages: HE_EVENT_LINEAGES,
        };
        Self {
            groups: vec![
                count(24, &HE_24_COUNTS, 64),
                count(32, &HE_32_COUNTS, 169),
                count(48, &HE_48_COUNTS, 163),
                rate(MitoticMode::PP, &HE_PP_EVENTS),
                rate(MitoticMode::PD, &HE_PD_EVENTS),
                rate(MitoticMode::DD, &HE_DD_EVENTS),
            ],
        }
    }

    /// Loads observations from a CSV with rows `group,lineages,n0,n1,...`, where
    /// `group` is `count<hours>` or `rate<PP|PD|DD>`. Lines starting with `#`
    /// are ignored.
    pub fn from_csv(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(FitError::MissingDataFile(path.to_path_buf()));
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut groups = Vec::new();
        for (line, result) in reader.records().enumerate() {
            let record = result?;
            let malformed = |reason: String| FitError::MalformedOutput {
                path: path.to_path_buf(),
                line: line + 1,
                reason,
            };
            if record.len() < 3 {
                return Err(malformed("expected group, lineages and at least one count".into()));
            }
            let kind = parse_group_label(&record[0])
                .ok_or_else(|| malformed(format!("unknown group `{}`", &record[0])))?;
            let lineages: usize = record[1]
                .parse()
                .map_err(|e| malformed(format!("bad lineage count: {e}")))?;
            let observed = record
                .iter()
                .skip(2)
                .map(|field| field.parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| malformed(format!("bad observation: {e}")))?;
            groups.push(ObservedGroup { kind, observed, lineages });
        }
        Ok(Self { groups })
    }

    pub fn group(&self, kind: GroupKind) -> Option<&ObservedGroup> {
        self.groups.iter().find(|g| g.kind == kind)
    }
}

fn parse_group_label(label: &str) -> Option<GroupKind> {
    if let Some(hours) = label.strip_prefix("count") {
        return hours.parse().ok().map(|induction_time| GroupKind::Count { induction_time });
    }
    let mode = match label.strip_prefix("rate")? {
        "PP" => MitoticMode::PP,
        "PD" => MitoticMode::PD,
        "DD" => MitoticMode::DD,
        _ => return None,
    };
    Some(GroupKind::Rate { mode })
}

/// One empirical reference histogram, ready to compare against simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonGroup {
    pub kind: GroupKind,
    pub bins: BinSchedule,
    /// Normalised reference densities, one per bin.
    pub empirical: Array1<f64>,
    pub lineages_sampled: usize,
}

impl ComparisonGroup {
    pub fn from_observed(observed: &ObservedGroup, settings: &HistogramSettings) -> Result<Self> {
        let bins = match observed.kind {
            GroupKind::Count { .. } => count_bins(settings.count_bins),
            GroupKind::Rate { .. } => rate_bins(settings),
        };
        if observed.observed.len() > bins.n_bins() {
            return Err(FitError::Config(format!(
                "{} has {} observed bins but the schedule only has {}",
                observed.kind,
                observed.observed.len(),
                bins.n_bins()
            )));
        }
        if observed.lineages == 0 {
            return Err(FitError::Config(format!("{} has zero lineages sampled", observed.kind)));
        }

        let mut padded = Array1::zeros(bins.n_bins());
        for (slot, &value) in padded.iter_mut().zip(&observed.observed) {
            *slot = value;
        }
        let empirical = bins.scale_counts(&padded, observed.lineages as f64);

        Ok(Self {
            kind: observed.kind,
            bins,
            empirical,
            lineages_sampled: observed.lineages,
        })
    }

    pub fn comparison_points(&self) -> usize {
        self.bins.n_bins()
    }
}

/// Builds the comparison groups the objective aggregates over: one count group
/// per induction time, then one rate group per mitotic mode.
pub fn comparison_groups(
    data: &EmpiricalData,
    induction_times: &[u32],
    settings: &HistogramSettings,
) -> Result<Vec<ComparisonGroup>> {
    let kinds = induction_times
        .iter()
        .map(|&induction_time| GroupKind::Count { induction_time })
        .chain(MitoticMode::ALL.iter().map(|&mode| GroupKind::Rate { mode }));

    kinds
        .map(|kind| {
            let observed = data.group(kind).ok_or_else(|| {
                FitError::Config(format!("no empirical observations for group {kind}"))
            })?;
            ComparisonGroup::from_observed(observed, settings)
        })
        .collect()
}

pub fn count_bins(n: usize) -> BinSchedule {
    BinSchedule::uniform(1.0, 1.0, n)
}

pub fn rate_bins(settings: &HistogramSettings) -> BinSchedule {
    let n = ((settings.rate_end - settings.rate_start) / settings.rate_bin_width).round() as usize;
    BinSchedule::uniform(settings.rate_start, settings.rate_bin_width, n)
}

// =================================================================================
// Simulator output ingestion
// =================================================================================

/// Reads a simulator table (one header row, tab- or space-separated columns)
/// and returns the requested numeric columns for every row.
pub fn load_table(path: &Path, columns: &[usize]) -> Result<Vec<Vec<f64>>> {
    if !path.is_file() {
        return Err(FitError::MissingDataFile(path.to_path_buf()));
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    if reader.headers()?.is_empty() {
        return Err(FitError::MalformedOutput {
            path: path.to_path_buf(),
            line: 1,
            reason: "file is empty".into(),
        });
    }

    let mut rows = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result?;
        let fields: Vec<&str> = if record.len() == 1 {
            record[0].split_whitespace().collect()
        } else {
            record.iter().collect()
        };
        if fields.is_empty() {
            continue;
        }
        let row = columns
            .iter()
            .map(|&c| {
                let field = fields.get(c).ok_or_else(|| FitError::MalformedOutput {
                    path: path.to_path_buf(),
                    line: i + 2,
                    reason: format!("missing column {c}"),
                })?;
                field.parse::<f64>().map_err(|e| FitError::MalformedOutput {
                    path: path.to_path_buf(),
                    line: i + 2,
                    reason: format!("column {c}: {e}"),
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(FitError::MalformedOutput {
            path: path.to_path_buf(),
            line: 1,
            reason: "no data rows".into(),
        });
    }
    Ok(rows)
}

/// Lineage sizes from a count-mode output file (fourth column).
pub fn read_count_samples(path: &Path) -> Result<Vec<f64>> {
    Ok(load_table(path, &[3])?.into_iter().map(|row| row[0]).collect())
}

/// Mitotic events from an event-mode output file: time (first column) and
/// mode code (fourth column).
pub fn read_event_samples(path: &Path) -> Result<Vec<MitoticEvent>> {
    load_table(path, &[0, 3])?
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let mode = MitoticMode::from_code(row[1]).ok_or_else(|| FitError::MalformedOutput {
                path: path.to_path_buf(),
                line: i + 2,
                reason: format!("unknown mitotic mode {}", row[1]),
            })?;
            Ok(MitoticEvent { time: row[0], mode })
        })
        .collect()
}
