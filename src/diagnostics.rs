// src/diagnostics.rs

//! Monitoring output: bootstrap uncertainty bands around simulated histograms
//! and a per-iteration CSV report. Nothing here feeds back into the optimizer.

use crate::config::HistogramSettings;
use crate::data::{count_bins, rate_bins, ComparisonGroup, GroupKind};
use crate::error::Result;
use crate::inference::cost_functions::{GroupFit, PairEvaluation};
use crate::models::ModelVariant;
use crate::utils::{column_std, BinSchedule};

use ndarray::Array1;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Half-width of a ~95% band per bin: twice the standard deviation of the
/// density across `draws` resamples of `resample_size` values.
///
/// A group with no simulated values is resampled from a single zero, so the
/// band is still defined.
pub fn bootstrap_band<R: Rng + ?Sized>(
    samples: &[f64],
    resample_size: usize,
    draws: usize,
    bins: &BinSchedule,
    rng: &mut R,
) -> Array1<f64> {
    let placeholder = [0.0];
    let data: &[f64] = if samples.is_empty() { &placeholder } else { samples };

    let mut resample = vec![0.0; resample_size];
    let rows: Vec<Array1<f64>> = (0..draws)
        .map(|_| {
            for slot in resample.iter_mut() {
                *slot = data[rng.gen_range(0..data.len())];
            }
            bins.density(&resample)
        })
        .collect();

    if rows.is_empty() {
        return Array1::zeros(bins.n_bins());
    }
    column_std(&rows) * 2.0
}

/// Writes `report_<mode>_<k>.csv` files with empirical, simulated and band
/// columns for every comparison group. Every column is a probability density
/// over the display bins, so each simulated value sits at the centre of its band.
pub struct IterationReport {
    dir: PathBuf,
    draws: usize,
    count_display: BinSchedule,
    rate_display: BinSchedule,
    seed: u64,
}

impl IterationReport {
    pub fn new(dir: &Path, settings: &HistogramSettings, seed: u64) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            draws: settings.band_draws,
            count_display: count_bins(settings.display_count_bins),
            rate_display: rate_bins(settings),
            seed,
        })
    }

    fn display_bins(&self, kind: GroupKind) -> &BinSchedule {
        match kind {
            GroupKind::Count { .. } => &self.count_display,
            GroupKind::Rate { .. } => &self.rate_display,
        }
    }

    /// Band for one side of one group, with its own RNG stream.
    fn band(&self, group: &ComparisonGroup, fit: &GroupFit, stream: u64) -> Array1<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(stream);
        bootstrap_band(
            &fit.samples,
            group.lineages_sampled,
            self.draws,
            self.display_bins(group.kind),
            &mut rng,
        )
    }

    pub fn write(
        &self,
        mode: ModelVariant,
        k: usize,
        groups: &[ComparisonGroup],
        evaluation: &PairEvaluation,
    ) -> Result<PathBuf> {
        let bands: Vec<(Array1<f64>, Array1<f64>)> = groups
            .par_iter()
            .enumerate()
            .map(|(i, group)| {
                let stream = (k * groups.len() + i) as u64 * 2;
                (
                    self.band(group, &evaluation.plus.groups[i], stream),
                    self.band(group, &evaluation.minus.groups[i], stream + 1),
                )
            })
            .collect();

        let path = self.dir.join(format!("report_{mode}_{k:03}.csv"));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["group", "bin", "empirical", "plus", "plus_band", "minus", "minus_band"])?;

        for (i, group) in groups.iter().enumerate() {
            let display = self.display_bins(group.kind);
            let (plus_band, minus_band) = &bands[i];
            let plus = display.density(&evaluation.plus.groups[i].samples);
            let minus = display.density(&evaluation.minus.groups[i].samples);
            let shown = display.n_bins().min(group.empirical.len());
            let empirical = display_density(&group.empirical, display, shown);
            for b in 0..shown {
                writer.write_record([
                    group.kind.to_string(),
                    display.edges()[b].to_string(),
                    empirical[b].to_string(),
                    plus[b].to_string(),
                    plus_band[b].to_string(),
                    minus[b].to_string(),
                    minus_band[b].to_string(),
                ])?;
            }
        }
        writer.flush()?;
        Ok(path)
    }
}

/// Renormalises the first `shown` reference values so they integrate to one
/// over the display bins.
fn display_density(reference: &Array1<f64>, display: &BinSchedule, shown: usize) -> Array1<f64> {
    let head = reference.slice(ndarray::s![..shown]).to_owned();
    let mass: f64 = head.iter().enumerate().map(|(b, &v)| v * display.width(b)).sum();
    if mass == 0.0 {
        return head;
    }
    head / mass
}
