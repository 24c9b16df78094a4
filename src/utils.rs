// src/utils.rs

//! Histogram and information-criterion arithmetic shared by the objective and
//! the diagnostics.

use ndarray::Array1;

/// Monotone bin edges. Every bin is half-open `[lo, hi)` except the last,
/// which also includes its right edge.
#[derive(Debug, Clone, PartialEq)]
pub struct BinSchedule {
    edges: Vec<f64>,
}

impl BinSchedule {
    pub fn new(edges: Vec<f64>) -> Self {
        assert!(edges.len() >= 2, "a bin schedule needs at least two edges");
        assert!(
            edges.windows(2).all(|w| w[0] < w[1]),
            "bin edges must be strictly increasing"
        );
        Self { edges }
    }

    /// `n` bins of equal `width` starting at `start`.
    pub fn uniform(start: f64, width: f64, n: usize) -> Self {
        Self::new((0..=n).map(|i| start + width * i as f64).collect())
    }

    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn lower(&self) -> f64 {
        self.edges[0]
    }

    pub fn upper(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// Width of bin `i`.
    pub fn width(&self, i: usize) -> f64 {
        self.edges[i + 1] - self.edges[i]
    }

    pub fn bin_of(&self, x: f64) -> Option<usize> {
        if x.is_nan() || x < self.lower() || x > self.upper() {
            return None;
        }
        if x == self.upper() {
            return Some(self.n_bins() - 1);
        }
        // First edge strictly greater than x closes the bin containing x.
        let i = self.edges.partition_point(|&e| e <= x);
        Some(i - 1)
    }

    /// Raw counts per bin; samples outside the schedule are dropped.
    pub fn counts(&self, samples: &[f64]) -> Array1<f64> {
        let mut counts = Array1::zeros(self.n_bins());
        for &x in samples {
            if let Some(i) = self.bin_of(x) {
                counts[i] += 1.0;
            }
        }
        counts
    }

    /// Probability density over the in-range samples. All zero when nothing
    /// falls in range.
    pub fn density(&self, samples: &[f64]) -> Array1<f64> {
        let counts = self.counts(samples);
        let total = counts.sum();
        if total == 0.0 {
            return counts;
        }
        self.scale_counts(&counts, total)
    }

    /// Divides each bin count by `denominator * width`.
    pub fn scale_counts(&self, counts: &Array1<f64>, denominator: f64) -> Array1<f64> {
        Array1::from_iter(
            counts
                .iter()
                .enumerate()
                .map(|(i, &c)| c / (denominator * self.width(i))),
        )
    }
}

/// Residual sum of squares between two equally long histograms.
pub fn rss(simulated: &Array1<f64>, empirical: &Array1<f64>) -> f64 {
    assert_eq!(simulated.len(), empirical.len(), "histogram lengths differ");
    (simulated - empirical).mapv(|r| r * r).sum()
}

/// Akaike information criterion for a least-squares fit:
/// `2 P + N ln(RSS)`. RSS is floored at the smallest positive double so a
/// perfect fit stays finite.
pub fn aic(parameter_count: usize, comparison_points: usize, rss: f64) -> f64 {
    2.0 * parameter_count as f64 + comparison_points as f64 * rss.max(f64::MIN_POSITIVE).ln()
}

/// Population standard deviation of each column of `rows`.
pub fn column_std(rows: &[Array1<f64>]) -> Array1<f64> {
    let Some(first) = rows.first() else {
        return Array1::zeros(0);
    };
    let n = rows.len() as f64;
    let mut mean = Array1::zeros(first.len());
    for row in rows {
        mean += row;
    }
    mean /= n;
    let mut var = Array1::<f64>::zeros(first.len());
    for row in rows {
        var += &(row - &mean).mapv(|d| d * d);
    }
    (var / n).mapv(f64::sqrt)
}
