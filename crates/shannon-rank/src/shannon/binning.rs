//! Optimal histogram bin counts (Shimazaki & Shinomoto).
//!
//! The search minimizes the cost `(2k - v) / (N * Δ)²` over candidate bin
//! counts, where `k` and `v` are the mean and biased variance of the bin
//! counts and `Δ` the bin width (or area in 2D). The search is approximate:
//! the candidate space, the resolution estimate and the histograms are all
//! stride-subsampled according to [`BinningLimits`].

use rand::Rng;
use tracing::debug;

use crate::config::BinningLimits;
use crate::slice::{Slice1D, Slice2D, Value1D, Value2D};

/// Row-major weighted 2D histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram2D {
    pub bins_x: usize,
    pub bins_y: usize,
    counts: Vec<f64>,
}

impl Histogram2D {
    fn zeros(bins_x: usize, bins_y: usize) -> Self {
        Self {
            bins_x,
            bins_y,
            counts: vec![0.0; bins_x * bins_y],
        }
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.counts[i * self.bins_y + j]
    }

    fn add(&mut self, i: usize, j: usize, w: f64) {
        self.counts[i * self.bins_y + j] += w;
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Row sums (the x marginal).
    pub fn marginal_x(&self) -> Vec<f64> {
        self.counts.chunks(self.bins_y.max(1)).map(|row| row.iter().sum()).collect()
    }

    /// Column sums (the y marginal).
    pub fn marginal_y(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.bins_y];
        for row in self.counts.chunks(self.bins_y.max(1)) {
            for (sum, count) in sums.iter_mut().zip(row) {
                *sum += count;
            }
        }
        sums
    }
}

/// Bin index of a normalized value among `bins` equal bins of [0, 1].
#[inline]
fn bin_of(value: f64, bins: usize) -> usize {
    let size = 1.0 / bins as f64;
    ((value / size).floor().max(0.0) as usize).min(bins - 1)
}

/// Mean and biased (population) variance of the bin counts.
///
/// The variance must divide by `n`, not `n - 1`, for the cost function to
/// be an unbiased risk estimate.
fn mean_and_variance(counts: &[f64]) -> (f64, f64) {
    let n = counts.len() as f64;
    let (sum, sum_sq) = counts
        .iter()
        .fold((0.0, 0.0), |(s, sq), &c| (s + c, sq + c * c));
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    (mean, variance)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BinOptimizer {
    limits: BinningLimits,
}

impl BinOptimizer {
    pub fn new(limits: BinningLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &BinningLimits {
        &self.limits
    }

    #[inline]
    fn stride(len: usize, ceiling: usize) -> usize {
        (len / ceiling.max(1)).max(1)
    }

    /// Minimum positive gap between values, sampled over a stride of
    /// reference points and floored at `1 / max_hist_bins`.
    fn resolution<T>(&self, values: &[T], coord: impl Fn(&T) -> f64) -> f64 {
        let stride = Self::stride(values.len(), self.limits.max_res_sample_size);
        let mut res = f64::INFINITY;
        for vi in values.iter().step_by(stride) {
            let xi = coord(vi);
            for vj in values {
                let diff = (coord(vj) - xi).abs();
                if diff > 0.0 {
                    res = res.min(diff);
                }
            }
        }
        res.max(1.0 / self.limits.max_hist_bins as f64)
    }

    /// Search bounds `[min, max]` for one numeric dimension.
    fn bounds<T>(
        &self,
        count: usize,
        values: &[T],
        cap: usize,
        coord: impl Fn(&T) -> f64,
    ) -> (i64, i64) {
        if count < 5 {
            return (count as i64, count as i64);
        }
        let res = self.resolution(values, coord);
        let by_res = (1.0 / res) as i64 + 1;
        (2, by_res.min(count as i64).min(cap as i64))
    }

    /// Optimal number of bins for a 1D slice.
    pub fn bins_1d(&self, slice: &Slice1D) -> usize {
        if slice.var.categorical() {
            return slice.count_x;
        }
        let size = slice.values.len();
        let (min, max) = self.bounds(slice.count_x, &slice.values, size / 2, |v| v.x);
        let candidates = max - min + 1;
        if min <= 0 || max <= 0 || candidates <= 0 {
            debug!("Degenerate bin limits [{}, {}], using a single bin", min, max);
            return 1;
        }

        let mut best = (min + max) / 2;
        let mut best_cost = f64::MAX;
        let stride = Self::stride(candidates as usize, self.limits.max_search_sample_size);
        let n2 = (size * size) as f64;
        for i in (0..candidates).step_by(stride) {
            let bins = min + i;
            let width = 1.0 / bins as f64;
            let (k, v) = mean_and_variance(&self.hist_1d(&slice.values, bins as usize));
            let cost = (2.0 * k - v) / (n2 * width * width);
            if cost < best_cost {
                best_cost = cost;
                best = bins;
            }
        }
        best as usize
    }

    /// Optimal pair of bin counts for a 2D slice.
    pub fn bins_2d(&self, slice: &Slice2D) -> (usize, usize) {
        if slice.var_x.categorical() && slice.var_y.categorical() {
            return (slice.count_x, slice.count_y);
        }
        let size = slice.values.len();
        let cap = ((size / 2) as f64).sqrt() as usize;

        let (min0, max0) = if slice.var_x.categorical() {
            (slice.count_x as i64, slice.count_x as i64)
        } else {
            self.bounds(slice.count_x, &slice.values, cap, |v| v.x)
        };
        let (min1, max1) = if slice.var_y.categorical() {
            (slice.count_y as i64, slice.count_y as i64)
        } else {
            self.bounds(slice.count_y, &slice.values, cap, |v| v.y)
        };

        let len0 = max0 - min0 + 1;
        let len1 = max1 - min1 + 1;
        if min0 <= 0 || max0 <= 0 || len0 <= 0 || min1 <= 0 || max1 <= 0 || len1 <= 0 {
            debug!(
                "Degenerate bin limits [{}, {}] x [{}, {}], using a single bin",
                min0, max0, min1, max1
            );
            return (1, 1);
        }

        let mut best = ((min0 + max0) / 2, (min1 + max1) / 2);
        let mut best_cost = f64::MAX;
        let candidates = len0 * len1;
        let stride = Self::stride(candidates as usize, self.limits.max_search_sample_size);
        let n2 = (size * size) as f64;
        for i in (0..candidates).step_by(stride) {
            let n0 = i / len1 + min0;
            let n1 = i % len1 + min1;
            let area = 1.0 / (n0 * n1) as f64;
            let hist = self.hist_2d(&slice.values, n0 as usize, n1 as usize);
            let (k, v) = mean_and_variance(hist.counts());
            let cost = (2.0 * k - v) / (n2 * area * area);
            if cost < best_cost {
                best_cost = cost;
                best = (n0, n1);
            }
        }
        (best.0 as usize, best.1 as usize)
    }

    /// Weighted histogram over `bins` equal bins of [0, 1].
    pub fn hist_1d(&self, values: &[Value1D], bins: usize) -> Vec<f64> {
        let mut counts = vec![0.0; bins];
        if bins == 0 {
            return counts;
        }
        let stride = Self::stride(values.len(), self.limits.max_hist_sample_size);
        for value in values.iter().step_by(stride) {
            counts[bin_of(value.x, bins)] += value.w;
        }
        counts
    }

    /// Weighted joint histogram over a `bins_x` by `bins_y` grid of [0, 1]².
    pub fn hist_2d(&self, values: &[Value2D], bins_x: usize, bins_y: usize) -> Histogram2D {
        let mut hist = Histogram2D::zeros(bins_x, bins_y);
        if bins_x == 0 || bins_y == 0 {
            return hist;
        }
        let stride = Self::stride(values.len(), self.limits.max_hist_sample_size);
        for value in values.iter().step_by(stride) {
            hist.add(bin_of(value.x, bins_x), bin_of(value.y, bins_y), value.w);
        }
        hist
    }

    /// Re-bin [0, 1] so that each of `bins` bins holds equal probability.
    ///
    /// Returns `bins + 1` edges starting at 0 and ending at 1; edge `i` is the
    /// cumulative mass of the first `i` equal-width bins.
    pub fn uniform_bins_1d(&self, values: &[Value1D], bins: usize) -> Vec<f64> {
        if bins == 0 {
            return vec![0.0];
        }
        let counts = self.hist_1d(values, bins);
        let total = values.len() as f64;
        let mut edges = vec![0.0; bins + 1];
        for i in 1..bins {
            let mass = if total > 0.0 { counts[i - 1] / total } else { 0.0 };
            edges[i] = edges[i - 1] + mass;
        }
        edges[bins] = 1.0;
        edges
    }

    /// Map `x` uniformly into the equal-probability bin matching its
    /// equal-width bin.
    pub fn uniform_transform_1d<R: Rng + ?Sized>(x: f64, edges: &[f64], rng: &mut R) -> f64 {
        let bins = edges.len().saturating_sub(1);
        if bins == 0 {
            return x;
        }
        let bin = bin_of(x, bins);
        edges[bin] + rng.r#gen::<f64>() * (edges[bin + 1] - edges[bin])
    }
}
