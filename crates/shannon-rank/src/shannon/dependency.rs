//! Independence tests on mutual information.

use parking_lot::Mutex;
use rand::Rng;
use statrs::distribution::{ContinuousCDF, Gamma, Normal};
use std::collections::HashMap;

use super::binning::BinOptimizer;
use super::information::slice_mutual_information;
use crate::config::{DependencyTestKind, RankingConfig};
use crate::error::{RankingError, Result};
use crate::ranking::CancellationToken;
use crate::slice::Slice2D;

/// Decides whether the observed mutual information of a slice is
/// compatible with independence.
///
/// Two-sided normal critical values are cached per significance level for
/// the lifetime of the tester.
#[derive(Debug, Default)]
pub struct DependencyTester {
    optimizer: BinOptimizer,
    critical_values: Mutex<HashMap<u32, f64>>,
}

static_assertions::assert_impl_all!(DependencyTester: Send, Sync);

impl DependencyTester {
    pub fn new(optimizer: BinOptimizer) -> Self {
        Self {
            optimizer,
            critical_values: Mutex::new(HashMap::new()),
        }
    }

    /// `z` such that `P(|Z| > z) = p_value` for a standard normal `Z`.
    pub fn critical_value(&self, p_value: f32) -> f64 {
        let area = 1.0 - p_value as f64 / 2.0;
        *self
            .critical_values
            .lock()
            .entry(p_value.to_bits())
            .or_insert_with(|| {
                Normal::new(0.0, 1.0)
                    .map(|normal| normal.inverse_cdf(area))
                    .unwrap_or(f64::NAN)
            })
    }

    /// Run the configured test. `mi` is the observed mutual information of
    /// `slice` under `bins`.
    ///
    /// Returns [`RankingError::Cancelled`] when `cancel` fires between
    /// surrogates.
    pub fn is_independent<R: Rng + ?Sized>(
        &self,
        slice: &Slice2D,
        mi: f64,
        bins: (usize, usize),
        config: &RankingConfig,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if !mi.is_finite() {
            return Ok(true);
        }
        let p_value = config.p_value;
        if (p_value - 1.0).abs() <= f32::EPSILON {
            return Ok(mi <= config.independence_threshold as f64);
        }
        match config.dependency_test {
            DependencyTestKind::NoTest => Ok(mi <= config.independence_threshold as f64),
            DependencyTestKind::SurrogateGauss => {
                let cval = self.critical_value(p_value);
                let values = self.surrogates(slice, bins, config.surrogate_count, rng, cancel)?;
                Ok(surrogate_gauss(mi, &values, cval))
            }
            DependencyTestKind::SurrogateGeneral => {
                let count = general_surrogate_count(p_value);
                let values = self.surrogates(slice, bins, count, rng, cancel)?;
                Ok(surrogate_general(mi, &values))
            }
            DependencyTestKind::GammaTest => Ok(gamma_test(mi, bins, slice.len(), p_value)),
        }
    }

    /// Mutual information of `count` shuffled surrogates, histogrammed with
    /// the observed slice's bin counts so that the null distribution is that
    /// of the same statistic.
    fn surrogates<R: Rng + ?Sized>(
        &self,
        slice: &Slice2D,
        bins: (usize, usize),
        count: usize,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> Result<Vec<f64>> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            if cancel.is_cancelled() {
                return Err(RankingError::Cancelled);
            }
            let surrogate = slice.shuffle(rng);
            values.push(slice_mutual_information(&self.optimizer, &surrogate, bins));
        }
        Ok(values)
    }
}

/// Independent iff the z-score of `mi` against a normal fit of the surrogate
/// values (biased standard deviation) lies within `±cval`. An undefined
/// z-score counts as independent.
pub fn surrogate_gauss(mi: f64, surrogates: &[f64], cval: f64) -> bool {
    let n = surrogates.len() as f64;
    let mean = surrogates.iter().sum::<f64>() / n;
    let mean_sq = surrogates.iter().map(|v| v * v).sum::<f64>() / n;
    let std = (mean_sq - mean * mean).max(0.0).sqrt();
    let z = (mi - mean) / std;
    if !z.is_finite() {
        return true;
    }
    -cval <= z && z <= cval
}

/// Independent unless `mi` is at least the largest surrogate value.
pub fn surrogate_general(mi: f64, surrogates: &[f64]) -> bool {
    let max = surrogates
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(0.0, f64::max);
    mi < max
}

/// Surrogates drawn by the general test: `round(1/p) - 1`, at least one.
pub fn general_surrogate_count(p_value: f32) -> usize {
    let n = (1.0 / p_value as f64).round() - 1.0;
    if n.is_finite() && n >= 1.0 { n as usize } else { 1 }
}

/// Gamma approximation of the null distribution of the MI estimator, with
/// shape `(bx - 1)(by - 1) / 2` and scale `1 / count`. Any failure to build
/// the distribution counts as independent.
pub fn gamma_test(mi: f64, bins: (usize, usize), count: usize, p_value: f32) -> bool {
    let shape = (bins.0 as f64 - 1.0) * (bins.1 as f64 - 1.0) / 2.0;
    let rate = count as f64;
    match Gamma::new(shape, rate) {
        Ok(gamma) => {
            let quantile = gamma.inverse_cdf(1.0 - p_value as f64);
            !quantile.is_finite() || mi <= quantile
        }
        Err(_) => true,
    }
}
