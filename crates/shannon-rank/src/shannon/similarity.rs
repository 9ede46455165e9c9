//! Normalized dependency score between two variables.

use rand::Rng;
use tracing::debug;

use super::binning::BinOptimizer;
use super::dependency::DependencyTester;
use super::information::{joint_entropy, mutual_information};
use crate::config::{BinningLimits, RankingConfig};
use crate::data::{DataSource, RowFilter, Variable, VariableId};
use crate::error::Result;
use crate::ranking::CancellationToken;
use crate::slice::{Slice2D, extract_2d};

/// Weight and subsample variables are never compared, neither with other
/// variables nor with each other.
pub fn comparable(x: &Variable, y: &Variable) -> bool {
    !(x.is_weight() || y.is_weight() || (x.is_subsample() && y.is_subsample()))
}

/// Scores variable pairs as `I(X;Y) / H(X,Y)` in [0, 1], or 0 when the
/// dependency test cannot reject independence.
#[derive(Debug, Default)]
pub struct SimilarityScorer {
    optimizer: BinOptimizer,
    tester: DependencyTester,
}

static_assertions::assert_impl_all!(SimilarityScorer: Send, Sync);

impl SimilarityScorer {
    pub fn new(limits: BinningLimits) -> Self {
        let optimizer = BinOptimizer::new(limits);
        Self {
            optimizer,
            tester: DependencyTester::new(optimizer),
        }
    }

    pub fn optimizer(&self) -> &BinOptimizer {
        &self.optimizer
    }

    pub fn tester(&self) -> &DependencyTester {
        &self.tester
    }

    /// Score a slice.
    ///
    /// Numerically degenerate slices (empty, constant, non-finite MI) score
    /// 0. The only error is [`Cancelled`](crate::error::RankingError::Cancelled).
    pub fn score<R: Rng + ?Sized>(
        &self,
        slice: &Slice2D,
        config: &RankingConfig,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> Result<f32> {
        if !comparable(&slice.var_x, &slice.var_y) {
            return Ok(0.0);
        }

        let bins = self.optimizer.bins_2d(slice);
        let hist = self.optimizer.hist_2d(&slice.values, bins.0, bins.1);
        let mi = mutual_information(&hist);
        if self.tester.is_independent(slice, mi, bins, config, rng, cancel)? {
            return Ok(0.0);
        }

        let h = joint_entropy(&hist);
        if h.abs() <= f64::EPSILON || h.is_nan() {
            return Ok(0.0);
        }
        let w = (mi / h).clamp(0.0, 1.0) as f32;
        Ok(if w.is_nan() { 0.0 } else { w })
    }

    /// The slice of `(x, y)` inside `filter`, labelled by the source's label
    /// variable when it has one.
    pub fn slice_variables<S: DataSource + ?Sized>(
        &self,
        source: &S,
        x: VariableId,
        y: VariableId,
        filter: &RowFilter,
    ) -> Result<Slice2D> {
        extract_2d(source, x, y, filter, source.label_variable())
    }

    /// Extract the slice of `(x, y)` inside `filter` and score it.
    ///
    /// Slices whose missing fraction reaches `config.missing_threshold`
    /// score 0 without running the estimator.
    #[allow(clippy::too_many_arguments)]
    pub fn score_variables<S: DataSource + ?Sized, R: Rng + ?Sized>(
        &self,
        source: &S,
        x: VariableId,
        y: VariableId,
        filter: &RowFilter,
        config: &RankingConfig,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> Result<f32> {
        let slice = self.slice_variables(source, x, y, filter)?;
        if slice.missing >= config.missing_threshold {
            debug!(
                "Skipping {} vs {}: {:.0}% missing",
                slice.var_x.name,
                slice.var_y.name,
                slice.missing * 100.0
            );
            return Ok(0.0);
        }
        self.score(&slice, config, rng, cancel)
    }
}
