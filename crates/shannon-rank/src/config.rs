//! Configuration types for the ranking engine.
//!
//! This module provides the statistical parameters consumed by the scorer and
//! the dependency tester, using the builder pattern for ergonomic setup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RankingError;

/// Algorithm used to decide whether two variables are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyTestKind {
    /// Independent iff the mutual information is below a fixed threshold.
    NoTest,
    /// z-score of the observed MI against a normal fit of shuffled surrogates.
    #[default]
    SurrogateGauss,
    /// Permutation max-statistic rule over `round(1/p) - 1` surrogates.
    SurrogateGeneral,
    /// Upper quantile of the Gamma approximation to the MI null distribution.
    GammaTest,
}

impl DependencyTestKind {
    /// All supported algorithms, in their canonical order.
    pub const ALL: [DependencyTestKind; 4] = [
        Self::NoTest,
        Self::SurrogateGauss,
        Self::SurrogateGeneral,
        Self::GammaTest,
    ];

    /// Canonical name, as used in preference files and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoTest => "NO_TEST",
            Self::SurrogateGauss => "SURROGATE_GAUSS",
            Self::SurrogateGeneral => "SURROGATE_GENERAL",
            Self::GammaTest => "GAMMA_TEST",
        }
    }
}

impl fmt::Display for DependencyTestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyTestKind {
    type Err = RankingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == upper)
            .ok_or_else(|| RankingError::UnknownDependencyTest(s.to_string()))
    }
}

/// Ceilings for the randomized bin-count search.
///
/// These bound the cost of the optimizer on large tables. Lowering them
/// speeds up scoring at the price of a coarser search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinningLimits {
    /// Maximum number of candidate bin counts evaluated per search.
    pub max_search_sample_size: usize,
    /// Maximum number of bins per variable (bounds the resolution estimate).
    pub max_hist_bins: usize,
    /// Number of anchor values sampled when estimating the resolution.
    pub max_res_sample_size: usize,
    /// Maximum number of samples used to fill a histogram.
    pub max_hist_sample_size: usize,
}

impl Default for BinningLimits {
    fn default() -> Self {
        Self {
            max_search_sample_size: 1000,
            max_hist_bins: 100,
            max_res_sample_size: 10,
            max_hist_sample_size: 10_000,
        }
    }
}

/// Configuration for the ranking engine.
///
/// Use [`RankingConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use shannon_rank::config::{DependencyTestKind, RankingConfig};
///
/// let config = RankingConfig::builder()
///     .p_value(0.01)
///     .dependency_test(DependencyTestKind::GammaTest)
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Significance level of the independence test, in (0, 1].
    /// Default: 0.05
    pub p_value: f32,

    /// Slices whose missing fraction reaches this value are scored 0.
    /// Default: 0.8 (80%)
    pub missing_threshold: f32,

    /// Dependency test algorithm.
    /// Default: SurrogateGauss
    pub dependency_test: DependencyTestKind,

    /// Number of surrogates drawn by the Gaussian surrogate test.
    /// Default: 100
    pub surrogate_count: usize,

    /// Mutual information threshold used by [`DependencyTestKind::NoTest`]
    /// and whenever the p-value is 1.
    /// Default: 1e-3
    pub independence_threshold: f32,

    /// Size of the score worker pool. When None, the number of available
    /// cores minus one (reserved for the coordinating thread), at least 1.
    /// Default: None
    pub worker_threads: Option<usize>,

    /// Seed for surrogate shuffling. When set, each column pair gets its own
    /// deterministic generator so repeated rankings are reproducible.
    /// Default: None (entropy-seeded)
    pub surrogate_seed: Option<u64>,

    /// Bin-count search ceilings.
    #[serde(default)]
    pub binning: BinningLimits,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            p_value: 0.05,
            missing_threshold: 0.8,
            dependency_test: DependencyTestKind::default(),
            surrogate_count: 100,
            independence_threshold: 1e-3,
            worker_threads: None,
            surrogate_seed: None,
            binning: BinningLimits::default(),
        }
    }
}

impl RankingConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RankingConfigBuilder {
        RankingConfigBuilder::default()
    }

    /// Number of score workers to spawn.
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
        })
        .max(1)
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        validate_p_value(self.p_value)?;
        validate_missing_threshold(self.missing_threshold)?;

        if self.surrogate_count == 0 {
            return Err(ConfigValidationError::InvalidSurrogateCount(
                self.surrogate_count,
            ));
        }

        if !self.independence_threshold.is_finite() || self.independence_threshold < 0.0 {
            return Err(ConfigValidationError::InvalidThreshold {
                field: "independence_threshold".to_string(),
                value: self.independence_threshold,
            });
        }

        if self.worker_threads == Some(0) {
            return Err(ConfigValidationError::InvalidWorkerThreads(0));
        }

        let limits = &self.binning;
        for (field, value) in [
            ("max_search_sample_size", limits.max_search_sample_size),
            ("max_hist_bins", limits.max_hist_bins),
            ("max_res_sample_size", limits.max_res_sample_size),
            ("max_hist_sample_size", limits.max_hist_sample_size),
        ] {
            if value == 0 {
                return Err(ConfigValidationError::InvalidBinningLimit(field.to_string()));
            }
        }

        Ok(())
    }
}

pub(crate) fn validate_p_value(p_value: f32) -> Result<(), ConfigValidationError> {
    if p_value > 0.0 && p_value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigValidationError::InvalidPValue(p_value))
    }
}

pub(crate) fn validate_missing_threshold(threshold: f32) -> Result<(), ConfigValidationError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(ConfigValidationError::InvalidThreshold {
            field: "missing_threshold".to_string(),
            value: threshold,
        })
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid p-value: {0} (must be in (0.0, 1.0])")]
    InvalidPValue(f32),

    #[error("Invalid threshold for '{field}': {value}")]
    InvalidThreshold { field: String, value: f32 },

    #[error("Invalid surrogate count: {0} (must be at least 1)")]
    InvalidSurrogateCount(usize),

    #[error("Invalid worker thread count: {0} (must be at least 1)")]
    InvalidWorkerThreads(usize),

    #[error("Invalid binning limit '{0}': must be at least 1")]
    InvalidBinningLimit(String),
}

impl From<ConfigValidationError> for RankingError {
    fn from(err: ConfigValidationError) -> Self {
        RankingError::InvalidConfig(err.to_string())
    }
}

/// Builder for [`RankingConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct RankingConfigBuilder {
    p_value: Option<f32>,
    missing_threshold: Option<f32>,
    dependency_test: Option<DependencyTestKind>,
    surrogate_count: Option<usize>,
    independence_threshold: Option<f32>,
    worker_threads: Option<usize>,
    surrogate_seed: Option<u64>,
    binning: Option<BinningLimits>,
}

impl RankingConfigBuilder {
    /// Set the significance level of the independence test.
    pub fn p_value(mut self, p_value: f32) -> Self {
        self.p_value = Some(p_value);
        self
    }

    /// Set the missing-value fraction above which a pair is not scored.
    ///
    /// # Arguments
    /// * `threshold` - Value between 0.0 and 1.0 (e.g., 0.8 = 80%)
    pub fn missing_threshold(mut self, threshold: f32) -> Self {
        self.missing_threshold = Some(threshold);
        self
    }

    /// Set the dependency test algorithm.
    pub fn dependency_test(mut self, kind: DependencyTestKind) -> Self {
        self.dependency_test = Some(kind);
        self
    }

    /// Set the number of surrogates for the Gaussian surrogate test.
    pub fn surrogate_count(mut self, count: usize) -> Self {
        self.surrogate_count = Some(count);
        self
    }

    /// Set the MI threshold used by the threshold rule.
    pub fn independence_threshold(mut self, threshold: f32) -> Self {
        self.independence_threshold = Some(threshold);
        self
    }

    /// Override the worker pool size.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Seed surrogate generation for reproducible rankings.
    pub fn surrogate_seed(mut self, seed: u64) -> Self {
        self.surrogate_seed = Some(seed);
        self
    }

    /// Override the bin-count search ceilings.
    pub fn binning(mut self, limits: BinningLimits) -> Self {
        self.binning = Some(limits);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `RankingConfig` or an error if validation fails.
    pub fn build(self) -> Result<RankingConfig, ConfigValidationError> {
        let defaults = RankingConfig::default();
        let config = RankingConfig {
            p_value: self.p_value.unwrap_or(defaults.p_value),
            missing_threshold: self.missing_threshold.unwrap_or(defaults.missing_threshold),
            dependency_test: self.dependency_test.unwrap_or_default(),
            surrogate_count: self.surrogate_count.unwrap_or(defaults.surrogate_count),
            independence_threshold: self
                .independence_threshold
                .unwrap_or(defaults.independence_threshold),
            worker_threads: self.worker_threads,
            surrogate_seed: self.surrogate_seed,
            binning: self.binning.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}
