//! Information-theoretic similarity between variables.
//!
//! The chain is: a [`Slice2D`](crate::slice::Slice2D) is binned by the
//! [`BinOptimizer`], its mutual information and joint entropy are estimated
//! from the weighted joint histogram, the [`DependencyTester`] decides
//! whether the dependency is significant, and the [`SimilarityScorer`]
//! combines everything into a score in [0, 1].

pub mod binning;
pub mod dependency;
pub mod information;
pub mod similarity;

pub use binning::{BinOptimizer, Histogram2D};
pub use dependency::{DependencyTester, gamma_test, general_surrogate_count};
pub use information::{joint_entropy, mutual_information};
pub use similarity::{SimilarityScorer, comparable};
