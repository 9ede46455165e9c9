//! Information-Theoretic Column Ranking Library
//!
//! Ranks the columns of a dataset by how strongly each one depends on a
//! chosen reference variable, measured as normalized mutual information
//! `I(X;Y) / H(X,Y)` and gated by a statistical dependency test.
//!
//! # Overview
//!
//! - **Data Access**: A [`DataSource`] trait over typed, possibly-missing
//!   columns, with a polars-backed [`DataTable`] implementation
//! - **Slicing**: Weighted value extraction under a row filter ([`slice`])
//! - **Binning**: Shimazaki–Shinomoto histogram bin optimization
//! - **Dependency Tests**: Surrogate (Gaussian and rank-based) and
//!   gamma-approximation tests of independence
//! - **Ranking**: A concurrent, cancellable [`RankingEngine`] that scores
//!   columns on a bounded worker pool and publishes atomically
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use shannon_rank::{
//!     ClosureProgressReporter, DataSource, DataTable, RankingConfig, RankingEngine, RowFilter,
//! };
//! use polars::prelude::*;
//!
//! let df = CsvReadOptions::default()
//!     .with_has_header(true)
//!     .try_into_reader_with_file_path(Some("data.csv".into()))?
//!     .finish()?;
//! let table = DataTable::from_dataframe(&df)?;
//! let income = table.variable_by_name("income").unwrap().id;
//!
//! let mut engine = RankingEngine::new(table, RankingConfig::default())?
//!     .with_reporter(ClosureProgressReporter::new(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     }));
//!
//! engine.set_sort_key(income, RowFilter::new(), 0.05, 0.8)?;
//! engine.wait();
//!
//! for column in engine.table().iter() {
//!     println!("{:?}: {:?}", column.variable, column.score);
//! }
//! ```
//!
//! # Concurrency
//!
//! Mutating engine operations cancel whatever is running and block until
//! its threads have stopped before touching the column list. Readers on
//! other threads go through a [`RankingHandle`] and always observe either
//! the previous or the newly published ranking.

pub mod config;
pub mod data;
pub mod error;
pub mod ranking;
pub mod shannon;
pub mod slice;

// Re-exports for convenient access
pub use config::{
    BinningLimits, ConfigValidationError, DependencyTestKind, RankingConfig, RankingConfigBuilder,
};
pub use data::{
    DataSource, DataTable, DataTableBuilder, MISSING_STRING, Range, RowFilter, ValueRange,
    Variable, VariableId, VariableKind, VariableRole, export_table,
};
pub use error::{RankingError, Result as RankingResult, ResultExt};
pub use ranking::{
    CancellationToken, ClosureProgressReporter, ProfileRow, ProgressReporter, ProgressUpdate,
    Quiescent, RankedColumn, RankingEngine, RankingHandle, RankingStage, RankingState, ScoreTable,
    SortAlgorithm,
};
pub use shannon::{
    BinOptimizer, DependencyTester, Histogram2D, SimilarityScorer, joint_entropy,
    mutual_information,
};
pub use slice::{Slice1D, Slice2D, Value1D, Value2D, extract_1d, extract_2d};
