//! Concurrent, cancellable ranking of columns by dependency on a reference
//! variable.

pub mod engine;
pub mod progress;
pub mod sort;
pub mod table;

pub use engine::{ProfileRow, Quiescent, RankingEngine, RankingHandle, RankingState};
pub use progress::{
    CancellationToken, ClosureProgressReporter, ProgressReporter, ProgressUpdate, RankingStage,
};
pub use sort::{SortAlgorithm, insertion_sort, quicksort, sort_descending};
pub use table::{RankedColumn, ScoreTable};
