//! Progress reporting and cancellation for ranking operations.
//!
//! Besides polling [`RankingEngine::progress`](super::RankingEngine::progress),
//! callers can register a [`ProgressReporter`] that receives a
//! [`ProgressUpdate`] whenever a score task completes and when a reorder
//! finishes or is cancelled.
//!
//! # Example
//!
//! ```rust,ignore
//! use shannon_rank::ranking::{ClosureProgressReporter, RankingEngine};
//!
//! let engine = RankingEngine::new(table, config)?
//!     .with_reporter(ClosureProgressReporter::new(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     }));
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Phases of a ranking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStage {
    /// Score tasks are running on the worker pool
    Scoring,
    /// Columns are being reordered by score
    Reordering,
    /// Operation finished and the result is published
    Complete,
    /// Operation was cancelled before publishing
    Cancelled,
}

impl RankingStage {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Scoring => "Computing Scores",
            Self::Reordering => "Sorting Columns",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// A progress notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: RankingStage,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    pub message: String,

    /// Score tasks completed so far
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<usize>,

    /// Score tasks launched by this operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_total: Option<usize>,
}

impl ProgressUpdate {
    pub fn new(stage: RankingStage, progress: f32, message: impl Into<String>) -> Self {
        Self {
            stage,
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Score-task progress, mapped into [0, 0.99] so that 1.0 is only
    /// reached once the reorder is done.
    pub fn with_items(current: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            stage: RankingStage::Scoring,
            progress: scoring_progress(current, total),
            message: message.into(),
            items_processed: Some(current),
            items_total: Some(total),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self::new(RankingStage::Complete, 1.0, message)
    }

    pub fn cancelled() -> Self {
        Self::new(RankingStage::Cancelled, 0.0, "Ranking cancelled")
    }
}

/// Completed/total mapped into [0, 0.99].
pub(crate) fn scoring_progress(current: usize, total: usize) -> f32 {
    if current >= total {
        return 0.99;
    }
    (current as f32 / total as f32 * 0.99).clamp(0.0, 0.99)
}

/// Receives progress updates from ranking operations.
///
/// Updates are delivered from worker and orchestration threads, never the
/// caller's thread, so implementations must be `Send + Sync` and should not
/// block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// [`ProgressReporter`] backed by a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// Cooperative cancellation flag shared by the engine, its score tasks and
/// its reorder.
///
/// Clones share state. Setting the flag only *requests* cancellation; the
/// engine's `cancel()` additionally waits until every thread that observed
/// the token has stopped.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag for the next operation.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}
