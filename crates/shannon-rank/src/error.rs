//! Custom error types for the ranking engine.
//!
//! This module provides the error hierarchy using `thiserror`. Numerically
//! degenerate inputs (empty slices, zero variance, non-finite mutual
//! information) are never reported here: they resolve to a score of 0 inside
//! the scorer. Errors are reserved for invalid configuration, unknown
//! variables and failures of the background machinery.
//!
//! Errors are serializable so they can be forwarded to a frontend as
//! `{code, message}` pairs.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for ranking operations.
#[derive(Error, Debug)]
pub enum RankingError {
    /// Operation was cancelled before completion.
    #[error("Ranking cancelled")]
    Cancelled,

    /// Variable was not found in the dataset.
    #[error("Variable '{0}' not found in dataset")]
    VariableNotFound(String),

    /// Variable exists but is excluded from the calculations.
    #[error("Variable '{0}' is not included in the calculations")]
    VariableExcluded(String),

    /// Variable is not part of the visible column list.
    #[error("Variable '{0}' is not included in the columns")]
    NotAColumn(String),

    /// An operation requiring a reference variable was called while unsorted.
    #[error("The columns are currently unsorted")]
    Unsorted,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unrecognized dependency-test algorithm name.
    #[error("Unsupported dependency test algorithm: {0}")]
    UnknownDependencyTest(String),

    /// The dataset has no usable columns.
    #[error("Dataset has no usable columns")]
    EmptyDataset,

    /// Internal error (e.g., worker pool creation or thread join failure).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RankingError>,
    },
}

impl RankingError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RankingError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get error code for frontend handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::VariableNotFound(_) => "VARIABLE_NOT_FOUND",
            Self::VariableExcluded(_) => "VARIABLE_EXCLUDED",
            Self::NotAColumn(_) => "NOT_A_COLUMN",
            Self::Unsorted => "UNSORTED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::UnknownDependencyTest(_) => "UNKNOWN_DEPENDENCY_TEST",
            Self::EmptyDataset => "EMPTY_DATASET",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Check if this error is recoverable (i.e., the engine is still usable).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::VariableNotFound(_)
                | Self::VariableExcluded(_)
                | Self::NotAColumn(_)
                | Self::Unsorted
                | Self::InvalidConfig(_)
                | Self::UnknownDependencyTest(_)
        )
    }
}

/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for RankingError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("RankingError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for ranking operations.
pub type Result<T> = std::result::Result<T, RankingError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RankingError::Polars(e).with_context(context))
    }
}
