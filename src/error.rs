//! Error types for trialscope
//!
//! Numeric faults (division by zero in ratios, empty resample buckets) never
//! surface here: transforms filter them locally. Empty results are reported
//! as [`crate::transform::Warning`] values, not errors.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// trialscope error types
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown, stale or ambiguous sensor name
    #[error("Invalid sensor reference: {0}")]
    InvalidSensorReference(String),

    /// Transform or configuration parameter outside its allowed domain
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unique constraint violated on write; the write was rolled back
    #[error("Constraint violation: {0}\nNo changes were applied.")]
    ConstraintViolation(String),

    /// Edited exclusion row rejected before any write was attempted
    #[error("Malformed exclusion: {0}")]
    MalformedExclusion(String),

    /// Unknown trial, dataset or project identity
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage error (fact log, Parquet)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// CSV writer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidSensorReference`].
    pub(crate) fn sensor(name: impl std::fmt::Display) -> Self {
        Self::InvalidSensorReference(name.to_string())
    }

    /// Shorthand for [`Error::InvalidParameter`].
    pub(crate) fn param(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}
