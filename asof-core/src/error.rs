//! Error types for asof operations

use thiserror::Error;

/// Failures raised by, or caused by, the source collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Source {operation} failed: {reason}")]
    LoadFailed { operation: String, reason: String },

    #[error("Source page loaded from {from} is not strictly ascending at {key}")]
    UnorderedPage { from: String, key: String },

    #[error("Source returned {key} below the requested lower bound {from}")]
    BelowRequestedBound { from: String, key: String },

    #[error("Floor lookup for {key} returned later key {returned}")]
    FloorAfterKey { key: String, returned: String },

    #[error("Source {operation} at {at} made no progress")]
    NoProgress { operation: String, at: String },
}

impl SourceError {
    /// Convenience constructor for collaborator I/O failures.
    pub fn load_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Query misuse and consistency check failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("{operation} requires a future-enabled query, call with_future() first")]
    FutureNotEnabled { operation: String },

    #[error("Strict key check failed: requested {requested}, returned {returned}")]
    KeyMismatch { requested: String, returned: String },

    #[error("Load limit {limit} = {value} reached at {at}")]
    LoadLimitReached {
        limit: String,
        value: usize,
        at: String,
    },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Malformed configuration: {reason}")]
    Malformed { reason: String },
}

/// Master error type for all asof errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AsofError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for asof operations.
pub type AsofResult<T> = Result<T, AsofError>;

// =============================================================================
// TESTS
// =============================================================================
