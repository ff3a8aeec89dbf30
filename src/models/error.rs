//! Error types for labelrun.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected per-record failures (service did not answer,
//!   service answered uninterpretably). Recovered inside the batch runner.
//! - I^B materialized: Checkpoint I/O failures. Fatal, the run aborts.
//! - K_i violated: Internal invariant violations (bugs)

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for labelrun.
#[derive(Debug, Error)]
pub enum LabelrunError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED : Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Classification service error: {0}")]
    Service(#[from] ServiceError),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED : Checkpoint cannot be trusted, abort the run
    // ═══════════════════════════════════════════════════════════════════
    #[error("Checkpoint IO error: {context} ({path})")]
    CheckpointIo {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint format error in {path}: {message}")]
    CheckpointFormat { path: PathBuf, message: String },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED : Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single classification call.
///
/// Every variant is a per-record, retry-eligible failure: the record is left
/// out of the checkpoint and offered again on a later cycle.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl ServiceError {
    /// Whether the transport layer should retry the request itself.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get retry delay hint in seconds, if applicable.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// The service answered, but nothing in the payload is usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("no line parsed into a category/probability pair")]
    Empty,

    #[error("category '{0}' is not in the configured category set")]
    UnknownCategory(String),
}

impl LabelrunError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a checkpoint IO error with context and path.
    pub fn checkpoint_io(
        context: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::CheckpointIo {
            context: context.into(),
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the checkpoint can no longer be trusted.
    pub fn is_checkpoint_failure(&self) -> bool {
        matches!(
            self,
            Self::CheckpointIo { .. } | Self::CheckpointFormat { .. }
        )
    }
}

/// Result type alias for labelrun.
pub type Result<T> = std::result::Result<T, LabelrunError>;
