//! Error types for MediaLens.
//!
//! Library crates use [`MediaLensError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all MediaLens pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum MediaLensError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// State database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed key, bad date range, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// An explicitly requested job, window or run does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Two requested steps cannot run in the same invocation.
    #[error("conflicting steps: '{first}' cannot be combined with '{second}'")]
    Conflict { first: String, second: String },

    /// A window has no member jobs and cannot produce an analysis.
    #[error("insufficient data: window {window} has no member jobs")]
    InsufficientData { window: String },

    /// Retryable failure reported by an external collaborator.
    #[error("transient provider error: {0}")]
    TransientProvider(String),

    /// Non-retryable failure reported by an external collaborator.
    #[error("fatal provider error: {0}")]
    FatalProvider(String),

    /// A cursor advance would move the position backwards.
    #[error("cursor for '{stage}' is at {current}; refusing to move it back to {requested}")]
    CursorRegression {
        stage: String,
        current: String,
        requested: String,
    },

    /// Another writer updated a cursor between our read and our write.
    #[error("concurrent write detected on cursor '{stage}'")]
    ConcurrentWrite { stage: String },

    /// A cursor stage is locked by another run.
    #[error("stage '{stage}' is locked by run {holder}")]
    StageLocked { stage: String, holder: String },

    /// A persisted record failed its integrity check.
    #[error("corrupted record: {what}")]
    Corrupted { what: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MediaLensError>;

impl MediaLensError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error naming the missing thing.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether re-invoking the same request may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientProvider(_))
    }
}
