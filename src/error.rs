//! Error types for DVR

use std::io;
use thiserror::Error;

/// Result type for DVR operations
pub type Result<T> = std::result::Result<T, DvrError>;

/// Errors that can occur in DVR
///
/// `FixtureMismatch`, `RecordingDisabled` and `PersistenceFailure` describe
/// broken fixtures or setup rather than runtime conditions. Test harnesses are
/// expected to fail the test when they see one of them.
#[derive(Debug, Error)]
pub enum DvrError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request was not found in a cassette that exists
    #[error("Invalid request. The request was not found in cassette '{cassette}': {request}")]
    FixtureMismatch {
        /// Cassette that was searched
        cassette: String,
        /// Debug key of the live request
        request: String,
    },

    /// No cassette exists and recording is disabled
    #[error("Recording is disabled and cassette '{cassette}' does not exist")]
    RecordingDisabled {
        /// Cassette that was looked up
        cassette: String,
    },

    /// Cassette could not be persisted
    #[error("Failed to persist cassette: {0}")]
    PersistenceFailure(String),

    /// Real client failed before producing a response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid cassette file format
    #[error("Invalid cassette format: {0}")]
    InvalidFormat(String),

    /// Task was activated twice
    #[error("Task {id} cannot be resumed from state {state}")]
    InvalidTaskState {
        /// Task identifier
        id: u64,
        /// State the task was in
        state: String,
    },

    /// No recording window is open
    #[error("No recording window is open")]
    WindowNotOpen,

    /// Invalid cassette name
    #[error("Invalid cassette name: {0}")]
    InvalidCassetteName(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl DvrError {
    /// Whether this error marks a broken fixture or setup
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FixtureMismatch { .. } | Self::RecordingDisabled { .. } | Self::PersistenceFailure(_)
        )
    }
}
