//! Error types for tiergate-core.

use thiserror::Error;

/// Result type alias using tiergate-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while routing, generating, or scoring.
#[derive(Error, Debug)]
pub enum Error {
    /// A backend failed its health probe, errored, timed out, or was cancelled.
    ///
    /// Recovered inside the manager by moving to the next backend in order.
    #[error("Backend unavailable: {backend} - {message}")]
    BackendUnavailable { backend: String, message: String },

    /// Every configured backend failed for a request.
    #[error("All backends failed: {0}")]
    TerminalFailure(String),

    /// A scoring method could not score a single rubric question
    #[error("Evaluation failed for '{question}': {message}")]
    Evaluation { question: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout during a backend call
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The caller cancelled the request
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (config files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a backend-unavailable error.
    pub fn backend_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create an evaluation error for one question.
    pub fn evaluation(question: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            question: question.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error means a backend could not serve the call, as opposed
    /// to a programming or configuration mistake.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::Timeout { .. } | Self::Cancelled
        )
    }
}
