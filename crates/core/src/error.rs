// crates/core/src/error.rs
use std::path::PathBuf;
use subtitler_types::{ValidationError, WizardStep};
use thiserror::Error;

/// Errors raised by an [`crate::transport::ExportTransport`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Render service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Connectivity problems, timeouts, server-side 5xx, 408 and 429 are
    /// transient. A missing resource or any other client error is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout | Self::Decode(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::NotFound(_) => false,
        }
    }
}

/// Errors returned by [`crate::ExportStore::submit`] and [`crate::ExportStore::retry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("Invalid render request: {0}")]
    Invalid(#[from] ValidationError),

    #[error("An export is already in progress")]
    AlreadyInProgress,

    #[error("Render service did not return an export token")]
    MissingToken,

    #[error("Render service rejected the export ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Could not reach the render service: {0}")]
    Network(String),

    #[error("Export was cancelled before it started")]
    Cancelled,

    #[error("No previous export to retry")]
    NothingToRetry,
}

impl From<TransportError> for SubmissionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) => Self::Network(msg),
            TransportError::Timeout => Self::Network("request timed out".into()),
            TransportError::Status { status, message } => Self::Rejected { status, message },
            TransportError::NotFound(message) => Self::Rejected {
                status: 404,
                message,
            },
            // A 2xx body we cannot read carries no usable token.
            TransportError::Decode(_) => Self::MissingToken,
        }
    }
}

/// Errors from driving the [`crate::wizard::WizardController`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WizardError {
    #[error("Cannot {action} from step '{from}'")]
    InvalidTransition {
        from: WizardStep,
        action: &'static str,
    },

    #[error("No upload selected")]
    NoUpload,

    #[error("A preview is still rendering")]
    PreviewRunning,

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// Errors that can occur while loading [`crate::config::ExportConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid render service URL '{0}'")]
    InvalidUrl(String),

    #[error("Invalid poll settings: {0}")]
    InvalidPolling(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}
