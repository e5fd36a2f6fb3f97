//! Crate-wide error type.

use thiserror::Error;

/// Errors surfaced by the completion gateway, the workspace filesystem and
/// the agent orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    /// The provider could not be reached at all (DNS, connect, timeout).
    #[error("network error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("provider error (status {status}): {message}")]
    Provider { status: u16, message: String },

    /// A provider success body could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// A workspace path that was asked for does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The in-flight run was cancelled at a step boundary.
    #[error("Operation cancelled")]
    Cancelled,

    /// A prompt arrived while another one was still being processed.
    #[error("Already processing a request")]
    AlreadyProcessing,

    /// A requested operation failed validation before being applied.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The sandbox runtime failed in a way no other variant covers.
    #[error("sandbox runtime error: {0}")]
    Runtime(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Runtime(format!("{err:#}"))
    }
}
