//! Error types for the wire protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while encoding or decoding frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is well-formed JSON but not a valid JSON-RPC message.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The remote host answered with an error object.
    #[error("remote error: {message}")]
    Remote {
        /// Error code, when the remote sent one.
        code: Option<i64>,
        /// Error message.
        message: String,
    },

    /// A response carried neither a result nor an error.
    #[error("response {0:?} carries no result")]
    MissingResult(Option<u64>),
}

impl ProtocolError {
    /// Creates an invalid frame error.
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame(message.into())
    }

    /// Returns true if the remote host rejected the request.
    pub fn is_remote(&self) -> bool {
        matches!(self, ProtocolError::Remote { .. })
    }
}
