//! Error types for the sync engine.

use burnsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No remote peer is connected.
    #[error("not connected to remote host")]
    NotConnected,

    /// The peer session closed while a request was in flight.
    #[error("connection lost")]
    ConnectionLost,

    /// No acknowledgment arrived within the configured timeout.
    #[error("acknowledgment timed out")]
    AckTimeout,

    /// The remote host answered with an error.
    #[error("rejected by remote host: {0}")]
    Rejected(String),

    /// Listing files on a remote server failed.
    #[error("failed to list files on {server}: {message}")]
    RemoteList {
        /// Server that was being listed.
        server: String,
        /// Error message.
        message: String,
    },

    /// Protocol error (invalid frame or reply).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The sync service has stopped and no longer accepts events.
    #[error("sync service stopped")]
    ServiceStopped,
}

impl SyncError {
    /// Creates a remote list error.
    pub fn remote_list(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteList {
            server: server.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_convert() {
        let err: SyncError = ProtocolError::invalid_frame("expected object").into();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(err.to_string().contains("expected object"));
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to remote host");

        let err = SyncError::remote_list("n00dles", "timed out");
        assert!(err.to_string().contains("n00dles"));
        assert!(err.to_string().contains("timed out"));
    }
}
