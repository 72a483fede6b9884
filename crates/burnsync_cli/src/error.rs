//! Error types for the CLI.

use burnsync_engine::SyncError;
use burnsync_server::ServerError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop the CLI.
#[derive(Error, Debug)]
pub enum CliError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid JSON for the expected schema.
    #[error("invalid config {path}: {source}")]
    ConfigParse {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// A config value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A watch pattern failed to compile.
    #[error("invalid watch pattern '{pattern}': {source}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// Underlying error.
        source: glob::PatternError,
    },

    /// The file watcher could not be started.
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// The connection manager failed.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The sync service failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Some servers or files could not be downloaded.
    #[error("download incomplete: failed servers {servers:?}, {files} file(s) not written")]
    DownloadIncomplete {
        /// Servers whose listing failed.
        servers: Vec<String>,
        /// Number of files that could not be written.
        files: usize,
    },

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
