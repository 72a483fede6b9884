//! Pulling files from the remote host into the local tree.

use crate::config::DownloadConfig;
use crate::error::SyncResult;
use crate::transport::RemoteTransport;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// What a download-all run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Local files written, in write order.
    pub written: Vec<PathBuf>,
    /// Remote files skipped by the ignore rules, the location function, or
    /// because their path would leave the download root.
    pub skipped: usize,
    /// Servers whose listing failed, with the error message.
    pub failed_servers: Vec<(String, String)>,
    /// Local files that could not be written, with the error message.
    pub write_errors: Vec<(PathBuf, String)>,
}

impl DownloadReport {
    /// Returns true if every server was listed and every file written.
    pub fn is_complete(&self) -> bool {
        self.failed_servers.is_empty() && self.write_errors.is_empty()
    }

    /// Logs a summary of the run.
    pub fn log(&self) {
        if self.is_complete() {
            info!(written = self.written.len(), skipped = self.skipped, "download finished");
        } else {
            warn!(
                written = self.written.len(),
                skipped = self.skipped,
                failed_servers = self.failed_servers.len(),
                write_errors = self.write_errors.len(),
                "download finished with errors"
            );
        }
    }
}

/// Downloads every file from every configured server.
///
/// A failed listing is recorded and the remaining servers are still
/// processed. Files are written with their content unchanged.
pub async fn download_all(transport: &dyn RemoteTransport, config: &DownloadConfig) -> DownloadReport {
    let mut report = DownloadReport::default();

    for server in &config.servers {
        let files = match transport.list_files(server).await {
            Ok(files) => files,
            Err(e) => {
                warn!(%server, error = %e, "failed to list remote files");
                report.failed_servers.push((server.clone(), e.to_string()));
                continue;
            }
        };
        debug!(%server, files = files.len(), "remote files listed");

        for file in files {
            if config.ignore.is_ignored(&file.filename) {
                report.skipped += 1;
                continue;
            }
            let Some(path) = config.local_path(&file.filename, server) else {
                report.skipped += 1;
                continue;
            };
            if !is_within(&path, &config.root) {
                warn!(
                    %server,
                    filename = %file.filename,
                    path = %path.display(),
                    "remote file escapes the download root, skipped"
                );
                report.skipped += 1;
                continue;
            }
            match write_file(&path, file.content.as_bytes()).await {
                Ok(()) => {
                    debug!(%server, filename = %file.filename, path = %path.display(), "downloaded");
                    report.written.push(path);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to write downloaded file");
                    report.write_errors.push((path, e.to_string()));
                }
            }
        }
    }

    report
}

/// Fetches the script API definition file and writes it to `path`.
pub async fn fetch_definition(transport: &dyn RemoteTransport, path: &Path) -> SyncResult<()> {
    let content = transport.definition_file().await?;
    write_file(path, content.as_bytes()).await?;
    info!(path = %path.display(), "definition file updated");
    Ok(())
}

/// True if `path` has no `..` component and lies under `root`.
pub(crate) fn is_within(path: &Path, root: &Path) -> bool {
    !path.components().any(|c| matches!(c, Component::ParentDir)) && path.starts_with(root)
}

pub(crate) async fn write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}
