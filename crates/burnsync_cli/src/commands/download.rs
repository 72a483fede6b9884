//! Download command implementation.

use crate::config::Settings;
use crate::error::CliError;
use burnsync_engine::{download_all, DownloadReport, RemoteTransport};
use burnsync_server::{ConnectionManager, ServerConfig};
use tracing::info;

/// Waits for the remote host, downloads every file once, then exits.
///
/// `servers` replaces the configured server list when non-empty.
pub async fn run(settings: Settings, servers: Vec<String>) -> Result<(), CliError> {
    let server_config = ServerConfig::default()
        .with_port(settings.port)
        .with_ack_timeout(settings.timeout);
    let manager = ConnectionManager::start(server_config).await?;
    let mut events = manager.subscribe();

    let mut download = settings.engine.download;
    if !servers.is_empty() {
        download = download.with_servers(servers);
    }

    info!(port = manager.port(), "waiting for remote host");
    while !manager.is_connected() {
        tokio::select! {
            _ = events.recv() => {}
            _ = tokio::signal::ctrl_c() => {
                manager.shutdown();
                return Ok(());
            }
        }
    }

    let report = download_all(&manager, &download).await;
    report.log();
    manager.shutdown();
    summarize(&report)
}

fn summarize(report: &DownloadReport) -> Result<(), CliError> {
    if report.is_complete() {
        return Ok(());
    }
    Err(CliError::DownloadIncomplete {
        servers: report
            .failed_servers
            .iter()
            .map(|(server, _)| server.clone())
            .collect(),
        files: report.write_errors.len(),
    })
}
