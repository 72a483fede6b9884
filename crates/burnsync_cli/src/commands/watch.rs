//! Watch command implementation.

use crate::config::Settings;
use crate::control;
use crate::error::CliError;
use crate::pipeline::{self, FsPipeline};
use crate::resolver::GlobResolver;
use burnsync_engine::{
    Command, ConnectionEvent, EngineHandle, PeerId, RemoteTransport, SyncAdapter, SyncService,
};
use burnsync_server::{ConnectionManager, ServerConfig};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

/// Runs the sync loop until quit or Ctrl-C.
pub async fn run(settings: Settings) -> Result<(), CliError> {
    let server_config = ServerConfig::default()
        .with_port(settings.port)
        .with_ack_timeout(settings.timeout);
    let manager = Arc::new(ConnectionManager::start(server_config).await?);
    let events = manager.subscribe();

    if settings.watch.is_empty() {
        warn!("no watch rules configured; nothing will be pushed");
    }
    let resolver = GlobResolver::new(&settings.watch)?;
    let adapter = SyncAdapter::new(
        resolver.clone(),
        settings.engine.clone().with_port(manager.port()),
    );
    let (fs_pipeline, reloads) = FsPipeline::new();
    let transport: Arc<dyn RemoteTransport> = manager.clone();
    let (service, handle) = SyncService::new(adapter, transport, Arc::new(fs_pipeline));
    let service = tokio::spawn(service.run());

    tokio::spawn(forward_connection_events(
        events,
        Arc::clone(&manager),
        handle.clone(),
    ));
    let watcher = pipeline::spawn(&settings.root, resolver, reloads, Arc::new(handle.clone()))?;
    info!(port = manager.port(), "burnsync ready");

    let quit_requested =
        control::wait_for_exit(handle.clone(), control::stdin_lines(), shutdown_signal()).await?;
    if !quit_requested {
        if let Err(e) = handle.command(Command::Quit).await {
            warn!(error = %e, "sync service already stopped");
        }
    }

    let report = service.await?;
    watcher.abort();
    manager.shutdown();
    info!(
        delivered = report.stats.delivered,
        failed = report.stats.failed,
        pending = report.pending,
        "bye"
    );
    Ok(())
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Relays connection transitions to the engine.
///
/// After a lag the manager's current peer is re-announced, with a
/// disconnect for the last relayed peer if it is gone.
async fn forward_connection_events(
    mut events: broadcast::Receiver<ConnectionEvent>,
    manager: Arc<ConnectionManager>,
    handle: EngineHandle,
) {
    let mut current: Option<PeerId> = None;
    loop {
        let relay = match events.recv().await {
            Ok(event) => vec![event],
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "connection events lagged");
                resync(current.as_ref(), manager.peer())
            }
            Err(RecvError::Closed) => break,
        };
        for event in relay {
            match &event {
                ConnectionEvent::Connected { peer } => current = Some(peer.clone()),
                ConnectionEvent::Disconnected { peer } if current.as_ref() == Some(peer) => {
                    current = None
                }
                ConnectionEvent::Disconnected { .. } => {}
            }
            if handle.notify_connection(event).is_err() {
                return;
            }
        }
    }
}

fn resync(relayed: Option<&PeerId>, live: Option<PeerId>) -> Vec<ConnectionEvent> {
    if relayed == live.as_ref() {
        return Vec::new();
    }
    let mut events = Vec::new();
    if let Some(peer) = relayed {
        events.push(ConnectionEvent::Disconnected { peer: peer.clone() });
    }
    if let Some(peer) = live {
        events.push(ConnectionEvent::Connected { peer });
    }
    events
}
