//! The serialized sync timeline.
//!
//! [`SyncService::run`] owns the adapter and its tracker. Pipeline
//! notifications, connection events and operator commands all arrive as
//! [`EngineEvent`]s on one channel and are applied one at a time, so
//! enqueues, removals and drain passes never interleave.
//!
//! A drain pass runs as its own task, sending entries one by one over a
//! snapshot and reporting every outcome back to the service. Only one pass
//! runs at a time; triggers that arrive meanwhile schedule a single
//! follow-up pass.
//!
//! With a dump directory configured, every payload the adapter enqueues is
//! also handed to a writer task that keeps a local copy.

use crate::adapter::{push_file, AdapterState, DeliveryFailure, SyncAdapter, SyncStats};
use crate::download;
use crate::dump::{self, DumpBatch};
use crate::error::{SyncError, SyncResult};
use crate::pipeline::{BuildPipeline, ChangeSubscriber, PathResolver};
use crate::tracker::DeliveryItem;
use crate::transport::{ConnectionEvent, PeerId, RemoteTransport, SendOutcome};
use crate::types::ChangeNotification;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Discrete operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask the pipeline to rebuild and re-emit every file.
    ForceReload,
    /// Run a full drain pass now.
    UploadAll,
    /// Pull every remote file into the local tree.
    DownloadAll,
    /// Report the current status.
    ShowStatus,
    /// Stop the service.
    Quit,
}

/// State exposed to the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// True iff a peer session is open.
    pub connected: bool,
    /// Number of pending deliveries.
    pub pending_count: usize,
    /// Listen port.
    pub port: u16,
    /// Adapter state.
    pub state: AdapterState,
    /// True while a drain pass is running.
    pub draining: bool,
    /// Deliveries given up on since startup.
    pub failed: u64,
    /// Most recent delivery given up on.
    pub last_failure: Option<DeliveryFailure>,
}

/// Inputs to the sync timeline.
#[derive(Debug)]
pub enum EngineEvent {
    /// A built file changed.
    Change(ChangeNotification),
    /// The pipeline finished its startup pass.
    BuildStarted,
    /// The connection manager reported a transition.
    Connection(ConnectionEvent),
    /// An operator command, with an optional reply channel.
    Command(Command, Option<oneshot::Sender<SyncStatus>>),
}

/// Summary returned when the service stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReport {
    /// Delivery statistics.
    pub stats: SyncStats,
    /// Deliveries still pending at shutdown.
    pub pending: usize,
}

#[derive(Debug)]
enum DrainMessage {
    Outcome(DeliveryItem, SendOutcome),
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Cloneable handle feeding events into a running [`SyncService`].
#[derive(Clone)]
pub struct EngineHandle {
    events: mpsc::UnboundedSender<EngineEvent>,
    status: watch::Receiver<SyncStatus>,
}

impl EngineHandle {
    fn send(&self, event: EngineEvent) -> SyncResult<()> {
        self.events
            .send(event)
            .map_err(|_| SyncError::ServiceStopped)
    }

    /// Forwards a change notification.
    pub fn notify_change(&self, notification: ChangeNotification) -> SyncResult<()> {
        self.send(EngineEvent::Change(notification))
    }

    /// Forwards the build-started signal.
    pub fn notify_build_started(&self) -> SyncResult<()> {
        self.send(EngineEvent::BuildStarted)
    }

    /// Forwards a connection transition.
    pub fn notify_connection(&self, event: ConnectionEvent) -> SyncResult<()> {
        self.send(EngineEvent::Connection(event))
    }

    /// Issues a command and waits until the service has handled it.
    ///
    /// Returns the status right after the command was applied.
    pub async fn command(&self, command: Command) -> SyncResult<SyncStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineEvent::Command(command, Some(tx)))?;
        rx.await.map_err(|_| SyncError::ServiceStopped)
    }

    /// Returns the latest published status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Subscribes to status updates.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }
}

impl ChangeSubscriber for EngineHandle {
    fn on_change(&self, notification: ChangeNotification) {
        if self.notify_change(notification).is_err() {
            debug!("change dropped: sync service stopped");
        }
    }

    fn on_build_started(&self) {
        if self.notify_build_started().is_err() {
            debug!("build start dropped: sync service stopped");
        }
    }
}

/// Owns the adapter and serializes every mutation of its state.
pub struct SyncService<R: PathResolver> {
    adapter: SyncAdapter<R>,
    transport: Arc<dyn RemoteTransport>,
    pipeline: Arc<dyn BuildPipeline>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    drain_tx: mpsc::UnboundedSender<DrainMessage>,
    drain_rx: mpsc::UnboundedReceiver<DrainMessage>,
    status: watch::Sender<SyncStatus>,
    peer: Option<PeerId>,
    drain: Option<JoinHandle<()>>,
    redrain: bool,
    last_failure: Option<DeliveryFailure>,
    dump: Option<mpsc::UnboundedSender<DumpBatch>>,
}

impl<R: PathResolver> SyncService<R> {
    /// Creates a service and the handle that feeds it.
    pub fn new(
        adapter: SyncAdapter<R>,
        transport: Arc<dyn RemoteTransport>,
        pipeline: Arc<dyn BuildPipeline>,
    ) -> (Self, EngineHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (drain_tx, drain_rx) = mpsc::unbounded_channel();
        let initial = SyncStatus {
            connected: false,
            pending_count: adapter.pending_count(),
            port: adapter.config().port,
            state: adapter.state(),
            draining: false,
            failed: 0,
            last_failure: None,
        };
        let (status_tx, status_rx) = watch::channel(initial);

        let service = Self {
            adapter,
            transport,
            pipeline,
            events: events_rx,
            drain_tx,
            drain_rx,
            status: status_tx,
            peer: None,
            drain: None,
            redrain: false,
            last_failure: None,
            dump: None,
        };
        let handle = EngineHandle {
            events: events_tx,
            status: status_rx,
        };
        (service, handle)
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            connected: self.peer.is_some(),
            pending_count: self.adapter.pending_count(),
            port: self.adapter.config().port,
            state: self.adapter.state(),
            draining: self.drain.is_some(),
            failed: self.adapter.stats().failed,
            last_failure: self.last_failure.clone(),
        }
    }

    /// Runs until `Quit` or until every handle is dropped.
    ///
    /// Stopping aborts a running drain pass. Entries whose acknowledgment
    /// had not been applied stay pending.
    pub async fn run(mut self) -> ServiceReport {
        let writer = self.adapter.config().dump_files.clone().map(|dir| {
            info!(dir = %dir.display(), "dumping built files");
            let (tx, task) = dump::spawn_writer(dir);
            self.dump = Some(tx);
            task
        });

        loop {
            let flow = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => Flow::Quit,
                },
                Some(message) = self.drain_rx.recv() => {
                    self.handle_drain_message(message);
                    Flow::Continue
                }
            };
            self.status.send_replace(self.status());
            if flow == Flow::Quit {
                break;
            }
        }

        if let Some(drain) = self.drain.take() {
            drain.abort();
            debug!("drain pass aborted");
        }
        self.dump = None;
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "dump writer failed");
            }
        }
        let report = ServiceReport {
            stats: self.adapter.stats(),
            pending: self.adapter.pending_count(),
        };
        info!(pending = report.pending, delivered = report.stats.delivered, "sync service stopped");
        report
    }

    fn handle_event(&mut self, event: EngineEvent) -> Flow {
        match event {
            EngineEvent::Change(notification) => {
                let enqueued = self.adapter.handle_change(notification);
                self.dump_enqueued();
                if enqueued > 0 && self.peer.is_some() {
                    self.request_drain();
                }
                Flow::Continue
            }
            EngineEvent::BuildStarted => {
                let enqueued = self.adapter.build_started();
                self.dump_enqueued();
                if enqueued > 0 && self.peer.is_some() {
                    self.request_drain();
                }
                Flow::Continue
            }
            EngineEvent::Connection(event) => {
                self.handle_connection(event);
                Flow::Continue
            }
            EngineEvent::Command(command, reply) => {
                let flow = self.handle_command(command);
                if let Some(reply) = reply {
                    let _ = reply.send(self.status());
                }
                flow
            }
        }
    }

    fn handle_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { peer } => {
                info!(%peer, pending = self.adapter.pending_count(), "remote host connected");
                self.peer = Some(peer);
                self.request_drain();
                if let Some(path) = self.adapter.config().definition_file.clone() {
                    let transport = Arc::clone(&self.transport);
                    tokio::spawn(async move {
                        if let Err(e) = download::fetch_definition(transport.as_ref(), &path).await {
                            warn!(error = %e, "failed to fetch definition file");
                        }
                    });
                }
            }
            ConnectionEvent::Disconnected { peer } => {
                if self.peer.as_ref() == Some(&peer) {
                    info!(%peer, "remote host disconnected");
                    self.peer = None;
                } else {
                    debug!(%peer, "stale session closed");
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Flow {
        debug!(?command, "command received");
        match command {
            Command::ForceReload => {
                info!("full reload requested");
                self.pipeline.trigger_full_reload();
                if self.peer.is_some() {
                    let transport = Arc::clone(&self.transport);
                    tokio::spawn(async move {
                        if let Err(e) = transport.notify_full_reload().await {
                            debug!(error = %e, "full reload notice not sent");
                        }
                    });
                }
            }
            Command::UploadAll => {
                info!(pending = self.adapter.pending_count(), "upload of all pending files requested");
                self.request_drain();
            }
            Command::DownloadAll => {
                let transport = Arc::clone(&self.transport);
                let config = self.adapter.config().download.clone();
                tokio::spawn(async move {
                    let report = download::download_all(transport.as_ref(), &config).await;
                    report.log();
                });
            }
            Command::ShowStatus => {
                let status = self.status();
                info!(
                    connected = status.connected,
                    pending = status.pending_count,
                    port = status.port,
                    failed = status.failed,
                    "status"
                );
            }
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn dump_enqueued(&mut self) {
        let batch = self.adapter.take_enqueued();
        if batch.is_empty() {
            return;
        }
        if let Some(dump) = &self.dump {
            if dump.send(batch).is_err() {
                warn!("dump writer stopped");
                self.dump = None;
            }
        }
    }

    fn request_drain(&mut self) {
        if self.drain.is_some() {
            self.redrain = true;
            return;
        }
        if self.adapter.pending_count() == 0 {
            return;
        }

        let items = self.adapter.drain_plan();
        debug!(entries = items.len(), "drain pass started");
        let transport = Arc::clone(&self.transport);
        let tx = self.drain_tx.clone();
        self.drain = Some(tokio::spawn(async move {
            for item in items {
                let outcome = transport.push_file(push_file(&item)).await;
                let stop = outcome.is_connection_error();
                if tx.send(DrainMessage::Outcome(item, outcome)).is_err() {
                    return;
                }
                if stop {
                    break;
                }
            }
            let _ = tx.send(DrainMessage::Finished);
        }));
    }

    fn handle_drain_message(&mut self, message: DrainMessage) {
        match message {
            DrainMessage::Outcome(item, outcome) => {
                self.adapter.apply_outcome(&item, &outcome);
                if let Some(failure) = self.adapter.take_failures().pop() {
                    self.last_failure = Some(failure);
                }
            }
            DrainMessage::Finished => {
                self.drain = None;
                debug!(pending = self.adapter.pending_count(), "drain pass finished");
                if std::mem::take(&mut self.redrain) {
                    self.request_drain();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pipeline::RecordingPipeline;
    use crate::transport::MockTransport;
    use crate::types::PushTarget;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn resolver(path: &str) -> Vec<PushTarget> {
        vec![PushTarget::new(path, "home")]
    }

    fn service(
        transport: Arc<MockTransport>,
    ) -> (
        SyncService<fn(&str) -> Vec<PushTarget>>,
        EngineHandle,
        Arc<RecordingPipeline>,
    ) {
        service_with(transport, None)
    }

    fn service_with(
        transport: Arc<MockTransport>,
        dump_files: Option<PathBuf>,
    ) -> (
        SyncService<fn(&str) -> Vec<PushTarget>>,
        EngineHandle,
        Arc<RecordingPipeline>,
    ) {
        let config = EngineConfig::default()
            .with_definition_file(None)
            .with_dump_files(dump_files);
        let adapter = SyncAdapter::new(resolver as fn(&str) -> Vec<PushTarget>, config);
        let pipeline = Arc::new(RecordingPipeline::new());
        let (service, handle) = SyncService::new(adapter, transport, pipeline.clone());
        (service, handle, pipeline)
    }

    #[tokio::test]
    async fn status_reflects_pending_and_state() {
        let transport = Arc::new(MockTransport::new());
        let (service, handle, _) = service(transport);
        let task = tokio::spawn(service.run());

        handle.notify_change(ChangeNotification::initial("a.js", "1")).unwrap();
        let status = handle.command(Command::ShowStatus).await.unwrap();
        assert_eq!(status.state, AdapterState::Deferred);
        assert_eq!(status.pending_count, 0);

        handle.notify_build_started().unwrap();
        let status = handle.command(Command::ShowStatus).await.unwrap();
        assert_eq!(status.state, AdapterState::Draining);
        assert_eq!(status.pending_count, 1);
        assert!(!status.connected);
        assert_eq!(status.port, 12525);

        handle.command(Command::Quit).await.unwrap();
        let report = task.await.unwrap();
        assert_eq!(report.pending, 1);
    }

    #[tokio::test]
    async fn force_reload_while_disconnected_sends_nothing() {
        let transport = Arc::new(MockTransport::new());
        let (service, handle, pipeline) = service(transport.clone());
        let task = tokio::spawn(service.run());

        handle.notify_build_started().unwrap();
        handle.command(Command::ForceReload).await.unwrap();
        handle.notify_change(ChangeNotification::new("a.js", "1")).unwrap();
        handle.command(Command::ShowStatus).await.unwrap();

        assert_eq!(pipeline.reloads(), 1);
        assert!(transport.attempts().is_empty());
        assert_eq!(transport.reload_notices(), 0);

        handle.command(Command::Quit).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn enqueued_files_are_dumped() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let (service, handle, _) = service_with(transport, Some(dir.path().to_path_buf()));
        let task = tokio::spawn(service.run());

        handle.notify_change(ChangeNotification::initial("a.js", "1")).unwrap();
        handle.notify_build_started().unwrap();
        handle.notify_change(ChangeNotification::new("lib/b.js", "b")).unwrap();
        handle.notify_change(ChangeNotification::new("a.js", "2")).unwrap();
        handle.command(Command::Quit).await.unwrap();
        task.await.unwrap();

        let home = dir.path().join("home");
        assert_eq!(std::fs::read_to_string(home.join("a.js")).unwrap(), "2");
        assert_eq!(std::fs::read_to_string(home.join("lib").join("b.js")).unwrap(), "b");
    }

    #[tokio::test]
    async fn nothing_is_dumped_before_build_start() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let (service, handle, _) = service_with(transport, Some(dir.path().to_path_buf()));
        let task = tokio::spawn(service.run());

        handle.notify_change(ChangeNotification::initial("a.js", "1")).unwrap();
        handle.command(Command::Quit).await.unwrap();
        task.await.unwrap();

        assert!(!dir.path().join("home").exists());
    }

    #[tokio::test]
    async fn handle_reports_stopped_service() {
        let transport = Arc::new(MockTransport::new());
        let (service, handle, _) = service(transport);
        drop(service);
        assert!(matches!(
            handle.notify_build_started(),
            Err(SyncError::ServiceStopped)
        ));
        assert!(matches!(
            handle.command(Command::ShowStatus).await,
            Err(SyncError::ServiceStopped)
        ));
    }
}
