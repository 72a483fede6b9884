//! Integration tests for the sync service.

use burnsync_engine::{
    ChangeNotification, Command, ConnectionEvent, EngineConfig, EngineHandle, MockTransport,
    DeliveryKey, FailureReason, PeerId, PushTarget, RecordingPipeline, RemoteTransport,
    SendOutcome, ServiceReport, SyncAdapter, SyncService, SyncStatus,
};
use burnsync_protocol::RemoteFile;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

fn home(path: &str) -> Vec<PushTarget> {
    if path.ends_with(".txt") {
        return Vec::new();
    }
    vec![PushTarget::new(path, "home")]
}

struct Harness {
    handle: EngineHandle,
    pipeline: Arc<RecordingPipeline>,
    task: JoinHandle<ServiceReport>,
}

fn start(transport: Arc<MockTransport>, config: EngineConfig) -> Harness {
    let adapter = SyncAdapter::new(home, config);
    let pipeline = Arc::new(RecordingPipeline::new());
    let transport: Arc<dyn RemoteTransport> = transport;
    let (service, handle) = SyncService::new(adapter, transport, pipeline.clone());
    Harness {
        handle,
        pipeline,
        task: tokio::spawn(service.run()),
    }
}

fn config() -> EngineConfig {
    EngineConfig::default().with_definition_file(None)
}

fn connect(transport: &MockTransport, handle: &EngineHandle, peer: &str) {
    transport.set_connected(true);
    handle
        .notify_connection(ConnectionEvent::Connected {
            peer: PeerId::new(peer),
        })
        .unwrap();
}

async fn wait_for(handle: &EngineHandle, pred: impl Fn(&SyncStatus) -> bool) -> SyncStatus {
    let mut rx = handle.watch_status();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = rx.borrow_and_update().clone();
            if pred(&status) {
                return status;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("status condition not reached")
}

async fn settled(handle: &EngineHandle) -> SyncStatus {
    wait_for(handle, |s| s.connected && !s.draining).await
}

async fn quit(harness: Harness) -> ServiceReport {
    harness.handle.command(Command::Quit).await.unwrap();
    harness.task.await.unwrap()
}

#[tokio::test]
async fn deferred_batch_coalesces_and_drains_in_order() {
    let transport = Arc::new(MockTransport::new());
    let h = start(transport.clone(), config());

    h.handle.notify_change(ChangeNotification::initial("a.js", "a1")).unwrap();
    h.handle.notify_change(ChangeNotification::initial("b.js", "b1")).unwrap();
    h.handle.notify_change(ChangeNotification::initial("a.js", "a2")).unwrap();

    let status = h.handle.command(Command::ShowStatus).await.unwrap();
    assert_eq!(status.pending_count, 0);

    h.handle.notify_build_started().unwrap();
    let status = h.handle.command(Command::ShowStatus).await.unwrap();
    assert_eq!(status.pending_count, 2);
    assert!(transport.attempts().is_empty());

    connect(&transport, &h.handle, "peer-1");
    let status = wait_for(&h.handle, |s| s.connected && !s.draining && s.pending_count == 0).await;
    assert_eq!(status.pending_count, 0);

    let attempts = transport.attempts();
    assert_eq!(transport.attempted_filenames(), vec!["a.js", "b.js"]);
    assert_eq!(attempts[0].content, "a2");
    assert_eq!(attempts[0].server, "home");

    let report = quit(h).await;
    assert_eq!(report.stats.delivered, 2);
    assert_eq!(report.stats.coalesced, 1);
}

#[tokio::test]
async fn reconnect_drains_everything_pending() {
    let transport = Arc::new(MockTransport::new());
    let h = start(transport.clone(), config());
    h.handle.notify_build_started().unwrap();

    for name in ["one.js", "two.js", "three.js", "skip.txt"] {
        h.handle.notify_change(ChangeNotification::new(name, name)).unwrap();
    }
    let status = h.handle.command(Command::ShowStatus).await.unwrap();
    assert_eq!(status.pending_count, 3);

    connect(&transport, &h.handle, "peer-1");
    let status = wait_for(&h.handle, |s| s.connected && !s.draining && s.pending_count == 0).await;
    assert_eq!(status.pending_count, 0);
    assert_eq!(
        transport.attempted_filenames(),
        vec!["one.js", "two.js", "three.js"]
    );
    quit(h).await;
}

#[tokio::test]
async fn live_changes_are_pushed_when_connected() {
    let transport = Arc::new(MockTransport::new());
    let h = start(transport.clone(), config());
    h.handle.notify_build_started().unwrap();
    connect(&transport, &h.handle, "peer-1");
    settled(&h.handle).await;

    h.handle.notify_change(ChangeNotification::new("live.js", "x")).unwrap();
    wait_for(&h.handle, |s| !s.draining && s.pending_count == 0).await;
    assert_eq!(transport.attempted_filenames(), vec!["live.js"]);
    quit(h).await;
}

#[tokio::test]
async fn connection_loss_keeps_entries_pending() {
    let transport = Arc::new(MockTransport::new());
    transport.script_outcomes([SendOutcome::Ack, SendOutcome::ConnectionLost]);
    let h = start(transport.clone(), config());
    h.handle.notify_build_started().unwrap();
    for name in ["a.js", "b.js", "c.js"] {
        h.handle.notify_change(ChangeNotification::new(name, name)).unwrap();
    }

    connect(&transport, &h.handle, "peer-1");
    let status = settled(&h.handle).await;
    assert_eq!(status.pending_count, 2);
    assert_eq!(transport.attempted_filenames(), vec!["a.js", "b.js"]);

    h.handle
        .notify_connection(ConnectionEvent::Disconnected {
            peer: PeerId::new("peer-1"),
        })
        .unwrap();
    let status = wait_for(&h.handle, |s| !s.connected).await;
    assert_eq!(status.pending_count, 2);

    connect(&transport, &h.handle, "peer-2");
    wait_for(&h.handle, |s| s.connected && !s.draining && s.pending_count == 0).await;
    assert_eq!(
        transport.attempted_filenames(),
        vec!["a.js", "b.js", "b.js", "c.js"]
    );
    quit(h).await;
}

#[tokio::test]
async fn stale_disconnect_does_not_drop_new_session() {
    let transport = Arc::new(MockTransport::new());
    let h = start(transport.clone(), config());
    connect(&transport, &h.handle, "old");
    connect(&transport, &h.handle, "new");
    h.handle
        .notify_connection(ConnectionEvent::Disconnected {
            peer: PeerId::new("old"),
        })
        .unwrap();
    let status = h.handle.command(Command::ShowStatus).await.unwrap();
    assert!(status.connected);
    quit(h).await;
}

#[tokio::test]
async fn timeouts_exhaust_attempt_budget() {
    let transport = Arc::new(MockTransport::new());
    transport.script_outcomes([SendOutcome::Timeout, SendOutcome::Timeout]);
    let h = start(transport.clone(), config().with_max_attempts(2));
    h.handle.notify_build_started().unwrap();
    h.handle.notify_change(ChangeNotification::new("slow.js", "x")).unwrap();

    connect(&transport, &h.handle, "peer-1");
    let status = settled(&h.handle).await;
    assert_eq!(status.pending_count, 1);

    assert_eq!(status.failed, 0);
    assert!(status.last_failure.is_none());

    h.handle.command(Command::UploadAll).await.unwrap();
    let status = wait_for(&h.handle, |s| !s.draining && s.pending_count == 0).await;
    assert_eq!(status.failed, 1);
    let failure = status.last_failure.expect("failure recorded");
    assert_eq!(failure.key, DeliveryKey::new("home", "slow.js"));
    assert_eq!(failure.reason, FailureReason::AttemptsExhausted(2));

    let report = quit(h).await;
    assert_eq!(report.stats.timeouts, 2);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.pending, 0);
}

#[tokio::test]
async fn upload_all_resends_pending_entries() {
    let transport = Arc::new(MockTransport::new());
    transport.script_outcomes([SendOutcome::Timeout]);
    let h = start(transport.clone(), config());
    h.handle.notify_build_started().unwrap();
    h.handle.notify_change(ChangeNotification::new("a.js", "x")).unwrap();

    connect(&transport, &h.handle, "peer-1");
    assert_eq!(settled(&h.handle).await.pending_count, 1);

    h.handle.command(Command::UploadAll).await.unwrap();
    wait_for(&h.handle, |s| !s.draining && s.pending_count == 0).await;
    assert_eq!(transport.attempted_filenames(), vec!["a.js", "a.js"]);
    quit(h).await;
}

#[tokio::test]
async fn force_reload_while_disconnected_sends_nothing() {
    let transport = Arc::new(MockTransport::new());
    let h = start(transport.clone(), config());
    h.handle.notify_build_started().unwrap();

    h.handle.command(Command::ForceReload).await.unwrap();
    assert_eq!(h.pipeline.reloads(), 1);

    // The pipeline re-emits everything it tracks.
    h.handle.notify_change(ChangeNotification::new("a.js", "x")).unwrap();
    let status = h.handle.command(Command::ShowStatus).await.unwrap();
    assert_eq!(status.pending_count, 1);
    assert!(transport.attempts().is_empty());
    assert_eq!(transport.reload_notices(), 0);

    connect(&transport, &h.handle, "peer-1");
    wait_for(&h.handle, |s| s.connected && !s.draining && s.pending_count == 0).await;
    assert_eq!(transport.attempted_filenames(), vec!["a.js"]);
    quit(h).await;
}

#[tokio::test]
async fn force_reload_while_connected_notifies_remote() {
    let transport = Arc::new(MockTransport::new());
    let h = start(transport.clone(), config());
    connect(&transport, &h.handle, "peer-1");
    settled(&h.handle).await;

    h.handle.command(Command::ForceReload).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.reload_notices() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(h.pipeline.reloads(), 1);
    quit(h).await;
}

#[tokio::test]
async fn quit_interrupts_drain_without_losing_entries() {
    let transport = Arc::new(MockTransport::new());
    transport.set_push_delay(Duration::from_secs(30));
    let h = start(transport.clone(), config());
    h.handle.notify_build_started().unwrap();
    h.handle.notify_change(ChangeNotification::new("a.js", "x")).unwrap();
    h.handle.notify_change(ChangeNotification::new("b.js", "y")).unwrap();

    connect(&transport, &h.handle, "peer-1");
    wait_for(&h.handle, |s| s.draining).await;

    let report = tokio::time::timeout(Duration::from_secs(5), quit(h))
        .await
        .unwrap();
    assert_eq!(report.pending, 2);
    assert_eq!(report.stats.delivered, 0);
}

#[tokio::test]
async fn changes_during_drain_schedule_one_more_pass() {
    let transport = Arc::new(MockTransport::new());
    transport.set_push_delay(Duration::from_millis(50));
    let h = start(transport.clone(), config());
    h.handle.notify_build_started().unwrap();
    h.handle.notify_change(ChangeNotification::new("a.js", "1")).unwrap();
    connect(&transport, &h.handle, "peer-1");
    wait_for(&h.handle, |s| s.draining).await;

    h.handle.notify_change(ChangeNotification::new("b.js", "2")).unwrap();
    h.handle.notify_change(ChangeNotification::new("c.js", "3")).unwrap();
    wait_for(&h.handle, |s| !s.draining && s.pending_count == 0).await;
    assert_eq!(transport.attempted_filenames(), vec!["a.js", "b.js", "c.js"]);

    let report = quit(h).await;
    assert_eq!(report.stats.drain_passes, 2);
}

#[tokio::test]
async fn download_all_writes_filtered_files() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new());
    transport.set_remote_files(
        "home",
        ["x.ts", "y.js", "y.js.map"]
            .into_iter()
            .map(|name| RemoteFile {
                filename: name.into(),
                content: format!("// {name}"),
            })
            .collect(),
    );
    let config = EngineConfig::new(dir.path()).with_definition_file(None);
    let h = start(transport.clone(), config);
    connect(&transport, &h.handle, "peer-1");
    settled(&h.handle).await;

    h.handle.command(Command::DownloadAll).await.unwrap();
    let src = dir.path().join("src");
    tokio::time::timeout(Duration::from_secs(5), async {
        while !src.join("y.js").exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        std::fs::read_to_string(src.join("y.js")).unwrap(),
        "// y.js"
    );
    assert!(!src.join("x.ts").exists());
    assert!(!src.join("y.js.map").exists());
    quit(h).await;
}

#[tokio::test]
async fn definition_file_is_fetched_on_connect() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new());
    transport.set_definition("interface NS {}");
    let h = start(transport.clone(), EngineConfig::new(dir.path()));

    connect(&transport, &h.handle, "peer-1");
    let path = dir.path().join("NetScriptDefinition.d.ts");
    tokio::time::timeout(Duration::from_secs(5), async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    quit(h).await;
}
