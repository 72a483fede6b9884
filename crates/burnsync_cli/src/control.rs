//! Line-based control surface on stdin.

use burnsync_engine::{Command, EngineHandle, SyncResult, SyncStatus};
use std::future::Future;
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One parsed input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// An engine command.
    Command(Command),
    /// Print the key list.
    Help,
}

/// Parses a control line. Blank or unknown lines yield `None`.
pub fn parse(line: &str) -> Option<Input> {
    let input = match line.trim().to_ascii_lowercase().as_str() {
        "r" | "reload" => Input::Command(Command::ForceReload),
        "u" | "upload" => Input::Command(Command::UploadAll),
        "d" | "download" => Input::Command(Command::DownloadAll),
        "s" | "status" => Input::Command(Command::ShowStatus),
        "q" | "quit" => Input::Command(Command::Quit),
        "h" | "help" | "?" => Input::Help,
        _ => return None,
    };
    Some(input)
}

/// Key list shown by `h`.
pub const HELP: &str = "\
  r  full reload (rebuild and re-send every file)
  u  upload all pending files
  d  download all files from the remote host
  s  show status
  q  quit
  h  show this help";

/// Renders a status line.
pub fn render_status(status: &SyncStatus) -> String {
    let mut line = format!(
        "port {} | {} | {} pending",
        status.port,
        if status.connected {
            "connected"
        } else {
            "waiting for connection"
        },
        status.pending_count,
    );
    if status.draining {
        line.push_str(" | sending");
    }
    if status.failed > 0 {
        line.push_str(&format!(" | {} failed", status.failed));
        if let Some(failure) = &status.last_failure {
            line.push_str(&format!(" (last: {failure})"));
        }
    }
    line
}

/// Reads stdin lines on a dedicated thread.
///
/// The thread ends when stdin closes or the receiver is dropped.
pub fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Applies control lines until `q` is entered.
///
/// Returns `Ok(false)` if the input closed before a quit command.
pub async fn run(
    handle: EngineHandle,
    mut lines: mpsc::UnboundedReceiver<String>,
) -> SyncResult<bool> {
    println!("{HELP}");

    while let Some(line) = lines.recv().await {
        match parse(&line) {
            Some(Input::Help) => println!("{HELP}"),
            Some(Input::Command(command)) => {
                let status = handle.command(command).await?;
                match command {
                    Command::Quit => return Ok(true),
                    Command::ShowStatus => println!("{}", render_status(&status)),
                    _ => {}
                }
            }
            None if line.trim().is_empty() => {}
            None => warn!(input = %line.trim(), "unknown command, press h for help"),
        }
    }

    debug!("control input closed");
    Ok(false)
}

/// Runs the control surface until `q` or until `shutdown` resolves.
///
/// Closed input does not stop the tool; it keeps syncing until `shutdown`.
/// Returns true if the operator quit.
pub async fn wait_for_exit<F>(
    handle: EngineHandle,
    lines: mpsc::UnboundedReceiver<String>,
    shutdown: F,
) -> SyncResult<bool>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let quit = tokio::select! {
        result = run(handle, lines) => result?,
        _ = &mut shutdown => return Ok(false),
    };
    if !quit {
        info!("control input closed; press Ctrl-C to stop");
        shutdown.await;
    }
    Ok(quit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burnsync_engine::{
        AdapterState, DeliveryFailure, DeliveryKey, EngineConfig, FailureReason, MockTransport,
        PushTarget, RecordingPipeline, SyncAdapter, SyncService,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn home(path: &str) -> Vec<PushTarget> {
        vec![PushTarget::new(path, "home")]
    }

    #[tokio::test]
    async fn lines_drive_the_service() {
        let adapter = SyncAdapter::new(home, EngineConfig::default().with_definition_file(None));
        let pipeline = Arc::new(RecordingPipeline::new());
        let (service, handle) =
            SyncService::new(adapter, Arc::new(MockTransport::new()), pipeline.clone());
        let task = tokio::spawn(service.run());

        let (tx, rx) = mpsc::unbounded_channel();
        for line in ["h", "bogus", "", "r", "s", "q", "r"] {
            tx.send(line.to_string()).unwrap();
        }
        assert!(run(handle, rx).await.unwrap());
        task.await.unwrap();
        assert_eq!(pipeline.reloads(), 1);
    }

    #[tokio::test]
    async fn closed_input_is_not_quit() {
        let adapter = SyncAdapter::new(home, EngineConfig::default());
        let (service, handle) = SyncService::new(
            adapter,
            Arc::new(MockTransport::new()),
            Arc::new(RecordingPipeline::new()),
        );
        let task = tokio::spawn(service.run());

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        drop(tx);
        assert!(!run(handle.clone(), rx).await.unwrap());

        handle.command(Command::Quit).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn closed_input_waits_for_shutdown() {
        let adapter = SyncAdapter::new(home, EngineConfig::default());
        let (service, handle) = SyncService::new(
            adapter,
            Arc::new(MockTransport::new()),
            Arc::new(RecordingPipeline::new()),
        );
        let service = tokio::spawn(service.run());

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        drop(tx);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let waiting = tokio::spawn(wait_for_exit(handle.clone(), rx, async move {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiting.is_finished());
        assert!(handle.command(Command::ShowStatus).await.is_ok());

        stop_tx.send(()).unwrap();
        assert!(!waiting.await.unwrap().unwrap());

        handle.command(Command::Quit).await.unwrap();
        service.await.unwrap();
    }

    #[tokio::test]
    async fn quit_line_ends_wait() {
        let adapter = SyncAdapter::new(home, EngineConfig::default());
        let (service, handle) = SyncService::new(
            adapter,
            Arc::new(MockTransport::new()),
            Arc::new(RecordingPipeline::new()),
        );
        let service = tokio::spawn(service.run());

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("q".to_string()).unwrap();
        let quit = wait_for_exit(handle, rx, std::future::pending()).await.unwrap();
        assert!(quit);
        service.await.unwrap();
    }

    #[test]
    fn parses_keys() {
        assert_eq!(parse("r"), Some(Input::Command(Command::ForceReload)));
        assert_eq!(parse(" U \n"), Some(Input::Command(Command::UploadAll)));
        assert_eq!(parse("download"), Some(Input::Command(Command::DownloadAll)));
        assert_eq!(parse("s"), Some(Input::Command(Command::ShowStatus)));
        assert_eq!(parse("q"), Some(Input::Command(Command::Quit)));
        assert_eq!(parse("h"), Some(Input::Help));
        assert_eq!(parse(""), None);
        assert_eq!(parse("x"), None);
    }

    #[test]
    fn status_line() {
        let status = SyncStatus {
            connected: true,
            pending_count: 2,
            port: 12525,
            state: AdapterState::Draining,
            draining: false,
            failed: 0,
            last_failure: None,
        };
        assert_eq!(render_status(&status), "port 12525 | connected | 2 pending");

        let status = SyncStatus {
            connected: false,
            draining: true,
            ..status
        };
        assert_eq!(
            render_status(&status),
            "port 12525 | waiting for connection | 2 pending | sending"
        );

        let status = SyncStatus {
            draining: false,
            failed: 2,
            last_failure: Some(DeliveryFailure {
                key: DeliveryKey::new("home", "a.js"),
                reason: FailureReason::Rejected("no such server".into()),
            }),
            ..status
        };
        assert_eq!(
            render_status(&status),
            "port 12525 | waiting for connection | 2 pending | 2 failed \
             (last: home:a.js (rejected: no such server))"
        );
    }
}
