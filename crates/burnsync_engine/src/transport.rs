//! Transport abstraction between the engine and the remote host.
//!
//! The engine never touches sockets. It talks to the remote host through
//! [`RemoteTransport`], and learns about the connection lifecycle through
//! [`ConnectionEvent`]s forwarded into the sync service.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use burnsync_protocol::{PushFile, RemoteFile};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Identifier of a peer session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl PeerId {
    /// Creates a peer id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection lifecycle transitions reported by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A peer session opened. Any previous session is stale.
    Connected {
        /// The new peer.
        peer: PeerId,
    },
    /// A peer session closed.
    Disconnected {
        /// The peer that went away.
        peer: PeerId,
    },
}

/// Result of one bounded-wait push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The remote host acknowledged the push.
    Ack,
    /// No acknowledgment within the timeout.
    Timeout,
    /// No peer was connected; nothing was sent.
    NotConnected,
    /// The session closed before the acknowledgment arrived.
    ConnectionLost,
    /// The remote host refused the push.
    Rejected(String),
}

impl SendOutcome {
    /// Translates a transport error into an outcome.
    pub fn from_error(error: SyncError) -> Self {
        match error {
            SyncError::NotConnected => SendOutcome::NotConnected,
            SyncError::ConnectionLost => SendOutcome::ConnectionLost,
            SyncError::AckTimeout => SendOutcome::Timeout,
            SyncError::Rejected(message) => SendOutcome::Rejected(message),
            other => SendOutcome::Rejected(other.to_string()),
        }
    }

    /// Returns true if the connection is gone and a drain pass should stop.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, SendOutcome::NotConnected | SendOutcome::ConnectionLost)
    }
}

/// A transport to the remote script host.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Pushes one file and waits for its acknowledgment.
    async fn push_file(&self, file: PushFile) -> SendOutcome;

    /// Lists files, with content, on a remote server.
    async fn list_files(&self, server: &str) -> SyncResult<Vec<RemoteFile>>;

    /// Fetches the script API definition file.
    async fn definition_file(&self) -> SyncResult<String>;

    /// Tells the remote host that every file is about to be re-sent.
    async fn notify_full_reload(&self) -> SyncResult<()>;

    /// Returns true if a peer session is open.
    fn is_connected(&self) -> bool;
}

/// A mock transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    attempts: Mutex<Vec<PushFile>>,
    outcomes: Mutex<VecDeque<SendOutcome>>,
    files: Mutex<HashMap<String, Vec<RemoteFile>>>,
    list_errors: Mutex<HashMap<String, String>>,
    definition: Mutex<Option<String>>,
    reload_notices: AtomicUsize,
    push_delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    /// Creates a disconnected mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connected mock transport.
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.set_connected(true);
        transport
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Queues outcomes for the next pushes. Unscripted pushes are acknowledged.
    pub fn script_outcomes(&self, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.outcomes.lock().extend(outcomes);
    }

    /// Delays every push by `delay` before answering.
    pub fn set_push_delay(&self, delay: Duration) {
        *self.push_delay.lock() = Some(delay);
    }

    /// Sets the files returned when listing `server`.
    pub fn set_remote_files(&self, server: impl Into<String>, files: Vec<RemoteFile>) {
        self.files.lock().insert(server.into(), files);
    }

    /// Makes listing `server` fail.
    pub fn fail_listing(&self, server: impl Into<String>, message: impl Into<String>) {
        self.list_errors.lock().insert(server.into(), message.into());
    }

    /// Sets the definition file content.
    pub fn set_definition(&self, content: impl Into<String>) {
        *self.definition.lock() = Some(content.into());
    }

    /// Returns every push that reached the wire, in order.
    pub fn attempts(&self) -> Vec<PushFile> {
        self.attempts.lock().clone()
    }

    /// Returns the filenames of every push that reached the wire, in order.
    pub fn attempted_filenames(&self) -> Vec<String> {
        self.attempts
            .lock()
            .iter()
            .map(|push| push.filename.clone())
            .collect()
    }

    /// Returns the number of full-reload notices sent.
    pub fn reload_notices(&self) -> usize {
        self.reload_notices.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn push_file(&self, file: PushFile) -> SendOutcome {
        if !self.is_connected() {
            return SendOutcome::NotConnected;
        }
        self.attempts.lock().push(file);

        let delay = *self.push_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.outcomes.lock().pop_front().unwrap_or(SendOutcome::Ack);
        if outcome.is_connection_error() {
            self.set_connected(false);
        }
        outcome
    }

    async fn list_files(&self, server: &str) -> SyncResult<Vec<RemoteFile>> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if let Some(message) = self.list_errors.lock().get(server) {
            return Err(SyncError::remote_list(server, message.clone()));
        }
        Ok(self.files.lock().get(server).cloned().unwrap_or_default())
    }

    async fn definition_file(&self) -> SyncResult<String> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.definition
            .lock()
            .clone()
            .ok_or_else(|| SyncError::Rejected("no definition file".into()))
    }

    async fn notify_full_reload(&self) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.reload_notices.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
