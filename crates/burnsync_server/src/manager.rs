//! WebSocket connection manager.
//!
//! Listens for the remote host and keeps at most one live peer session. A
//! new connection replaces the current one: the old socket is closed and
//! every request still waiting on it fails with `ConnectionLost`.
//!
//! Requests are JSON-RPC frames. Each one registers a reply slot keyed by
//! its id; the reader half of the session completes the slot when the
//! matching response arrives.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use async_trait::async_trait;
use burnsync_engine::{ConnectionEvent, PeerId, RemoteTransport, SendOutcome, SyncError, SyncResult};
use burnsync_protocol::{
    DefinitionFile, Incoming, ListFilesRequest, ListFilesResponse, PushAck, PushFile, RemoteFile,
    RemoteRequest, RequestFrame, ResponseFrame,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

struct PeerSession {
    peer: PeerId,
    addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: HashMap<u64, oneshot::Sender<ResponseFrame>>,
}

struct Shared {
    config: ServerConfig,
    session: Mutex<Option<PeerSession>>,
    next_id: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: broadcast::Sender<()>,
}

impl Shared {
    fn open_session(&self, addr: SocketAddr, outgoing: mpsc::UnboundedSender<Message>) -> PeerId {
        let peer = PeerId::new(Uuid::new_v4().to_string());
        let previous = self.session.lock().replace(PeerSession {
            peer: peer.clone(),
            addr,
            outgoing,
            pending: HashMap::new(),
        });
        if let Some(previous) = previous {
            info!(
                peer = %previous.peer,
                addr = %previous.addr,
                in_flight = previous.pending.len(),
                "replacing previous session"
            );
        }
        info!(%peer, %addr, "remote host connected");
        let _ = self.events.send(ConnectionEvent::Connected { peer: peer.clone() });
        peer
    }

    fn close_session(&self, peer: &PeerId) {
        {
            let mut session = self.session.lock();
            if session.as_ref().is_some_and(|s| &s.peer == peer) {
                *session = None;
            }
        }
        info!(%peer, "remote host disconnected");
        let _ = self.events.send(ConnectionEvent::Disconnected { peer: peer.clone() });
    }

    fn handle_text(&self, peer: &PeerId, text: &str) {
        match Incoming::decode(text) {
            Ok(Incoming::Response(frame)) => {
                let Some(id) = frame.id else {
                    warn!(%peer, "response without id");
                    return;
                };
                let slot = self
                    .session
                    .lock()
                    .as_mut()
                    .filter(|s| &s.peer == peer)
                    .and_then(|s| s.pending.remove(&id));
                match slot {
                    Some(slot) => {
                        let _ = slot.send(frame);
                    }
                    None => debug!(%peer, id, "reply for unknown or expired request"),
                }
            }
            Ok(Incoming::Request(frame)) => {
                debug!(%peer, method = %frame.method, "ignoring request from remote host");
            }
            Err(e) => warn!(%peer, error = %e, "malformed frame"),
        }
    }

    fn send_raw(&self, message: Message) -> SyncResult<()> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(SyncError::NotConnected)?;
        session
            .outgoing
            .send(message)
            .map_err(|_| SyncError::ConnectionLost)
    }
}

/// Accepts remote host connections and carries requests to the live peer.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl ConnectionManager {
    /// Binds the listen address and starts accepting connections.
    ///
    /// Fails with [`ServerError::Bind`] if the address is unavailable.
    pub async fn start(config: ServerConfig) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "waiting for remote host");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            config,
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
            events,
            shutdown,
        });

        tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        Ok(Self { shared, local_addr })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Port the listener is bound to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Id of the live peer, if any.
    pub fn peer(&self) -> Option<PeerId> {
        self.shared.session.lock().as_ref().map(|s| s.peer.clone())
    }

    /// Stops accepting connections and closes the live session.
    pub fn shutdown(&self) {
        let _ = self.shared.shutdown.send(());
        self.shared.session.lock().take();
        info!("connection manager stopped");
    }

    /// Sends a request to the live peer and waits for its reply.
    ///
    /// Returns `NotConnected` immediately without a peer, `AckTimeout` if
    /// no reply arrives in time, and `ConnectionLost` if the session closes
    /// first. Nothing is retried.
    pub async fn request(&self, request: RemoteRequest) -> SyncResult<ResponseFrame> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let text = RequestFrame::call(id, &request)?.encode()?;
        let (tx, rx) = oneshot::channel();

        {
            let mut session = self.shared.session.lock();
            let session = session.as_mut().ok_or(SyncError::NotConnected)?;
            session.pending.insert(id, tx);
            if session.outgoing.send(Message::text(text)).is_err() {
                session.pending.remove(&id);
                return Err(SyncError::ConnectionLost);
            }
        }
        debug!(id, method = request.method(), "request sent");

        match tokio::time::timeout(self.shared.config.ack_timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(SyncError::ConnectionLost),
            Err(_) => {
                if let Some(session) = self.shared.session.lock().as_mut() {
                    session.pending.remove(&id);
                }
                Err(SyncError::AckTimeout)
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.shared.shutdown.send(());
    }
}

#[async_trait]
impl RemoteTransport for ConnectionManager {
    async fn push_file(&self, file: PushFile) -> SendOutcome {
        let filename = file.filename.clone();
        let server = file.server.clone();
        match self.request(RemoteRequest::PushFile(file)).await {
            Ok(frame) => match PushAck::from_response(filename.as_str(), frame) {
                Ok(ack) => {
                    debug!(filename = %ack.filename, %server, "push acknowledged");
                    SendOutcome::Ack
                }
                Err(e) if e.is_remote() => SendOutcome::Rejected(e.to_string()),
                Err(e) => {
                    warn!(%filename, %server, error = %e, "malformed push reply");
                    SendOutcome::Rejected(e.to_string())
                }
            },
            Err(e) => SendOutcome::from_error(e),
        }
    }

    async fn list_files(&self, server: &str) -> SyncResult<Vec<RemoteFile>> {
        let frame = self
            .request(RemoteRequest::GetAllFiles(ListFilesRequest::new(server)))
            .await?;
        ListFilesResponse::from_response(frame)
            .map(|response| response.files)
            .map_err(|e| SyncError::remote_list(server, e.to_string()))
    }

    async fn definition_file(&self) -> SyncResult<String> {
        let frame = self.request(RemoteRequest::GetDefinitionFile).await?;
        Ok(DefinitionFile::from_response(frame)?.content)
    }

    async fn notify_full_reload(&self) -> SyncResult<()> {
        let text = RequestFrame::notification(&RemoteRequest::FullReload)?.encode()?;
        self.shared.send_raw(Message::text(text))
    }

    fn is_connected(&self) -> bool {
        self.shared.session.lock().is_some()
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        if let Err(e) = serve_peer(stream, addr, shared).await {
                            warn!(%addr, error = %e, "websocket session failed");
                        }
                    });
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            },
            _ = shutdown.recv() => break,
        }
    }
    debug!("accept loop stopped");
}

async fn serve_peer(stream: TcpStream, addr: SocketAddr, shared: Arc<Shared>) -> ServerResult<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();
    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel();
    let mut shutdown = shared.shutdown.subscribe();
    let peer = shared.open_session(addr, outgoing);

    loop {
        tokio::select! {
            message = outgoing_rx.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        warn!(%peer, error = %e, "send failed");
                        break;
                    }
                }
                None => {
                    // Session was replaced or shut down.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.handle_text(&peer, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%peer, error = %e, "websocket error");
                    break;
                }
            },
            _ = shutdown.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    shared.close_session(&peer);
    Ok(())
}
