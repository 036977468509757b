//! Request multiplexer over a single transport.
//!
//! A [`Connection`] assigns every request a fresh id, records it in a
//! pending table and resolves it when a response with the same id arrives.
//! Responses may arrive in any order. Each pending request ends exactly
//! once: answered, timed out, dropped by its caller, or failed because the
//! socket closed.
//!
//! One reader task per connection decodes incoming frames and routes them:
//! responses to the pending table, signals to the [`EventChannel`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use protocol::messages::{encode_operation, OperationRequest, OperationResponse};
use protocol::{Envelope, FrameCodec, FrameKind};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::error::{classify, ClientError, Result};
use crate::events::{EventChannel, Subscription};
use crate::transport::{CloseInfo, Transport, TransportCommand, TransportEvent, NORMAL_CLOSURE};
use crate::websocket;

/// Event name under which raw signal payloads are emitted.
pub const SIGNAL_EVENT: &str = "signal";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Default time allowed for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long [`Connection::close`] waits for the peer to confirm.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for opening a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Timeout applied to requests that do not set their own.
    pub default_timeout: Duration,
    /// `Origin` header sent on the handshake.
    pub origin: Option<String>,
    /// Time allowed for the handshake.
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            origin: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectOptions {
    /// Options taken from a client configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            default_timeout: config.default_timeout(),
            origin: config.connection.origin.clone(),
            ..Self::default()
        }
    }
}

enum Completion {
    Response(Option<Vec<u8>>),
    Closed(CloseInfo),
}

struct PendingRequest {
    tag: String,
    sent_at: Instant,
    completion: oneshot::Sender<Completion>,
}

struct PendingTable {
    open: bool,
    requests: HashMap<u64, PendingRequest>,
}

struct Shared {
    default_timeout: Duration,
    next_id: AtomicU64,
    table: Mutex<PendingTable>,
    signals: EventChannel<Vec<u8>>,
    closed_tx: watch::Sender<Option<CloseInfo>>,
    codec: FrameCodec,
}

impl Shared {
    fn lock_table(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_frame(&self, bytes: &[u8]) {
        let envelope = match self.codec.decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, len = bytes.len(), "Dropping malformed frame");
                return;
            }
        };

        match (envelope.kind, envelope.id) {
            (FrameKind::Response, Some(id)) => self.complete(id, envelope.payload),
            (FrameKind::Signal, _) => {
                if let Some(payload) = envelope.payload {
                    let delivered = self.signals.emit(SIGNAL_EVENT, &payload);
                    tracing::debug!(listeners = delivered, "Signal received");
                }
            }
            (kind, id) => {
                tracing::warn!(kind = %kind, request_id = ?id, "Ignoring unexpected frame");
            }
        }
    }

    fn complete(&self, id: u64, payload: Option<Vec<u8>>) {
        let pending = self.lock_table().requests.remove(&id);
        match pending {
            Some(pending) => {
                tracing::debug!(
                    request_id = id,
                    tag = %pending.tag,
                    elapsed_ms = pending.sent_at.elapsed().as_millis() as u64,
                    "Response received"
                );
                // The caller may have given up in the meantime.
                let _ = pending.completion.send(Completion::Response(payload));
            }
            None => {
                tracing::warn!(request_id = id, "Got response with no matching request");
            }
        }
    }

    fn shutdown(&self, info: CloseInfo) {
        let drained: Vec<(u64, PendingRequest)> = {
            let mut table = self.lock_table();
            table.open = false;
            table.requests.drain().collect()
        };

        if !drained.is_empty() {
            tracing::warn!(
                pending = drained.len(),
                code = ?info.code,
                "Connection closed with pending requests"
            );
        }
        for (_, pending) in drained {
            let _ = pending.completion.send(Completion::Closed(info.clone()));
        }

        self.closed_tx.send_if_modified(|state| {
            if state.is_none() {
                tracing::info!(code = ?info.code, reason = %info.reason, "Connection closed");
                *state = Some(info);
                true
            } else {
                false
            }
        });
    }
}

/// Removes a pending entry when the request finishes in any way.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.shared.lock_table().requests.remove(&self.id).is_some() {
            tracing::debug!(request_id = self.id, "Pending request abandoned");
        }
    }
}

struct Inner {
    shared: Arc<Shared>,
    commands: mpsc::Sender<TransportCommand>,
}

/// A multiplexed connection to a conductor interface.
///
/// Cheap to clone; all clones share one socket. The socket is closed when
/// the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Connection {
    /// Open a WebSocket connection.
    pub async fn connect(url: &str, options: &ConnectOptions) -> Result<Self> {
        let transport =
            websocket::connect(url, options.origin.as_deref(), options.connect_timeout).await?;
        Ok(Self::from_transport(transport, options))
    }

    /// Wrap an already open transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_transport(transport: Transport, options: &ConnectOptions) -> Self {
        let (closed_tx, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            default_timeout: options.default_timeout,
            next_id: AtomicU64::new(0),
            table: Mutex::new(PendingTable {
                open: true,
                requests: HashMap::new(),
            }),
            signals: EventChannel::new(),
            closed_tx,
            codec: FrameCodec::new(),
        });

        let Transport { commands, events } = transport;
        tokio::spawn(run_reader(Arc::clone(&shared), events));

        Self {
            inner: Arc::new(Inner { shared, commands }),
        }
    }

    /// Send a typed request and classify the response.
    pub async fn request<Req, Res>(&self, request: &Req, timeout: Option<Duration>) -> Result<Res>
    where
        Req: OperationRequest,
        Res: OperationResponse,
    {
        let payload = encode_operation(request)?;
        let response = self.request_raw(request.tag(), payload, timeout).await?;
        classify(&response)
    }

    /// Send an encoded operation and wait for the encoded response.
    ///
    /// `timeout` falls back to the connection default.
    pub async fn request_raw(
        &self,
        tag: &str,
        payload: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let shared = &*self.inner.shared;
        let timeout = timeout.unwrap_or(shared.default_timeout);

        if !self.is_open() {
            return Err(ClientError::SocketNotOpen);
        }

        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = shared.codec.encode(&Envelope::request(id, payload))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut table = shared.lock_table();
            if !table.open {
                return Err(ClientError::SocketNotOpen);
            }
            table.requests.insert(
                id,
                PendingRequest {
                    tag: tag.to_string(),
                    sent_at: Instant::now(),
                    completion: tx,
                },
            );
        }
        let _guard = PendingGuard { shared, id };

        tracing::debug!(
            request_id = id,
            tag,
            timeout_ms = timeout.as_millis() as u64,
            "Sending request"
        );

        let outcome = tokio::time::timeout(timeout, async {
            self.inner
                .commands
                .send(TransportCommand::Send(bytes))
                .await
                .map_err(|_| ClientError::SocketNotOpen)?;
            rx.await.map_err(|_| ClientError::SocketNotOpen)
        })
        .await;

        match outcome {
            Ok(Ok(Completion::Response(Some(payload)))) => Ok(payload),
            Ok(Ok(Completion::Response(None))) => Err(ClientError::ResponseCanceled),
            Ok(Ok(Completion::Closed(info))) => Err(ClientError::ClosedWithPendingRequests {
                request_id: id,
                code: info.code,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(
                    request_id = id,
                    tag,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(ClientError::Timeout {
                    tag: tag.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Send a signal to the peer. No response is expected.
    pub async fn emit_signal(&self, payload: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(ClientError::SocketNotOpen);
        }
        let bytes = self.inner.shared.codec.encode(&Envelope::signal(payload))?;
        self.inner
            .commands
            .send(TransportCommand::Send(bytes))
            .await
            .map_err(|_| ClientError::SocketNotOpen)
    }

    /// Subscribe to raw signal payloads.
    pub fn on_signal<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.inner.shared.signals.on(SIGNAL_EVENT, listener)
    }

    /// Close the connection and wait for the socket to shut down.
    ///
    /// Pending requests fail with [`ClientError::ClosedWithPendingRequests`].
    /// Calling this on a closed connection returns the first close info.
    pub async fn close(&self, code: u16) -> CloseInfo {
        let shared = &self.inner.shared;
        let mut closed = shared.closed_tx.subscribe();

        let current = closed.borrow().clone();
        if let Some(info) = current {
            return info;
        }

        shared.lock_table().open = false;
        tracing::info!(code, "Closing connection");

        if self
            .inner
            .commands
            .send(TransportCommand::Close { code })
            .await
            .is_ok()
        {
            if let Ok(Ok(state)) =
                tokio::time::timeout(CLOSE_TIMEOUT, closed.wait_for(Option::is_some)).await
            {
                if let Some(info) = state.clone() {
                    return info;
                }
            }
            tracing::warn!(code, "Peer did not confirm close, closing locally");
        }

        shared.shutdown(CloseInfo {
            code: Some(code),
            reason: "closed locally".to_string(),
        });
        let info = shared.closed_tx.borrow().clone();
        info.unwrap_or_default()
    }

    /// Close with the normal closure code.
    pub async fn close_normal(&self) -> CloseInfo {
        self.close(NORMAL_CLOSURE).await
    }

    /// Wait until the connection has closed.
    pub async fn closed(&self) -> CloseInfo {
        let mut closed = self.inner.shared.closed_tx.subscribe();
        let info = match closed.wait_for(Option::is_some).await {
            Ok(state) => state.clone().unwrap_or_default(),
            Err(_) => CloseInfo::default(),
        };
        info
    }

    /// Whether new requests are accepted.
    pub fn is_open(&self) -> bool {
        self.inner.shared.lock_table().open
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.shared.lock_table().requests.len()
    }

    /// Ids of requests awaiting a response, ascending.
    pub fn pending_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .inner
            .shared
            .lock_table()
            .requests
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Default timeout applied to requests.
    pub fn default_timeout(&self) -> Duration {
        self.inner.shared.default_timeout
    }
}

async fn run_reader(shared: Arc<Shared>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Frame(bytes) => shared.handle_frame(&bytes),
            TransportEvent::Closed(info) => {
                shared.shutdown(info);
                return;
            }
        }
    }
    shared.shutdown(CloseInfo {
        code: None,
        reason: "transport dropped".to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryPeer;

    fn pair() -> (Connection, MemoryPeer) {
        let (transport, peer) = Transport::in_memory(16);
        (
            Connection::from_transport(transport, &ConnectOptions::default()),
            peer,
        )
    }

    #[tokio::test]
    async fn test_request_resolves_with_payload() {
        let (conn, mut peer) = pair();

        let server = tokio::spawn(async move {
            let (id, payload) = peer.next_request().await.unwrap();
            assert_eq!(payload, vec![1, 2, 3]);
            peer.respond(id, Some(vec![4, 5])).await;
            peer
        });

        let response = conn.request_raw("echo", vec![1, 2, 3], None).await.unwrap();
        assert_eq!(response, vec![4, 5]);
        assert_eq!(conn.pending_count(), 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_ids_increase_from_zero() {
        let (conn, mut peer) = pair();

        let server = tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..3 {
                let (id, _) = peer.next_request().await.unwrap();
                ids.push(id);
                peer.respond(id, Some(vec![])).await;
            }
            ids
        });

        for _ in 0..3 {
            conn.request_raw("ping", vec![0], None).await.unwrap();
        }
        assert_eq!(server.await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_canceled_response() {
        let (conn, mut peer) = pair();

        tokio::spawn(async move {
            let (id, _) = peer.next_request().await.unwrap();
            peer.respond(id, None).await;
            peer
        });

        let err = conn.request_raw("slow", vec![0], None).await.unwrap_err();
        assert!(matches!(err, ClientError::ResponseCanceled));
    }

    #[tokio::test]
    async fn test_request_after_transport_gone() {
        let (conn, peer) = pair();
        drop(peer);
        conn.closed().await;

        assert!(!conn.is_open());
        let err = conn.request_raw("late", vec![0], None).await.unwrap_err();
        assert!(matches!(err, ClientError::SocketNotOpen));
    }

    #[tokio::test]
    async fn test_signal_reaches_listener() {
        let (conn, peer) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = conn.on_signal(move |payload| {
            let _ = tx.send(payload);
        });

        peer.signal(vec![9, 9]).await;
        assert_eq!(rx.recv().await, Some(vec![9, 9]));
    }

    #[tokio::test]
    async fn test_emit_signal_sends_signal_frame() {
        let (conn, mut peer) = pair();
        conn.emit_signal(vec![3]).await.unwrap();

        let envelope = peer.next_frame().await.unwrap().unwrap();
        assert_eq!(envelope, Envelope::signal(vec![3]));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped() {
        let (conn, mut peer) = pair();
        peer.send_frame(vec![0xde, 0xad]).await;

        let server = tokio::spawn(async move {
            let (id, _) = peer.next_request().await.unwrap();
            peer.respond(id, Some(vec![1])).await;
            peer
        });

        assert_eq!(conn.request_raw("after", vec![0], None).await.unwrap(), vec![1]);
        assert!(conn.is_open());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_resolves_when_peer_closes() {
        let (conn, peer) = pair();

        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.closed().await })
        };
        peer.close(Some(1001)).await;

        let info = waiter.await.unwrap();
        assert_eq!(info.code, Some(1001));
        assert_eq!(conn.closed().await, info);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, mut peer) = pair();

        let server = tokio::spawn(async move {
            match peer.next_command().await {
                Some(TransportCommand::Close { code }) => peer.close(Some(code)).await,
                other => panic!("unexpected command: {other:?}"),
            };
            peer
        });

        let info = conn.close(4000).await;
        assert_eq!(info.code, Some(4000));
        assert_eq!(conn.close(1000).await.code, Some(4000));
        assert_eq!(conn.closed().await.code, Some(4000));
        server.await.unwrap();
    }
}
