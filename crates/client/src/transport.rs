//! Channel-based full-duplex transport.
//!
//! A [`Transport`] is a pair of channels: commands flow to the socket task,
//! events flow back. The WebSocket implementation lives in
//! [`crate::websocket`]; [`Transport::in_memory`] pairs a transport with a
//! [`MemoryPeer`] that plays the conductor in tests.

use protocol::{Envelope, FrameCodec, ProtocolError};
use tokio::sync::mpsc;

/// Close code sent on a normal shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Something the connection asks the transport to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Send one binary frame.
    Send(Vec<u8>),
    /// Close the socket with the given code.
    Close { code: u16 },
}

/// Details of a closed socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code, if the peer sent one.
    pub code: Option<u16>,
    /// Close reason text.
    pub reason: String,
}

/// Something that happened on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A binary frame arrived.
    Frame(Vec<u8>),
    /// The socket closed. No events follow.
    Closed(CloseInfo),
}

/// The connection-facing half of a socket.
#[derive(Debug)]
pub struct Transport {
    pub(crate) commands: mpsc::Sender<TransportCommand>,
    pub(crate) events: mpsc::Receiver<TransportEvent>,
}

impl Transport {
    /// Create a transport from raw channels.
    pub fn new(
        commands: mpsc::Sender<TransportCommand>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self { commands, events }
    }

    /// Create a transport connected to an in-memory peer.
    pub fn in_memory(capacity: usize) -> (Transport, MemoryPeer) {
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        (
            Transport::new(command_tx, event_rx),
            MemoryPeer {
                commands: command_rx,
                events: event_tx,
                codec: FrameCodec::new(),
            },
        )
    }
}

/// The far end of an in-memory transport.
#[derive(Debug)]
pub struct MemoryPeer {
    commands: mpsc::Receiver<TransportCommand>,
    events: mpsc::Sender<TransportEvent>,
    codec: FrameCodec,
}

impl MemoryPeer {
    /// Next command from the connection, or `None` once it is gone.
    pub async fn next_command(&mut self) -> Option<TransportCommand> {
        self.commands.recv().await
    }

    /// Next frame the connection sent, decoded.
    ///
    /// Close commands are skipped.
    pub async fn next_frame(&mut self) -> Option<Result<Envelope, ProtocolError>> {
        loop {
            match self.commands.recv().await? {
                TransportCommand::Send(bytes) => return Some(self.codec.decode(&bytes)),
                TransportCommand::Close { .. } => continue,
            }
        }
    }

    /// Next request the connection sent, as `(id, payload)`.
    pub async fn next_request(&mut self) -> Option<(u64, Vec<u8>)> {
        loop {
            let envelope = self.next_frame().await?.ok()?;
            if let (Some(id), Some(payload)) = (envelope.id, envelope.payload) {
                return Some((id, payload));
            }
        }
    }

    /// Send a response frame. `None` cancels the request.
    pub async fn respond(&self, id: u64, payload: Option<Vec<u8>>) -> bool {
        self.send_envelope(&Envelope::response(id, payload)).await
    }

    /// Send a signal frame.
    pub async fn signal(&self, payload: Vec<u8>) -> bool {
        self.send_envelope(&Envelope::signal(payload)).await
    }

    /// Send raw bytes as a frame.
    pub async fn send_frame(&self, bytes: Vec<u8>) -> bool {
        self.events.send(TransportEvent::Frame(bytes)).await.is_ok()
    }

    /// Report the socket as closed.
    pub async fn close(&self, code: Option<u16>) -> bool {
        self.events
            .send(TransportEvent::Closed(CloseInfo {
                code,
                reason: String::new(),
            }))
            .await
            .is_ok()
    }

    async fn send_envelope(&self, envelope: &Envelope) -> bool {
        match self.codec.encode(envelope) {
            Ok(bytes) => self.send_frame(bytes).await,
            Err(_) => false,
        }
    }
}
