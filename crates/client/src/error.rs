//! Client errors and the response classifier.
//!
//! Every response payload passes through [`classify`], so remote failures
//! reach callers as [`ClientError::Remote`] while transport failures keep
//! their own variants.

use std::time::Duration;

use protocol::messages::{decode_error, decode_operation, peek_tag, OperationResponse, ERROR_TAG};
use protocol::{AgentPubKey, CellId, ProtocolError};
use thiserror::Error;

/// A failure reported by the conductor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct RemoteError {
    /// Machine-readable error kind.
    pub name: String,
    /// Human-readable description.
    pub message: String,
}

/// Broad category of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No answer: connecting, sending, waiting or closing failed.
    Transport,
    /// The answer could not be understood.
    Protocol,
    /// The conductor answered with an error.
    Remote,
    /// The client refused to send the request, e.g. missing credentials.
    Signing,
}

/// Errors returned by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The WebSocket could not be opened.
    #[error("could not connect to conductor at {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The conductor refused the handshake.
    #[error("conductor rejected the connection with HTTP status {status}")]
    AuthenticationRejected { status: u16 },

    /// The connection is not open.
    #[error("socket is not open")]
    SocketNotOpen,

    /// No response arrived in time.
    #[error("request {tag} timed out after {}ms", .timeout.as_millis())]
    Timeout { tag: String, timeout: Duration },

    /// The connection closed while the request was in flight.
    #[error("websocket closed with pending requests, close code: {}, request id: {request_id}", fmt_code(.code))]
    ClosedWithPendingRequests { request_id: u64, code: Option<u16> },

    /// The responder canceled the request.
    #[error("response canceled by responder")]
    ResponseCanceled,

    /// Encoding, framing or key material was invalid.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The response carried a tag this client does not know.
    #[error("unknown operation in response: {0}")]
    UnknownOperation(String),

    /// The response was valid but not the one this request expects.
    #[error("expected {expected} response, got {got}")]
    UnexpectedResponse { expected: &'static str, got: String },

    /// The conductor answered with an error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// No credentials were authorized for the cell.
    #[error("no signing credentials authorized for cell {cell_id}")]
    NoSigningCredentials { cell_id: CellId },

    /// The call asked for a provenance other than the authorized signing key.
    #[error("provenance {requested} does not match signing key {signing_key}")]
    ProvenanceMismatch {
        signing_key: AgentPubKey,
        requested: AgentPubKey,
    },

    /// Signed calls would expire before they could be sent.
    #[error("expiry window must be at least 1µs, got {window:?}")]
    InvalidExpiryWindow { window: Duration },

    /// The app interface does not know the app.
    #[error("app {installed_app_id} is not installed")]
    AppNotInstalled { installed_app_id: String },

    /// The app has no cell for the role.
    #[error("no cell found with role_name {role_name}")]
    NoCellForRole { role_name: String },
}

fn fmt_code(code: &Option<u16>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl ClientError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connect { .. }
            | ClientError::AuthenticationRejected { .. }
            | ClientError::SocketNotOpen
            | ClientError::Timeout { .. }
            | ClientError::ClosedWithPendingRequests { .. }
            | ClientError::ResponseCanceled => ErrorKind::Transport,
            ClientError::Protocol(
                ProtocolError::RandomnessUnavailable(_) | ProtocolError::ClockSkew(_),
            )
            | ClientError::NoSigningCredentials { .. }
            | ClientError::ProvenanceMismatch { .. }
            | ClientError::InvalidExpiryWindow { .. }
            | ClientError::AppNotInstalled { .. }
            | ClientError::NoCellForRole { .. } => ErrorKind::Signing,
            ClientError::Protocol(_)
            | ClientError::UnknownOperation(_)
            | ClientError::UnexpectedResponse { .. } => ErrorKind::Protocol,
            ClientError::Remote(_) => ErrorKind::Remote,
        }
    }

    /// Whether the conductor reported this error.
    pub fn is_remote(&self) -> bool {
        self.kind() == ErrorKind::Remote
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Turn a response payload into a typed response or an error.
pub fn classify<T: OperationResponse>(payload: &[u8]) -> Result<T> {
    let tag = peek_tag(payload)?;

    if tag == ERROR_TAG {
        let body = decode_error(payload)?;
        return Err(ClientError::Remote(RemoteError {
            name: body.name,
            message: body.message,
        }));
    }

    if !T::TAGS.contains(&tag.as_str()) {
        return Err(ClientError::UnknownOperation(tag));
    }

    Ok(decode_operation(payload)?)
}

/// Build the error for a response of the wrong kind.
pub(crate) fn unexpected<T: OperationResponse>(expected: &'static str, got: &T) -> ClientError {
    ClientError::UnexpectedResponse {
        expected,
        got: got.tag().to_string(),
    }
}
