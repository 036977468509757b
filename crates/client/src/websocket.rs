//! WebSocket transport over `tokio-tungstenite`.
//!
//! The socket is split into a writer task draining [`TransportCommand`]s and
//! a reader task forwarding binary frames as [`TransportEvent`]s. The reader
//! always finishes with exactly one [`TransportEvent::Closed`].

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message as WsMessage,
    },
};

use crate::error::{ClientError, Result};
use crate::transport::{CloseInfo, Transport, TransportCommand, TransportEvent, NORMAL_CLOSURE};

const CHANNEL_CAPACITY: usize = 256;

/// Open a WebSocket to `url` and wrap it as a [`Transport`].
///
/// `origin` is sent as the `Origin` header; conductors check it against
/// the interface's allowed origins.
pub async fn connect(
    url: &str,
    origin: Option<&str>,
    connect_timeout: Duration,
) -> Result<Transport> {
    let connect_error = |reason: String| ClientError::Connect {
        url: url.to_string(),
        reason,
    };

    let mut request = url
        .into_client_request()
        .map_err(|e| connect_error(e.to_string()))?;
    if let Some(origin) = origin {
        let value = HeaderValue::from_str(origin).map_err(|e| connect_error(e.to_string()))?;
        request.headers_mut().insert("Origin", value);
    }

    tracing::info!(url, "Connecting to conductor");

    let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(request))
        .await
        .map_err(|_| connect_error(format!("timed out after {connect_timeout:?}")))?
        .map_err(|e| match e {
            WsError::Http(response) => {
                let status = response.status().as_u16();
                if status == 401 || status == 403 {
                    ClientError::AuthenticationRejected { status }
                } else {
                    connect_error(format!("HTTP status {status}"))
                }
            }
            other => connect_error(other.to_string()),
        })?;

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let (command_tx, mut command_rx) = mpsc::channel::<TransportCommand>(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(CHANNEL_CAPACITY);

    // Writer: drains commands until the connection drops its sender.
    tokio::spawn(async move {
        let mut closing = false;
        while let Some(command) = command_rx.recv().await {
            let message = match command {
                TransportCommand::Send(bytes) if !closing => WsMessage::Binary(bytes),
                TransportCommand::Send(_) => continue,
                TransportCommand::Close { code } if !closing => {
                    closing = true;
                    close_message(code)
                }
                TransportCommand::Close { .. } => continue,
            };
            if let Err(e) = ws_sink.send(message).await {
                tracing::error!("failed to send WebSocket message: {}", e);
                break;
            }
        }
        if !closing {
            let _ = ws_sink.send(close_message(NORMAL_CLOSURE)).await;
        }
        tracing::debug!("WebSocket writer finished");
    });

    // Reader: forwards binary frames and reports the close.
    tokio::spawn(async move {
        let close = loop {
            match ws_stream.next().await {
                Some(Ok(WsMessage::Binary(bytes))) => {
                    if event_tx.send(TransportEvent::Frame(bytes)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(WsMessage::Text(text))) => {
                    tracing::warn!(len = text.len(), "Ignoring text frame from conductor");
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    break match frame {
                        Some(frame) => CloseInfo {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.into_owned(),
                        },
                        None => CloseInfo::default(),
                    };
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite.
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break CloseInfo {
                        code: None,
                        reason: e.to_string(),
                    };
                }
                None => break CloseInfo::default(),
            }
        };
        tracing::debug!(code = ?close.code, reason = %close.reason, "WebSocket closed");
        let _ = event_tx.send(TransportEvent::Closed(close)).await;
    });

    Ok(Transport::new(command_tx, event_rx))
}

fn close_message(code: u16) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_message_carries_code() {
        match close_message(4001) {
            WsMessage::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4001),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 9 (discard) is closed on test machines.
        let result = connect("ws://127.0.0.1:9", None, Duration::from_secs(5)).await;
        let err = result.unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_connect_invalid_url() {
        let result = connect("not a url", None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::Connect { .. })));
    }
}
