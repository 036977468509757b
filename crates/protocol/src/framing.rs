//! Frame codec for the conductor WebSocket wire format.
//!
//! # Frame Format
//!
//! Every WebSocket binary message carries one MessagePack map:
//!
//! ```text
//! { "id"?: uint, "type": "request" | "response" | "signal", "data": bin | nil }
//! ```
//!
//! - request frames always carry an `id` and `data`
//! - response frames echo the request `id`; `data` is nil when the responder
//!   canceled the request
//! - signal frames never carry an `id`
//!
//! `data` is opaque to the codec. It holds a second MessagePack document,
//! the operation envelope described in [`crate::messages`].

use serde::{Deserialize, Serialize};
use serde_bytes::{ByteBuf, Bytes};

use crate::error::{ProtocolError, Result};

/// Maximum frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// The kind of a frame, carried in the `type` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// A request awaiting a correlated response.
    Request,
    /// A response to an earlier request with the same id.
    Response,
    /// An out-of-band push event.
    Signal,
}

impl FrameKind {
    /// Returns the wire tag for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Request => "request",
            FrameKind::Response => "response",
            FrameKind::Signal => "signal",
        }
    }

    /// Parses a wire tag.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "request" => Ok(FrameKind::Request),
            "response" => Ok(FrameKind::Response),
            "signal" => Ok(FrameKind::Signal),
            other => Err(ProtocolError::UnknownFrameKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outer transport envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Request id; present on requests and responses, absent on signals.
    pub id: Option<u64>,
    /// Frame kind.
    pub kind: FrameKind,
    /// Encoded operation envelope.
    pub payload: Option<Vec<u8>>,
}

impl Envelope {
    /// Create a request frame.
    pub fn request(id: u64, payload: Vec<u8>) -> Self {
        Self {
            id: Some(id),
            kind: FrameKind::Request,
            payload: Some(payload),
        }
    }

    /// Create a response frame. `None` signals a canceled request.
    pub fn response(id: u64, payload: Option<Vec<u8>>) -> Self {
        Self {
            id: Some(id),
            kind: FrameKind::Response,
            payload,
        }
    }

    /// Create a signal frame.
    pub fn signal(payload: Vec<u8>) -> Self {
        Self {
            id: None,
            kind: FrameKind::Signal,
            payload: Some(payload),
        }
    }

    /// Checks the per-kind shape rules.
    fn validate(&self) -> Result<()> {
        match self.kind {
            FrameKind::Request => {
                if self.id.is_none() {
                    return Err(ProtocolError::MalformedFrame(
                        "request frame without id".to_string(),
                    ));
                }
                if self.payload.is_none() {
                    return Err(ProtocolError::MalformedFrame(
                        "request frame without data".to_string(),
                    ));
                }
            }
            FrameKind::Response => {
                if self.id.is_none() {
                    return Err(ProtocolError::MalformedFrame(
                        "response frame without id".to_string(),
                    ));
                }
            }
            FrameKind::Signal => {
                if self.id.is_some() {
                    return Err(ProtocolError::MalformedFrame(
                        "signal frame must not carry an id".to_string(),
                    ));
                }
                if self.payload.is_none() {
                    return Err(ProtocolError::MalformedFrame(
                        "signal frame without data".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Borrowed wire representation used for encoding.
#[derive(Serialize)]
struct WireFrameRef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(rename = "type")]
    kind: &'static str,
    data: Option<&'a Bytes>,
}

/// Owned wire representation used for decoding.
#[derive(Deserialize)]
struct WireFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<ByteBuf>,
}

/// Encoder and decoder for frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        Self
    }

    /// Encode an envelope into bytes.
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        envelope.validate()?;

        let wire = WireFrameRef {
            id: envelope.id,
            kind: envelope.kind.as_str(),
            data: envelope.payload.as_deref().map(Bytes::new),
        };
        let output = rmp_serde::to_vec_named(&wire)?;

        if output.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: output.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        Ok(output)
    }

    /// Decode an envelope from bytes.
    pub fn decode(&self, data: &[u8]) -> Result<Envelope> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let wire: WireFrame = rmp_serde::from_slice(data)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

        let envelope = Envelope {
            id: wire.id,
            kind: FrameKind::from_tag(&wire.kind)?,
            payload: wire.data.map(ByteBuf::into_vec),
        };
        envelope.validate()?;

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(envelope: Envelope) {
        let codec = FrameCodec::new();
        let bytes = codec.encode(&envelope).expect("encode failed");
        let decoded = codec.decode(&bytes).expect("decode failed");
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn test_request_roundtrip() {
        roundtrip(Envelope::request(7, vec![1, 2, 3]));
    }

    #[test]
    fn test_response_roundtrip() {
        roundtrip(Envelope::response(7, Some(vec![0xc0])));
    }

    #[test]
    fn test_canceled_response_roundtrip() {
        roundtrip(Envelope::response(9, None));
    }

    #[test]
    fn test_signal_roundtrip_without_id() {
        roundtrip(Envelope::signal(b"pushed".to_vec()));
    }

    #[test]
    fn test_wire_field_names() {
        let codec = FrameCodec::new();
        let bytes = codec.encode(&Envelope::request(3, vec![9])).unwrap();

        #[derive(Deserialize)]
        struct Loose {
            id: u64,
            #[serde(rename = "type")]
            kind: String,
            #[serde(with = "serde_bytes")]
            data: Vec<u8>,
        }
        let loose: Loose = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(loose.id, 3);
        assert_eq!(loose.kind, "request");
        assert_eq!(loose.data, vec![9]);

        // fixmap with three entries
        assert_eq!(bytes[0], 0x83);
    }

    #[test]
    fn test_signal_omits_id_on_wire() {
        let codec = FrameCodec::new();
        let bytes = codec.encode(&Envelope::signal(vec![1])).unwrap();
        // fixmap with two entries: type and data
        assert_eq!(bytes[0], 0x82);
    }

    #[test]
    fn test_payload_is_binary_on_wire() {
        let codec = FrameCodec::new();
        let bytes = codec.encode(&Envelope::signal(vec![0xAA, 0xBB])).unwrap();
        // bin8 marker followed by length 2 and the raw bytes
        let tail = &bytes[bytes.len() - 4..];
        assert_eq!(tail, &[0xc4, 0x02, 0xAA, 0xBB]);
    }

    #[test]
    fn test_decode_unknown_kind() {
        #[derive(Serialize)]
        struct Raw {
            id: u64,
            #[serde(rename = "type")]
            kind: &'static str,
            data: Option<&'static Bytes>,
        }
        let bytes = rmp_serde::to_vec_named(&Raw {
            id: 1,
            kind: "authenticate",
            data: None,
        })
        .unwrap();

        let result = FrameCodec::new().decode(&bytes);
        assert!(matches!(result, Err(ProtocolError::UnknownFrameKind(k)) if k == "authenticate"));
    }

    #[test]
    fn test_decode_request_without_id_is_malformed() {
        #[derive(Serialize)]
        struct Raw {
            #[serde(rename = "type")]
            kind: &'static str,
            data: &'static Bytes,
        }
        let bytes = rmp_serde::to_vec_named(&Raw {
            kind: "request",
            data: Bytes::new(&[1]),
        })
        .unwrap();

        let result = FrameCodec::new().decode(&bytes);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_signal_with_id_is_malformed() {
        #[derive(Serialize)]
        struct Raw {
            id: u64,
            #[serde(rename = "type")]
            kind: &'static str,
            data: &'static Bytes,
        }
        let bytes = rmp_serde::to_vec_named(&Raw {
            id: 4,
            kind: "signal",
            data: Bytes::new(&[1]),
        })
        .unwrap();

        let result = FrameCodec::new().decode(&bytes);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        let result = FrameCodec::new().decode(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_empty_is_malformed() {
        let result = FrameCodec::new().decode(&[]);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_encode_rejects_invalid_shape() {
        let envelope = Envelope {
            id: None,
            kind: FrameKind::Response,
            payload: None,
        };
        assert!(FrameCodec::new().encode(&envelope).is_err());
    }

    #[test]
    fn test_frame_too_large() {
        let payload = vec![0u8; MAX_FRAME_SIZE];
        let result = FrameCodec::new().encode(&Envelope::request(1, payload));
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));

        let oversized = vec![0u8; MAX_FRAME_SIZE + 1];
        let result = FrameCodec::new().decode(&oversized);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_frame_kind_tags() {
        for kind in [FrameKind::Request, FrameKind::Response, FrameKind::Signal] {
            assert_eq!(FrameKind::from_tag(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(FrameKind::Signal.to_string(), "signal");
    }
}
