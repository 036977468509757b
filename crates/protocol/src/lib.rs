//! # Conductor Protocol Library
//!
//! Wire-level types for talking to a conductor over its admin and app
//! WebSocket interfaces. Nothing in this crate performs I/O.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Operation Envelope             │  {type, value}, MessagePack
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  {id?, type, data}, MessagePack
//! ├─────────────────────────────────────────┤
//! │        Transport (WebSocket binary)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{encode_operation, AdminRequest, Envelope, FrameCodec};
//!
//! let payload = encode_operation(&AdminRequest::ListDnas).unwrap();
//! let codec = FrameCodec::new();
//! let bytes = codec.encode(&Envelope::request(0, payload)).unwrap();
//!
//! let decoded = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded.id, Some(0));
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: Outer frame codec
//! - [`messages`]: Operation envelopes, admin and app operations, signals
//! - [`hash`]: Agent keys, DNA hashes and cell ids
//! - [`crypto`]: Signing keys, nonces, capability secrets
//! - [`invocation`]: Unsigned and signed zome calls
//! - [`error`]: Error types

pub mod crypto;
pub mod error;
pub mod framing;
pub mod hash;
pub mod invocation;
pub mod messages;

pub use crypto::{
    generate_signing_key_pair, nonce_expiration, now_micros, random_cap_secret, random_nonce,
    CapSecret, Nonce256Bit, Signature, SigningKeyPair, DEFAULT_EXPIRY_WINDOW,
};
pub use error::{ProtocolError, Result};
pub use framing::{Envelope, FrameCodec, FrameKind, MAX_FRAME_SIZE};
pub use hash::{AgentPubKey, CellId, DnaHash};
pub use invocation::{ZomeCallSigned, ZomeCallUnsigned};
pub use messages::{
    decode_operation, encode_operation, AdminRequest, AdminResponse, AppRequest, AppResponse,
    AppSignal, CapAccess, GrantedFunctions, OperationRequest, OperationResponse, ZomeCallCapGrant,
    ERROR_TAG,
};
