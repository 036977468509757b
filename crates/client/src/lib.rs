//! # Conductor Client Library
//!
//! Async client for a conductor's admin and app WebSocket interfaces.
//!
//! ## Overview
//!
//! - **Request Multiplexer**: many concurrent requests over one socket,
//!   correlated by id, each with its own timeout
//! - **Signals**: pushed events fanned out to subscribers
//! - **Zome Call Signing**: capability-based credentials per cell, fresh
//!   nonce and expiry on every call
//! - **Error Classification**: remote failures, transport failures and
//!   signing refusals kept apart
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐  ┌──────────────────────┐
//! │    AdminWebsocket    │  │     AppWebsocket     │──── InvocationSigner
//! └──────────┬───────────┘  └──────────┬───────────┘
//!            │                         │
//! ┌──────────┴─────────────────────────┴───────────┐
//! │                  Connection                    │  pending table, signals
//! ├────────────────────────────────────────────────┤
//! │                  Transport                     │  WebSocket / in-memory
//! └────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use client::{AdminWebsocket, AppWebsocket, ConnectOptions, SigningCredentialsStore, ZomeCallRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let options = ConnectOptions::default();
//!     let admin = AdminWebsocket::connect("ws://localhost:65000", &options).await?;
//!
//!     let cell_id = admin.list_cell_ids().await?[0];
//!     let store = SigningCredentialsStore::default();
//!     admin.authorize_signing_credentials(&store, cell_id, None).await?;
//!
//!     let app = AppWebsocket::connect("ws://localhost:65001", &options, Arc::new(store)).await?;
//!     let request = ZomeCallRequest::new(cell_id, "posts", "get_all_posts", &())?;
//!     let posts: Vec<String> = app.call_zome(request, None).await?;
//!     println!("{posts:?}");
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod app;
pub mod app_agent;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod signing;
pub mod transport;
pub mod websocket;

pub use admin::AdminWebsocket;
pub use app::AppWebsocket;
pub use app_agent::AppAgentWebsocket;
pub use config::{ClientConfig, ConfigError};
pub use connection::{ConnectOptions, Connection, SIGNAL_EVENT};
pub use error::{classify, ClientError, ErrorKind, RemoteError, Result};
pub use events::{EventChannel, Subscription};
pub use signing::{
    authorize_signing_credentials, CapabilityGrantor, InvocationSigner, SigningCredentials,
    SigningCredentialsStore, ZomeCallRequest,
};
pub use transport::{CloseInfo, MemoryPeer, Transport, TransportCommand, TransportEvent};
