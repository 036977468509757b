//! Typed client for a conductor app interface.
//!
//! Zome calls are signed by an [`InvocationSigner`] before they are sent;
//! incoming app signals are decoded and re-emitted as [`AppSignal`]s.

use std::sync::Arc;
use std::time::Duration;

use protocol::messages::InstalledAppInfo;
use protocol::{AppRequest, AppResponse, AppSignal, ProtocolError, ZomeCallSigned};
use serde::de::DeserializeOwned;

use crate::connection::{ConnectOptions, Connection, SIGNAL_EVENT};
use crate::error::{unexpected, Result};
use crate::events::{EventChannel, Subscription};
use crate::signing::{InvocationSigner, ZomeCallRequest};
use crate::transport::CloseInfo;

/// Connection to a conductor app interface.
#[derive(Clone)]
pub struct AppWebsocket {
    connection: Connection,
    signer: Arc<dyn InvocationSigner>,
    signals: EventChannel<AppSignal>,
}

impl std::fmt::Debug for AppWebsocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppWebsocket")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl AppWebsocket {
    /// Connect to the app interface at `url`.
    pub async fn connect(
        url: &str,
        options: &ConnectOptions,
        signer: Arc<dyn InvocationSigner>,
    ) -> Result<Self> {
        let connection = Connection::connect(url, options).await?;
        Ok(Self::from_connection(connection, signer))
    }

    /// Use an existing connection.
    pub fn from_connection(connection: Connection, signer: Arc<dyn InvocationSigner>) -> Self {
        let signals = EventChannel::new();
        let forward = signals.clone();

        // Stays registered for the lifetime of the connection.
        let _forwarder = connection.on_signal(move |payload| {
            match AppSignal::from_payload(&payload) {
                Ok(Some(signal)) => {
                    forward.emit(SIGNAL_EVENT, &signal);
                }
                Ok(None) => tracing::trace!("Ignoring system signal"),
                Err(e) => tracing::warn!(error = %e, "Dropping undecodable signal"),
            }
        });

        Self {
            connection,
            signer,
            signals,
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Look up an installed app. `None` when the conductor does not know it.
    pub async fn app_info(&self, installed_app_id: &str) -> Result<Option<InstalledAppInfo>> {
        let request = AppRequest::AppInfo {
            installed_app_id: installed_app_id.to_string(),
        };
        match self.connection.request(&request, None).await? {
            AppResponse::AppInfo(info) => Ok(info),
            other => Err(unexpected("app_info", &other)),
        }
    }

    /// Sign and send a zome call, decoding its return value as `T`.
    pub async fn call_zome<T: DeserializeOwned>(
        &self,
        request: ZomeCallRequest,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let bytes = self.call_zome_raw(request, timeout).await?;
        rmp_serde::from_slice(&bytes)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()).into())
    }

    /// Sign and send a zome call, returning the encoded return value.
    pub async fn call_zome_raw(
        &self,
        request: ZomeCallRequest,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let signed = self.signer.sign_zome_call(request).await?;
        self.call_zome_signed(signed, timeout).await
    }

    /// Send an already signed zome call.
    pub async fn call_zome_signed(
        &self,
        signed: ZomeCallSigned,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let request = AppRequest::CallZome(Box::new(signed));
        match self.connection.request(&request, timeout).await? {
            AppResponse::ZomeCalled(bytes) => Ok(bytes),
            other => Err(unexpected("zome_called", &other)),
        }
    }

    /// Subscribe to app signals. System signals are not delivered.
    pub fn on_signal<F>(&self, listener: F) -> Subscription
    where
        F: Fn(AppSignal) + Send + Sync + 'static,
    {
        self.signals.on(SIGNAL_EVENT, listener)
    }

    /// Close the connection with a normal closure.
    pub async fn close(&self) -> CloseInfo {
        self.connection.close_normal().await
    }
}
