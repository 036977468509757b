//! App-scoped client: zome calls addressed by role name.
//!
//! An [`AppAgentWebsocket`] serves one installed app. The app's info is
//! fetched on first use and cached; role names resolve to cell ids through
//! that cache until [`AppAgentWebsocket::invalidate_app_info`] clears it.

use std::sync::Arc;
use std::time::Duration;

use protocol::messages::InstalledAppInfo;
use protocol::{AppSignal, CellId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::app::AppWebsocket;
use crate::connection::ConnectOptions;
use crate::error::{ClientError, Result};
use crate::events::Subscription;
use crate::signing::{InvocationSigner, ZomeCallRequest};
use crate::transport::CloseInfo;

/// App interface connection bound to one installed app.
#[derive(Debug, Clone)]
pub struct AppAgentWebsocket {
    app: AppWebsocket,
    installed_app_id: String,
    cached_app_info: Arc<RwLock<Option<InstalledAppInfo>>>,
}

impl AppAgentWebsocket {
    /// Connect to the app interface at `url` on behalf of `installed_app_id`.
    pub async fn connect(
        url: &str,
        options: &ConnectOptions,
        signer: Arc<dyn InvocationSigner>,
        installed_app_id: impl Into<String>,
    ) -> Result<Self> {
        let app = AppWebsocket::connect(url, options, signer).await?;
        Ok(Self::new(app, installed_app_id))
    }

    /// Bind an existing app connection to `installed_app_id`.
    pub fn new(app: AppWebsocket, installed_app_id: impl Into<String>) -> Self {
        Self {
            app,
            installed_app_id: installed_app_id.into(),
            cached_app_info: Arc::new(RwLock::new(None)),
        }
    }

    pub fn installed_app_id(&self) -> &str {
        &self.installed_app_id
    }

    /// The underlying app connection.
    pub fn app(&self) -> &AppWebsocket {
        &self.app
    }

    /// Fetch the app's info and refresh the cache.
    pub async fn app_info(&self) -> Result<InstalledAppInfo> {
        let info = self
            .app
            .app_info(&self.installed_app_id)
            .await?
            .ok_or_else(|| ClientError::AppNotInstalled {
                installed_app_id: self.installed_app_id.clone(),
            })?;

        tracing::debug!(
            app = %self.installed_app_id,
            cells = info.cell_data.len(),
            "App info cached"
        );
        *self.cached_app_info.write().await = Some(info.clone());
        Ok(info)
    }

    /// The cached app info, if fetched.
    pub async fn cached_app_info(&self) -> Option<InstalledAppInfo> {
        self.cached_app_info.read().await.clone()
    }

    /// Drop the cached app info; the next lookup fetches it again.
    pub async fn invalidate_app_info(&self) {
        self.cached_app_info.write().await.take();
    }

    /// Resolve `role_name` to a cell id, fetching the app info if needed.
    pub async fn cell_id(&self, role_name: &str) -> Result<CellId> {
        let cached = self.cached_app_info().await;
        let info = match cached {
            Some(info) => info,
            None => self.app_info().await?,
        };
        info.cell_id_for_role(role_name)
            .ok_or_else(|| ClientError::NoCellForRole {
                role_name: role_name.to_string(),
            })
    }

    /// Call a zome function on the cell filling `role_name`.
    pub async fn call_role<T, P>(
        &self,
        role_name: &str,
        zome_name: &str,
        fn_name: &str,
        payload: &P,
        timeout: Option<Duration>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let cell_id = self.cell_id(role_name).await?;
        let request = ZomeCallRequest::new(cell_id, zome_name, fn_name, payload)?;
        self.app.call_zome(request, timeout).await
    }

    /// Call a zome function on an explicit cell.
    pub async fn call_zome<T: DeserializeOwned>(
        &self,
        request: ZomeCallRequest,
        timeout: Option<Duration>,
    ) -> Result<T> {
        self.app.call_zome(request, timeout).await
    }

    /// Subscribe to app signals.
    pub fn on_signal<F>(&self, listener: F) -> Subscription
    where
        F: Fn(AppSignal) + Send + Sync + 'static,
    {
        self.app.on_signal(listener)
    }

    pub async fn close(&self) -> CloseInfo {
        self.app.close().await
    }
}
