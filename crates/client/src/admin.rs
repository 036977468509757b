//! Typed client for the conductor admin interface.

use std::time::Duration;

use protocol::messages::{
    AppAuthenticationTokenIssued, AppStatusFilter, GrantZomeCallCapabilityPayload,
    InstalledAppInfo, IssueAppAuthenticationTokenPayload, ZomeCallCapGrant,
};
use protocol::{AdminRequest, AdminResponse, AgentPubKey, CellId, DnaHash, GrantedFunctions};

use crate::connection::{ConnectOptions, Connection};
use crate::error::{unexpected, ClientError, Result};
use crate::signing::{
    authorize_signing_credentials, BoxFuture, CapabilityGrantor, SigningCredentials,
    SigningCredentialsStore,
};
use crate::transport::CloseInfo;

/// Connection to a conductor admin interface.
#[derive(Debug, Clone)]
pub struct AdminWebsocket {
    connection: Connection,
}

impl AdminWebsocket {
    /// Connect to the admin interface at `url`.
    pub async fn connect(url: &str, options: &ConnectOptions) -> Result<Self> {
        Ok(Self::from_connection(Connection::connect(url, options).await?))
    }

    /// Use an existing connection.
    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Send a request with the default timeout.
    pub async fn request(&self, request: AdminRequest) -> Result<AdminResponse> {
        self.request_with_timeout(request, None).await
    }

    /// Send a request with an explicit timeout.
    pub async fn request_with_timeout(
        &self,
        request: AdminRequest,
        timeout: Option<Duration>,
    ) -> Result<AdminResponse> {
        self.connection.request(&request, timeout).await
    }

    /// Have the conductor generate a new agent key in its keystore.
    pub async fn generate_agent_pub_key(&self) -> Result<AgentPubKey> {
        match self.request(AdminRequest::GenerateAgentPubKey).await? {
            AdminResponse::AgentPubKeyGenerated(key) => Ok(key),
            other => Err(unexpected("agent_pub_key_generated", &other)),
        }
    }

    /// Hashes of the registered DNAs.
    pub async fn list_dnas(&self) -> Result<Vec<DnaHash>> {
        match self.request(AdminRequest::ListDnas).await? {
            AdminResponse::DnasListed(dnas) => Ok(dnas),
            other => Err(unexpected("dnas_listed", &other)),
        }
    }

    /// Cell ids of the running cells.
    pub async fn list_cell_ids(&self) -> Result<Vec<CellId>> {
        match self.request(AdminRequest::ListCellIds).await? {
            AdminResponse::CellIdsListed(cells) => Ok(cells),
            other => Err(unexpected("cell_ids_listed", &other)),
        }
    }

    /// Installed apps, optionally only those in one status.
    pub async fn list_apps(
        &self,
        status_filter: Option<AppStatusFilter>,
    ) -> Result<Vec<InstalledAppInfo>> {
        match self.request(AdminRequest::ListApps { status_filter }).await? {
            AdminResponse::AppsListed(apps) => Ok(apps),
            other => Err(unexpected("apps_listed", &other)),
        }
    }

    /// Ports of the attached app interfaces.
    pub async fn list_app_interfaces(&self) -> Result<Vec<u16>> {
        match self.request(AdminRequest::ListAppInterfaces).await? {
            AdminResponse::AppInterfacesListed(ports) => Ok(ports),
            other => Err(unexpected("app_interfaces_listed", &other)),
        }
    }

    /// Attach an app interface. With no port the conductor picks one.
    pub async fn attach_app_interface(&self, port: Option<u16>) -> Result<u16> {
        match self.request(AdminRequest::AttachAppInterface { port }).await? {
            AdminResponse::AppInterfaceAttached { port } => Ok(port),
            other => Err(unexpected("app_interface_attached", &other)),
        }
    }

    /// Enable an app. Returns the cells that failed to start.
    pub async fn enable_app(&self, installed_app_id: &str) -> Result<Vec<(CellId, String)>> {
        let request = AdminRequest::EnableApp {
            installed_app_id: installed_app_id.to_string(),
        };
        match self.request(request).await? {
            AdminResponse::AppEnabled(enabled) => Ok(enabled.errors),
            other => Err(unexpected("app_enabled", &other)),
        }
    }

    /// Stop an app's cells without uninstalling it.
    pub async fn disable_app(&self, installed_app_id: &str) -> Result<()> {
        let request = AdminRequest::DisableApp {
            installed_app_id: installed_app_id.to_string(),
        };
        match self.request(request).await? {
            AdminResponse::AppDisabled => Ok(()),
            other => Err(unexpected("app_disabled", &other)),
        }
    }

    /// Remove an app and its cells.
    pub async fn uninstall_app(&self, installed_app_id: &str) -> Result<()> {
        let request = AdminRequest::UninstallApp {
            installed_app_id: installed_app_id.to_string(),
        };
        match self.request(request).await? {
            AdminResponse::AppUninstalled => Ok(()),
            other => Err(unexpected("app_uninstalled", &other)),
        }
    }

    /// Grant a zome call capability on `cell_id`.
    pub async fn grant_zome_call_capability(
        &self,
        cell_id: CellId,
        cap_grant: ZomeCallCapGrant,
    ) -> Result<()> {
        let request = AdminRequest::GrantZomeCallCapability(Box::new(
            GrantZomeCallCapabilityPayload { cell_id, cap_grant },
        ));
        match self.request(request).await? {
            AdminResponse::ZomeCallCapabilityGranted => Ok(()),
            other => Err(unexpected("zome_call_capability_granted", &other)),
        }
    }

    /// Issue a token an app client can present to an app interface.
    ///
    /// `expiry_seconds` of 0 issues a token that never expires.
    pub async fn issue_app_authentication_token(
        &self,
        installed_app_id: &str,
        expiry_seconds: u64,
        single_use: bool,
    ) -> Result<AppAuthenticationTokenIssued> {
        let request =
            AdminRequest::IssueAppAuthenticationToken(IssueAppAuthenticationTokenPayload {
                installed_app_id: installed_app_id.to_string(),
                expiry_seconds,
                single_use,
            });
        match self.request(request).await? {
            AdminResponse::AppAuthenticationTokenIssued(issued) => Ok(issued),
            other => Err(unexpected("app_authentication_token_issued", &other)),
        }
    }

    /// Dump a cell's state, parsed from the JSON the conductor returns.
    pub async fn dump_state(&self, cell_id: CellId) -> Result<serde_json::Value> {
        match self.request(AdminRequest::DumpState { cell_id }).await? {
            AdminResponse::StateDumped(json) => serde_json::from_str(&json).map_err(|e| {
                ClientError::Protocol(protocol::ProtocolError::Deserialization(e.to_string()))
            }),
            other => Err(unexpected("state_dumped", &other)),
        }
    }

    /// Authorize a new signing key for `cell_id` and store it in `store`.
    pub async fn authorize_signing_credentials(
        &self,
        store: &SigningCredentialsStore,
        cell_id: CellId,
        functions: Option<GrantedFunctions>,
    ) -> Result<std::sync::Arc<SigningCredentials>> {
        authorize_signing_credentials(self, store, cell_id, functions).await
    }

    /// Close the connection with a normal closure.
    pub async fn close(&self) -> CloseInfo {
        self.connection.close_normal().await
    }
}

impl CapabilityGrantor for AdminWebsocket {
    fn grant_zome_call_capability(
        &self,
        cell_id: CellId,
        grant: ZomeCallCapGrant,
    ) -> BoxFuture<'_, ()> {
        Box::pin(AdminWebsocket::grant_zome_call_capability(self, cell_id, grant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryPeer, Transport};
    use protocol::messages::{decode_operation, encode_error, encode_operation, EnabledApp};

    fn pair() -> (AdminWebsocket, MemoryPeer) {
        let (transport, peer) = Transport::in_memory(16);
        let connection = Connection::from_transport(transport, &ConnectOptions::default());
        (AdminWebsocket::from_connection(connection), peer)
    }

    async fn answer(peer: &mut MemoryPeer, response: AdminResponse) -> AdminRequest {
        let (id, payload) = peer.next_request().await.unwrap();
        peer.respond(id, Some(encode_operation(&response).unwrap()))
            .await;
        decode_operation(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_list_app_interfaces() {
        let (admin, mut peer) = pair();
        let server = tokio::spawn(async move {
            answer(&mut peer, AdminResponse::AppInterfacesListed(vec![8888, 9999])).await
        });

        assert_eq!(admin.list_app_interfaces().await.unwrap(), vec![8888, 9999]);
        assert_eq!(server.await.unwrap(), AdminRequest::ListAppInterfaces);
    }

    #[tokio::test]
    async fn test_list_apps_with_filter() {
        use protocol::messages::{InstalledAppInfoStatus, InstalledCell};

        let (admin, mut peer) = pair();
        let cell_id = CellId::new(DnaHash::from_core([3; 32]), AgentPubKey::from_core([4; 32]));
        let forum = InstalledAppInfo {
            installed_app_id: "forum".to_string(),
            cell_data: vec![InstalledCell {
                cell_id,
                role_name: "posts".to_string(),
            }],
            status: InstalledAppInfoStatus::Running,
        };
        let listed = forum.clone();
        let server = tokio::spawn(async move {
            let first = answer(&mut peer, AdminResponse::AppsListed(vec![listed])).await;
            let second = answer(&mut peer, AdminResponse::AppsListed(Vec::new())).await;
            (first, second)
        });

        let running = admin
            .list_apps(Some(AppStatusFilter::Running))
            .await
            .unwrap();
        assert_eq!(running, vec![forum]);
        assert_eq!(running[0].cell_id_for_role("posts"), Some(cell_id));
        assert!(admin.list_apps(None).await.unwrap().is_empty());

        let (first, second) = server.await.unwrap();
        assert_eq!(
            first,
            AdminRequest::ListApps {
                status_filter: Some(AppStatusFilter::Running)
            }
        );
        assert_eq!(
            second,
            AdminRequest::ListApps {
                status_filter: None
            }
        );
    }

    #[tokio::test]
    async fn test_enable_app_returns_errors() {
        let (admin, mut peer) = pair();
        let cell_id = CellId::new(DnaHash::from_core([1; 32]), AgentPubKey::from_core([2; 32]));
        let server = tokio::spawn(async move {
            answer(
                &mut peer,
                AdminResponse::AppEnabled(EnabledApp {
                    errors: vec![(cell_id, "genesis failed".to_string())],
                }),
            )
            .await
        });

        let errors = admin.enable_app("forum").await.unwrap();
        assert_eq!(errors, vec![(cell_id, "genesis failed".to_string())]);
        assert_eq!(
            server.await.unwrap(),
            AdminRequest::EnableApp {
                installed_app_id: "forum".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_wrong_response_kind() {
        let (admin, mut peer) = pair();
        tokio::spawn(async move {
            answer(&mut peer, AdminResponse::AppDisabled).await;
            peer
        });

        let err = admin.list_dnas().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnexpectedResponse { expected: "dnas_listed", ref got } if got == "app_disabled"
        ));
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let (admin, mut peer) = pair();
        tokio::spawn(async move {
            let (id, _) = peer.next_request().await.unwrap();
            peer.respond(id, Some(encode_error("internal_error", "app not installed").unwrap()))
                .await;
            peer
        });

        let err = admin.uninstall_app("ghost").await.unwrap_err();
        match err {
            ClientError::Remote(remote) => {
                assert_eq!(remote.name, "internal_error");
                assert_eq!(remote.message, "app not installed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dump_state_parses_json() {
        let (admin, mut peer) = pair();
        tokio::spawn(async move {
            answer(
                &mut peer,
                AdminResponse::StateDumped(r#"[{"peer_dump":{}},2]"#.to_string()),
            )
            .await;
            peer
        });

        let cell_id = CellId::new(DnaHash::from_core([1; 32]), AgentPubKey::from_core([2; 32]));
        let state = admin.dump_state(cell_id).await.unwrap();
        assert_eq!(state[1], 2);
    }

    #[tokio::test]
    async fn test_issue_token() {
        let (admin, mut peer) = pair();
        let server = tokio::spawn(async move {
            answer(
                &mut peer,
                AdminResponse::AppAuthenticationTokenIssued(AppAuthenticationTokenIssued {
                    token: vec![7; 16],
                    expires_at: Some(1_700_000_000),
                    single_use: true,
                }),
            )
            .await
        });

        let issued = admin
            .issue_app_authentication_token("forum", 30, true)
            .await
            .unwrap();
        assert_eq!(issued.token, vec![7; 16]);

        match server.await.unwrap() {
            AdminRequest::IssueAppAuthenticationToken(payload) => {
                assert_eq!(payload.installed_app_id, "forum");
                assert_eq!(payload.expiry_seconds, 30);
                assert!(payload.single_use);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }
}
