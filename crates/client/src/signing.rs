//! Zome call signing.
//!
//! Before a client can call zome functions on a cell it authorizes a fresh
//! signing key: the admin interface registers a capability grant assigned
//! to that key, and the key pair plus grant secret are kept in a
//! [`SigningCredentialsStore`]. Every call is then signed with a fresh nonce
//! and a short expiry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use protocol::messages::{CapAccess, GrantedFunctions, ZomeCallCapGrant, SIGNING_GRANT_TAG};
use protocol::{
    generate_signing_key_pair, nonce_expiration, now_micros, random_cap_secret, random_nonce,
    AgentPubKey, ProtocolError,
    CapSecret, CellId, SigningKeyPair, ZomeCallSigned, ZomeCallUnsigned, DEFAULT_EXPIRY_WINDOW,
};
use serde::Serialize;

use crate::error::{ClientError, Result};

/// Boxed future returned by the signing traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// What a client needs to sign calls to one cell.
#[derive(Clone)]
pub struct SigningCredentials {
    /// Secret of the capability grant assigned to `signing_key`.
    pub cap_secret: CapSecret,
    /// Key pair the calls are signed with.
    pub key_pair: SigningKeyPair,
    /// Identity derived from the key pair; used as provenance.
    pub signing_key: AgentPubKey,
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("signing_key", &self.signing_key)
            .finish_non_exhaustive()
    }
}

/// A zome call to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZomeCallRequest {
    /// Cell that runs the function.
    pub cell_id: CellId,
    /// Zome that defines the function.
    pub zome_name: String,
    /// Function to call.
    pub fn_name: String,
    /// MessagePack-encoded argument.
    pub payload: Vec<u8>,
    /// Identity to call as. Must be the signing key when set.
    pub provenance: Option<AgentPubKey>,
}

impl ZomeCallRequest {
    /// Build a request, encoding `payload`.
    pub fn new<P: Serialize + ?Sized>(
        cell_id: CellId,
        zome_name: impl Into<String>,
        fn_name: impl Into<String>,
        payload: &P,
    ) -> Result<Self> {
        let payload = rmp_serde::to_vec_named(payload).map_err(protocol::ProtocolError::from)?;
        Ok(Self {
            cell_id,
            zome_name: zome_name.into(),
            fn_name: fn_name.into(),
            payload,
            provenance: None,
        })
    }

    /// Call as a specific agent.
    ///
    /// Signing fails with [`ClientError::ProvenanceMismatch`] unless this is
    /// the signing key authorized for the cell.
    pub fn with_provenance(mut self, provenance: AgentPubKey) -> Self {
        self.provenance = Some(provenance);
        self
    }
}

/// Turns zome call requests into signed invocations.
pub trait InvocationSigner: Send + Sync {
    /// Sign a request.
    fn sign_zome_call(&self, request: ZomeCallRequest) -> BoxFuture<'_, ZomeCallSigned>;
}

/// Registers capability grants on a cell.
pub trait CapabilityGrantor: Send + Sync {
    /// Register `grant` on `cell_id`.
    fn grant_zome_call_capability(
        &self,
        cell_id: CellId,
        grant: ZomeCallCapGrant,
    ) -> BoxFuture<'_, ()>;
}

/// Signing credentials keyed by cell.
///
/// Cheap to clone; clones share the same map. At most one set of
/// credentials is kept per cell and the last one set wins.
#[derive(Clone)]
pub struct SigningCredentialsStore {
    credentials: Arc<DashMap<CellId, Arc<SigningCredentials>>>,
    expiry_window: Duration,
}

impl Default for SigningCredentialsStore {
    fn default() -> Self {
        Self {
            credentials: Arc::new(DashMap::new()),
            expiry_window: DEFAULT_EXPIRY_WINDOW,
        }
    }
}

impl std::fmt::Debug for SigningCredentialsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentialsStore")
            .field("cells", &self.credentials.len())
            .field("expiry_window", &self.expiry_window)
            .finish()
    }
}

impl SigningCredentialsStore {
    /// Create an empty store whose signatures expire after `expiry_window`.
    ///
    /// Windows shorter than one microsecond are rejected.
    pub fn new(expiry_window: Duration) -> Result<Self> {
        if expiry_window.as_micros() == 0 {
            return Err(ClientError::InvalidExpiryWindow {
                window: expiry_window,
            });
        }
        Ok(Self {
            expiry_window,
            ..Self::default()
        })
    }

    /// Validity window of signed calls.
    pub fn expiry_window(&self) -> Duration {
        self.expiry_window
    }

    /// Credentials for a cell, if authorized.
    pub fn get(&self, cell_id: &CellId) -> Option<Arc<SigningCredentials>> {
        self.credentials.get(cell_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Store credentials for a cell, replacing any previous set.
    pub fn set(&self, cell_id: CellId, credentials: SigningCredentials) {
        self.credentials.insert(cell_id, Arc::new(credentials));
    }

    /// Forget the credentials for a cell.
    pub fn remove(&self, cell_id: &CellId) -> Option<Arc<SigningCredentials>> {
        self.credentials.remove(cell_id).map(|(_, creds)| creds)
    }

    /// Whether a cell has credentials.
    pub fn contains(&self, cell_id: &CellId) -> bool {
        self.credentials.contains_key(cell_id)
    }

    /// Number of cells with credentials.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Whether no cell has credentials.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Sign a request with the credentials stored for its cell.
    ///
    /// Each call draws a fresh nonce and expiry. The expiry must lie in the
    /// future when signing completes, otherwise the clock is reported as
    /// skewed.
    pub fn sign(&self, request: ZomeCallRequest) -> Result<ZomeCallSigned> {
        let credentials = self
            .get(&request.cell_id)
            .ok_or(ClientError::NoSigningCredentials {
                cell_id: request.cell_id,
            })?;

        let signing_key = credentials.signing_key;
        if let Some(requested) = request.provenance {
            if requested != signing_key {
                return Err(ClientError::ProvenanceMismatch {
                    signing_key,
                    requested,
                });
            }
        }

        let unsigned = ZomeCallUnsigned {
            provenance: signing_key,
            cell_id: request.cell_id,
            zome_name: request.zome_name,
            fn_name: request.fn_name,
            cap_secret: Some(credentials.cap_secret),
            payload: request.payload,
            nonce: random_nonce()?,
            expires_at: nonce_expiration(self.expiry_window)?,
        };

        tracing::debug!(
            cell_id = %unsigned.cell_id,
            zome = %unsigned.zome_name,
            function = %unsigned.fn_name,
            "Signing zome call"
        );

        let signed = unsigned.sign(&credentials.key_pair)?;
        ensure_unexpired(signed.expires_at, now_micros()?)?;
        Ok(signed)
    }
}

/// Fails with [`ProtocolError::ClockSkew`] unless `expires_at` is after `now`.
fn ensure_unexpired(expires_at: i64, now: i64) -> Result<()> {
    if expires_at <= now {
        return Err(ProtocolError::ClockSkew(format!(
            "call expires at {expires_at}µs, which is not after now ({now}µs)"
        ))
        .into());
    }
    Ok(())
}

impl InvocationSigner for SigningCredentialsStore {
    fn sign_zome_call(&self, request: ZomeCallRequest) -> BoxFuture<'_, ZomeCallSigned> {
        Box::pin(async move { self.sign(request) })
    }
}

/// Authorize a fresh signing key for `cell_id` and store its credentials.
///
/// `functions` defaults to every function of the cell. Each call registers
/// a new grant; earlier grants stay in place.
pub async fn authorize_signing_credentials<G>(
    grantor: &G,
    store: &SigningCredentialsStore,
    cell_id: CellId,
    functions: Option<GrantedFunctions>,
) -> Result<Arc<SigningCredentials>>
where
    G: CapabilityGrantor + ?Sized,
{
    let (key_pair, signing_key) = generate_signing_key_pair()?;
    let cap_secret = random_cap_secret()?;

    let grant = ZomeCallCapGrant {
        tag: SIGNING_GRANT_TAG.to_string(),
        access: CapAccess::Assigned {
            secret: cap_secret,
            assignees: vec![signing_key],
        },
        functions: functions.unwrap_or(GrantedFunctions::All),
    };

    grantor.grant_zome_call_capability(cell_id, grant).await?;

    tracing::info!(cell_id = %cell_id, signing_key = %signing_key, "Signing credentials authorized");

    let credentials = SigningCredentials {
        cap_secret,
        key_pair,
        signing_key,
    };
    store.set(cell_id, credentials);
    store
        .get(&cell_id)
        .ok_or(ClientError::NoSigningCredentials { cell_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, RemoteError};
    use protocol::DnaHash;
    use std::sync::Mutex;

    fn cell(n: u8) -> CellId {
        CellId::new(DnaHash::from_core([n; 32]), AgentPubKey::from_core([n + 100; 32]))
    }

    #[derive(Default)]
    struct RecordingGrantor {
        grants: Mutex<Vec<(CellId, ZomeCallCapGrant)>>,
        reject: bool,
    }

    impl CapabilityGrantor for RecordingGrantor {
        fn grant_zome_call_capability(
            &self,
            cell_id: CellId,
            grant: ZomeCallCapGrant,
        ) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                if self.reject {
                    return Err(ClientError::Remote(RemoteError {
                        name: "internal_error".to_string(),
                        message: "cell missing".to_string(),
                    }));
                }
                self.grants.lock().unwrap().push((cell_id, grant));
                Ok(())
            })
        }
    }

    #[test]
    fn test_sign_without_credentials() {
        let store = SigningCredentialsStore::default();
        let request = ZomeCallRequest::new(cell(1), "posts", "list", &()).unwrap();

        let err = store.sign(request).unwrap_err();
        assert!(matches!(err, ClientError::NoSigningCredentials { cell_id } if cell_id == cell(1)));
        assert_eq!(err.kind(), ErrorKind::Signing);
    }

    #[tokio::test]
    async fn test_authorize_registers_assigned_grant() {
        let grantor = RecordingGrantor::default();
        let store = SigningCredentialsStore::default();

        let credentials = authorize_signing_credentials(&grantor, &store, cell(1), None)
            .await
            .unwrap();

        let grants = grantor.grants.lock().unwrap();
        assert_eq!(grants.len(), 1);
        let (granted_cell, grant) = &grants[0];
        assert_eq!(*granted_cell, cell(1));
        assert_eq!(grant.tag, SIGNING_GRANT_TAG);
        assert_eq!(grant.functions, GrantedFunctions::All);
        match &grant.access {
            CapAccess::Assigned { secret, assignees } => {
                assert_eq!(secret, &credentials.cap_secret);
                assert_eq!(assignees, &vec![credentials.signing_key]);
            }
            other => panic!("unexpected access: {other:?}"),
        }
        assert!(store.contains(&cell(1)));
    }

    #[tokio::test]
    async fn test_authorize_with_listed_functions() {
        let grantor = RecordingGrantor::default();
        let store = SigningCredentialsStore::default();
        let functions = GrantedFunctions::Listed(vec![("posts".into(), "create".into())]);

        authorize_signing_credentials(&grantor, &store, cell(2), Some(functions.clone()))
            .await
            .unwrap();

        assert_eq!(grantor.grants.lock().unwrap()[0].1.functions, functions);
    }

    #[tokio::test]
    async fn test_rejected_grant_stores_nothing() {
        let grantor = RecordingGrantor {
            reject: true,
            ..Default::default()
        };
        let store = SigningCredentialsStore::default();

        let err = authorize_signing_credentials(&grantor, &store, cell(1), None)
            .await
            .unwrap_err();
        assert!(err.is_remote());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sign_after_authorize() {
        let grantor = RecordingGrantor::default();
        let store = SigningCredentialsStore::default();
        let credentials = authorize_signing_credentials(&grantor, &store, cell(1), None)
            .await
            .unwrap();

        let request = ZomeCallRequest::new(cell(1), "posts", "create", "hello").unwrap();
        let signed = store.sign_zome_call(request).await.unwrap();

        assert_eq!(signed.provenance, credentials.signing_key);
        assert_eq!(signed.cap_secret, Some(credentials.cap_secret));
        assert_eq!(rmp_serde::from_slice::<String>(&signed.payload).unwrap(), "hello");
        signed.verify(credentials.key_pair.verifying_key()).unwrap();
    }

    #[tokio::test]
    async fn test_foreign_provenance_is_rejected() {
        let grantor = RecordingGrantor::default();
        let store = SigningCredentialsStore::default();
        let credentials = authorize_signing_credentials(&grantor, &store, cell(1), None)
            .await
            .unwrap();

        let agent = AgentPubKey::from_core([42; 32]);
        let request = ZomeCallRequest::new(cell(1), "posts", "create", &1u32)
            .unwrap()
            .with_provenance(agent);
        let err = store.sign(request).unwrap_err();
        match &err {
            ClientError::ProvenanceMismatch {
                signing_key,
                requested,
            } => {
                assert_eq!(*signing_key, credentials.signing_key);
                assert_eq!(*requested, agent);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Signing);
    }

    #[tokio::test]
    async fn test_own_provenance_verifies() {
        let grantor = RecordingGrantor::default();
        let store = SigningCredentialsStore::default();
        let credentials = authorize_signing_credentials(&grantor, &store, cell(1), None)
            .await
            .unwrap();

        let request = ZomeCallRequest::new(cell(1), "posts", "create", &1u32)
            .unwrap()
            .with_provenance(credentials.signing_key);
        let signed = store.sign(request).unwrap();

        assert_eq!(signed.provenance, credentials.signing_key);
        signed
            .verify(&signed.provenance.to_ed25519().unwrap())
            .unwrap();
    }

    #[test]
    fn test_new_rejects_zero_window() {
        for window in [Duration::ZERO, Duration::from_nanos(999)] {
            let err = SigningCredentialsStore::new(window).unwrap_err();
            assert!(matches!(err, ClientError::InvalidExpiryWindow { window: w } if w == window));
            assert_eq!(err.kind(), ErrorKind::Signing);
        }

        let store = SigningCredentialsStore::new(Duration::from_secs(60)).unwrap();
        assert_eq!(store.expiry_window(), Duration::from_secs(60));
    }

    #[test]
    fn test_expiry_must_be_in_the_future() {
        assert!(ensure_unexpired(1_001, 1_000).is_ok());

        for expires_at in [1_000, 999] {
            let err = ensure_unexpired(expires_at, 1_000).unwrap_err();
            assert!(matches!(
                err,
                ClientError::Protocol(ProtocolError::ClockSkew(_))
            ));
            assert_eq!(err.kind(), ErrorKind::Signing);
        }
    }

    #[tokio::test]
    async fn test_signed_expiry_is_after_signing_time() {
        let grantor = RecordingGrantor::default();
        let store = SigningCredentialsStore::new(Duration::from_secs(1)).unwrap();
        authorize_signing_credentials(&grantor, &store, cell(1), None)
            .await
            .unwrap();

        let signed = store
            .sign(ZomeCallRequest::new(cell(1), "posts", "list", &()).unwrap())
            .unwrap();
        assert!(signed.expires_at > now_micros().unwrap());
    }

    #[test]
    fn test_set_replaces_and_remove_clears() {
        let store = SigningCredentialsStore::default();
        let make = || {
            let (key_pair, signing_key) = generate_signing_key_pair().unwrap();
            SigningCredentials {
                cap_secret: random_cap_secret().unwrap(),
                key_pair,
                signing_key,
            }
        };

        let first = make();
        let second = make();
        store.set(cell(1), first);
        store.set(cell(1), second.clone());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&cell(1)).unwrap().signing_key, second.signing_key);

        let clone = store.clone();
        assert!(clone.remove(&cell(1)).is_some());
        assert!(!store.contains(&cell(1)));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let (key_pair, signing_key) = generate_signing_key_pair().unwrap();
        let credentials = SigningCredentials {
            cap_secret: random_cap_secret().unwrap(),
            key_pair,
            signing_key,
        };
        let text = format!("{credentials:?}");
        assert!(text.contains("signing_key"));
        assert!(!text.contains("cap_secret"));
    }
}
