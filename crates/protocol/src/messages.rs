//! Operation envelopes for the admin and app interfaces.
//!
//! Every frame payload is a MessagePack map `{ "type": tag, "value": data }`.
//! Requests and responses are closed enums, so an unexpected tag fails at
//! decode time instead of flowing through as untyped data. The reserved
//! [`ERROR_TAG`] marks a response that reports a remote failure.

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};

use crate::crypto::CapSecret;
use crate::error::{ProtocolError, Result};
use crate::hash::{AgentPubKey, CellId, DnaHash};
use crate::invocation::ZomeCallSigned;

/// Tag of a response carrying a remote error.
pub const ERROR_TAG: &str = "error";

/// Tag of a capability grant created for zome call signing.
pub const SIGNING_GRANT_TAG: &str = "zome-call-signing-key";

/// Encode an operation envelope.
pub fn encode_operation<T: Serialize>(operation: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(operation)?)
}

/// Decode an operation envelope into a closed enum.
pub fn decode_operation<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(payload)?)
}

#[derive(Deserialize)]
struct TagOnly {
    #[serde(rename = "type")]
    tag: String,
}

/// Read the operation tag without decoding the value.
pub fn peek_tag(payload: &[u8]) -> Result<String> {
    let TagOnly { tag } = rmp_serde::from_slice(payload)?;
    Ok(tag)
}

/// Body of an error response.
///
/// Conductors send `{type, value}`; `{name, message}` is accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteErrorBody {
    #[serde(rename = "type", alias = "name")]
    pub name: String,
    #[serde(rename = "value", alias = "message")]
    pub message: String,
}

#[derive(Serialize, Deserialize)]
struct ErrorEnvelope {
    #[serde(rename = "type")]
    tag: String,
    value: RemoteErrorBody,
}

/// Decode the body of an error response.
pub fn decode_error(payload: &[u8]) -> Result<RemoteErrorBody> {
    let envelope: ErrorEnvelope = rmp_serde::from_slice(payload)?;
    Ok(envelope.value)
}

/// Encode an error response.
pub fn encode_error(name: &str, message: &str) -> Result<Vec<u8>> {
    encode_operation(&ErrorEnvelope {
        tag: ERROR_TAG.to_string(),
        value: RemoteErrorBody {
            name: name.to_string(),
            message: message.to_string(),
        },
    })
}

/// A request on one of the conductor interfaces.
pub trait OperationRequest: Serialize {
    /// Wire tag of this request.
    fn tag(&self) -> &'static str;
}

/// A response on one of the conductor interfaces.
pub trait OperationResponse: DeserializeOwned {
    /// Every tag this enum can decode.
    const TAGS: &'static [&'static str];

    /// Wire tag of this response.
    fn tag(&self) -> &'static str;
}

// Capability grants

/// Who may exercise a capability grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapAccess {
    /// Anyone.
    Unrestricted,
    /// Anyone holding the secret.
    Transferable { secret: CapSecret },
    /// The listed agents, presenting the secret.
    Assigned {
        secret: CapSecret,
        assignees: Vec<AgentPubKey>,
    },
}

/// Functions covered by a capability grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantedFunctions {
    /// Every function in every zome of the cell.
    All,
    /// `(zome_name, fn_name)` pairs.
    Listed(Vec<(String, String)>),
}

/// A grant allowing remote callers to invoke zome functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZomeCallCapGrant {
    pub tag: String,
    pub access: CapAccess,
    pub functions: GrantedFunctions,
}

/// Arguments of `grant_zome_call_capability`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantZomeCallCapabilityPayload {
    pub cell_id: CellId,
    pub cap_grant: ZomeCallCapGrant,
}

/// Arguments of `issue_app_authentication_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueAppAuthenticationTokenPayload {
    pub installed_app_id: String,
    /// Seconds until the token expires; 0 means never.
    pub expiry_seconds: u64,
    pub single_use: bool,
}

/// A token an app client presents to an app interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppAuthenticationTokenIssued {
    #[serde(with = "serde_bytes")]
    pub token: Vec<u8>,
    pub expires_at: Option<i64>,
    pub single_use: bool,
}

/// Result of enabling an app. Cells that failed to start are listed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnabledApp {
    #[serde(default)]
    pub errors: Vec<(CellId, String)>,
}

// Installed apps

/// A cell of an installed app, with the role it fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledCell {
    pub cell_id: CellId,
    pub role_name: String,
}

/// Why an app is paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PausedAppReason {
    pub error: String,
}

/// Why an app is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledAppReason {
    NeverStarted,
    User,
    Error(String),
}

/// Lifecycle state of an installed app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstalledAppInfoStatus {
    Paused { reason: PausedAppReason },
    Disabled { reason: DisabledAppReason },
    Running,
}

/// An installed app and its cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledAppInfo {
    pub installed_app_id: String,
    pub cell_data: Vec<InstalledCell>,
    pub status: InstalledAppInfoStatus,
}

impl InstalledAppInfo {
    /// Cell filling `role_name`, if any.
    pub fn cell_id_for_role(&self, role_name: &str) -> Option<CellId> {
        self.cell_data
            .iter()
            .find(|cell| cell.role_name == role_name)
            .map(|cell| cell.cell_id)
    }
}

/// Status filter for `list_apps`.
///
/// Encoded as a single-key map with a nil value, e.g. `{"Running": nil}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppStatusFilter {
    Enabled,
    Disabled,
    Running,
    Stopped,
    Paused,
}

impl AppStatusFilter {
    /// Wire name of the filter.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatusFilter::Enabled => "Enabled",
            AppStatusFilter::Disabled => "Disabled",
            AppStatusFilter::Running => "Running",
            AppStatusFilter::Stopped => "Stopped",
            AppStatusFilter::Paused => "Paused",
        }
    }
}

impl Serialize for AppStatusFilter {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.as_str(), &())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for AppStatusFilter {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map = BTreeMap::<String, IgnoredAny>::deserialize(deserializer)?;
        let mut keys = map.into_keys();
        let name = match (keys.next(), keys.next()) {
            (Some(name), None) => name,
            _ => {
                return Err(serde::de::Error::custom(
                    "status filter must have exactly one key",
                ))
            }
        };
        match name.as_str() {
            "Enabled" => Ok(AppStatusFilter::Enabled),
            "Disabled" => Ok(AppStatusFilter::Disabled),
            "Running" => Ok(AppStatusFilter::Running),
            "Stopped" => Ok(AppStatusFilter::Stopped),
            "Paused" => Ok(AppStatusFilter::Paused),
            other => Err(serde::de::Error::unknown_variant(
                other,
                &["Enabled", "Disabled", "Running", "Stopped", "Paused"],
            )),
        }
    }
}

// Admin interface

/// Requests accepted by the admin interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AdminRequest {
    GenerateAgentPubKey,
    ListDnas,
    ListCellIds,
    ListAppInterfaces,
    ListApps {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_filter: Option<AppStatusFilter>,
    },
    AttachAppInterface { port: Option<u16> },
    EnableApp { installed_app_id: String },
    DisableApp { installed_app_id: String },
    UninstallApp { installed_app_id: String },
    GrantZomeCallCapability(Box<GrantZomeCallCapabilityPayload>),
    IssueAppAuthenticationToken(IssueAppAuthenticationTokenPayload),
    DumpState { cell_id: CellId },
}

impl OperationRequest for AdminRequest {
    fn tag(&self) -> &'static str {
        match self {
            AdminRequest::GenerateAgentPubKey => "generate_agent_pub_key",
            AdminRequest::ListDnas => "list_dnas",
            AdminRequest::ListCellIds => "list_cell_ids",
            AdminRequest::ListAppInterfaces => "list_app_interfaces",
            AdminRequest::ListApps { .. } => "list_apps",
            AdminRequest::AttachAppInterface { .. } => "attach_app_interface",
            AdminRequest::EnableApp { .. } => "enable_app",
            AdminRequest::DisableApp { .. } => "disable_app",
            AdminRequest::UninstallApp { .. } => "uninstall_app",
            AdminRequest::GrantZomeCallCapability(_) => "grant_zome_call_capability",
            AdminRequest::IssueAppAuthenticationToken(_) => "issue_app_authentication_token",
            AdminRequest::DumpState { .. } => "dump_state",
        }
    }
}

/// Responses sent by the admin interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AdminResponse {
    AgentPubKeyGenerated(AgentPubKey),
    DnasListed(Vec<DnaHash>),
    CellIdsListed(Vec<CellId>),
    AppInterfacesListed(Vec<u16>),
    AppsListed(Vec<InstalledAppInfo>),
    AppInterfaceAttached { port: u16 },
    AppEnabled(EnabledApp),
    AppDisabled,
    AppUninstalled,
    ZomeCallCapabilityGranted,
    AppAuthenticationTokenIssued(AppAuthenticationTokenIssued),
    /// JSON text describing the cell's state.
    StateDumped(String),
}

impl OperationResponse for AdminResponse {
    const TAGS: &'static [&'static str] = &[
        "agent_pub_key_generated",
        "dnas_listed",
        "cell_ids_listed",
        "app_interfaces_listed",
        "apps_listed",
        "app_interface_attached",
        "app_enabled",
        "app_disabled",
        "app_uninstalled",
        "zome_call_capability_granted",
        "app_authentication_token_issued",
        "state_dumped",
    ];

    fn tag(&self) -> &'static str {
        match self {
            AdminResponse::AgentPubKeyGenerated(_) => "agent_pub_key_generated",
            AdminResponse::DnasListed(_) => "dnas_listed",
            AdminResponse::CellIdsListed(_) => "cell_ids_listed",
            AdminResponse::AppInterfacesListed(_) => "app_interfaces_listed",
            AdminResponse::AppsListed(_) => "apps_listed",
            AdminResponse::AppInterfaceAttached { .. } => "app_interface_attached",
            AdminResponse::AppEnabled(_) => "app_enabled",
            AdminResponse::AppDisabled => "app_disabled",
            AdminResponse::AppUninstalled => "app_uninstalled",
            AdminResponse::ZomeCallCapabilityGranted => "zome_call_capability_granted",
            AdminResponse::AppAuthenticationTokenIssued(_) => "app_authentication_token_issued",
            AdminResponse::StateDumped(_) => "state_dumped",
        }
    }
}

// App interface

/// Requests accepted by an app interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AppRequest {
    AppInfo { installed_app_id: String },
    CallZome(Box<ZomeCallSigned>),
}

impl OperationRequest for AppRequest {
    fn tag(&self) -> &'static str {
        match self {
            AppRequest::AppInfo { .. } => "app_info",
            AppRequest::CallZome(_) => "call_zome",
        }
    }
}

/// Responses sent by an app interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AppResponse {
    /// The app, or `None` when it is not installed.
    AppInfo(Option<InstalledAppInfo>),
    /// MessagePack-encoded return value of the zome function.
    ZomeCalled(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl OperationResponse for AppResponse {
    const TAGS: &'static [&'static str] = &["app_info", "zome_called"];

    fn tag(&self) -> &'static str {
        match self {
            AppResponse::AppInfo(_) => "app_info",
            AppResponse::ZomeCalled(_) => "zome_called",
        }
    }
}

// Signals

/// An app signal as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedAppSignal {
    pub cell_id: CellId,
    pub zome_name: String,
    #[serde(with = "serde_bytes")]
    pub signal: Vec<u8>,
}

impl EncodedAppSignal {
    /// Encode as a signal frame payload.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        enum SignalRef<'a> {
            App(&'a EncodedAppSignal),
        }
        encode_operation(&SignalRef::App(self))
    }
}

#[derive(Deserialize)]
enum Signal {
    App(EncodedAppSignal),
    System(IgnoredAny),
}

/// A signal emitted by a zome, with its payload still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSignal {
    pub cell_id: CellId,
    pub zome_name: String,
    pub payload: Vec<u8>,
}

impl AppSignal {
    /// Decode a signal frame payload.
    ///
    /// Returns `None` for system signals.
    pub fn from_payload(payload: &[u8]) -> Result<Option<Self>> {
        let signal: Signal = rmp_serde::from_slice(payload)?;
        Ok(match signal {
            Signal::App(app) => Some(AppSignal {
                cell_id: app.cell_id,
                zome_name: app.zome_name,
                payload: app.signal,
            }),
            Signal::System(_) => None,
        })
    }

    /// Decode the payload as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        rmp_serde::from_slice(&self.payload)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}
