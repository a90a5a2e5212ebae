// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core OPC UA types shared across the client.
//!
//! - **NodeId**: All four node identifier types with parsing and formatting
//! - **StatusCode**: Status code classification and well-known names
//! - **SecurityMode/Policy**: Endpoint security descriptors
//! - **LoginMode/UserIdentity**: Session authentication
//! - **ServerDescriptor/EndpointDescriptor**: What a server is and how it can be reached
//! - **NodeClass/AttributeId/BrowseDirection**: Address-space vocabulary
//!
//! # Examples
//!
//! ```
//! use ua_inspector::types::{NodeId, SecurityMode};
//!
//! let node_id: NodeId = "ns=2;s=Temperature.Value".parse().unwrap();
//! assert_eq!(node_id.namespace_index, 2);
//! assert!(SecurityMode::None.is_none());
//! ```

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigurationError, OpcUaError};

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA Node Identifier.
///
/// A NodeId uniquely identifies a node within a server. It consists of a
/// namespace index and an identifier which can be numeric, string, GUID,
/// or opaque (byte string).
///
/// # Examples
///
/// ```
/// use ua_inspector::types::NodeId;
///
/// let numeric = NodeId::numeric(2, 1001);
/// assert_eq!(numeric.to_string(), "ns=2;i=1001");
///
/// let parsed: NodeId = "ns=2;s=MyDevice.Temperature".parse().unwrap();
/// assert_eq!(parsed.as_string(), Some("MyDevice.Temperature"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Creates a numeric node ID.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node ID.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque (byte string) node ID.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    // =========================================================================
    // Standard Node IDs
    // =========================================================================

    /// Root folder node (ns=0, i=84).
    pub const ROOT_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(84),
    };

    /// Objects folder node (ns=0, i=85). Browsing starts here by default.
    pub const OBJECTS_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(85),
    };

    /// Server node (ns=0, i=2253).
    pub const SERVER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(2253),
    };

    /// Server_ServerStatus_State variable (ns=0, i=2259), used for keep-alive probes.
    pub const SERVER_STATUS_STATE: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(2259),
    };

    // =========================================================================
    // Properties
    // =========================================================================

    /// Returns `true` if this is a numeric identifier.
    #[inline]
    pub const fn is_numeric(&self) -> bool {
        matches!(self.identifier, NodeIdentifier::Numeric(_))
    }

    /// Returns `true` if this is in the standard namespace (ns=0).
    #[inline]
    pub const fn is_standard(&self) -> bool {
        self.namespace_index == 0
    }

    /// Returns `true` if this is a null node ID (ns=0, i=0).
    #[inline]
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && matches!(self.identifier, NodeIdentifier::Numeric(0))
    }

    /// Returns the null node ID (ns=0, i=0).
    #[inline]
    pub const fn null() -> Self {
        Self {
            namespace_index: 0,
            identifier: NodeIdentifier::Numeric(0),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the numeric value if this is a numeric identifier.
    #[inline]
    pub fn as_numeric(&self) -> Option<u32> {
        match &self.identifier {
            NodeIdentifier::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string value if this is a string identifier.
    #[inline]
    pub fn as_string(&self) -> Option<&str> {
        match &self.identifier {
            NodeIdentifier::String(v) => Some(v),
            _ => None,
        }
    }

    /// Converts to the OPC UA string format.
    ///
    /// Format: `ns=<namespace>;{i|s|g|b}=<identifier>`, with the `ns=` part
    /// omitted for namespace 0.
    pub fn to_opc_string(&self) -> String {
        if self.namespace_index == 0 {
            self.identifier.to_string()
        } else {
            format!("ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_opc_string())
    }
}

impl FromStr for NodeId {
    type Err = OpcUaError;

    /// Parses a NodeId from OPC UA string format.
    ///
    /// Supported formats:
    /// - `ns=2;i=1001` (numeric)
    /// - `ns=2;s=MyNode` (string)
    /// - `ns=2;g=550e8400-e29b-41d4-a716-446655440000` (GUID)
    /// - `ns=2;b=SGVsbG8=` (opaque, base64 encoded)
    /// - `i=85`, `s=MyNode` (namespace 0)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: String| {
            OpcUaError::configuration(ConfigurationError::invalid_node_id(s, reason))
        };

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns_str, id) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid("Missing identifier after namespace".to_string()))?;
                let ns: u16 = ns_str
                    .parse()
                    .map_err(|_| invalid("Invalid namespace index".to_string()))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            let value: u32 = id
                .parse()
                .map_err(|_| invalid("Invalid numeric identifier".to_string()))?;
            NodeIdentifier::Numeric(value)
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            NodeIdentifier::String(id.to_string())
        } else if let Some(id) = identifier_part.strip_prefix("g=") {
            let uuid = Uuid::parse_str(id).map_err(|e| invalid(format!("Invalid GUID: {}", e)))?;
            NodeIdentifier::Guid(uuid)
        } else if let Some(id) = identifier_part.strip_prefix("b=") {
            let bytes = BASE64
                .decode(id)
                .map_err(|e| invalid(format!("Invalid base64: {}", e)))?;
            NodeIdentifier::Opaque(bytes)
        } else {
            return Err(invalid(
                "Unknown identifier type. Expected i=, s=, g=, or b=".to_string(),
            ));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

// =============================================================================
// NodeIdentifier
// =============================================================================

/// OPC UA node identifier types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),

    /// String identifier.
    String(String),

    /// GUID identifier.
    Guid(Uuid),

    /// Opaque identifier.
    Opaque(Vec<u8>),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// OPC UA status code.
///
/// The top two bits classify the code: `00` good, `01` uncertain, `10`/`11` bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Good.
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    /// Generic bad status.
    pub const BAD: StatusCode = StatusCode(0x8000_0000);
    /// BadTimeout.
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    /// BadServerNotConnected.
    pub const BAD_SERVER_NOT_CONNECTED: StatusCode = StatusCode(0x800D_0000);
    /// BadCertificateUntrusted.
    pub const BAD_CERTIFICATE_UNTRUSTED: StatusCode = StatusCode(0x801A_0000);
    /// BadUserAccessDenied.
    pub const BAD_USER_ACCESS_DENIED: StatusCode = StatusCode(0x801F_0000);
    /// BadIdentityTokenRejected.
    pub const BAD_IDENTITY_TOKEN_REJECTED: StatusCode = StatusCode(0x8021_0000);
    /// BadSessionClosed.
    pub const BAD_SESSION_CLOSED: StatusCode = StatusCode(0x8026_0000);
    /// BadNodeIdUnknown.
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    /// BadNotReadable.
    pub const BAD_NOT_READABLE: StatusCode = StatusCode(0x803A_0000);
    /// BadNotWritable.
    pub const BAD_NOT_WRITABLE: StatusCode = StatusCode(0x803B_0000);
    /// BadTypeMismatch.
    pub const BAD_TYPE_MISMATCH: StatusCode = StatusCode(0x8074_0000);
    /// BadConnectionClosed.
    pub const BAD_CONNECTION_CLOSED: StatusCode = StatusCode(0x80AE_0000);
    /// UncertainLastUsableValue.
    pub const UNCERTAIN_LAST_USABLE_VALUE: StatusCode = StatusCode(0x4090_0000);

    /// Returns the raw code.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns `true` if the severity is good.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity is uncertain.
    #[inline]
    pub const fn is_uncertain(&self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    /// Returns `true` if the severity is bad.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns the well-known name, or the severity class when unknown.
    pub fn name(&self) -> &'static str {
        // Only the sub-code bits identify the status; the low 16 bits are info flags.
        match self.0 & 0xFFFF_0000 {
            0x0000_0000 => "Good",
            0x8000_0000 => "Bad",
            0x8001_0000 => "BadUnexpectedError",
            0x8002_0000 => "BadInternalError",
            0x8005_0000 => "BadCommunicationError",
            0x800A_0000 => "BadTimeout",
            0x800B_0000 => "BadServiceUnsupported",
            0x800C_0000 => "BadShutdown",
            0x800D_0000 => "BadServerNotConnected",
            0x800E_0000 => "BadServerHalted",
            0x8012_0000 => "BadCertificateInvalid",
            0x8013_0000 => "BadSecurityChecksFailed",
            0x801A_0000 => "BadCertificateUntrusted",
            0x801F_0000 => "BadUserAccessDenied",
            0x8020_0000 => "BadIdentityTokenInvalid",
            0x8021_0000 => "BadIdentityTokenRejected",
            0x8025_0000 => "BadSessionIdInvalid",
            0x8026_0000 => "BadSessionClosed",
            0x8027_0000 => "BadSessionNotActivated",
            0x8028_0000 => "BadSubscriptionIdInvalid",
            0x8033_0000 => "BadNodeIdInvalid",
            0x8034_0000 => "BadNodeIdUnknown",
            0x8035_0000 => "BadAttributeIdInvalid",
            0x803A_0000 => "BadNotReadable",
            0x803B_0000 => "BadNotWritable",
            0x803C_0000 => "BadOutOfRange",
            0x803D_0000 => "BadNotSupported",
            0x8074_0000 => "BadTypeMismatch",
            0x80AB_0000 => "BadInvalidArgument",
            0x80AE_0000 => "BadConnectionClosed",
            0x4090_0000 => "UncertainLastUsableValue",
            0x40A4_0000 => "UncertainSubNormal",
            _ if self.is_good() => "Good",
            _ if self.is_uncertain() => "Uncertain",
            _ => "Bad",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

// =============================================================================
// SecurityMode
// =============================================================================

/// Message security mode of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No security.
    #[default]
    None,

    /// Messages are signed.
    Sign,

    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl SecurityMode {
    /// Returns the OPC UA enumeration value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Sign => 2,
            Self::SignAndEncrypt => 3,
        }
    }

    /// Creates from the OPC UA enumeration value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::None),
            2 => Some(Self::Sign),
            3 => Some(Self::SignAndEncrypt),
            _ => Option::None,
        }
    }

    /// Returns `true` if this mode provides no security.
    #[inline]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityMode {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" | "nosecurity" => Ok(Self::None),
            "sign" | "signed" => Ok(Self::Sign),
            "signandencrypt" | "signencrypt" | "encrypted" => Ok(Self::SignAndEncrypt),
            _ => Err(OpcUaError::configuration(
                ConfigurationError::invalid_security_mode(s),
            )),
        }
    }
}

// =============================================================================
// SecurityPolicy
// =============================================================================

/// Security policy URI prefix shared by all standard policies.
pub const SECURITY_POLICY_URI_PREFIX: &str = "http://opcfoundation.org/UA/SecurityPolicy#";

/// OPC UA security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security policy.
    #[default]
    None,

    /// Basic128Rsa15 (deprecated).
    Basic128Rsa15,

    /// Basic256 (deprecated).
    Basic256,

    /// Basic256Sha256.
    Basic256Sha256,

    /// Aes128Sha256RsaOaep.
    Aes128Sha256RsaOaep,

    /// Aes256Sha256RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Returns the OPC UA policy URI.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic128Rsa15 => "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15",
            Self::Basic256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }

    /// Returns the short name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic128Rsa15 => "Basic128Rsa15",
            Self::Basic256 => "Basic256",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128Sha256RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256Sha256RsaPss",
        }
    }

    /// Returns `true` if this policy is deprecated.
    #[inline]
    pub const fn is_deprecated(&self) -> bool {
        matches!(self, Self::Basic128Rsa15 | Self::Basic256)
    }

    /// Returns `true` if this policy implies strong encryption.
    #[inline]
    pub const fn is_strong(&self) -> bool {
        matches!(
            self,
            Self::Basic256Sha256 | Self::Aes128Sha256RsaOaep | Self::Aes256Sha256RsaPss
        )
    }

    /// Creates from URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "" => Some(Self::None),
            s if s.ends_with("#None") => Some(Self::None),
            s if s.ends_with("#Basic128Rsa15") => Some(Self::Basic128Rsa15),
            s if s.ends_with("#Basic256") => Some(Self::Basic256),
            s if s.ends_with("#Basic256Sha256") => Some(Self::Basic256Sha256),
            s if s.contains("Aes128_Sha256_RsaOaep") => Some(Self::Aes128Sha256RsaOaep),
            s if s.contains("Aes256_Sha256_RsaPss") => Some(Self::Aes256Sha256RsaPss),
            _ => Option::None,
        }
    }

    /// Returns the short name encoded in a policy URI: the part after `#`.
    ///
    /// Empty URIs and URIs without a fragment yield `"None"`.
    pub fn short_name(uri: &str) -> &str {
        match uri.split_once('#') {
            Some((_, name)) if !name.is_empty() => name,
            _ => "None",
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityPolicy {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('#') {
            if let Some(policy) = Self::from_uri(s) {
                return Ok(policy);
            }
        }

        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(Self::None),
            "basic128rsa15" => Ok(Self::Basic128Rsa15),
            "basic256" => Ok(Self::Basic256),
            "basic256sha256" => Ok(Self::Basic256Sha256),
            "aes128sha256rsaoaep" => Ok(Self::Aes128Sha256RsaOaep),
            "aes256sha256rsapss" => Ok(Self::Aes256Sha256RsaPss),
            _ => Err(OpcUaError::configuration(
                ConfigurationError::invalid_security_policy(s),
            )),
        }
    }
}

// =============================================================================
// LoginMode / UserIdentity
// =============================================================================

/// How the user authenticates when opening a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoginMode {
    /// Anonymous login.
    #[default]
    Anonymous,

    /// Username and password.
    UserName,

    /// X.509 user certificate.
    Certificate,
}

impl LoginMode {
    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Anonymous => "Anonymous",
            Self::UserName => "UserName",
            Self::Certificate => "Certificate",
        }
    }
}

impl fmt::Display for LoginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Credentials supplied with a connect request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates new credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// The identity a session authenticates with. Exactly one is active.
#[derive(Clone, PartialEq, Eq)]
pub enum UserIdentity {
    /// Anonymous identity.
    Anonymous,

    /// Username and password identity.
    UserName {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },

    /// Certificate identity.
    Certificate,
}

impl UserIdentity {
    /// Returns the login mode this identity belongs to.
    pub fn login_mode(&self) -> LoginMode {
        match self {
            Self::Anonymous => LoginMode::Anonymous,
            Self::UserName { .. } => LoginMode::UserName,
            Self::Certificate => LoginMode::Certificate,
        }
    }

    /// Returns the username, if any.
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::UserName { username, .. } => Some(username),
            _ => None,
        }
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Certificate => write!(f, "Certificate"),
        }
    }
}

// =============================================================================
// ServerDescriptor
// =============================================================================

/// Identity of a reachable server.
///
/// Created by discovery or manual entry; the client updates `last_connected`
/// and `last_login_mode` on a successful connect and hands the result back
/// to the caller for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Connection URL (`opc.tcp://...`).
    pub url: String,
    /// Manufacturer name.
    pub manufacturer: String,
    /// Product name.
    pub product_name: String,
    /// Security mode used on the last successful connect.
    pub security_mode: String,
    /// Security policy short name used on the last successful connect.
    pub security_policy: String,
    /// Last successful connection time.
    pub last_connected: Option<DateTime<Utc>>,
    /// Preferred login mode.
    pub last_login_mode: LoginMode,
    /// Stored username, if the user chose to remember it.
    pub username: Option<String>,
    /// Whether the user marked this server as favorite.
    #[serde(default)]
    pub is_favorite: bool,
}

impl ServerDescriptor {
    /// Creates a descriptor for a manually entered URL.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            url: url.into(),
            manufacturer: "Unknown".to_string(),
            product_name: String::new(),
            security_mode: "Unknown".to_string(),
            security_policy: "Unknown".to_string(),
            last_connected: None,
            last_login_mode: LoginMode::Anonymous,
            username: None,
            is_favorite: false,
        }
    }
}

// =============================================================================
// EndpointDescriptor
// =============================================================================

/// One advertised combination of transport URL and security settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Endpoint URL.
    pub endpoint_url: String,
    /// Message security mode.
    pub security_mode: SecurityMode,
    /// Security policy URI.
    pub security_policy_uri: String,
    /// Relative security level; higher is stronger.
    pub security_level: u8,
    /// DER-encoded server certificate, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_certificate: Option<Vec<u8>>,
}

impl EndpointDescriptor {
    /// Creates an endpoint descriptor.
    pub fn new(
        endpoint_url: impl Into<String>,
        security_mode: SecurityMode,
        security_policy: SecurityPolicy,
        security_level: u8,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            security_mode,
            security_policy_uri: security_policy.uri().to_string(),
            security_level,
            server_certificate: None,
        }
    }

    /// Creates the minimal unsecured endpoint used when discovery fails.
    pub fn unsecured(endpoint_url: impl Into<String>) -> Self {
        Self::new(endpoint_url, SecurityMode::None, SecurityPolicy::None, 0)
    }

    /// Returns the parsed security policy, if it is a known one.
    pub fn security_policy(&self) -> Option<SecurityPolicy> {
        SecurityPolicy::from_uri(&self.security_policy_uri)
    }

    /// Returns the short policy name (`Basic256Sha256`, `None`, ...).
    pub fn security_policy_name(&self) -> &str {
        SecurityPolicy::short_name(&self.security_policy_uri)
    }

    /// Returns `true` if this endpoint uses no message security.
    pub fn is_unsecured(&self) -> bool {
        self.security_mode.is_none()
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}/{}, level {}]",
            self.endpoint_url,
            self.security_mode,
            self.security_policy_name(),
            self.security_level
        )
    }
}

// =============================================================================
// ApplicationDescription
// =============================================================================

/// A server application as reported by FindServers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApplicationDescription {
    /// Application name.
    pub application_name: String,
    /// Application URI.
    pub application_uri: String,
    /// Product URI.
    pub product_uri: String,
    /// Discovery URLs.
    pub discovery_urls: Vec<String>,
}

// =============================================================================
// NodeClass
// =============================================================================

/// OPC UA node class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Object node.
    #[default]
    Object,
    /// Variable node.
    Variable,
    /// Method node.
    Method,
    /// Object type node.
    ObjectType,
    /// Variable type node.
    VariableType,
    /// Reference type node.
    ReferenceType,
    /// Data type node.
    DataType,
    /// View node.
    View,
}

impl NodeClass {
    /// Returns the OPC UA bit mask value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Object => 1,
            Self::Variable => 2,
            Self::Method => 4,
            Self::ObjectType => 8,
            Self::VariableType => 16,
            Self::ReferenceType => 32,
            Self::DataType => 64,
            Self::View => 128,
        }
    }

    /// Creates from OPC UA value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Object),
            2 => Some(Self::Variable),
            4 => Some(Self::Method),
            8 => Some(Self::ObjectType),
            16 => Some(Self::VariableType),
            32 => Some(Self::ReferenceType),
            64 => Some(Self::DataType),
            128 => Some(Self::View),
            _ => None,
        }
    }

    /// Builds a node class mask from a set of classes.
    pub fn mask(classes: &[NodeClass]) -> u32 {
        classes.iter().fold(0, |mask, class| mask | class.value())
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Object => "Object",
            Self::Variable => "Variable",
            Self::Method => "Method",
            Self::ObjectType => "ObjectType",
            Self::VariableType => "VariableType",
            Self::ReferenceType => "ReferenceType",
            Self::DataType => "DataType",
            Self::View => "View",
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// BrowseDirection / AttributeId / AccessLevel
// =============================================================================

/// Direction of references to follow when browsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BrowseDirection {
    /// Forward references.
    #[default]
    Forward,
    /// Inverse references.
    Inverse,
    /// Both directions.
    Both,
}

/// Node attributes the client reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttributeId {
    /// NodeClass attribute.
    NodeClass,
    /// BrowseName attribute.
    BrowseName,
    /// DisplayName attribute.
    DisplayName,
    /// Value attribute.
    #[default]
    Value,
    /// DataType attribute.
    DataType,
    /// AccessLevel attribute.
    AccessLevel,
    /// UserAccessLevel attribute.
    UserAccessLevel,
}

impl AttributeId {
    /// Returns the OPC UA numeric value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::NodeClass => 2,
            Self::BrowseName => 3,
            Self::DisplayName => 4,
            Self::Value => 13,
            Self::DataType => 14,
            Self::AccessLevel => 17,
            Self::UserAccessLevel => 18,
        }
    }
}

/// Access level bit flags.
pub mod access_level {
    /// The current value is readable.
    pub const CURRENT_READ: u8 = 0x01;
    /// The current value is writable.
    pub const CURRENT_WRITE: u8 = 0x02;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parse_and_format() {
        let node: NodeId = "ns=2;i=1001".parse().unwrap();
        assert_eq!(node, NodeId::numeric(2, 1001));
        assert_eq!(node.to_string(), "ns=2;i=1001");

        let node: NodeId = "i=85".parse().unwrap();
        assert_eq!(node, NodeId::OBJECTS_FOLDER);
        assert_eq!(node.to_string(), "i=85");

        let node: NodeId = " ns=3;s=Line1.Motor;Speed ".parse().unwrap();
        assert_eq!(node.as_string(), Some("Line1.Motor;Speed"));

        let node: NodeId = "ns=1;b=SGVsbG8=".parse().unwrap();
        assert_eq!(node.identifier, NodeIdentifier::Opaque(b"Hello".to_vec()));
        assert_eq!(node.to_string(), "ns=1;b=SGVsbG8=");

        let node: NodeId = "ns=4;g=550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert!(matches!(node.identifier, NodeIdentifier::Guid(_)));
    }

    #[test]
    fn test_node_id_parse_errors() {
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=2".parse::<NodeId>().is_err());
        assert!("ns=2;i=abc".parse::<NodeId>().is_err());
        assert!("q=1".parse::<NodeId>().is_err());
        assert!("g=not-a-guid".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_null_node_id() {
        assert!(NodeId::null().is_null());
        assert!(NodeId::default().is_null());
        assert!(!NodeId::OBJECTS_FOLDER.is_null());
    }

    #[test]
    fn test_status_code_classification() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::GOOD.is_bad());
        assert!(StatusCode::UNCERTAIN_LAST_USABLE_VALUE.is_uncertain());
        assert!(StatusCode::BAD_TIMEOUT.is_bad());
        assert_eq!(StatusCode::BAD_CERTIFICATE_UNTRUSTED.name(), "BadCertificateUntrusted");
        assert_eq!(StatusCode(0x8099_0000).name(), "Bad");
        assert_eq!(StatusCode(0x4001_0000).name(), "Uncertain");
        assert_eq!(StatusCode(0x0000_0400).to_string(), "Good");
    }

    #[test]
    fn test_security_policy_uri_roundtrip() {
        for policy in [
            SecurityPolicy::None,
            SecurityPolicy::Basic128Rsa15,
            SecurityPolicy::Basic256,
            SecurityPolicy::Basic256Sha256,
            SecurityPolicy::Aes128Sha256RsaOaep,
            SecurityPolicy::Aes256Sha256RsaPss,
        ] {
            assert_eq!(SecurityPolicy::from_uri(policy.uri()), Some(policy));
        }
        assert!(SecurityPolicy::Basic256Sha256.is_strong());
        assert!(!SecurityPolicy::Basic256.is_strong());
    }

    #[test]
    fn test_security_policy_short_name() {
        assert_eq!(
            SecurityPolicy::short_name(SecurityPolicy::Basic256Sha256.uri()),
            "Basic256Sha256"
        );
        assert_eq!(SecurityPolicy::short_name(""), "None");
        assert_eq!(SecurityPolicy::short_name("urn:custom"), "None");
    }

    #[test]
    fn test_security_mode_parse() {
        assert_eq!(
            "sign-and-encrypt".parse::<SecurityMode>().unwrap(),
            SecurityMode::SignAndEncrypt
        );
        assert_eq!("None".parse::<SecurityMode>().unwrap(), SecurityMode::None);
        assert!("bogus".parse::<SecurityMode>().is_err());
        assert_eq!(SecurityMode::from_value(2), Some(SecurityMode::Sign));
    }

    #[test]
    fn test_identity_debug_hides_password() {
        let identity = UserIdentity::UserName {
            username: "operator".to_string(),
            password: "secret".to_string(),
        };
        let debug = format!("{:?}", identity);
        assert!(debug.contains("operator"));
        assert!(!debug.contains("secret"));
        assert_eq!(identity.login_mode(), LoginMode::UserName);

        let creds = Credentials::new("a", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_node_class_mask() {
        let mask = NodeClass::mask(&[NodeClass::Object, NodeClass::Variable, NodeClass::Method]);
        assert_eq!(mask, 7);
        assert_eq!(NodeClass::from_value(128), Some(NodeClass::View));
        assert_eq!(NodeClass::from_value(3), None);
    }

    #[test]
    fn test_endpoint_descriptor() {
        let endpoint = EndpointDescriptor::unsecured("opc.tcp://localhost:4840");
        assert!(endpoint.is_unsecured());
        assert_eq!(endpoint.security_level, 0);
        assert_eq!(endpoint.security_policy(), Some(SecurityPolicy::None));
        assert_eq!(endpoint.security_policy_name(), "None");
    }
}
