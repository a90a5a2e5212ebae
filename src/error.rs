// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the inspection client.
//!
//! Every public operation of the client translates protocol-layer failures
//! into this hierarchy before returning, so callers never see raw transport
//! errors.
//!
//! # Error Categories
//!
//! ```text
//! OpcUaError
//! ├── Discovery     - Endpoint enumeration and server probing
//! ├── Security      - Untrusted certificates, authentication, trust store
//! ├── Connection    - Reaching the server, connect guard, not connected
//! ├── Session       - Session establishment and keep-alive faults
//! ├── Browse        - Address-space traversal
//! ├── Operation     - Read/write of node values
//! ├── Subscription  - Subscription and monitored item lifecycle
//! ├── Conversion    - Value coercion
//! ├── Configuration - Invalid settings, node ids, URLs
//! └── Timeout       - Bounded waits that elapsed
//! ```
//!
//! # Examples
//!
//! ```
//! use ua_inspector::error::{ConnectionError, OpcUaError};
//!
//! let error = OpcUaError::connection(ConnectionError::refused(
//!     "opc.tcp://localhost:4840",
//!     "connection reset",
//! ));
//!
//! assert!(error.is_retryable());
//! assert_eq!(error.category(), "connection");
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::certificate::Certificate;

// =============================================================================
// OpcUaError - Main Error Type
// =============================================================================

/// The main error type for client operations.
#[derive(Debug, Error)]
pub enum OpcUaError {
    /// Endpoint discovery errors.
    #[error("{0}")]
    Discovery(#[from] DiscoveryError),

    /// Security and trust errors.
    #[error("{0}")]
    Security(#[from] SecurityError),

    /// Connection-related errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Node browsing errors.
    #[error("{0}")]
    Browse(#[from] BrowseError),

    /// Read/write operation errors.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// Subscription and monitoring errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Value conversion errors.
    #[error("{0}")]
    Conversion(#[from] ConversionError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Timeout errors.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

impl OpcUaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a discovery error.
    #[inline]
    pub fn discovery(error: DiscoveryError) -> Self {
        Self::Discovery(error)
    }

    /// Creates a security error.
    #[inline]
    pub fn security(error: SecurityError) -> Self {
        Self::Security(error)
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(error: ConnectionError) -> Self {
        Self::Connection(error)
    }

    /// Creates a session error.
    #[inline]
    pub fn session(error: SessionError) -> Self {
        Self::Session(error)
    }

    /// Creates a browse error.
    #[inline]
    pub fn browse(error: BrowseError) -> Self {
        Self::Browse(error)
    }

    /// Creates an operation error.
    #[inline]
    pub fn operation(error: OperationError) -> Self {
        Self::Operation(error)
    }

    /// Creates a subscription error.
    #[inline]
    pub fn subscription(error: SubscriptionError) -> Self {
        Self::Subscription(error)
    }

    /// Creates a conversion error.
    #[inline]
    pub fn conversion(error: ConversionError) -> Self {
        Self::Conversion(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(error: TimeoutError) -> Self {
        Self::Timeout(error)
    }

    // =========================================================================
    // Convenience Factory Methods
    // =========================================================================

    /// Creates a not connected error.
    pub fn not_connected() -> Self {
        Self::Connection(ConnectionError::NotConnected)
    }

    /// Creates a certificate untrusted error carrying the offending certificate.
    pub fn certificate_untrusted(certificate: Certificate) -> Self {
        Self::Security(SecurityError::certificate_untrusted(certificate))
    }

    /// Creates a read failed error.
    pub fn read_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation(OperationError::read_failed(node_id, message))
    }

    /// Creates a write failed error.
    pub fn write_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation(OperationError::write_failed(node_id, message))
    }

    /// Creates a browse failed error.
    pub fn browse_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Browse(BrowseError::browse_failed(node_id, message))
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if the server rejected our trust of its certificate.
    ///
    /// Callers use this to offer a trust decision and retry the connect.
    pub fn is_certificate_untrusted(&self) -> bool {
        matches!(
            self,
            Self::Security(SecurityError::CertificateUntrusted { .. })
        )
    }

    /// Returns the untrusted certificate, if this is a certificate-untrusted error.
    pub fn untrusted_certificate(&self) -> Option<&Certificate> {
        match self {
            Self::Security(SecurityError::CertificateUntrusted { certificate }) => {
                Some(certificate)
            }
            _ => None,
        }
    }

    /// Returns `true` if the caller is reported "not connected".
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::Connection(ConnectionError::NotConnected))
    }

    /// Returns `true` if this error is retryable.
    ///
    /// Nothing in the client retries automatically; this is guidance for
    /// the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Discovery(e) => e.is_retryable(),
            Self::Security(e) => e.is_retryable(),
            Self::Connection(e) => e.is_retryable(),
            Self::Session(e) => e.is_retryable(),
            Self::Browse(_) => true,
            Self::Operation(e) => e.is_retryable(),
            Self::Subscription(_) => true,
            Self::Timeout(_) => true,
            Self::Conversion(_) | Self::Configuration(_) => false,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Discovery(_) => ErrorSeverity::Warning,
            Self::Security(e) => e.severity(),
            Self::Connection(e) => e.severity(),
            Self::Session(_) => ErrorSeverity::Error,
            Self::Browse(_) => ErrorSeverity::Warning,
            Self::Operation(_) => ErrorSeverity::Warning,
            Self::Subscription(_) => ErrorSeverity::Error,
            Self::Timeout(_) => ErrorSeverity::Warning,
            Self::Conversion(_) => ErrorSeverity::Info,
            Self::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery",
            Self::Security(_) => "security",
            Self::Connection(_) => "connection",
            Self::Session(_) => "session",
            Self::Browse(_) => "browse",
            Self::Operation(_) => "operation",
            Self::Subscription(_) => "subscription",
            Self::Conversion(_) => "conversion",
            Self::Configuration(_) => "configuration",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Discovery(e) => e.error_code(),
            Self::Security(e) => e.error_code(),
            Self::Connection(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Browse(e) => e.error_code(),
            Self::Operation(e) => e.error_code(),
            Self::Subscription(e) => e.error_code(),
            Self::Conversion(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
            Self::Timeout(e) => e.error_code(),
        }
    }

    /// Returns recovery hints for this error.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Discovery(_) => vec![
                "Check that the server URL and port are correct",
                "The client falls back to an unsecured endpoint at the requested URL",
            ],
            Self::Security(e) => e.recovery_hints(),
            Self::Connection(e) => e.recovery_hints(),
            Self::Session(_) => vec![
                "Reconnect to open a new session",
                "Check the server's session limits",
            ],
            Self::Browse(_) => vec!["Verify the node id exists", "Browse the parent node again"],
            Self::Operation(e) => e.recovery_hints(),
            Self::Subscription(_) => vec![
                "Create the subscription again",
                "Reduce the number of monitored items",
            ],
            Self::Conversion(_) => vec!["Check the value against the node's data type"],
            Self::Configuration(_) => vec!["Fix the configuration value and restart"],
            Self::Timeout(_) => vec![
                "Increase the configured timeout",
                "Check network latency to the server",
            ],
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let level = self.tracing_level();
        let code = self.error_code();

        match level {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

// =============================================================================
// DiscoveryError
// =============================================================================

/// Endpoint discovery errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery endpoint could not be queried.
    #[error("Endpoint discovery failed for '{url}': {message}")]
    EndpointsUnavailable {
        /// Discovery URL.
        url: String,
        /// Error message.
        message: String,
    },

    /// The server answered with no endpoints.
    #[error("Server at '{url}' advertised no endpoints")]
    NoEndpoints {
        /// Discovery URL.
        url: String,
    },

    /// Finding servers on a discovery URL failed.
    #[error("Server discovery failed for '{url}': {message}")]
    FindServersFailed {
        /// Discovery URL.
        url: String,
        /// Error message.
        message: String,
    },
}

impl DiscoveryError {
    /// Creates an endpoints unavailable error.
    pub fn endpoints_unavailable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EndpointsUnavailable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a no endpoints error.
    pub fn no_endpoints(url: impl Into<String>) -> Self {
        Self::NoEndpoints { url: url.into() }
    }

    /// Creates a find servers failed error.
    pub fn find_servers_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FindServersFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoEndpoints { .. })
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::EndpointsUnavailable { .. } => 1,
            Self::NoEndpoints { .. } => 2,
            Self::FindServersFailed { .. } => 3,
        };
        ErrorCode::new(1, code)
    }
}

// =============================================================================
// SecurityError
// =============================================================================

/// Security, authentication and trust-store errors.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// The server certificate is not trusted by this client.
    #[error("Server certificate is not trusted: {}", .certificate.thumbprint())]
    CertificateUntrusted {
        /// The offending certificate.
        certificate: Certificate,
    },

    /// Authentication with the provided identity failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Error message.
        message: String,
    },

    /// The requested identity type is not available.
    #[error("Identity type '{identity}' is not supported")]
    IdentityNotSupported {
        /// Identity type name.
        identity: String,
    },

    /// Certificate store I/O failed.
    #[error("Certificate store error at '{path}': {message}")]
    Store {
        /// Path involved.
        path: String,
        /// Error message.
        message: String,
    },
}

impl SecurityError {
    /// Creates a certificate untrusted error.
    pub fn certificate_untrusted(certificate: Certificate) -> Self {
        Self::CertificateUntrusted { certificate }
    }

    /// Creates an authentication failed error.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Creates an identity not supported error.
    pub fn identity_not_supported(identity: impl Into<String>) -> Self {
        Self::IdentityNotSupported {
            identity: identity.into(),
        }
    }

    /// Creates a store error.
    pub fn store(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    ///
    /// An untrusted certificate is retryable once the user trusts it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CertificateUntrusted { .. } | Self::Store { .. })
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CertificateUntrusted { .. } => ErrorSeverity::Warning,
            Self::Store { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::CertificateUntrusted { .. } => 1,
            Self::AuthenticationFailed { .. } => 2,
            Self::IdentityNotSupported { .. } => 3,
            Self::Store { .. } => 4,
        };
        ErrorCode::new(2, code)
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::CertificateUntrusted { .. } => vec![
                "Review the server certificate and trust it",
                "Connect again after trusting the certificate",
            ],
            Self::AuthenticationFailed { .. } => vec![
                "Verify the username and password",
                "Check that the user exists on the server",
            ],
            Self::IdentityNotSupported { .. } => {
                vec!["Use anonymous or username/password login"]
            }
            Self::Store { .. } => vec![
                "Check permissions on the PKI directory",
                "Verify the disk is not full",
            ],
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The server refused or dropped the connection attempt.
    #[error("Connection to '{endpoint}' failed: {message}")]
    Refused {
        /// Target endpoint.
        endpoint: String,
        /// Error message.
        message: String,
    },

    /// The endpoint URL is malformed.
    #[error("Invalid endpoint URL: '{url}' - {reason}")]
    InvalidEndpoint {
        /// The invalid URL.
        url: String,
        /// Reason.
        reason: String,
    },

    /// Another connect is already running on this client.
    #[error("A connection attempt is already in progress")]
    InProgress,

    /// Connection closed unexpectedly.
    #[error("Connection closed: {}", .reason.as_deref().unwrap_or("unknown reason"))]
    Closed {
        /// Reason for closure.
        reason: Option<String>,
    },

    /// Not connected.
    #[error("Not connected to OPC UA server")]
    NotConnected,
}

impl ConnectionError {
    /// Creates a connection refused error.
    pub fn refused(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a connection closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: Some(reason.into()),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidEndpoint { .. })
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotConnected | Self::InProgress => ErrorSeverity::Info,
            Self::InvalidEndpoint { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Refused { .. } => 1,
            Self::InvalidEndpoint { .. } => 2,
            Self::InProgress => 3,
            Self::Closed { .. } => 4,
            Self::NotConnected => 5,
        };
        ErrorCode::new(3, code)
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Refused { .. } | Self::Closed { .. } => vec![
                "Check that the OPC UA server is running",
                "Verify network connectivity and firewall rules",
            ],
            Self::InvalidEndpoint { .. } => {
                vec!["Use the format opc.tcp://host:port[/path]"]
            }
            Self::InProgress => vec!["Wait for the running connect to finish"],
            Self::NotConnected => vec!["Connect to a server first"],
        }
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session creation or activation failed.
    #[error("Session creation failed: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
    },

    /// Keep-alive reported a non-good status.
    #[error("Session faulted: keep-alive returned {status}")]
    Faulted {
        /// Status name.
        status: String,
    },

    /// Closing the session on the server failed.
    #[error("Session close failed: {message}")]
    CloseFailed {
        /// Error message.
        message: String,
    },
}

impl SessionError {
    /// Creates a session creation failed error.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creates a faulted error.
    pub fn faulted(status: impl Into<String>) -> Self {
        Self::Faulted {
            status: status.into(),
        }
    }

    /// Creates a close failed error.
    pub fn close_failed(message: impl Into<String>) -> Self {
        Self::CloseFailed {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        true
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::CreationFailed { .. } => 1,
            Self::Faulted { .. } => 2,
            Self::CloseFailed { .. } => 3,
        };
        ErrorCode::new(4, code)
    }
}

// =============================================================================
// BrowseError
// =============================================================================

/// Node browsing errors.
#[derive(Debug, Error)]
pub enum BrowseError {
    /// Browse call failed.
    #[error("Browse failed for node '{node_id}': {message}")]
    BrowseFailed {
        /// Node ID.
        node_id: String,
        /// Error message.
        message: String,
    },
}

impl BrowseError {
    /// Creates a browse failed error.
    pub fn browse_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BrowseFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::BrowseFailed { .. } => 1,
        };
        ErrorCode::new(5, code)
    }
}

// =============================================================================
// OperationError
// =============================================================================

/// Read/write operation errors.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Read operation failed.
    #[error("Read failed for node '{node_id}': {message}")]
    ReadFailed {
        /// Node ID.
        node_id: String,
        /// Error message.
        message: String,
        /// Status code, if the server returned one.
        status_code: Option<u32>,
    },

    /// Write operation failed.
    #[error("Write failed for node '{node_id}': {message}")]
    WriteFailed {
        /// Node ID.
        node_id: String,
        /// Error message.
        message: String,
        /// Status code, if the server returned one.
        status_code: Option<u32>,
        /// Server-side diagnostic text.
        diagnostic: Option<String>,
    },
}

impl OperationError {
    /// Creates a read failed error.
    pub fn read_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ReadFailed {
            node_id: node_id.into(),
            message: message.into(),
            status_code: None,
        }
    }

    /// Creates a read failed error from a status code.
    pub fn read_status(node_id: impl Into<String>, status_code: u32) -> Self {
        Self::ReadFailed {
            node_id: node_id.into(),
            message: crate::types::StatusCode(status_code).name().to_string(),
            status_code: Some(status_code),
        }
    }

    /// Creates a write failed error.
    pub fn write_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteFailed {
            node_id: node_id.into(),
            message: message.into(),
            status_code: None,
            diagnostic: None,
        }
    }

    /// Creates a write failed error from a status code and optional diagnostic.
    pub fn write_status(
        node_id: impl Into<String>,
        status_code: u32,
        diagnostic: Option<String>,
    ) -> Self {
        Self::WriteFailed {
            node_id: node_id.into(),
            message: crate::types::StatusCode(status_code).name().to_string(),
            status_code: Some(status_code),
            diagnostic,
        }
    }

    /// Returns the status code, if any.
    pub fn status_code(&self) -> Option<u32> {
        match self {
            Self::ReadFailed { status_code, .. } | Self::WriteFailed { status_code, .. } => {
                *status_code
            }
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.status_code().is_none()
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::ReadFailed { .. } => 1,
            Self::WriteFailed { .. } => 2,
        };
        ErrorCode::new(6, code)
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::ReadFailed { .. } => vec!["Check the node's access level"],
            Self::WriteFailed { .. } => vec![
                "Check that the node is writable",
                "Verify the value matches the node's data type",
            ],
        }
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitored item errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Subscription creation failed.
    #[error("Subscription creation failed: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
    },

    /// Subscription deletion failed.
    #[error("Subscription {subscription_id} deletion failed: {message}")]
    DeletionFailed {
        /// Subscription ID.
        subscription_id: u32,
        /// Error message.
        message: String,
    },

    /// No subscription exists on the session.
    #[error("No active subscription")]
    NoSubscription,

    /// Monitored item creation failed.
    #[error("Monitored item for node '{node_id}' failed: {message}")]
    MonitoredItemFailed {
        /// Node ID.
        node_id: String,
        /// Error message.
        message: String,
    },

    /// Invalid subscription settings.
    #[error("Invalid subscription settings: {message}")]
    InvalidSettings {
        /// Error message.
        message: String,
    },
}

impl SubscriptionError {
    /// Creates a creation failed error.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creates a deletion failed error.
    pub fn deletion_failed(subscription_id: u32, message: impl Into<String>) -> Self {
        Self::DeletionFailed {
            subscription_id,
            message: message.into(),
        }
    }

    /// Creates a monitored item failed error.
    pub fn monitored_item_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MonitoredItemFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid settings error.
    pub fn invalid_settings(message: impl Into<String>) -> Self {
        Self::InvalidSettings {
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::CreationFailed { .. } => 1,
            Self::DeletionFailed { .. } => 2,
            Self::NoSubscription => 3,
            Self::MonitoredItemFailed { .. } => 4,
            Self::InvalidSettings { .. } => 5,
        };
        ErrorCode::new(7, code)
    }
}

// =============================================================================
// ConversionError
// =============================================================================

/// Value conversion errors.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Value does not have the expected type.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type.
        expected: String,
        /// Actual type.
        actual: String,
    },

    /// Text could not be parsed into the target type.
    #[error("Cannot parse '{value}' as {target_type}")]
    ParseFailed {
        /// Input text.
        value: String,
        /// Target type name.
        target_type: String,
    },
}

impl ConversionError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a parse failed error.
    pub fn parse_failed(value: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self::ParseFailed {
            value: value.into(),
            target_type: target_type.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::TypeMismatch { .. } => 1,
            Self::ParseFailed { .. } => 2,
        };
        ErrorCode::new(8, code)
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A field has an invalid value.
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Reason.
        reason: String,
    },

    /// Invalid node id text.
    #[error("Invalid node id '{input}': {reason}")]
    InvalidNodeId {
        /// The input text.
        input: String,
        /// Reason.
        reason: String,
    },

    /// Invalid server URL.
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl {
        /// The URL.
        url: String,
        /// Reason.
        reason: String,
    },

    /// Unknown security mode name.
    #[error("Invalid security mode: '{value}'")]
    InvalidSecurityMode {
        /// The input value.
        value: String,
    },

    /// Unknown security policy name.
    #[error("Invalid security policy: '{value}'")]
    InvalidSecurityPolicy {
        /// The input value.
        value: String,
    },

    /// Loading a configuration file failed.
    #[error("Failed to load configuration from '{path}': {message}")]
    Load {
        /// File path.
        path: String,
        /// Error message.
        message: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid node id error.
    pub fn invalid_node_id(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid security mode error.
    pub fn invalid_security_mode(value: impl Into<String>) -> Self {
        Self::InvalidSecurityMode {
            value: value.into(),
        }
    }

    /// Creates an invalid security policy error.
    pub fn invalid_security_policy(value: impl Into<String>) -> Self {
        Self::InvalidSecurityPolicy {
            value: value.into(),
        }
    }

    /// Creates a load error.
    pub fn load(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::InvalidValue { .. } => 1,
            Self::InvalidNodeId { .. } => 2,
            Self::InvalidUrl { .. } => 3,
            Self::InvalidSecurityMode { .. } => 4,
            Self::InvalidSecurityPolicy { .. } => 5,
            Self::Load { .. } => 6,
        };
        ErrorCode::new(9, code)
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Timeout errors.
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// Connecting to the server timed out.
    #[error("Connection to '{endpoint}' timed out after {duration:?}")]
    Connect {
        /// Target endpoint.
        endpoint: String,
        /// Timeout duration.
        duration: Duration,
    },

    /// A service call timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Operation {
        /// Operation name.
        operation: String,
        /// Timeout duration.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Creates a connect timeout error.
    pub fn connect(endpoint: impl Into<String>, duration: Duration) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            duration,
        }
    }

    /// Creates an operation timeout error.
    pub fn operation(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Operation {
            operation: operation.into(),
            duration,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Connect { .. } => 1,
            Self::Operation { .. } => 2,
        };
        ErrorCode::new(10, code)
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code.
///
/// Format: `UA-XXYY` where XX is the category and YY the specific error.
///
/// Categories: 1 discovery, 2 security, 3 connection, 4 session, 5 browse,
/// 6 operation, 7 subscription, 8 conversion, 9 configuration, 10 timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with OpcUaError.
pub type OpcUaResult<T> = Result<T, OpcUaError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_untrusted_is_distinct() {
        let cert = Certificate::new(vec![1, 2, 3, 4]).with_subject("CN=Test Server");
        let error = OpcUaError::certificate_untrusted(cert);

        assert!(error.is_certificate_untrusted());
        assert!(error.is_retryable());
        assert_eq!(error.category(), "security");
        assert_eq!(
            error.untrusted_certificate().and_then(|c| c.subject()),
            Some("CN=Test Server")
        );

        let generic = OpcUaError::connection(ConnectionError::refused(
            "opc.tcp://localhost:4840",
            "reset",
        ));
        assert!(!generic.is_certificate_untrusted());
        assert!(generic.untrusted_certificate().is_none());
    }

    #[test]
    fn test_connection_error_retryable() {
        assert!(ConnectionError::refused("opc.tcp://localhost:4840", "x").is_retryable());
        assert!(ConnectionError::NotConnected.is_retryable());
        assert!(!ConnectionError::invalid_endpoint("bad-url", "invalid format").is_retryable());
    }

    #[test]
    fn test_write_status_carries_diagnostic() {
        let error = OperationError::write_status(
            "ns=2;s=Tag",
            0x8074_0000,
            Some("Value type mismatch".to_string()),
        );
        match &error {
            OperationError::WriteFailed {
                message,
                diagnostic,
                status_code,
                ..
            } => {
                assert_eq!(message, "BadTypeMismatch");
                assert_eq!(diagnostic.as_deref(), Some("Value type mismatch"));
                assert_eq!(*status_code, Some(0x8074_0000));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_error_code_format() {
        let error = OpcUaError::not_connected();
        assert_eq!(error.error_code().to_string(), "UA-0305");
        assert!(error.is_not_connected());

        let code = ErrorCode::new(10, 2);
        assert_eq!(code.to_string(), "UA-0A02");
        assert_eq!(code.as_u16(), 0x0A02);
    }

    #[test]
    fn test_codes_of_raised_variants() {
        let browse = OpcUaError::browse(BrowseError::browse_failed("i=85", "BadNodeIdUnknown"));
        assert_eq!(browse.error_code().to_string(), "UA-0501");
        assert_eq!(browse.category(), "browse");

        let in_progress = OpcUaError::connection(ConnectionError::InProgress);
        assert_eq!(in_progress.error_code().to_string(), "UA-0303");
        assert_eq!(in_progress.severity(), ErrorSeverity::Info);

        let elapsed = OpcUaError::timeout(TimeoutError::operation("read", Duration::from_secs(1)));
        assert_eq!(elapsed.error_code().to_string(), "UA-0A02");
        assert!(elapsed.to_string().contains("read"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Warning > ErrorSeverity::Info);
        assert_eq!(ErrorSeverity::Warning.to_tracing_level(), Level::WARN);
    }

    #[test]
    fn test_recovery_hints_present() {
        let error = OpcUaError::subscription(SubscriptionError::NoSubscription);
        assert!(!error.recovery_hints().is_empty());

        let error = OpcUaError::configuration(ConfigurationError::invalid_url(
            "http://x",
            "bad scheme",
        ));
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert!(!error.is_retryable());
    }
}
