// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA inspection client core.
//!
//! This crate connects to OPC UA servers, browses their address space,
//! reads and writes typed values and keeps live subscriptions. The wire
//! protocol is delegated to an [`OpcUaTransport`]; the crate ships an
//! in-memory [`client::MockTransport`] and, with the `real-transport`
//! feature, a transport over the `opcua` crate.
//!
//! # Features
//!
//! - Deterministic endpoint selection per login mode, with an unsecured
//!   fallback when endpoint discovery fails
//! - Session state machine with keep-alive supervision
//! - Untrusted-certificate reporting and a file-system trust store
//! - Lazy address-space browsing with eager variable enrichment
//! - Value coercion to the node's declared data type for writes
//! - One subscription per session with bounded, discard-oldest
//!   notification queues
//! - Server discovery on well-known ports and through an LDS
//!
//! # Error Handling
//!
//! ```text
//! OpcUaError
//! ├── Discovery     - Endpoint and server discovery failures
//! ├── Security      - Untrusted certificates, identities, trust store
//! ├── Connection    - Session establishment and transport issues
//! ├── Session       - Session lifecycle errors
//! ├── Browse        - Node browsing failures
//! ├── Operation     - Read/write operation failures
//! ├── Subscription  - Subscription and monitoring errors
//! ├── Conversion    - Data type conversion errors
//! ├── Configuration - Invalid settings
//! └── Timeout       - Deadline exceeded
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ua_inspector::{ClientConfig, ClientEngine, LoginMode, ServerDescriptor};
//! use ua_inspector::client::MockTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine =
//!         ClientEngine::with_file_store(MockTransport::new(), ClientConfig::default()).await?;
//!     let server = ServerDescriptor::new("Demo", "opc.tcp://localhost:4840");
//!
//!     match engine.connect(&server, LoginMode::Anonymous, None).await {
//!         Err(e) if e.is_certificate_untrusted() => {
//!             // Ask the user, then:
//!             engine.trust_certificate(e.untrusted_certificate().unwrap()).await?;
//!             engine.connect(&server, LoginMode::Anonymous, None).await?;
//!         }
//!         other => { other?; }
//!     }
//!
//!     let result = engine.write_value(&"ns=2;s=Setpoint".parse()?, "42").await;
//!     println!("write ok: {}", result.success);
//!
//!     engine.disconnect().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod browse;
pub mod certificate;
pub mod client;
pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{
    BrowseError, ConfigurationError, ConnectionError, ConversionError, DiscoveryError, ErrorCode,
    ErrorSeverity, OpcUaError, OpcUaResult, OperationError, SecurityError, SessionError,
    SubscriptionError, TimeoutError,
};

pub use types::{
    access_level, ApplicationDescription, AttributeId, BrowseDirection, Credentials,
    EndpointDescriptor, LoginMode, NodeClass, NodeId, NodeIdentifier, SecurityMode,
    SecurityPolicy, ServerDescriptor, StatusCode, UserIdentity,
};

pub use config::{
    validate_server_url, ClientConfig, ClientConfigBuilder, MonitoredItemSettings,
    SubscriptionSettings,
};

// Re-export client types
pub use client::{
    coerce, data_type_name, quality_text, ConnectionEvent, ConnectionState, DataChangeCallback,
    DataValue, OpcUaTransport, OpcUaValue, Quality, SessionManager, SessionStats,
    SubscriptionEngine, SubscriptionStats,
};

// Re-export real transport when feature is enabled
#[cfg(feature = "real-transport")]
pub use client::OpcUaStackTransport;

pub use browse::{AddressSpaceBrowser, NodeInfo, NodeValue};
pub use certificate::{Certificate, CertificateStore, FileSystemStore, MemoryStore, TrustDecision};
pub use discovery::DiscoveryService;
pub use endpoint::{select_endpoint, EndpointResolver, ResolvedEndpoint};
pub use engine::{ClientEngine, WriteResult};
pub use logging::{init_logging, LogFormat};
