// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol-library boundary.
//!
//! [`OpcUaTransport`] is the only place the client touches the wire protocol.
//! Everything above it (session supervision, browsing, subscriptions) is
//! written against this trait so it can run against the `opcua` crate or an
//! in-memory mock.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::SubscriptionSettings;
use crate::error::OpcUaResult;
use crate::types::{
    ApplicationDescription, AttributeId, BrowseDirection, EndpointDescriptor, NodeClass, NodeId,
    StatusCode, UserIdentity,
};

// =============================================================================
// OpcUaValue
// =============================================================================

/// Scalar or array value carried by a node attribute.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OpcUaValue {
    /// Boolean value.
    Boolean(bool),

    /// Signed byte.
    SByte(i8),

    /// Unsigned byte.
    Byte(u8),

    /// 16-bit signed integer.
    Int16(i16),

    /// 16-bit unsigned integer.
    UInt16(u16),

    /// 32-bit signed integer.
    Int32(i32),

    /// 32-bit unsigned integer.
    UInt32(u32),

    /// 64-bit signed integer.
    Int64(i64),

    /// 64-bit unsigned integer.
    UInt64(u64),

    /// 32-bit float.
    Float(f32),

    /// 64-bit double.
    Double(f64),

    /// String value.
    String(String),

    /// Date/time value.
    DateTime(DateTime<Utc>),

    /// GUID value.
    Guid(uuid::Uuid),

    /// Byte string.
    ByteString(Vec<u8>),

    /// Node id value (DataType attribute).
    NodeId(NodeId),

    /// Array of values.
    Array(Vec<OpcUaValue>),

    /// Null value.
    #[default]
    Null,
}

impl OpcUaValue {
    /// Returns the canonical type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "Boolean",
            Self::SByte(_) => "SByte",
            Self::Byte(_) => "Byte",
            Self::Int16(_) => "Int16",
            Self::UInt16(_) => "UInt16",
            Self::Int32(_) => "Int32",
            Self::UInt32(_) => "UInt32",
            Self::Int64(_) => "Int64",
            Self::UInt64(_) => "UInt64",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::Guid(_) => "Guid",
            Self::ByteString(_) => "ByteString",
            Self::NodeId(_) => "NodeId",
            Self::Array(_) => "Array",
            Self::Null => "Null",
        }
    }

    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attempts to get the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to get the value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SByte(v) => Some(*v as i64),
            Self::Byte(v) => Some(*v as i64),
            Self::Int16(v) => Some(*v as i64),
            Self::UInt16(v) => Some(*v as i64),
            Self::Int32(v) => Some(*v as i64),
            Self::UInt32(v) => Some(*v as i64),
            Self::Int64(v) => Some(*v),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Attempts to get the value as an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Attempts to get the value as a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Attempts to get the value as a node id.
    pub fn as_node_id(&self) -> Option<&NodeId> {
        match self {
            Self::NodeId(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for OpcUaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::SByte(v) => write!(f, "{}", v),
            Self::Byte(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Guid(v) => write!(f, "{}", v),
            Self::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Self::NodeId(v) => write!(f, "{}", v),
            Self::Array(v) => write!(f, "[{} items]", v.len()),
            Self::Null => write!(f, "null"),
        }
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// A value with its status and timestamps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// The value; `Null` when the server returned none.
    pub value: OpcUaValue,

    /// Status of the value.
    pub status: StatusCode,

    /// Timestamp assigned by the data source.
    pub source_timestamp: Option<DateTime<Utc>>,

    /// Timestamp assigned by the server.
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a good value stamped now.
    pub fn good(value: OpcUaValue) -> Self {
        let now = Utc::now();
        Self {
            value,
            status: StatusCode::GOOD,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }

    /// Creates a value-less result carrying a bad status.
    pub fn bad(status: StatusCode) -> Self {
        Self {
            value: OpcUaValue::Null,
            status,
            source_timestamp: None,
            server_timestamp: Some(Utc::now()),
        }
    }

    /// Returns the source timestamp, falling back to the server timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.source_timestamp.or(self.server_timestamp)
    }

    /// Returns `true` if the status is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.status.is_good()
    }
}

// =============================================================================
// WriteOutcome
// =============================================================================

/// Server response to a single-node write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    /// Status returned for the write.
    pub status: StatusCode,

    /// Diagnostic text supplied by the server, if any.
    pub diagnostic: Option<String>,
}

impl WriteOutcome {
    /// A successful write.
    pub fn good() -> Self {
        Self::default()
    }

    /// A rejected write.
    pub fn bad(status: StatusCode, diagnostic: Option<String>) -> Self {
        Self { status, diagnostic }
    }
}

// =============================================================================
// Browse
// =============================================================================

/// Hierarchical-references reference type (ns=0, i=33).
pub const HIERARCHICAL_REFERENCES: NodeId = NodeId {
    namespace_index: 0,
    identifier: crate::types::NodeIdentifier::Numeric(33),
};

/// Browse request filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseFilter {
    /// Reference direction to follow.
    pub direction: BrowseDirection,
    /// Reference type to follow.
    pub reference_type: NodeId,
    /// Whether subtypes of `reference_type` are followed.
    pub include_subtypes: bool,
    /// Node class bit mask; 0 means all classes.
    pub node_class_mask: u32,
}

impl BrowseFilter {
    /// Forward hierarchical references to objects, variables and methods.
    pub fn hierarchical() -> Self {
        Self {
            direction: BrowseDirection::Forward,
            reference_type: HIERARCHICAL_REFERENCES,
            include_subtypes: true,
            node_class_mask: NodeClass::mask(&[
                NodeClass::Object,
                NodeClass::Variable,
                NodeClass::Method,
            ]),
        }
    }

    /// Returns `true` if the mask admits the node class.
    pub fn admits(&self, class: NodeClass) -> bool {
        self.node_class_mask == 0 || self.node_class_mask & class.value() != 0
    }
}

impl Default for BrowseFilter {
    fn default() -> Self {
        Self::hierarchical()
    }
}

/// One reference returned by a browse call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDescription {
    /// Target node.
    pub node_id: NodeId,
    /// Browse name.
    pub browse_name: String,
    /// Display name.
    pub display_name: String,
    /// Node class of the target.
    pub node_class: NodeClass,
    /// Reference type followed.
    pub reference_type: Option<NodeId>,
    /// Type definition of the target.
    pub type_definition: Option<NodeId>,
}

// =============================================================================
// Session request
// =============================================================================

/// Everything the transport needs to open a session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Endpoint to connect to.
    pub endpoint: EndpointDescriptor,
    /// User identity.
    pub identity: UserIdentity,
    /// Requested session timeout.
    pub session_timeout: Duration,
    /// Application name.
    pub application_name: String,
    /// Application URI.
    pub application_uri: String,
    /// Product URI.
    pub product_uri: String,
    /// PKI directory shared with the trust store.
    pub pki_dir: PathBuf,
    /// Session name.
    pub session_name: String,
}

// =============================================================================
// Monitored items
// =============================================================================

/// Request to create one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemRequest {
    /// Node to monitor.
    pub node_id: NodeId,
    /// Attribute to monitor.
    pub attribute: AttributeId,
    /// Client handle used to route notifications.
    pub client_handle: u32,
    /// Sampling interval.
    pub sampling_interval: Duration,
    /// Server-side queue size.
    pub queue_size: u32,
    /// Discard oldest on overflow.
    pub discard_oldest: bool,
}

/// Result of creating one monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredItemResult {
    /// Client handle from the request.
    pub client_handle: u32,
    /// Server-assigned id.
    pub monitored_item_id: u32,
    /// Creation status.
    pub status: StatusCode,
}

/// A data change for one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChangeNotification {
    /// Client handle of the monitored item.
    pub client_handle: u32,
    /// New value.
    pub value: DataValue,
}

/// Where the transport pushes data changes.
///
/// `deliver` is called on the transport's own thread; it never blocks.
#[derive(Clone)]
pub struct NotificationSink {
    deliver: Arc<dyn Fn(DataChangeNotification) + Send + Sync>,
}

impl NotificationSink {
    /// Creates a sink from a delivery function.
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(DataChangeNotification) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Creates a sink that drops every notification.
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    /// Delivers one notification.
    #[inline]
    pub fn deliver(&self, notification: DataChangeNotification) {
        (self.deliver)(notification)
    }
}

impl fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationSink").finish_non_exhaustive()
    }
}

// =============================================================================
// OpcUaTransport Trait
// =============================================================================

/// Protocol operations the client needs from an OPC UA stack.
///
/// Implementations are owned by the engine behind an `Arc<Mutex<_>>`, so
/// calls never overlap.
#[async_trait]
pub trait OpcUaTransport: Send + Sync {
    // =========================================================================
    // Discovery
    // =========================================================================

    /// Queries the endpoints a server advertises.
    async fn get_endpoints(&self, url: &str) -> OpcUaResult<Vec<EndpointDescriptor>>;

    /// Queries a discovery server for registered applications.
    async fn find_servers(&self, discovery_url: &str) -> OpcUaResult<Vec<ApplicationDescription>>;

    // =========================================================================
    // Session
    // =========================================================================

    /// Opens and activates a session.
    ///
    /// # Errors
    ///
    /// A server certificate the local trust list does not accept must be
    /// reported as `SecurityError::CertificateUntrusted`.
    async fn open_session(&mut self, request: &SessionRequest) -> OpcUaResult<()>;

    /// Closes the session. Local resources are released even on error.
    async fn close_session(&mut self) -> OpcUaResult<()>;

    /// Returns `true` while a session is open.
    fn is_connected(&self) -> bool;

    /// Performs one liveness probe and returns the resulting status.
    async fn keep_alive(&self) -> StatusCode;

    // =========================================================================
    // Attribute services
    // =========================================================================

    /// Reads the Value attribute.
    async fn read_value(&self, node_id: &NodeId) -> OpcUaResult<DataValue>;

    /// Reads several attributes of one node. Results are in request order.
    async fn read_attributes(
        &self,
        node_id: &NodeId,
        attributes: &[AttributeId],
    ) -> OpcUaResult<Vec<DataValue>>;

    /// Writes the Value attribute.
    async fn write_value(&self, node_id: &NodeId, value: OpcUaValue) -> OpcUaResult<WriteOutcome>;

    // =========================================================================
    // View services
    // =========================================================================

    /// Browses the references of a node.
    async fn browse(
        &self,
        node_id: &NodeId,
        filter: &BrowseFilter,
    ) -> OpcUaResult<Vec<ReferenceDescription>>;

    // =========================================================================
    // Subscription services
    // =========================================================================

    /// Creates a subscription whose data changes are pushed into `sink`.
    async fn create_subscription(
        &mut self,
        settings: &SubscriptionSettings,
        sink: NotificationSink,
    ) -> OpcUaResult<u32>;

    /// Deletes a subscription and its monitored items.
    async fn delete_subscription(&mut self, subscription_id: u32) -> OpcUaResult<()>;

    /// Creates monitored items. Results are in request order.
    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<MonitoredItemResult>>;

    /// Deletes monitored items.
    async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: &[u32],
    ) -> OpcUaResult<()>;

    // =========================================================================
    // Info
    // =========================================================================

    /// Returns a display name for logs.
    fn display_name(&self) -> String {
        "OpcUaTransport".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_value_accessors() {
        assert_eq!(OpcUaValue::Int32(42).as_i64(), Some(42));
        assert_eq!(OpcUaValue::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(OpcUaValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(OpcUaValue::Boolean(true).as_bool(), Some(true));
        assert_eq!(OpcUaValue::String("x".into()).as_str(), Some("x"));
        assert!(OpcUaValue::default().is_null());
        assert_eq!(OpcUaValue::ByteString(vec![1, 2]).to_string(), "<2 bytes>");
        assert_eq!(
            OpcUaValue::NodeId(NodeId::numeric(0, 6)).as_node_id(),
            Some(&NodeId::numeric(0, 6))
        );
    }

    #[test]
    fn test_data_value_timestamp_fallback() {
        let mut value = DataValue::good(OpcUaValue::Int32(1));
        assert!(value.is_good());
        value.source_timestamp = None;
        assert_eq!(value.timestamp(), value.server_timestamp);

        let bad = DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN);
        assert!(!bad.is_good());
        assert!(bad.value.is_null());
    }

    #[test]
    fn test_hierarchical_filter() {
        let filter = BrowseFilter::default();
        assert_eq!(filter.reference_type, NodeId::numeric(0, 33));
        assert!(filter.include_subtypes);
        assert_eq!(filter.direction, BrowseDirection::Forward);
        assert!(filter.admits(NodeClass::Object));
        assert!(filter.admits(NodeClass::Method));
        assert!(!filter.admits(NodeClass::DataType));
    }

    #[test]
    fn test_notification_sink_delivers() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let sink = NotificationSink::new(move |n| {
            counter.fetch_add(n.client_handle, Ordering::SeqCst);
        });

        sink.deliver(DataChangeNotification {
            client_handle: 3,
            value: DataValue::good(OpcUaValue::Null),
        });
        sink.clone().deliver(DataChangeNotification {
            client_handle: 4,
            value: DataValue::default(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 7);

        NotificationSink::discard().deliver(DataChangeNotification {
            client_handle: 1,
            value: DataValue::default(),
        });
    }
}
