// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory transport for tests and offline use.
//!
//! `MockTransport` is a cheap handle over shared state: clone it before
//! handing it to an engine and keep the clone to script the server and
//! inspect what the client did.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::transport::{
    BrowseFilter, DataChangeNotification, DataValue, MonitoredItemRequest, MonitoredItemResult,
    NotificationSink, OpcUaTransport, OpcUaValue, ReferenceDescription, SessionRequest,
    WriteOutcome,
};
use crate::certificate::Certificate;
use crate::config::SubscriptionSettings;
use crate::error::{
    ConnectionError, DiscoveryError, OpcUaError, OpcUaResult, SessionError, SubscriptionError,
};
use crate::types::{
    access_level, ApplicationDescription, AttributeId, EndpointDescriptor, NodeClass, NodeId,
    StatusCode,
};

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone)]
struct MockSubscription {
    sink: NotificationSink,
    items: Vec<(u32, MonitoredItemRequest)>,
}

#[derive(Debug, Default)]
struct MockState {
    endpoints: HashMap<String, Vec<EndpointDescriptor>>,
    endpoint_discovery_fails: bool,
    servers: HashMap<String, Vec<ApplicationDescription>>,

    untrusted_certificate: Option<Certificate>,
    untrusted_attempts: u32,
    connect_error: Option<String>,
    connect_delay: Option<Duration>,
    last_session_request: Option<SessionRequest>,

    references: HashMap<NodeId, Vec<ReferenceDescription>>,
    values: HashMap<NodeId, DataValue>,
    data_types: HashMap<NodeId, NodeId>,
    access_levels: HashMap<NodeId, u8>,
    failing_reads: HashSet<NodeId>,
    failing_browses: HashSet<NodeId>,
    write_outcomes: HashMap<NodeId, WriteOutcome>,
    writes: Vec<(NodeId, OpcUaValue)>,

    subscription_creation_fails: bool,
    monitored_items_fail: bool,
    subscriptions: HashMap<u32, MockSubscription>,
    all_sinks: Vec<NotificationSink>,

    calls: Vec<&'static str>,
}

// =============================================================================
// MockTransport
// =============================================================================

/// Scriptable in-memory OPC UA server.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    connected: Arc<AtomicBool>,
    keep_alive_status: Arc<AtomicU32>,
    session_opens: Arc<AtomicU32>,
    next_id: Arc<AtomicU32>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates an empty mock server.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            connected: Arc::new(AtomicBool::new(false)),
            keep_alive_status: Arc::new(AtomicU32::new(StatusCode::GOOD.0)),
            session_opens: Arc::new(AtomicU32::new(0)),
            next_id: Arc::new(AtomicU32::new(1)),
        }
    }

    // =========================================================================
    // Scripting: discovery
    // =========================================================================

    /// Sets the endpoints advertised at `url`.
    pub fn set_endpoints(&self, url: impl Into<String>, endpoints: Vec<EndpointDescriptor>) {
        self.state.lock().endpoints.insert(url.into(), endpoints);
    }

    /// Makes every endpoint query fail.
    pub fn fail_endpoint_discovery(&self, fail: bool) {
        self.state.lock().endpoint_discovery_fails = fail;
    }

    /// Registers an application with the discovery server at `discovery_url`.
    pub fn add_server(&self, discovery_url: impl Into<String>, server: ApplicationDescription) {
        self.state
            .lock()
            .servers
            .entry(discovery_url.into())
            .or_default()
            .push(server);
    }

    // =========================================================================
    // Scripting: session
    // =========================================================================

    /// Rejects the next `attempts` session opens with an untrusted certificate.
    pub fn reject_certificate(&self, certificate: Certificate, attempts: u32) {
        let mut state = self.state.lock();
        state.untrusted_certificate = Some(certificate);
        state.untrusted_attempts = attempts;
    }

    /// Makes session opens fail with a generic error, or succeed again with `None`.
    pub fn fail_connect(&self, message: Option<&str>) {
        self.state.lock().connect_error = message.map(str::to_string);
    }

    /// Delays session opens.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    /// Sets the status returned by keep-alive checks.
    pub fn set_keep_alive_status(&self, status: StatusCode) {
        self.keep_alive_status.store(status.0, Ordering::SeqCst);
    }

    // =========================================================================
    // Scripting: address space
    // =========================================================================

    /// Adds an object under `parent`. `typed` sets a type definition.
    pub fn add_object(&self, parent: &NodeId, node_id: NodeId, name: &str, typed: bool) {
        let type_definition = typed.then(|| NodeId::numeric(0, 58));
        self.add_reference(parent, node_id, name, NodeClass::Object, type_definition);
    }

    /// Adds a variable under `parent` with a value and declared data type.
    pub fn add_variable(
        &self,
        parent: &NodeId,
        node_id: NodeId,
        name: &str,
        value: OpcUaValue,
        data_type: NodeId,
        writable: bool,
    ) {
        self.add_reference(
            parent,
            node_id.clone(),
            name,
            NodeClass::Variable,
            Some(NodeId::numeric(0, 63)),
        );

        let mut state = self.state.lock();
        state.values.insert(node_id.clone(), DataValue::good(value));
        state.data_types.insert(node_id.clone(), data_type);
        let level = if writable {
            access_level::CURRENT_READ | access_level::CURRENT_WRITE
        } else {
            access_level::CURRENT_READ
        };
        state.access_levels.insert(node_id, level);
    }

    /// Adds a reference of any class under `parent`.
    pub fn add_reference(
        &self,
        parent: &NodeId,
        node_id: NodeId,
        name: &str,
        node_class: NodeClass,
        type_definition: Option<NodeId>,
    ) {
        let reference = ReferenceDescription {
            node_id,
            browse_name: name.to_string(),
            display_name: name.to_string(),
            node_class,
            reference_type: Some(NodeId::numeric(0, 35)),
            type_definition,
        };
        self.state
            .lock()
            .references
            .entry(parent.clone())
            .or_default()
            .push(reference);
    }

    /// Replaces a node's value.
    pub fn set_value(&self, node_id: &NodeId, value: OpcUaValue) {
        self.set_data_value(node_id, DataValue::good(value));
    }

    /// Replaces a node's value with its status and timestamps.
    pub fn set_data_value(&self, node_id: &NodeId, value: DataValue) {
        self.state.lock().values.insert(node_id.clone(), value);
    }

    /// Makes reads of `node_id` fail.
    pub fn fail_reads_of(&self, node_id: &NodeId) {
        self.state.lock().failing_reads.insert(node_id.clone());
    }

    /// Makes browses of `node_id` fail.
    pub fn fail_browse_of(&self, node_id: &NodeId) {
        self.state.lock().failing_browses.insert(node_id.clone());
    }

    /// Sets the server response to writes of `node_id`.
    pub fn set_write_outcome(&self, node_id: &NodeId, outcome: WriteOutcome) {
        self.state.lock().write_outcomes.insert(node_id.clone(), outcome);
    }

    // =========================================================================
    // Scripting: subscriptions
    // =========================================================================

    /// Makes subscription creation fail.
    pub fn fail_subscription_creation(&self, fail: bool) {
        self.state.lock().subscription_creation_fails = fail;
    }

    /// Makes monitored item creation fail.
    pub fn fail_monitored_items(&self, fail: bool) {
        self.state.lock().monitored_items_fail = fail;
    }

    /// Pushes a data change for every live monitored item on `node_id`.
    ///
    /// Returns the number of deliveries.
    pub fn notify(&self, node_id: &NodeId, value: DataValue) -> usize {
        let targets: Vec<(NotificationSink, u32)> = {
            let state = self.state.lock();
            state
                .subscriptions
                .values()
                .flat_map(|sub| {
                    sub.items
                        .iter()
                        .filter(|(_, req)| &req.node_id == node_id)
                        .map(|(_, req)| (sub.sink.clone(), req.client_handle))
                })
                .collect()
        };

        for (sink, client_handle) in &targets {
            sink.deliver(DataChangeNotification {
                client_handle: *client_handle,
                value: value.clone(),
            });
        }
        targets.len()
    }

    /// Pushes a data change into every sink ever handed out, including those
    /// of deleted subscriptions. Simulates late deliveries racing a teardown.
    pub fn notify_all_sinks(&self, client_handle: u32, value: DataValue) -> usize {
        let sinks = self.state.lock().all_sinks.clone();
        for sink in &sinks {
            sink.deliver(DataChangeNotification {
                client_handle,
                value: value.clone(),
            });
        }
        sinks.len()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Returns the number of successful session opens.
    pub fn session_opens(&self) -> u32 {
        self.session_opens.load(Ordering::SeqCst)
    }

    /// Returns the last session request.
    pub fn last_session_request(&self) -> Option<SessionRequest> {
        self.state.lock().last_session_request.clone()
    }

    /// Returns the recorded writes.
    pub fn writes(&self) -> Vec<(NodeId, OpcUaValue)> {
        self.state.lock().writes.clone()
    }

    /// Returns the ids of live subscriptions.
    pub fn subscription_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.state.lock().subscriptions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the number of monitored items on a subscription.
    pub fn monitored_item_count(&self, subscription_id: u32) -> usize {
        self.state
            .lock()
            .subscriptions
            .get(&subscription_id)
            .map_or(0, |sub| sub.items.len())
    }

    /// Returns the names of transport calls in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    fn record(&self, call: &'static str) {
        self.state.lock().calls.push(call);
    }

    fn ensure_connected(&self) -> OpcUaResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OpcUaError::not_connected())
        }
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn read_attribute(state: &MockState, node_id: &NodeId, attribute: AttributeId) -> DataValue {
        if state.failing_reads.contains(node_id) {
            return DataValue::bad(StatusCode::BAD_NOT_READABLE);
        }
        match attribute {
            AttributeId::Value => state
                .values
                .get(node_id)
                .cloned()
                .unwrap_or_else(|| DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN)),
            AttributeId::DataType => state
                .data_types
                .get(node_id)
                .map(|dt| DataValue::good(OpcUaValue::NodeId(dt.clone())))
                .unwrap_or_else(|| DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN)),
            AttributeId::AccessLevel | AttributeId::UserAccessLevel => state
                .access_levels
                .get(node_id)
                .map(|level| DataValue::good(OpcUaValue::Byte(*level)))
                .unwrap_or_else(|| DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN)),
            _ => DataValue::bad(StatusCode(0x8035_0000)),
        }
    }
}

// =============================================================================
// OpcUaTransport
// =============================================================================

#[async_trait]
impl OpcUaTransport for MockTransport {
    async fn get_endpoints(&self, url: &str) -> OpcUaResult<Vec<EndpointDescriptor>> {
        self.record("get_endpoints");
        let state = self.state.lock();
        if state.endpoint_discovery_fails {
            return Err(OpcUaError::discovery(DiscoveryError::endpoints_unavailable(
                url,
                "connection refused",
            )));
        }
        state
            .endpoints
            .get(url)
            .cloned()
            .ok_or_else(|| OpcUaError::discovery(DiscoveryError::no_endpoints(url)))
    }

    async fn find_servers(&self, discovery_url: &str) -> OpcUaResult<Vec<ApplicationDescription>> {
        self.record("find_servers");
        self.state
            .lock()
            .servers
            .get(discovery_url)
            .cloned()
            .ok_or_else(|| {
                OpcUaError::discovery(DiscoveryError::find_servers_failed(
                    discovery_url,
                    "no discovery server",
                ))
            })
    }

    async fn open_session(&mut self, request: &SessionRequest) -> OpcUaResult<()> {
        self.record("open_session");
        let delay = self.state.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.last_session_request = Some(request.clone());

        if state.untrusted_attempts > 0 {
            if let Some(cert) = state.untrusted_certificate.clone() {
                state.untrusted_attempts -= 1;
                return Err(OpcUaError::certificate_untrusted(cert));
            }
        }
        if let Some(message) = &state.connect_error {
            return Err(OpcUaError::connection(ConnectionError::refused(
                &request.endpoint.endpoint_url,
                message.clone(),
            )));
        }

        self.connected.store(true, Ordering::SeqCst);
        self.session_opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close_session(&mut self) -> OpcUaResult<()> {
        self.record("close_session");
        self.connected.store(false, Ordering::SeqCst);
        self.state.lock().subscriptions.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn keep_alive(&self) -> StatusCode {
        if !self.is_connected() {
            return StatusCode::BAD_SERVER_NOT_CONNECTED;
        }
        StatusCode(self.keep_alive_status.load(Ordering::SeqCst))
    }

    async fn read_value(&self, node_id: &NodeId) -> OpcUaResult<DataValue> {
        self.record("read_value");
        self.ensure_connected()?;
        let state = self.state.lock();
        Ok(Self::read_attribute(&state, node_id, AttributeId::Value))
    }

    async fn read_attributes(
        &self,
        node_id: &NodeId,
        attributes: &[AttributeId],
    ) -> OpcUaResult<Vec<DataValue>> {
        self.record("read_attributes");
        self.ensure_connected()?;
        let state = self.state.lock();
        Ok(attributes
            .iter()
            .map(|attribute| Self::read_attribute(&state, node_id, *attribute))
            .collect())
    }

    async fn write_value(&self, node_id: &NodeId, value: OpcUaValue) -> OpcUaResult<WriteOutcome> {
        self.record("write_value");
        self.ensure_connected()?;
        let mut state = self.state.lock();
        state.writes.push((node_id.clone(), value.clone()));

        if let Some(outcome) = state.write_outcomes.get(node_id) {
            return Ok(outcome.clone());
        }
        state.values.insert(node_id.clone(), DataValue::good(value));
        Ok(WriteOutcome::good())
    }

    async fn browse(
        &self,
        node_id: &NodeId,
        filter: &BrowseFilter,
    ) -> OpcUaResult<Vec<ReferenceDescription>> {
        self.record("browse");
        self.ensure_connected()?;
        let state = self.state.lock();
        if state.failing_browses.contains(node_id) {
            return Err(OpcUaError::browse_failed(node_id.to_string(), "BadNodeIdUnknown"));
        }
        Ok(state
            .references
            .get(node_id)
            .map(|refs| {
                refs.iter()
                    .filter(|r| filter.admits(r.node_class))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_subscription(
        &mut self,
        settings: &SubscriptionSettings,
        sink: NotificationSink,
    ) -> OpcUaResult<u32> {
        self.record("create_subscription");
        self.ensure_connected()?;
        if settings.publishing_interval.is_zero() {
            return Err(OpcUaError::subscription(SubscriptionError::invalid_settings(
                "publishing interval is zero",
            )));
        }

        let mut state = self.state.lock();
        if state.subscription_creation_fails {
            return Err(OpcUaError::subscription(SubscriptionError::creation_failed(
                "BadTooManySubscriptions",
            )));
        }

        let id = self.next_id();
        state.all_sinks.push(sink.clone());
        state.subscriptions.insert(
            id,
            MockSubscription {
                sink,
                items: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn delete_subscription(&mut self, subscription_id: u32) -> OpcUaResult<()> {
        self.record("delete_subscription");
        self.ensure_connected()?;
        self.state
            .lock()
            .subscriptions
            .remove(&subscription_id)
            .map(|_| ())
            .ok_or_else(|| {
                OpcUaError::subscription(SubscriptionError::deletion_failed(
                    subscription_id,
                    "BadSubscriptionIdInvalid",
                ))
            })
    }

    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<MonitoredItemResult>> {
        self.record("create_monitored_items");
        self.ensure_connected()?;

        let mut state = self.state.lock();
        if state.monitored_items_fail {
            return Err(OpcUaError::session(SessionError::faulted("BadTooManyOperations")));
        }
        if !state.subscriptions.contains_key(&subscription_id) {
            return Err(OpcUaError::subscription(SubscriptionError::NoSubscription));
        }

        let mut results = Vec::with_capacity(items.len());
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let id = self.next_id();
            let status = if state.values.contains_key(&item.node_id) {
                StatusCode::GOOD
            } else {
                StatusCode::BAD_NODE_ID_UNKNOWN
            };
            if status.is_good() {
                created.push((id, item.clone()));
            }
            results.push(MonitoredItemResult {
                client_handle: item.client_handle,
                monitored_item_id: id,
                status,
            });
        }

        if let Some(sub) = state.subscriptions.get_mut(&subscription_id) {
            sub.items.extend(created);
        }
        Ok(results)
    }

    async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: &[u32],
    ) -> OpcUaResult<()> {
        self.record("delete_monitored_items");
        self.ensure_connected()?;
        let mut state = self.state.lock();
        let sub = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| OpcUaError::subscription(SubscriptionError::NoSubscription))?;
        sub.items.retain(|(id, _)| !monitored_item_ids.contains(id));
        Ok(())
    }

    fn display_name(&self) -> String {
        "MockTransport".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SecurityMode, SecurityPolicy, UserIdentity};

    fn request() -> SessionRequest {
        SessionRequest {
            endpoint: EndpointDescriptor::new(
                "opc.tcp://mock:4840",
                SecurityMode::None,
                SecurityPolicy::None,
                0,
            ),
            identity: UserIdentity::Anonymous,
            session_timeout: Duration::from_secs(60),
            application_name: "test".into(),
            application_uri: "urn:test".into(),
            product_uri: "urn:test".into(),
            pki_dir: std::env::temp_dir(),
            session_name: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_untrusted_then_success() {
        let mut mock = MockTransport::new();
        mock.reject_certificate(Certificate::new(vec![1, 2, 3]), 1);

        let err = mock.open_session(&request()).await.unwrap_err();
        assert!(err.is_certificate_untrusted());
        assert!(!mock.is_connected());

        mock.open_session(&request()).await.unwrap();
        assert!(mock.is_connected());
        assert_eq!(mock.session_opens(), 1);
    }

    #[tokio::test]
    async fn test_operations_require_session() {
        let mock = MockTransport::new();
        let err = mock.read_value(&NodeId::numeric(2, 1)).await.unwrap_err();
        assert!(err.is_not_connected());
        assert_eq!(mock.keep_alive().await, StatusCode::BAD_SERVER_NOT_CONNECTED);
    }

    #[tokio::test]
    async fn test_browse_respects_filter() {
        let mut mock = MockTransport::new();
        mock.open_session(&request()).await.unwrap();
        let root = NodeId::OBJECTS_FOLDER;
        mock.add_object(&root, NodeId::string(2, "Line1"), "Line1", true);
        mock.add_reference(&root, NodeId::numeric(0, 1), "Boolean", NodeClass::DataType, None);

        let refs = mock.browse(&root, &BrowseFilter::default()).await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].browse_name, "Line1");
    }

    #[tokio::test]
    async fn test_notify_routes_by_node() {
        let mut mock = MockTransport::new();
        mock.open_session(&request()).await.unwrap();
        let node = NodeId::string(2, "Speed");
        mock.set_value(&node, OpcUaValue::Double(1.0));

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_received = Arc::clone(&received);
        let sink = NotificationSink::new(move |n| sink_received.lock().push(n.client_handle));

        let sub = mock
            .create_subscription(&SubscriptionSettings::default(), sink)
            .await
            .unwrap();
        let results = mock
            .create_monitored_items(
                sub,
                &[MonitoredItemRequest {
                    node_id: node.clone(),
                    attribute: AttributeId::Value,
                    client_handle: 9,
                    sampling_interval: Duration::from_millis(100),
                    queue_size: 1,
                    discard_oldest: true,
                }],
            )
            .await
            .unwrap();
        assert!(results[0].status.is_good());

        assert_eq!(mock.notify(&node, DataValue::good(OpcUaValue::Double(2.0))), 1);
        assert_eq!(*received.lock(), vec![9]);
    }
}
