// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The client engine.
//!
//! [`ClientEngine`] is the inbound surface of the crate. One engine owns one
//! transport, at most one session and at most one subscription; independent
//! engines share nothing.
//!
//! ```rust,ignore
//! use ua_inspector::{ClientConfig, ClientEngine, LoginMode, ServerDescriptor};
//! use ua_inspector::client::MockTransport;
//!
//! let engine =
//!     ClientEngine::with_file_store(MockTransport::new(), ClientConfig::default()).await?;
//! let server = ServerDescriptor::new("Demo", "opc.tcp://localhost:4840");
//! let updated = engine.connect(&server, LoginMode::Anonymous, None).await?;
//!
//! for node in engine.browse(None).await {
//!     println!("{} = {}", node.display_name(), node.value_text());
//! }
//! engine.disconnect().await;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use crate::browse::{AddressSpaceBrowser, NodeInfo};
use crate::certificate::{Certificate, CertificateStore, FileSystemStore};
use crate::client::{
    coerce, data_type_name, with_timeout, ConnectionEvent, ConnectionState, DataChangeCallback,
    DataValue, OpcUaTransport, ReleaseFuture, ReleaseHook, SessionInfo, SessionManager,
    SessionStats, SubscriptionEngine, SubscriptionStats,
};
use crate::config::ClientConfig;
use crate::discovery::DiscoveryService;
use crate::error::{OpcUaError, OpcUaResult, OperationError};
use crate::types::{
    AttributeId, Credentials, EndpointDescriptor, LoginMode, NodeId, ServerDescriptor,
};

/// Publishing interval used when watching a folder without a subscription.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(300);

// =============================================================================
// WriteResult
// =============================================================================

/// Outcome of [`ClientEngine::write_value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    /// `true` if the server accepted the value.
    pub success: bool,
    /// Human-readable reason for a failure.
    pub error_message: Option<String>,
}

impl WriteResult {
    fn ok() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
        }
    }
}

// =============================================================================
// ClientEngine
// =============================================================================

/// An OPC UA inspection client.
pub struct ClientEngine<T: OpcUaTransport> {
    config: Arc<ClientConfig>,
    transport: Arc<Mutex<T>>,
    store: Arc<dyn CertificateStore>,
    session: SessionManager<T>,
    browser: AddressSpaceBrowser<T>,
    subscriptions: Arc<SubscriptionEngine<T>>,
    discovery: DiscoveryService<T>,
}

impl<T: OpcUaTransport + 'static> ClientEngine<T> {
    /// Creates an engine over `transport` recording trust decisions in `store`.
    ///
    /// Fails if `config` does not validate.
    pub fn new(
        transport: T,
        config: ClientConfig,
        store: Arc<dyn CertificateStore>,
    ) -> OpcUaResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let transport = Arc::new(Mutex::new(transport));

        let session =
            SessionManager::new(Arc::clone(&transport), Arc::clone(&config), Arc::clone(&store));
        let subscriptions = Arc::new(SubscriptionEngine::new(
            Arc::clone(&transport),
            config.subscription.clone(),
            config.monitored_item.clone(),
            config.operation_timeout,
        ));
        session.set_release_hook(subscription_release_hook(&subscriptions));

        Ok(Self {
            session,
            browser: AddressSpaceBrowser::new(Arc::clone(&transport), config.operation_timeout),
            subscriptions,
            discovery: DiscoveryService::new(Arc::clone(&transport), config.connect_timeout),
            config,
            transport,
            store,
        })
    }

    /// Creates an engine with a file-system trust store under `config.pki_dir`.
    pub async fn with_file_store(transport: T, config: ClientConfig) -> OpcUaResult<Self> {
        config.validate()?;
        let store = FileSystemStore::open(config.pki_dir.clone()).await;
        Self::new(transport, config, Arc::new(store))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the trust store.
    pub fn certificate_store(&self) -> &Arc<dyn CertificateStore> {
        &self.store
    }

    /// Returns the address-space browser.
    pub fn browser(&self) -> &AddressSpaceBrowser<T> {
        &self.browser
    }

    /// Returns the discovery service.
    pub fn discovery(&self) -> &DiscoveryService<T> {
        &self.discovery
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connects to `server`, replacing any open session.
    ///
    /// Returns the descriptor updated for persistence. An untrusted server
    /// certificate fails with an error for which
    /// [`OpcUaError::is_certificate_untrusted`] holds; trust it with
    /// [`Self::trust_certificate`] and connect again.
    ///
    /// The subscription of a replaced session is deleted only once this
    /// connect holds the connect slot; an overlapping connect fails with
    /// [`ConnectionError::InProgress`](crate::error::ConnectionError::InProgress)
    /// and leaves it alone.
    pub async fn connect(
        &self,
        server: &ServerDescriptor,
        login_mode: LoginMode,
        credentials: Option<&Credentials>,
    ) -> OpcUaResult<ServerDescriptor> {
        self.session.connect(server, login_mode, credentials).await
    }

    /// Disconnects. Never fails and may be called repeatedly.
    ///
    /// The subscription is deleted before the session is closed.
    pub async fn disconnect(&self) {
        self.session.disconnect().await;
    }

    /// Returns the connection state.
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Returns `true` if a usable session is open.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Returns the open session.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session.session_info()
    }

    /// Subscribes to connection state changes.
    pub fn subscribe_state_changes(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.session.subscribe()
    }

    /// Returns session counters.
    pub fn session_stats(&self) -> &SessionStats {
        self.session.stats()
    }

    /// Returns subscription counters.
    pub fn subscription_stats(&self) -> &SubscriptionStats {
        self.subscriptions.stats()
    }

    // =========================================================================
    // Certificates
    // =========================================================================

    /// Records a server certificate as trusted.
    pub async fn trust_certificate(&self, certificate: &Certificate) -> OpcUaResult<bool> {
        self.store.trust(certificate).await
    }

    /// Records a server certificate as rejected.
    pub async fn reject_certificate(&self, certificate: &Certificate) -> OpcUaResult<bool> {
        self.store.reject(certificate).await
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Probes the well-known local discovery URLs.
    pub async fn discover_servers(&self) -> Vec<ServerDescriptor> {
        self.discovery.discover_on_network().await
    }

    /// Queries the local discovery servers.
    pub async fn discover_with_lds(&self) -> Vec<ServerDescriptor> {
        self.discovery.discover_with_lds().await
    }

    /// Returns a server's endpoints, or an empty list on failure.
    pub async fn get_endpoints(&self, url: &str) -> Vec<EndpointDescriptor> {
        self.discovery.get_endpoints(url).await
    }

    // =========================================================================
    // Address space
    // =========================================================================

    /// Browses the children of `parent`, or of the Objects folder.
    ///
    /// Returns an empty list when disconnected or on failure.
    pub async fn browse(&self, parent: Option<&NodeId>) -> Vec<Arc<NodeInfo>> {
        if !self.session.is_connected() {
            return Vec::new();
        }
        self.browser.browse(parent).await
    }

    /// Returns the folder children of `node`, fetching them at most once.
    pub async fn expand(&self, node: &NodeInfo) -> Vec<Arc<NodeInfo>> {
        if node.is_loaded() {
            return node.children();
        }
        if !self.session.is_connected() {
            return Vec::new();
        }
        self.browser.expand(node).await
    }

    /// Reads a node's value. Returns `None` on any failure.
    pub async fn read_value(&self, node_id: &NodeId) -> Option<DataValue> {
        match self.try_read_value(node_id).await {
            Ok(value) => Some(value),
            Err(e) => {
                e.log("read");
                None
            }
        }
    }

    /// Reads a node's value, reporting a bad status as an error.
    pub async fn try_read_value(&self, node_id: &NodeId) -> OpcUaResult<DataValue> {
        self.session.ensure_connected()?;
        let value = with_timeout(self.config.operation_timeout, "read", async {
            self.transport.lock().await.read_value(node_id).await
        })
        .await
        .map_err(|e| match e {
            OpcUaError::Timeout(_) => e,
            _ if e.is_not_connected() => e,
            other => OpcUaError::read_failed(node_id.to_string(), other.to_string()),
        })?;

        if value.status.is_bad() {
            return Err(OpcUaError::operation(OperationError::read_status(
                node_id.to_string(),
                value.status.bits(),
            )));
        }
        Ok(value)
    }

    /// Writes text to a node, converted to the node's declared data type.
    pub async fn write_value(&self, node_id: &NodeId, text: &str) -> WriteResult {
        if let Err(e) = self.session.ensure_connected() {
            return WriteResult::failed(e.to_string());
        }

        let declared = self.declared_type(node_id).await;
        let value = coerce(text, &declared);
        tracing::debug!(
            node_id = %node_id,
            declared_type = %declared,
            value_type = value.type_name(),
            "Writing value"
        );

        let outcome = with_timeout(self.config.operation_timeout, "write", async {
            self.transport.lock().await.write_value(node_id, value).await
        })
        .await;

        match outcome {
            Ok(outcome) if outcome.status.is_good() => WriteResult::ok(),
            Ok(outcome) => {
                let mut message = format!("Write failed: {}", outcome.status);
                if let Some(diagnostic) = outcome.diagnostic.filter(|d| !d.is_empty()) {
                    message.push_str(" - ");
                    message.push_str(&diagnostic);
                }
                tracing::warn!(node_id = %node_id, status = %outcome.status, "Write rejected");
                WriteResult::failed(message)
            }
            Err(e) => {
                e.log("write");
                WriteResult::failed(e.to_string())
            }
        }
    }

    async fn declared_type(&self, node_id: &NodeId) -> String {
        let attributes = with_timeout(self.config.operation_timeout, "read", async {
            self.transport
                .lock()
                .await
                .read_attributes(node_id, &[AttributeId::DataType])
                .await
        })
        .await;

        let data_type = match &attributes {
            Ok(values) => values
                .first()
                .filter(|dv| dv.is_good())
                .and_then(|dv| dv.value.as_node_id()),
            Err(e) => {
                tracing::debug!(node_id = %node_id, error = %e, "DataType read failed");
                None
            }
        };
        data_type_name(data_type)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Creates the subscription, replacing any existing one.
    pub async fn create_subscription(&self, publishing_interval: Duration) -> OpcUaResult<u32> {
        self.session.ensure_connected()?;
        self.subscriptions.create_subscription(publishing_interval).await
    }

    /// Attaches a monitored item on the node's value.
    pub async fn add_monitored_item(
        &self,
        node_id: &NodeId,
        callback: DataChangeCallback,
    ) -> OpcUaResult<u32> {
        self.session.ensure_connected()?;
        self.subscriptions.add_monitored_item(node_id, callback).await
    }

    /// Detaches every monitored item, keeping the subscription.
    ///
    /// When disconnected, releases any local subscription state left over
    /// instead.
    pub async fn remove_all_monitored_items(&self) -> OpcUaResult<()> {
        if !self.session.is_connected() {
            self.subscriptions.discard().await;
            return Ok(());
        }
        self.subscriptions.remove_all_monitored_items().await
    }

    /// Returns `true` if a subscription exists.
    pub async fn has_subscription(&self) -> bool {
        self.subscriptions.has_subscription().await
    }

    /// Keeps the value of each variable node current through the
    /// subscription. Returns the number of nodes attached.
    pub async fn watch_nodes(&self, nodes: &[Arc<NodeInfo>]) -> OpcUaResult<usize> {
        self.session.ensure_connected()?;

        let mut attached = 0;
        for node in nodes.iter().filter(|n| n.is_variable()) {
            let target = Arc::clone(node);
            let callback: DataChangeCallback =
                Arc::new(move |_node_id: &NodeId, value: &DataValue| target.update(value));

            match self.subscriptions.add_monitored_item(node.node_id(), callback).await {
                Ok(_) => attached += 1,
                Err(e) => e.log("watch node"),
            }
        }

        tracing::debug!(requested = nodes.len(), attached, "Watching nodes");
        Ok(attached)
    }

    /// Replaces the watched set with the variables of `folder`.
    ///
    /// Creates a subscription at [`DEFAULT_WATCH_INTERVAL`] if none exists.
    /// Returns the variables found.
    pub async fn watch_folder(&self, folder: &NodeInfo) -> OpcUaResult<Vec<Arc<NodeInfo>>> {
        self.session.ensure_connected()?;
        self.subscriptions.remove_all_monitored_items().await?;

        let variables: Vec<Arc<NodeInfo>> = self
            .browser
            .browse(Some(folder.node_id()))
            .await
            .into_iter()
            .filter(|node| node.is_variable())
            .collect();

        if !variables.is_empty() {
            if !self.subscriptions.has_subscription().await {
                self.subscriptions
                    .create_subscription(DEFAULT_WATCH_INTERVAL)
                    .await?;
            }
            self.watch_nodes(&variables).await?;
        }
        Ok(variables)
    }
}

/// Deletes the subscription while the session is usable, otherwise drops it
/// locally.
fn subscription_release_hook<T: OpcUaTransport + 'static>(
    subscriptions: &Arc<SubscriptionEngine<T>>,
) -> ReleaseHook {
    let subscriptions = Arc::clone(subscriptions);
    Arc::new(move |state: ConnectionState| -> ReleaseFuture {
        let subscriptions = Arc::clone(&subscriptions);
        Box::pin(async move {
            if !subscriptions.has_subscription().await {
                return;
            }
            if state.is_connected() {
                if let Err(e) = subscriptions.delete_subscription().await {
                    e.log("delete subscription");
                }
            } else {
                subscriptions.discard().await;
            }
        })
    })
}

impl<T: OpcUaTransport> fmt::Debug for ClientEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEngine")
            .field("application_name", &self.config.application_name)
            .field("session", &self.session)
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
