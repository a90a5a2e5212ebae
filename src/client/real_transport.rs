// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport over the `opcua` crate.
//!
//! The `opcua` 0.12 client is synchronous and drives its own runtime, so
//! every service call runs on the blocking pool. Data changes arrive on the
//! session's publish thread and are forwarded to the [`NotificationSink`]
//! registered with the subscription.
//!
//! # Example
//!
//! ```rust,ignore
//! use ua_inspector::{ClientConfig, ClientEngine, OpcUaStackTransport};
//!
//! let config = ClientConfig::default();
//! let engine = ClientEngine::with_file_store(OpcUaStackTransport::new(&config), config).await?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use opcua::client::prelude::{
    AttributeService, BrowseDescription, BrowseDescriptionResultMask, Client, ClientBuilder,
    DataChangeCallback, IdentityToken, MonitoredItemCreateRequest, MonitoredItemService,
    MonitoringMode, MonitoringParameters, ReadValueId, Session, SessionCommand, SubscriptionService,
    TimestampsToReturn, UserTokenPolicy, ViewService, WriteValue,
};
use opcua::sync::RwLock as OpcUaRwLock;
use opcua::types as ua;

use super::transport::{
    BrowseFilter, DataChangeNotification, DataValue, MonitoredItemRequest, MonitoredItemResult,
    NotificationSink, OpcUaTransport, OpcUaValue, ReferenceDescription, SessionRequest,
    WriteOutcome,
};
use crate::certificate::Certificate;
use crate::config::{ClientConfig, SubscriptionSettings};
use crate::error::{
    BrowseError, ConnectionError, DiscoveryError, OpcUaError, OpcUaResult, OperationError,
    SecurityError, SessionError, SubscriptionError,
};
use crate::types::{
    ApplicationDescription, AttributeId, BrowseDirection, EndpointDescriptor, NodeClass, NodeId,
    NodeIdentifier, SecurityMode, StatusCode, UserIdentity,
};

type SharedSession = Arc<OpcUaRwLock<Session>>;

/// Maps server-assigned monitored item ids to the client handles the
/// subscription engine routes by. The stack assigns its own handles.
type HandleMap = Arc<parking_lot::RwLock<HashMap<u32, u32>>>;

// =============================================================================
// OpcUaStackTransport
// =============================================================================

/// [`OpcUaTransport`] backed by the `opcua` crate's client.
pub struct OpcUaStackTransport {
    application_name: String,
    application_uri: String,
    product_uri: String,
    pki_dir: PathBuf,

    session: Option<SharedSession>,
    session_stop: Option<oneshot::Sender<SessionCommand>>,
    handles: HandleMap,
}

impl OpcUaStackTransport {
    /// Creates a transport using the application identity from `config`.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            application_name: config.application_name.clone(),
            application_uri: config.effective_application_uri(),
            product_uri: config.product_uri.clone(),
            pki_dir: config.pki_dir.clone(),
            session: None,
            session_stop: None,
            handles: Arc::new(parking_lot::RwLock::new(HashMap::new())),
        }
    }

    fn build_client(
        &self,
        application_name: &str,
        application_uri: &str,
        product_uri: &str,
        pki_dir: &Path,
        session_timeout_ms: u32,
    ) -> OpcUaResult<Client> {
        ClientBuilder::new()
            .application_name(application_name)
            .application_uri(application_uri)
            .product_uri(product_uri)
            .pki_dir(pki_dir)
            .create_sample_keypair(true)
            .trust_server_certs(false)
            .session_retry_limit(0)
            .session_timeout(session_timeout_ms)
            .client()
            .ok_or_else(|| {
                OpcUaError::connection(ConnectionError::invalid_endpoint(
                    application_uri,
                    "failed to build OPC UA client",
                ))
            })
    }

    fn discovery_client(&self) -> OpcUaResult<Client> {
        self.build_client(
            &self.application_name,
            &self.application_uri,
            &self.product_uri,
            &self.pki_dir,
            60_000,
        )
    }

    fn session(&self) -> OpcUaResult<SharedSession> {
        self.session.clone().ok_or_else(OpcUaError::not_connected)
    }

    /// Runs a blocking session call on the blocking pool.
    async fn blocking<R, F>(&self, op: &'static str, f: F) -> OpcUaResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Session) -> R + Send + 'static,
    {
        let session = self.session()?;
        tokio::task::spawn_blocking(move || {
            let session = session.read();
            f(&session)
        })
        .await
        .map_err(|e| OpcUaError::connection(ConnectionError::closed(format!("{}: {}", op, e))))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    fn to_ua_node_id(node_id: &NodeId) -> ua::NodeId {
        match &node_id.identifier {
            NodeIdentifier::Numeric(v) => ua::NodeId::new(node_id.namespace_index, *v),
            NodeIdentifier::String(v) => ua::NodeId::new(node_id.namespace_index, v.clone()),
            NodeIdentifier::Guid(v) => {
                ua::NodeId::new(node_id.namespace_index, ua::Guid::from_bytes(*v.as_bytes()))
            }
            NodeIdentifier::Opaque(v) => {
                ua::NodeId::new(node_id.namespace_index, ua::ByteString::from(v.as_slice()))
            }
        }
    }

    fn from_ua_node_id(node_id: &ua::NodeId) -> NodeId {
        let ns = node_id.namespace;
        match &node_id.identifier {
            ua::Identifier::Numeric(v) => NodeId::numeric(ns, *v),
            ua::Identifier::String(v) => NodeId::string(ns, v.as_ref()),
            ua::Identifier::Guid(v) => NodeId::guid(ns, uuid::Uuid::from_bytes(*v.as_bytes())),
            ua::Identifier::ByteString(v) => {
                NodeId::opaque(ns, v.value.clone().unwrap_or_default())
            }
        }
    }

    fn from_ua_variant(variant: &ua::Variant) -> OpcUaValue {
        use ua::Variant;

        match variant {
            Variant::Empty => OpcUaValue::Null,
            Variant::Boolean(v) => OpcUaValue::Boolean(*v),
            Variant::SByte(v) => OpcUaValue::SByte(*v),
            Variant::Byte(v) => OpcUaValue::Byte(*v),
            Variant::Int16(v) => OpcUaValue::Int16(*v),
            Variant::UInt16(v) => OpcUaValue::UInt16(*v),
            Variant::Int32(v) => OpcUaValue::Int32(*v),
            Variant::UInt32(v) => OpcUaValue::UInt32(*v),
            Variant::Int64(v) => OpcUaValue::Int64(*v),
            Variant::UInt64(v) => OpcUaValue::UInt64(*v),
            Variant::Float(v) => OpcUaValue::Float(*v),
            Variant::Double(v) => OpcUaValue::Double(*v),
            Variant::String(v) => OpcUaValue::String(v.as_ref().to_string()),
            Variant::DateTime(v) => OpcUaValue::DateTime(v.as_chrono()),
            Variant::Guid(v) => OpcUaValue::Guid(uuid::Uuid::from_bytes(*v.as_bytes())),
            Variant::ByteString(v) => OpcUaValue::ByteString(v.value.clone().unwrap_or_default()),
            Variant::NodeId(v) => OpcUaValue::NodeId(Self::from_ua_node_id(v)),
            Variant::Array(arr) => {
                OpcUaValue::Array(arr.values.iter().map(Self::from_ua_variant).collect())
            }
            other => OpcUaValue::String(format!("{:?}", other)),
        }
    }

    fn to_ua_variant(value: &OpcUaValue) -> ua::Variant {
        use ua::Variant;

        match value {
            OpcUaValue::Null => Variant::Empty,
            OpcUaValue::Boolean(v) => Variant::Boolean(*v),
            OpcUaValue::SByte(v) => Variant::SByte(*v),
            OpcUaValue::Byte(v) => Variant::Byte(*v),
            OpcUaValue::Int16(v) => Variant::Int16(*v),
            OpcUaValue::UInt16(v) => Variant::UInt16(*v),
            OpcUaValue::Int32(v) => Variant::Int32(*v),
            OpcUaValue::UInt32(v) => Variant::UInt32(*v),
            OpcUaValue::Int64(v) => Variant::Int64(*v),
            OpcUaValue::UInt64(v) => Variant::UInt64(*v),
            OpcUaValue::Float(v) => Variant::Float(*v),
            OpcUaValue::Double(v) => Variant::Double(*v),
            OpcUaValue::String(v) => Variant::String(ua::UAString::from(v.as_str())),
            OpcUaValue::DateTime(v) => Variant::DateTime(Box::new(ua::DateTime::from(*v))),
            OpcUaValue::Guid(v) => Variant::Guid(Box::new(ua::Guid::from_bytes(*v.as_bytes()))),
            OpcUaValue::ByteString(v) => Variant::ByteString(ua::ByteString::from(v.as_slice())),
            OpcUaValue::NodeId(v) => Variant::NodeId(Box::new(Self::to_ua_node_id(v))),
            OpcUaValue::Array(items) => {
                let variants: Vec<Variant> = items.iter().map(Self::to_ua_variant).collect();
                let element_type = variants
                    .first()
                    .map(|v| v.type_id())
                    .unwrap_or(ua::VariantTypeId::Empty);
                match ua::Array::new(element_type, variants) {
                    Ok(array) => Variant::Array(Box::new(array)),
                    Err(_) => {
                        warn!("Mixed-type array cannot be encoded, writing empty");
                        Variant::Empty
                    }
                }
            }
        }
    }

    fn from_ua_data_value(value: &ua::DataValue) -> DataValue {
        DataValue {
            value: value
                .value
                .as_ref()
                .map(Self::from_ua_variant)
                .unwrap_or_default(),
            status: StatusCode(value.status.map(|s| s.bits()).unwrap_or(0)),
            source_timestamp: value.source_timestamp.as_ref().map(|t| t.as_chrono()),
            server_timestamp: value.server_timestamp.as_ref().map(|t| t.as_chrono()),
        }
    }

    fn from_ua_endpoint(endpoint: &ua::EndpointDescription) -> EndpointDescriptor {
        let security_mode = match endpoint.security_mode {
            ua::MessageSecurityMode::Sign => SecurityMode::Sign,
            ua::MessageSecurityMode::SignAndEncrypt => SecurityMode::SignAndEncrypt,
            _ => SecurityMode::None,
        };
        EndpointDescriptor {
            endpoint_url: endpoint.endpoint_url.as_ref().to_string(),
            security_mode,
            security_policy_uri: endpoint.security_policy_uri.as_ref().to_string(),
            security_level: endpoint.security_level,
            server_certificate: endpoint.server_certificate.value.clone(),
        }
    }

    fn to_ua_security_mode(mode: SecurityMode) -> ua::MessageSecurityMode {
        match mode {
            SecurityMode::None => ua::MessageSecurityMode::None,
            SecurityMode::Sign => ua::MessageSecurityMode::Sign,
            SecurityMode::SignAndEncrypt => ua::MessageSecurityMode::SignAndEncrypt,
        }
    }

    fn identity_token(identity: &UserIdentity) -> OpcUaResult<IdentityToken> {
        match identity {
            UserIdentity::Anonymous => Ok(IdentityToken::Anonymous),
            UserIdentity::UserName { username, password } => {
                Ok(IdentityToken::UserName(username.clone(), password.clone()))
            }
            UserIdentity::Certificate => Err(OpcUaError::security(
                SecurityError::identity_not_supported("Certificate"),
            )),
        }
    }

    fn status_error(op: &str, node_id: &NodeId, status: ua::StatusCode) -> OpcUaError {
        OpcUaError::operation(OperationError::read_failed(
            node_id.to_string(),
            format!("{} failed: {}", op, status),
        ))
    }
}

// =============================================================================
// OpcUaTransport Implementation
// =============================================================================

#[async_trait]
impl OpcUaTransport for OpcUaStackTransport {
    async fn get_endpoints(&self, url: &str) -> OpcUaResult<Vec<EndpointDescriptor>> {
        let client = self.discovery_client()?;
        let target = url.to_string();

        let endpoints = tokio::task::spawn_blocking(move || {
            client.get_server_endpoints_from_url(target.as_str())
        })
        .await
        .map_err(|e| {
            OpcUaError::discovery(DiscoveryError::endpoints_unavailable(url, e.to_string()))
        })?
        .map_err(|status| {
            OpcUaError::discovery(DiscoveryError::endpoints_unavailable(url, status.to_string()))
        })?;

        debug!(url = %url, count = endpoints.len(), "Received endpoints");
        Ok(endpoints.iter().map(Self::from_ua_endpoint).collect())
    }

    async fn find_servers(&self, discovery_url: &str) -> OpcUaResult<Vec<ApplicationDescription>> {
        let mut client = self.discovery_client()?;
        let target = discovery_url.to_string();

        let servers = tokio::task::spawn_blocking(move || client.find_servers(target.as_str()))
            .await
            .map_err(|e| {
                OpcUaError::discovery(DiscoveryError::find_servers_failed(
                    discovery_url,
                    e.to_string(),
                ))
            })?
            .map_err(|status| {
                OpcUaError::discovery(DiscoveryError::find_servers_failed(
                    discovery_url,
                    status.to_string(),
                ))
            })?;

        Ok(servers
            .iter()
            .map(|app| ApplicationDescription {
                application_name: app.application_name.text.as_ref().to_string(),
                application_uri: app.application_uri.as_ref().to_string(),
                product_uri: app.product_uri.as_ref().to_string(),
                discovery_urls: app
                    .discovery_urls
                    .as_ref()
                    .map(|urls| urls.iter().map(|u| u.as_ref().to_string()).collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn open_session(&mut self, request: &SessionRequest) -> OpcUaResult<()> {
        let identity = Self::identity_token(&request.identity)?;
        let mut client = self.build_client(
            &request.application_name,
            &request.application_uri,
            &request.product_uri,
            &request.pki_dir,
            u32::try_from(request.session_timeout.as_millis()).unwrap_or(u32::MAX),
        )?;

        let endpoint = request.endpoint.clone();
        let url = endpoint.endpoint_url.clone();
        let policy_uri = endpoint.security_policy_uri.clone();
        let mode = Self::to_ua_security_mode(endpoint.security_mode);

        info!(endpoint = %endpoint, session = %request.session_name, "Opening OPC UA session");

        let session = tokio::task::spawn_blocking(move || {
            let target: ua::EndpointDescription = (
                url.as_str(),
                policy_uri.as_str(),
                mode,
                UserTokenPolicy::anonymous(),
            )
                .into();
            client.connect_to_endpoint(target, identity)
        })
        .await
        .map_err(|e| OpcUaError::connection(ConnectionError::closed(e.to_string())))?
        .map_err(|status| {
            if status == ua::StatusCode::BadCertificateUntrusted
                || (status == ua::StatusCode::BadSecurityChecksFailed && !endpoint.is_unsecured())
            {
                let der = endpoint.server_certificate.clone().unwrap_or_default();
                return OpcUaError::certificate_untrusted(Certificate::new(der));
            }
            if status == ua::StatusCode::BadUserAccessDenied
                || status == ua::StatusCode::BadIdentityTokenRejected
                || status == ua::StatusCode::BadIdentityTokenInvalid
            {
                return OpcUaError::security(SecurityError::authentication_failed(
                    status.to_string(),
                ));
            }
            OpcUaError::connection(ConnectionError::refused(
                endpoint.endpoint_url.clone(),
                status.to_string(),
            ))
        })?;

        self.session_stop = Some(Session::run_async(session.clone()));
        self.session = Some(session);
        self.handles.write().clear();
        Ok(())
    }

    async fn close_session(&mut self) -> OpcUaResult<()> {
        self.handles.write().clear();
        if let Some(stop) = self.session_stop.take() {
            let _ = stop.send(SessionCommand::Stop);
        }
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || session.read().disconnect())
            .await
            .map_err(|e| OpcUaError::session(SessionError::close_failed(e.to_string())))?;
        info!("OPC UA session closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.read().is_connected())
            .unwrap_or(false)
    }

    async fn keep_alive(&self) -> StatusCode {
        let probe = ReadValueId {
            node_id: Self::to_ua_node_id(&NodeId::SERVER_STATUS_STATE),
            attribute_id: AttributeId::Value.value(),
            index_range: ua::UAString::null(),
            data_encoding: ua::QualifiedName::null(),
        };
        let result = self
            .blocking("keep-alive", move |session| {
                session.read(&[probe], TimestampsToReturn::Neither, 0.0)
            })
            .await;

        match result {
            Ok(Ok(values)) => values
                .first()
                .and_then(|v| v.status)
                .map(|s| StatusCode(s.bits()))
                .unwrap_or(StatusCode::GOOD),
            Ok(Err(status)) => StatusCode(status.bits()),
            Err(_) => StatusCode::BAD_SERVER_NOT_CONNECTED,
        }
    }

    async fn read_value(&self, node_id: &NodeId) -> OpcUaResult<DataValue> {
        let mut values = self.read_attributes(node_id, &[AttributeId::Value]).await?;
        Ok(values
            .pop()
            .unwrap_or_else(|| DataValue::bad(StatusCode::BAD)))
    }

    async fn read_attributes(
        &self,
        node_id: &NodeId,
        attributes: &[AttributeId],
    ) -> OpcUaResult<Vec<DataValue>> {
        trace!(node_id = %node_id, count = attributes.len(), "Reading attributes");

        let ua_node = Self::to_ua_node_id(node_id);
        let requests: Vec<ReadValueId> = attributes
            .iter()
            .map(|attribute| ReadValueId {
                node_id: ua_node.clone(),
                attribute_id: attribute.value(),
                index_range: ua::UAString::null(),
                data_encoding: ua::QualifiedName::null(),
            })
            .collect();

        let values = self
            .blocking("read", move |session| {
                session.read(&requests, TimestampsToReturn::Both, 0.0)
            })
            .await?
            .map_err(|status| Self::status_error("Read", node_id, status))?;

        Ok(values.iter().map(Self::from_ua_data_value).collect())
    }

    async fn write_value(&self, node_id: &NodeId, value: OpcUaValue) -> OpcUaResult<WriteOutcome> {
        trace!(node_id = %node_id, value = %value, "Writing value");

        let request = WriteValue {
            node_id: Self::to_ua_node_id(node_id),
            attribute_id: AttributeId::Value.value(),
            index_range: ua::UAString::null(),
            value: ua::DataValue::value_only(Self::to_ua_variant(&value)),
        };

        let results = self
            .blocking("write", move |session| session.write(&[request]))
            .await?
            .map_err(|status| {
                OpcUaError::operation(OperationError::write_failed(
                    node_id.to_string(),
                    status.to_string(),
                ))
            })?;

        Ok(match results.first() {
            Some(status) if status.is_good() => WriteOutcome::good(),
            Some(status) => WriteOutcome::bad(StatusCode(status.bits()), None),
            None => WriteOutcome::bad(StatusCode::BAD, Some("empty write response".to_string())),
        })
    }

    async fn browse(
        &self,
        node_id: &NodeId,
        filter: &BrowseFilter,
    ) -> OpcUaResult<Vec<ReferenceDescription>> {
        let browse_direction = match filter.direction {
            BrowseDirection::Forward => ua::BrowseDirection::Forward,
            BrowseDirection::Inverse => ua::BrowseDirection::Inverse,
            BrowseDirection::Both => ua::BrowseDirection::Both,
        };

        trace!(node_id = %node_id, direction = ?browse_direction, "Browsing node");

        let description = BrowseDescription {
            node_id: Self::to_ua_node_id(node_id),
            browse_direction,
            reference_type_id: Self::to_ua_node_id(&filter.reference_type),
            include_subtypes: filter.include_subtypes,
            node_class_mask: filter.node_class_mask,
            result_mask: BrowseDescriptionResultMask::all().bits(),
        };

        let results = self
            .blocking("browse", move |session| session.browse(&[description]))
            .await?
            .map_err(|status| {
                OpcUaError::browse(BrowseError::browse_failed(
                    node_id.to_string(),
                    status.to_string(),
                ))
            })?
            .unwrap_or_default();

        let Some(result) = results.first() else {
            return Ok(Vec::new());
        };
        if result.status_code.is_bad() {
            return Err(OpcUaError::browse(BrowseError::browse_failed(
                node_id.to_string(),
                result.status_code.to_string(),
            )));
        }

        Ok(result
            .references
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|r| {
                let node_class = NodeClass::from_value(r.node_class as u32)?;
                let type_definition = Self::from_ua_node_id(&r.type_definition.node_id);
                Some(ReferenceDescription {
                    node_id: Self::from_ua_node_id(&r.node_id.node_id),
                    browse_name: r.browse_name.name.as_ref().to_string(),
                    display_name: r.display_name.text.as_ref().to_string(),
                    node_class,
                    reference_type: Some(Self::from_ua_node_id(&r.reference_type_id)),
                    type_definition: (!type_definition.is_null()).then_some(type_definition),
                })
            })
            .collect())
    }

    async fn create_subscription(
        &mut self,
        settings: &SubscriptionSettings,
        sink: NotificationSink,
    ) -> OpcUaResult<u32> {
        let settings = settings.clone();
        let handles = self.handles.clone();

        let callback = DataChangeCallback::new(move |items| {
            for item in items.iter() {
                let Some(client_handle) = handles.read().get(&item.id()).copied() else {
                    continue;
                };
                sink.deliver(DataChangeNotification {
                    client_handle,
                    value: OpcUaStackTransport::from_ua_data_value(item.last_value()),
                });
            }
        });

        let subscription_id = self
            .blocking("create subscription", move |session| {
                session.create_subscription(
                    settings.publishing_interval.as_millis() as f64,
                    settings.lifetime_count,
                    settings.keepalive_count,
                    settings.max_notifications_per_publish,
                    settings.priority,
                    settings.publishing_enabled,
                    callback,
                )
            })
            .await?
            .map_err(|status| {
                OpcUaError::subscription(SubscriptionError::creation_failed(status.to_string()))
            })?;

        info!(subscription_id, "Created subscription");
        Ok(subscription_id)
    }

    async fn delete_subscription(&mut self, subscription_id: u32) -> OpcUaResult<()> {
        self.handles.write().clear();
        self.blocking("delete subscription", move |session| {
            session.delete_subscription(subscription_id)
        })
        .await?
        .map_err(|status| {
            OpcUaError::subscription(SubscriptionError::deletion_failed(
                subscription_id,
                status.to_string(),
            ))
        })?;

        info!(subscription_id, "Deleted subscription");
        Ok(())
    }

    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<MonitoredItemResult>> {
        let requests: Vec<MonitoredItemCreateRequest> = items
            .iter()
            .map(|item| MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId {
                    node_id: Self::to_ua_node_id(&item.node_id),
                    attribute_id: item.attribute.value(),
                    index_range: ua::UAString::null(),
                    data_encoding: ua::QualifiedName::null(),
                },
                monitoring_mode: MonitoringMode::Reporting,
                requested_parameters: MonitoringParameters {
                    client_handle: item.client_handle,
                    sampling_interval: item.sampling_interval.as_millis() as f64,
                    filter: ua::ExtensionObject::null(),
                    queue_size: item.queue_size,
                    discard_oldest: item.discard_oldest,
                },
            })
            .collect();

        trace!(subscription_id, count = items.len(), "Creating monitored items");

        let results = self
            .blocking("create monitored items", move |session| {
                session.create_monitored_items(subscription_id, TimestampsToReturn::Both, &requests)
            })
            .await?
            .map_err(|status| {
                OpcUaError::subscription(SubscriptionError::monitored_item_failed(
                    "batch",
                    status.to_string(),
                ))
            })?;

        let mut handles = self.handles.write();
        Ok(items
            .iter()
            .zip(results.iter())
            .map(|(item, result)| {
                if result.status_code.is_good() {
                    handles.insert(result.monitored_item_id, item.client_handle);
                }
                MonitoredItemResult {
                    client_handle: item.client_handle,
                    monitored_item_id: result.monitored_item_id,
                    status: StatusCode(result.status_code.bits()),
                }
            })
            .collect())
    }

    async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: &[u32],
    ) -> OpcUaResult<()> {
        if monitored_item_ids.is_empty() {
            return Ok(());
        }
        {
            let mut handles = self.handles.write();
            for id in monitored_item_ids {
                handles.remove(id);
            }
        }

        let ids = monitored_item_ids.to_vec();
        self.blocking("delete monitored items", move |session| {
            session.delete_monitored_items(subscription_id, &ids)
        })
        .await?
        .map_err(|status| {
            OpcUaError::subscription(SubscriptionError::monitored_item_failed(
                "batch",
                status.to_string(),
            ))
        })?;
        Ok(())
    }

    fn display_name(&self) -> String {
        format!("OpcUaStackTransport({})", self.application_name)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_conversion() {
        let ids = [
            NodeId::numeric(0, 85),
            NodeId::string(2, "Line1.Speed"),
            NodeId::guid(3, uuid::Uuid::nil()),
            NodeId::opaque(4, vec![1, 2, 3]),
        ];
        for id in ids {
            let ua_id = OpcUaStackTransport::to_ua_node_id(&id);
            assert_eq!(OpcUaStackTransport::from_ua_node_id(&ua_id), id);
        }
    }

    #[test]
    fn test_value_conversion() {
        let variant = OpcUaStackTransport::to_ua_variant(&OpcUaValue::Int16(-7));
        assert_eq!(OpcUaStackTransport::from_ua_variant(&variant), OpcUaValue::Int16(-7));

        let variant =
            OpcUaStackTransport::to_ua_variant(&OpcUaValue::NodeId(NodeId::numeric(0, 11)));
        assert_eq!(
            OpcUaStackTransport::from_ua_variant(&variant),
            OpcUaValue::NodeId(NodeId::numeric(0, 11))
        );

        assert_eq!(
            OpcUaStackTransport::from_ua_variant(&ua::Variant::Empty),
            OpcUaValue::Null
        );
    }

    #[test]
    fn test_certificate_identity_rejected() {
        assert!(OpcUaStackTransport::identity_token(&UserIdentity::Certificate).is_err());
        assert!(matches!(
            OpcUaStackTransport::identity_token(&UserIdentity::Anonymous),
            Ok(IdentityToken::Anonymous)
        ));
    }

    #[test]
    fn test_not_connected_without_session() {
        let transport = OpcUaStackTransport::new(&ClientConfig::default());
        assert!(!transport.is_connected());
        assert!(transport.display_name().starts_with("OpcUaStackTransport"));
    }
}
