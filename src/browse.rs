// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Address-space browsing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    AddressSpaceBrowser                          │
//! │   browse(parent) ──▶ transport.browse(HierarchicalReferences)   │
//! │                      + per-variable value/DataType/AccessLevel  │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Arc<NodeInfo>                               │
//! │   immutable identity + independently replaced mutable fields    │
//! │   (value snapshot, data type, writable, children, loaded flag)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A browse either returns every child or nothing: transport failures yield
//! an empty list. Enrichment of a single variable is best effort and never
//! affects its siblings.
//!
//! Nodes are shared as `Arc<NodeInfo>`. Subscription callbacks replace the
//! value snapshot while callers read it; each field sits behind its own lock
//! so a reader never observes a half-written field.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::client::{
    data_type_name, format_value, quality_text, with_timeout, BrowseFilter, DataValue,
    OpcUaTransport, OpcUaValue, ReferenceDescription,
};
use crate::error::OpcUaResult;
use crate::types::{access_level, AttributeId, NodeClass, NodeId, StatusCode};

// =============================================================================
// NodeValue
// =============================================================================

/// Last known value of a variable node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeValue {
    /// The value.
    pub value: OpcUaValue,
    /// Status of the value; `None` until the first read or notification.
    pub status: Option<StatusCode>,
    /// Source timestamp, falling back to the server timestamp.
    pub timestamp: Option<DateTime<Utc>>,
}

impl NodeValue {
    /// Returns the quality text, or an empty string if never read.
    pub fn quality(&self) -> String {
        self.status.map(quality_text).unwrap_or_default()
    }
}

impl From<&DataValue> for NodeValue {
    fn from(data: &DataValue) -> Self {
        Self {
            value: data.value.clone(),
            status: Some(data.status),
            timestamp: data.timestamp(),
        }
    }
}

// =============================================================================
// NodeInfo
// =============================================================================

/// A browsed address-space entry.
pub struct NodeInfo {
    node_id: NodeId,
    browse_name: String,
    display_name: String,
    node_class: NodeClass,
    has_children: bool,

    data_type: RwLock<Option<String>>,
    writable: AtomicBool,
    value: RwLock<NodeValue>,
    children: RwLock<Vec<Arc<NodeInfo>>>,
    is_loaded: AtomicBool,
}

impl NodeInfo {
    /// Creates a node with no value, data type or children.
    pub fn new(
        node_id: NodeId,
        browse_name: impl Into<String>,
        display_name: impl Into<String>,
        node_class: NodeClass,
        has_children: bool,
    ) -> Self {
        Self {
            node_id,
            browse_name: browse_name.into(),
            display_name: display_name.into(),
            node_class,
            has_children,
            data_type: RwLock::new(None),
            writable: AtomicBool::new(false),
            value: RwLock::new(NodeValue::default()),
            children: RwLock::new(Vec::new()),
            is_loaded: AtomicBool::new(false),
        }
    }

    fn from_reference(reference: &ReferenceDescription) -> Self {
        let has_children = reference
            .type_definition
            .as_ref()
            .is_some_and(|type_definition| !type_definition.is_null());
        Self::new(
            reference.node_id.clone(),
            reference.browse_name.clone(),
            reference.display_name.clone(),
            reference.node_class,
            has_children,
        )
    }

    /// Returns the node id.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Returns the browse name.
    pub fn browse_name(&self) -> &str {
        &self.browse_name
    }

    /// Returns the display name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the node class.
    pub fn node_class(&self) -> NodeClass {
        self.node_class
    }

    /// Returns `true` if the node has a type definition and may have children.
    pub fn has_children(&self) -> bool {
        self.has_children
    }

    /// Returns `true` for variable nodes.
    pub fn is_variable(&self) -> bool {
        self.node_class == NodeClass::Variable
    }

    /// Returns `true` for nodes shown as folders.
    pub fn is_folder(&self) -> bool {
        matches!(self.node_class, NodeClass::Object | NodeClass::ObjectType)
    }

    /// Returns the declared data type name.
    pub fn data_type(&self) -> Option<String> {
        self.data_type.read().clone()
    }

    /// Sets the declared data type name.
    pub fn set_data_type(&self, data_type: impl Into<String>) {
        *self.data_type.write() = Some(data_type.into());
    }

    /// Returns `true` if the current-write access bit is set.
    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    /// Sets the writable flag.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::Release);
    }

    /// Returns a snapshot of the value.
    pub fn value(&self) -> NodeValue {
        self.value.read().clone()
    }

    /// Returns the value formatted for display.
    pub fn value_text(&self) -> String {
        format_value(&self.value.read().value)
    }

    /// Replaces value, status and timestamp in one step.
    pub fn update(&self, data: &DataValue) {
        *self.value.write() = NodeValue::from(data);
    }

    /// Returns the loaded children.
    pub fn children(&self) -> Vec<Arc<NodeInfo>> {
        self.children.read().clone()
    }

    /// Returns `true` once children were fetched.
    pub fn is_loaded(&self) -> bool {
        self.is_loaded.load(Ordering::Acquire)
    }

    /// Stores children unless another caller already did. Returns the
    /// children now held by the node.
    pub fn set_children(&self, children: Vec<Arc<NodeInfo>>) -> Vec<Arc<NodeInfo>> {
        let mut current = self.children.write();
        if !self.is_loaded.load(Ordering::Acquire) {
            *current = children;
            self.is_loaded.store(true, Ordering::Release);
        }
        current.clone()
    }
}

impl fmt::Debug for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInfo")
            .field("node_id", &self.node_id)
            .field("display_name", &self.display_name)
            .field("node_class", &self.node_class)
            .field("has_children", &self.has_children)
            .field("data_type", &*self.data_type.read())
            .field("value", &*self.value.read())
            .field("is_loaded", &self.is_loaded())
            .finish()
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.node_id)
    }
}

// =============================================================================
// AddressSpaceBrowser
// =============================================================================

/// Browses the server address space on demand.
pub struct AddressSpaceBrowser<T: OpcUaTransport> {
    transport: Arc<Mutex<T>>,
    filter: BrowseFilter,
    operation_timeout: Duration,
}

impl<T: OpcUaTransport> AddressSpaceBrowser<T> {
    /// Creates a browser with the hierarchical Object/Variable/Method filter.
    pub fn new(transport: Arc<Mutex<T>>, operation_timeout: Duration) -> Self {
        Self {
            transport,
            filter: BrowseFilter::hierarchical(),
            operation_timeout,
        }
    }

    /// Returns the browse filter.
    pub fn filter(&self) -> &BrowseFilter {
        &self.filter
    }

    /// Browses the children of `parent`, or of the Objects folder.
    ///
    /// Returns an empty list on failure.
    pub async fn browse(&self, parent: Option<&NodeId>) -> Vec<Arc<NodeInfo>> {
        let objects = NodeId::OBJECTS_FOLDER;
        let parent = parent.unwrap_or(&objects);
        match self.try_browse(parent).await {
            Ok(nodes) => nodes,
            Err(e) => {
                e.log("browse");
                Vec::new()
            }
        }
    }

    /// Browses the children of `parent`, reporting failures.
    pub async fn try_browse(&self, parent: &NodeId) -> OpcUaResult<Vec<Arc<NodeInfo>>> {
        let references = with_timeout(self.operation_timeout, "browse", async {
            self.transport.lock().await.browse(parent, &self.filter).await
        })
        .await?;

        let mut nodes = Vec::with_capacity(references.len());
        for reference in &references {
            let node = NodeInfo::from_reference(reference);
            if node.is_variable() {
                self.enrich(&node).await;
            }
            nodes.push(Arc::new(node));
        }

        tracing::debug!(parent = %parent, count = nodes.len(), "Browsed node");
        Ok(nodes)
    }

    /// Returns the folder children of `node`, fetching them at most once.
    pub async fn expand(&self, node: &NodeInfo) -> Vec<Arc<NodeInfo>> {
        if node.is_loaded() {
            tracing::trace!(node_id = %node.node_id(), "Children already loaded");
            return node.children();
        }

        match self.try_browse(node.node_id()).await {
            Ok(children) => {
                let folders = children.into_iter().filter(|c| c.is_folder()).collect();
                node.set_children(folders)
            }
            Err(e) => {
                e.log("expand");
                Vec::new()
            }
        }
    }

    /// Re-reads the value of a variable node into it.
    pub async fn refresh(&self, node: &NodeInfo) -> OpcUaResult<()> {
        let value = with_timeout(self.operation_timeout, "read", async {
            self.transport.lock().await.read_value(node.node_id()).await
        })
        .await?;
        node.update(&value);
        Ok(())
    }

    /// Reads value, data type and access level. Failures leave fields empty.
    async fn enrich(&self, node: &NodeInfo) {
        match self.refresh(node).await {
            Ok(()) => {}
            Err(e) => {
                tracing::debug!(node_id = %node.node_id(), error = %e, "Value read failed");
                return;
            }
        }

        let attributes = with_timeout(self.operation_timeout, "read", async {
            self.transport
                .lock()
                .await
                .read_attributes(
                    node.node_id(),
                    &[AttributeId::DataType, AttributeId::AccessLevel],
                )
                .await
        })
        .await;

        let attributes = match attributes {
            Ok(attributes) => attributes,
            Err(e) => {
                tracing::debug!(node_id = %node.node_id(), error = %e, "Attribute read failed");
                return;
            }
        };

        if let Some(data_type) = attributes.first().filter(|dv| dv.is_good()) {
            node.set_data_type(data_type_name(data_type.value.as_node_id()));
        }
        if let Some(level) = attributes
            .get(1)
            .filter(|dv| dv.is_good())
            .and_then(|dv| dv.value.as_i64())
        {
            node.set_writable(level as u8 & access_level::CURRENT_WRITE != 0);
        }
    }
}

impl<T: OpcUaTransport> fmt::Debug for AddressSpaceBrowser<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpaceBrowser")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
