// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription engine.
//!
//! One subscription per session. Each monitored item owns a bounded queue
//! and a dispatcher task:
//!
//! ```text
//! transport thread ──deliver──▶ NotificationRouter ──▶ ItemChannel (bounded, discard-oldest)
//!                                                           │
//!                                                           ▼
//!                                                  dispatcher task ──▶ callback
//! ```
//!
//! The transport never blocks on a slow callback. Values of one item reach
//! its callback in delivery order; there is no ordering across items. Once a
//! subscription is torn down its router is closed and late deliveries are
//! dropped.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use super::transport::{
    DataChangeNotification, DataValue, MonitoredItemRequest, NotificationSink, OpcUaTransport,
};
use super::with_timeout;
use crate::config::{MonitoredItemSettings, SubscriptionSettings};
use crate::error::{OpcUaError, OpcUaResult, SubscriptionError};
use crate::types::{AttributeId, NodeId};

// =============================================================================
// Callbacks
// =============================================================================

/// Callback invoked for each data change of one monitored item.
///
/// Runs on a runtime worker, never on the caller's task. Shared state must be
/// synchronized by the callback itself.
pub type DataChangeCallback = Arc<dyn Fn(&NodeId, &DataValue) + Send + Sync>;

/// Creates a callback that forwards changes into a bounded channel.
///
/// Changes are dropped when the receiver lags behind by `capacity` values.
pub fn channel_callback(
    capacity: usize,
) -> (DataChangeCallback, mpsc::Receiver<(NodeId, DataValue)>) {
    let (tx, rx) = mpsc::channel(capacity);
    let callback: DataChangeCallback = Arc::new(move |node_id: &NodeId, value: &DataValue| {
        if tx.try_send((node_id.clone(), value.clone())).is_err() {
            tracing::trace!(node_id = %node_id, "Channel callback full, change dropped");
        }
    });
    (callback, rx)
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters for the subscription engine.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    subscriptions_created: AtomicU64,
    items_created: AtomicU64,
    notifications_received: AtomicU64,
    notifications_delivered: AtomicU64,
    notifications_dropped: AtomicU64,
    notifications_after_teardown: AtomicU64,
}

impl SubscriptionStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions created.
    pub fn subscriptions_created(&self) -> u64 {
        self.subscriptions_created.load(Ordering::Relaxed)
    }

    /// Number of monitored items created.
    pub fn items_created(&self) -> u64 {
        self.items_created.load(Ordering::Relaxed)
    }

    /// Notifications accepted from the transport.
    pub fn notifications_received(&self) -> u64 {
        self.notifications_received.load(Ordering::Relaxed)
    }

    /// Notifications handed to callbacks.
    pub fn notifications_delivered(&self) -> u64 {
        self.notifications_delivered.load(Ordering::Relaxed)
    }

    /// Notifications discarded by a full queue.
    pub fn notifications_dropped(&self) -> u64 {
        self.notifications_dropped.load(Ordering::Relaxed)
    }

    /// Notifications that arrived after their subscription was torn down.
    pub fn notifications_after_teardown(&self) -> u64 {
        self.notifications_after_teardown.load(Ordering::Relaxed)
    }
}

// =============================================================================
// ItemChannel
// =============================================================================

/// Bounded queue between the transport and one item's dispatcher.
struct ItemChannel {
    node_id: NodeId,
    queue: SyncMutex<VecDeque<DataValue>>,
    capacity: usize,
    discard_oldest: bool,
    notify: Notify,
    closed: AtomicBool,
}

impl ItemChannel {
    fn new(node_id: NodeId, settings: &MonitoredItemSettings) -> Self {
        Self {
            node_id,
            queue: SyncMutex::new(VecDeque::with_capacity(settings.queue_size as usize)),
            capacity: settings.queue_size.max(1) as usize,
            discard_oldest: settings.discard_oldest,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues a value. Returns `false` if a value was discarded.
    fn push(&self, value: DataValue) -> bool {
        let mut queue = self.queue.lock();
        let mut kept_all = true;
        if queue.len() >= self.capacity {
            kept_all = false;
            if self.discard_oldest {
                queue.pop_front();
            } else {
                return false;
            }
        }
        queue.push_back(value);
        drop(queue);
        self.notify.notify_one();
        kept_all
    }

    fn drain(&self) -> Vec<DataValue> {
        self.queue.lock().drain(..).collect()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.queue.lock().clear();
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn dispatch(
    channel: Arc<ItemChannel>,
    callback: DataChangeCallback,
    stats: Arc<SubscriptionStats>,
) {
    loop {
        channel.notify.notified().await;
        if channel.is_closed() {
            break;
        }
        for value in channel.drain() {
            if channel.is_closed() {
                return;
            }
            callback(&channel.node_id, &value);
            stats.notifications_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
    tracing::trace!(node_id = %channel.node_id, "Dispatcher stopped");
}

// =============================================================================
// NotificationRouter
// =============================================================================

/// Routes transport deliveries to item channels by client handle.
struct NotificationRouter {
    closed: AtomicBool,
    channels: RwLock<HashMap<u32, Arc<ItemChannel>>>,
    next_handle: AtomicU32,
    stats: Arc<SubscriptionStats>,
}

impl NotificationRouter {
    fn new(stats: Arc<SubscriptionStats>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            channels: RwLock::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
            stats,
        }
    }

    fn sink(self: &Arc<Self>) -> NotificationSink {
        let router = Arc::clone(self);
        NotificationSink::new(move |notification| router.route(notification))
    }

    fn route(&self, notification: DataChangeNotification) {
        if self.closed.load(Ordering::SeqCst) {
            self.stats
                .notifications_after_teardown
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        let channel = self.channels.read().get(&notification.client_handle).cloned();
        match channel {
            Some(channel) if !channel.is_closed() => {
                self.stats.notifications_received.fetch_add(1, Ordering::Relaxed);
                if !channel.push(notification.value) {
                    self.stats.notifications_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            _ => {
                tracing::trace!(
                    client_handle = notification.client_handle,
                    "Notification for unknown monitored item"
                );
            }
        }
    }

    fn register(&self, channel: Arc<ItemChannel>) -> u32 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.channels.write().insert(handle, channel);
        handle
    }

    fn unregister(&self, handle: u32) {
        if let Some(channel) = self.channels.write().remove(&handle) {
            channel.close();
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for (_, channel) in self.channels.write().drain() {
            channel.close();
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// One monitored item attached to the current subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredItemInfo {
    /// Server-assigned id.
    pub monitored_item_id: u32,
    /// Client handle used for routing.
    pub client_handle: u32,
    /// Monitored node.
    pub node_id: NodeId,
}

struct MonitoredItem {
    info: MonitoredItemInfo,
    dispatcher: JoinHandle<()>,
}

/// The live subscription of a session.
struct Subscription {
    id: u32,
    settings: SubscriptionSettings,
    router: Arc<NotificationRouter>,
    items: Vec<MonitoredItem>,
}

impl Subscription {
    /// Stops local delivery. Late transport deliveries become no-ops.
    fn shutdown_local(&mut self) {
        self.router.close();
        for item in self.items.drain(..) {
            item.dispatcher.abort();
        }
    }
}

// =============================================================================
// SubscriptionEngine
// =============================================================================

/// Owns the single subscription of a session and its monitored items.
///
/// All operations serialize on an internal lock, so a create cannot overlap
/// the deletion of the previous subscription.
pub struct SubscriptionEngine<T: OpcUaTransport> {
    transport: Arc<Mutex<T>>,
    settings: SubscriptionSettings,
    item_settings: MonitoredItemSettings,
    operation_timeout: Duration,
    current: Mutex<Option<Subscription>>,
    stats: Arc<SubscriptionStats>,
}

impl<T: OpcUaTransport + 'static> SubscriptionEngine<T> {
    /// Creates an engine with default subscription and item settings.
    pub fn new(
        transport: Arc<Mutex<T>>,
        settings: SubscriptionSettings,
        item_settings: MonitoredItemSettings,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            settings,
            item_settings,
            operation_timeout,
            current: Mutex::new(None),
            stats: Arc::new(SubscriptionStats::new()),
        }
    }

    /// Returns the engine counters.
    pub fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }

    /// Returns the current subscription id.
    pub async fn subscription_id(&self) -> Option<u32> {
        self.current.lock().await.as_ref().map(|sub| sub.id)
    }

    /// Returns `true` if a subscription exists.
    pub async fn has_subscription(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Returns the publishing interval of the current subscription.
    pub async fn publishing_interval(&self) -> Option<Duration> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|sub| sub.settings.publishing_interval)
    }

    /// Returns the monitored items of the current subscription.
    pub async fn monitored_items(&self) -> Vec<MonitoredItemInfo> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|sub| sub.items.iter().map(|item| item.info.clone()).collect())
            .unwrap_or_default()
    }

    /// Creates the session's subscription, replacing any existing one.
    ///
    /// On failure no subscription remains.
    pub async fn create_subscription(&self, publishing_interval: Duration) -> OpcUaResult<u32> {
        let mut current = self.current.lock().await;

        if let Some(mut old) = current.take() {
            tracing::debug!(subscription_id = old.id, "Replacing existing subscription");
            old.shutdown_local();
            if let Err(e) = self.delete_on_server(old.id).await {
                e.log("delete previous subscription");
            }
        }

        let settings = SubscriptionSettings {
            publishing_interval,
            ..self.settings.clone()
        };
        settings.validate()?;

        let router = Arc::new(NotificationRouter::new(Arc::clone(&self.stats)));
        let sink = router.sink();

        let id = with_timeout(self.operation_timeout, "create_subscription", async {
            self.transport
                .lock()
                .await
                .create_subscription(&settings, sink)
                .await
        })
        .await
        .map_err(|e| {
            router.close();
            match e {
                OpcUaError::Subscription(_) | OpcUaError::Timeout(_) => e,
                other => OpcUaError::subscription(SubscriptionError::creation_failed(
                    other.to_string(),
                )),
            }
        })?;

        self.stats.subscriptions_created.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            subscription_id = id,
            publishing_interval_ms = publishing_interval.as_millis() as u64,
            keepalive_count = settings.keepalive_count,
            lifetime_count = settings.lifetime_count,
            "Subscription created"
        );

        *current = Some(Subscription {
            id,
            settings,
            router,
            items: Vec::new(),
        });
        Ok(id)
    }

    /// Attaches a monitored item for the node's value.
    ///
    /// Returns the server-assigned monitored item id. A failed attach leaves
    /// the subscription and its other items untouched.
    pub async fn add_monitored_item(
        &self,
        node_id: &NodeId,
        callback: DataChangeCallback,
    ) -> OpcUaResult<u32> {
        let mut current = self.current.lock().await;
        let subscription = current
            .as_mut()
            .ok_or_else(|| OpcUaError::subscription(SubscriptionError::NoSubscription))?;

        let channel = Arc::new(ItemChannel::new(node_id.clone(), &self.item_settings));
        let client_handle = subscription.router.register(Arc::clone(&channel));

        let request = MonitoredItemRequest {
            node_id: node_id.clone(),
            attribute: AttributeId::Value,
            client_handle,
            sampling_interval: self.item_settings.sampling_interval,
            queue_size: self.item_settings.queue_size,
            discard_oldest: self.item_settings.discard_oldest,
        };

        let subscription_id = subscription.id;
        let result = with_timeout(self.operation_timeout, "create_monitored_items", async {
            self.transport
                .lock()
                .await
                .create_monitored_items(subscription_id, std::slice::from_ref(&request))
                .await
        })
        .await
        .and_then(|results| {
            results
                .into_iter()
                .next()
                .ok_or_else(|| OpcUaError::subscription(SubscriptionError::monitored_item_failed(
                    node_id.to_string(),
                    "server returned no result",
                )))
        })
        .and_then(|result| {
            if result.status.is_good() {
                Ok(result)
            } else {
                Err(OpcUaError::subscription(SubscriptionError::monitored_item_failed(
                    node_id.to_string(),
                    result.status.name(),
                )))
            }
        });

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                subscription.router.unregister(client_handle);
                let e = match e {
                    OpcUaError::Subscription(_) | OpcUaError::Timeout(_) => e,
                    other => OpcUaError::subscription(SubscriptionError::monitored_item_failed(
                        node_id.to_string(),
                        other.to_string(),
                    )),
                };
                return Err(e);
            }
        };

        let dispatcher = tokio::spawn(dispatch(channel, callback, Arc::clone(&self.stats)));
        let info = MonitoredItemInfo {
            monitored_item_id: result.monitored_item_id,
            client_handle,
            node_id: node_id.clone(),
        };
        subscription.items.push(MonitoredItem {
            info,
            dispatcher,
        });
        self.stats.items_created.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            subscription_id,
            node_id = %node_id,
            monitored_item_id = result.monitored_item_id,
            "Monitored item added"
        );
        Ok(result.monitored_item_id)
    }

    /// Detaches every monitored item but keeps the subscription.
    ///
    /// Local delivery stops even if the server call fails.
    pub async fn remove_all_monitored_items(&self) -> OpcUaResult<()> {
        let mut current = self.current.lock().await;
        let Some(subscription) = current.as_mut() else {
            return Ok(());
        };
        if subscription.items.is_empty() {
            return Ok(());
        }

        let items: Vec<MonitoredItem> = subscription.items.drain(..).collect();
        let ids: Vec<u32> = items.iter().map(|item| item.info.monitored_item_id).collect();
        for item in items {
            subscription.router.unregister(item.info.client_handle);
            item.dispatcher.abort();
        }

        let subscription_id = subscription.id;
        let count = ids.len();
        with_timeout(self.operation_timeout, "delete_monitored_items", async {
            self.transport
                .lock()
                .await
                .delete_monitored_items(subscription_id, &ids)
                .await
        })
        .await?;

        tracing::debug!(subscription_id, count, "Removed all monitored items");
        Ok(())
    }

    /// Deletes the subscription. Local state is released even if the
    /// server call fails.
    pub async fn delete_subscription(&self) -> OpcUaResult<()> {
        let mut current = self.current.lock().await;
        let Some(mut subscription) = current.take() else {
            return Ok(());
        };
        subscription.shutdown_local();
        self.delete_on_server(subscription.id).await?;
        tracing::info!(subscription_id = subscription.id, "Subscription deleted");
        Ok(())
    }

    /// Drops local subscription state without contacting the server.
    ///
    /// Used when the session is already gone.
    pub async fn discard(&self) {
        if let Some(mut subscription) = self.current.lock().await.take() {
            subscription.shutdown_local();
            tracing::debug!(subscription_id = subscription.id, "Subscription discarded");
        }
    }

    async fn delete_on_server(&self, subscription_id: u32) -> OpcUaResult<()> {
        with_timeout(self.operation_timeout, "delete_subscription", async {
            self.transport
                .lock()
                .await
                .delete_subscription(subscription_id)
                .await
        })
        .await
    }
}

impl<T: OpcUaTransport> fmt::Debug for SubscriptionEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("settings", &self.settings)
            .field("item_settings", &self.item_settings)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::transport::{OpcUaValue, SessionRequest};
    use crate::types::{EndpointDescriptor, UserIdentity};

    async fn connected_engine() -> (MockTransport, SubscriptionEngine<MockTransport>) {
        let mock = MockTransport::new();
        let mut transport = mock.clone();
        transport
            .open_session(&SessionRequest {
                endpoint: EndpointDescriptor::unsecured("opc.tcp://mock:4840"),
                identity: UserIdentity::Anonymous,
                session_timeout: Duration::from_secs(60),
                application_name: "test".into(),
                application_uri: "urn:test".into(),
                product_uri: "urn:test".into(),
                pki_dir: std::env::temp_dir(),
                session_name: "test".into(),
            })
            .await
            .unwrap();

        let engine = SubscriptionEngine::new(
            Arc::new(Mutex::new(transport)),
            SubscriptionSettings::default(),
            MonitoredItemSettings {
                queue_size: 2,
                ..Default::default()
            },
            Duration::from_secs(5),
        );
        (mock, engine)
    }

    fn counting_callback() -> (DataChangeCallback, Arc<SyncMutex<Vec<OpcUaValue>>>) {
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: DataChangeCallback = Arc::new(move |_node: &NodeId, value: &DataValue| {
            sink.lock().push(value.value.clone());
        });
        (callback, seen)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_add_requires_subscription() {
        let (_mock, engine) = connected_engine().await;
        let (callback, _) = counting_callback();
        let err = engine
            .add_monitored_item(&NodeId::numeric(2, 1), callback)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OpcUaError::Subscription(SubscriptionError::NoSubscription)
        ));
    }

    #[tokio::test]
    async fn test_notifications_preserve_item_order() {
        let (mock, engine) = connected_engine().await;
        let node = NodeId::string(2, "Counter");
        mock.set_value(&node, OpcUaValue::Int32(0));

        engine.create_subscription(Duration::from_millis(300)).await.unwrap();
        let (callback, seen) = counting_callback();
        engine.add_monitored_item(&node, callback).await.unwrap();

        for i in 1..=2 {
            mock.notify(&node, DataValue::good(OpcUaValue::Int32(i)));
            settle().await;
        }
        assert_eq!(
            *seen.lock(),
            vec![OpcUaValue::Int32(1), OpcUaValue::Int32(2)]
        );
        assert_eq!(engine.stats().notifications_delivered(), 2);
    }

    #[tokio::test]
    async fn test_queue_discards_oldest() {
        let channel = ItemChannel::new(
            NodeId::numeric(2, 1),
            &MonitoredItemSettings {
                queue_size: 2,
                ..Default::default()
            },
        );
        assert!(channel.push(DataValue::good(OpcUaValue::Int32(1))));
        assert!(channel.push(DataValue::good(OpcUaValue::Int32(2))));
        assert!(!channel.push(DataValue::good(OpcUaValue::Int32(3))));

        let values: Vec<OpcUaValue> = channel.drain().into_iter().map(|v| v.value).collect();
        assert_eq!(values, vec![OpcUaValue::Int32(2), OpcUaValue::Int32(3)]);
    }

    #[tokio::test]
    async fn test_remove_all_keeps_subscription() {
        let (mock, engine) = connected_engine().await;
        let node = NodeId::string(2, "Temp");
        mock.set_value(&node, OpcUaValue::Double(20.0));

        let id = engine.create_subscription(Duration::from_millis(1000)).await.unwrap();
        let (callback, seen) = counting_callback();
        engine.add_monitored_item(&node, Arc::clone(&callback)).await.unwrap();

        engine.remove_all_monitored_items().await.unwrap();
        assert_eq!(engine.subscription_id().await, Some(id));
        assert_eq!(mock.monitored_item_count(id), 0);

        // Old handle is gone; nothing reaches the callback.
        mock.notify_all_sinks(1, DataValue::good(OpcUaValue::Double(21.0)));
        settle().await;
        assert!(seen.lock().is_empty());

        engine.add_monitored_item(&node, callback).await.unwrap();
        assert_eq!(mock.monitored_item_count(id), 1);
        assert_eq!(mock.subscription_ids(), vec![id]);
    }

    #[tokio::test]
    async fn test_create_replaces_existing() {
        let (mock, engine) = connected_engine().await;
        let first = engine.create_subscription(Duration::from_millis(1000)).await.unwrap();
        let second = engine.create_subscription(Duration::from_millis(500)).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(mock.subscription_ids(), vec![second]);
        assert_eq!(
            engine.publishing_interval().await,
            Some(Duration::from_millis(500))
        );
    }

    #[tokio::test]
    async fn test_creation_failure_leaves_none() {
        let (mock, engine) = connected_engine().await;
        engine.create_subscription(Duration::from_millis(1000)).await.unwrap();

        mock.fail_subscription_creation(true);
        let err = engine
            .create_subscription(Duration::from_millis(1000))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "subscription");
        assert!(!engine.has_subscription().await);
        assert!(mock.subscription_ids().is_empty());
    }

    #[tokio::test]
    async fn test_failed_item_is_rolled_back() {
        let (mock, engine) = connected_engine().await;
        engine.create_subscription(Duration::from_millis(1000)).await.unwrap();

        let (callback, _) = counting_callback();
        let err = engine
            .add_monitored_item(&NodeId::string(2, "Missing"), callback)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OpcUaError::Subscription(SubscriptionError::MonitoredItemFailed { .. })
        ));
        assert!(engine.monitored_items().await.is_empty());
        assert!(engine.has_subscription().await);
        drop(mock);
    }

    #[tokio::test]
    async fn test_late_delivery_after_delete_is_ignored() {
        let (mock, engine) = connected_engine().await;
        let node = NodeId::string(2, "Level");
        mock.set_value(&node, OpcUaValue::Int32(1));

        engine.create_subscription(Duration::from_millis(1000)).await.unwrap();
        let (callback, seen) = counting_callback();
        engine.add_monitored_item(&node, callback).await.unwrap();

        engine.delete_subscription().await.unwrap();
        assert_eq!(mock.notify_all_sinks(1, DataValue::good(OpcUaValue::Int32(5))), 1);
        settle().await;

        assert!(seen.lock().is_empty());
        assert_eq!(engine.stats().notifications_after_teardown(), 1);
        assert!(!engine.has_subscription().await);
    }

    #[tokio::test]
    async fn test_channel_callback() {
        let (callback, mut rx) = channel_callback(1);
        let node = NodeId::numeric(2, 7);
        callback(&node, &DataValue::good(OpcUaValue::Boolean(true)));
        callback(&node, &DataValue::good(OpcUaValue::Boolean(false)));

        let (received_node, value) = rx.recv().await.unwrap();
        assert_eq!(received_node, node);
        assert_eq!(value.value, OpcUaValue::Boolean(true));
        assert!(rx.try_recv().is_err());
    }
}
