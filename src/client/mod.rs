// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client layers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ClientEngine                             │
//! │           (connect/browse/read/write/subscribe API)             │
//! └─────────────────────────────────────────────────────────────────┘
//!               │                                  │
//!               ▼                                  ▼
//! ┌───────────────────────────┐      ┌───────────────────────────────┐
//! │      SessionManager       │      │      SubscriptionEngine       │
//! │ (connect state machine,   │      │ (one subscription, bounded    │
//! │  keep-alive supervision)  │      │  per-item notification queues)│
//! └───────────────────────────┘      └───────────────────────────────┘
//!               │                                  │
//!               ▼                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OpcUaTransport                             │
//! │        (MockTransport, or OpcUaStackTransport with the          │
//! │                 `real-transport` feature)                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::time::Duration;

use crate::error::{OpcUaError, OpcUaResult, TimeoutError};

mod conversion;
pub mod mock;
mod session;
pub mod subscription;
mod transport;

#[cfg(feature = "real-transport")]
mod real_transport;

pub use conversion::{
    coerce, data_type_name, format_value, quality_text, try_coerce, Quality, ScalarType,
};
pub use mock::MockTransport;
pub use session::{
    ConnectionEvent, ConnectionState, ReleaseFuture, ReleaseHook, SessionInfo, SessionManager,
    SessionStats,
};
pub use subscription::{
    channel_callback, DataChangeCallback, MonitoredItemInfo, SubscriptionEngine,
    SubscriptionStats,
};
pub use transport::{
    BrowseFilter, DataChangeNotification, DataValue, MonitoredItemRequest, MonitoredItemResult,
    NotificationSink, OpcUaTransport, OpcUaValue, ReferenceDescription, SessionRequest,
    WriteOutcome, HIERARCHICAL_REFERENCES,
};

#[cfg(feature = "real-transport")]
pub use real_transport::OpcUaStackTransport;

/// Runs a transport call under a deadline.
pub(crate) async fn with_timeout<F, R>(
    duration: Duration,
    operation: &str,
    future: F,
) -> OpcUaResult<R>
where
    F: Future<Output = OpcUaResult<R>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(OpcUaError::timeout(TimeoutError::operation(operation, duration))),
    }
}
