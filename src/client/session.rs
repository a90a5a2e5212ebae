// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA session management.
//!
//! This module owns the single session of a client: the connect state
//! machine, keep-alive supervision and the untrusted-certificate recovery
//! path.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected ──keep-alive bad──▶ Faulted
//!      ▲                        │                  │                            │
//!      ├────────error───────────┘                  │                         release
//!      ├────────────────────disconnect─────────────┘                            │
//!      └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A faulted session is released right away and never reconnected
//! automatically. A [`ReleaseHook`] runs before any session is released.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::transport::{OpcUaTransport, SessionRequest};
use super::with_timeout;
use crate::certificate::CertificateStore;
use crate::config::{validate_server_url, ClientConfig};
use crate::endpoint::EndpointResolver;
use crate::error::{ConnectionError, OpcUaError, OpcUaResult, SecurityError, TimeoutError};
use crate::types::{
    Credentials, EndpointDescriptor, LoginMode, ServerDescriptor, StatusCode, UserIdentity,
};

/// Capacity of the connection event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Lower bound for the keep-alive period.
const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(10);

/// Future returned by a [`ReleaseHook`].
pub type ReleaseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Called with the current state before a session is released, so that
/// resources bound to the session go first.
pub type ReleaseHook = Arc<dyn Fn(ConnectionState) -> ReleaseFuture + Send + Sync>;

// =============================================================================
// ConnectionState
// =============================================================================

/// State of the client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,

    /// A connect is running.
    Connecting,

    /// Session is open and usable.
    Connected,

    /// Keep-alive reported a bad status. The session is released at once
    /// and the state moves on to `Disconnected`.
    Faulted,
}

impl ConnectionState {
    /// Returns `true` if the session is usable.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if the session is faulted.
    #[inline]
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Faulted => write!(f, "Faulted"),
        }
    }
}

/// A connection state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// State before the transition.
    pub previous: ConnectionState,
    /// State after the transition.
    pub current: ConnectionState,
    /// Human-readable reason, if any.
    pub reason: Option<String>,
}

// =============================================================================
// SessionInfo
// =============================================================================

/// Information about the open session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// URL the caller connected to.
    pub server_url: String,
    /// Negotiated endpoint.
    pub endpoint: EndpointDescriptor,
    /// `true` if the endpoint is the unsecured discovery fallback.
    pub endpoint_fallback: bool,
    /// Active login mode.
    pub login_mode: LoginMode,
    /// Username for username logins.
    pub username: Option<String>,
    /// Time the session was opened.
    pub connected_at: DateTime<Utc>,
}

// =============================================================================
// Shared state
// =============================================================================

/// State shared with the keep-alive task.
struct Shared {
    state: RwLock<ConnectionState>,
    /// Bumped on every disconnect; a keep-alive task only faults its own session.
    epoch: AtomicU64,
    session_info: RwLock<Option<SessionInfo>>,
    release_hook: RwLock<Option<ReleaseHook>>,
    events: broadcast::Sender<ConnectionEvent>,
    stats: SessionStats,
}

impl Shared {
    fn set_state(&self, new_state: ConnectionState, reason: Option<String>) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        self.emit(old_state, new_state, reason);
    }

    /// Moves a connected session of `epoch` to `Faulted`. Returns `false`
    /// if the session was already replaced or closed.
    fn fault(&self, epoch: u64, status: StatusCode) -> bool {
        let old_state = {
            let mut state = self.state.write();
            if self.epoch.load(Ordering::SeqCst) != epoch || !state.is_connected() {
                return false;
            }
            std::mem::replace(&mut *state, ConnectionState::Faulted)
        };

        self.stats.record_keep_alive_failure();
        tracing::warn!(status = %status, "Keep-alive failed, session faulted");
        self.emit(
            old_state,
            ConnectionState::Faulted,
            Some(format!("Keep-alive failed: {}", status)),
        );
        true
    }

    async fn run_release_hook(&self, state: ConnectionState) {
        let hook = self.release_hook.read().clone();
        if let Some(hook) = hook {
            hook(state).await;
        }
    }

    fn emit(&self, old_state: ConnectionState, new_state: ConnectionState, reason: Option<String>) {
        if old_state == new_state {
            return;
        }
        tracing::trace!(
            old_state = %old_state,
            new_state = %new_state,
            "Connection state changed"
        );
        // No receivers is fine.
        let _ = self.events.send(ConnectionEvent {
            previous: old_state,
            current: new_state,
            reason,
        });
    }
}

/// Releases the connect-in-progress flag on drop.
struct ConnectGuard<'a>(&'a AtomicBool);

impl<'a> ConnectGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> OpcUaResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| Self(flag))
            .map_err(|_| OpcUaError::connection(ConnectionError::InProgress))
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// SessionManager
// =============================================================================

/// Manages the single OPC UA session of a client.
///
/// The SessionManager handles:
/// - Endpoint resolution and session establishment
/// - Untrusted-certificate classification and the optional auto-accept retry
/// - Keepalive monitoring
/// - Idempotent teardown
///
/// # Thread Safety
///
/// The SessionManager is thread-safe and can be shared across tasks. Connects
/// do not overlap; a second connect while one is running fails with
/// [`ConnectionError::InProgress`].
pub struct SessionManager<T: OpcUaTransport> {
    transport: Arc<Mutex<T>>,
    config: Arc<ClientConfig>,
    store: Arc<dyn CertificateStore>,
    resolver: EndpointResolver,
    shared: Arc<Shared>,
    keep_alive: SyncMutex<Option<JoinHandle<()>>>,
    connecting: AtomicBool,
}

impl<T: OpcUaTransport + 'static> SessionManager<T> {
    /// Creates a new session manager.
    pub fn new(
        transport: Arc<Mutex<T>>,
        config: Arc<ClientConfig>,
        store: Arc<dyn CertificateStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            resolver: EndpointResolver::new(config.connect_timeout),
            config,
            store,
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Disconnected),
                epoch: AtomicU64::new(0),
                session_info: RwLock::new(None),
                release_hook: RwLock::new(None),
                events,
                stats: SessionStats::new(),
            }),
            keep_alive: SyncMutex::new(None),
            connecting: AtomicBool::new(false),
        }
    }

    /// Installs the hook run before a session is released by a disconnect,
    /// a replacing connect or a keep-alive fault.
    pub fn set_release_hook(&self, hook: ReleaseHook) {
        *self.shared.release_hook.write() = Some(hook);
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Returns `true` if the session is usable.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns the open session, if any.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.shared.session_info.read().clone()
    }

    /// Returns the session statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.shared.stats
    }

    /// Subscribes to connection state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Fails with "not connected" unless the session is usable.
    pub fn ensure_connected(&self) -> OpcUaResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(OpcUaError::not_connected())
        }
    }

    /// Opens a session to `server`.
    ///
    /// An open session is closed first. Returns the descriptor updated with
    /// the connect time, login mode and negotiated security for the caller to
    /// persist.
    pub async fn connect(
        &self,
        server: &ServerDescriptor,
        login_mode: LoginMode,
        credentials: Option<&Credentials>,
    ) -> OpcUaResult<ServerDescriptor> {
        let _guard = ConnectGuard::acquire(&self.connecting)?;
        self.shared.stats.record_attempt();

        let url = validate_server_url(&server.url)?;
        let identity = build_identity(login_mode, credentials)?;

        let has_session = self.shared.session_info.read().is_some();
        if self.state() != ConnectionState::Disconnected || has_session {
            tracing::debug!(url = %url, "Closing previous session before connect");
            self.disconnect().await;
        }

        let mut transport = self.transport.lock().await;
        self.shared.set_state(ConnectionState::Connecting, None);
        tracing::info!(url = %url, login_mode = %login_mode, "Connecting");

        let resolved = self.resolver.resolve(&*transport, &url, login_mode).await;
        let request = SessionRequest {
            endpoint: resolved.endpoint.clone(),
            identity,
            session_timeout: self.config.session_timeout,
            application_name: self.config.application_name.clone(),
            application_uri: self.config.effective_application_uri(),
            product_uri: self.config.product_uri.clone(),
            pki_dir: self.config.pki_dir.clone(),
            session_name: format!("{} Session", self.config.application_name),
        };

        if let Err(e) = self.open_with_trust(&mut transport, &request).await {
            self.shared.stats.record_failure();
            self.shared
                .set_state(ConnectionState::Disconnected, Some(e.to_string()));
            e.log("connect");
            return Err(e);
        }

        let info = SessionInfo {
            server_url: url,
            endpoint: resolved.endpoint,
            endpoint_fallback: resolved.fallback,
            login_mode,
            username: request.identity.username().map(str::to_string),
            connected_at: Utc::now(),
        };
        let updated = updated_descriptor(server, &info);

        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        *self.keep_alive.lock() = Some(self.spawn_keep_alive(epoch));
        *self.shared.session_info.write() = Some(info.clone());
        self.shared.stats.record_success();
        self.shared.set_state(ConnectionState::Connected, None);
        drop(transport);

        tracing::info!(
            url = %info.server_url,
            endpoint = %info.endpoint,
            fallback = info.endpoint_fallback,
            "Connected"
        );
        Ok(updated)
    }

    /// Closes the session. Safe to call at any time, including repeatedly.
    ///
    /// Local state is released even if the server call fails.
    pub async fn disconnect(&self) {
        self.shared.run_release_hook(self.state()).await;
        let mut transport = self.transport.lock().await;

        if let Some(handle) = self.keep_alive.lock().take() {
            handle.abort();
        }
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        let info = self.shared.session_info.write().take();

        if info.is_none() && self.state() == ConnectionState::Disconnected {
            tracing::trace!("Disconnect ignored, no session");
            return;
        }

        if transport.is_connected() || info.is_some() {
            if let Err(e) = with_timeout(
                self.config.operation_timeout,
                "close_session",
                transport.close_session(),
            )
            .await
            {
                e.log("close session");
            }
        }
        drop(transport);

        self.shared.stats.record_disconnect();
        self.shared.set_state(
            ConnectionState::Disconnected,
            Some("Disconnected by client".to_string()),
        );
        tracing::info!(
            url = info.as_ref().map_or("unknown", |i| i.server_url.as_str()),
            "Disconnected"
        );
    }

    async fn open_with_trust(
        &self,
        transport: &mut T,
        request: &SessionRequest,
    ) -> OpcUaResult<()> {
        let error = match self.open(transport, request).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let certificate = match error.untrusted_certificate() {
            Some(certificate) if self.config.auto_accept_untrusted => certificate.clone(),
            _ => return Err(error),
        };

        tracing::warn!(
            thumbprint = certificate.thumbprint(),
            subject = certificate.subject().unwrap_or("unknown"),
            "Auto-accepting untrusted server certificate"
        );
        if let Err(store_error) = self.store.trust(&certificate).await {
            store_error.log("auto-accept certificate");
            return Err(error);
        }
        self.shared.stats.record_certificate_accepted();

        self.open(transport, request).await
    }

    async fn open(&self, transport: &mut T, request: &SessionRequest) -> OpcUaResult<()> {
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, transport.open_session(request)).await {
            Ok(result) => result,
            Err(_) => Err(OpcUaError::timeout(TimeoutError::connect(
                &request.endpoint.endpoint_url,
                timeout,
            ))),
        }
    }

    fn spawn_keep_alive(&self, epoch: u64) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let shared = Arc::clone(&self.shared);
        let interval = self.config.keep_alive_interval.max(MIN_KEEP_ALIVE_INTERVAL);
        let timeout = self.config.operation_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let check = async { transport.lock().await.keep_alive().await };
                let status = tokio::time::timeout(timeout, check)
                    .await
                    .unwrap_or(StatusCode::BAD_TIMEOUT);

                if status.is_good() {
                    tracing::trace!("Keep-alive ok");
                    continue;
                }
                if shared.fault(epoch, status) {
                    release_faulted(&transport, &shared, epoch, timeout, status).await;
                }
                break;
            }
        })
    }
}

/// Releases a faulted session: the hook first, then the transport session.
async fn release_faulted<T: OpcUaTransport>(
    transport: &Mutex<T>,
    shared: &Shared,
    epoch: u64,
    timeout: Duration,
    status: StatusCode,
) {
    shared.run_release_hook(ConnectionState::Faulted).await;

    let mut transport = transport.lock().await;
    if shared
        .epoch
        .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        tracing::debug!("Faulted session already released");
        return;
    }
    let info = shared.session_info.write().take();

    if let Err(e) = with_timeout(timeout, "close_session", transport.close_session()).await {
        e.log("close faulted session");
    }
    drop(transport);

    shared.set_state(
        ConnectionState::Disconnected,
        Some(format!("Session released after keep-alive failure: {}", status)),
    );
    tracing::info!(
        url = info.as_ref().map_or("unknown", |i| i.server_url.as_str()),
        "Faulted session released"
    );
}

impl<T: OpcUaTransport> fmt::Debug for SessionManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &*self.shared.state.read())
            .field("session", &*self.shared.session_info.read())
            .finish()
    }
}

fn build_identity(
    login_mode: LoginMode,
    credentials: Option<&Credentials>,
) -> OpcUaResult<UserIdentity> {
    match login_mode {
        LoginMode::Anonymous => Ok(UserIdentity::Anonymous),
        LoginMode::UserName => match credentials {
            Some(c) if !c.username.trim().is_empty() => Ok(UserIdentity::UserName {
                username: c.username.clone(),
                password: c.password.clone(),
            }),
            _ => Err(OpcUaError::security(SecurityError::authentication_failed(
                "a username is required for username login",
            ))),
        },
        LoginMode::Certificate => Err(OpcUaError::security(
            SecurityError::identity_not_supported("certificate"),
        )),
    }
}

fn updated_descriptor(server: &ServerDescriptor, info: &SessionInfo) -> ServerDescriptor {
    let mut updated = server.clone();
    updated.last_connected = Some(info.connected_at);
    updated.last_login_mode = info.login_mode;
    updated.security_mode = info.endpoint.security_mode.name().to_string();
    updated.security_policy = info.endpoint.security_policy_name().to_string();
    if info.username.is_some() {
        updated.username = info.username.clone();
    }
    updated
}

// =============================================================================
// SessionStats
// =============================================================================

/// Statistics for session operations.
#[derive(Debug)]
pub struct SessionStats {
    /// Number of connect calls.
    attempts: AtomicU64,

    /// Number of sessions opened.
    successes: AtomicU64,

    /// Number of failed connects.
    failures: AtomicU64,

    /// Certificates trusted by the auto-accept override.
    certificates_accepted: AtomicU64,

    /// Number of keep-alive faults.
    keep_alive_failures: AtomicU64,

    /// Number of disconnects that released a session.
    disconnects: AtomicU64,
}

impl SessionStats {
    /// Creates new session statistics.
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            certificates_accepted: AtomicU64::new(0),
            keep_alive_failures: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
        }
    }

    fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_certificate_accepted(&self) {
        self.certificates_accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_keep_alive_failure(&self) {
        self.keep_alive_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of connect calls.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Returns the number of sessions opened.
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Returns the number of failed connects.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns the number of auto-accepted certificates.
    pub fn certificates_accepted(&self) -> u64 {
        self.certificates_accepted.load(Ordering::Relaxed)
    }

    /// Returns the number of keep-alive faults.
    pub fn keep_alive_failures(&self) -> u64 {
        self.keep_alive_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of disconnects.
    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }

    /// Resets all statistics.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.certificates_accepted.store(0, Ordering::Relaxed);
        self.keep_alive_failures.store(0, Ordering::Relaxed);
        self.disconnects.store(0, Ordering::Relaxed);
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::certificate::{Certificate, MemoryStore, TrustDecision};
    use crate::client::mock::MockTransport;
    use crate::error::ConnectionError;
    use crate::types::{SecurityMode, SecurityPolicy};

    const URL: &str = "opc.tcp://plc:4840";

    fn config(auto_accept: bool) -> Arc<ClientConfig> {
        Arc::new(
            ClientConfig::builder()
                .pki_dir(std::env::temp_dir().join("ua-inspector-session-tests"))
                .auto_accept_untrusted(auto_accept)
                .keep_alive_interval(Duration::from_millis(20))
                .connect_timeout(Duration::from_secs(2))
                .build()
                .unwrap(),
        )
    }

    fn manager(
        mock: &MockTransport,
        auto_accept: bool,
    ) -> (Arc<MemoryStore>, SessionManager<MockTransport>) {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(
            Arc::new(Mutex::new(mock.clone())),
            config(auto_accept),
            store.clone(),
        );
        (store, manager)
    }

    fn server() -> ServerDescriptor {
        ServerDescriptor::new("PLC", URL)
    }

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Faulted.is_connected());
        assert!(ConnectionState::Faulted.is_faulted());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
    }

    #[tokio::test]
    async fn test_connect_anonymous() {
        let mock = MockTransport::new();
        mock.set_endpoints(
            URL,
            vec![
                EndpointDescriptor::new(
                    URL,
                    SecurityMode::SignAndEncrypt,
                    SecurityPolicy::Basic256Sha256,
                    100,
                ),
                EndpointDescriptor::new(URL, SecurityMode::None, SecurityPolicy::None, 0),
            ],
        );
        let (_, manager) = manager(&mock, false);
        let mut events = manager.subscribe();

        let updated = manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(updated.last_connected.is_some());
        assert_eq!(updated.security_mode, "None");
        assert_eq!(updated.security_policy, "None");
        let request = mock.last_session_request().unwrap();
        assert!(request.endpoint.is_unsecured());
        assert_eq!(request.session_timeout, Duration::from_secs(600));

        assert_eq!(events.recv().await.unwrap().current, ConnectionState::Connecting);
        assert_eq!(events.recv().await.unwrap().current, ConnectionState::Connected);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_username_records_user() {
        let mock = MockTransport::new();
        mock.set_endpoints(
            URL,
            vec![EndpointDescriptor::new(
                URL,
                SecurityMode::Sign,
                SecurityPolicy::Basic256Sha256,
                50,
            )],
        );
        let (_, manager) = manager(&mock, false);

        let credentials = Credentials::new("operator", "secret");
        let updated = manager
            .connect(&server(), LoginMode::UserName, Some(&credentials))
            .await
            .unwrap();

        assert_eq!(updated.last_login_mode, LoginMode::UserName);
        assert_eq!(updated.username.as_deref(), Some("operator"));
        assert_eq!(updated.security_policy, "Basic256Sha256");
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_identity_validation() {
        let mock = MockTransport::new();
        let (_, manager) = manager(&mock, false);

        let err = manager.connect(&server(), LoginMode::UserName, None).await.unwrap_err();
        assert_eq!(err.category(), "security");

        let err = manager.connect(&server(), LoginMode::Certificate, None).await.unwrap_err();
        assert!(matches!(
            err,
            OpcUaError::Security(SecurityError::IdentityNotSupported { .. })
        ));
        assert_eq!(mock.session_opens(), 0);
    }

    #[tokio::test]
    async fn test_discovery_failure_uses_fallback() {
        let mock = MockTransport::new();
        mock.fail_endpoint_discovery(true);
        let (_, manager) = manager(&mock, false);

        manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap();
        let info = manager.session_info().unwrap();
        assert!(info.endpoint_fallback);
        assert_eq!(info.endpoint, EndpointDescriptor::unsecured(URL));
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_untrusted_certificate_surfaces() {
        let mock = MockTransport::new();
        let cert = Certificate::new(vec![7; 32]).with_subject("CN=PLC");
        mock.reject_certificate(cert.clone(), 1);
        let (store, manager) = manager(&mock, false);

        let err = manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap_err();
        assert!(err.is_certificate_untrusted());
        assert_eq!(err.untrusted_certificate().unwrap().thumbprint(), cert.thumbprint());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(store.is_empty().await);

        // The caller trusts and retries.
        store.trust(&cert).await.unwrap();
        manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap();
        assert!(manager.is_connected());
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_auto_accept_trusts_and_retries_once() {
        let mock = MockTransport::new();
        let cert = Certificate::new(vec![9; 32]);
        mock.reject_certificate(cert.clone(), 1);
        let (store, manager) = manager(&mock, true);

        manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap();
        assert_eq!(
            store.decision(cert.thumbprint()).await.unwrap(),
            Some(TrustDecision::Trusted)
        );
        assert_eq!(manager.stats().certificates_accepted(), 1);
        manager.disconnect().await;

        // A server that keeps rejecting is not retried forever.
        mock.reject_certificate(cert, 5);
        let err = manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap_err();
        assert!(err.is_certificate_untrusted());
    }

    #[tokio::test]
    async fn test_overlapping_connect_rejected() {
        let mock = MockTransport::new();
        mock.set_connect_delay(Duration::from_millis(200));
        let (_, manager) = manager(&mock, false);
        let manager = Arc::new(manager);

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager.connect(&server(), LoginMode::Anonymous, None).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap_err();
        assert!(matches!(
            err,
            OpcUaError::Connection(ConnectionError::InProgress)
        ));

        first.await.unwrap().unwrap();
        assert_eq!(mock.session_opens(), 1);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_rejected_connect_leaves_session_resources() {
        let mock = MockTransport::new();
        let (_, manager) = manager(&mock, false);
        let releases = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&releases);
        manager.set_release_hook(Arc::new(move |_: ConnectionState| -> ReleaseFuture {
            seen.fetch_add(1, Ordering::SeqCst);
            Box::pin(tokio::time::sleep(Duration::from_millis(100)))
        }));
        manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        let first_server = server();
        let (first, second) = tokio::join!(
            manager.connect(&first_server, LoginMode::Anonymous, None),
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                manager.connect(&server(), LoginMode::Anonymous, None).await
            },
        );

        first.unwrap();
        assert!(matches!(
            second.unwrap_err(),
            OpcUaError::Connection(ConnectionError::InProgress)
        ));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_keep_alive_fault_releases_session() {
        let mock = MockTransport::new();
        let (_, manager) = manager(&mock, false);
        let released = Arc::new(SyncMutex::new(Vec::new()));
        let seen = Arc::clone(&released);
        manager.set_release_hook(Arc::new(move |state: ConnectionState| -> ReleaseFuture {
            seen.lock().push(state);
            Box::pin(async {})
        }));
        manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap();
        let mut events = manager.subscribe();

        mock.set_keep_alive_status(StatusCode::BAD_CONNECTION_CLOSED);
        let faulted = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(faulted.previous, ConnectionState::Connected);
        assert_eq!(faulted.current, ConnectionState::Faulted);
        assert!(faulted.reason.unwrap().contains("BadConnectionClosed"));

        let released_event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(released_event.previous, ConnectionState::Faulted);
        assert_eq!(released_event.current, ConnectionState::Disconnected);
        assert!(released_event.reason.unwrap().contains("keep-alive"));

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.session_info().is_none());
        assert!(manager.ensure_connected().unwrap_err().is_not_connected());
        assert_eq!(*released.lock(), vec![ConnectionState::Faulted]);
        assert_eq!(
            mock.calls().iter().filter(|c| **c == "close_session").count(),
            1
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(mock.session_opens(), 1);
        assert_eq!(manager.stats().keep_alive_failures(), 1);

        // Nothing is left to close.
        manager.disconnect().await;
        assert_eq!(
            mock.calls().iter().filter(|c| **c == "close_session").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_disconnect_runs_release_hook_first() {
        let mock = MockTransport::new();
        let (_, manager) = manager(&mock, false);
        let hook_mock = mock.clone();
        let closed_before_hook = Arc::new(SyncMutex::new(None));
        let seen = Arc::clone(&closed_before_hook);
        manager.set_release_hook(Arc::new(move |state: ConnectionState| -> ReleaseFuture {
            let closed = hook_mock.calls().contains(&"close_session");
            if state.is_connected() {
                *seen.lock() = Some(closed);
            }
            Box::pin(async {})
        }));

        manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap();
        manager.disconnect().await;

        assert_eq!(*closed_before_hook.lock(), Some(false));
        assert!(mock.calls().contains(&"close_session"));
    }

    #[tokio::test]
    async fn test_zero_keep_alive_interval_is_clamped() {
        let mock = MockTransport::new();
        let mut config = ClientConfig::default();
        config.pki_dir = std::env::temp_dir().join("ua-inspector-session-tests");
        config.keep_alive_interval = Duration::ZERO;
        let manager = SessionManager::new(
            Arc::new(Mutex::new(mock.clone())),
            Arc::new(config),
            Arc::new(MemoryStore::new()),
        );

        manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap();
        mock.set_keep_alive_status(StatusCode::BAD_CONNECTION_CLOSED);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.stats().keep_alive_failures(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mock = MockTransport::new();
        let (_, manager) = manager(&mock, false);

        manager.disconnect().await;
        manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap();
        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.stats().disconnects(), 1);
        assert_eq!(
            mock.calls().iter().filter(|c| **c == "close_session").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_connect_replaces_open_session() {
        let mock = MockTransport::new();
        let (_, manager) = manager(&mock, false);

        manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap();
        manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap();

        assert_eq!(mock.session_opens(), 2);
        assert!(mock.calls().contains(&"close_session"));
        assert!(manager.is_connected());
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_failure_reports() {
        let mock = MockTransport::new();
        mock.fail_connect(Some("BadTcpEndpointUrlInvalid"));
        let (_, manager) = manager(&mock, false);

        let err = manager.connect(&server(), LoginMode::Anonymous, None).await.unwrap_err();
        assert_eq!(err.category(), "connection");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.stats().failures(), 1);
    }

    #[test]
    fn test_session_stats() {
        let stats = SessionStats::new();
        stats.record_attempt();
        stats.record_failure();
        stats.record_disconnect();

        assert_eq!(stats.attempts(), 1);
        assert_eq!(stats.failures(), 1);
        assert_eq!(stats.disconnects(), 1);

        stats.reset();
        assert_eq!(stats.attempts(), 0);
    }
}
