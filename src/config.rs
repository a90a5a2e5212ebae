// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration.
//!
//! All timeouts are explicit and non-zero. Durations serialize as humantime
//! strings (`"30s"`, `"10m"`), so a configuration file looks like:
//!
//! ```json
//! {
//!   "application_name": "UAInspector",
//!   "connect_timeout": "30s",
//!   "session_timeout": "10m",
//!   "subscription": { "publishing_interval": "500ms" }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, OpcUaError, OpcUaResult, SubscriptionError};

/// Required URL scheme for OPC UA binary endpoints.
pub const OPC_TCP_SCHEME: &str = "opc.tcp://";

// =============================================================================
// ClientConfig
// =============================================================================

/// Configuration of one client engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Application name presented to servers.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Application URI. Derived from the host name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_uri: Option<String>,

    /// Product URI.
    #[serde(default = "default_product_uri")]
    pub product_uri: String,

    /// Root of the certificate trust store.
    #[serde(default = "default_pki_dir")]
    pub pki_dir: PathBuf,

    /// Trust untrusted server certificates automatically and retry once.
    ///
    /// Off by default: the untrusted certificate is surfaced to the caller.
    #[serde(default)]
    pub auto_accept_untrusted: bool,

    /// Bound on endpoint discovery and session establishment.
    #[serde(default = "default_connect_timeout")]
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Bound on a single read, write, browse or subscription call.
    #[serde(default = "default_operation_timeout")]
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Requested session timeout.
    #[serde(default = "default_session_timeout")]
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Interval between keep-alive probes.
    #[serde(default = "default_keep_alive_interval")]
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,

    /// Default subscription settings.
    #[serde(default)]
    pub subscription: SubscriptionSettings,

    /// Default monitored item settings.
    #[serde(default)]
    pub monitored_item: MonitoredItemSettings,
}

fn default_application_name() -> String {
    "UAInspector".to_string()
}

fn default_product_uri() -> String {
    "urn:UAInspector".to_string()
}

fn default_pki_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("UAInspector")
        .join("pki")
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_keep_alive_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            application_uri: None,
            product_uri: default_product_uri(),
            pki_dir: default_pki_dir(),
            auto_accept_untrusted: false,
            connect_timeout: default_connect_timeout(),
            operation_timeout: default_operation_timeout(),
            session_timeout: default_session_timeout(),
            keep_alive_interval: default_keep_alive_interval(),
            subscription: SubscriptionSettings::default(),
            monitored_item: MonitoredItemSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> OpcUaResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OpcUaError::configuration(ConfigurationError::load(
                path.display().to_string(),
                e.to_string(),
            ))
        })?;
        let config = Self::from_json_str(&content).map_err(|e| {
            OpcUaError::configuration(ConfigurationError::load(
                path.display().to_string(),
                e.to_string(),
            ))
        })?;
        tracing::debug!(path = %path.display(), "Loaded client configuration");
        Ok(config)
    }

    /// Parses and validates a configuration from a JSON string.
    pub fn from_json_str(content: &str) -> OpcUaResult<Self> {
        let config: Self = serde_json::from_str(content).map_err(|e| {
            OpcUaError::configuration(ConfigurationError::load("<string>", e.to_string()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates this configuration.
    pub fn validate(&self) -> OpcUaResult<()> {
        if self.application_name.trim().is_empty() {
            return Err(OpcUaError::configuration(ConfigurationError::invalid_value(
                "application_name",
                "must not be empty",
            )));
        }

        for (field, value) in [
            ("connect_timeout", self.connect_timeout),
            ("operation_timeout", self.operation_timeout),
            ("session_timeout", self.session_timeout),
            ("keep_alive_interval", self.keep_alive_interval),
        ] {
            if value.is_zero() {
                return Err(OpcUaError::configuration(ConfigurationError::invalid_value(
                    field,
                    "must be greater than 0",
                )));
            }
        }

        self.subscription.validate()?;
        self.monitored_item.validate()?;
        Ok(())
    }

    /// Returns the effective application URI.
    pub fn effective_application_uri(&self) -> String {
        self.application_uri.clone().unwrap_or_else(|| {
            let host = std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("COMPUTERNAME"))
                .unwrap_or_else(|_| "localhost".to_string());
            format!("urn:{}:{}", host, self.application_name.replace(' ', ""))
        })
    }
}

// =============================================================================
// ClientConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    application_name: Option<String>,
    application_uri: Option<String>,
    product_uri: Option<String>,
    pki_dir: Option<PathBuf>,
    auto_accept_untrusted: Option<bool>,
    connect_timeout: Option<Duration>,
    operation_timeout: Option<Duration>,
    session_timeout: Option<Duration>,
    keep_alive_interval: Option<Duration>,
    subscription: Option<SubscriptionSettings>,
    monitored_item: Option<MonitoredItemSettings>,
}

impl ClientConfigBuilder {
    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Sets the application URI.
    pub fn application_uri(mut self, uri: impl Into<String>) -> Self {
        self.application_uri = Some(uri.into());
        self
    }

    /// Sets the product URI.
    pub fn product_uri(mut self, uri: impl Into<String>) -> Self {
        self.product_uri = Some(uri.into());
        self
    }

    /// Sets the PKI directory.
    pub fn pki_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pki_dir = Some(dir.into());
        self
    }

    /// Sets whether untrusted server certificates are accepted automatically.
    pub fn auto_accept_untrusted(mut self, accept: bool) -> Self {
        self.auto_accept_untrusted = Some(accept);
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the operation timeout.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Sets the session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Sets the keep-alive interval.
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    /// Sets the subscription settings.
    pub fn subscription(mut self, settings: SubscriptionSettings) -> Self {
        self.subscription = Some(settings);
        self
    }

    /// Sets the monitored item settings.
    pub fn monitored_item(mut self, settings: MonitoredItemSettings) -> Self {
        self.monitored_item = Some(settings);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> OpcUaResult<ClientConfig> {
        let config = ClientConfig {
            application_name: self.application_name.unwrap_or_else(default_application_name),
            application_uri: self.application_uri,
            product_uri: self.product_uri.unwrap_or_else(default_product_uri),
            pki_dir: self.pki_dir.unwrap_or_else(default_pki_dir),
            auto_accept_untrusted: self.auto_accept_untrusted.unwrap_or(false),
            connect_timeout: self.connect_timeout.unwrap_or_else(default_connect_timeout),
            operation_timeout: self.operation_timeout.unwrap_or_else(default_operation_timeout),
            session_timeout: self.session_timeout.unwrap_or_else(default_session_timeout),
            keep_alive_interval: self
                .keep_alive_interval
                .unwrap_or_else(default_keep_alive_interval),
            subscription: self.subscription.unwrap_or_default(),
            monitored_item: self.monitored_item.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Subscription parameters used by `create_subscription`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Publishing interval.
    #[serde(default = "default_publishing_interval")]
    #[serde(with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Publishing intervals without data before a keep-alive is sent.
    #[serde(default = "default_keepalive_count")]
    pub keepalive_count: u32,

    /// Publishing intervals without a publish request before the subscription expires.
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Maximum notifications per publish response.
    #[serde(default = "default_max_notifications")]
    pub max_notifications_per_publish: u32,

    /// Relative priority.
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Whether publishing is enabled on creation.
    #[serde(default = "default_true")]
    pub publishing_enabled: bool,
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_keepalive_count() -> u32 {
    10
}

fn default_lifetime_count() -> u32 {
    100
}

fn default_max_notifications() -> u32 {
    1000
}

fn default_priority() -> u8 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            keepalive_count: default_keepalive_count(),
            lifetime_count: default_lifetime_count(),
            max_notifications_per_publish: default_max_notifications(),
            priority: default_priority(),
            publishing_enabled: true,
        }
    }
}

impl SubscriptionSettings {
    /// Creates default settings with a custom publishing interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            publishing_interval: interval,
            ..Default::default()
        }
    }

    /// Validates the settings.
    ///
    /// The lifetime count must be at least three times the keep-alive count.
    pub fn validate(&self) -> OpcUaResult<()> {
        if self.publishing_interval.is_zero() {
            return Err(OpcUaError::subscription(SubscriptionError::invalid_settings(
                "publishing interval must be greater than 0",
            )));
        }
        if self.keepalive_count == 0 {
            return Err(OpcUaError::subscription(SubscriptionError::invalid_settings(
                "keep-alive count must be greater than 0",
            )));
        }
        if self.lifetime_count < self.keepalive_count.saturating_mul(3) {
            return Err(OpcUaError::subscription(SubscriptionError::invalid_settings(
                format!(
                    "lifetime count {} must be at least 3x keep-alive count {}",
                    self.lifetime_count, self.keepalive_count
                ),
            )));
        }
        Ok(())
    }
}

// =============================================================================
// MonitoredItemSettings
// =============================================================================

/// Monitored item parameters used by `add_monitored_item`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemSettings {
    /// Sampling interval.
    #[serde(default = "default_sampling_interval")]
    #[serde(with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Bounded notification queue size.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Drop the oldest queued notification on overflow.
    #[serde(default = "default_true")]
    pub discard_oldest: bool,
}

fn default_sampling_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_queue_size() -> u32 {
    10
}

impl Default for MonitoredItemSettings {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_interval(),
            queue_size: default_queue_size(),
            discard_oldest: true,
        }
    }
}

impl MonitoredItemSettings {
    /// Validates the settings.
    pub fn validate(&self) -> OpcUaResult<()> {
        if self.sampling_interval.is_zero() {
            return Err(OpcUaError::configuration(ConfigurationError::invalid_value(
                "monitored_item.sampling_interval",
                "must be greater than 0",
            )));
        }
        if self.queue_size == 0 {
            return Err(OpcUaError::configuration(ConfigurationError::invalid_value(
                "monitored_item.queue_size",
                "must be at least 1",
            )));
        }
        Ok(())
    }
}

// =============================================================================
// URL validation
// =============================================================================

/// Validates a manually entered server URL and returns it trimmed.
///
/// The URL must start with `opc.tcp://` (any case) and name a host.
pub fn validate_server_url(url: &str) -> OpcUaResult<String> {
    let url = url.trim();
    let invalid =
        |reason: &str| OpcUaError::configuration(ConfigurationError::invalid_url(url, reason));

    let has_scheme = url
        .get(..OPC_TCP_SCHEME.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(OPC_TCP_SCHEME));
    if !has_scheme {
        return Err(invalid("URL must start with opc.tcp://"));
    }

    let host = url[OPC_TCP_SCHEME.len()..]
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    if host.is_empty() {
        return Err(invalid("URL must contain a host"));
    }

    Ok(url.to_string())
}

// =============================================================================
// Serde helpers
// =============================================================================

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.operation_timeout, Duration::from_secs(120));
        assert_eq!(config.session_timeout, Duration::from_secs(600));
        assert_eq!(config.keep_alive_interval, Duration::from_secs(5));
        assert!(!config.auto_accept_untrusted);
        assert!(config.pki_dir.ends_with("pki"));
        assert!(config.validate().is_ok());

        let sub = SubscriptionSettings::default();
        assert_eq!(sub.keepalive_count, 10);
        assert_eq!(sub.lifetime_count, 100);
        assert_eq!(sub.max_notifications_per_publish, 1000);
        assert_eq!(sub.priority, 100);

        let item = MonitoredItemSettings::default();
        assert_eq!(item.sampling_interval, Duration::from_millis(1000));
        assert_eq!(item.queue_size, 10);
        assert!(item.discard_oldest);
    }

    #[test]
    fn test_builder_rejects_zero_timeout() {
        let result = ClientConfig::builder()
            .operation_timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());

        let config = ClientConfig::builder()
            .application_name("Test Client")
            .pki_dir("/tmp/pki")
            .auto_accept_untrusted(true)
            .build()
            .unwrap();
        assert!(config.auto_accept_untrusted);
        assert_eq!(config.pki_dir, PathBuf::from("/tmp/pki"));
    }

    #[test]
    fn test_zero_keep_alive_interval_rejected() {
        let mut config = ClientConfig::default();
        config.keep_alive_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        assert!(ClientConfig::builder()
            .keep_alive_interval(Duration::ZERO)
            .build()
            .is_err());
        assert!(ClientConfig::from_json_str(r#"{ "keep_alive_interval": "0s" }"#).is_err());
    }

    #[test]
    fn test_subscription_lifetime_rule() {
        let mut settings = SubscriptionSettings::default();
        settings.lifetime_count = 29;
        assert!(settings.validate().is_err());
        settings.lifetime_count = 30;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_json_str() {
        let config = ClientConfig::from_json_str(
            r#"{
                "application_name": "Line Inspector",
                "connect_timeout": "5s",
                "session_timeout": "10m",
                "subscription": { "publishing_interval": "300ms" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.application_name, "Line Inspector");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.session_timeout, Duration::from_secs(600));
        assert_eq!(
            config.subscription.publishing_interval,
            Duration::from_millis(300)
        );
        assert_eq!(config.operation_timeout, Duration::from_secs(120));

        assert!(ClientConfig::from_json_str(r#"{ "connect_timeout": "0s" }"#).is_err());
        assert!(ClientConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, r#"{ "keep_alive_interval": "2s" }"#).unwrap();

        let config = ClientConfig::from_json_file(&path).unwrap();
        assert_eq!(config.keep_alive_interval, Duration::from_secs(2));

        assert!(ClientConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_validate_server_url() {
        assert_eq!(
            validate_server_url("  opc.tcp://plc01:4840 ").unwrap(),
            "opc.tcp://plc01:4840"
        );
        assert!(validate_server_url("OPC.TCP://plc01:4840/path").is_ok());
        assert!(validate_server_url("http://plc01:4840").is_err());
        assert!(validate_server_url("opc.tcp://").is_err());
        assert!(validate_server_url("opc.tcp://:4840").is_err());
        assert!(validate_server_url("").is_err());
    }

    #[test]
    fn test_effective_application_uri() {
        let config = ClientConfig::builder()
            .application_uri("urn:custom")
            .build()
            .unwrap();
        assert_eq!(config.effective_application_uri(), "urn:custom");

        let derived = ClientConfig::default().effective_application_uri();
        assert!(derived.starts_with("urn:"));
        assert!(derived.ends_with(":UAInspector"));
    }
}
