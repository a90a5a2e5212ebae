// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server discovery.
//!
//! Two strategies:
//!
//! - **Network probe**: ask each well-known local port for its servers and
//!   endpoints, and describe every endpoint URL by its strongest endpoint.
//! - **LDS**: ask a Local Discovery Server for registered applications.
//!
//! A failing probe is logged and skipped; discovery itself never fails.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::client::{with_timeout, OpcUaTransport};
use crate::error::OpcUaResult;
use crate::types::{
    ApplicationDescription, EndpointDescriptor, LoginMode, SecurityPolicy, ServerDescriptor,
};

/// URLs probed by [`DiscoveryService::discover_on_network`].
pub const NETWORK_DISCOVERY_URLS: [&str; 4] = [
    "opc.tcp://localhost:4840",
    "opc.tcp://localhost:48010",
    "opc.tcp://localhost:62541",
    "opc.tcp://localhost:53530",
];

/// URLs queried by [`DiscoveryService::discover_with_lds`].
pub const LDS_URLS: [&str; 2] = ["opc.tcp://localhost:4840", "opc.tcp://localhost:4845"];

/// Finds servers and their endpoints.
#[derive(Debug)]
pub struct DiscoveryService<T: OpcUaTransport> {
    transport: Arc<Mutex<T>>,
    timeout: Duration,
    network_urls: Vec<String>,
    lds_urls: Vec<String>,
}

impl<T: OpcUaTransport> DiscoveryService<T> {
    /// Creates a service probing the well-known local URLs.
    pub fn new(transport: Arc<Mutex<T>>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            network_urls: NETWORK_DISCOVERY_URLS.iter().map(|u| u.to_string()).collect(),
            lds_urls: LDS_URLS.iter().map(|u| u.to_string()).collect(),
        }
    }

    /// Replaces the URLs probed on the network.
    pub fn with_network_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.network_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the LDS URLs.
    pub fn with_lds_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lds_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Probes every network URL. Servers are unique by URL, first seen wins.
    pub async fn discover_on_network(&self) -> Vec<ServerDescriptor> {
        let mut servers: Vec<ServerDescriptor> = Vec::new();

        for url in &self.network_urls {
            match self.discover_at(url).await {
                Ok(found) => {
                    for server in found {
                        if !servers.iter().any(|s| s.url == server.url) {
                            servers.push(server);
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "Discovery probe failed");
                }
            }
        }

        tracing::info!(count = servers.len(), "Network discovery finished");
        servers
    }

    /// Describes the servers known to one discovery URL.
    ///
    /// Each application's endpoints are grouped by endpoint URL and the
    /// highest-level endpoint of a group describes it.
    pub async fn discover_at(&self, discovery_url: &str) -> OpcUaResult<Vec<ServerDescriptor>> {
        let applications = self.find_servers(discovery_url).await?;
        let mut servers = Vec::new();

        for application in &applications {
            let endpoint_url = application
                .discovery_urls
                .first()
                .map(String::as_str)
                .unwrap_or(discovery_url);

            let endpoints = match self.query_endpoints(endpoint_url).await {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    tracing::debug!(
                        application = %application.application_name,
                        error = %e,
                        "Failed to get endpoints"
                    );
                    continue;
                }
            };

            for endpoint in strongest_per_url(&endpoints) {
                servers.push(describe_endpoint(application, endpoint));
            }
        }

        Ok(servers)
    }

    /// Lists the applications registered with each LDS.
    pub async fn discover_with_lds(&self) -> Vec<ServerDescriptor> {
        let mut servers = Vec::new();

        for lds_url in &self.lds_urls {
            match self.find_servers(lds_url).await {
                Ok(applications) => {
                    servers.extend(
                        applications
                            .iter()
                            .map(|application| describe_application(application, lds_url)),
                    );
                }
                Err(e) => {
                    tracing::debug!(url = %lds_url, error = %e, "LDS query failed");
                }
            }
        }

        tracing::info!(count = servers.len(), "LDS discovery finished");
        servers
    }

    /// Returns the endpoints of a server, or an empty list on failure.
    pub async fn get_endpoints(&self, url: &str) -> Vec<EndpointDescriptor> {
        self.query_endpoints(url).await.unwrap_or_else(|e| {
            tracing::debug!(url, error = %e, "Get endpoints failed");
            Vec::new()
        })
    }

    async fn find_servers(&self, url: &str) -> OpcUaResult<Vec<ApplicationDescription>> {
        with_timeout(self.timeout, "find_servers", async {
            self.transport.lock().await.find_servers(url).await
        })
        .await
    }

    async fn query_endpoints(&self, url: &str) -> OpcUaResult<Vec<EndpointDescriptor>> {
        with_timeout(self.timeout, "get_endpoints", async {
            self.transport.lock().await.get_endpoints(url).await
        })
        .await
    }
}

/// Picks the highest-level endpoint per endpoint URL, in first-seen URL order.
fn strongest_per_url(endpoints: &[EndpointDescriptor]) -> Vec<&EndpointDescriptor> {
    let mut best: Vec<&EndpointDescriptor> = Vec::new();
    for endpoint in endpoints {
        match best.iter_mut().find(|b| b.endpoint_url == endpoint.endpoint_url) {
            Some(slot) if endpoint.security_level > slot.security_level => *slot = endpoint,
            Some(_) => {}
            None => best.push(endpoint),
        }
    }
    best
}

fn describe_endpoint(
    application: &ApplicationDescription,
    endpoint: &EndpointDescriptor,
) -> ServerDescriptor {
    let mut server = ServerDescriptor::new(&application.application_name, &endpoint.endpoint_url);
    server.manufacturer = manufacturer_from_uri(&application.product_uri);
    server.product_name = application.application_name.clone();
    server.security_mode = endpoint.security_mode.name().to_string();
    server.security_policy = SecurityPolicy::short_name(&endpoint.security_policy_uri).to_string();
    server.last_login_mode = if endpoint.is_unsecured() {
        LoginMode::Anonymous
    } else {
        LoginMode::UserName
    };
    server
}

fn describe_application(application: &ApplicationDescription, lds_url: &str) -> ServerDescriptor {
    let url = application
        .discovery_urls
        .first()
        .map(String::as_str)
        .unwrap_or(lds_url);
    let mut server = ServerDescriptor::new(&application.application_name, url);
    server.manufacturer = manufacturer_from_uri(&application.product_uri);
    server.product_name = application.application_name.clone();
    server
}

/// Returns the host of a product URI, or `"Unknown"`.
///
/// Only hierarchical URIs (`scheme://host/...`) carry a host; URNs do not.
pub fn manufacturer_from_uri(product_uri: &str) -> String {
    let host = product_uri
        .split_once("://")
        .map(|(_, rest)| rest)
        .and_then(|rest| rest.split(['/', '?', '#']).next())
        .map(|authority| authority.rsplit('@').next().unwrap_or(authority))
        .map(strip_port)
        .unwrap_or_default();

    if host.is_empty() {
        "Unknown".to_string()
    } else {
        host.to_string()
    }
}

fn strip_port(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        // IPv6 literal
        return rest.split(']').next().unwrap_or_default();
    }
    authority.split(':').next().unwrap_or_default()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::types::SecurityMode;

    fn application(name: &str, discovery_url: &str) -> ApplicationDescription {
        ApplicationDescription {
            application_name: name.to_string(),
            application_uri: format!("urn:{}", name),
            product_uri: "http://vendor.example.com/products/server".to_string(),
            discovery_urls: vec![discovery_url.to_string()],
        }
    }

    fn service(mock: &MockTransport) -> DiscoveryService<MockTransport> {
        DiscoveryService::new(Arc::new(Mutex::new(mock.clone())), Duration::from_secs(1))
    }

    #[test]
    fn test_manufacturer_from_uri() {
        assert_eq!(
            manufacturer_from_uri("http://www.unified-automation.com/Server"),
            "www.unified-automation.com"
        );
        assert_eq!(manufacturer_from_uri("https://user@vendor.io:8443/x"), "vendor.io");
        assert_eq!(manufacturer_from_uri("http://[::1]:80/"), "::1");
        assert_eq!(manufacturer_from_uri("urn:vendor:product"), "Unknown");
        assert_eq!(manufacturer_from_uri(""), "Unknown");
    }

    #[test]
    fn test_strongest_per_url() {
        const A: &str = "opc.tcp://a:4840";
        const B: &str = "opc.tcp://b:4840";
        let endpoints = vec![
            EndpointDescriptor::new(A, SecurityMode::None, SecurityPolicy::None, 0),
            EndpointDescriptor::new(B, SecurityMode::None, SecurityPolicy::None, 0),
            EndpointDescriptor::new(
                A,
                SecurityMode::SignAndEncrypt,
                SecurityPolicy::Basic256Sha256,
                100,
            ),
        ];
        let best = strongest_per_url(&endpoints);
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].endpoint_url, "opc.tcp://a:4840");
        assert_eq!(best[0].security_level, 100);
        assert_eq!(best[1].endpoint_url, "opc.tcp://b:4840");
    }

    #[tokio::test]
    async fn test_discover_on_network() {
        let mock = MockTransport::new();
        let url = "opc.tcp://localhost:4840";
        mock.add_server(url, application("Simulation Server", url));
        mock.add_server("opc.tcp://localhost:48010", application("Simulation Server", url));
        mock.set_endpoints(
            url,
            vec![
                EndpointDescriptor::new(url, SecurityMode::None, SecurityPolicy::None, 0),
                EndpointDescriptor::new(
                    url,
                    SecurityMode::SignAndEncrypt,
                    SecurityPolicy::Basic256Sha256,
                    100,
                ),
            ],
        );

        let servers = service(&mock).discover_on_network().await;
        assert_eq!(servers.len(), 1);

        let server = &servers[0];
        assert_eq!(server.name, "Simulation Server");
        assert_eq!(server.url, url);
        assert_eq!(server.manufacturer, "vendor.example.com");
        assert_eq!(server.security_mode, "SignAndEncrypt");
        assert_eq!(server.security_policy, "Basic256Sha256");
        assert_eq!(server.last_login_mode, LoginMode::UserName);
        assert!(server.last_connected.is_none());
    }

    #[tokio::test]
    async fn test_discover_with_lds() {
        let mock = MockTransport::new();
        mock.add_server(
            "opc.tcp://localhost:4845",
            application("Historian", "opc.tcp://hist:4840"),
        );
        mock.add_server(
            "opc.tcp://localhost:4845",
            ApplicationDescription {
                application_name: "Bare".into(),
                ..Default::default()
            },
        );

        let servers = service(&mock).discover_with_lds().await;
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].url, "opc.tcp://hist:4840");
        assert_eq!(servers[0].security_mode, "Unknown");
        assert_eq!(servers[1].url, "opc.tcp://localhost:4845");
        assert_eq!(servers[1].manufacturer, "Unknown");
        assert_eq!(servers[1].last_login_mode, LoginMode::Anonymous);
    }

    #[tokio::test]
    async fn test_get_endpoints_failure_is_empty() {
        let mock = MockTransport::new();
        mock.fail_endpoint_discovery(true);
        assert!(service(&mock).get_endpoints("opc.tcp://nowhere:4840").await.is_empty());
    }
}
