// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Endpoint selection.
//!
//! Picks one endpoint from the list a server advertises:
//!
//! | Login mode | Candidates | Pick |
//! |---|---|---|
//! | Anonymous | mode `None`, else all | lowest security level |
//! | UserName / Certificate | mode other than `None`, else all | highest security level |
//!
//! Ties go to a strong policy, then a non-deprecated one, then list order.
//! Selection is deterministic for a given list.
//!
//! When the endpoint query fails, [`EndpointResolver`] synthesizes an
//! unsecured endpoint at the requested URL so the connect attempt fails fast
//! with a clear error if the server requires security.

use std::cmp::Ordering;
use std::time::Duration;

use crate::client::OpcUaTransport;
use crate::types::{EndpointDescriptor, LoginMode};

// =============================================================================
// Selection
// =============================================================================

/// Selects an endpoint for the login mode. Returns `None` for an empty list.
pub fn select_endpoint(
    endpoints: &[EndpointDescriptor],
    login_mode: LoginMode,
) -> Option<&EndpointDescriptor> {
    match login_mode {
        LoginMode::Anonymous => {
            let unsecured: Vec<&EndpointDescriptor> =
                endpoints.iter().filter(|e| e.is_unsecured()).collect();
            let pool = if unsecured.is_empty() {
                endpoints.iter().collect()
            } else {
                unsecured
            };
            // min_by keeps the first of equal elements.
            pool.into_iter()
                .min_by(|a, b| a.security_level.cmp(&b.security_level))
        }
        LoginMode::UserName | LoginMode::Certificate => {
            let secured: Vec<&EndpointDescriptor> =
                endpoints.iter().filter(|e| !e.is_unsecured()).collect();
            if secured.is_empty() {
                return endpoints.first();
            }
            secured
                .into_iter()
                .rev()
                .max_by(|a, b| compare_secured(a, b))
        }
    }
}

/// Orders secured candidates: level, then policy strength.
///
/// Callers iterate in reverse so that `max_by`, which keeps the last maximum,
/// returns the earliest endpoint among full ties.
fn compare_secured(a: &EndpointDescriptor, b: &EndpointDescriptor) -> Ordering {
    a.security_level
        .cmp(&b.security_level)
        .then_with(|| policy_rank(a).cmp(&policy_rank(b)))
}

fn policy_rank(endpoint: &EndpointDescriptor) -> u8 {
    match endpoint.security_policy() {
        Some(policy) if policy.is_strong() => 2,
        Some(policy) if !policy.is_deprecated() => 1,
        _ => 0,
    }
}

// =============================================================================
// EndpointResolver
// =============================================================================

/// Outcome of endpoint resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// The endpoint to connect to.
    pub endpoint: EndpointDescriptor,
    /// `true` if discovery failed and the unsecured fallback was synthesized.
    pub fallback: bool,
}

/// Queries a server's endpoints and selects one.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    timeout: Duration,
}

impl EndpointResolver {
    /// Creates a resolver that bounds the endpoint query by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Resolves the endpoint for `url`, never failing.
    pub async fn resolve<T: OpcUaTransport + ?Sized>(
        &self,
        transport: &T,
        url: &str,
        login_mode: LoginMode,
    ) -> ResolvedEndpoint {
        let reason = match tokio::time::timeout(self.timeout, transport.get_endpoints(url)).await {
            Ok(Ok(endpoints)) => match select_endpoint(&endpoints, login_mode) {
                Some(endpoint) => {
                    tracing::debug!(
                        url,
                        login_mode = %login_mode,
                        advertised = endpoints.len(),
                        endpoint = %endpoint,
                        "Endpoint selected"
                    );
                    return ResolvedEndpoint {
                        endpoint: endpoint.clone(),
                        fallback: false,
                    };
                }
                None => "server advertised no endpoints".to_string(),
            },
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("endpoint query timed out after {:?}", self.timeout),
        };

        tracing::warn!(
            url,
            reason = %reason,
            "Endpoint discovery failed, falling back to unsecured endpoint"
        );
        ResolvedEndpoint {
            endpoint: EndpointDescriptor::unsecured(url),
            fallback: true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::types::{SecurityMode, SecurityPolicy};

    const URL: &str = "opc.tcp://plc:4840";

    fn ep(mode: SecurityMode, policy: SecurityPolicy, level: u8) -> EndpointDescriptor {
        EndpointDescriptor::new(URL, mode, policy, level)
    }

    fn mixed() -> Vec<EndpointDescriptor> {
        vec![
            ep(SecurityMode::SignAndEncrypt, SecurityPolicy::Basic256Sha256, 110),
            ep(SecurityMode::None, SecurityPolicy::None, 5),
            ep(SecurityMode::Sign, SecurityPolicy::Basic256Sha256, 60),
            ep(SecurityMode::None, SecurityPolicy::None, 0),
            ep(SecurityMode::SignAndEncrypt, SecurityPolicy::Basic128Rsa15, 30),
        ]
    }

    #[test]
    fn test_anonymous_prefers_unsecured() {
        let endpoints = mixed();
        let chosen = select_endpoint(&endpoints, LoginMode::Anonymous).unwrap();
        assert_eq!(chosen.security_mode, SecurityMode::None);
        assert_eq!(chosen.security_level, 0);
    }

    #[test]
    fn test_anonymous_never_secured_when_none_present() {
        for rotation in 0..mixed().len() {
            let mut endpoints = mixed();
            endpoints.rotate_left(rotation);
            let chosen = select_endpoint(&endpoints, LoginMode::Anonymous).unwrap();
            assert!(chosen.is_unsecured());
        }
    }

    #[test]
    fn test_anonymous_falls_back_to_lowest_level() {
        let endpoints = vec![
            ep(SecurityMode::SignAndEncrypt, SecurityPolicy::Basic256Sha256, 90),
            ep(SecurityMode::SignAndEncrypt, SecurityPolicy::Aes128Sha256RsaOaep, 40),
        ];
        let chosen = select_endpoint(&endpoints, LoginMode::Anonymous).unwrap();
        assert_eq!(chosen.security_level, 40);
        assert_eq!(chosen.security_mode, SecurityMode::SignAndEncrypt);
    }

    #[test]
    fn test_authenticated_picks_max_secured_level() {
        for rotation in 0..mixed().len() {
            let mut endpoints = mixed();
            endpoints.rotate_left(rotation);
            let max = endpoints
                .iter()
                .filter(|e| !e.is_unsecured())
                .map(|e| e.security_level)
                .max()
                .unwrap();
            let chosen = select_endpoint(&endpoints, LoginMode::UserName).unwrap();
            assert_eq!(chosen.security_level, max);
            assert!(!chosen.is_unsecured());
        }
    }

    #[test]
    fn test_authenticated_tie_prefers_strong_then_order() {
        let endpoints = vec![
            ep(SecurityMode::Sign, SecurityPolicy::Basic256, 50),
            ep(SecurityMode::Sign, SecurityPolicy::Basic256Sha256, 50),
            ep(SecurityMode::SignAndEncrypt, SecurityPolicy::Basic256Sha256, 50),
        ];
        let chosen = select_endpoint(&endpoints, LoginMode::UserName).unwrap();
        assert_eq!(chosen.security_policy(), Some(SecurityPolicy::Basic256Sha256));
        assert_eq!(chosen.security_mode, SecurityMode::Sign);
    }

    #[test]
    fn test_authenticated_without_secured_takes_first() {
        let endpoints = vec![
            ep(SecurityMode::None, SecurityPolicy::None, 3),
            ep(SecurityMode::None, SecurityPolicy::None, 1),
        ];
        let chosen = select_endpoint(&endpoints, LoginMode::UserName).unwrap();
        assert_eq!(chosen.security_level, 3);
    }

    #[test]
    fn test_empty_list() {
        assert!(select_endpoint(&[], LoginMode::Anonymous).is_none());
        assert!(select_endpoint(&[], LoginMode::UserName).is_none());
    }

    #[tokio::test]
    async fn test_resolver_uses_advertised_endpoints() {
        let mock = MockTransport::new();
        mock.set_endpoints(URL, mixed());

        let resolved = EndpointResolver::new(Duration::from_secs(1))
            .resolve(&mock, URL, LoginMode::UserName)
            .await;
        assert!(!resolved.fallback);
        assert_eq!(resolved.endpoint.security_level, 110);
    }

    #[tokio::test]
    async fn test_resolver_falls_back_on_failure() {
        let mock = MockTransport::new();
        mock.fail_endpoint_discovery(true);

        let resolved = EndpointResolver::new(Duration::from_secs(1))
            .resolve(&mock, URL, LoginMode::UserName)
            .await;
        assert!(resolved.fallback);
        assert_eq!(resolved.endpoint, EndpointDescriptor::unsecured(URL));
    }

    #[tokio::test]
    async fn test_resolver_falls_back_on_empty_list() {
        let mock = MockTransport::new();
        mock.set_endpoints(URL, Vec::new());

        let resolved = EndpointResolver::new(Duration::from_secs(1))
            .resolve(&mock, URL, LoginMode::Anonymous)
            .await;
        assert!(resolved.fallback);
        assert_eq!(resolved.endpoint.security_level, 0);
    }
}
