// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Certificate trust bookkeeping.
//!
//! The client never evaluates certificate chains itself; the protocol library
//! does. This module records the user's trust decisions in a PKI directory
//! the protocol library reads from:
//!
//! ```text
//! pki/
//! ├── own/          # Own application certificate
//! ├── trusted/      # Trusted server certificates (<thumbprint>.der)
//! ├── issuers/      # CA certificates
//! └── rejected/     # Rejected server certificates (<thumbprint>.der)
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use ua_inspector::certificate::{Certificate, CertificateStore, FileSystemStore};
//!
//! let store = FileSystemStore::open("/var/lib/ua-inspector/pki").await;
//! let cert = Certificate::new(server_der_bytes);
//! store.trust(&cert).await?;
//! ```

mod store;

pub use store::{CertificateStore, FileSystemStore, MemoryStore, PkiLayout};

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// =============================================================================
// Certificate
// =============================================================================

/// A DER-encoded certificate presented by a server.
///
/// The thumbprint is the uppercase hex SHA-256 digest of the DER bytes and is
/// stable for the lifetime of the certificate.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Certificate {
    der: Vec<u8>,
    thumbprint: String,
    subject: Option<String>,
}

impl Certificate {
    /// Creates a certificate from DER bytes.
    pub fn new(der: Vec<u8>) -> Self {
        let thumbprint = hex::encode_upper(Sha256::digest(&der));
        Self {
            der,
            thumbprint,
            subject: None,
        }
    }

    /// Attaches a human-readable subject name.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Returns the DER bytes.
    #[inline]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the stable fingerprint.
    #[inline]
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Returns the subject name, if known.
    #[inline]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Returns the file name under which this certificate is stored.
    pub fn file_name(&self) -> String {
        format!("{}.der", self.thumbprint)
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("thumbprint", &self.thumbprint)
            .field("subject", &self.subject)
            .field("len", &self.der.len())
            .finish()
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "{} ({})", subject, self.thumbprint),
            None => write!(f, "{}", self.thumbprint),
        }
    }
}

// =============================================================================
// TrustDecision
// =============================================================================

/// The user's verdict on one server certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustDecision {
    /// The certificate is trusted.
    Trusted,
    /// The certificate is rejected.
    Rejected,
}

impl TrustDecision {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Rejected => "rejected",
        }
    }

    /// Returns the opposite decision.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Trusted => Self::Rejected,
            Self::Rejected => Self::Trusted,
        }
    }
}

impl fmt::Display for TrustDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbprint_is_stable_sha256() {
        let a = Certificate::new(b"certificate".to_vec());
        let b = Certificate::new(b"certificate".to_vec()).with_subject("CN=Server");
        assert_eq!(a.thumbprint(), b.thumbprint());
        assert_eq!(a.thumbprint().len(), 64);
        assert!(a.thumbprint().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(a.thumbprint(), Certificate::new(b"other".to_vec()).thumbprint());
        assert_eq!(a.file_name(), format!("{}.der", a.thumbprint()));
    }

    #[test]
    fn test_debug_omits_der_bytes() {
        let cert = Certificate::new(vec![0xAB; 512]).with_subject("CN=Plc");
        let debug = format!("{:?}", cert);
        assert!(debug.contains("CN=Plc"));
        assert!(debug.contains("len: 512"));
    }

    #[test]
    fn test_trust_decision_opposite() {
        assert_eq!(TrustDecision::Trusted.opposite(), TrustDecision::Rejected);
        assert_eq!(TrustDecision::Rejected.to_string(), "rejected");
    }
}
