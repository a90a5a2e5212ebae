// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Trust store trait and implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Certificate, TrustDecision};
use crate::error::{OpcUaError, OpcUaResult, SecurityError};

// =============================================================================
// CertificateStore Trait
// =============================================================================

/// Records trust decisions for server certificates.
///
/// Writes are idempotent: recording a decision that already exists leaves the
/// store untouched and returns `false`.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Returns the store name.
    fn name(&self) -> &str;

    /// Records the certificate as trusted. Returns `true` if it was newly written.
    async fn trust(&self, certificate: &Certificate) -> OpcUaResult<bool>;

    /// Records the certificate as rejected. Returns `true` if it was newly written.
    async fn reject(&self, certificate: &Certificate) -> OpcUaResult<bool>;

    /// Returns the recorded decision for a thumbprint.
    async fn decision(&self, thumbprint: &str) -> OpcUaResult<Option<TrustDecision>>;
}

// =============================================================================
// PkiLayout
// =============================================================================

/// Fixed directory layout under a PKI root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkiLayout {
    /// Root directory.
    pub root: PathBuf,
    /// Own application certificate.
    pub own_dir: PathBuf,
    /// Trusted server certificates.
    pub trusted_dir: PathBuf,
    /// CA certificates.
    pub issuers_dir: PathBuf,
    /// Rejected server certificates.
    pub rejected_dir: PathBuf,
}

impl PkiLayout {
    /// Creates the layout under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            own_dir: root.join("own"),
            trusted_dir: root.join("trusted"),
            issuers_dir: root.join("issuers"),
            rejected_dir: root.join("rejected"),
            root,
        }
    }

    /// Returns all managed directories.
    pub fn all_dirs(&self) -> [&Path; 4] {
        [
            &self.own_dir,
            &self.trusted_dir,
            &self.issuers_dir,
            &self.rejected_dir,
        ]
    }

    /// Returns the directory that holds certificates with the given decision.
    pub fn dir_for(&self, decision: TrustDecision) -> &Path {
        match decision {
            TrustDecision::Trusted => &self.trusted_dir,
            TrustDecision::Rejected => &self.rejected_dir,
        }
    }
}

// =============================================================================
// FileSystemStore
// =============================================================================

/// File-system trust store.
///
/// Each decision is a `<thumbprint>.der` file in `trusted/` or `rejected/`.
/// Directory creation failures are logged; the store then behaves as if
/// nothing were trusted and reports write failures per call.
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    layout: PkiLayout,
}

impl FileSystemStore {
    /// Opens the store, creating the directory layout eagerly.
    pub async fn open(root: impl Into<PathBuf>) -> Self {
        let store = Self {
            layout: PkiLayout::new(root),
        };
        store.create_dirs().await;
        store
    }

    /// Returns the directory layout.
    pub fn layout(&self) -> &PkiLayout {
        &self.layout
    }

    async fn create_dirs(&self) {
        let mut failures = 0;
        for dir in self.layout.all_dirs() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                failures += 1;
                tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Failed to create certificate store directory"
                );
            }
        }

        if failures == 0 {
            tracing::debug!(root = %self.layout.root.display(), "Certificate store ready");
        }
    }

    async fn record(
        &self,
        certificate: &Certificate,
        decision: TrustDecision,
    ) -> OpcUaResult<bool> {
        let path = self.layout.dir_for(decision).join(certificate.file_name());

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::trace!(
                thumbprint = certificate.thumbprint(),
                decision = %decision,
                "Certificate decision already recorded"
            );
            return Ok(false);
        }

        tokio::fs::write(&path, certificate.der()).await.map_err(|e| {
            OpcUaError::security(SecurityError::store(
                path.display().to_string(),
                e.to_string(),
            ))
        })?;

        // A certificate carries one decision at a time.
        let stale = self
            .layout
            .dir_for(decision.opposite())
            .join(certificate.file_name());
        if tokio::fs::try_exists(&stale).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_file(&stale).await {
                tracing::warn!(
                    path = %stale.display(),
                    error = %e,
                    "Failed to remove stale decision"
                );
            }
        }

        tracing::info!(
            thumbprint = certificate.thumbprint(),
            subject = certificate.subject().unwrap_or("unknown"),
            decision = %decision,
            "Recorded certificate decision"
        );
        Ok(true)
    }
}

#[async_trait]
impl CertificateStore for FileSystemStore {
    fn name(&self) -> &str {
        "FileSystemStore"
    }

    async fn trust(&self, certificate: &Certificate) -> OpcUaResult<bool> {
        self.record(certificate, TrustDecision::Trusted).await
    }

    async fn reject(&self, certificate: &Certificate) -> OpcUaResult<bool> {
        self.record(certificate, TrustDecision::Rejected).await
    }

    async fn decision(&self, thumbprint: &str) -> OpcUaResult<Option<TrustDecision>> {
        let file_name = format!("{}.der", thumbprint);
        for decision in [TrustDecision::Trusted, TrustDecision::Rejected] {
            let path = self.layout.dir_for(decision).join(&file_name);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(Some(decision));
            }
        }
        Ok(None)
    }
}

// =============================================================================
// MemoryStore (for testing)
// =============================================================================

/// In-memory trust store for testing.
#[derive(Debug, Default)]
pub struct MemoryStore {
    decisions: RwLock<HashMap<String, TrustDecision>>,
}

impl MemoryStore {
    /// Creates a new memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of recorded decisions.
    pub async fn len(&self) -> usize {
        self.decisions.read().await.len()
    }

    /// Returns `true` if no decision is recorded.
    pub async fn is_empty(&self) -> bool {
        self.decisions.read().await.is_empty()
    }

    async fn record(&self, certificate: &Certificate, decision: TrustDecision) -> bool {
        let mut decisions = self.decisions.write().await;
        let previous = decisions.insert(certificate.thumbprint().to_string(), decision);
        previous != Some(decision)
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    fn name(&self) -> &str {
        "MemoryStore"
    }

    async fn trust(&self, certificate: &Certificate) -> OpcUaResult<bool> {
        Ok(self.record(certificate, TrustDecision::Trusted).await)
    }

    async fn reject(&self, certificate: &Certificate) -> OpcUaResult<bool> {
        Ok(self.record(certificate, TrustDecision::Rejected).await)
    }

    async fn decision(&self, thumbprint: &str) -> OpcUaResult<Option<TrustDecision>> {
        Ok(self.decisions.read().await.get(thumbprint).copied())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(seed: u8) -> Certificate {
        Certificate::new(vec![seed; 64]).with_subject(format!("CN=Server{}", seed))
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemStore::open(dir.path().join("pki")).await;

        for sub in store.layout().all_dirs() {
            assert!(sub.is_dir(), "{} missing", sub.display());
        }
        assert!(store.layout().issuers_dir.ends_with("issuers"));
    }

    #[tokio::test]
    async fn test_trust_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemStore::open(dir.path()).await;
        let cert = cert(1);

        assert!(store.trust(&cert).await.unwrap());
        assert!(!store.trust(&cert).await.unwrap());

        let path = store.layout().trusted_dir.join(cert.file_name());
        assert_eq!(std::fs::read(path).unwrap(), cert.der());
        assert_eq!(
            store.decision(cert.thumbprint()).await.unwrap(),
            Some(TrustDecision::Trusted)
        );
    }

    #[tokio::test]
    async fn test_reject_then_trust_moves_decision() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemStore::open(dir.path()).await;
        let cert = cert(2);

        assert!(store.reject(&cert).await.unwrap());
        assert_eq!(
            store.decision(cert.thumbprint()).await.unwrap(),
            Some(TrustDecision::Rejected)
        );

        assert!(store.trust(&cert).await.unwrap());
        assert!(!store.layout().rejected_dir.join(cert.file_name()).exists());
        assert_eq!(
            store.decision(cert.thumbprint()).await.unwrap(),
            Some(TrustDecision::Trusted)
        );
    }

    #[tokio::test]
    async fn test_unwritable_root_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        // Directory creation fails under a regular file; opening still succeeds.
        let store = FileSystemStore::open(blocker.join("pki")).await;
        assert_eq!(store.decision(cert(3).thumbprint()).await.unwrap(), None);

        let err = store.trust(&cert(3)).await.unwrap_err();
        assert_eq!(err.category(), "security");
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await);

        let cert = cert(4);
        assert!(store.trust(&cert).await.unwrap());
        assert!(!store.trust(&cert).await.unwrap());
        assert!(store.reject(&cert).await.unwrap());
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.decision(cert.thumbprint()).await.unwrap(),
            Some(TrustDecision::Rejected)
        );
    }
}
