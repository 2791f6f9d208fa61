//! Persistence abstraction for rotated artifacts.
//!
//! A store maps artifact keys to records. Every write is an atomic replace of
//! the whole record; readers either see the previous record or the new one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Annotation holding the certificate's not-before time (RFC 3339).
pub const NOT_BEFORE_ANNOTATION: &str = "rotor.dev/certificate-not-before";

/// Annotation holding the certificate's not-after time (RFC 3339).
pub const NOT_AFTER_ANNOTATION: &str = "rotor.dev/certificate-not-after";

/// Annotation holding the subject common name of the signer.
pub const ISSUER_ANNOTATION: &str = "rotor.dev/certificate-issuer";

/// Annotation holding the comma-joined sorted hostnames of a leaf.
pub const HOSTNAMES_ANNOTATION: &str = "rotor.dev/certificate-hostnames";

/// Callback fired when a stored artifact changes by any means.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Key/value persistence for one record type.
pub trait ArtifactStore<R>: Send + Sync {
    /// Reads the record stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Store`] on I/O failure and
    /// [`crate::Error::MalformedArtifact`] if the stored bytes cannot be decoded.
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<R>>>;

    /// Atomically replaces the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Store`] if the write did not happen.
    fn write<'a>(&'a self, key: &'a str, record: R) -> BoxFuture<'a, Result<()>>;

    /// Registers `callback` to run whenever the record under `key` changes.
    fn on_change(&self, key: &str, callback: ChangeCallback);
}

/// Certificate and key as persisted, plus free-form annotations.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertKeyRecord {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key.
    pub key_pem: String,
    /// Metadata such as the validity window and issuer.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl fmt::Debug for CertKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertKeyRecord")
            .field("cert_pem_len", &self.cert_pem.len())
            .field("key_pem", &"[REDACTED]")
            .field("annotations", &self.annotations)
            .finish()
    }
}

/// Trust bundle as persisted: concatenated PEM certificates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecord {
    /// Concatenated PEM certificates, newest authority first.
    pub ca_bundle_pem: String,
}

/// Signing authority persistence.
pub type AuthorityStore = dyn ArtifactStore<CertKeyRecord>;

/// Trust bundle persistence.
pub type BundleStore = dyn ArtifactStore<BundleRecord>;

/// Leaf certificate persistence.
pub type LeafStore = dyn ArtifactStore<CertKeyRecord>;

/// A store bound to the one key a rotator owns.
pub struct StoreRef<R> {
    store: Arc<dyn ArtifactStore<R>>,
    key: String,
}

impl<R> StoreRef<R> {
    /// Binds `store` to `key`.
    pub fn new(store: Arc<dyn ArtifactStore<R>>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// The bound artifact key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the bound record.
    ///
    /// # Errors
    ///
    /// See [`ArtifactStore::read`].
    pub async fn read(&self) -> Result<Option<R>> {
        self.store.read(&self.key).await
    }

    /// Replaces the bound record.
    ///
    /// # Errors
    ///
    /// See [`ArtifactStore::write`].
    pub async fn write(&self, record: R) -> Result<()> {
        self.store.write(&self.key, record).await
    }

    /// Registers a change callback for the bound key.
    pub fn on_change(&self, callback: ChangeCallback) {
        self.store.on_change(&self.key, callback);
    }
}

impl<R> Clone for StoreRef<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
        }
    }
}

impl<R> fmt::Debug for StoreRef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRef").field("key", &self.key).finish_non_exhaustive()
    }
}
