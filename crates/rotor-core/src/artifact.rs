//! Decoded artifacts and the rules for reading them back from storage.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rotor_pki::pem::{self, CERTIFICATE_LABEL};
use rotor_pki::{
    check_key_pair, is_expired_at, CertIdentity, Certificate, CertificateAuthority,
    CertificateRequest, PrivateKey, Validity,
};

use crate::error::{Error, Result};
use crate::store::{CertKeyRecord, NOT_AFTER_ANNOTATION, NOT_BEFORE_ANNOTATION};

/// Why a rotator replaced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationReason {
    /// Nothing was stored.
    Missing,
    /// The stored artifact could not be decoded or was inconsistent.
    Malformed,
    /// The certificate's not-before is in the future.
    NotYetValid,
    /// The certificate has expired.
    Expired,
    /// Less than the refresh threshold of validity remains.
    RefreshWindow,
    /// The leaf names a signer other than the current authority.
    IssuerChanged,
    /// The leaf signature does not verify against the current authority.
    SignatureMismatch,
    /// The requested hostnames differ from the recorded ones.
    HostnamesChanged,
}

impl fmt::Display for RegenerationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Missing => "missing",
            Self::Malformed => "malformed",
            Self::NotYetValid => "not yet valid",
            Self::Expired => "expired",
            Self::RefreshWindow => "inside refresh window",
            Self::IssuerChanged => "issuer changed",
            Self::SignatureMismatch => "not signed by current authority",
            Self::HostnamesChanged => "hostnames changed",
        })
    }
}

/// Result of one `ensure` call.
#[derive(Debug)]
pub struct Ensured<T> {
    /// The artifact now in force.
    pub value: T,
    /// Whether the store was written.
    pub written: bool,
    /// Why the artifact was regenerated, if it was.
    pub reason: Option<RegenerationReason>,
    /// Malformed input that was repaired along the way.
    pub recovered: Option<Error>,
}

impl<T> Ensured<T> {
    pub(crate) const fn unchanged(value: T) -> Self {
        Self {
            value,
            written: false,
            reason: None,
            recovered: None,
        }
    }
}

/// A certificate, its private key and the annotations stored with them.
#[derive(Debug, Clone)]
pub struct CertKeyArtifact {
    certificate: Certificate,
    key: PrivateKey,
    annotations: BTreeMap<String, String>,
}

impl CertKeyArtifact {
    /// Wraps a freshly generated pair, annotated with its validity window.
    #[must_use]
    pub fn new(certificate: Certificate, key: PrivateKey) -> Self {
        Self {
            annotations: validity_annotations(&certificate),
            certificate,
            key,
        }
    }

    /// Adds or replaces an annotation.
    #[must_use]
    pub fn with_annotation(mut self, name: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(name.to_string(), value.into());
        self
    }

    /// Decodes a stored record, checking that the key belongs to the certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedArtifact`] naming `key_name` on any failure.
    pub fn decode(key_name: &str, record: &CertKeyRecord) -> Result<Self> {
        let certificate = Certificate::from_pem(&record.cert_pem)
            .map_err(|e| Error::malformed(key_name, format!("certificate: {e}")))?;
        let key = PrivateKey::from_pem(&record.key_pem)
            .map_err(|e| Error::malformed(key_name, format!("private key: {e}")))?;
        check_key_pair(&certificate, &key).map_err(|e| Error::malformed(key_name, e))?;
        Ok(Self {
            certificate,
            key,
            annotations: record.annotations.clone(),
        })
    }

    /// Encodes the artifact for storage.
    #[must_use]
    pub fn to_record(&self) -> CertKeyRecord {
        CertKeyRecord {
            cert_pem: self.certificate.pem(),
            key_pem: self.key.pem(),
            annotations: self.annotations.clone(),
        }
    }

    /// The certificate.
    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// The private key.
    #[must_use]
    pub const fn key(&self) -> &PrivateKey {
        &self.key
    }

    /// All annotations.
    #[must_use]
    pub const fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    /// A single annotation.
    #[must_use]
    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.annotations.get(name).map(String::as_str)
    }
}

/// A self-signed CA able to sign leaves.
#[derive(Debug)]
pub struct SigningAuthority {
    ca: CertificateAuthority,
    annotations: BTreeMap<String, String>,
}

impl SigningAuthority {
    /// Generates a new authority named `name` valid over `validity`.
    ///
    /// # Errors
    ///
    /// Returns the PKI error if key or certificate generation fails.
    pub fn generate(name: &str, validity: &Validity) -> rotor_pki::Result<Self> {
        let ca = CertificateAuthority::generate(name, validity)?;
        let annotations = validity_annotations(ca.root_certificate());
        Ok(Self { ca, annotations })
    }

    /// Decodes a stored authority.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedArtifact`] if the record does not hold a
    /// self-signed CA whose key matches its certificate.
    pub fn decode(key_name: &str, record: &CertKeyRecord) -> Result<Self> {
        let artifact = CertKeyArtifact::decode(key_name, record)?;
        let ca = CertificateAuthority::from_existing(artifact.certificate, artifact.key)
            .map_err(|e| Error::malformed(key_name, e))?;
        Ok(Self {
            ca,
            annotations: artifact.annotations,
        })
    }

    /// Encodes the authority for storage.
    #[must_use]
    pub fn to_record(&self) -> CertKeyRecord {
        CertKeyRecord {
            cert_pem: self.ca.root_certificate().pem(),
            key_pem: self.ca.root_key().pem(),
            annotations: self.annotations.clone(),
        }
    }

    /// The CA certificate.
    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        self.ca.root_certificate()
    }

    /// Subject common name, which every leaf it signs names as issuer.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.ca.root_certificate().subject()
    }

    /// Bundle identity of the CA certificate.
    #[must_use]
    pub fn identity(&self) -> CertIdentity {
        self.ca.root_certificate().identity()
    }

    /// Signs a new leaf for `request` over `validity`.
    ///
    /// # Errors
    ///
    /// Returns the PKI error if issuance fails.
    pub fn issue(
        &self,
        request: &CertificateRequest,
        validity: &Validity,
    ) -> rotor_pki::Result<(Certificate, PrivateKey)> {
        self.ca.issue(request, validity)
    }
}

/// Ordered, identity-deduplicated set of CA certificates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustBundle {
    certificates: Vec<Certificate>,
}

impl TrustBundle {
    /// Creates an empty bundle.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            certificates: Vec::new(),
        }
    }

    /// Parses a PEM bundle, keeping every certificate that decodes.
    ///
    /// Returns the bundle together with a description of each dropped block.
    #[must_use]
    pub fn parse_lenient(input: &str) -> (Self, Vec<String>) {
        let mut bundle = Self::new();
        let mut dropped = Vec::new();

        for (index, block) in pem::decode_blocks(input).into_iter().enumerate() {
            let parsed = block.and_then(|block| {
                if block.label == CERTIFICATE_LABEL {
                    Certificate::from_der(&block.der)
                } else {
                    Err(rotor_pki::Error::Parse(format!(
                        "unexpected PEM label '{}'",
                        block.label
                    )))
                }
            });
            match parsed {
                Ok(cert) => {
                    bundle.push_back(cert);
                }
                Err(e) => dropped.push(format!("block {index}: {e}")),
            }
        }

        (bundle, dropped)
    }

    /// Encodes the bundle as concatenated PEM.
    #[must_use]
    pub fn to_pem(&self) -> String {
        self.certificates.iter().map(Certificate::pem).collect()
    }

    /// Returns true if a certificate with `identity` is present.
    #[must_use]
    pub fn contains(&self, identity: &CertIdentity) -> bool {
        self.certificates.iter().any(|c| &c.identity() == identity)
    }

    /// Inserts `cert` at the front unless its identity is already present.
    pub fn push_front(&mut self, cert: Certificate) -> bool {
        if self.contains(&cert.identity()) {
            return false;
        }
        self.certificates.insert(0, cert);
        true
    }

    /// Appends `cert` unless its identity is already present.
    pub fn push_back(&mut self, cert: Certificate) -> bool {
        if self.contains(&cert.identity()) {
            return false;
        }
        self.certificates.push(cert);
        true
    }

    /// Removes entries whose not-after has passed at `now`, returning them.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> Vec<CertIdentity> {
        let mut removed = Vec::new();
        self.certificates.retain(|cert| {
            if is_expired_at(cert, now) {
                removed.push(cert.identity());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Certificates in bundle order.
    #[must_use]
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// Identities in bundle order.
    #[must_use]
    pub fn identities(&self) -> Vec<CertIdentity> {
        self.certificates.iter().map(Certificate::identity).collect()
    }

    /// Number of certificates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Returns true if the bundle holds no certificates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// A leaf certificate and key signed by a signing authority.
#[derive(Debug, Clone)]
pub struct LeafArtifact {
    artifact: CertKeyArtifact,
}

impl LeafArtifact {
    pub(crate) const fn new(artifact: CertKeyArtifact) -> Self {
        Self { artifact }
    }

    /// The leaf certificate.
    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        self.artifact.certificate()
    }

    /// The leaf private key.
    #[must_use]
    pub const fn key(&self) -> &PrivateKey {
        self.artifact.key()
    }

    /// Issuer common name taken from the certificate.
    #[must_use]
    pub fn issuer(&self) -> &str {
        self.artifact.certificate().issuer()
    }

    /// The stored annotations.
    #[must_use]
    pub const fn annotations(&self) -> &BTreeMap<String, String> {
        self.artifact.annotations()
    }

    /// The underlying artifact.
    #[must_use]
    pub const fn artifact(&self) -> &CertKeyArtifact {
        &self.artifact
    }
}

fn validity_annotations(cert: &Certificate) -> BTreeMap<String, String> {
    let rfc3339 = |at: DateTime<Utc>| at.to_rfc3339_opts(SecondsFormat::Secs, true);
    BTreeMap::from([
        (NOT_BEFORE_ANNOTATION.to_string(), rfc3339(cert.not_before())),
        (NOT_AFTER_ANNOTATION.to_string(), rfc3339(cert.not_after())),
    ])
}
