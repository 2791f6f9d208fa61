//! Core PKI types for certificate management.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::pem;

/// Identity of a certificate: subject common name plus serial number.
///
/// Two certificates with the same identity are treated as the same trust
/// bundle entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CertIdentity {
    /// Subject common name.
    pub subject: String,
    /// Lowercase hex serial number.
    pub serial: String,
}

impl std::fmt::Display for CertIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.subject, self.serial)
    }
}

/// A validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    /// Start of the window.
    pub not_before: DateTime<Utc>,
    /// End of the window.
    pub not_after: DateTime<Utc>,
}

impl Validity {
    /// Creates a window of `duration` starting at `start`.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            not_before: start,
            not_after: start + duration,
        }
    }

    /// Pulls `not_after` back to `limit` if the window would extend past it.
    #[must_use]
    pub fn clamp_to(self, limit: DateTime<Utc>) -> Self {
        Self {
            not_before: self.not_before,
            not_after: self.not_after.min(limit),
        }
    }

    /// Returns the length of the window.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.not_after - self.not_before
    }
}

/// Key usage purposes for certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyUsage {
    /// TLS server authentication.
    ServerAuth,
    /// TLS client authentication.
    ClientAuth,
}

impl KeyUsage {
    /// Returns the OID string for this key usage.
    #[must_use]
    pub const fn oid(&self) -> &'static str {
        match self {
            Self::ServerAuth => "1.3.6.1.5.5.7.3.1",
            Self::ClientAuth => "1.3.6.1.5.5.7.3.2",
        }
    }
}

/// Subject Alternative Name types.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubjectAltName {
    /// DNS name.
    Dns(String),
    /// IP address.
    Ip(std::net::IpAddr),
}

impl SubjectAltName {
    /// Parses a hostname, treating anything that parses as an IP address as one.
    #[must_use]
    pub fn from_hostname(hostname: &str) -> Self {
        hostname
            .parse::<std::net::IpAddr>()
            .map_or_else(|_| Self::Dns(hostname.to_string()), Self::Ip)
    }
}

impl std::fmt::Display for SubjectAltName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dns(dns) => f.write_str(dns),
            Self::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

/// Request to issue a new leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// Subject common name.
    pub subject: String,
    /// Subject alternative names.
    pub san: Vec<SubjectAltName>,
    /// Key usage purposes.
    pub key_usage: Vec<KeyUsage>,
}

impl CertificateRequest {
    /// Creates a new certificate request builder.
    #[must_use]
    pub fn builder(subject: impl Into<String>) -> CertificateRequestBuilder {
        CertificateRequestBuilder {
            subject: subject.into(),
            san: Vec::new(),
            key_usage: Vec::new(),
        }
    }

    /// Validates the certificate request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.subject.is_empty() {
            return Err(Error::Validation("subject cannot be empty".into()));
        }
        if self.key_usage.is_empty() {
            return Err(Error::Validation("at least one key usage is required".into()));
        }
        Ok(())
    }
}

/// Builder for certificate requests.
#[derive(Debug)]
pub struct CertificateRequestBuilder {
    subject: String,
    san: Vec<SubjectAltName>,
    key_usage: Vec<KeyUsage>,
}

impl CertificateRequestBuilder {
    /// Adds a DNS subject alternative name.
    #[must_use]
    pub fn dns(mut self, dns: impl Into<String>) -> Self {
        self.san.push(SubjectAltName::Dns(dns.into()));
        self
    }

    /// Adds an IP subject alternative name.
    #[must_use]
    pub fn ip(mut self, ip: std::net::IpAddr) -> Self {
        self.san.push(SubjectAltName::Ip(ip));
        self
    }

    /// Adds an already typed subject alternative name.
    #[must_use]
    pub fn san(mut self, san: SubjectAltName) -> Self {
        self.san.push(san);
        self
    }

    /// Adds a key usage.
    #[must_use]
    pub fn key_usage(mut self, usage: KeyUsage) -> Self {
        if !self.key_usage.contains(&usage) {
            self.key_usage.push(usage);
        }
        self
    }

    /// Adds server authentication key usage.
    #[must_use]
    pub fn server_auth(self) -> Self {
        self.key_usage(KeyUsage::ServerAuth)
    }

    /// Adds client authentication key usage.
    #[must_use]
    pub fn client_auth(self) -> Self {
        self.key_usage(KeyUsage::ClientAuth)
    }

    /// Builds the certificate request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid.
    pub fn build(self) -> Result<CertificateRequest> {
        let request = CertificateRequest {
            subject: self.subject,
            san: self.san,
            key_usage: self.key_usage,
        };
        request.validate()?;
        Ok(request)
    }
}

/// A DER-encoded X.509 certificate with metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// DER-encoded certificate bytes.
    der: Vec<u8>,
    /// Certificate validity start time.
    not_before: DateTime<Utc>,
    /// Certificate validity end time.
    not_after: DateTime<Utc>,
    /// Subject common name.
    subject: String,
    /// Issuer common name.
    issuer: String,
    /// Lowercase hex serial number.
    serial: String,
    /// Whether basic constraints mark this certificate as a CA.
    is_ca: bool,
    /// Subject alternative names.
    san: Vec<SubjectAltName>,
}

impl Certificate {
    /// Parses a certificate from DER-encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        use x509_parser::prelude::*;

        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Parse(format!("failed to parse certificate: {e}")))?;

        let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
            .ok_or_else(|| Error::Parse("invalid not_before timestamp".into()))?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| Error::Parse("invalid not_after timestamp".into()))?;

        let subject = extract_common_name(cert.subject())?;
        let issuer = extract_common_name(cert.issuer())?;
        let serial = cert
            .raw_serial()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        let san = extract_san(&cert);

        Ok(Self {
            der: der.to_vec(),
            not_before,
            not_after,
            subject,
            issuer,
            serial,
            is_ca: cert.is_ca(),
            san,
        })
    }

    /// Parses a certificate from a single PEM block.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM armor or the certificate is invalid.
    pub fn from_pem(input: &str) -> Result<Self> {
        let der = pem::decode_single(input, pem::CERTIFICATE_LABEL)?;
        Self::from_der(&der)
    }

    /// Returns the DER-encoded certificate bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded certificate.
    #[must_use]
    pub fn pem(&self) -> String {
        pem::encode(pem::CERTIFICATE_LABEL, &self.der)
    }

    /// Returns the certificate validity start time.
    #[must_use]
    pub const fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// Returns the certificate validity end time.
    #[must_use]
    pub const fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns the validity window.
    #[must_use]
    pub const fn validity(&self) -> Validity {
        Validity {
            not_before: self.not_before,
            not_after: self.not_after,
        }
    }

    /// Returns the subject common name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the issuer common name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the hex serial number.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns true if the certificate is marked as a CA.
    #[must_use]
    pub const fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Returns true if subject and issuer are the same.
    #[must_use]
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Returns the subject alternative names.
    #[must_use]
    pub fn san(&self) -> &[SubjectAltName] {
        &self.san
    }

    /// Returns the bundle identity of this certificate.
    #[must_use]
    pub fn identity(&self) -> CertIdentity {
        CertIdentity {
            subject: self.subject.clone(),
            serial: self.serial.clone(),
        }
    }
}

/// Extracts the common name from an X.509 name.
fn extract_common_name(name: &x509_parser::x509::X509Name) -> Result<String> {
    for rdn in name.iter() {
        for attr in rdn.iter() {
            if attr.attr_type() == &x509_parser::oid_registry::OID_X509_COMMON_NAME {
                return attr
                    .as_str()
                    .map(String::from)
                    .map_err(|e| Error::Parse(format!("failed to parse CN: {e}")));
            }
        }
    }
    Err(Error::Parse("common name not found".into()))
}

/// Extracts SANs from a certificate.
fn extract_san(cert: &x509_parser::certificate::X509Certificate) -> Vec<SubjectAltName> {
    let mut sans = Vec::new();

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            match name {
                x509_parser::extensions::GeneralName::DNSName(dns) => {
                    sans.push(SubjectAltName::Dns((*dns).to_string()));
                }
                x509_parser::extensions::GeneralName::IPAddress(ip_bytes) => {
                    if let Some(ip) = parse_ip_bytes(ip_bytes) {
                        sans.push(SubjectAltName::Ip(ip));
                    }
                }
                _ => {}
            }
        }
    }

    sans
}

/// Parses IP address bytes into an `IpAddr`.
fn parse_ip_bytes(bytes: &[u8]) -> Option<std::net::IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(std::net::IpAddr::V4(std::net::Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(std::net::IpAddr::V6(std::net::Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// A private key with secure memory handling.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    /// PKCS#8 DER-encoded private key bytes.
    der: Vec<u8>,
}

impl PrivateKey {
    /// Creates a new private key from DER-encoded bytes.
    #[must_use]
    pub const fn new(der: Vec<u8>) -> Self {
        Self { der }
    }

    /// Parses a private key from a single PEM block.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM armor is invalid.
    pub fn from_pem(input: &str) -> Result<Self> {
        pem::decode_single(input, pem::PRIVATE_KEY_LABEL).map(Self::new)
    }

    /// Returns the DER-encoded private key bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded private key.
    #[must_use]
    pub fn pem(&self) -> String {
        pem::encode(pem::PRIVATE_KEY_LABEL, &self.der)
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("der", &"[REDACTED]")
            .finish()
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self {
            der: self.der.clone(),
        }
    }
}
