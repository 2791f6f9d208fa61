//! Signing authority implementation.

use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, Ia5String, IsCa,
    KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{Certificate, CertificateRequest, KeyUsage, PrivateKey, SubjectAltName, Validity};
use crate::validation;

/// A self-signed certificate authority able to sign leaf certificates.
pub struct CertificateAuthority {
    /// Root certificate.
    root_cert: Certificate,
    /// Root private key.
    root_key: PrivateKey,
    /// rcgen key pair for signing.
    key_pair: KeyPair,
}

impl CertificateAuthority {
    /// Generates a new key pair and a self-signed CA certificate for `name`
    /// valid over `validity`.
    ///
    /// # Errors
    ///
    /// Returns an error if key or certificate generation fails.
    pub fn generate(name: &str, validity: &Validity) -> Result<Self> {
        debug!(name, not_after = %validity.not_after, "generating signing authority");

        let key_pair = KeyPair::generate()
            .map_err(|e| Error::Generation(format!("failed to generate key pair: {e}")))?;

        let params = authority_params(name, validity)?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::Generation(format!("failed to generate root certificate: {e}")))?;

        let root_cert = Certificate::from_der(cert.der())?;
        let root_key = PrivateKey::new(key_pair.serialize_der());

        Ok(Self {
            root_cert,
            root_key,
            key_pair,
        })
    }

    /// Rebuilds an authority from a stored certificate and key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be parsed, does not belong to the
    /// certificate, or the certificate is not a self-signed CA.
    pub fn from_existing(cert: Certificate, key: PrivateKey) -> Result<Self> {
        let key_pair = KeyPair::try_from(key.der())
            .map_err(|e| Error::Parse(format!("failed to parse private key: {e}")))?;

        if !validation::public_key_matches(&cert, &key_pair.public_key_der())? {
            return Err(Error::KeyMismatch(cert.subject().to_string()));
        }
        if !cert.is_ca() || !cert.is_self_issued() {
            return Err(Error::NotAuthority(cert.subject().to_string()));
        }
        validation::verify_signature(&cert, &cert)?;

        Ok(Self {
            root_cert: cert,
            root_key: key,
            key_pair,
        })
    }

    /// Returns a reference to the root certificate.
    #[must_use]
    pub const fn root_certificate(&self) -> &Certificate {
        &self.root_cert
    }

    /// Returns a reference to the root private key.
    #[must_use]
    pub const fn root_key(&self) -> &PrivateKey {
        &self.root_key
    }

    /// Issues a leaf certificate for `request` over `validity`, signed by this
    /// authority with a freshly generated key.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid or generation fails.
    pub fn issue(
        &self,
        request: &CertificateRequest,
        validity: &Validity,
    ) -> Result<(Certificate, PrivateKey)> {
        request.validate()?;
        if validity.not_after <= validity.not_before {
            return Err(Error::Validation(format!(
                "empty validity window for '{}'",
                request.subject
            )));
        }

        debug!(subject = %request.subject, issuer = %self.root_cert.subject(), "issuing certificate");

        let cert_key_pair = KeyPair::generate()
            .map_err(|e| Error::Generation(format!("failed to generate key pair: {e}")))?;

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, &request.subject);
        params.is_ca = IsCa::NoCa;
        params.serial_number = Some(random_serial());
        params.use_authority_key_identifier_extension = true;

        params.extended_key_usages = request
            .key_usage
            .iter()
            .map(|usage| match usage {
                KeyUsage::ServerAuth => ExtendedKeyUsagePurpose::ServerAuth,
                KeyUsage::ClientAuth => ExtendedKeyUsagePurpose::ClientAuth,
            })
            .collect();
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];

        params.not_before = to_rcgen_time(validity.not_before)?;
        params.not_after = to_rcgen_time(validity.not_after)?;
        params.subject_alt_names = convert_sans(&request.san)?;

        let issuer_cert = self.issuer_cert()?;
        let cert = params
            .signed_by(&cert_key_pair, &issuer_cert, &self.key_pair)
            .map_err(|e| Error::Generation(format!("failed to sign certificate: {e}")))?;

        let certificate = Certificate::from_der(cert.der())?;
        let private_key = PrivateKey::new(cert_key_pair.serialize_der());

        Ok((certificate, private_key))
    }

    /// Rebuilds an rcgen issuer with the stored subject and key so that
    /// issued certificates carry this authority's name and key identifier.
    fn issuer_cert(&self) -> Result<rcgen::Certificate> {
        authority_params(self.root_cert.subject(), &self.root_cert.validity())?
            .self_signed(&self.key_pair)
            .map_err(|e| Error::Generation(format!("failed to create issuer cert: {e}")))
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("root_cert", &self.root_cert.subject())
            .field("root_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

fn authority_params(name: &str, validity: &Validity) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.serial_number = Some(random_serial());
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = to_rcgen_time(validity.not_before)?;
    params.not_after = to_rcgen_time(validity.not_after)?;
    Ok(params)
}

/// Positive 128-bit serial number.
fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::random();
    bytes[0] &= 0x7f;
    bytes[0] |= 0x01;
    SerialNumber::from_slice(&bytes)
}

/// Converts `SubjectAltNames` to rcgen `SanTypes`.
fn convert_sans(sans: &[SubjectAltName]) -> Result<Vec<SanType>> {
    sans.iter()
        .map(|san| match san {
            SubjectAltName::Dns(dns) => {
                let ia5 = Ia5String::try_from(dns.clone())
                    .map_err(|e| Error::San(format!("invalid DNS name '{dns}': {e}")))?;
                Ok(SanType::DnsName(ia5))
            }
            SubjectAltName::Ip(ip) => Ok(SanType::IpAddress(*ip)),
        })
        .collect()
}

/// Converts a chrono `DateTime` to rcgen `OffsetDateTime`.
fn to_rcgen_time(dt: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| Error::Generation(format!("invalid timestamp: {e}")))
}
