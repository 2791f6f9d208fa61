//! Certificate validation utilities.
//!
//! Time predicates take `now` explicitly so callers can drive them from an
//! injected clock.

use chrono::{DateTime, Duration, Utc};
use rcgen::KeyPair;
use x509_parser::prelude::*;

use crate::error::{Error, Result};
use crate::types::{Certificate, PrivateKey};

/// Validates a certificate against its issuing CA certificate at `now`.
///
/// Checks the validity window, that the issuer name matches the CA subject and
/// that the signature verifies with the CA's public key.
///
/// # Errors
///
/// Returns an error if validation fails.
pub fn validate_certificate(
    cert: &Certificate,
    ca_cert: &Certificate,
    now: DateTime<Utc>,
) -> Result<()> {
    if is_expired_at(cert, now) {
        return Err(Error::Expired);
    }
    if is_not_yet_valid_at(cert, now) {
        return Err(Error::NotYetValid);
    }
    if cert.issuer() != ca_cert.subject() {
        return Err(Error::Validation(format!(
            "issuer '{}' does not match CA subject '{}'",
            cert.issuer(),
            ca_cert.subject()
        )));
    }
    verify_signature(cert, ca_cert)
}

/// Returns true once `now` has reached the certificate's `not_after`.
#[must_use]
pub fn is_expired_at(cert: &Certificate, now: DateTime<Utc>) -> bool {
    cert.not_after() <= now
}

/// Returns true while `now` is before the certificate's `not_before`.
#[must_use]
pub fn is_not_yet_valid_at(cert: &Certificate, now: DateTime<Utc>) -> bool {
    cert.not_before() > now
}

/// Returns true if `not_before <= now < not_after`.
#[must_use]
pub fn is_valid_at(cert: &Certificate, now: DateTime<Utc>) -> bool {
    !is_expired_at(cert, now) && !is_not_yet_valid_at(cert, now)
}

/// Time left until expiry, or `None` if already expired.
#[must_use]
pub fn remaining_validity_at(cert: &Certificate, now: DateTime<Utc>) -> Option<Duration> {
    if is_expired_at(cert, now) {
        None
    } else {
        Some(cert.not_after() - now)
    }
}

/// Verifies that a certificate was signed by the given issuer.
///
/// # Errors
///
/// Returns an error if either certificate cannot be parsed or the signature
/// does not verify.
pub fn verify_signature(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    let (_, parsed_cert) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::Parse(format!("failed to parse certificate: {e}")))?;

    let (_, parsed_issuer) = X509Certificate::from_der(issuer.der())
        .map_err(|e| Error::Parse(format!("failed to parse issuer certificate: {e}")))?;

    parsed_cert
        .verify_signature(Some(parsed_issuer.public_key()))
        .map_err(|e| {
            Error::SignatureVerification(format!(
                "signature verification failed for '{}': {e:?}",
                cert.subject()
            ))
        })
}

/// Compares a DER `SubjectPublicKeyInfo` with the certificate's public key.
///
/// # Errors
///
/// Returns an error if the certificate cannot be parsed.
pub fn public_key_matches(cert: &Certificate, spki_der: &[u8]) -> Result<bool> {
    let (_, parsed) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::Parse(format!("failed to parse certificate: {e}")))?;
    Ok(parsed.public_key().raw == spki_der)
}

/// Checks that `key` is the private half of the certificate's public key.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the key is unreadable and
/// [`Error::KeyMismatch`] if it belongs to another certificate.
pub fn check_key_pair(cert: &Certificate, key: &PrivateKey) -> Result<()> {
    let key_pair = KeyPair::try_from(key.der())
        .map_err(|e| Error::Parse(format!("failed to parse private key: {e}")))?;
    if public_key_matches(cert, &key_pair.public_key_der())? {
        Ok(())
    } else {
        Err(Error::KeyMismatch(cert.subject().to_string()))
    }
}
