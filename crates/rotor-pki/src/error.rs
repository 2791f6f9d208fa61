//! PKI error types.

use thiserror::Error;

/// Result type for PKI operations.
pub type Result<T> = std::result::Result<T, Error>;

/// PKI error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Key or certificate generation failed.
    #[error("certificate generation failed: {0}")]
    Generation(String),

    /// Certificate, key or PEM parsing failed.
    #[error("parsing failed: {0}")]
    Parse(String),

    /// Certificate validation failed.
    #[error("certificate validation failed: {0}")]
    Validation(String),

    /// Certificate has expired.
    #[error("certificate has expired")]
    Expired,

    /// Certificate not yet valid.
    #[error("certificate not yet valid")]
    NotYetValid,

    /// The private key does not belong to the certificate.
    #[error("private key does not match certificate '{0}'")]
    KeyMismatch(String),

    /// The certificate cannot be used as a signing authority.
    #[error("certificate '{0}' is not a certificate authority")]
    NotAuthority(String),

    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// Subject Alternative Name error.
    #[error("SAN error: {0}")]
    San(String),
}
