//! X.509 primitives for rotor.
#![forbid(unsafe_code)]
//!
//! This crate provides the certificate pieces the rotation controller is
//! built from: self-signed signing authorities, leaf issuance, PEM armor and
//! the checks used to decide whether a stored artifact can still be served.
//!
//! # Example
//!
//! ```
//! use chrono::{Duration, Utc};
//! use rotor_pki::{CertificateAuthority, CertificateRequest, Validity};
//!
//! let now = Utc::now();
//! let ca = CertificateAuthority::generate(
//!     "signer@1700000000",
//!     &Validity::starting_at(now, Duration::hours(24)),
//! )
//! .unwrap();
//!
//! let request = CertificateRequest::builder("api.internal")
//!     .dns("api.internal")
//!     .server_auth()
//!     .build()
//!     .unwrap();
//!
//! let (leaf, _key) = ca
//!     .issue(&request, &Validity::starting_at(now, Duration::hours(8)))
//!     .unwrap();
//!
//! assert_eq!(leaf.issuer(), "signer@1700000000");
//! rotor_pki::verify_signature(&leaf, ca.root_certificate()).unwrap();
//! ```
//!
//! # Modules
//!
//! - [`ca`] - Signing authority generation and leaf issuance
//! - [`pem`] - PEM encoding and lenient multi-block decoding
//! - [`validation`] - Time, signature and key-pair checks
//! - [`types`] - Core types (Certificate, `PrivateKey`, etc.)
//! - [`error`] - Error types

pub mod ca;
pub mod error;
pub mod pem;
pub mod types;
pub mod validation;

pub use ca::CertificateAuthority;
pub use error::{Error, Result};
pub use types::{
    CertIdentity, Certificate, CertificateRequest, CertificateRequestBuilder, KeyUsage,
    PrivateKey, SubjectAltName, Validity,
};
pub use validation::{
    check_key_pair, is_expired_at, is_not_yet_valid_at, is_valid_at, remaining_validity_at,
    validate_certificate, verify_signature,
};
