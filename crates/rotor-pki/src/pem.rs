//! PEM armor for certificates, keys and bundles.

use base64::Engine;
use x509_parser::pem::Pem;

use crate::error::{Error, Result};

/// PEM label for X.509 certificates.
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// PEM label for PKCS#8 private keys.
pub const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// A decoded PEM block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PemBlock {
    /// Label from the BEGIN line.
    pub label: String,
    /// Decoded DER contents.
    pub der: Vec<u8>,
}

/// Encodes DER bytes under the given label, wrapped at 64 columns.
#[must_use]
pub fn encode(label: &str, der: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        b64.as_bytes()
            .chunks(64)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// Splits input into PEM blocks.
///
/// Text outside BEGIN/END markers is ignored. Each block is decoded on its own,
/// so a damaged block yields an `Err` entry without hiding the blocks after it.
#[must_use]
pub fn decode_blocks(input: &str) -> Vec<Result<PemBlock>> {
    Pem::iter_from_buffer(input.as_bytes())
        .map(|block| {
            block
                .map(|pem| PemBlock {
                    label: pem.label,
                    der: pem.contents,
                })
                .map_err(|e| Error::Parse(format!("invalid PEM block: {e}")))
        })
        .collect()
}

/// Decodes exactly one block with the expected label.
pub fn decode_single(input: &str, label: &str) -> Result<Vec<u8>> {
    let mut blocks = decode_blocks(input).into_iter();
    let block = blocks
        .next()
        .ok_or_else(|| Error::Parse(format!("no PEM block found, expected '{label}'")))??;
    if blocks.next().is_some() {
        return Err(Error::Parse(format!("expected a single '{label}' PEM block")));
    }
    if block.label != label {
        return Err(Error::Parse(format!(
            "unexpected PEM label '{}', expected '{label}'",
            block.label
        )));
    }
    Ok(block.der)
}
