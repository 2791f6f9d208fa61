//! Error types for rotord.

use thiserror::Error;

/// Errors raised while loading or acting on daemon configuration.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Rotation error.
    #[error(transparent)]
    Rotation(#[from] rotor_core::Error),
}
