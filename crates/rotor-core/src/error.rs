//! Rotation error types.

use thiserror::Error;

/// Result type for rotation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Persistence collaborator failure.
    Store,
    /// Stored bytes unreadable or internally inconsistent.
    MalformedArtifact,
    /// Key or certificate generation failure.
    Generation,
    /// Invalid configuration, only raised at startup.
    Configuration,
    /// Status sink failure.
    Status,
    /// The tick was cancelled or ran out of time.
    Interrupted,
}

/// Rotation error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Read or write against a store failed.
    #[error("store error on '{key}': {message}")]
    Store {
        /// Artifact key.
        key: String,
        /// Failure description.
        message: String,
    },

    /// A stored artifact does not parse or is internally inconsistent.
    #[error("malformed artifact '{key}': {reason}")]
    MalformedArtifact {
        /// Artifact key.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Key or certificate generation failed.
    #[error("failed to generate '{key}': {source}")]
    Generation {
        /// Artifact key being generated.
        key: String,
        /// Underlying PKI error.
        #[source]
        source: rotor_pki::Error,
    },

    /// The current authority is missing from the trust bundle.
    #[error("signer '{0}' is not present in the trust bundle")]
    UntrustedSigner(String),

    /// Invalid duration relationships or other startup configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The status sink rejected a report.
    #[error("status report failed: {0}")]
    Status(String),

    /// The tick was cancelled by the caller.
    #[error("rotation tick cancelled")]
    Cancelled,

    /// The tick did not finish within its deadline.
    #[error("rotation tick exceeded its {0:?} deadline")]
    DeadlineExceeded(std::time::Duration),
}

impl Error {
    /// Creates a store error for `key`.
    pub fn store(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Store {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Creates a malformed-artifact error for `key`.
    pub fn malformed(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::MalformedArtifact {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Wraps a PKI failure that happened while generating `key`.
    pub fn generation(key: impl Into<String>, source: rotor_pki::Error) -> Self {
        Self::Generation {
            key: key.into(),
            source,
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Store { .. } => ErrorKind::Store,
            Self::MalformedArtifact { .. } => ErrorKind::MalformedArtifact,
            Self::Generation { .. } | Self::UntrustedSigner(_) => ErrorKind::Generation,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Status(_) => ErrorKind::Status,
            Self::Cancelled | Self::DeadlineExceeded(_) => ErrorKind::Interrupted,
        }
    }

    /// Returns true if the next tick may succeed without operator action.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}
