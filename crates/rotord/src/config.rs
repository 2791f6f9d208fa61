//! Daemon configuration.
//!
//! A single JSON file holding the rotation settings plus where the artifacts
//! live and what the leaf certificate is for.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rotor_core::{
    CertContentProvider, ClientCertContent, RotationConfig, RotationPolicy, ServingCertContent,
};
use serde::{Deserialize, Serialize};

use crate::error::DaemonError;

/// Store keys for each artifact, used as file names under the state directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactKeys {
    /// Signing authority key.
    pub authority: String,
    /// Trust bundle key.
    pub bundle: String,
    /// Leaf certificate key.
    pub leaf: String,
    /// Status condition key.
    pub status: String,
}

impl Default for ArtifactKeys {
    fn default() -> Self {
        Self {
            authority: "signer".to_string(),
            bundle: "ca-bundle".to_string(),
            leaf: "leaf".to_string(),
            status: "status".to_string(),
        }
    }
}

/// What the leaf certificate is issued for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LeafContentConfig {
    /// TLS serving certificate for the listed hostnames and IPs.
    Serving {
        /// DNS names and IP addresses.
        hostnames: Vec<String>,
    },
    /// TLS client certificate for a user.
    Client {
        /// Subject common name.
        user: String,
    },
}

impl LeafContentConfig {
    /// Builds the content provider.
    #[must_use]
    pub fn provider(&self) -> Arc<dyn CertContentProvider> {
        match self {
            Self::Serving { hostnames } => Arc::new(ServingCertContent::new(hostnames)),
            Self::Client { user } => Arc::new(ClientCertContent::new(user.clone())),
        }
    }
}

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Rotation settings.
    #[serde(flatten)]
    pub rotation: RotationConfig,
    /// Directory holding one JSON file per artifact.
    pub state_dir: PathBuf,
    /// Artifact keys.
    #[serde(default)]
    pub keys: ArtifactKeys,
    /// Leaf certificate content.
    pub content: LeafContentConfig,
}

impl DaemonConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DaemonError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DaemonError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, DaemonError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| DaemonError::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DaemonError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| DaemonError::Config(format!("failed to encode config: {e}")))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), DaemonError> {
        self.rotation.validate()?;

        if self.state_dir.as_os_str().is_empty() {
            return Err(DaemonError::Config("state_dir cannot be empty".to_string()));
        }

        let keys = [
            &self.keys.authority,
            &self.keys.bundle,
            &self.keys.leaf,
            &self.keys.status,
        ];
        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                return Err(DaemonError::Config(format!("artifact key '{key}' is used twice")));
            }
        }

        match &self.content {
            LeafContentConfig::Serving { hostnames }
                if hostnames.iter().all(|h| h.trim().is_empty()) =>
            {
                Err(DaemonError::Config(
                    "serving content needs at least one hostname".to_string(),
                ))
            }
            LeafContentConfig::Client { user } if user.trim().is_empty() => Err(
                DaemonError::Config("client content needs a user".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// A starting configuration: authority 1 year / refresh 6 months, serving
    /// leaf 30 days / refresh 15 days.
    #[must_use]
    pub fn sample(name: &str, hostnames: Vec<String>, state_dir: PathBuf) -> Self {
        const DAY: u64 = 24 * 60 * 60;
        Self {
            rotation: RotationConfig::new(
                name,
                RotationPolicy::new(Duration::from_secs(365 * DAY), Duration::from_secs(182 * DAY)),
                RotationPolicy::new(Duration::from_secs(30 * DAY), Duration::from_secs(15 * DAY)),
            ),
            state_dir,
            keys: ArtifactKeys::default(),
            content: LeafContentConfig::Serving { hostnames },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn sample() -> DaemonConfig {
        DaemonConfig::sample(
            "svc-signer",
            vec!["svc.internal".to_string()],
            PathBuf::from("/var/lib/rotord"),
        )
    }

    #[test]
    fn test_sample_is_valid() {
        sample().validate().unwrap();
    }

    #[test]
    fn test_json_layout_is_flat() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["name"], "svc-signer");
        assert_eq!(json["tick_interval_secs"], 60);
        assert_eq!(json["content"]["kind"], "serving");
        assert_eq!(json["keys"]["bundle"], "ca-bundle");
    }

    #[test]
    fn test_from_json_with_defaults() {
        let config = DaemonConfig::from_json(
            r#"{
                "name": "client-signer",
                "authority": { "validity_secs": 86400, "refresh_secs": 43200 },
                "leaf": { "validity_secs": 28800, "refresh_secs": 14400 },
                "state_dir": "/tmp/rotor",
                "content": { "kind": "client", "user": "system:rotor" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.keys, ArtifactKeys::default());
        assert_eq!(
            config.content,
            LeafContentConfig::Client {
                user: "system:rotor".to_string()
            }
        );
        assert_eq!(config.content.provider().content().subject, "system:rotor");
    }

    #[test_case(|c: &mut DaemonConfig| c.state_dir = PathBuf::new() ; "empty state dir")]
    #[test_case(|c: &mut DaemonConfig| c.keys.leaf = "signer".to_string() ; "duplicate key")]
    #[test_case(|c: &mut DaemonConfig| c.content = LeafContentConfig::Serving { hostnames: vec![" ".to_string()] } ; "blank hostnames")]
    #[test_case(|c: &mut DaemonConfig| c.content = LeafContentConfig::Client { user: String::new() } ; "blank user")]
    #[test_case(|c: &mut DaemonConfig| c.rotation.leaf.refresh_secs = c.rotation.leaf.validity_secs ; "leaf refresh not below validity")]
    fn test_invalid(mutate: fn(&mut DaemonConfig)) {
        let mut config = sample();
        mutate(&mut config);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("rotord.json");
        let config = sample();

        config.save(&path).unwrap();
        assert_eq!(DaemonConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = DaemonConfig::load("/nonexistent/rotord.json").unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
    }
}
