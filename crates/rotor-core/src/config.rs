//! Rotation configuration.
//!
//! All durations are whole seconds. [`RotationConfig::validate`] runs once when
//! a controller is built; a rotator never re-checks its configuration per tick.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rotor_pki::{is_expired_at, is_not_yet_valid_at, Certificate};
use serde::{Deserialize, Serialize};

use crate::artifact::RegenerationReason;
use crate::error::{Error, Result};

/// Upper bound for any configured duration (100 years).
const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Validity and refresh settings for one kind of artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Lifetime of a freshly generated certificate.
    pub validity_secs: u64,
    /// Regenerate once less than this much validity remains.
    pub refresh_secs: u64,
    /// Ignore the refresh threshold and only regenerate expired certificates.
    #[serde(default)]
    pub refresh_only_when_expired: bool,
}

impl RotationPolicy {
    /// Creates a policy from validity and refresh durations.
    #[must_use]
    pub const fn new(validity: Duration, refresh: Duration) -> Self {
        Self {
            validity_secs: validity.as_secs(),
            refresh_secs: refresh.as_secs(),
            refresh_only_when_expired: false,
        }
    }

    /// Lifetime of a freshly generated certificate.
    #[must_use]
    pub fn validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.validity_secs as i64)
    }

    /// Remaining-validity threshold that triggers regeneration.
    #[must_use]
    pub fn refresh(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_secs as i64)
    }

    /// Decides whether `cert` has to be replaced at `now` on time grounds alone.
    #[must_use]
    pub fn time_reason(&self, cert: &Certificate, now: DateTime<Utc>) -> Option<RegenerationReason> {
        if is_not_yet_valid_at(cert, now) {
            return Some(RegenerationReason::NotYetValid);
        }
        if is_expired_at(cert, now) {
            return Some(RegenerationReason::Expired);
        }
        if !self.refresh_only_when_expired && cert.not_after() - now < self.refresh() {
            return Some(RegenerationReason::RefreshWindow);
        }
        None
    }

    fn validate(&self, what: &str) -> Result<()> {
        if self.validity_secs == 0 {
            return Err(Error::Configuration(format!("{what} validity must be non-zero")));
        }
        if self.validity_secs > MAX_DURATION_SECS {
            return Err(Error::Configuration(format!(
                "{what} validity of {}s exceeds the {MAX_DURATION_SECS}s limit",
                self.validity_secs
            )));
        }
        if self.refresh_secs >= self.validity_secs {
            return Err(Error::Configuration(format!(
                "{what} refresh threshold ({}s) must be less than its validity ({}s)",
                self.refresh_secs, self.validity_secs
            )));
        }
        Ok(())
    }
}

/// Configuration for one rotation controller instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Controller name, used for the signer common name and the status condition.
    pub name: String,
    /// Signing authority policy.
    pub authority: RotationPolicy,
    /// Leaf certificate policy.
    pub leaf: RotationPolicy,
    /// Interval of the periodic resync timer.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Deadline for a single tick.
    #[serde(default = "default_tick_timeout_secs")]
    pub tick_timeout_secs: u64,
}

const fn default_tick_interval_secs() -> u64 {
    60
}

const fn default_tick_timeout_secs() -> u64 {
    30
}

impl RotationConfig {
    /// Creates a configuration with default tick settings.
    #[must_use]
    pub fn new(name: impl Into<String>, authority: RotationPolicy, leaf: RotationPolicy) -> Self {
        Self {
            name: name.into(),
            authority,
            leaf,
            tick_interval_secs: default_tick_interval_secs(),
            tick_timeout_secs: default_tick_timeout_secs(),
        }
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Configuration(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Validates duration relationships.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("name cannot be empty".into()));
        }
        self.authority.validate("authority")?;
        self.leaf.validate("leaf")?;
        if self.tick_interval_secs == 0 {
            return Err(Error::Configuration("tick interval must be non-zero".into()));
        }
        if self.tick_timeout_secs == 0 {
            return Err(Error::Configuration("tick timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Interval of the periodic resync timer.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Deadline for a single tick.
    #[must_use]
    pub const fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const HOUR: u64 = 3600;

    fn policy(validity_h: u64, refresh_h: u64) -> RotationPolicy {
        RotationPolicy::new(
            Duration::from_secs(validity_h * HOUR),
            Duration::from_secs(refresh_h * HOUR),
        )
    }

    #[test]
    fn scenario_configuration_is_valid() {
        let config = RotationConfig::new("signer", policy(24, 12), policy(8, 4));
        config.validate().unwrap();
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.authority.validity(), chrono::Duration::hours(24));
        assert_eq!(config.leaf.refresh(), chrono::Duration::hours(4));
    }

    #[test_case(policy(24, 24), policy(8, 4) ; "authority refresh equals validity")]
    #[test_case(policy(24, 30), policy(8, 4) ; "authority refresh exceeds validity")]
    #[test_case(policy(24, 12), policy(8, 8) ; "leaf refresh equals validity")]
    #[test_case(policy(0, 0), policy(8, 4) ; "zero authority validity")]
    #[test_case(policy(24, 12), policy(1_000_000, 4) ; "leaf validity beyond limit")]
    fn invalid_duration_relationships(authority: RotationPolicy, leaf: RotationPolicy) {
        let config = RotationConfig::new("signer", authority, leaf);
        assert!(matches!(config.validate().unwrap_err(), Error::Configuration(_)));
    }

    #[test]
    fn empty_name_is_rejected() {
        let config = RotationConfig::new("  ", policy(24, 12), policy(8, 4));
        assert!(matches!(config.validate().unwrap_err(), Error::Configuration(_)));
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let mut config = RotationConfig::new("signer", policy(24, 12), policy(8, 4));
        config.tick_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_json_applies_defaults() {
        let config = RotationConfig::from_json(
            r#"{
                "name": "svc-signer",
                "authority": { "validity_secs": 86400, "refresh_secs": 43200 },
                "leaf": { "validity_secs": 28800, "refresh_secs": 14400, "refresh_only_when_expired": true }
            }"#,
        )
        .unwrap();

        assert_eq!(config.name, "svc-signer");
        assert!(!config.authority.refresh_only_when_expired);
        assert!(config.leaf.refresh_only_when_expired);
        assert_eq!(config.tick_interval_secs, 60);
        assert_eq!(config.tick_timeout_secs, 30);
    }

    #[test]
    fn from_json_validates() {
        let result = RotationConfig::from_json(
            r#"{
                "name": "svc-signer",
                "authority": { "validity_secs": 100, "refresh_secs": 200 },
                "leaf": { "validity_secs": 50, "refresh_secs": 10 }
            }"#,
        );
        assert!(matches!(result.unwrap_err(), Error::Configuration(_)));
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(RotationConfig::from_json("{not json").is_err());
    }

    #[test]
    fn from_file_reads_and_validates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rotation.json");
        let config = RotationConfig::new("signer", policy(24, 12), policy(8, 4));
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        assert_eq!(RotationConfig::from_file(&path).unwrap(), config);
        assert!(RotationConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
