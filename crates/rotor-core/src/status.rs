//! Status reporting.
//!
//! After every steady-state tick the controller hands the outcome to a
//! [`StatusReporter`]. [`ConditionStatusReporter`] keeps a single degraded
//! condition per controller in any [`ArtifactStore`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::store::{ArtifactStore, StoreRef};

/// Condition reason used while rotation is failing.
pub const ROTATION_ERROR_REASON: &str = "RotationError";

/// Outcome of one tick as seen by the status sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Every stage succeeded.
    Succeeded,
    /// A stage failed with the given description.
    Failed(String),
}

impl TickOutcome {
    /// Returns true for [`TickOutcome::Succeeded`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl<T> From<&Result<T>> for TickOutcome {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// Sink for tick outcomes.
pub trait StatusReporter: Send + Sync {
    /// Records `outcome`, returning whether the visible status changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Status`] if the status could not be recorded.
    fn report<'a>(&'a self, outcome: &'a TickOutcome) -> BoxFuture<'a, Result<bool>>;
}

/// A degraded condition as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationCondition {
    /// `CertRotation_<name>_Degraded`.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// True while rotation is failing.
    pub degraded: bool,
    /// Machine-readable reason, set while degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Last error, set while degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When `degraded` last flipped.
    pub last_transition: DateTime<Utc>,
}

impl RotationCondition {
    fn same_status(&self, other: &Self) -> bool {
        self.condition_type == other.condition_type
            && self.degraded == other.degraded
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Condition type for a controller named `name`.
#[must_use]
pub fn condition_type(name: &str) -> String {
    format!("CertRotation_{name}_Degraded")
}

/// Writes a [`RotationCondition`] whenever the outcome changes it.
pub struct ConditionStatusReporter {
    store: StoreRef<RotationCondition>,
    condition_type: String,
    clock: Arc<dyn Clock>,
}

impl ConditionStatusReporter {
    /// Creates a reporter for the controller `name`, storing its condition
    /// under `key`.
    pub fn new(
        store: Arc<dyn ArtifactStore<RotationCondition>>,
        key: impl Into<String>,
        name: &str,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store: StoreRef::new(store, key),
            condition_type: condition_type(name),
            clock,
        }
    }

    /// The condition type this reporter maintains.
    #[must_use]
    pub fn condition_type(&self) -> &str {
        &self.condition_type
    }

    async fn apply(&self, outcome: &TickOutcome) -> Result<bool> {
        let current = match self.store.read().await {
            Ok(current) => current,
            Err(Error::MalformedArtifact { .. }) => None,
            Err(e) => return Err(Error::Status(e.to_string())),
        };

        let now = self.clock.now();
        let (degraded, reason, message) = match outcome {
            TickOutcome::Succeeded => (false, None, None),
            TickOutcome::Failed(message) => {
                (true, Some(ROTATION_ERROR_REASON.to_string()), Some(message.clone()))
            }
        };
        let last_transition = current
            .as_ref()
            .filter(|c| c.degraded == degraded)
            .map_or(now, |c| c.last_transition);
        let next = RotationCondition {
            condition_type: self.condition_type.clone(),
            degraded,
            reason,
            message,
            last_transition,
        };

        if current.as_ref().is_some_and(|c| c.same_status(&next)) {
            return Ok(false);
        }

        self.store
            .write(next)
            .await
            .map_err(|e| Error::Status(e.to_string()))?;
        debug!(condition = %self.condition_type, degraded, "status condition updated");
        Ok(true)
    }
}

impl StatusReporter for ConditionStatusReporter {
    fn report<'a>(&'a self, outcome: &'a TickOutcome) -> BoxFuture<'a, Result<bool>> {
        Box::pin(self.apply(outcome))
    }
}

impl fmt::Debug for ConditionStatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionStatusReporter")
            .field("store", &self.store)
            .field("condition_type", &self.condition_type)
            .finish_non_exhaustive()
    }
}
