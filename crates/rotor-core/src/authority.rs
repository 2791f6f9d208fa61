//! Signing authority rotation.

use std::sync::Arc;

use rotor_pki::Validity;
use tracing::{debug, info, warn};

use crate::artifact::{Ensured, RegenerationReason, SigningAuthority};
use crate::clock::Clock;
use crate::config::RotationPolicy;
use crate::error::{Error, Result};
use crate::store::{CertKeyRecord, StoreRef};

/// Keeps a valid self-signed CA in its store.
pub struct SigningAuthorityRotator {
    store: StoreRef<CertKeyRecord>,
    signer_name: String,
    policy: RotationPolicy,
    clock: Arc<dyn Clock>,
}

impl SigningAuthorityRotator {
    /// Creates a rotator writing authorities named after `signer_name`.
    pub fn new(
        store: StoreRef<CertKeyRecord>,
        signer_name: impl Into<String>,
        policy: RotationPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            signer_name: signer_name.into(),
            policy,
            clock,
        }
    }

    /// The store binding this rotator owns.
    #[must_use]
    pub const fn store(&self) -> &StoreRef<CertKeyRecord> {
        &self.store
    }

    /// Returns the current authority, generating and storing a new one when the
    /// stored one is absent, malformed, outside its window or inside the
    /// refresh threshold.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on read or write failure and
    /// [`Error::Generation`] if a new authority cannot be created. A malformed
    /// stored authority is not an error; it is reported in
    /// [`Ensured::recovered`].
    pub async fn ensure(&self) -> Result<Ensured<SigningAuthority>> {
        let key = self.store.key();
        let now = self.clock.now();

        let (reason, recovered) = match self.store.read().await {
            Ok(None) => (RegenerationReason::Missing, None),
            Ok(Some(record)) => match SigningAuthority::decode(key, &record) {
                Ok(authority) => match self.policy.time_reason(authority.certificate(), now) {
                    None => {
                        debug!(key, subject = authority.subject(), "signing authority is current");
                        return Ok(Ensured::unchanged(authority));
                    }
                    Some(reason) => (reason, None),
                },
                Err(e) => {
                    warn!(key, error = %e, "stored signing authority is malformed");
                    (RegenerationReason::Malformed, Some(e))
                }
            },
            Err(e @ Error::MalformedArtifact { .. }) => {
                warn!(key, error = %e, "stored signing authority is malformed");
                (RegenerationReason::Malformed, Some(e))
            }
            Err(e) => return Err(e),
        };

        let name = format!("{}@{}", self.signer_name, now.timestamp());
        let validity = Validity::starting_at(now, self.policy.validity());
        let authority =
            SigningAuthority::generate(&name, &validity).map_err(|e| Error::generation(key, e))?;

        self.store.write(authority.to_record()).await?;

        info!(
            key,
            subject = authority.subject(),
            not_after = %authority.certificate().not_after(),
            %reason,
            "rotated signing authority"
        );

        Ok(Ensured {
            value: authority,
            written: true,
            reason: Some(reason),
            recovered,
        })
    }
}

impl std::fmt::Debug for SigningAuthorityRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningAuthorityRotator")
            .field("store", &self.store)
            .field("signer_name", &self.signer_name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
