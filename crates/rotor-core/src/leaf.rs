//! Leaf certificate rotation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rotor_pki::{verify_signature, Validity};
use tracing::{debug, info, warn};

use crate::artifact::{
    CertKeyArtifact, Ensured, LeafArtifact, RegenerationReason, SigningAuthority, TrustBundle,
};
use crate::clock::Clock;
use crate::config::RotationPolicy;
use crate::content::CertContentProvider;
use crate::error::{Error, Result};
use crate::store::{CertKeyRecord, StoreRef, HOSTNAMES_ANNOTATION, ISSUER_ANNOTATION};

/// Keeps a leaf signed by the current authority in its store.
pub struct LeafRotator {
    store: StoreRef<CertKeyRecord>,
    content: Arc<dyn CertContentProvider>,
    policy: RotationPolicy,
    clock: Arc<dyn Clock>,
}

impl LeafRotator {
    /// Creates a rotator issuing leaves described by `content`.
    pub fn new(
        store: StoreRef<CertKeyRecord>,
        content: Arc<dyn CertContentProvider>,
        policy: RotationPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            content,
            policy,
            clock,
        }
    }

    /// The store binding this rotator owns.
    #[must_use]
    pub const fn store(&self) -> &StoreRef<CertKeyRecord> {
        &self.store
    }

    /// The content provider.
    #[must_use]
    pub fn content(&self) -> &Arc<dyn CertContentProvider> {
        &self.content
    }

    /// Returns the current leaf, issuing a new one from `authority` when the
    /// stored leaf is absent, malformed, stale or expiring.
    ///
    /// A leaf is stale when it names another issuer, when its signature does
    /// not verify against `authority`, or when its recorded hostnames differ
    /// from what the content provider asks for.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UntrustedSigner`] if `bundle` does not contain
    /// `authority`, [`Error::Store`] on read or write failure and
    /// [`Error::Generation`] if issuance fails.
    pub async fn ensure(
        &self,
        authority: &SigningAuthority,
        bundle: &TrustBundle,
    ) -> Result<Ensured<LeafArtifact>> {
        let identity = authority.identity();
        if !bundle.contains(&identity) {
            return Err(Error::UntrustedSigner(identity.to_string()));
        }

        let key = self.store.key();
        let now = self.clock.now();
        let content = self.content.content();
        let hostnames = content.hostnames();

        let (reason, recovered) = match self.store.read().await {
            Ok(None) => (RegenerationReason::Missing, None),
            Ok(Some(record)) => match CertKeyArtifact::decode(key, &record) {
                Ok(artifact) => match self.stale_reason(&artifact, authority, &hostnames, now) {
                    None => {
                        debug!(key, issuer = authority.subject(), "leaf certificate is current");
                        return Ok(Ensured::unchanged(LeafArtifact::new(artifact)));
                    }
                    Some(reason) => (reason, None),
                },
                Err(e) => {
                    warn!(key, error = %e, "stored leaf certificate is malformed");
                    (RegenerationReason::Malformed, Some(e))
                }
            },
            Err(e @ Error::MalformedArtifact { .. }) => {
                warn!(key, error = %e, "stored leaf certificate is malformed");
                (RegenerationReason::Malformed, Some(e))
            }
            Err(e) => return Err(e),
        };

        let request = content.to_request().map_err(|e| Error::generation(key, e))?;
        let validity = Validity::starting_at(now, self.policy.validity())
            .clamp_to(authority.certificate().not_after());
        let (certificate, private_key) = authority
            .issue(&request, &validity)
            .map_err(|e| Error::generation(key, e))?;

        let artifact = CertKeyArtifact::new(certificate, private_key)
            .with_annotation(ISSUER_ANNOTATION, authority.subject())
            .with_annotation(HOSTNAMES_ANNOTATION, hostnames);
        self.store.write(artifact.to_record()).await?;

        info!(
            key,
            subject = artifact.certificate().subject(),
            issuer = authority.subject(),
            not_after = %artifact.certificate().not_after(),
            %reason,
            "rotated leaf certificate"
        );

        Ok(Ensured {
            value: LeafArtifact::new(artifact),
            written: true,
            reason: Some(reason),
            recovered,
        })
    }

    fn stale_reason(
        &self,
        artifact: &CertKeyArtifact,
        authority: &SigningAuthority,
        hostnames: &str,
        now: DateTime<Utc>,
    ) -> Option<RegenerationReason> {
        let cert = artifact.certificate();
        if cert.issuer() != authority.subject()
            || artifact.annotation(ISSUER_ANNOTATION) != Some(authority.subject())
        {
            return Some(RegenerationReason::IssuerChanged);
        }
        if verify_signature(cert, authority.certificate()).is_err() {
            return Some(RegenerationReason::SignatureMismatch);
        }
        if let Some(reason) = self.policy.time_reason(cert, now) {
            // A leaf already running to its authority's not-after cannot be
            // extended; the authority's rotation re-signs it.
            let capped = reason == RegenerationReason::RefreshWindow
                && cert.not_after() >= authority.certificate().not_after();
            if !capped {
                return Some(reason);
            }
        }
        if artifact.annotation(HOSTNAMES_ANNOTATION).unwrap_or_default() != hostnames {
            return Some(RegenerationReason::HostnamesChanged);
        }
        None
    }
}

impl std::fmt::Debug for LeafRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafRotator")
            .field("store", &self.store)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
