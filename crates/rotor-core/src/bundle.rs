//! Trust bundle maintenance.
//!
//! Each tick merges the current authority into the stored bundle and prunes
//! entries whose not-after has passed. An entry is never dropped for any other
//! reason, so peers keep trusting a rotated-out authority for as long as leaves
//! it signed can still be valid.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::artifact::{Ensured, SigningAuthority, TrustBundle};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::store::{BundleRecord, StoreRef};

/// Merge-then-prune maintainer for one trust bundle.
pub struct BundleMaintainer {
    store: StoreRef<BundleRecord>,
    clock: Arc<dyn Clock>,
}

impl BundleMaintainer {
    /// Creates a maintainer for the bundle bound by `store`.
    pub fn new(store: StoreRef<BundleRecord>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The store binding this maintainer owns.
    #[must_use]
    pub const fn store(&self) -> &StoreRef<BundleRecord> {
        &self.store
    }

    /// Merges `authority` into the bundle and prunes expired entries, writing
    /// the result only when it differs from what was stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on read or write failure. Unparseable bundle
    /// blocks are dropped and reported in [`Ensured::recovered`].
    pub async fn ensure(&self, authority: &SigningAuthority) -> Result<Ensured<TrustBundle>> {
        let key = self.store.key();
        let now = self.clock.now();

        let (stored, mut bundle, recovered) = match self.store.read().await {
            Ok(None) => (None, TrustBundle::new(), None),
            Ok(Some(record)) => {
                let (bundle, dropped) = TrustBundle::parse_lenient(&record.ca_bundle_pem);
                let recovered = if dropped.is_empty() {
                    None
                } else {
                    warn!(
                        key,
                        dropped = dropped.len(),
                        kept = bundle.len(),
                        "dropping unparseable trust bundle entries"
                    );
                    Some(Error::malformed(key, dropped.join("; ")))
                };
                (Some(record), bundle, recovered)
            }
            Err(e @ Error::MalformedArtifact { .. }) => {
                warn!(key, error = %e, "stored trust bundle is malformed");
                (None, TrustBundle::new(), Some(e))
            }
            Err(e) => return Err(e),
        };

        let added = bundle.push_front(authority.certificate().clone());
        let pruned = bundle.prune_expired(now);

        let record = BundleRecord {
            ca_bundle_pem: bundle.to_pem(),
        };
        if stored.as_ref() == Some(&record) {
            debug!(key, entries = bundle.len(), "trust bundle is current");
            return Ok(Ensured {
                value: bundle,
                written: false,
                reason: None,
                recovered,
            });
        }

        self.store.write(record).await?;

        info!(
            key,
            added,
            authority = %authority.identity(),
            pruned = ?pruned.iter().map(ToString::to_string).collect::<Vec<_>>(),
            entries = bundle.len(),
            "updated trust bundle"
        );

        Ok(Ensured {
            value: bundle,
            written: true,
            reason: None,
            recovered,
        })
    }
}

impl std::fmt::Debug for BundleMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleMaintainer")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
