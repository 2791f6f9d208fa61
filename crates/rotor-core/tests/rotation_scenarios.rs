//! Tick-level rotation scenarios driven by a manual clock.
//!
//! These tests verify:
//! 1. Convergence from empty stores
//! 2. Idempotence of repeated ticks
//! 3. The 24h/12h authority, 8h/4h leaf rotation timeline
//! 4. Failure isolation between stages
//! 5. Recovery from out-of-band deletion and corruption
//! 6. Run-once invocations
//! 7. Serialized ticks

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{hours, Harness, AUTHORITY_KEY, BUNDLE_KEY, LEAF_KEY};
use futures::future::BoxFuture;
use rotor_core::{
    ArtifactStore, BundleRecord, CertKeyRecord, ChangeCallback, Error, MemoryStore,
    RotationController, ServingCertContent, SyncMode, HOSTNAMES_ANNOTATION, ISSUER_ANNOTATION,
};
use rotor_pki::verify_signature;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Convergence and Idempotence
// ============================================================================

#[tokio::test]
async fn test_first_tick_converges_from_empty_stores() {
    let h = Harness::scenario();
    h.tick().await.unwrap();

    let authority = h.stored_authority();
    let bundle = h.stored_bundle();
    let leaf = h.stored_leaf();

    assert_eq!(bundle.identities(), vec![authority.identity()]);
    assert_eq!(leaf.certificate().issuer(), authority.subject());
    assert_eq!(leaf.annotation(ISSUER_ANNOTATION), Some(authority.subject()));
    assert_eq!(leaf.annotation(HOSTNAMES_ANNOTATION), Some("10.0.0.7,svc.internal"));
    verify_signature(leaf.certificate(), authority.certificate()).unwrap();
    assert!(!h.degraded());
}

#[tokio::test]
async fn test_second_tick_writes_nothing() {
    let h = Harness::scenario();
    h.tick().await.unwrap();
    let after_first = h.write_counts();
    assert_eq!(after_first, (1, 1, 1));

    h.tick().await.unwrap();
    assert_eq!(h.write_counts(), after_first);

    h.at(hours(3));
    h.tick().await.unwrap();
    assert_eq!(h.write_counts(), after_first);
}

// ============================================================================
// Rotation Timeline
// ============================================================================

#[tokio::test]
async fn test_rotation_timeline() {
    let h = Harness::scenario();

    // t=0: authority A (0-24h), leaf L1 (0-8h) signed by A.
    h.tick().await.unwrap();
    let a = h.stored_authority();
    let l1 = h.stored_leaf();
    assert_eq!(a.certificate().not_after(), common::t0() + hours(24));
    assert_eq!(l1.certificate().not_after(), common::t0() + hours(8));
    assert_eq!(l1.certificate().issuer(), a.subject());

    // t=13h: A is inside its 12h refresh threshold and rotates to A2 (13h-37h).
    h.at(hours(13));
    h.tick().await.unwrap();
    let a2 = h.stored_authority();
    assert_ne!(a2.identity(), a.identity());
    assert_eq!(a2.certificate().not_before(), common::t0() + hours(13));
    assert_eq!(a2.certificate().not_after(), common::t0() + hours(37));

    // Both authorities are trusted, newest first.
    assert_eq!(h.stored_bundle().identities(), vec![a2.identity(), a.identity()]);

    // The leaf is re-signed by A2.
    let l2 = h.stored_leaf();
    assert_eq!(l2.certificate().issuer(), a2.subject());
    verify_signature(l2.certificate(), a2.certificate()).unwrap();

    // t=24h: A's not-after has passed and it is pruned; A2 stays current.
    h.at(hours(24));
    h.tick().await.unwrap();
    assert_eq!(h.stored_authority().identity(), a2.identity());
    assert_eq!(h.stored_bundle().identities(), vec![a2.identity()]);
}

#[tokio::test]
async fn test_old_authority_stays_trusted_until_its_own_expiry() {
    let h = Harness::scenario();
    h.tick().await.unwrap();
    let a = h.stored_authority();

    h.at(hours(13));
    h.tick().await.unwrap();

    for hour in [14, 18, 23] {
        h.at(hours(hour));
        h.tick().await.unwrap();
        assert!(
            h.stored_bundle().contains(&a.identity()),
            "authority pruned at {hour}h"
        );
    }

    h.at(hours(24));
    h.tick().await.unwrap();
    assert!(!h.stored_bundle().contains(&a.identity()));
}

#[tokio::test]
async fn test_leaf_refreshes_without_authority_change() {
    let h = Harness::scenario();
    h.tick().await.unwrap();
    let a = h.stored_authority();
    let l1 = h.stored_leaf();

    h.at(hours(5));
    h.tick().await.unwrap();
    let l2 = h.stored_leaf();

    assert_eq!(h.stored_authority().identity(), a.identity());
    assert_ne!(l2.certificate().serial(), l1.certificate().serial());
    assert_eq!(l2.certificate().not_after(), common::t0() + hours(13));
}

/// authority 24h/2h, leaf 8h/4h: a late leaf is capped well inside its own
/// refresh threshold.
fn short_authority_refresh_config() -> rotor_core::RotationConfig {
    let mut config = common::scenario_config();
    config.authority.refresh_secs = 2 * 3600;
    config
}

#[tokio::test]
async fn test_leaf_capped_by_authority_expiry_is_stable() {
    let h = Harness::new(short_authority_refresh_config());
    h.tick().await.unwrap();
    let a = h.stored_authority();

    h.at(hours(21));
    h.tick().await.unwrap();
    assert_eq!(h.write_counts(), (1, 1, 2));
    assert_eq!(h.stored_leaf().certificate().not_after(), common::t0() + hours(24));

    h.tick().await.unwrap();
    h.tick().await.unwrap();
    assert_eq!(h.write_counts(), (1, 1, 2));

    // Once the authority enters its own refresh window both rotate together.
    h.at(hours(22) + chrono::Duration::minutes(30));
    h.tick().await.unwrap();
    let a2 = h.stored_authority();
    assert_ne!(a2.identity(), a.identity());
    assert_eq!(h.stored_leaf().certificate().issuer(), a2.subject());
    assert_eq!(h.write_counts(), (2, 2, 3));
}

// ============================================================================
// Failure Isolation
// ============================================================================

#[tokio::test]
async fn test_bundle_write_failure_stops_the_tick_and_keeps_the_new_authority() {
    let h = Harness::scenario();
    h.tick().await.unwrap();
    let l1 = h.stored_leaf();

    h.at(hours(13));
    h.bundle.fail_writes(Some("bundle store unavailable"));
    let err = h.tick().await.unwrap_err();
    assert!(matches!(err, Error::Store { ref key, .. } if key == BUNDLE_KEY));

    let a2 = h.stored_authority();
    let (authority_writes, _, leaf_writes) = h.write_counts();
    assert_eq!(authority_writes, 2);
    assert_eq!(leaf_writes, 1);
    assert_eq!(h.stored_leaf().certificate(), l1.certificate());
    assert!(h.degraded());

    h.bundle.fail_writes(None);
    h.tick().await.unwrap();

    assert_eq!(h.stored_authority().identity(), a2.identity());
    assert_eq!(h.write_counts().0, 2);
    assert_eq!(h.stored_bundle().identities()[0], a2.identity());
    assert_eq!(h.stored_leaf().certificate().issuer(), a2.subject());
    assert!(!h.degraded());
}

#[tokio::test]
async fn test_authority_read_failure_skips_later_stages() {
    let h = Harness::scenario();
    h.authority.fail_reads(Some("timeout"));

    assert!(matches!(h.tick().await.unwrap_err(), Error::Store { .. }));
    assert_eq!(h.write_counts(), (0, 0, 0));
    assert!(h.degraded());
}

// ============================================================================
// External Mutation
// ============================================================================

#[tokio::test]
async fn test_deleted_leaf_is_recreated() {
    let h = Harness::scenario();
    h.tick().await.unwrap();
    let authority = h.stored_authority();

    h.leaf.remove(LEAF_KEY);
    h.tick().await.unwrap();

    assert_eq!(h.stored_leaf().certificate().issuer(), authority.subject());
    assert_eq!(h.write_counts(), (1, 1, 2));
}

#[tokio::test]
async fn test_corrupted_authority_is_replaced_and_reported() {
    let h = Harness::scenario();
    h.tick().await.unwrap();
    let original = h.stored_authority();

    let mut record = h.authority.get(AUTHORITY_KEY).unwrap();
    record.cert_pem = record.cert_pem.replace('A', "B");
    h.authority.set(AUTHORITY_KEY, record);

    let err = h.tick().await.unwrap_err();
    assert!(matches!(err, Error::MalformedArtifact { ref key, .. } if key == AUTHORITY_KEY));
    assert!(h.degraded());

    // Every stage still ran against the replacement authority.
    let replacement = h.stored_authority();
    assert_ne!(replacement.identity(), original.identity());
    assert_eq!(
        h.stored_bundle().identities(),
        vec![replacement.identity(), original.identity()]
    );
    assert_eq!(h.stored_leaf().certificate().issuer(), replacement.subject());

    h.tick().await.unwrap();
    assert!(!h.degraded());
}

#[tokio::test]
async fn test_deleted_bundle_is_rebuilt_with_current_authority_only() {
    let h = Harness::scenario();
    h.tick().await.unwrap();
    h.at(hours(13));
    h.tick().await.unwrap();
    let current = h.stored_authority();

    h.bundle.remove(BUNDLE_KEY);
    h.tick().await.unwrap();
    assert_eq!(h.stored_bundle().identities(), vec![current.identity()]);
}

#[tokio::test]
async fn test_hostname_change_reissues_leaf() {
    let h = Harness::scenario();
    h.tick().await.unwrap();

    assert!(h.content.set_hostnames(["svc.internal", "svc.example.com"]));
    h.tick().await.unwrap();

    let leaf = h.stored_leaf();
    assert_eq!(
        leaf.annotation(HOSTNAMES_ANNOTATION),
        Some("svc.example.com,svc.internal")
    );
    assert_eq!(leaf.certificate().san().len(), 2);
}

// ============================================================================
// Run-once and Interruption
// ============================================================================

#[tokio::test]
async fn test_run_once_returns_errors_without_reporting() {
    let h = Harness::scenario();
    h.bundle.fail_writes(Some("read-only"));

    let err = h
        .controller
        .sync(SyncMode::RunOnce, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Store { .. }));
    assert_eq!(h.status.write_count(), 0);

    h.bundle.fail_writes(None);
    h.controller
        .sync(SyncMode::RunOnce, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(h.status.write_count(), 0);
}

/// A store whose reads never complete.
struct StalledStore;

impl ArtifactStore<BundleRecord> for StalledStore {
    fn read<'a>(
        &'a self,
        _key: &'a str,
    ) -> BoxFuture<'a, rotor_core::Result<Option<BundleRecord>>> {
        Box::pin(futures::future::pending())
    }

    fn write<'a>(
        &'a self,
        _key: &'a str,
        _record: BundleRecord,
    ) -> BoxFuture<'a, rotor_core::Result<()>> {
        Box::pin(futures::future::pending())
    }

    fn on_change(&self, _key: &str, _callback: ChangeCallback) {}
}

#[tokio::test(start_paused = true)]
async fn test_stalled_store_hits_the_tick_deadline() {
    let mut config = common::scenario_config();
    config.tick_timeout_secs = 5;
    let authority: Arc<MemoryStore<CertKeyRecord>> = Arc::new(MemoryStore::new());
    let leaf: Arc<MemoryStore<CertKeyRecord>> = Arc::new(MemoryStore::new());

    let controller = RotationController::builder(config)
        .authority_store(authority.clone(), AUTHORITY_KEY)
        .bundle_store(Arc::new(StalledStore), BUNDLE_KEY)
        .leaf_store(leaf.clone(), LEAF_KEY)
        .content(Arc::new(ServingCertContent::new(["svc.internal"])))
        .build()
        .unwrap();

    let err = controller
        .sync(SyncMode::RunOnce, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded(d) if d == Duration::from_secs(5)));
    assert_eq!(authority.write_count(), 1);
    assert_eq!(leaf.write_count(), 0);
}

#[tokio::test]
async fn test_cancellation_during_a_stalled_stage() {
    let controller = RotationController::builder(common::scenario_config())
        .authority_store(Arc::new(MemoryStore::<CertKeyRecord>::new()), AUTHORITY_KEY)
        .bundle_store(Arc::new(StalledStore), BUNDLE_KEY)
        .leaf_store(Arc::new(MemoryStore::<CertKeyRecord>::new()), LEAF_KEY)
        .content(Arc::new(ServingCertContent::new(["svc.internal"])))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let err = controller.sync(SyncMode::RunOnce, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    canceller.await.unwrap();
}

/// A bundle store that yields while reading and records how many reads overlap.
#[derive(Default)]
struct YieldingStore {
    inner: MemoryStore<BundleRecord>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ArtifactStore<BundleRecord> for YieldingStore {
    fn read<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, rotor_core::Result<Option<BundleRecord>>> {
        Box::pin(async move {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            let record = self.inner.read(key).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            record
        })
    }

    fn write<'a>(
        &'a self,
        key: &'a str,
        record: BundleRecord,
    ) -> BoxFuture<'a, rotor_core::Result<()>> {
        self.inner.write(key, record)
    }

    fn on_change(&self, key: &str, callback: ChangeCallback) {
        self.inner.on_change(key, callback);
    }
}

#[tokio::test]
async fn test_concurrent_syncs_do_not_interleave() {
    let authority: Arc<MemoryStore<CertKeyRecord>> = Arc::new(MemoryStore::new());
    let bundle: Arc<YieldingStore> = Arc::new(YieldingStore::default());
    let leaf: Arc<MemoryStore<CertKeyRecord>> = Arc::new(MemoryStore::new());

    let controller = RotationController::builder(common::scenario_config())
        .authority_store(authority.clone(), AUTHORITY_KEY)
        .bundle_store(bundle.clone(), BUNDLE_KEY)
        .leaf_store(leaf.clone(), LEAF_KEY)
        .content(Arc::new(ServingCertContent::new(["svc.internal"])))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let (first, second) = tokio::join!(
        controller.sync(SyncMode::Steady, &cancel),
        controller.sync(SyncMode::RunOnce, &cancel),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(bundle.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(authority.write_count(), 1);
    assert_eq!(bundle.inner.write_count(), 1);
    assert_eq!(leaf.write_count(), 1);
}
