//! Shared fixtures for controller integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rotor_core::{
    BundleRecord, CertKeyArtifact, CertKeyRecord, ConditionStatusReporter, ManualClock,
    MemoryStore, Result, RotationCondition, RotationConfig, RotationController, RotationPolicy,
    ServingCertContent, SigningAuthority, SyncMode, TrustBundle,
};
use tokio_util::sync::CancellationToken;

pub const AUTHORITY_KEY: &str = "signer";
pub const BUNDLE_KEY: &str = "ca-bundle";
pub const LEAF_KEY: &str = "serving";
pub const STATUS_KEY: &str = "status";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
}

pub fn hours(h: i64) -> chrono::Duration {
    chrono::Duration::hours(h)
}

/// authority 24h/12h, leaf 8h/4h.
pub fn scenario_config() -> RotationConfig {
    const HOUR: u64 = 3600;
    RotationConfig::new(
        "svc",
        RotationPolicy::new(Duration::from_secs(24 * HOUR), Duration::from_secs(12 * HOUR)),
        RotationPolicy::new(Duration::from_secs(8 * HOUR), Duration::from_secs(4 * HOUR)),
    )
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub authority: Arc<MemoryStore<CertKeyRecord>>,
    pub bundle: Arc<MemoryStore<BundleRecord>>,
    pub leaf: Arc<MemoryStore<CertKeyRecord>>,
    pub status: Arc<MemoryStore<RotationCondition>>,
    pub content: Arc<ServingCertContent>,
    pub controller: Arc<RotationController>,
}

impl Harness {
    pub fn new(config: RotationConfig) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let authority: Arc<MemoryStore<CertKeyRecord>> = Arc::new(MemoryStore::new());
        let bundle: Arc<MemoryStore<BundleRecord>> = Arc::new(MemoryStore::new());
        let leaf: Arc<MemoryStore<CertKeyRecord>> = Arc::new(MemoryStore::new());
        let status: Arc<MemoryStore<RotationCondition>> = Arc::new(MemoryStore::new());
        let content = Arc::new(ServingCertContent::new(["svc.internal", "10.0.0.7"]));

        let reporter = ConditionStatusReporter::new(
            status.clone(),
            STATUS_KEY,
            &config.name,
            clock.clone(),
        );
        let controller = RotationController::builder(config)
            .authority_store(authority.clone(), AUTHORITY_KEY)
            .bundle_store(bundle.clone(), BUNDLE_KEY)
            .leaf_store(leaf.clone(), LEAF_KEY)
            .content(content.clone())
            .reporter(Arc::new(reporter))
            .clock(clock.clone())
            .build()
            .unwrap();

        Self {
            clock,
            authority,
            bundle,
            leaf,
            status,
            content,
            controller: Arc::new(controller),
        }
    }

    pub fn scenario() -> Self {
        Self::new(scenario_config())
    }

    pub async fn tick(&self) -> Result<()> {
        self.controller
            .sync(SyncMode::Steady, &CancellationToken::new())
            .await
    }

    pub fn at(&self, offset: chrono::Duration) {
        self.clock.set(t0() + offset);
    }

    pub fn stored_authority(&self) -> SigningAuthority {
        SigningAuthority::decode(AUTHORITY_KEY, &self.authority.get(AUTHORITY_KEY).unwrap()).unwrap()
    }

    pub fn stored_bundle(&self) -> TrustBundle {
        let (bundle, dropped) =
            TrustBundle::parse_lenient(&self.bundle.get(BUNDLE_KEY).unwrap().ca_bundle_pem);
        assert!(dropped.is_empty(), "stored bundle has damaged blocks: {dropped:?}");
        bundle
    }

    pub fn stored_leaf(&self) -> CertKeyArtifact {
        CertKeyArtifact::decode(LEAF_KEY, &self.leaf.get(LEAF_KEY).unwrap()).unwrap()
    }

    pub fn write_counts(&self) -> (usize, usize, usize) {
        (
            self.authority.write_count(),
            self.bundle.write_count(),
            self.leaf.write_count(),
        )
    }

    pub fn degraded(&self) -> bool {
        self.status.get(STATUS_KEY).is_some_and(|c| c.degraded)
    }
}
