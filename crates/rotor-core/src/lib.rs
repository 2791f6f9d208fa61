//! Certificate rotation for long-running services.
//!
//! A [`RotationController`] keeps three artifacts valid without operator
//! intervention: a self-signed signing authority, a trust bundle that
//! accumulates every authority still within its validity window, and a leaf
//! certificate signed by the current authority. Each tick runs
//!
//! 1. [`SigningAuthorityRotator`], which rotates the authority when it is
//!    absent, malformed or inside its refresh threshold,
//! 2. [`BundleMaintainer`], which merges the authority into the bundle and
//!    prunes expired entries,
//! 3. [`LeafRotator`], which re-issues the leaf when it is expiring or was
//!    signed by anything other than the current authority.
//!
//! All durable state lives behind the [`ArtifactStore`] trait; the
//! controller reads every store fresh on each tick.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rotor_core::{
//!     BundleRecord, CertKeyRecord, MemoryStore, RotationConfig, RotationController,
//!     RotationPolicy, ServingCertContent, SyncMode,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # runtime.block_on(async {
//! let config = RotationConfig::new(
//!     "svc-signer",
//!     RotationPolicy::new(Duration::from_secs(86_400), Duration::from_secs(43_200)),
//!     RotationPolicy::new(Duration::from_secs(28_800), Duration::from_secs(14_400)),
//! );
//!
//! let leaves: Arc<MemoryStore<CertKeyRecord>> = Arc::new(MemoryStore::new());
//! let controller = RotationController::builder(config)
//!     .authority_store(Arc::new(MemoryStore::<CertKeyRecord>::new()), "signer")
//!     .bundle_store(Arc::new(MemoryStore::<BundleRecord>::new()), "ca-bundle")
//!     .leaf_store(leaves.clone(), "serving")
//!     .content(Arc::new(ServingCertContent::new(["svc.internal"])))
//!     .build()
//!     .unwrap();
//!
//! controller
//!     .sync(SyncMode::RunOnce, &CancellationToken::new())
//!     .await
//!     .unwrap();
//! assert!(leaves.get("serving").is_some());
//! # });
//! ```

pub mod artifact;
pub mod authority;
pub mod bundle;
pub mod clock;
pub mod config;
pub mod content;
pub mod controller;
pub mod error;
pub mod file;
pub mod leaf;
pub mod memory;
pub mod state;
pub mod status;
pub mod store;
pub mod trigger;

pub use artifact::{
    CertKeyArtifact, Ensured, LeafArtifact, RegenerationReason, SigningAuthority, TrustBundle,
};
pub use authority::SigningAuthorityRotator;
pub use bundle::BundleMaintainer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RotationConfig, RotationPolicy};
pub use content::{CertContentProvider, ClientCertContent, LeafContent, ServingCertContent};
pub use controller::{RotationController, RotationControllerBuilder, SyncMode, TickReport};
pub use error::{Error, ErrorKind, Result};
pub use file::FileStore;
pub use leaf::LeafRotator;
pub use memory::MemoryStore;
pub use state::{AtomicControllerState, ControllerState};
pub use status::{
    condition_type, ConditionStatusReporter, RotationCondition, StatusReporter, TickOutcome,
    ROTATION_ERROR_REASON,
};
pub use store::{
    ArtifactStore, AuthorityStore, BundleRecord, BundleStore, CertKeyRecord, ChangeCallback,
    LeafStore, StoreRef, HOSTNAMES_ANNOTATION, ISSUER_ANNOTATION, NOT_AFTER_ANNOTATION,
    NOT_BEFORE_ANNOTATION,
};
pub use trigger::TickTrigger;
