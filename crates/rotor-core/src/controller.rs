//! The reconciliation loop.
//!
//! A tick runs the authority rotator, the bundle maintainer and the leaf
//! rotator in that order, each stage feeding the next. The first failing stage
//! ends the tick; the next tick starts again from the authority. The
//! controller keeps no artifact state between ticks.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authority::SigningAuthorityRotator;
use crate::bundle::BundleMaintainer;
use crate::clock::{Clock, SystemClock};
use crate::config::RotationConfig;
use crate::content::CertContentProvider;
use crate::error::{Error, Result};
use crate::leaf::LeafRotator;
use crate::state::{AtomicControllerState, ControllerState};
use crate::status::{StatusReporter, TickOutcome, ROTATION_ERROR_REASON};
use crate::store::{
    AuthorityStore, BundleRecord, BundleStore, CertKeyRecord, LeafStore, StoreRef,
};
use crate::trigger::TickTrigger;

/// How a tick was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Part of the steady-state loop; the outcome goes to the status sink.
    Steady,
    /// One-shot invocation; the outcome is only returned to the caller.
    RunOnce,
}

/// Published after every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Tick counter, starting at 1.
    pub generation: u64,
    /// What happened.
    pub outcome: TickOutcome,
}

/// Sequences the three rotation stages for one authority/bundle/leaf triple.
pub struct RotationController {
    name: String,
    authority: SigningAuthorityRotator,
    bundle: BundleMaintainer,
    leaf: LeafRotator,
    reporter: Option<Arc<dyn StatusReporter>>,
    trigger: TickTrigger,
    state: AtomicControllerState,
    tick_guard: Mutex<()>,
    generation: AtomicU64,
    reports: watch::Sender<Option<TickReport>>,
    tick_interval: Duration,
    tick_timeout: Duration,
}

impl RotationController {
    /// Starts building a controller for `config`.
    #[must_use]
    pub fn builder(config: RotationConfig) -> RotationControllerBuilder {
        RotationControllerBuilder {
            config,
            authority_store: None,
            bundle_store: None,
            leaf_store: None,
            content: None,
            reporter: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Controller name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current position in the tick cycle.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state.load()
    }

    /// The trigger feeding the loop; [`TickTrigger::request`] forces a recheck.
    #[must_use]
    pub const fn trigger(&self) -> &TickTrigger {
        &self.trigger
    }

    /// Observes tick reports. The value is `None` until the first tick ends.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<TickReport>> {
        self.reports.subscribe()
    }

    /// Runs one tick.
    ///
    /// Ticks are serialized: a call made while another tick is in progress
    /// waits for it to finish. In [`SyncMode::Steady`] the outcome is reported
    /// to the status sink and a sink failure becomes the tick's error; a
    /// cancelled tick is not reported. In [`SyncMode::RunOnce`] the sink is
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns the first stage error, [`Error::Cancelled`] or
    /// [`Error::DeadlineExceeded`] if the tick was interrupted, a recovered
    /// [`Error::MalformedArtifact`] if every stage succeeded after repairing
    /// one, or [`Error::Status`] if reporting failed.
    pub async fn sync(&self, mode: SyncMode, cancel: &CancellationToken) -> Result<()> {
        let _tick = self.tick_guard.lock().await;
        self.state.store(ControllerState::Running);

        let result = tokio::time::timeout(self.tick_timeout, self.sync_worker(cancel))
            .await
            .unwrap_or_else(|_elapsed| Err(Error::DeadlineExceeded(self.tick_timeout)));

        self.state.store(if result.is_ok() {
            ControllerState::Succeeded
        } else {
            ControllerState::Failed
        });

        let reported = mode == SyncMode::Steady && !matches!(result, Err(Error::Cancelled));
        let result = if reported {
            self.report(result).await
        } else {
            result
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.reports.send_replace(Some(TickReport {
            generation,
            outcome: TickOutcome::from(&result),
        }));
        self.state.store(ControllerState::Idle);
        result
    }

    async fn sync_worker(&self, cancel: &CancellationToken) -> Result<()> {
        let authority = interruptible(cancel, self.authority.ensure()).await?;
        let bundle = interruptible(cancel, self.bundle.ensure(&authority.value)).await?;
        let leaf =
            interruptible(cancel, self.leaf.ensure(&authority.value, &bundle.value)).await?;

        if !(authority.written || bundle.written || leaf.written) {
            debug!(name = %self.name, "all artifacts current");
        }

        match authority.recovered.or(bundle.recovered).or(leaf.recovered) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn report(&self, result: Result<()>) -> Result<()> {
        let Some(reporter) = &self.reporter else {
            return result;
        };
        let outcome = TickOutcome::from(&result);
        match reporter.report(&outcome).await {
            Ok(changed) => {
                if changed {
                    if let Err(e) = &result {
                        warn!(
                            name = %self.name,
                            reason = ROTATION_ERROR_REASON,
                            error = %e,
                            "certificate rotation degraded"
                        );
                    }
                }
                result
            }
            Err(e) => {
                warn!(name = %self.name, error = %e, "failed to report rotation status");
                result.and(Err(e))
            }
        }
    }

    /// Runs ticks until `cancel` fires.
    ///
    /// Ticks come from the interval timer (the first one fires immediately),
    /// from change notifications on the three stores, and from the content
    /// provider's recheck signal. Pending requests coalesce and ticks never
    /// overlap. Call once per controller; each call registers its own store
    /// callbacks.
    pub async fn run(&self, cancel: CancellationToken) {
        self.register_change_callbacks();
        let forwarder = self.forward_recheck_signal(&cancel);

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            name = %self.name,
            interval_secs = self.tick_interval.as_secs(),
            "rotation controller started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.trigger.notified() => debug!(name = %self.name, "tick requested"),
                _ = interval.tick() => {}
            }

            match self.sync(SyncMode::Steady, &cancel).await {
                Ok(()) => {}
                Err(Error::Cancelled) => break,
                Err(e) if e.is_retryable() => {
                    warn!(name = %self.name, kind = ?e.kind(), error = %e, "rotation tick failed");
                }
                Err(e) => {
                    error!(
                        name = %self.name,
                        kind = ?e.kind(),
                        error = %e,
                        "rotation tick failed and will not recover without operator action"
                    );
                }
            }
        }

        if let Some(handle) = forwarder {
            handle.abort();
        }
        info!(name = %self.name, "rotation controller stopped");
    }

    fn register_change_callbacks(&self) {
        self.authority.store().on_change(self.trigger.callback());
        self.bundle.store().on_change(self.trigger.callback());
        self.leaf.store().on_change(self.trigger.callback());
        debug!(
            name = %self.name,
            authority = self.authority.store().key(),
            bundle = self.bundle.store().key(),
            leaf = self.leaf.store().key(),
            "watching stores"
        );
    }

    fn forward_recheck_signal(&self, cancel: &CancellationToken) -> Option<JoinHandle<()>> {
        let mut signal = self.leaf.content().recheck_signal()?;
        let trigger = self.trigger.clone();
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    changed = signal.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        trigger.request();
                    }
                }
            }
        }))
    }
}

impl std::fmt::Debug for RotationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationController")
            .field("name", &self.name)
            .field("state", &self.state.load())
            .field("authority", &self.authority)
            .field("bundle", &self.bundle)
            .field("leaf", &self.leaf)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RotationController`].
pub struct RotationControllerBuilder {
    config: RotationConfig,
    authority_store: Option<StoreRef<CertKeyRecord>>,
    bundle_store: Option<StoreRef<BundleRecord>>,
    leaf_store: Option<StoreRef<CertKeyRecord>>,
    content: Option<Arc<dyn CertContentProvider>>,
    reporter: Option<Arc<dyn StatusReporter>>,
    clock: Arc<dyn Clock>,
}

impl RotationControllerBuilder {
    /// Store and key holding the signing authority.
    #[must_use]
    pub fn authority_store(mut self, store: Arc<AuthorityStore>, key: impl Into<String>) -> Self {
        self.authority_store = Some(StoreRef::new(store, key));
        self
    }

    /// Store and key holding the trust bundle.
    #[must_use]
    pub fn bundle_store(mut self, store: Arc<BundleStore>, key: impl Into<String>) -> Self {
        self.bundle_store = Some(StoreRef::new(store, key));
        self
    }

    /// Store and key holding the leaf certificate.
    #[must_use]
    pub fn leaf_store(mut self, store: Arc<LeafStore>, key: impl Into<String>) -> Self {
        self.leaf_store = Some(StoreRef::new(store, key));
        self
    }

    /// Leaf content provider.
    #[must_use]
    pub fn content(mut self, content: Arc<dyn CertContentProvider>) -> Self {
        self.content = Some(content);
        self
    }

    /// Status sink for steady-state ticks.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Time source; defaults to [`SystemClock`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates the configuration and assembles the controller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the configuration is invalid or a
    /// store or the content provider was not supplied.
    pub fn build(self) -> Result<RotationController> {
        self.config.validate()?;
        let missing = |what: &str| Error::Configuration(format!("{what} is required"));
        let authority_store = self.authority_store.ok_or_else(|| missing("authority store"))?;
        let bundle_store = self.bundle_store.ok_or_else(|| missing("bundle store"))?;
        let leaf_store = self.leaf_store.ok_or_else(|| missing("leaf store"))?;
        let content = self.content.ok_or_else(|| missing("content provider"))?;

        let config = self.config;
        let (reports, _) = watch::channel(None);
        Ok(RotationController {
            authority: SigningAuthorityRotator::new(
                authority_store,
                config.name.clone(),
                config.authority,
                Arc::clone(&self.clock),
            ),
            bundle: BundleMaintainer::new(bundle_store, Arc::clone(&self.clock)),
            leaf: LeafRotator::new(leaf_store, content, config.leaf, self.clock),
            reporter: self.reporter,
            trigger: TickTrigger::new(),
            state: AtomicControllerState::default(),
            tick_guard: Mutex::new(()),
            generation: AtomicU64::new(0),
            reports,
            tick_interval: config.tick_interval(),
            tick_timeout: config.tick_timeout(),
            name: config.name,
        })
    }
}

impl std::fmt::Debug for RotationControllerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationControllerBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn interruptible<T>(
    cancel: &CancellationToken,
    stage: impl Future<Output = Result<T>>,
) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = stage => result,
    }
}
