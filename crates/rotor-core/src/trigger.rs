//! Coalesced tick requests.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::store::ChangeCallback;

/// One-slot pending-tick signal.
///
/// Any number of [`request`](Self::request) calls made while no tick is
/// waiting collapse into a single pending tick.
#[derive(Debug, Clone, Default)]
pub struct TickTrigger {
    notify: Arc<Notify>,
}

impl TickTrigger {
    /// Creates a trigger with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks for a tick as soon as the current one, if any, finishes.
    pub fn request(&self) {
        self.notify.notify_one();
    }

    /// Waits until a tick has been requested, consuming the request.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// A store change callback that requests a tick.
    #[must_use]
    pub fn callback(&self) -> ChangeCallback {
        let trigger = self.clone();
        Arc::new(move || trigger.request())
    }
}
