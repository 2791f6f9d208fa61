//! In-process artifact store.

// Guards are held only for the duration of a map operation.
#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::{ArtifactStore, ChangeCallback};

/// In-memory store with write accounting and fault injection.
///
/// `set` and `remove` mutate records out of band, the way an administrator
/// editing the backing storage would, and fire change callbacks like any
/// other modification.
pub struct MemoryStore<R> {
    records: RwLock<HashMap<String, R>>,
    callbacks: Mutex<HashMap<String, Vec<ChangeCallback>>>,
    writes: AtomicUsize,
    read_failure: RwLock<Option<String>>,
    write_failure: RwLock<Option<String>>,
}

impl<R> MemoryStore<R>
where
    R: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            read_failure: RwLock::new(None),
            write_failure: RwLock::new(None),
        }
    }

    /// Returns the record under `key` without going through the async API.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<R> {
        self.records.read().get(key).cloned()
    }

    /// Replaces a record out of band.
    pub fn set(&self, key: &str, record: R) {
        if self.replace(key, Some(record)) {
            self.fire(key);
        }
    }

    /// Deletes a record out of band.
    pub fn remove(&self, key: &str) {
        if self.replace(key, None) {
            self.fire(key);
        }
    }

    /// Number of successful writes made through [`ArtifactStore::write`].
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every read fail with `message` until cleared with `None`.
    pub fn fail_reads(&self, message: Option<&str>) {
        *self.read_failure.write() = message.map(String::from);
    }

    /// Makes every write fail with `message` until cleared with `None`.
    pub fn fail_writes(&self, message: Option<&str>) {
        *self.write_failure.write() = message.map(String::from);
    }

    fn replace(&self, key: &str, record: Option<R>) -> bool {
        let mut records = self.records.write();
        match record {
            Some(record) => {
                let changed = records.get(key) != Some(&record);
                records.insert(key.to_string(), record);
                changed
            }
            None => records.remove(key).is_some(),
        }
    }

    fn fire(&self, key: &str) {
        let callbacks = self.callbacks.lock().get(key).cloned().unwrap_or_default();
        for callback in callbacks {
            callback();
        }
    }
}

impl<R> Default for MemoryStore<R>
where
    R: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ArtifactStore<R> for MemoryStore<R>
where
    R: Clone + PartialEq + Send + Sync + 'static,
{
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<R>>> {
        Box::pin(async move {
            let failure = self.read_failure.read().clone();
            if let Some(message) = failure {
                return Err(Error::store(key, message));
            }
            Ok(self.get(key))
        })
    }

    fn write<'a>(&'a self, key: &'a str, record: R) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let failure = self.write_failure.read().clone();
            if let Some(message) = failure {
                return Err(Error::store(key, message));
            }
            let changed = self.replace(key, Some(record));
            self.writes.fetch_add(1, Ordering::SeqCst);
            debug!(key, changed, "memory store write");
            if changed {
                self.fire(key);
            }
            Ok(())
        })
    }

    fn on_change(&self, key: &str, callback: ChangeCallback) {
        self.callbacks
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(callback);
    }
}

impl<R> std::fmt::Debug for MemoryStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.records.read().len())
            .field("writes", &self.writes.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
