//! Directory-backed artifact store.
//!
//! Each key lives in `<dir>/<key>.json`. Writes land in a temporary sibling
//! first and are moved into place with `rename`, so a reader never sees a
//! half-written record. A temporary file abandoned by an interrupted write is
//! removed by the next write to the same key. Change callbacks fire for writes made through this
//! store; edits made directly on disk are picked up by the resync timer.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::{ArtifactStore, ChangeCallback};

/// JSON file store rooted at a directory.
pub struct FileStore<R> {
    dir: PathBuf,
    callbacks: Mutex<HashMap<String, Vec<ChangeCallback>>>,
    _record: PhantomData<fn() -> R>,
}

impl<R> FileStore<R> {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            callbacks: Mutex::new(HashMap::new()),
            _record: PhantomData,
        }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if `key` is not a plain file name.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::store(key, "key must be a plain file name"));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn temp_prefix(key: &str) -> String {
        format!(".{key}.json.tmp-")
    }

    /// Removes temporary files left behind by writes to `key` that never
    /// reached their rename.
    async fn sweep_temps(&self, key: &str) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return;
        };
        let prefix = Self::temp_prefix(key);
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => debug!(key, path = %entry.path().display(), "removed stale temp file"),
                    Err(e) => debug!(key, error = %e, "failed to remove stale temp file"),
                }
            }
        }
    }

    fn fire(&self, key: &str) {
        let callbacks = self.callbacks.lock().get(key).cloned().unwrap_or_default();
        for callback in callbacks {
            callback();
        }
    }
}

impl<R> ArtifactStore<R> for FileStore<R>
where
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<R>>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(Error::store(key, format!("read {}: {e}", path.display()))),
            };
            serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| Error::malformed(key, format!("undecodable record: {e}")))
        })
    }

    fn write<'a>(&'a self, key: &'a str, record: R) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            let content = serde_json::to_vec_pretty(&record)
                .map_err(|e| Error::store(key, format!("encode: {e}")))?;

            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| Error::store(key, format!("create {}: {e}", self.dir.display())))?;

            self.sweep_temps(key).await;
            let tmp = self.dir.join(format!(
                "{}{:016x}",
                Self::temp_prefix(key),
                rand::random::<u64>()
            ));
            if let Err(e) = tokio::fs::write(&tmp, &content).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(Error::store(key, format!("write {}: {e}", tmp.display())));
            }
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(Error::store(key, format!("rename into {}: {e}", path.display())));
            }

            debug!(key, path = %path.display(), "file store write");
            self.fire(key);
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

impl<R> std::fmt::Debug for FileStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}
