//! Client-local durable key/value storage.
//!
//! The session layer keeps a display-name backup and the auth adapter's
//! session material here. Everything it writes goes through a
//! [`NamespacedCache`] so a sign-out can wipe exactly that subset.

use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tracing::{debug, warn};

/// Prefix shared by every key the session layer writes.
pub const AUTH_NAMESPACE: &str = "portal.auth.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("durable store unavailable: {0}")]
    Unavailable(String),
    #[error("durable store contents are corrupt: {0}")]
    Corrupt(String),
    #[error("durable store backend failure: {0}")]
    Backend(String),
}

pub trait DurableStore: Send + Sync {
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove a key. Returns whether it was present.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

impl<S: DurableStore + ?Sized> DurableStore for Arc<S> {
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).keys()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryDurableStore {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl DurableStore for InMemoryDurableStore {
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        data.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.keys().cloned().collect())
    }
}

/// JSON-file backed store. Each write replaces the file atomically.
pub struct FileDurableStore {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl FileDurableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(StoreError::Unavailable(format!(
                    "failed reading {}: {err}",
                    self.path.display()
                )));
            }
        };

        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&raw).map_err(|err| {
            StoreError::Corrupt(format!("failed parsing {}: {err}", self.path.display()))
        })
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!(
                    "failed creating store directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let encoded =
            serde_json::to_vec_pretty(entries).map_err(|err| StoreError::Backend(err.to_string()))?;
        let temp_path = temp_path_for(&self.path);
        fs::write(&temp_path, encoded).map_err(|err| {
            StoreError::Unavailable(format!(
                "failed writing temp store {}: {err}",
                temp_path.display()
            ))
        })?;

        if let Err(rename_err) = fs::rename(&temp_path, &self.path) {
            // Windows does not allow replacing existing files via rename.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(StoreError::Unavailable(format!(
                        "failed replacing {} after rename error ({rename_err}): {err}",
                        self.path.display()
                    )));
                }
            }
            fs::rename(&temp_path, &self.path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                StoreError::Unavailable(format!(
                    "failed writing {} after temp write: {err}",
                    self.path.display()
                ))
            })?;
        }

        Ok(())
    }

    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>) -> T,
    ) -> Result<T, StoreError> {
        let _guard = self
            .write_guard
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        let mut entries = self.load()?;
        let outcome = change(&mut entries);
        self.save(&entries)?;
        Ok(outcome)
    }
}

impl DurableStore for FileDurableStore {
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.mutate(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.remove(key))
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.mutate(|entries| entries.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.load()?.into_keys().collect())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("portal-cache.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

pub type SharedStore = Arc<dyn DurableStore>;

/// Cache scoped to [`AUTH_NAMESPACE`].
pub type AuthCache = NamespacedCache<SharedStore>;

pub fn auth_cache(store: SharedStore) -> AuthCache {
    NamespacedCache::new(store, AUTH_NAMESPACE)
}

/// View of a store where every key carries a fixed prefix.
#[derive(Clone)]
pub struct NamespacedCache<S: DurableStore> {
    inner: S,
    prefix: String,
}

impl<S: DurableStore> NamespacedCache<S> {
    pub fn new(inner: S, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Fully-qualified key as written to the underlying store.
    pub fn qualified(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(&self.qualified(key), value)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(&self.qualified(key))
    }

    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.remove(&self.qualified(key))
    }

    /// Delete every key under the prefix, leaving other keys untouched.
    ///
    /// Keeps going after a failed removal and reports the first error.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let keys = self.inner.keys()?;
        let mut removed = 0;
        let mut first_error = None;

        for key in keys.iter().filter(|key| key.starts_with(&self.prefix)) {
            match self.inner.remove(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(key = %key, error = %err, "failed removing cached entry");
                    first_error.get_or_insert(err);
                }
            }
        }

        debug!(prefix = %self.prefix, removed, "cleared cache namespace");
        match first_error {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }
}
