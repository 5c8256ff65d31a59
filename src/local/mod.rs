//! Local device key-value storage.
//!
//! The identity resolver persists the patient id and name through the
//! [`KeyValueStore`] contract. [`InMemoryKeyValueStore`] lives for the
//! process; the `persistent` feature adds a file-backed store that survives
//! restarts.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

#[cfg(feature = "persistent")]
pub mod persistent;

#[cfg(feature = "persistent")]
pub use persistent::FileKeyValueStore;

/// Errors reported by a local key-value store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocalStoreError {
    /// Reading or writing the backing storage failed.
    #[error("Local storage I/O error at '{path}': {message}")]
    Io {
        /// File or directory involved.
        path: String,
        /// OS error text.
        message: String,
    },

    /// Stored data failed its integrity check.
    #[error("Local storage corrupted: {message}")]
    Corrupted {
        /// What was wrong.
        message: String,
    },

    /// Another process holds the store.
    #[error("Local storage at '{path}' is locked by another process")]
    Locked {
        /// Lock file path.
        path: String,
    },

    /// A thread panicked while holding the store.
    #[error("Local storage lock poisoned: {context}")]
    Poisoned {
        /// Operation that found the lock poisoned.
        context: &'static str,
    },
}

/// Minimal string key-value storage on the local device.
pub trait KeyValueStore: Send + Sync {
    /// Value stored under `key`, if any.
    ///
    /// # Errors
    /// Backend failure.
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Backend failure.
    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError>;

    /// Delete `key`. Deleting an absent key is not an error.
    ///
    /// # Errors
    /// Backend failure.
    fn remove(&self, key: &str) -> Result<(), LocalStoreError>;
}

fn lock_err(context: &'static str) -> LocalStoreError {
    LocalStoreError::Poisoned { context }
}

/// Process-lifetime key-value store.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    ///
    /// # Errors
    /// Poisoned lock.
    pub fn len(&self) -> Result<usize, LocalStoreError> {
        Ok(self.entries.read().map_err(|_| lock_err("kv.len"))?.len())
    }

    /// True when nothing is stored.
    ///
    /// # Errors
    /// Poisoned lock.
    pub fn is_empty(&self) -> Result<bool, LocalStoreError> {
        Ok(self.len()? == 0)
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        let entries = self.entries.read().map_err(|_| lock_err("kv.get"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        let mut entries = self.entries.write().map_err(|_| lock_err("kv.set"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        let mut entries = self.entries.write().map_err(|_| lock_err("kv.remove"))?;
        entries.remove(key);
        Ok(())
    }
}
