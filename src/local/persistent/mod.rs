//! Durable file-backed key-value store.
//!
//! The whole map lives in one checksummed file, `kv.dat`, inside a
//! directory locked for the lifetime of the store. Every write rewrites the
//! file through a temporary sibling and an atomic rename, so a crash leaves
//! either the old or the new contents on disk.

pub mod codec;
pub mod file_lock;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::local::{KeyValueStore, LocalStoreError};

use self::file_lock::DirLock;

const DATA_FILE: &str = "kv.dat";
const TEMP_FILE: &str = "kv.dat.tmp";

fn io_err(path: &Path, e: &std::io::Error) -> LocalStoreError {
    LocalStoreError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

/// Key-value store persisted to a directory.
#[derive(Debug)]
pub struct FileKeyValueStore {
    dir: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    _lock: DirLock,
}

impl FileKeyValueStore {
    /// Open (or create) the store in `dir`.
    ///
    /// # Errors
    /// - `Locked` if another process has the directory open
    /// - `Corrupted` if the data file fails its integrity check
    /// - `Io` for filesystem failures
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LocalStoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, &e))?;
        let lock = DirLock::acquire(&dir)?;

        let data_path = dir.join(DATA_FILE);
        let entries = match fs::read(&data_path) {
            Ok(bytes) => codec::decode(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(io_err(&data_path, &e)),
        };
        tracing::debug!(dir = %dir.display(), keys = entries.len(), "local store opened");

        Ok(Self {
            dir,
            entries: RwLock::new(entries),
            _lock: lock,
        })
    }

    /// Directory holding the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), LocalStoreError> {
        let image = codec::encode(entries)?;
        let temp = self.dir.join(TEMP_FILE);
        let target = self.dir.join(DATA_FILE);

        let mut file = File::create(&temp).map_err(|e| io_err(&temp, &e))?;
        file.write_all(&image).map_err(|e| io_err(&temp, &e))?;
        file.sync_all().map_err(|e| io_err(&temp, &e))?;
        drop(file);
        fs::rename(&temp, &target).map_err(|e| io_err(&target, &e))
    }

    fn mutate(
        &self,
        context: &'static str,
        apply: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), LocalStoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| LocalStoreError::Poisoned { context })?;
        let mut next = entries.clone();
        apply(&mut next);
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| LocalStoreError::Poisoned { context: "file_kv.get" })?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        self.mutate("file_kv.set", |entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        self.mutate("file_kv.remove", |entries| {
            entries.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let kv = FileKeyValueStore::open(dir.path()).unwrap();
            kv.set("patientId", "patient-42").unwrap();
            kv.set("patientName", "Amina").unwrap();
            kv.remove("patientName").unwrap();
        }
        let kv = FileKeyValueStore::open(dir.path()).unwrap();
        assert_eq!(kv.get("patientId").unwrap().as_deref(), Some("patient-42"));
        assert_eq!(kv.get("patientName").unwrap(), None);
    }

    #[test]
    fn test_open_detects_corruption() {
        let dir = tempdir().unwrap();
        {
            let kv = FileKeyValueStore::open(dir.path()).unwrap();
            kv.set("patientId", "patient-42").unwrap();
        }
        let data = dir.path().join(DATA_FILE);
        let mut bytes = fs::read(&data).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0x55;
        fs::write(&data, bytes).unwrap();

        assert!(matches!(
            FileKeyValueStore::open(dir.path()),
            Err(LocalStoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _kv = FileKeyValueStore::open(dir.path()).unwrap();
        assert!(matches!(
            FileKeyValueStore::open(dir.path()),
            Err(LocalStoreError::Locked { .. })
        ));
    }
}
