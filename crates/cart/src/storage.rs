//! Guest cart persistence.
//!
//! A [`GuestStorage`] is a small key/value store of JSON strings, shared by
//! every guest cart store on the device. Writes publish a [`StorageChange`]
//! so other stores can re-read the key (last writer wins).
//!
//! # Backends
//!
//! - [`MemoryStorage`]: in-process map with an optional byte quota
//! - [`FileStorage`]: one `<key>.json` file per key, written atomically

use std::collections::HashMap;
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Errors raised by guest storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The write would exceed the storage quota.
    #[error("Storage quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: usize, quota: usize },

    /// The cart could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Keys become file names, so path separators are rejected.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// Notification that `key` was written or removed by `writer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub writer: Uuid,
}

/// Key/value storage for guest carts.
pub trait GuestStorage: Send + Sync + fmt::Debug {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend can't be read.
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key` and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if the value can't be stored, including quota
    /// exhaustion.
    fn write(&self, key: &str, value: &str, writer: Uuid) -> Result<(), StorageError>;

    /// Delete `key` and notify subscribers. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend can't be modified.
    fn remove(&self, key: &str, writer: Uuid) -> Result<(), StorageError>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

fn notify(tx: &broadcast::Sender<StorageChange>, key: &str, writer: Uuid) {
    // No receivers is fine
    let _ = tx.send(StorageChange {
        key: key.to_string(),
        writer,
    });
}

// =============================================================================
// MemoryStorage
// =============================================================================

/// In-memory storage, optionally limited to `quota` bytes of values.
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
    changes: broadcast::Sender<StorageChange>,
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("quota", &self.quota)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Unlimited in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: None,
            changes,
        }
    }

    /// In-memory storage holding at most `bytes` bytes of values.
    #[must_use]
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota: Some(bytes),
            ..Self::new()
        }
    }
}

impl GuestStorage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str, writer: Uuid) -> Result<(), StorageError> {
        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(quota) = self.quota {
                let others: usize = entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(_, v)| v.len())
                    .sum();
                let needed = others.saturating_add(value.len());
                if needed > quota {
                    return Err(StorageError::QuotaExceeded { needed, quota });
                }
            }
            entries.insert(key.to_string(), value.to_string());
        }
        notify(&self.changes, key, writer);
        Ok(())
    }

    fn remove(&self, key: &str, writer: Uuid) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        notify(&self.changes, key, writer);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

// =============================================================================
// FileStorage
// =============================================================================

/// Directory-backed storage: `<dir>/<key>.json`.
///
/// Change notifications only reach subscribers of the same instance.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    changes: broadcast::Sender<StorageChange>,
}

impl FileStorage {
    /// Storage rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            dir: dir.into(),
            changes,
        }
    }

    /// Directory the files live in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

/// Write to a temp file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
    std::fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|s| s.to_str()).unwrap_or("cart"),
        Uuid::new_v4().simple()
    ));
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

impl GuestStorage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str, writer: Uuid) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        write_atomic(&path, value.as_bytes())?;
        notify(&self.changes, key, writer);
        Ok(())
    }

    fn remove(&self, key: &str, writer: Uuid) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        notify(&self.changes, key, writer);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip_and_remove() {
        let storage = MemoryStorage::new();
        let writer = Uuid::new_v4();
        assert_eq!(storage.read("guest_cart").unwrap(), None);

        storage.write("guest_cart", "{}", writer).unwrap();
        assert_eq!(storage.read("guest_cart").unwrap().as_deref(), Some("{}"));

        storage.remove("guest_cart", writer).unwrap();
        assert_eq!(storage.read("guest_cart").unwrap(), None);
    }

    #[test]
    fn test_memory_quota() {
        let storage = MemoryStorage::with_quota(8);
        let writer = Uuid::new_v4();
        storage.write("k", "12345678", writer).unwrap();
        // Replacing a key only counts the new value
        storage.write("k", "abcdefgh", writer).unwrap();

        let err = storage.write("k", "123456789", writer).unwrap_err();
        assert!(matches!(
            err,
            StorageError::QuotaExceeded {
                needed: 9,
                quota: 8
            }
        ));
        assert_eq!(storage.read("k").unwrap().as_deref(), Some("abcdefgh"));
    }

    #[test]
    fn test_writes_are_broadcast() {
        let storage = MemoryStorage::new();
        let mut rx = storage.subscribe();
        let writer = Uuid::new_v4();

        storage.write("guest_cart", "{}", writer).unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, "guest_cart");
        assert_eq!(change.writer, writer);
    }

    #[test]
    fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("carts"));
        let writer = Uuid::new_v4();
        let mut rx = storage.subscribe();

        assert_eq!(storage.read("guest_cart").unwrap(), None);
        storage.write("guest_cart", r#"{"items":[]}"#, writer).unwrap();
        assert_eq!(
            storage.read("guest_cart").unwrap().as_deref(),
            Some(r#"{"items":[]}"#)
        );
        assert!(dir.path().join("carts/guest_cart.json").exists());
        assert_eq!(rx.try_recv().unwrap().writer, writer);

        storage.remove("guest_cart", writer).unwrap();
        storage.remove("guest_cart", writer).unwrap();
        assert_eq!(storage.read("guest_cart").unwrap(), None);
    }

    #[test]
    fn test_file_storage_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert!(matches!(
            storage.read("../escape"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.write("a/b", "{}", Uuid::new_v4()),
            Err(StorageError::InvalidKey(_))
        ));
    }
}
