//! Key-value string persistence with a byte quota.
//!
//! The cache store only needs `get`/`set`/`remove` by key plus a way to tell a
//! quota rejection apart from every other failure.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("storage quota exceeded: {needed} bytes needed, quota is {quota} bytes")]
  QuotaExceeded { needed: usize, quota: usize },
  #[error("storage I/O error: {0}")]
  Io(#[from] io::Error),
}

impl StorageError {
  pub fn is_quota(&self) -> bool {
    matches!(self, StorageError::QuotaExceeded { .. })
  }
}

pub trait Storage: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
  fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
  fn remove(&self, key: &str) -> Result<(), StorageError>;
  /// Bytes currently held across all keys.
  fn used_bytes(&self) -> usize;
}

/// In-process storage. Counts key and value bytes against the quota.
pub struct MemoryStorage {
  quota: usize,
  entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
  pub fn new(quota: usize) -> Self {
    Self { quota, entries: Mutex::new(HashMap::new()) }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
    // A poisoned map is still a consistent map: every mutation is a single insert/remove.
    self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

impl Storage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    Ok(self.lock().get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let mut entries = self.lock();
    let others: usize = entries.iter().filter(|(k, _)| k.as_str() != key).map(|(k, v)| k.len() + v.len()).sum();
    let needed = others + key.len() + value.len();
    if needed > self.quota {
      return Err(StorageError::QuotaExceeded { needed, quota: self.quota });
    }
    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    self.lock().remove(key);
    Ok(())
  }

  fn used_bytes(&self) -> usize {
    self.lock().iter().map(|(k, v)| k.len() + v.len()).sum()
  }
}

/// One file per key under `dir`. Writes land in a temp file first, then rename (atomic).
pub struct FileStorage {
  dir: PathBuf,
  quota: usize,
}

impl FileStorage {
  pub fn open(dir: impl Into<PathBuf>, quota: usize) -> Result<Self, StorageError> {
    let dir = dir.into();
    fs::create_dir_all(&dir)?;
    Ok(Self { dir, quota })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn path_for(&self, key: &str) -> PathBuf {
    let safe: String =
      key.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' }).collect();
    self.dir.join(format!("{safe}.json"))
  }

  fn bytes_excluding(&self, skip: &Path) -> usize {
    let Ok(read_dir) = fs::read_dir(&self.dir) else { return 0 };
    read_dir
      .filter_map(Result::ok)
      .filter(|e| e.path() != skip && e.path().extension().is_some_and(|ext| ext == "json"))
      .filter_map(|e| e.metadata().ok())
      .map(|m| m.len() as usize)
      .sum()
  }
}

impl Storage for FileStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(self.path_for(key)) {
      Ok(content) => Ok(Some(content)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let path = self.path_for(key);
    let needed = self.bytes_excluding(&path) + value.len();
    if needed > self.quota {
      return Err(StorageError::QuotaExceeded { needed, quota: self.quota });
    }
    let tmp_path = path.with_extension("json.part");
    fs::write(&tmp_path, value)?;
    fs::rename(&tmp_path, &path)?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    match fs::remove_file(self.path_for(key)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  fn used_bytes(&self) -> usize {
    self.bytes_excluding(Path::new(""))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn memory_storage_round_trips_values() {
    let storage = MemoryStorage::new(1024);
    storage.set("k", "value").unwrap();
    assert_eq!(storage.get("k").unwrap().as_deref(), Some("value"));
    storage.remove("k").unwrap();
    assert_eq!(storage.get("k").unwrap(), None);
  }

  #[test]
  fn memory_storage_rejects_over_quota() {
    let storage = MemoryStorage::new(10);
    let err = storage.set("key", "longer than ten").unwrap_err();
    assert!(err.is_quota());
    assert_eq!(storage.get("key").unwrap(), None);
  }

  #[test]
  fn memory_storage_overwrite_does_not_double_count() {
    let storage = MemoryStorage::new(12);
    storage.set("k", "12345678").unwrap();
    storage.set("k", "87654321").unwrap();
    assert_eq!(storage.used_bytes(), 9);
  }

  #[test]
  fn file_storage_round_trips_and_removes() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::open(dir.path(), 1024).unwrap();
    storage.set("vidshelf.videos", "{}").unwrap();
    assert_eq!(storage.get("vidshelf.videos").unwrap().as_deref(), Some("{}"));
    assert_eq!(storage.used_bytes(), 2);
    storage.remove("vidshelf.videos").unwrap();
    storage.remove("vidshelf.videos").unwrap();
    assert_eq!(storage.get("vidshelf.videos").unwrap(), None);
  }

  #[test]
  fn file_storage_enforces_quota_across_keys() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::open(dir.path(), 8).unwrap();
    storage.set("a", "12345").unwrap();
    assert!(storage.set("b", "12345").unwrap_err().is_quota());
    // Rewriting the same key only counts the new value.
    storage.set("a", "12345678").unwrap();
  }

  #[test]
  fn file_storage_sanitizes_keys() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::open(dir.path(), 1024).unwrap();
    storage.set("../escape", "x").unwrap();
    assert!(dir.path().join(".._escape.json").exists());
  }
}
