//! Persisted, size-bounded video cache with a derived search index.
//!
//! The store owns two keys in the backing [`Storage`]: the [`CacheEntry`] snapshot and
//! the [`SearchIndex`] built from it. Both carry the same version tag and expire under
//! the same TTL. Every write replaces the snapshot wholesale.
//!
//! Saving is best-effort. Oversized snapshots are halved until they fit the byte
//! ceiling; a quota rejection from the backend clears the store and retries with a
//! small fixed cap; if that fails too the error is logged and dropped. Callers never
//! see a storage error.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::category;
use crate::constants::constants;
use crate::index::{self, SearchIndex};
use crate::storage::{Storage, StorageError};
use crate::video::VideoRecord;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache serialization failed: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error(transparent)]
  Storage(#[from] StorageError),
}

/// The persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  pub version: String,
  pub videos: Vec<VideoRecord>,
  /// Creation time in milliseconds since the Unix epoch.
  pub timestamp: i64,
  pub total_videos: usize,
  pub last_page: u32,
  pub is_complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
  pub has_cache: bool,
  pub video_count: usize,
  pub is_complete: bool,
  pub last_page: u32,
  pub age_ms: i64,
}

/// What a save actually persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
  /// Full snapshot written as requested.
  Saved { videos: usize },
  /// Snapshot exceeded the byte ceiling and was halved (possibly repeatedly).
  Reduced { kept: usize, dropped: usize },
  /// Backend quota hit: store cleared and a minimal snapshot written.
  Minimal { kept: usize },
  /// Nothing could be written.
  Failed,
}

/// Budgets applied by the store.
#[derive(Debug, Clone)]
pub struct CacheLimits {
  pub version: String,
  pub cache_key: String,
  pub index_key: String,
  pub ttl: Duration,
  pub max_bytes: usize,
  pub append_keep_recent: usize,
  pub minimal_save_cap: usize,
}

impl Default for CacheLimits {
  fn default() -> Self {
    let c = constants();
    Self {
      version: c.cache_version.clone(),
      cache_key: c.cache_key.clone(),
      index_key: c.index_key.clone(),
      ttl: c.cache_ttl(),
      max_bytes: c.max_cache_bytes,
      append_keep_recent: c.append_keep_recent,
      minimal_save_cap: c.minimal_save_cap,
    }
  }
}

pub struct CacheStore<S> {
  storage: S,
  limits: CacheLimits,
}

fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

impl<S: Storage> CacheStore<S> {
  pub fn new(storage: S) -> Self {
    Self::with_limits(storage, CacheLimits::default())
  }

  pub fn with_limits(storage: S, limits: CacheLimits) -> Self {
    Self { storage, limits }
  }

  pub fn limits(&self) -> &CacheLimits {
    &self.limits
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Bytes currently persisted by the backend.
  pub fn total_bytes(&self) -> usize {
    self.storage.used_bytes()
  }

  fn ttl_ms(&self) -> i64 {
    i64::try_from(self.limits.ttl.as_millis()).unwrap_or(i64::MAX)
  }

  fn entry(&self, videos: Vec<VideoRecord>, total_videos: usize, last_page: u32, is_complete: bool) -> CacheEntry {
    let version = self.limits.version.clone();
    CacheEntry { version, videos, timestamp: now_ms(), total_videos, last_page, is_complete }
  }

  /// Overwrite the stored snapshot. Never fails from the caller's point of view.
  pub fn save_videos(
    &self,
    videos: Vec<VideoRecord>,
    total_remote: usize,
    last_page: u32,
    is_complete: bool,
  ) -> SaveOutcome {
    let requested = videos.len();
    let mut entry = self.entry(videos, total_remote, last_page, is_complete);

    let mut payload = match serde_json::to_string(&entry) {
      Ok(p) => p,
      Err(e) => {
        error!(err = %e, "cache: failed to serialize snapshot");
        return SaveOutcome::Failed;
      }
    };

    let mut reduced = false;
    while payload.len() > self.limits.max_bytes && !entry.videos.is_empty() {
      let keep = entry.videos.len() / 2;
      entry.videos.truncate(keep);
      entry.is_complete = false;
      reduced = true;
      payload = match serde_json::to_string(&entry) {
        Ok(p) => p,
        Err(e) => {
          error!(err = %e, "cache: failed to serialize reduced snapshot");
          return SaveOutcome::Failed;
        }
      };
    }
    if reduced {
      warn!(
        requested,
        kept = entry.videos.len(),
        max_bytes = self.limits.max_bytes,
        "cache: snapshot over byte ceiling, reduced"
      );
    }

    match self.storage.set(&self.limits.cache_key, &payload) {
      Ok(()) => {
        debug!(
          videos = entry.videos.len(),
          bytes = payload.len(),
          complete = entry.is_complete,
          "cache: snapshot saved"
        );
        if entry.is_complete {
          self.rebuild_index(&entry.videos, entry.timestamp);
        } else {
          let _ = self.storage.remove(&self.limits.index_key);
        }
        if reduced {
          SaveOutcome::Reduced { kept: entry.videos.len(), dropped: requested - entry.videos.len() }
        } else {
          SaveOutcome::Saved { videos: requested }
        }
      }
      Err(e) if e.is_quota() => {
        warn!(err = %e, "cache: storage quota exceeded, clearing and retrying with minimal snapshot");
        self.clear_cache();
        self.save_minimal(entry)
      }
      Err(e) => {
        error!(err = %e, "cache: failed to write snapshot");
        SaveOutcome::Failed
      }
    }
  }

  fn save_minimal(&self, mut entry: CacheEntry) -> SaveOutcome {
    entry.videos.truncate(self.limits.minimal_save_cap);
    entry.is_complete = false;
    let result = serde_json::to_string(&entry)
      .map_err(CacheError::from)
      .and_then(|payload| self.storage.set(&self.limits.cache_key, &payload).map_err(CacheError::from));
    match result {
      Ok(()) => {
        info!(kept = entry.videos.len(), "cache: minimal snapshot saved");
        SaveOutcome::Minimal { kept: entry.videos.len() }
      }
      Err(e) => {
        error!(err = %e, "cache: minimal snapshot failed, cache left empty");
        SaveOutcome::Failed
      }
    }
  }

  fn rebuild_index(&self, videos: &[VideoRecord], timestamp: i64) {
    let index = SearchIndex::build(videos, &self.limits.version, timestamp);
    let result = serde_json::to_string(&index)
      .map_err(CacheError::from)
      .and_then(|payload| self.storage.set(&self.limits.index_key, &payload).map_err(CacheError::from));
    match result {
      Ok(()) => info!(entries = index.entries.len(), "cache: search index rebuilt"),
      Err(e) => {
        // Searches fall back to a direct scan while the index is missing.
        warn!(err = %e, "cache: failed to persist search index");
        let _ = self.storage.remove(&self.limits.index_key);
      }
    }
  }

  /// Current snapshot, or `None` when absent, from another version, or older than the TTL.
  /// The last two cases also clear the store.
  pub fn load_videos(&self) -> Option<CacheEntry> {
    self.read_snapshot().unwrap_or_else(|e| {
      warn!(err = %e, "cache: failed to read snapshot");
      None
    })
  }

  /// Like [`Self::load_videos`], but a backend read failure is returned instead of logged.
  fn read_snapshot(&self) -> Result<Option<CacheEntry>, CacheError> {
    let Some(raw) = self.storage.get(&self.limits.cache_key)? else {
      return Ok(None);
    };

    let entry: CacheEntry = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        // Unreadable snapshots are most often an older layout.
        info!(err = %e, "cache: unreadable snapshot, clearing");
        self.clear_cache();
        return Ok(None);
      }
    };

    if entry.version != self.limits.version {
      info!(found = %entry.version, expected = %self.limits.version, "cache: version mismatch, clearing");
      self.clear_cache();
      return Ok(None);
    }

    let age = now_ms() - entry.timestamp;
    if age > self.ttl_ms() {
      info!(age_ms = age, "cache: snapshot expired, clearing");
      self.clear_cache();
      return Ok(None);
    }

    Ok(Some(entry))
  }

  /// Merge `new_videos` into the stored snapshot by id (existing records win) and save.
  pub fn append_videos(
    &self,
    new_videos: Vec<VideoRecord>,
    total_remote: usize,
    last_page: u32,
    is_complete: bool,
  ) -> SaveOutcome {
    match self.merge(&new_videos, is_complete) {
      Ok((merged, is_complete)) => self.save_videos(merged, total_remote, last_page, is_complete),
      Err(e) => {
        warn!(err = %e, "cache: merge failed, saving the new batch alone");
        self.save_videos(new_videos, total_remote, last_page, false)
      }
    }
  }

  fn merge(&self, new_videos: &[VideoRecord], is_complete: bool) -> Result<(Vec<VideoRecord>, bool), CacheError> {
    let mut merged = self.read_snapshot()?.map(|e| e.videos).unwrap_or_default();
    let mut seen: HashSet<String> = merged.iter().map(|v| v.id.clone()).collect();
    for video in new_videos {
      if seen.insert(video.id.clone()) {
        merged.push(video.clone());
      }
    }

    let projected = serde_json::to_string(&merged)?.len().saturating_mul(2);
    if projected > self.limits.max_bytes && merged.len() > self.limits.append_keep_recent {
      let drop = merged.len() - self.limits.append_keep_recent;
      warn!(
        total = merged.len(),
        keep = self.limits.append_keep_recent,
        "cache: merged snapshot too large, keeping most recent"
      );
      merged.drain(..drop);
      return Ok((merged, false));
    }
    if projected > self.limits.max_bytes {
      return Ok((merged, false));
    }
    Ok((merged, is_complete))
  }

  /// Videos matching `query`, in `videos` order. Uses the persisted index when it is
  /// current, otherwise a direct scan.
  pub fn search_in_index(&self, query: &str, videos: &[VideoRecord]) -> Vec<VideoRecord> {
    match self.load_index() {
      Some(index) => index.search(query, videos),
      None => {
        debug!("cache: no current index, scanning videos directly");
        index::fallback_search(query, videos)
      }
    }
  }

  fn load_index(&self) -> Option<SearchIndex> {
    let raw = self.storage.get(&self.limits.index_key).ok().flatten()?;
    let index: SearchIndex = serde_json::from_str(&raw).ok()?;
    if index.version != self.limits.version || now_ms() - index.timestamp > self.ttl_ms() {
      let _ = self.storage.remove(&self.limits.index_key);
      return None;
    }
    Some(index)
  }

  pub fn get_video_categories(&self, video: &VideoRecord) -> Vec<String> {
    category::video_categories(video)
  }

  pub fn get_available_categories(&self) -> Vec<String> {
    self.load_videos().map(|e| category::available_categories(&e.videos)).unwrap_or_default()
  }

  pub fn get_cache_info(&self) -> CacheInfo {
    match self.load_videos() {
      Some(entry) => CacheInfo {
        has_cache: true,
        video_count: entry.videos.len(),
        is_complete: entry.is_complete,
        last_page: entry.last_page,
        age_ms: (now_ms() - entry.timestamp).max(0),
      },
      None => CacheInfo { has_cache: false, video_count: 0, is_complete: false, last_page: 0, age_ms: 0 },
    }
  }

  /// Remove the snapshot and the index. Never fails.
  pub fn clear_cache(&self) {
    for key in [&self.limits.cache_key, &self.limits.index_key] {
      if let Err(e) = self.storage.remove(key) {
        warn!(key = %key, err = %e, "cache: failed to remove key");
      }
    }
  }

  pub fn invalidate_cache(&self) {
    info!("cache: invalidated");
    self.clear_cache();
  }
}
