//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!`, so there is no runtime file I/O.
//! Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Persisted cache layout
  pub cache_version: String,
  pub cache_key: String,
  pub index_key: String,

  // Cache budgets
  pub cache_ttl_hours: u64,
  pub max_cache_bytes: usize,
  pub storage_quota_bytes: usize,
  pub append_keep_recent: usize,
  pub minimal_save_cap: usize,

  // Incremental crawl
  pub batch_delay_ms: u64,
  pub max_consecutive_empty_pages: u32,

  // Vimeo API
  pub api_base: String,
  pub api_accept: String,
  pub provider_max_per_page: u32,
  pub video_fields: String,
}

impl Constants {
  pub fn cache_ttl(&self) -> Duration {
    Duration::from_secs(self.cache_ttl_hours * 60 * 60)
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed this is a build-time error.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn embedded_constants_parse() {
    let c = constants();
    assert_eq!(c.cache_ttl(), Duration::from_secs(24 * 3600));
    assert_eq!(c.max_cache_bytes, 5 * 1024 * 1024);
    assert_eq!(c.max_consecutive_empty_pages, 2);
    assert!(c.provider_max_per_page >= 50);
  }
}
