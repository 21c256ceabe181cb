use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::constants::constants;
use crate::fetch::FetchOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("no configuration directory on this platform")]
  NoConfigDir,
  #[error("failed to write preferences: {0}")]
  Io(#[from] std::io::Error),
  #[error("failed to serialize preferences: {0}")]
  Serialize(#[from] toml::ser::Error),
}

pub fn project_dirs() -> Option<ProjectDirs> {
  ProjectDirs::from("", "", "vidshelf")
}

/// User preferences from `prefs.toml`. Every field is optional.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
  pub access_token: Option<String>,
  pub api_base: Option<String>,
  pub storage_quota_bytes: Option<usize>,
  pub fetch: FetchOptions,
}

impl Config {
  pub fn path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("prefs.toml"))
  }

  pub fn load() -> Self {
    Self::path().map(|path| Self::load_from(&path)).unwrap_or_default()
  }

  /// Missing file gives defaults. A malformed one is logged and ignored.
  pub fn load_from(path: &Path) -> Self {
    let Ok(content) = std::fs::read_to_string(path) else {
      return Self::default();
    };
    match toml::from_str(&content) {
      Ok(config) => config,
      Err(e) => {
        warn!(path = %path.display(), err = %e, "config: ignoring malformed preferences");
        Self::default()
      }
    }
  }

  pub fn save(&self) -> Result<PathBuf, ConfigError> {
    let path = Self::path().ok_or(ConfigError::NoConfigDir)?;
    self.save_to(&path)?;
    Ok(path)
  }

  pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
      std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, toml::to_string(self)?)?;
    Ok(())
  }

  pub fn api_base(&self) -> &str {
    self.api_base.as_deref().unwrap_or(constants().api_base.as_str())
  }

  pub fn storage_quota(&self) -> usize {
    self.storage_quota_bytes.unwrap_or(constants().storage_quota_bytes)
  }

  /// Preferences as shown to the user, with the token masked.
  pub fn redacted(&self) -> Self {
    let mask = |token: &String| {
      let tail: String = token.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
      format!("****{tail}")
    };
    Self { access_token: self.access_token.as_ref().map(mask), ..self.clone() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_from(&dir.path().join("prefs.toml"));
    assert_eq!(config, Config::default());
    assert_eq!(config.fetch.max_pages, 8);
    assert!(!config.fetch.local_fallback);
    assert!(config.fetch.tag_enrichment);
  }

  #[test]
  fn partial_fetch_table_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.toml");
    std::fs::write(&path, "access_token = \"abc\"\n\n[fetch]\nlocal_fallback = true\nbatch_size = 3\n").unwrap();

    let config = Config::load_from(&path);
    assert_eq!(config.access_token.as_deref(), Some("abc"));
    assert!(config.fetch.local_fallback);
    assert_eq!(config.fetch.batch_size, 3);
    assert_eq!(config.fetch.max_pages, 8);
    assert_eq!(config.fetch.videos_per_request, 50);
  }

  #[test]
  fn malformed_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.toml");
    std::fs::write(&path, "[fetch\nmax_pages = ").unwrap();
    assert_eq!(Config::load_from(&path), Config::default());
  }

  #[test]
  fn save_then_load_keeps_preferences() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("prefs.toml");
    let mut config = Config { api_base: Some("http://localhost:9000".into()), ..Config::default() };
    config.fetch.max_pages = 20;
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path);
    assert_eq!(loaded.api_base(), "http://localhost:9000");
    assert_eq!(loaded.fetch.max_pages, 20);
  }

  #[test]
  fn fallbacks_come_from_constants() {
    let config = Config::default();
    assert_eq!(config.api_base(), constants().api_base);
    assert_eq!(config.storage_quota(), constants().storage_quota_bytes);
  }

  #[test]
  fn redacted_keeps_only_token_tail() {
    let config = Config { access_token: Some("secret-token-1234".into()), ..Config::default() };
    assert_eq!(config.redacted().access_token.as_deref(), Some("****1234"));
    assert_eq!(Config::default().redacted().access_token, None);
  }
}
