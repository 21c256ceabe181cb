//! Derived full-text index over cached videos.
//!
//! Each entry keeps a lower-cased copy of the fields a user can search on and a
//! single `searchable_text` blob. Matching is plain substring containment, either
//! literal or on the alphanumeric-only form of both sides (so `VIN 636`, `vin-636`
//! and `vin636` all hit the same video).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::video::VideoRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexEntry {
  pub id: String,
  pub name: String,
  pub description: String,
  pub tags: Vec<String>,
  pub searchable_text: String,
}

impl SearchIndexEntry {
  pub fn from_video(video: &VideoRecord) -> Self {
    let name = video.name.to_lowercase();
    let description = video.description.to_lowercase();
    let id = video.id.to_lowercase();
    let tags: Vec<String> = video.tags.iter().map(|t| t.to_lowercase()).collect();
    let searchable_text = format!("{} {} {} {}", name, description, id, tags.join(" "));
    Self { id: video.id.clone(), name, description, tags, searchable_text }
  }
}

/// Persisted index snapshot. Shares version and TTL with the cache entry it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndex {
  pub version: String,
  pub timestamp: i64,
  pub entries: Vec<SearchIndexEntry>,
}

impl SearchIndex {
  pub fn build(videos: &[VideoRecord], version: &str, timestamp: i64) -> Self {
    Self { version: version.to_string(), timestamp, entries: videos.iter().map(SearchIndexEntry::from_video).collect() }
  }

  /// Ids of every entry matching `query`.
  pub fn matching_ids(&self, query: &str) -> HashSet<&str> {
    let needle = query.trim().to_lowercase();
    let compact = alphanumeric(&needle);
    self
      .entries
      .iter()
      .filter(|entry| {
        entry.searchable_text.contains(&needle)
          || (!compact.is_empty() && alphanumeric(&entry.searchable_text).contains(&compact))
      })
      .map(|entry| entry.id.as_str())
      .collect()
  }

  /// Subset of `videos` present in the match set, in `videos` order.
  pub fn search(&self, query: &str, videos: &[VideoRecord]) -> Vec<VideoRecord> {
    let ids = self.matching_ids(query);
    videos.iter().filter(|v| ids.contains(v.id.as_str())).cloned().collect()
  }
}

/// Keeps only `[a-z0-9]` of an already lower-cased string.
pub fn alphanumeric(text: &str) -> String {
  text.chars().filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit()).collect()
}

/// Index-less search: case-insensitive substring over name, description, id and tags.
pub fn fallback_search(query: &str, videos: &[VideoRecord]) -> Vec<VideoRecord> {
  let needle = query.trim().to_lowercase();
  videos
    .iter()
    .filter(|v| {
      v.name.to_lowercase().contains(&needle)
        || v.description.to_lowercase().contains(&needle)
        || v.id.to_lowercase().contains(&needle)
        || v.tags.iter().any(|t| t.to_lowercase().contains(&needle))
    })
    .cloned()
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Vec<VideoRecord> {
    vec![
      VideoRecord::new("101", "Prostatectomia robotica").with_tags(["urologia", "VIN636"]),
      VideoRecord::new("102", "Nefrectomia parziale").with_description("Caso clinico VIN 636 ripreso"),
      VideoRecord::new("103", "Cardiochirurgia mininvasiva").with_tags(["cuore"]),
    ]
  }

  #[test]
  fn entry_lowercases_and_joins_fields() {
    let v = VideoRecord::new("AbC", "Title X").with_description("Desc Y").with_tags(["TagOne", "Two"]);
    let entry = SearchIndexEntry::from_video(&v);
    assert_eq!(entry.id, "AbC");
    assert_eq!(entry.tags, vec!["tagone", "two"]);
    assert_eq!(entry.searchable_text, "title x desc y abc tagone two");
  }

  #[test]
  fn alphanumeric_strips_everything_else() {
    assert_eq!(alphanumeric("vin-636 / à b"), "vin636b");
  }

  #[test]
  fn normalized_query_matches_compact_code() {
    let videos = sample();
    let index = SearchIndex::build(&videos, "v", 0);
    let dashed: Vec<_> = index.search("vin-636", &videos).into_iter().map(|v| v.id).collect();
    let compact: Vec<_> = index.search("vin636", &videos).into_iter().map(|v| v.id).collect();
    let spaced: Vec<_> = index.search("VIN 636", &videos).into_iter().map(|v| v.id).collect();
    assert_eq!(dashed, vec!["101", "102"]);
    assert_eq!(dashed, compact);
    assert_eq!(dashed, spaced);
  }

  #[test]
  fn search_preserves_input_order() {
    let videos = sample();
    let index = SearchIndex::build(&videos, "v", 0);
    let mut reversed = videos.clone();
    reversed.reverse();
    let ids: Vec<_> = index.search("ectomia", &reversed).into_iter().map(|v| v.id).collect();
    assert_eq!(ids, vec!["102", "101"]);
  }

  #[test]
  fn search_ignores_videos_missing_from_index() {
    let videos = sample();
    let index = SearchIndex::build(&videos[..1], "v", 0);
    assert_eq!(index.search("ectomia", &videos).len(), 1);
  }

  #[test]
  fn punctuation_only_query_does_not_match_everything() {
    let videos = sample();
    let index = SearchIndex::build(&videos, "v", 0);
    assert!(index.search("--", &videos).is_empty());
  }

  #[test]
  fn empty_query_matches_all() {
    let videos = sample();
    let index = SearchIndex::build(&videos, "v", 0);
    assert_eq!(index.search("", &videos).len(), 3);
    assert_eq!(fallback_search("  ", &videos).len(), 3);
  }

  #[test]
  fn fallback_search_checks_every_field() {
    let videos = sample();
    assert_eq!(fallback_search("CUORE", &videos)[0].id, "103");
    assert_eq!(fallback_search("ripreso", &videos)[0].id, "102");
    assert_eq!(fallback_search("101", &videos)[0].id, "101");
    assert!(fallback_search("vin-636", &videos).is_empty());
  }
}
