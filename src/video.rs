use serde::{Deserialize, Serialize};

/// One hosted video as reported by the provider. Never mutated locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub privacy: Privacy,
  #[serde(default)]
  pub thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privacy {
  #[serde(default)]
  pub view: Option<String>,
  #[serde(default)]
  pub embed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
  pub width: u32,
  pub height: u32,
  pub link: String,
}

impl VideoRecord {
  /// Minimal record with just an id and a name; the remaining fields take their empty defaults.
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      description: String::new(),
      tags: Vec::new(),
      created_at: None,
      status: None,
      privacy: Privacy::default(),
      thumbnails: Vec::new(),
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }

  pub fn with_tags<I, T>(mut self, tags: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<String>,
  {
    self.tags = tags.into_iter().map(Into::into).collect();
    self
  }
}

/// Navigation links of a provider page. Only presence matters to the crawler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paging {
  pub next: Option<String>,
  pub previous: Option<String>,
  pub first: Option<String>,
  pub last: Option<String>,
}

/// One page of the provider's video listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoPage {
  pub total: usize,
  pub page: u32,
  pub per_page: u32,
  pub paging: Paging,
  pub data: Vec<VideoRecord>,
}

impl VideoPage {
  pub fn has_next(&self) -> bool {
    self.paging.next.is_some()
  }
}

/// Result page handed to UI callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPage {
  pub total: usize,
  pub page: u32,
  pub per_page: u32,
  pub items: Vec<VideoRecord>,
}

impl ResultPage {
  pub fn empty(page: u32, per_page: u32) -> Self {
    Self { total: 0, page, per_page, items: Vec::new() }
  }

  /// Slice `videos` to the requested 1-indexed page. `total` is the full list length.
  pub fn paginate(videos: &[VideoRecord], page: u32, per_page: u32) -> Self {
    let page = page.max(1);
    let per_page = per_page.max(1);
    let start = (page as usize - 1).saturating_mul(per_page as usize);
    let items = videos.iter().skip(start).take(per_page as usize).cloned().collect();
    Self { total: videos.len(), page, per_page, items }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn videos(n: usize) -> Vec<VideoRecord> {
    (0..n).map(|i| VideoRecord::new(format!("{i}"), format!("Video {i}"))).collect()
  }

  #[test]
  fn paginate_middle_page() {
    let page = ResultPage::paginate(&videos(25), 2, 10);
    assert_eq!(page.total, 25);
    assert_eq!(page.items.len(), 10);
    assert_eq!(page.items[0].id, "10");
  }

  #[test]
  fn paginate_last_partial_page() {
    let page = ResultPage::paginate(&videos(25), 3, 10);
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.items[4].id, "24");
  }

  #[test]
  fn paginate_past_end_is_empty() {
    let page = ResultPage::paginate(&videos(5), 4, 10);
    assert!(page.items.is_empty());
    assert_eq!(page.total, 5);
  }

  #[test]
  fn paginate_clamps_zero_page() {
    let page = ResultPage::paginate(&videos(3), 0, 0);
    assert_eq!(page.page, 1);
    assert_eq!(page.per_page, 1);
    assert_eq!(page.items[0].id, "0");
  }

  #[test]
  fn record_without_optional_fields_deserializes() {
    let v: VideoRecord = serde_json::from_str(r#"{"id":"7","name":"Intro"}"#).unwrap();
    assert_eq!(v, VideoRecord::new("7", "Intro"));
  }
}
