//! Video provider boundary: the [`VideoProvider`] trait and its Vimeo implementation.
//!
//! Raw API payloads are deserialized into `Raw*` DTOs where every field is optional,
//! then mapped onto the domain types. Missing or malformed fields become empty
//! defaults instead of errors; records without any usable id are dropped.

use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::constants;
use crate::video::{Paging, Privacy, Thumbnail, VideoPage, VideoRecord};

#[derive(Debug, Error)]
pub enum ProviderError {
  #[error("rate limited by the video provider")]
  RateLimited,
  #[error("video provider rejected the credentials")]
  Unauthorized,
  #[error("video provider returned HTTP {status}: {body}")]
  Http { status: u16, body: String },
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),
  #[error("malformed provider response: {0}")]
  Decode(#[from] serde_json::Error),
}

impl ProviderError {
  /// Text shown to the user for this failure.
  pub fn user_message(&self) -> &'static str {
    match self {
      ProviderError::RateLimited => "Too many requests to Vimeo. Wait a minute and try again.",
      ProviderError::Unauthorized => "Vimeo authentication failed. Check the access token and sign in again.",
      _ => "Could not load videos from Vimeo. Try again later.",
    }
  }

  pub fn is_retryable(&self) -> bool {
    !matches!(self, ProviderError::Unauthorized | ProviderError::Decode(_))
  }

  pub fn from_status(status: StatusCode, body: String) -> Self {
    match status {
      StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
      StatusCode::UNAUTHORIZED => ProviderError::Unauthorized,
      _ => ProviderError::Http { status: status.as_u16(), body },
    }
  }
}

/// Parameters of one "list videos" call. Sorting (date, descending) and the
/// field projection are fixed by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
  pub page: u32,
  pub per_page: u32,
  pub query: Option<String>,
  pub tag: Option<String>,
}

impl ListRequest {
  pub fn page(page: u32, per_page: u32) -> Self {
    Self { page: page.max(1), per_page: per_page.max(1), query: None, tag: None }
  }

  pub fn with_query(mut self, query: impl Into<String>) -> Self {
    self.query = Some(query.into());
    self
  }

  pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
    self.tag = Some(tag.into());
    self
  }
}

pub trait VideoProvider: Send + Sync {
  fn list_videos(&self, request: &ListRequest) -> impl Future<Output = Result<VideoPage, ProviderError>> + Send;
}

// --- Wire DTOs ---

/// Present-but-malformed fields decode as `None` instead of failing the whole payload.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
  D: Deserializer<'de>,
  T: DeserializeOwned,
{
  let value = serde_json::Value::deserialize(deserializer)?;
  Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVideoPage {
  #[serde(deserialize_with = "lenient")]
  total: Option<u64>,
  #[serde(deserialize_with = "lenient")]
  page: Option<u32>,
  #[serde(deserialize_with = "lenient")]
  per_page: Option<u32>,
  #[serde(deserialize_with = "lenient")]
  paging: Option<RawPaging>,
  #[serde(deserialize_with = "lenient")]
  data: Option<Vec<RawVideo>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPaging {
  #[serde(deserialize_with = "lenient")]
  next: Option<String>,
  #[serde(deserialize_with = "lenient")]
  previous: Option<String>,
  #[serde(deserialize_with = "lenient")]
  first: Option<String>,
  #[serde(deserialize_with = "lenient")]
  last: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVideo {
  #[serde(deserialize_with = "lenient")]
  uri: Option<String>,
  #[serde(deserialize_with = "lenient")]
  name: Option<String>,
  #[serde(deserialize_with = "lenient")]
  description: Option<String>,
  #[serde(deserialize_with = "lenient")]
  tags: Option<Vec<RawTag>>,
  #[serde(deserialize_with = "lenient")]
  created_time: Option<String>,
  #[serde(deserialize_with = "lenient")]
  status: Option<String>,
  #[serde(deserialize_with = "lenient")]
  privacy: Option<RawPrivacy>,
  #[serde(deserialize_with = "lenient")]
  pictures: Option<RawPictures>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTag {
  #[serde(deserialize_with = "lenient")]
  name: Option<String>,
  #[serde(deserialize_with = "lenient")]
  tag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPrivacy {
  #[serde(deserialize_with = "lenient")]
  view: Option<String>,
  #[serde(deserialize_with = "lenient")]
  embed: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPictures {
  #[serde(deserialize_with = "lenient")]
  sizes: Option<Vec<RawPictureSize>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPictureSize {
  #[serde(deserialize_with = "lenient")]
  width: Option<u32>,
  #[serde(deserialize_with = "lenient")]
  height: Option<u32>,
  #[serde(deserialize_with = "lenient")]
  link: Option<String>,
}

/// `/videos/12345` → `12345`. Also tolerates `/users/1/videos/12345:abcdef` style uris.
fn id_from_uri(uri: &str) -> Option<String> {
  let last = uri.trim_end_matches('/').rsplit('/').next()?;
  let id = last.split(':').next().unwrap_or(last).trim();
  if id.is_empty() { None } else { Some(id.to_string()) }
}

impl RawVideo {
  fn into_record(self) -> Option<VideoRecord> {
    let id = self.uri.as_deref().and_then(id_from_uri)?;
    let tags = self
      .tags
      .unwrap_or_default()
      .into_iter()
      .filter_map(|t| t.name.or(t.tag))
      .map(|t| t.trim().to_string())
      .filter(|t| !t.is_empty())
      .collect();
    let privacy = self.privacy.map(|p| Privacy { view: p.view, embed: p.embed }).unwrap_or_default();
    let thumbnails = self
      .pictures
      .and_then(|p| p.sizes)
      .unwrap_or_default()
      .into_iter()
      .filter_map(|s| Some(Thumbnail { width: s.width.unwrap_or(0), height: s.height.unwrap_or(0), link: s.link? }))
      .collect();
    Some(VideoRecord {
      id,
      name: self.name.unwrap_or_default(),
      description: self.description.unwrap_or_default(),
      tags,
      created_at: self.created_time,
      status: self.status,
      privacy,
      thumbnails,
    })
  }
}

impl RawVideoPage {
  fn into_page(self, request: &ListRequest) -> VideoPage {
    let raw_data = self.data.unwrap_or_default();
    let raw_count = raw_data.len();
    let data: Vec<VideoRecord> = raw_data.into_iter().filter_map(RawVideo::into_record).collect();
    if data.len() < raw_count {
      warn!(dropped = raw_count - data.len(), "vimeo: dropped records without uri");
    }
    let paging = self
      .paging
      .map(|p| Paging { next: p.next, previous: p.previous, first: p.first, last: p.last })
      .unwrap_or_default();
    VideoPage {
      total: usize::try_from(self.total.unwrap_or(0)).unwrap_or(usize::MAX),
      page: self.page.unwrap_or(request.page),
      per_page: self.per_page.unwrap_or(request.per_page),
      paging,
      data,
    }
  }
}

/// Parse a `/me/videos` response body.
pub fn parse_video_page(body: &str, request: &ListRequest) -> Result<VideoPage, ProviderError> {
  let raw: RawVideoPage = serde_json::from_str(body)?;
  Ok(raw.into_page(request))
}

// --- Client ---

pub struct VimeoClient {
  http: Client,
  api_base: String,
  token: String,
}

impl VimeoClient {
  pub fn new(token: impl Into<String>) -> Self {
    Self::with_base(token, constants().api_base.clone())
  }

  pub fn with_base(token: impl Into<String>, api_base: impl Into<String>) -> Self {
    Self { http: Client::new(), api_base: api_base.into().trim_end_matches('/').to_string(), token: token.into() }
  }

  fn query_params(request: &ListRequest) -> Vec<(&'static str, String)> {
    let c = constants();
    let per_page = request.per_page.clamp(1, c.provider_max_per_page);
    let mut params = vec![
      ("page", request.page.to_string()),
      ("per_page", per_page.to_string()),
      ("fields", c.video_fields.clone()),
      ("sort", "date".to_string()),
      ("direction", "desc".to_string()),
    ];
    if let Some(query) = request.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
      params.push(("query", query.to_string()));
    }
    if let Some(tag) = request.tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
      params.push(("filter_tag", tag.to_string()));
    }
    params
  }
}

impl VideoProvider for VimeoClient {
  async fn list_videos(&self, request: &ListRequest) -> Result<VideoPage, ProviderError> {
    let url = format!("{}/me/videos", self.api_base);
    debug!(
      page = request.page,
      per_page = request.per_page,
      query = ?request.query,
      tag = ?request.tag,
      "vimeo: list videos"
    );

    let response = self
      .http
      .get(&url)
      .bearer_auth(&self.token)
      .header(ACCEPT, &constants().api_accept)
      .query(&Self::query_params(request))
      .send()
      .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
      warn!(status = status.as_u16(), "vimeo: request failed");
      return Err(ProviderError::from_status(status, body));
    }
    parse_video_page(&body, request)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"{
    "total": 121,
    "page": 2,
    "per_page": 50,
    "paging": { "next": "/me/videos?page=3", "previous": "/me/videos?page=1", "first": "/me/videos?page=1", "last": "/me/videos?page=3" },
    "data": [
      {
        "uri": "/videos/76979871",
        "name": "Prostatectomia radicale",
        "description": null,
        "tags": [{ "name": "urologia", "tag": "urologia" }, { "tag": "robotica" }],
        "created_time": "2024-03-01T10:00:00+00:00",
        "status": "available",
        "privacy": { "view": "unlisted", "embed": "whitelist" },
        "pictures": { "sizes": [{ "width": 640, "height": 360, "link": "https://i.vimeocdn.com/a.jpg" }, { "width": 100 }] }
      },
      { "name": "no uri, dropped" },
      { "uri": "/users/42/videos/555:abc123", "tags": "not-a-list" }
    ]
  }"#;

  #[test]
  fn id_from_uri_variants() {
    assert_eq!(id_from_uri("/videos/123").as_deref(), Some("123"));
    assert_eq!(id_from_uri("/users/1/videos/55:hash").as_deref(), Some("55"));
    assert_eq!(id_from_uri("/videos/9/").as_deref(), Some("9"));
    assert_eq!(id_from_uri(""), None);
  }

  #[test]
  fn parse_maps_fields_and_defaults() {
    let page = parse_video_page(SAMPLE, &ListRequest::page(2, 50)).unwrap();
    assert_eq!(page.total, 121);
    assert_eq!(page.page, 2);
    assert!(page.has_next());
    assert_eq!(page.data.len(), 2);

    let first = &page.data[0];
    assert_eq!(first.id, "76979871");
    assert_eq!(first.description, "");
    assert_eq!(first.tags, vec!["urologia", "robotica"]);
    assert_eq!(first.privacy.view.as_deref(), Some("unlisted"));
    assert_eq!(first.thumbnails.len(), 1);

    let second = &page.data[1];
    assert_eq!(second.id, "555");
    assert_eq!(second.name, "");
    assert!(second.tags.is_empty());
  }

  #[test]
  fn parse_empty_object_uses_request_paging() {
    let page = parse_video_page("{}", &ListRequest::page(3, 25)).unwrap();
    assert_eq!(page.total, 0);
    assert_eq!(page.page, 3);
    assert_eq!(page.per_page, 25);
    assert!(!page.has_next());
    assert!(page.data.is_empty());
  }

  #[test]
  fn parse_rejects_non_json() {
    assert!(matches!(parse_video_page("<html>", &ListRequest::page(1, 10)), Err(ProviderError::Decode(_))));
  }

  #[test]
  fn status_mapping() {
    let rate = ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new());
    assert!(matches!(rate, ProviderError::RateLimited));
    assert!(matches!(ProviderError::from_status(StatusCode::UNAUTHORIZED, String::new()), ProviderError::Unauthorized));
    assert!(matches!(
      ProviderError::from_status(StatusCode::BAD_GATEWAY, "oops".into()),
      ProviderError::Http { status: 502, .. }
    ));
  }

  #[test]
  fn user_messages_distinguish_rate_limit_and_auth() {
    let rate = ProviderError::RateLimited.user_message();
    let auth = ProviderError::Unauthorized.user_message();
    let other = ProviderError::Http { status: 500, body: String::new() }.user_message();
    assert_ne!(rate, auth);
    assert_ne!(rate, other);
    assert_ne!(auth, other);
    assert!(ProviderError::RateLimited.is_retryable());
    assert!(!ProviderError::Unauthorized.is_retryable());
  }

  #[test]
  fn query_params_clamp_and_skip_blank_filters() {
    let request = ListRequest::page(1, 500).with_query("  ").with_tag("uro");
    let params = VimeoClient::query_params(&request);
    assert!(params.contains(&("per_page", "100".to_string())));
    assert!(params.contains(&("filter_tag", "uro".to_string())));
    assert!(params.contains(&("direction", "desc".to_string())));
    assert!(!params.iter().any(|(k, _)| *k == "query"));
  }
}
