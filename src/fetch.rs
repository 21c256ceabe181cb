//! Incremental fetch controller.
//!
//! Search runs in stages:
//! 1. Direct remote query with the free-text term.
//! 2. Optional tag query with the same term, merged into stage 1 by id and paginated locally.
//! 3. Nothing found and local fallback disabled: empty page, no crawl.
//! 4. Local fallback: extend the cache with an incremental crawl if it is partial, then
//!    search the cached catalogue.
//!
//! A new search cancels the previous one (last search wins) and waits for it to let go
//! of the busy lock before issuing its own requests. The crawl only observes
//! cancellation between pages.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheInfo, CacheStore};
use crate::constants::constants;
use crate::events::{DomainEvent, EventSink, SearchSource};
use crate::storage::Storage;
use crate::video::{ResultPage, VideoRecord};
use crate::vimeo::{ListRequest, ProviderError, VideoProvider};

#[derive(Debug, Error)]
pub enum FetchError {
  #[error(transparent)]
  Provider(#[from] ProviderError),
  #[error("search superseded by a newer one")]
  Cancelled,
}

impl FetchError {
  pub fn user_message(&self) -> &'static str {
    match self {
      FetchError::Provider(e) => e.user_message(),
      FetchError::Cancelled => "Search cancelled.",
    }
  }

  /// Worth retrying as is. Credential and decode failures need a configuration change first.
  pub fn is_retryable(&self) -> bool {
    match self {
      FetchError::Provider(e) => e.is_retryable(),
      FetchError::Cancelled => true,
    }
  }
}

/// Recognized fetch options. Defaults are conservative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
  /// Search the local cache (crawling it if partial) when the remote search fails or finds nothing.
  pub local_fallback: bool,
  /// Highest page number the incremental crawl will request.
  pub max_pages: u32,
  /// Pages fetched between two cache writes.
  pub batch_size: u32,
  pub videos_per_request: u32,
  pub tag_enrichment: bool,
  /// Start a background crawl whenever tag enrichment runs against a partial cache.
  pub tag_enrichment_triggers_crawl: bool,
  pub batch_delay_ms: u64,
}

impl Default for FetchOptions {
  fn default() -> Self {
    Self {
      local_fallback: false,
      max_pages: 8,
      batch_size: 1,
      videos_per_request: 50,
      tag_enrichment: true,
      tag_enrichment_triggers_crawl: false,
      batch_delay_ms: constants().batch_delay_ms,
    }
  }
}

impl FetchOptions {
  /// Bring page sizes within what the provider will actually return.
  pub fn normalized(mut self) -> Self {
    self.videos_per_request = clamp_per_page(self.videos_per_request);
    self.batch_size = self.batch_size.max(1);
    self
  }
}

/// Requests above the provider ceiling come back truncated to it.
fn clamp_per_page(per_page: u32) -> u32 {
  per_page.clamp(1, constants().provider_max_per_page)
}

/// Summary of one incremental crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlReport {
  pub pages_fetched: u32,
  pub last_page: u32,
  pub cached: usize,
  pub complete: bool,
  pub aborted: bool,
  /// Another crawl was already running.
  pub skipped: bool,
}

/// Stop conditions evaluated after every page.
fn crawl_finished(has_next: bool, accumulated: usize, total: usize, page: u32, per_page: u32) -> bool {
  if !has_next {
    return true;
  }
  if total == 0 {
    return false;
  }
  let last_remote_page = total.div_ceil(per_page.max(1) as usize);
  accumulated >= total || page as usize >= last_remote_page
}

/// Merge `extra` into `primary` by id. `primary` order and records win.
fn merge_unique(primary: Vec<VideoRecord>, extra: Vec<VideoRecord>) -> Vec<VideoRecord> {
  let mut seen: HashSet<String> = HashSet::with_capacity(primary.len() + extra.len());
  primary.into_iter().chain(extra).filter(|v| seen.insert(v.id.clone())).collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn cancellable<T>(
  token: &CancellationToken,
  request: impl Future<Output = Result<T, ProviderError>>,
) -> Result<T, FetchError> {
  tokio::select! {
    _ = token.cancelled() => Err(FetchError::Cancelled),
    result = request => result.map_err(FetchError::from),
  }
}

/// Resets the crawl busy flag when dropped.
struct CrawlGuard<'a>(&'a AtomicBool);

impl<'a> CrawlGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok().map(|_| Self(flag))
  }
}

impl Drop for CrawlGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

struct Shared<P, S> {
  provider: Arc<P>,
  cache: Arc<CacheStore<S>>,
  options: FetchOptions,
  events: Arc<dyn EventSink>,
  crawling: AtomicBool,
}

impl<P: VideoProvider, S: Storage> Shared<P, S> {
  /// Resumable crawl from the page after the cached `last_page`, persisting each batch.
  async fn incremental_load(&self, cancel: &CancellationToken) -> CrawlReport {
    let Some(_guard) = CrawlGuard::acquire(&self.crawling) else {
      debug!("crawl: already running, skipping");
      return CrawlReport { skipped: true, ..CrawlReport::default() };
    };

    let cached = self.cache.load_videos();
    if let Some(entry) = cached.as_ref().filter(|e| e.is_complete) {
      debug!(videos = entry.videos.len(), "crawl: cache already complete");
      let cached = entry.videos.len();
      return CrawlReport { last_page: entry.last_page, cached, complete: true, ..CrawlReport::default() };
    }

    let opts = &self.options;
    let per_page = clamp_per_page(opts.videos_per_request);
    let batch_size = opts.batch_size.max(1);
    let max_empty = constants().max_consecutive_empty_pages;
    let delay = Duration::from_millis(opts.batch_delay_ms);

    let mut seen: HashSet<String> =
      cached.as_ref().map(|e| e.videos.iter().map(|v| v.id.clone()).collect()).unwrap_or_default();
    let mut total = cached.as_ref().map_or(0, |e| e.total_videos);
    let mut last_page = cached.as_ref().map_or(0, |e| e.last_page);
    let mut page = last_page + 1;
    let mut consecutive_empty = 0u32;
    let mut report = CrawlReport::default();

    info!(start_page = page, max_pages = opts.max_pages, per_page, batch_size, "crawl: starting");

    while page <= opts.max_pages && !report.complete && !report.aborted {
      if cancel.is_cancelled() {
        info!(page, "crawl: cancelled");
        break;
      }

      let batch_end = page.saturating_add(batch_size - 1).min(opts.max_pages);
      let mut batch = Vec::new();
      let mut batch_last_ok = None;

      for current in page..=batch_end {
        if cancel.is_cancelled() {
          info!(page = current, "crawl: cancelled mid-batch");
          break;
        }
        match self.provider.list_videos(&ListRequest::page(current, per_page)).await {
          Ok(result) => {
            report.pages_fetched += 1;
            if result.total > 0 {
              total = result.total;
            }
            if result.data.is_empty() {
              consecutive_empty += 1;
            } else {
              consecutive_empty = 0;
            }
            seen.extend(result.data.iter().map(|v| v.id.clone()));
            self.events.emit(DomainEvent::CrawlPageFetched { page: current, items: result.data.len() });
            // A provider may serve fewer items per page than requested.
            let served = if result.per_page > 0 { result.per_page.min(per_page) } else { per_page };
            report.complete = crawl_finished(result.has_next(), seen.len(), total, current, served);
            batch.extend(result.data);
            batch_last_ok = Some(current);
          }
          Err(e) => {
            // Failures share the empty-page counter.
            warn!(page = current, err = %e, "crawl: page request failed");
            consecutive_empty += 1;
            self.events.emit(DomainEvent::CrawlPageFailed { page: current, message: e.to_string() });
          }
        }

        if report.complete {
          break;
        }
        if consecutive_empty >= max_empty {
          warn!(page = current, consecutive_empty, "crawl: too many empty or failed pages, aborting");
          report.aborted = true;
          break;
        }
      }

      if let Some(fetched) = batch_last_ok {
        last_page = fetched;
        self.cache.append_videos(batch, total, last_page, report.complete);
      }

      page = batch_end + 1;
      let more = !report.complete && !report.aborted && !cancel.is_cancelled() && page <= opts.max_pages;
      if more && !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
    }

    let stored = self.cache.load_videos();
    report.last_page = last_page;
    report.cached = stored.as_ref().map_or(0, |e| e.videos.len());
    // A save may have been reduced under the byte ceiling.
    report.complete = stored.as_ref().is_some_and(|e| e.is_complete);
    info!(
      pages = report.pages_fetched,
      last_page,
      cached = report.cached,
      complete = report.complete,
      aborted = report.aborted,
      "crawl: finished"
    );
    self.events.emit(DomainEvent::CrawlFinished {
      last_page,
      cached: report.cached,
      complete: report.complete,
      aborted: report.aborted,
    });
    report
  }
}

pub struct FetchController<P, S> {
  shared: Arc<Shared<P, S>>,
  current_search: Mutex<Option<CancellationToken>>,
  busy: tokio::sync::Mutex<()>,
  background: Mutex<Option<JoinHandle<CrawlReport>>>,
  lifetime: CancellationToken,
}

impl<P, S> FetchController<P, S>
where
  P: VideoProvider + 'static,
  S: Storage + 'static,
{
  pub fn new(provider: Arc<P>, cache: Arc<CacheStore<S>>, options: FetchOptions, events: Arc<dyn EventSink>) -> Self {
    Self {
      shared: Arc::new(Shared {
        provider,
        cache,
        options: options.normalized(),
        events,
        crawling: AtomicBool::new(false),
      }),
      current_search: Mutex::new(None),
      busy: tokio::sync::Mutex::new(()),
      background: Mutex::new(None),
      lifetime: CancellationToken::new(),
    }
  }

  pub fn options(&self) -> &FetchOptions {
    &self.shared.options
  }

  pub fn cache(&self) -> &CacheStore<S> {
    &self.shared.cache
  }

  /// Cancel the in-flight search, if any, and register a token for a new one.
  fn begin_search(&self) -> CancellationToken {
    let token = self.lifetime.child_token();
    if let Some(previous) = lock(&self.current_search).replace(token.clone()) {
      debug!("search: cancelling previous search");
      previous.cancel();
    }
    token
  }

  pub async fn search(&self, query: &str, page: u32, per_page: u32) -> Result<ResultPage, FetchError> {
    let token = self.begin_search();
    let _busy = self.busy.lock().await;
    if token.is_cancelled() {
      return Err(FetchError::Cancelled);
    }

    let query = query.trim();
    let result = self.run_search(query, page.max(1), clamp_per_page(per_page), &token).await;
    match &result {
      Ok((found, source)) => {
        let event = DomainEvent::SearchCompleted { query: query.to_string(), source: *source, total: found.total };
        self.shared.events.emit(event);
      }
      Err(FetchError::Cancelled) => debug!(query = %query, "search: discarded stale search"),
      Err(e) => {
        self.shared.events.emit(DomainEvent::SearchFailed { query: query.to_string(), message: e.to_string() });
      }
    }
    result.map(|(found, _)| found)
  }

  async fn run_search(
    &self,
    query: &str,
    page: u32,
    per_page: u32,
    token: &CancellationToken,
  ) -> Result<(ResultPage, SearchSource), FetchError> {
    match self.remote_search(query, page, per_page, token).await {
      Ok(found) if !found.0.items.is_empty() => return Ok(found),
      Ok(_) if !self.shared.options.local_fallback => {
        debug!(query = %query, "search: no remote results, local fallback disabled");
        return Ok((ResultPage::empty(page, per_page), SearchSource::Empty));
      }
      Ok(_) => info!(query = %query, "search: no remote results, searching local cache"),
      Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
      Err(e) if !self.shared.options.local_fallback => return Err(e),
      Err(e) => warn!(query = %query, err = %e, "search: remote search failed, searching local cache"),
    }
    let found = self.local_search(query, page, per_page, token).await?;
    Ok((found, SearchSource::LocalCache))
  }

  async fn remote_search(
    &self,
    query: &str,
    page: u32,
    per_page: u32,
    token: &CancellationToken,
  ) -> Result<(ResultPage, SearchSource), FetchError> {
    let provider = &self.shared.provider;
    let window = page.saturating_mul(per_page);
    let enrich = self.shared.options.tag_enrichment && !query.is_empty() && window <= constants().provider_max_per_page;

    if !enrich {
      let request = ListRequest::page(page, per_page).with_query(query);
      let direct = cancellable(token, provider.list_videos(&request)).await?;
      let found = ResultPage { total: direct.total, page, per_page, items: direct.data };
      return Ok((found, SearchSource::Remote));
    }

    // Both stages fetch everything up to the requested page so the merge can be paginated locally.
    let direct = cancellable(token, provider.list_videos(&ListRequest::page(1, window).with_query(query))).await?;
    let tagged = match cancellable(token, provider.list_videos(&ListRequest::page(1, window).with_tag(query))).await {
      Ok(tagged) => tagged,
      Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
      Err(e) => {
        warn!(query = %query, err = %e, "search: tag enrichment failed, using direct results");
        let mut found = ResultPage::paginate(&direct.data, page, per_page);
        found.total = direct.total.max(direct.data.len());
        return Ok((found, SearchSource::Remote));
      }
    };

    let (direct_total, tagged_total) = (direct.total, tagged.total);
    let merged = merge_unique(direct.data, tagged.data);
    let mut found = ResultPage::paginate(&merged, page, per_page);
    found.total = direct_total.max(tagged_total).max(merged.len());
    debug!(query = %query, direct_total, tagged_total, merged = merged.len(), "search: merged tag enrichment");

    if self.shared.options.tag_enrichment_triggers_crawl {
      self.spawn_background_crawl();
    }
    Ok((found, SearchSource::Enriched))
  }

  async fn local_search(
    &self,
    query: &str,
    page: u32,
    per_page: u32,
    token: &CancellationToken,
  ) -> Result<ResultPage, FetchError> {
    let cache = &self.shared.cache;
    if !cache.load_videos().is_some_and(|e| e.is_complete) {
      self.shared.incremental_load(token).await;
    }
    if token.is_cancelled() {
      return Err(FetchError::Cancelled);
    }
    let videos = cache.load_videos().map(|e| e.videos).unwrap_or_default();
    let matches = cache.search_in_index(query, &videos);
    debug!(query = %query, cached = videos.len(), matches = matches.len(), "search: local cache search");
    Ok(ResultPage::paginate(&matches, page, per_page))
  }

  /// Plain listing of the account's videos, newest first.
  pub async fn get_user_videos(&self, page: u32, per_page: u32) -> Result<ResultPage, FetchError> {
    let (page, per_page) = (page.max(1), clamp_per_page(per_page));
    match self.shared.provider.list_videos(&ListRequest::page(page, per_page)).await {
      Ok(result) => Ok(ResultPage { total: result.total, page, per_page, items: result.data }),
      Err(e) => {
        if self.shared.options.local_fallback
          && let Some(entry) = self.shared.cache.load_videos().filter(|e| !e.videos.is_empty())
        {
          warn!(err = %e, cached = entry.videos.len(), "videos: listing failed, serving cached videos");
          return Ok(ResultPage::paginate(&entry.videos, page, per_page));
        }
        Err(e.into())
      }
    }
  }

  /// Run one incremental crawl in the foreground.
  pub async fn crawl(&self) -> CrawlReport {
    let token = self.lifetime.child_token();
    self.shared.incremental_load(&token).await
  }

  fn spawn_background_crawl(&self) {
    let mut slot = lock(&self.background);
    if slot.as_ref().is_some_and(|h| !h.is_finished()) || self.shared.crawling.load(Ordering::Acquire) {
      return;
    }
    if self.shared.cache.load_videos().is_some_and(|e| e.is_complete) {
      return;
    }
    debug!("crawl: starting in background");
    let shared = Arc::clone(&self.shared);
    let token = self.lifetime.child_token();
    *slot = Some(tokio::spawn(async move { shared.incremental_load(&token).await }));
  }

  /// Wait for the background crawl, if one was started.
  pub async fn settle(&self) -> Option<CrawlReport> {
    let handle = lock(&self.background).take()?;
    handle.await.ok()
  }

  pub fn get_cache_diagnostics(&self) -> CacheInfo {
    self.shared.cache.get_cache_info()
  }

  pub fn get_available_categories(&self) -> Vec<String> {
    self.shared.cache.get_available_categories()
  }

  pub fn clear_cache(&self) {
    self.shared.cache.clear_cache();
    self.shared.events.emit(DomainEvent::CacheCleared);
  }
}

impl<P, S> Drop for FetchController<P, S> {
  fn drop(&mut self) {
    self.lifetime.cancel();
  }
}
