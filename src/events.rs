//! Domain events emitted by the fetch controller.
//!
//! The controller never talks to an analytics backend directly; it hands typed
//! events to an injected [`EventSink`] which decides what to do with them.

use std::sync::Mutex;

use tracing::{info, warn};

/// Where a search result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSource {
  Remote,
  /// Remote text query merged with the tag query.
  Enriched,
  LocalCache,
  /// Nothing found and local fallback disabled.
  Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
  SearchCompleted { query: String, source: SearchSource, total: usize },
  SearchFailed { query: String, message: String },
  CrawlPageFetched { page: u32, items: usize },
  CrawlPageFailed { page: u32, message: String },
  CrawlFinished { last_page: u32, cached: usize, complete: bool, aborted: bool },
  CacheCleared,
}

pub trait EventSink: Send + Sync {
  fn emit(&self, event: DomainEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
  fn emit(&self, event: DomainEvent) {
    match event {
      DomainEvent::SearchCompleted { query, source, total } => {
        info!(query = %query, source = ?source, total, "event: search completed");
      }
      DomainEvent::SearchFailed { query, message } => warn!(query = %query, err = %message, "event: search failed"),
      DomainEvent::CrawlPageFetched { page, items } => info!(page, items, "event: crawl page fetched"),
      DomainEvent::CrawlPageFailed { page, message } => warn!(page, err = %message, "event: crawl page failed"),
      DomainEvent::CrawlFinished { last_page, cached, complete, aborted } => {
        info!(last_page, cached, complete, aborted, "event: crawl finished");
      }
      DomainEvent::CacheCleared => info!("event: cache cleared"),
    }
  }
}

#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
  fn emit(&self, _event: DomainEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
  events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
  pub fn events(&self) -> Vec<DomainEvent> {
    self.events.lock().map(|e| e.clone()).unwrap_or_default()
  }
}

impl EventSink for RecordingSink {
  fn emit(&self, event: DomainEvent) {
    if let Ok(mut events) = self.events.lock() {
      events.push(event);
    }
  }
}
