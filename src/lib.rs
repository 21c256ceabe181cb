//! Searchable local catalogue of a Vimeo account's videos.
//!
//! [`fetch::FetchController`] drives remote search with tag enrichment and an incremental,
//! resumable crawl into [`cache::CacheStore`], which persists the snapshot and its search index
//! through a quota-bounded [`storage::Storage`] backend.

pub mod cache;
pub mod category;
pub mod config;
pub mod constants;
pub mod events;
pub mod fetch;
pub mod index;
pub mod storage;
pub mod video;
pub mod vimeo;
