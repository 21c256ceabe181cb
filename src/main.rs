use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use vidshelf::cache::{CacheInfo, CacheStore};
use vidshelf::config::{Config, project_dirs};
use vidshelf::events::{EventSink, NullSink, TracingSink};
use vidshelf::fetch::{FetchController, FetchError};
use vidshelf::storage::FileStorage;
use vidshelf::video::ResultPage;
use vidshelf::vimeo::VimeoClient;

type Controller = FetchController<VimeoClient, FileStorage>;

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Cli {
  /// Vimeo personal access token
  #[arg(long, env = "VIMEO_ACCESS_TOKEN", global = true, hide_env_values = true)]
  token: Option<String>,

  /// Search the local cache when the remote search fails or finds nothing
  #[arg(long, global = true)]
  local_fallback: bool,

  /// Highest page number an incremental crawl may request
  #[arg(long, global = true)]
  max_pages: Option<u32>,

  /// Pages fetched between two cache writes
  #[arg(long, global = true)]
  batch_size: Option<u32>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Args, Debug, Clone, Copy)]
struct PageArgs {
  #[arg(long, default_value_t = 1)]
  page: u32,

  #[arg(long, default_value_t = 25)]
  per_page: u32,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Search the account's videos
  Search {
    query: String,
    #[command(flatten)]
    paging: PageArgs,
  },
  /// List the account's videos, newest first
  Videos {
    #[command(flatten)]
    paging: PageArgs,
  },
  /// Run one incremental crawl into the local cache
  Crawl,
  /// Inspect or clear the local cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
  /// List the categories found in the cached catalogue
  Categories,
  /// Show or save preferences
  Config {
    #[command(subcommand)]
    action: ConfigAction,
  },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum CacheAction {
  Info,
  Clear,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum ConfigAction {
  /// Print the effective preferences (token masked)
  Show,
  /// Write the effective fetch preferences to prefs.toml
  Save,
}

impl Cli {
  /// File preferences with command-line overrides applied.
  fn effective_config(&self, mut config: Config) -> Config {
    if let Some(token) = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
      config.access_token = Some(token.to_string());
    }
    if self.local_fallback {
      config.fetch.local_fallback = true;
    }
    if let Some(max_pages) = self.max_pages {
      config.fetch.max_pages = max_pages;
    }
    if let Some(batch_size) = self.batch_size {
      config.fetch.batch_size = batch_size;
    }
    config
  }
}

// --- Output ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheReport {
  #[serde(flatten)]
  info: CacheInfo,
  total_bytes: usize,
  location: String,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
  Ok(())
}

/// Print the result page, or the user message and an empty page on failure.
fn print_results(result: Result<ResultPage, FetchError>, page: u32, per_page: u32) -> Result<()> {
  match result {
    Ok(found) => print_json(&found),
    Err(e) => {
      warn!(err = %e, retryable = e.is_retryable(), "search: request failed");
      eprintln!("{}", e.user_message());
      if !e.is_retryable() {
        eprintln!("Check the token and API base with `vidshelf config show`.");
      }
      print_json(&ResultPage::empty(page, per_page))
    }
  }
}

// --- Setup ---

fn init_logging() -> Option<WorkerGuard> {
  let dirs = project_dirs()?;
  let appender = tracing_appender::rolling::daily(dirs.data_local_dir().join("logs"), "vidshelf.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).with_ansi(false).init();
  Some(guard)
}

fn build_controller(config: &Config, token: String, events: Arc<dyn EventSink>) -> Result<Controller> {
  let dirs = project_dirs().context("No cache directory available on this platform")?;
  let storage =
    FileStorage::open(dirs.cache_dir(), config.storage_quota()).context("Failed to open the cache directory")?;
  let client = VimeoClient::with_base(token, config.api_base());
  Ok(FetchController::new(
    Arc::new(client),
    Arc::new(CacheStore::new(storage)),
    config.fetch.clone(),
    events,
  ))
}

fn require_token(config: &Config) -> Result<String> {
  config
    .access_token
    .clone()
    .filter(|t| !t.trim().is_empty())
    .context("Missing Vimeo access token: pass --token, set VIMEO_ACCESS_TOKEN, or add access_token to prefs.toml")
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let _guard = init_logging();
  run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
  let file_config = Config::load();
  let config = cli.effective_config(file_config.clone());
  info!(command = ?cli.command, "vidshelf: starting");

  match cli.command {
    Command::Search { ref query, paging } => {
      let controller = build_controller(&config, require_token(&config)?, Arc::new(TracingSink))?;
      let result = controller.search(query, paging.page, paging.per_page).await;
      print_results(result, paging.page, paging.per_page)?;
      if let Some(report) = controller.settle().await {
        info!(cached = report.cached, complete = report.complete, "crawl: background crawl settled");
      }
    }
    Command::Videos { paging } => {
      let controller = build_controller(&config, require_token(&config)?, Arc::new(TracingSink))?;
      let result = controller.get_user_videos(paging.page, paging.per_page).await;
      print_results(result, paging.page, paging.per_page)?;
    }
    Command::Crawl => {
      let controller = build_controller(&config, require_token(&config)?, Arc::new(TracingSink))?;
      let report = controller.crawl().await;
      if report.skipped {
        println!("Another crawl is already running.");
      } else {
        println!(
          "Fetched {} page(s), up to page {}. {} video(s) cached, {}.",
          report.pages_fetched,
          report.last_page,
          report.cached,
          if report.complete { "catalogue complete" } else { "catalogue partial" }
        );
        if report.aborted {
          println!("Stopped early after repeated empty or failed pages.");
        }
      }
    }
    Command::Cache { action } => {
      // Only clearing emits events.
      let events: Arc<dyn EventSink> = match action {
        CacheAction::Info => Arc::new(NullSink),
        CacheAction::Clear => Arc::new(TracingSink),
      };
      let controller = build_controller(&config, String::new(), events)?;
      match action {
        CacheAction::Info => {
          let cache = controller.cache();
          let report = CacheReport {
            info: controller.get_cache_diagnostics(),
            total_bytes: cache.total_bytes(),
            location: cache.storage().dir().display().to_string(),
          };
          print_json(&report)?;
        }
        CacheAction::Clear => {
          controller.clear_cache();
          println!("Cache cleared.");
        }
      }
    }
    Command::Categories => {
      let controller = build_controller(&config, String::new(), Arc::new(NullSink))?;
      for category in controller.get_available_categories() {
        println!("{category}");
      }
    }
    Command::Config { action } => match action {
      ConfigAction::Show => {
        if let Some(path) = Config::path() {
          println!("# {}", path.display());
        }
        print!("{}", toml::to_string(&config.redacted()).context("Failed to serialize preferences")?);
      }
      ConfigAction::Save => {
        // Tokens given on the command line or through the environment stay out of the file.
        let saved = Config { access_token: file_config.access_token, ..config };
        let path = saved.save().context("Failed to save preferences")?;
        println!("Saved preferences to {}", path.display());
      }
    },
  }
  Ok(())
}
