//! Runtime configuration for the sync engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default directory holding the database and session file.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default X GraphQL bookmarks endpoint.
pub const DEFAULT_FEED_URL: &str = "https://x.com/i/api/graphql/QUjXply7fA7fk05FRyajEg/Bookmarks";

/// Default bookmarks requested per feed page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Default page cap for incremental syncs.
pub const DEFAULT_MAX_PAGES: u32 = 10;

/// Default number of concurrent enrichment fetches.
pub const DEFAULT_ENRICH_CONCURRENCY: usize = 4;

/// Default minimum spacing between feed requests (ms).
pub const DEFAULT_FEED_INTERVAL_MS: u64 = 1000;

/// Default minimum spacing between enrichment requests (ms).
pub const DEFAULT_ENRICH_INTERVAL_MS: u64 = 100;

/// Default per-request timeout (seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Credentials older than this trigger a staleness warning.
pub const DEFAULT_STALE_AFTER_DAYS: i64 = 30;

const DATABASE_FILE: &str = "bookmarks.db";
const SESSION_FILE: &str = "session.json";

/// Configuration for a single CLI invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the database and (by default) the session file.
    pub data_dir: PathBuf,
    /// Explicit session file location, overriding `<data_dir>/session.json`.
    pub session_path: Option<PathBuf>,
    /// Feed endpoint.
    pub feed_url: String,
    /// Optional bearer token sent with feed requests.
    pub bearer_token: Option<String>,
    /// Bookmarks requested per feed page.
    pub page_size: u32,
    /// Page cap for incremental syncs.
    pub max_pages: u32,
    /// Concurrent enrichment fetches.
    pub enrich_concurrency: usize,
    /// Minimum spacing between feed requests.
    pub feed_interval: Duration,
    /// Minimum spacing between enrichment requests.
    pub enrich_interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Age after which a credential is reported as possibly stale.
    pub stale_after_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            session_path: None,
            feed_url: DEFAULT_FEED_URL.to_string(),
            bearer_token: None,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            enrich_concurrency: DEFAULT_ENRICH_CONCURRENCY,
            feed_interval: Duration::from_millis(DEFAULT_FEED_INTERVAL_MS),
            enrich_interval: Duration::from_millis(DEFAULT_ENRICH_INTERVAL_MS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            stale_after_days: DEFAULT_STALE_AFTER_DAYS,
        }
    }
}

impl Config {
    /// Create configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `MARKSYNC_DATA_DIR`: data directory (default: ./data)
    /// - `MARKSYNC_SESSION_PATH`: session file (default: <data_dir>/session.json)
    /// - `MARKSYNC_FEED_URL`: bookmarks endpoint
    /// - `MARKSYNC_BEARER_TOKEN`: bearer token for feed requests
    /// - `MARKSYNC_PAGE_SIZE`: bookmarks per page (default: 20)
    /// - `MARKSYNC_MAX_PAGES`: incremental page cap (default: 10)
    /// - `MARKSYNC_ENRICH_CONCURRENCY`: concurrent enrichment fetches (default: 4)
    /// - `MARKSYNC_FEED_INTERVAL_MS`: feed request spacing (default: 1000)
    /// - `MARKSYNC_ENRICH_INTERVAL_MS`: enrichment request spacing (default: 100)
    /// - `MARKSYNC_TIMEOUT_SECS`: request timeout (default: 10)
    ///
    /// Unparseable numeric values fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = std::env::var("MARKSYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let session_path = std::env::var("MARKSYNC_SESSION_PATH")
            .ok()
            .map(PathBuf::from);

        let feed_url = std::env::var("MARKSYNC_FEED_URL").unwrap_or(defaults.feed_url);

        let bearer_token = std::env::var("MARKSYNC_BEARER_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let page_size = env_parse("MARKSYNC_PAGE_SIZE").unwrap_or(DEFAULT_PAGE_SIZE);
        let max_pages = env_parse("MARKSYNC_MAX_PAGES").unwrap_or(DEFAULT_MAX_PAGES);
        let enrich_concurrency = env_parse("MARKSYNC_ENRICH_CONCURRENCY")
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_ENRICH_CONCURRENCY);

        let feed_interval = Duration::from_millis(
            env_parse("MARKSYNC_FEED_INTERVAL_MS").unwrap_or(DEFAULT_FEED_INTERVAL_MS),
        );
        let enrich_interval = Duration::from_millis(
            env_parse("MARKSYNC_ENRICH_INTERVAL_MS").unwrap_or(DEFAULT_ENRICH_INTERVAL_MS),
        );
        let request_timeout = Duration::from_secs(
            env_parse("MARKSYNC_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        Self {
            data_dir,
            session_path,
            feed_url,
            bearer_token,
            page_size,
            max_pages,
            enrich_concurrency,
            feed_interval,
            enrich_interval,
            request_timeout,
            stale_after_days: DEFAULT_STALE_AFTER_DAYS,
        }
    }

    /// Override the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Path to the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// Path to the session file.
    pub fn session_path(&self) -> PathBuf {
        self.session_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(SESSION_FILE))
    }

    /// Data directory as a path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
