//! Sync engine for Twitter/X bookmarks.
//!
//! This crate provides:
//! - Session storage for cookies imported from a logged-in browser
//! - A rate-limited, retrying fetcher shared by the feed and enrichment
//! - Cursor pagination over the bookmarks feed
//! - Reconciliation into a local SQLite store without duplicates
//! - Optional link metadata enrichment with bounded concurrency
//! - JSON / CSV / Markdown export

pub mod auth;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod export;
pub mod fetch;
pub mod output;
pub mod pipeline;
pub mod storage;
pub mod sync;
pub mod twitter;

// Re-export main types
pub use auth::{Credential, SessionStore};
pub use config::Config;
pub use enrichment::{EnrichOptions, EnrichSummary, Enricher};
pub use error::{AuthErrorKind, Error, NetworkErrorKind, Result};
pub use export::ExportFormat;
pub use pipeline::Engine;
pub use storage::{BookmarkRecord, BookmarkStore, QueryFilter, SortOrder};
pub use sync::{Reconciler, StopReason, SyncMode, SyncReport, SyncSummary};
pub use twitter::{Author, FeedPage, FeedSource, Paginator, RawBookmark, SyncCursor};
