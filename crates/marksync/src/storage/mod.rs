//! Local bookmark storage.
//!
//! Bookmarks live in a single SQLite table keyed by tweet ID.

mod model;
mod repository;

pub use model::{
    parse_since, AuthorCount, BookmarkRecord, Enrichment, EnrichmentCandidate, EnrichmentResult,
    EnrichmentStatus, ProcessedUpdate, QueryFilter, SortOrder, Stats,
};
pub use repository::BookmarkStore;
