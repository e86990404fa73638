//! Link metadata enrichment for stored bookmarks.

mod enricher;
mod metadata;

pub use enricher::{EnrichOptions, EnrichSummary, Enricher, MAX_LINKS_PER_BOOKMARK, SKIP_DOMAINS};
pub use metadata::{extract_metadata, PageMetadata, MAX_SUMMARY_CHARS};
