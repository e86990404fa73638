//! Twitter/X bookmark feed module.
//!
//! Provides timeline parsing, the feed client and cursor pagination.

mod feed;
mod paginator;
mod parser;
mod types;

pub use feed::{FeedClient, FeedError, FeedPage, FeedSource, SyncCursor};
pub use paginator::{PageEnd, Paginator, DEFAULT_PARSE_ATTEMPTS};
pub use parser::{BookmarkParser, ParseError, ParsedPage};
pub use types::{Author, Media, MediaKind, RawBookmark};

#[cfg(test)]
pub(crate) use parser::fixtures;
