//! Cursor-driven walk over the bookmark feed.

use std::collections::HashSet;
use std::time::Duration;

use super::feed::{FeedError, FeedPage, FeedSource, SyncCursor};
use crate::error::{Error, NetworkErrorKind, Result};

/// Attempts at fetching a page that keeps failing to parse.
pub const DEFAULT_PARSE_ATTEMPTS: u32 = 3;

const PARSE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Why the walk ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEnd {
    /// Empty page, no cursor, or a cursor already visited.
    Exhausted,
    /// Page cap reached.
    PageLimit,
}

/// Forward-only, non-restartable sequence of feed pages.
///
/// Starts at the head of the feed and follows bottom cursors toward older
/// bookmarks. The cursor is threaded through explicitly and never stored.
pub struct Paginator<'a> {
    source: &'a dyn FeedSource,
    cursor: Option<SyncCursor>,
    visited: HashSet<SyncCursor>,
    page_limit: Option<u32>,
    pages_fetched: u32,
    end: Option<PageEnd>,
}

impl<'a> Paginator<'a> {
    /// Walk at most `page_limit` pages; `None` walks to exhaustion.
    pub fn new(source: &'a dyn FeedSource, page_limit: Option<u32>) -> Self {
        Self {
            source,
            cursor: None,
            visited: HashSet::new(),
            page_limit,
            pages_fetched: 0,
            end: None,
        }
    }

    /// Pages successfully fetched so far.
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// How the walk ended, once it has.
    pub fn end(&self) -> Option<PageEnd> {
        self.end
    }

    /// Fetch the next non-empty page.
    ///
    /// Returns `Ok(None)` when the walk is over; see [`Paginator::end`].
    /// Errors carry the 1-based page number that failed.
    pub async fn next_page(&mut self) -> Result<Option<FeedPage>> {
        if self.end.is_some() {
            return Ok(None);
        }
        if self
            .page_limit
            .is_some_and(|limit| self.pages_fetched >= limit)
        {
            tracing::info!(pages = self.pages_fetched, "Reached page limit");
            self.end = Some(PageEnd::PageLimit);
            return Ok(None);
        }

        let page_number = self.pages_fetched + 1;
        let page = self.fetch_with_parse_retry(page_number).await?;
        self.pages_fetched = page_number;

        if page.bookmarks.is_empty() {
            tracing::info!(page = page_number, "Feed exhausted");
            self.end = Some(PageEnd::Exhausted);
            return Ok(None);
        }

        match &page.next_cursor {
            Some(next) if self.visited.insert(next.clone()) => {
                self.cursor = Some(next.clone());
            }
            Some(_) => {
                tracing::warn!(page = page_number, "Feed returned a repeated cursor");
                self.end = Some(PageEnd::Exhausted);
            }
            None => {
                self.end = Some(PageEnd::Exhausted);
            }
        }

        tracing::debug!(
            page = page_number,
            count = page.bookmarks.len(),
            "Fetched feed page"
        );
        Ok(Some(page))
    }

    async fn fetch_with_parse_retry(&self, page_number: u32) -> Result<FeedPage> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.source.fetch_page(self.cursor.as_ref()).await {
                Ok(page) => return Ok(page),
                Err(FeedError::Parse(e)) if attempt < DEFAULT_PARSE_ATTEMPTS => {
                    tracing::warn!(
                        page = page_number,
                        attempt,
                        error = %e,
                        "Unparseable feed page, retrying"
                    );
                    tokio::time::sleep(PARSE_RETRY_DELAY).await;
                }
                Err(FeedError::Parse(e)) => {
                    return Err(Error::network(
                        NetworkErrorKind::Permanent,
                        format!("feed page {page_number} unparseable after {attempt} attempts: {e}"),
                    )
                    .on_page(page_number));
                }
                Err(FeedError::Fetch(e)) => return Err(Error::from(e).on_page(page_number)),
            }
        }
    }
}
