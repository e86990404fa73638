//! Bookmark feed access.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use super::parser::{BookmarkParser, ParseError};
use super::types::RawBookmark;
use crate::fetch::{FetchError, Fetcher, RequestKind};

/// GraphQL feature switches the bookmarks query expects.
const FEATURES: &str = r#"{"graphql_timeline_v2_bookmark_timeline":true,"responsive_web_graphql_exclude_directive_enabled":true,"responsive_web_graphql_timeline_navigation_enabled":true,"tweetypie_unmention_optimization_enabled":true,"longform_notetweets_consumption_enabled":true,"responsive_web_enhance_cards_enabled":false}"#;

/// Opaque pagination token handed back by the feed. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncCursor(String);

impl SyncCursor {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of the feed.
#[derive(Debug, Default, Clone)]
pub struct FeedPage {
    /// Bookmarks in feed order (newest first).
    pub bookmarks: Vec<RawBookmark>,
    /// Cursor for the next older page.
    pub next_cursor: Option<SyncCursor>,
}

/// Feed page could not be obtained.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport failure, already retried by the fetcher.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Response arrived but did not parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Source of bookmark pages.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the page after `cursor`, or the head of the feed when `None`.
    async fn fetch_page(&self, cursor: Option<&SyncCursor>) -> Result<FeedPage, FeedError>;
}

/// HTTP implementation of [`FeedSource`] over the X GraphQL endpoint.
pub struct FeedClient {
    fetcher: Arc<Fetcher>,
    feed_url: String,
    page_size: u32,
}

impl FeedClient {
    /// Create a client for `feed_url`.
    pub fn new(fetcher: Arc<Fetcher>, feed_url: impl Into<String>, page_size: u32) -> Self {
        Self {
            fetcher,
            feed_url: feed_url.into(),
            page_size,
        }
    }

    /// Request URL for the page after `cursor`.
    pub fn page_url(&self, cursor: Option<&SyncCursor>) -> Result<String, FetchError> {
        let mut variables = json!({
            "count": self.page_size,
            "includePromotedContent": false,
        });
        if let Some(cursor) = cursor {
            variables["cursor"] = json!(cursor.as_str());
        }

        let url = Url::parse_with_params(
            &self.feed_url,
            &[
                ("variables", variables.to_string()),
                ("features", FEATURES.to_string()),
            ],
        )
        .map_err(|_| FetchError::Unsupported(self.feed_url.clone()))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl FeedSource for FeedClient {
    async fn fetch_page(&self, cursor: Option<&SyncCursor>) -> Result<FeedPage, FeedError> {
        let url = self.page_url(cursor)?;
        let response = self.fetcher.request(&url, RequestKind::Feed).await?;
        let parsed = BookmarkParser::parse_page(&response.body)?;

        Ok(FeedPage {
            bookmarks: parsed.bookmarks,
            next_cursor: parsed.next_cursor.map(SyncCursor::new),
        })
    }
}
