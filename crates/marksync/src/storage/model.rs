//! Stored bookmark types and query parameters.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::twitter::RawBookmark;

/// A bookmark as held in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    /// Tweet ID, unique in the store.
    pub id: String,
    pub author_id: String,
    pub author_username: String,
    pub author_name: String,
    pub text: String,
    /// When the tweet was posted.
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    /// When this store first saw the bookmark.
    pub first_seen_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    /// Last enrichment attempt, if any.
    pub enrichment: Option<Enrichment>,
    /// Tweet JSON as received from the feed.
    #[serde(skip)]
    pub raw_json: Option<String>,
}

impl BookmarkRecord {
    /// Build an unprocessed record from a feed item.
    pub fn from_raw(raw: &RawBookmark, first_seen_at: DateTime<Utc>) -> Self {
        Self {
            id: raw.id.clone(),
            author_id: raw.author.id.clone(),
            author_username: raw.author.username.clone(),
            author_name: raw.author.name.clone(),
            text: raw.text.clone(),
            created_at: raw.created_at,
            media_urls: raw.media_urls(),
            urls: raw.urls.clone(),
            first_seen_at,
            processed: false,
            processed_at: None,
            enrichment: None,
            raw_json: (!raw.raw.is_null()).then(|| raw.raw.to_string()),
        }
    }

    /// Link back to the tweet.
    pub fn tweet_url(&self) -> String {
        format!("https://x.com/{}/status/{}", self.author_username, self.id)
    }
}

/// Outcome of fetching one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Ok,
    FetchError,
    Unsupported,
    Timeout,
}

impl EnrichmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::FetchError => "fetch_error",
            Self::Unsupported => "unsupported",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata fetched for one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub url: String,
    pub status: EnrichmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Failure detail for non-ok outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnrichmentResult {
    /// A non-ok outcome with a reason.
    pub fn failed(url: impl Into<String>, status: EnrichmentStatus, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            title: None,
            description: None,
            canonical_url: None,
            summary: None,
            error: Some(error.into()),
        }
    }
}

/// Enrichment sub-record attached to a bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    /// `ok` if any link succeeded, otherwise the first link's status.
    pub status: EnrichmentStatus,
    pub fetched_at: DateTime<Utc>,
    pub links: Vec<EnrichmentResult>,
}

impl Enrichment {
    /// Summarize per-link outcomes.
    pub fn from_links(links: Vec<EnrichmentResult>, fetched_at: DateTime<Utc>) -> Self {
        let status = if links.iter().any(|l| l.status == EnrichmentStatus::Ok) {
            EnrichmentStatus::Ok
        } else {
            links
                .first()
                .map_or(EnrichmentStatus::Unsupported, |l| l.status)
        };
        Self {
            status,
            fetched_at,
            links,
        }
    }

    /// First successful link, if any.
    pub fn primary(&self) -> Option<&EnrichmentResult> {
        self.links
            .iter()
            .find(|l| l.status == EnrichmentStatus::Ok)
    }
}

/// Sort order for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Most recently seen first.
    #[default]
    NewestFirst,
    OldestFirst,
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "newest" | "desc" => Ok(Self::NewestFirst),
            "oldest" | "asc" => Ok(Self::OldestFirst),
            other => Err(Error::InvalidInput(format!(
                "unknown order '{other}' (expected newest or oldest)"
            ))),
        }
    }
}

/// Filter for listing bookmarks.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Only processed (`true`) or unprocessed (`false`) bookmarks.
    pub processed: Option<bool>,
    /// Case-insensitive substring over username, display name and text.
    pub text: Option<String>,
    /// Exact username, case-insensitive, leading `@` ignored.
    pub author: Option<String>,
    /// Only bookmarks first seen at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub order: SortOrder,
}

impl QueryFilter {
    /// Reject filters that cannot match meaningfully.
    pub fn validate(&self) -> Result<()> {
        if self.limit == Some(0) {
            return Err(Error::InvalidInput("limit must be at least 1".into()));
        }
        if self.text.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(Error::InvalidInput("search query must not be empty".into()));
        }
        if self
            .author
            .as_deref()
            .is_some_and(|a| a.trim().trim_start_matches('@').is_empty())
        {
            return Err(Error::InvalidInput("author must not be empty".into()));
        }
        Ok(())
    }
}

/// Parse a `--since` argument: RFC 3339 or `YYYY-MM-DD` (midnight UTC).
pub fn parse_since(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "invalid date '{input}' (expected YYYY-MM-DD or RFC 3339)"
            ))
        })
}

/// Per-id outcome of a processed-flag update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedUpdate {
    pub id: String,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Candidate for enrichment: an identifier and its URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentCandidate {
    pub id: String,
    pub urls: Vec<String>,
}

/// Bookmark count for one author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorCount {
    pub username: String,
    pub count: i64,
}

/// Store statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: i64,
    pub processed: i64,
    pub unprocessed: i64,
    pub enriched: i64,
    pub oldest_first_seen: Option<DateTime<Utc>>,
    pub newest_first_seen: Option<DateTime<Utc>>,
    pub top_authors: Vec<AuthorCount>,
}
