//! Twitter data types.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("Invalid URL regex"));

/// A bookmark as it arrives from the feed, before reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBookmark {
    /// Unique tweet ID.
    pub id: String,
    /// Tweet author.
    pub author: Author,
    /// Tweet text content.
    pub text: String,
    /// When the tweet was posted, if the feed supplied a parseable date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Attached media.
    #[serde(default)]
    pub media: Vec<Media>,
    /// Expanded URLs referenced by the tweet.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Feed ordering key (larger is newer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_index: Option<String>,
    /// The tweet object exactly as received.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl RawBookmark {
    /// Create a new bookmark with minimal required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, author: Author, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author,
            text: text.into(),
            created_at: None,
            media: Vec::new(),
            urls: Vec::new(),
            sort_index: None,
            raw: serde_json::Value::Null,
        }
    }

    /// Fill `urls` from the tweet text when the feed carried no URL entities.
    pub fn extract_urls(&mut self) {
        if !self.urls.is_empty() {
            return;
        }
        self.urls = URL_REGEX
            .find_iter(&self.text)
            .map(|m| m.as_str().to_string())
            .collect();
    }

    /// Media URLs in feed order.
    pub fn media_urls(&self) -> Vec<String> {
        self.media.iter().map(|m| m.url.clone()).collect()
    }

    /// Numeric value of the sort index, if present and numeric.
    pub fn sort_key(&self) -> Option<u128> {
        self.sort_index.as_deref().and_then(|s| s.parse().ok())
    }
}

/// Author information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Author {
    /// Numeric user ID.
    pub id: String,
    /// Twitter handle (without @).
    pub username: String,
    /// Display name.
    pub name: String,
}

impl Author {
    /// Create a new author.
    #[must_use]
    pub fn new(id: impl Into<String>, username: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            name: name.into(),
        }
    }

    /// Get the handle with @ prefix.
    #[must_use]
    pub fn at_handle(&self) -> String {
        format!("@{}", self.username)
    }
}

/// Media attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    /// Media type (photo, video, gif).
    pub kind: MediaKind,
    /// URL to the media file.
    pub url: String,
}

/// Type of media attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Gif,
}
