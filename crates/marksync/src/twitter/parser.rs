//! Parser for the X GraphQL bookmark timeline.
//!
//! Responses look like
//! `data.bookmark_timeline_v2.timeline.instructions[].entries[]`, where tweet
//! entries carry `content.itemContent.tweet_results.result` and the bottom
//! cursor entry carries the token for the next (older) page. Unknown fields are
//! ignored; a response without the timeline path is a parse failure.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use super::types::{Author, Media, MediaKind, RawBookmark};

const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// The feed response did not have the expected shape.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("feed response is not JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("feed response has no bookmark timeline")]
    MissingTimeline,

    /// A tweet entry lacked fields every tweet carries.
    #[error("tweet entry {entry_id} is missing required fields")]
    MissingFields { entry_id: String },
}

/// One parsed feed page.
#[derive(Debug, Default)]
pub struct ParsedPage {
    /// Tweets in feed order.
    pub bookmarks: Vec<RawBookmark>,
    /// Bottom cursor, if the feed offered one.
    pub next_cursor: Option<String>,
    /// Non-tweet results (tombstones, unavailable tweets) left out.
    pub skipped: usize,
}

/// Parser for bookmark timeline JSON.
pub struct BookmarkParser;

impl BookmarkParser {
    /// Parse a timeline response body.
    ///
    /// A tweet entry missing its id or `legacy` block fails the whole page so
    /// the caller can refetch it rather than lose the bookmark.
    pub fn parse_page(body: &str) -> Result<ParsedPage, ParseError> {
        let data: Value = serde_json::from_str(body)?;
        let instructions = data
            .pointer("/data/bookmark_timeline_v2/timeline/instructions")
            .and_then(Value::as_array)
            .ok_or(ParseError::MissingTimeline)?;

        let mut page = ParsedPage::default();

        for instruction in instructions {
            if instruction.get("type").and_then(Value::as_str) != Some("TimelineAddEntries") {
                continue;
            }
            let Some(entries) = instruction.get("entries").and_then(Value::as_array) else {
                continue;
            };

            for entry in entries {
                let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or("");

                if entry_id.starts_with("cursor-") {
                    if entry_id.starts_with("cursor-bottom") {
                        page.next_cursor = entry
                            .pointer("/content/value")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                    }
                    continue;
                }

                let Some(result) = tweet_result(entry) else {
                    tracing::warn!(entry_id, "Skipping non-tweet timeline entry");
                    page.skipped += 1;
                    continue;
                };
                let bookmark = Self::parse_tweet(entry, result).ok_or_else(|| {
                    ParseError::MissingFields {
                        entry_id: entry_id.to_string(),
                    }
                })?;
                page.bookmarks.push(bookmark);
            }
        }

        tracing::debug!(
            count = page.bookmarks.len(),
            skipped = page.skipped,
            has_cursor = page.next_cursor.is_some(),
            "Parsed bookmark page"
        );
        Ok(page)
    }

    fn parse_tweet(entry: &Value, result: &Value) -> Option<RawBookmark> {
        let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or("");
        let id = result
            .get("rest_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| entry_id.strip_prefix("tweet-").map(str::to_string))
            .filter(|id| !id.is_empty())?;

        let legacy = result.get("legacy")?;
        let text = legacy
            .get("full_text")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut bookmark = RawBookmark::new(id, Self::parse_author(result), text);
        bookmark.created_at = legacy
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_created_at);
        bookmark.media = Self::parse_media(legacy);
        bookmark.urls = legacy
            .pointer("/entities/urls")
            .and_then(Value::as_array)
            .map(|urls| {
                urls.iter()
                    .filter_map(|u| u.get("expanded_url").and_then(Value::as_str))
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        bookmark.extract_urls();
        bookmark.sort_index = entry
            .get("sortIndex")
            .and_then(Value::as_str)
            .map(str::to_string);
        bookmark.raw = result.clone();

        Some(bookmark)
    }

    fn parse_author(tweet: &Value) -> Author {
        let Some(user) = tweet.pointer("/core/user_results/result") else {
            return Author::default();
        };
        // Newer responses moved screen_name/name from `legacy` to `core`.
        let field = |name: &str| {
            user.pointer(&format!("/core/{name}"))
                .or_else(|| user.pointer(&format!("/legacy/{name}")))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Author {
            id: user
                .get("rest_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            username: field("screen_name"),
            name: field("name"),
        }
    }

    fn parse_media(legacy: &Value) -> Vec<Media> {
        let Some(items) = legacy
            .pointer("/extended_entities/media")
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| match item.get("type").and_then(Value::as_str)? {
                "photo" => Some(Media {
                    kind: MediaKind::Photo,
                    url: item.get("media_url_https")?.as_str()?.to_string(),
                }),
                kind @ ("video" | "animated_gif") => Some(Media {
                    kind: if kind == "video" {
                        MediaKind::Video
                    } else {
                        MediaKind::Gif
                    },
                    url: best_mp4_variant(item)?,
                }),
                _ => None,
            })
            .collect()
    }

    /// Extract tweet ID from a URL (full or relative) or a bare ID.
    pub fn extract_tweet_id(input: &str) -> Option<String> {
        let input = input.trim();
        if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
            return Some(input.to_string());
        }

        // Full: https://x.com/user/status/123 or https://twitter.com/user/status/123
        // Relative: /user/status/123
        let path = if input.starts_with("http") {
            input.split('/').skip(3).collect::<Vec<_>>().join("/")
        } else {
            input.trim_start_matches('/').to_string()
        };
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() >= 3 && parts[1] == "status" {
            let id = parts[2].split(['?', '#']).next().unwrap_or(parts[2]);
            (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
        } else {
            None
        }
    }
}

/// The `Tweet` object behind a timeline entry, if the entry holds one.
///
/// Tweets with visibility restrictions wrap the real tweet one level down.
fn tweet_result(entry: &Value) -> Option<&Value> {
    let mut result = entry.pointer("/content/itemContent/tweet_results/result")?;
    if result.get("__typename").and_then(Value::as_str) == Some("TweetWithVisibilityResults") {
        result = result.get("tweet")?;
    }
    (result.get("__typename").and_then(Value::as_str) == Some("Tweet")).then_some(result)
}

fn best_mp4_variant(item: &Value) -> Option<String> {
    item.pointer("/video_info/variants")?
        .as_array()?
        .iter()
        .filter(|v| v.get("content_type").and_then(Value::as_str) == Some("video/mp4"))
        .max_by_key(|v| v.get("bitrate").and_then(Value::as_u64).unwrap_or(0))
        .and_then(|v| v.get("url").and_then(Value::as_str))
        .map(str::to_string)
}

fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{json, Value};

    /// A tweet timeline entry in the shape the feed returns.
    pub fn tweet_entry(id: &str, sort_index: u64) -> Value {
        json!({
            "entryId": format!("tweet-{id}"),
            "sortIndex": sort_index.to_string(),
            "content": {
                "entryType": "TimelineTimelineItem",
                "itemContent": {
                    "itemType": "TimelineTweet",
                    "tweet_results": {
                        "result": {
                            "__typename": "Tweet",
                            "rest_id": id,
                            "core": {
                                "user_results": {
                                    "result": {
                                        "rest_id": "42",
                                        "core": { "screen_name": "alice", "name": "Alice" }
                                    }
                                }
                            },
                            "legacy": {
                                "full_text": format!("tweet {id} https://t.co/abc"),
                                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                                "entities": {
                                    "urls": [{ "expanded_url": format!("https://example.com/{id}") }]
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// A full timeline response body.
    pub fn timeline(entries: Vec<Value>, cursor: Option<&str>) -> String {
        let mut entries = entries;
        if let Some(cursor) = cursor {
            entries.push(json!({
                "entryId": format!("cursor-bottom-{cursor}"),
                "content": { "entryType": "TimelineTimelineCursor", "value": cursor, "cursorType": "Bottom" }
            }));
        }
        json!({
            "data": {
                "bookmark_timeline_v2": {
                    "timeline": {
                        "instructions": [{ "type": "TimelineAddEntries", "entries": entries }]
                    }
                }
            }
        })
        .to_string()
    }
}
