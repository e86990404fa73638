//! Export formatters (JSON, CSV, Markdown).

use chrono::{DateTime, TimeZone};
use serde_json::json;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::storage::BookmarkRecord;

/// Longest enrichment summary rendered in Markdown, in characters.
const MARKDOWN_SUMMARY_CHARS: usize = 200;

const CSV_HEADER: [&str; 12] = [
    "tweet_id",
    "author_id",
    "author_username",
    "author_name",
    "text",
    "created_at",
    "first_seen_at",
    "media_urls",
    "urls",
    "processed",
    "processed_at",
    "url_metadata",
];

/// Export file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    #[value(name = "md", alias = "markdown")]
    Markdown,
}

impl ExportFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Markdown => "md",
        }
    }
}

/// Render `records` in the given format.
pub fn render(records: &[BookmarkRecord], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(records)?),
        ExportFormat::Csv => render_csv(records),
        ExportFormat::Markdown => Ok(render_markdown(records)),
    }
}

/// `bookmarks_<YYYYmmdd_HHMMSS>.<ext>` for the given instant.
pub fn default_filename<Tz: TimeZone>(format: ExportFormat, now: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    PathBuf::from(format!(
        "bookmarks_{}.{}",
        now.format("%Y%m%d_%H%M%S"),
        format.extension()
    ))
}

/// Write rendered output to `path`, creating parent directories.
pub fn write_export(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), bytes = content.len(), "Wrote export");
    Ok(())
}

fn render_csv(records: &[BookmarkRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for record in records {
        let url_metadata = record
            .enrichment
            .as_ref()
            .map(|e| {
                let links: Vec<_> = e
                    .links
                    .iter()
                    .map(|l| {
                        json!({
                            "url": l.url,
                            "status": l.status,
                            "title": l.title,
                            "description": l.description,
                            "summary": l.summary,
                        })
                    })
                    .collect();
                serde_json::to_string(&links)
            })
            .transpose()?
            .unwrap_or_default();

        let created_at = record.created_at.map(|t| t.to_rfc3339()).unwrap_or_default();
        let processed_at = record.processed_at.map(|t| t.to_rfc3339()).unwrap_or_default();
        let row: [&str; 12] = [
            &record.id,
            &record.author_id,
            &record.author_username,
            &record.author_name,
            &record.text.replace('\n', " "),
            &created_at,
            &record.first_seen_at.to_rfc3339(),
            &record.media_urls.join("|"),
            &record.urls.join("|"),
            if record.processed { "true" } else { "false" },
            &processed_at,
            &url_metadata,
        ];
        writer.write_record(row)?;
    }

    let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

fn render_markdown(records: &[BookmarkRecord]) -> String {
    let mut md = String::from("# X/Twitter Bookmarks\n\n");

    for record in records {
        let _ = writeln!(md, "## @{} ({})\n", record.author_username, record.author_name);
        let _ = writeln!(md, "**Tweet ID:** {}  ", record.id);
        if let Some(created) = record.created_at {
            let _ = writeln!(md, "**Created:** {}  ", created.format("%Y-%m-%d %H:%M"));
        }
        let _ = writeln!(
            md,
            "**Bookmarked:** {}  ",
            record.first_seen_at.format("%Y-%m-%d %H:%M")
        );
        if record.processed {
            let at = record
                .processed_at
                .map_or_else(|| "unknown".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
            let _ = writeln!(md, "**Status:** Processed ({at})");
        } else {
            md.push_str("**Status:** Unprocessed\n");
        }

        let _ = writeln!(md, "\n{}", record.text);

        if !record.media_urls.is_empty() {
            md.push_str("\n**Media:**\n");
            for url in &record.media_urls {
                let _ = writeln!(md, "- {url}");
            }
        }

        if !record.urls.is_empty() {
            md.push_str("\n**Links:**\n");
            for url in &record.urls {
                let _ = writeln!(md, "- {url}");
            }
        }

        if let Some(enrichment) = &record.enrichment {
            md.push_str("\n**Enriched URL Data:**\n");
            for link in &enrichment.links {
                let _ = writeln!(md, "- **{}** ({})", link.url, link.status);
                if let Some(title) = &link.title {
                    let _ = writeln!(md, "  - Title: {title}");
                }
                if let Some(description) = &link.description {
                    let _ = writeln!(md, "  - Description: {description}");
                }
                if let Some(summary) = &link.summary {
                    let _ = writeln!(md, "  - Summary: {}", preview(summary));
                }
            }
        }

        let _ = writeln!(md, "\n[View on X]({})", record.tweet_url());
        md.push_str("\n---\n\n");
    }

    md
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(MARKDOWN_SUMMARY_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
