//! Bounded-concurrency enrichment pass over the local store.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::metadata::extract_metadata;
use crate::error::Result;
use crate::fetch::{FetchError, Fetcher, RequestKind};
use crate::storage::{
    BookmarkStore, Enrichment, EnrichmentCandidate, EnrichmentResult, EnrichmentStatus,
};

/// Hosts that only point back into X itself.
pub const SKIP_DOMAINS: &[&str] = &["twitter.com", "x.com", "t.co", "pic.twitter.com"];

/// Links fetched per bookmark.
pub const MAX_LINKS_PER_BOOKMARK: usize = 3;

/// Options for one enrichment pass.
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Re-enrich bookmarks that already carry an enrichment.
    pub force: bool,
    /// Also extract a page-text summary.
    pub summary: bool,
    /// Bookmarks enriched concurrently.
    pub concurrency: usize,
    /// Cap on bookmarks considered.
    pub limit: Option<u32>,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            force: false,
            summary: false,
            concurrency: crate::config::DEFAULT_ENRICH_CONCURRENCY,
            limit: None,
        }
    }
}

/// Counts from one enrichment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichSummary {
    /// Bookmarks selected for enrichment.
    pub candidates: usize,
    /// Bookmarks with at least one link enriched.
    pub ok: usize,
    /// Bookmarks whose links failed to fetch or timed out.
    pub failed: usize,
    /// Bookmarks with no fetchable link.
    pub unsupported: usize,
    /// The pass was interrupted before every candidate finished.
    pub cancelled: bool,
}

impl EnrichSummary {
    fn record(&mut self, status: EnrichmentStatus) {
        match status {
            EnrichmentStatus::Ok => self.ok += 1,
            EnrichmentStatus::FetchError | EnrichmentStatus::Timeout => self.failed += 1,
            EnrichmentStatus::Unsupported => self.unsupported += 1,
        }
    }

    /// Bookmarks that finished, whatever the outcome.
    pub fn completed(&self) -> usize {
        self.ok + self.failed + self.unsupported
    }
}

/// Fetches link metadata for stored bookmarks.
///
/// Every outcome, successful or not, is written back so broken links are not
/// fetched again on the next pass unless `force` is set.
pub struct Enricher {
    fetcher: Arc<Fetcher>,
    store: BookmarkStore,
}

impl Enricher {
    pub fn new(fetcher: Arc<Fetcher>, store: BookmarkStore) -> Self {
        Self { fetcher, store }
    }

    /// Enrich every candidate, `opts.concurrency` at a time.
    ///
    /// Stops early when `cancel` fires; results already written are kept.
    /// Store failures abort the pass.
    pub async fn run(&self, opts: &EnrichOptions, cancel: &CancellationToken) -> Result<EnrichSummary> {
        let candidates = self
            .store
            .enrichment_candidates(opts.force, opts.limit)
            .await?;

        let mut summary = EnrichSummary {
            candidates: candidates.len(),
            ..EnrichSummary::default()
        };
        if candidates.is_empty() {
            tracing::info!("No bookmarks need enrichment");
            return Ok(summary);
        }

        tracing::info!(
            candidates = candidates.len(),
            concurrency = opts.concurrency,
            force = opts.force,
            "Starting enrichment"
        );

        let with_summary = opts.summary;
        let mut results = stream::iter(candidates)
            .map(|candidate| async move {
                let enrichment = self.enrich_one(&candidate, with_summary).await;
                self.store
                    .attach_enrichment(&candidate.id, &enrichment)
                    .await
                    .map(|()| (candidate.id, enrichment.status))
            })
            .buffer_unordered(opts.concurrency.max(1));

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::warn!(completed = summary.completed(), "Enrichment cancelled");
                    summary.cancelled = true;
                    break;
                }
                next = results.next() => match next {
                    Some(Ok((id, status))) => {
                        tracing::debug!(id = %id, status = %status, "Enriched bookmark");
                        summary.record(status);
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                },
            }
        }

        tracing::info!(
            ok = summary.ok,
            failed = summary.failed,
            unsupported = summary.unsupported,
            "Enrichment finished"
        );
        Ok(summary)
    }

    /// Fetch metadata for the first few links of one bookmark.
    pub async fn enrich_one(&self, candidate: &EnrichmentCandidate, with_summary: bool) -> Enrichment {
        let mut links = Vec::new();
        for url in candidate.urls.iter().take(MAX_LINKS_PER_BOOKMARK) {
            links.push(self.enrich_url(url, with_summary).await);
        }
        Enrichment::from_links(links, Utc::now())
    }

    async fn enrich_url(&self, url: &str, with_summary: bool) -> EnrichmentResult {
        if let Some(reason) = unsupported_reason(url) {
            return EnrichmentResult::failed(url, EnrichmentStatus::Unsupported, reason);
        }

        match self.fetcher.request(url, RequestKind::Enrichment).await {
            Ok(response) => {
                let meta = extract_metadata(&response.body, &response.url, with_summary);
                EnrichmentResult {
                    url: url.to_string(),
                    status: EnrichmentStatus::Ok,
                    title: meta.title,
                    description: meta.description,
                    canonical_url: meta.canonical_url,
                    summary: meta.summary,
                    error: None,
                }
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Enrichment fetch failed");
                EnrichmentResult::failed(url, status_for(&e), e.to_string())
            }
        }
    }
}

fn status_for(error: &FetchError) -> EnrichmentStatus {
    match error {
        FetchError::Timeout { .. } => EnrichmentStatus::Timeout,
        FetchError::Unsupported(_) | FetchError::NotHtml { .. } => EnrichmentStatus::Unsupported,
        _ => EnrichmentStatus::FetchError,
    }
}

/// Why `url` is not worth fetching, if it isn't.
fn unsupported_reason(url: &str) -> Option<String> {
    let Ok(parsed) = Url::parse(url) else {
        return Some(format!("invalid URL: {url}"));
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return Some(format!("unsupported scheme: {}", parsed.scheme()));
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    SKIP_DOMAINS
        .contains(&host)
        .then(|| format!("skipped domain: {host}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fetch::RetryPolicy;
    use crate::storage::BookmarkRecord;
    use crate::twitter::{Author, RawBookmark};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ARTICLE: &str = r#"<html><head><title>Rust Tips</title>
        <meta name="description" content="Ownership explained"></head>
        <body><p>Borrow checker.</p></body></html>"#;

    fn fetcher() -> Arc<Fetcher> {
        let config = Config {
            enrich_interval: Duration::ZERO,
            request_timeout: Duration::from_millis(500),
            ..Config::default()
        };
        Fetcher::new(&config)
            .unwrap()
            .with_retry_policy(
                RequestKind::Enrichment,
                RetryPolicy {
                    max_attempts: 1,
                    ..RetryPolicy::enrichment()
                },
            )
            .shared()
    }

    async fn store_with(urls: &[(&str, Vec<String>)]) -> BookmarkStore {
        let store = BookmarkStore::in_memory().await.unwrap();
        for (id, links) in urls {
            let mut raw = RawBookmark::new(*id, Author::new("1", "dev", "Dev"), "see link");
            raw.urls.clone_from(links);
            store
                .upsert(&BookmarkRecord::from_raw(&raw, Utc::now()))
                .await
                .unwrap();
        }
        store
    }

    #[test]
    fn test_unsupported_reason() {
        assert!(unsupported_reason("https://blog.dev/post").is_none());
        assert!(unsupported_reason("https://www.x.com/a/status/1").is_some());
        assert!(unsupported_reason("https://t.co/abc").is_some());
        assert!(unsupported_reason("ftp://files.dev/a").is_some());
        assert!(unsupported_reason("not a url").is_some());
    }

    #[tokio::test]
    async fn test_run_records_every_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(ARTICLE, "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("{}", "application/json"),
            )
            .mount(&server)
            .await;

        let store = store_with(&[
            ("1", vec![format!("{}/article", server.uri())]),
            ("2", vec![format!("{}/missing", server.uri())]),
            ("3", vec![format!("{}/data.json", server.uri())]),
            ("4", vec!["https://x.com/dev/status/9".to_string()]),
            ("5", vec![]),
        ])
        .await;

        let enricher = Enricher::new(fetcher(), store.clone());
        let summary = enricher
            .run(&EnrichOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.candidates, 4);
        assert_eq!(summary.ok, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.unsupported, 2);
        assert!(!summary.cancelled);

        let ok = store.get("1").await.unwrap().unwrap().enrichment.unwrap();
        let primary = ok.primary().unwrap();
        assert_eq!(primary.title.as_deref(), Some("Rust Tips"));
        assert_eq!(primary.description.as_deref(), Some("Ownership explained"));
        assert!(primary.summary.is_none());

        let failed = store.get("2").await.unwrap().unwrap().enrichment.unwrap();
        assert_eq!(failed.status, EnrichmentStatus::FetchError);

        assert!(store.get("5").await.unwrap().unwrap().enrichment.is_none());

        // Attempts are remembered, so a second pass has nothing to do.
        let again = enricher
            .run(&EnrichOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again.candidates, 0);
    }

    #[tokio::test]
    async fn test_force_and_summary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(ARTICLE, "text/html"),
            )
            .mount(&server)
            .await;

        let store = store_with(&[("1", vec![format!("{}/a", server.uri())])]).await;
        let enricher = Enricher::new(fetcher(), store.clone());
        enricher
            .run(&EnrichOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        let opts = EnrichOptions {
            force: true,
            summary: true,
            ..EnrichOptions::default()
        };
        let summary = enricher.run(&opts, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.candidates, 1);

        let record = store.get("1").await.unwrap().unwrap();
        let primary = record.enrichment.unwrap().primary().cloned().unwrap();
        assert_eq!(primary.summary.as_deref(), Some("Borrow checker."));
        assert_eq!(record.text, "see link");
    }

    #[tokio::test]
    async fn test_slow_link_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_string(ARTICLE),
            )
            .mount(&server)
            .await;

        let store = BookmarkStore::in_memory().await.unwrap();
        let enricher = Enricher::new(fetcher(), store);
        let candidate = EnrichmentCandidate {
            id: "1".into(),
            urls: vec![format!("{}/slow", server.uri())],
        };
        let enrichment = enricher.enrich_one(&candidate, false).await;
        assert_eq!(enrichment.status, EnrichmentStatus::Timeout);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = store_with(&[("1", vec!["https://blog.invalid/a".to_string()])]).await;
        let enricher = Enricher::new(fetcher(), store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = enricher.run(&EnrichOptions::default(), &cancel).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.completed(), 0);
    }
}
