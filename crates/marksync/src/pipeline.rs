//! Sync engine - wires the session, fetcher, feed and store together.

use tokio_util::sync::CancellationToken;

use crate::auth::SessionStore;
use crate::config::Config;
use crate::enrichment::{EnrichOptions, EnrichSummary, Enricher};
use crate::error::{AuthErrorKind, Error, Result};
use crate::fetch::Fetcher;
use crate::storage::BookmarkStore;
use crate::sync::{Reconciler, SyncMode, SyncReport};
use crate::twitter::{FeedClient, FeedSource, Paginator};

/// Entry point for sync and enrichment runs.
pub struct Engine {
    config: Config,
    store: BookmarkStore,
    sessions: SessionStore,
}

impl Engine {
    /// Open the store under the configured data directory.
    pub async fn open(config: Config) -> Result<Self> {
        let store = BookmarkStore::open(&config.database_path()).await?;
        Ok(Self::with_store(config, store))
    }

    /// Build an engine over an already-open store.
    pub fn with_store(config: Config, store: BookmarkStore) -> Self {
        let sessions =
            SessionStore::new(config.session_path()).with_stale_after_days(config.stale_after_days);
        Self {
            config,
            store,
            sessions,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &BookmarkStore {
        &self.store
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Sync the remote feed into the store.
    ///
    /// Fails up front if no usable credential is stored. Failures during the
    /// walk come back inside the report alongside the partial counts.
    pub async fn sync(
        &self,
        mode: SyncMode,
        max_pages: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let credential = self.sessions.load()?;
        let fetcher = Fetcher::new(&self.config)?
            .with_credential(&credential)?
            .shared();
        let feed = FeedClient::new(fetcher, self.config.feed_url.as_str(), self.config.page_size);

        Ok(self.sync_with(&feed, mode, max_pages, cancel).await)
    }

    /// Sync from an arbitrary feed source.
    ///
    /// Incremental runs are capped at `max_pages` (default from config). Full
    /// runs are uncapped unless `max_pages` is given. A credential rejected by
    /// the feed is invalidated before returning. If that fails, the reported
    /// error says so, since the next run would try the same credential again.
    pub async fn sync_with(
        &self,
        source: &dyn FeedSource,
        mode: SyncMode,
        max_pages: Option<u32>,
        cancel: &CancellationToken,
    ) -> SyncReport {
        let page_limit = match mode {
            SyncMode::Incremental => Some(max_pages.unwrap_or(self.config.max_pages)),
            SyncMode::Full => max_pages,
        };

        let mut paginator = Paginator::new(source, page_limit);
        let mut report = Reconciler::new(&self.store, mode)
            .with_cancellation(cancel.clone())
            .run(&mut paginator)
            .await;

        if report.error.as_ref().is_some_and(Error::is_auth_rejected) {
            if let Err(e) = self.sessions.invalidate() {
                tracing::error!(error = %e, "Failed to invalidate rejected session");
                report.error = Some(Error::auth(
                    AuthErrorKind::Rejected,
                    format!(
                        "session rejected by X, and marking {} invalid failed: {e}; \
                         re-import cookies before the next sync",
                        self.sessions.path().display()
                    ),
                ));
            }
        }

        report
    }

    /// Enrich stored bookmarks that carry links.
    pub async fn enrich(
        &self,
        opts: &EnrichOptions,
        cancel: &CancellationToken,
    ) -> Result<EnrichSummary> {
        let config = Config {
            enrich_concurrency: opts.concurrency,
            ..self.config.clone()
        };
        let fetcher = Fetcher::new(&config)?.shared();
        Enricher::new(fetcher, self.store.clone())
            .run(opts, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credential;
    use crate::error::NetworkErrorKind;
    use crate::sync::StopReason;
    use crate::twitter::fixtures::{timeline, tweet_entry};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn engine(dir: &TempDir, feed_url: String) -> Engine {
        let config = Config {
            feed_url,
            feed_interval: Duration::ZERO,
            ..Config::default().with_data_dir(dir.path())
        };
        let store = BookmarkStore::in_memory().await.unwrap();
        Engine::with_store(config, store)
    }

    fn import_session(engine: &Engine) {
        let cookies = BTreeMap::from([
            ("auth_token".to_string(), "tok".to_string()),
            ("ct0".to_string(), "csrf".to_string()),
        ]);
        engine.sessions().save(&Credential::new(cookies)).unwrap();
    }

    #[tokio::test]
    async fn test_sync_without_session_is_auth_error() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, "https://x.invalid/Bookmarks".into()).await;

        let err = engine
            .sync(SyncMode::Incremental, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Auth {
                kind: AuthErrorKind::NotFound,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_sync_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("x-csrf-token", "csrf"))
            .respond_with(ResponseTemplate::new(200).set_body_string(timeline(
                vec![tweet_entry("2", 2), tweet_entry("1", 1)],
                None,
            )))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, format!("{}/Bookmarks", server.uri())).await;
        import_session(&engine);

        let report = engine
            .sync(SyncMode::Incremental, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.summary.new_count, 2);
        assert_eq!(report.summary.stopped_reason, StopReason::Exhausted);
        assert_eq!(engine.store().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejected_session_is_invalidated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, format!("{}/Bookmarks", server.uri())).await;
        import_session(&engine);

        let report = engine
            .sync(SyncMode::Incremental, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.summary.stopped_reason, StopReason::Error);
        assert!(report.error.as_ref().is_some_and(Error::is_auth_rejected));

        // Terminal until re-import.
        let err = engine
            .sync(SyncMode::Incremental, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Auth {
                kind: AuthErrorKind::Stale,
                ..
            }
        ));

        import_session(&engine);
        assert!(engine.sessions().load().is_ok());
    }

    #[tokio::test]
    async fn test_failed_invalidation_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, format!("{}/Bookmarks", server.uri())).await;
        import_session(&engine);
        // The session is rewritten through a temp file; a directory in its
        // place makes the write fail.
        std::fs::create_dir(dir.path().join("session.json.tmp")).unwrap();

        let report = engine
            .sync(SyncMode::Incremental, None, &CancellationToken::new())
            .await
            .unwrap();
        let err = report.error.unwrap();
        assert!(err.is_auth_rejected());
        assert!(err.to_string().contains("invalid failed"), "{err}");
        assert!(engine.sessions().load().is_ok());
    }

    #[tokio::test]
    async fn test_tweets_missing_fields_fail_the_sync() {
        let mut broken = tweet_entry("2", 2);
        broken["content"]["itemContent"]["tweet_results"]["result"]
            .as_object_mut()
            .unwrap()
            .remove("legacy");

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(timeline(vec![broken], Some("C1"))),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, format!("{}/Bookmarks", server.uri())).await;
        import_session(&engine);

        let report = engine
            .sync(SyncMode::Full, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.summary.stopped_reason, StopReason::Error);
        assert_eq!(report.summary.new_count, 0);
        assert!(matches!(
            report.error,
            Some(Error::Network {
                kind: NetworkErrorKind::Permanent,
                page: Some(1),
                ..
            })
        ));
        // Refetched before giving up.
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }
}
