//! SQLite-backed bookmark store.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use super::model::{
    AuthorCount, BookmarkRecord, Enrichment, EnrichmentCandidate, ProcessedUpdate, QueryFilter,
    SortOrder, Stats,
};
use crate::error::{Error, Result};

const TOP_AUTHORS: i64 = 10;

/// Durable keyed storage of bookmarks.
///
/// Every mutation is its own transaction, so a sync that dies halfway keeps
/// everything it already wrote.
#[derive(Clone)]
pub struct BookmarkStore {
    pool: SqlitePool,
}

impl BookmarkStore {
    /// Open (or create) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        tracing::debug!(path = %path.display(), "Opened bookmark store");
        Ok(store)
    }

    /// Create an in-memory store for testing.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS bookmarks (
                id TEXT PRIMARY KEY NOT NULL,
                author_id TEXT NOT NULL DEFAULT '',
                author_username TEXT NOT NULL DEFAULT '',
                author_name TEXT NOT NULL DEFAULT '',
                text TEXT NOT NULL DEFAULT '',
                created_at TEXT,
                media_urls TEXT NOT NULL DEFAULT '[]',
                urls TEXT NOT NULL DEFAULT '[]',
                raw_json TEXT,
                first_seen_at TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                processed_at TEXT,
                enrichment TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_bookmarks_first_seen
            ON bookmarks(first_seen_at)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_bookmarks_author
            ON bookmarks(author_username COLLATE NOCASE)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Whether a bookmark with this ID is stored.
    pub async fn exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM bookmarks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Insert a bookmark unless one with the same ID exists.
    ///
    /// Core fields of an existing record are never overwritten. A supplied
    /// enrichment sub-record is attached either way. Returns `true` when a new
    /// row was inserted.
    pub async fn upsert(&self, record: &BookmarkRecord) -> Result<bool> {
        let media_urls = serde_json::to_string(&record.media_urls)?;
        let urls = serde_json::to_string(&record.urls)?;

        let result = sqlx::query(
            r"
            INSERT OR IGNORE INTO bookmarks
                (id, author_id, author_username, author_name, text, created_at,
                 media_urls, urls, raw_json, first_seen_at, processed, processed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&record.id)
        .bind(&record.author_id)
        .bind(&record.author_username)
        .bind(&record.author_name)
        .bind(&record.text)
        .bind(record.created_at.map(timestamp))
        .bind(media_urls)
        .bind(urls)
        .bind(record.raw_json.as_deref())
        .bind(timestamp(record.first_seen_at))
        .bind(record.processed)
        .bind(record.processed_at.map(timestamp))
        .execute(&self.pool)
        .await?;

        if let Some(enrichment) = &record.enrichment {
            self.attach_enrichment(&record.id, enrichment).await?;
        }

        Ok(result.rows_affected() == 1)
    }

    /// Fetch one bookmark.
    pub async fn get(&self, id: &str) -> Result<Option<BookmarkRecord>> {
        let row = sqlx::query("SELECT * FROM bookmarks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    /// Number of stored bookmarks.
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM bookmarks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Set the processed flag on every listed bookmark, or on none of them.
    ///
    /// Unknown IDs fail the whole batch with [`Error::NotFound`] listing each
    /// missing ID. Duplicate IDs are collapsed.
    pub async fn set_processed(&self, ids: &[String], value: bool) -> Result<Vec<ProcessedUpdate>> {
        if ids.is_empty() {
            return Err(Error::InvalidInput("no bookmark IDs given".into()));
        }

        let mut seen = HashSet::new();
        let ids: Vec<&String> = ids.iter().filter(|id| seen.insert(id.as_str())).collect();

        let mut tx = self.pool.begin().await?;

        let mut missing = Vec::new();
        for id in &ids {
            let row = sqlx::query("SELECT 1 FROM bookmarks WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
            if row.is_none() {
                missing.push((*id).clone());
            }
        }
        if !missing.is_empty() {
            tx.rollback().await?;
            return Err(Error::NotFound { ids: missing });
        }

        let processed_at = value.then(Utc::now);
        let mut updates = Vec::with_capacity(ids.len());
        for id in ids {
            sqlx::query("UPDATE bookmarks SET processed = ?, processed_at = ? WHERE id = ?")
                .bind(value)
                .bind(processed_at.map(timestamp))
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
            updates.push(ProcessedUpdate {
                id: id.clone(),
                processed: value,
                processed_at,
            });
        }

        tx.commit().await?;
        tracing::info!(count = updates.len(), processed = value, "Updated processed flag");
        Ok(updates)
    }

    /// List bookmarks matching `filter`.
    pub async fn query(&self, filter: &QueryFilter) -> Result<Vec<BookmarkRecord>> {
        filter.validate()?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT * FROM bookmarks WHERE 1 = 1");

        if let Some(processed) = filter.processed {
            qb.push(" AND processed = ").push_bind(processed);
        }
        if let Some(author) = &filter.author {
            let author = author.trim().trim_start_matches('@').to_string();
            qb.push(" AND author_username = ")
                .push_bind(author)
                .push(" COLLATE NOCASE");
        }
        if let Some(since) = filter.since {
            qb.push(" AND first_seen_at >= ").push_bind(timestamp(since));
        }
        if let Some(text) = &filter.text {
            let pattern = format!("%{}%", escape_like(text.trim()));
            qb.push(" AND (author_username LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR author_name LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR text LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }

        qb.push(match filter.order {
            SortOrder::NewestFirst => " ORDER BY first_seen_at DESC, rowid ASC",
            SortOrder::OldestFirst => " ORDER BY first_seen_at ASC, rowid DESC",
        });

        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Case-insensitive substring search over author and text.
    pub async fn search(&self, text: &str, limit: Option<u32>) -> Result<Vec<BookmarkRecord>> {
        self.query(&QueryFilter {
            text: Some(text.to_string()),
            limit,
            ..QueryFilter::default()
        })
        .await
    }

    /// Bookmarks with URLs that still need enrichment, newest first.
    ///
    /// With `force`, bookmarks that already carry an enrichment are included.
    pub async fn enrichment_candidates(
        &self,
        force: bool,
        limit: Option<u32>,
    ) -> Result<Vec<EnrichmentCandidate>> {
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT id, urls FROM bookmarks WHERE urls != '[]'");
        if !force {
            qb.push(" AND enrichment IS NULL");
        }
        qb.push(" ORDER BY first_seen_at DESC, rowid ASC");
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let urls: String = row.try_get("urls")?;
                Ok(EnrichmentCandidate {
                    id: row.try_get("id")?,
                    urls: decode_json(&urls, "urls")?,
                })
            })
            .collect()
    }

    /// Attach (or replace) the enrichment sub-record of a bookmark.
    ///
    /// Touches no other column.
    pub async fn attach_enrichment(&self, id: &str, enrichment: &Enrichment) -> Result<()> {
        let json = serde_json::to_string(enrichment)?;
        let result = sqlx::query("UPDATE bookmarks SET enrichment = ? WHERE id = ?")
            .bind(json)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                ids: vec![id.to_string()],
            });
        }
        Ok(())
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> Result<Stats> {
        let row = sqlx::query(
            r"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(processed), 0) AS processed,
                COALESCE(SUM(enrichment IS NOT NULL), 0) AS enriched,
                MIN(first_seen_at) AS oldest,
                MAX(first_seen_at) AS newest
            FROM bookmarks
            ",
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let processed: i64 = row.try_get("processed")?;
        let oldest: Option<String> = row.try_get("oldest")?;
        let newest: Option<String> = row.try_get("newest")?;

        let authors = sqlx::query(
            r"
            SELECT author_username, COUNT(*) AS n
            FROM bookmarks
            GROUP BY author_username
            ORDER BY n DESC, author_username ASC
            LIMIT ?
            ",
        )
        .bind(TOP_AUTHORS)
        .fetch_all(&self.pool)
        .await?;

        let top_authors = authors
            .iter()
            .map(|r| {
                Ok(AuthorCount {
                    username: r.try_get("author_username")?,
                    count: r.try_get("n")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Stats {
            total,
            processed,
            unprocessed: total - processed,
            enriched: row.try_get("enriched")?,
            oldest_first_seen: oldest.as_deref().map(parse_timestamp).transpose()?,
            newest_first_seen: newest.as_deref().map(parse_timestamp).transpose()?,
            top_authors,
        })
    }
}

/// Fixed-width UTC timestamp; sorts lexicographically.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::Corrupt(format!("bad {column} column: {e}")))
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn row_to_record(row: &SqliteRow) -> Result<BookmarkRecord> {
    let created_at: Option<String> = row.try_get("created_at")?;
    let processed_at: Option<String> = row.try_get("processed_at")?;
    let first_seen_at: String = row.try_get("first_seen_at")?;
    let media_urls: String = row.try_get("media_urls")?;
    let urls: String = row.try_get("urls")?;
    let enrichment: Option<String> = row.try_get("enrichment")?;

    Ok(BookmarkRecord {
        id: row.try_get("id")?,
        author_id: row.try_get("author_id")?,
        author_username: row.try_get("author_username")?,
        author_name: row.try_get("author_name")?,
        text: row.try_get("text")?,
        created_at: created_at.as_deref().map(parse_timestamp).transpose()?,
        media_urls: decode_json(&media_urls, "media_urls")?,
        urls: decode_json(&urls, "urls")?,
        first_seen_at: parse_timestamp(&first_seen_at)?,
        processed: row.try_get("processed")?,
        processed_at: processed_at.as_deref().map(parse_timestamp).transpose()?,
        enrichment: enrichment
            .as_deref()
            .map(|e| decode_json(e, "enrichment"))
            .transpose()?,
        raw_json: row.try_get("raw_json")?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::model::{EnrichmentResult, EnrichmentStatus};
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn record(id: &str, username: &str, text: &str, seen: DateTime<Utc>) -> BookmarkRecord {
        BookmarkRecord {
            id: id.to_string(),
            author_id: "1".to_string(),
            author_username: username.to_string(),
            author_name: format!("{username} name"),
            text: text.to_string(),
            created_at: Some(seen - ChronoDuration::days(1)),
            media_urls: vec![],
            urls: vec![format!("https://example.com/{id}")],
            first_seen_at: seen,
            processed: false,
            processed_at: None,
            enrichment: None,
            raw_json: None,
        }
    }

    async fn seeded() -> BookmarkStore {
        let store = BookmarkStore::in_memory().await.unwrap();
        let base = Utc::now();
        store
            .upsert(&record("1", "alice", "rust async runtimes", base - ChronoDuration::hours(2)))
            .await
            .unwrap();
        store
            .upsert(&record("2", "Bob", "100% coverage_tips", base - ChronoDuration::hours(1)))
            .await
            .unwrap();
        store
            .upsert(&record("3", "alice", "sqlite internals", base))
            .await
            .unwrap();
        store
    }

    fn ids(records: &[BookmarkRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_upsert_is_insert_or_ignore() {
        let store = BookmarkStore::in_memory().await.unwrap();
        let original = record("1", "alice", "first", Utc::now());

        assert!(store.upsert(&original).await.unwrap());
        assert!(store.exists("1").await.unwrap());

        let mut changed = original.clone();
        changed.text = "rewritten".to_string();
        changed.processed = true;
        assert!(!store.upsert(&changed).await.unwrap());

        let stored = store.get("1").await.unwrap().unwrap();
        assert_eq!(stored.text, "first");
        assert!(!stored.processed);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let store = BookmarkStore::in_memory().await.unwrap();
        let mut rec = record("9", "carol", "hello", Utc::now());
        rec.media_urls = vec!["https://pbs.twimg.com/x.jpg".into()];
        rec.raw_json = Some("{\"rest_id\":\"9\"}".into());
        store.upsert(&rec).await.unwrap();

        let stored = store.get("9").await.unwrap().unwrap();
        assert_eq!(stored.media_urls, rec.media_urls);
        assert_eq!(stored.raw_json, rec.raw_json);
        assert_eq!(
            stored.first_seen_at.timestamp_micros(),
            rec.first_seen_at.timestamp_micros()
        );
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_orders_newest_first() {
        let store = seeded().await;
        let all = store.query(&QueryFilter::default()).await.unwrap();
        assert_eq!(ids(&all), vec!["3", "2", "1"]);

        let oldest = store
            .query(&QueryFilter {
                order: SortOrder::OldestFirst,
                limit: Some(1),
                ..QueryFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(ids(&oldest), vec!["1"]);
    }

    #[tokio::test]
    async fn test_same_timestamp_keeps_insertion_order() {
        let store = BookmarkStore::in_memory().await.unwrap();
        let now = Utc::now();
        for id in ["c", "b", "a"] {
            store.upsert(&record(id, "x", "t", now)).await.unwrap();
        }
        let all = store.query(&QueryFilter::default()).await.unwrap();
        assert_eq!(ids(&all), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = seeded().await;

        let by_author = store
            .query(&QueryFilter {
                author: Some("@ALICE".into()),
                ..QueryFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(ids(&by_author), vec!["3", "1"]);

        let text = store.search("SQLITE", None).await.unwrap();
        assert_eq!(ids(&text), vec!["3"]);

        let by_name = store.search("bob name", None).await.unwrap();
        assert_eq!(ids(&by_name), vec!["2"]);

        let since = store
            .query(&QueryFilter {
                since: Some(Utc::now() - ChronoDuration::minutes(90)),
                ..QueryFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(ids(&since), vec!["3", "2"]);
    }

    #[tokio::test]
    async fn test_search_escapes_wildcards() {
        let store = seeded().await;
        assert_eq!(ids(&store.search("100%", None).await.unwrap()), vec!["2"]);
        assert!(store.search("c_v", None).await.unwrap().is_empty());
        assert_eq!(store.search("  ", None).await.unwrap_err().code(), 5);
    }

    #[tokio::test]
    async fn test_set_processed_all_or_nothing() {
        let store = seeded().await;

        let err = store
            .set_processed(&["1".into(), "nope".into(), "3".into(), "gone".into()], true)
            .await
            .unwrap_err();
        match err {
            Error::NotFound { ids } => assert_eq!(ids, vec!["nope", "gone"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!store.get("1").await.unwrap().unwrap().processed);

        let updates = store
            .set_processed(&["1".into(), "3".into(), "1".into()], true)
            .await
            .unwrap();
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.processed_at.is_some()));

        let unprocessed = store
            .query(&QueryFilter {
                processed: Some(false),
                ..QueryFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(ids(&unprocessed), vec!["2"]);

        store.set_processed(&["1".into()], false).await.unwrap();
        let one = store.get("1").await.unwrap().unwrap();
        assert!(!one.processed);
        assert!(one.processed_at.is_none());
    }

    #[tokio::test]
    async fn test_enrichment_candidates_and_attach() {
        let store = seeded().await;
        let mut no_urls = record("4", "dan", "plain", Utc::now());
        no_urls.urls.clear();
        store.upsert(&no_urls).await.unwrap();

        let candidates = store.enrichment_candidates(false, None).await.unwrap();
        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|c| c.id != "4"));

        let enrichment = Enrichment::from_links(
            vec![EnrichmentResult::failed(
                "https://example.com/3",
                EnrichmentStatus::Timeout,
                "timed out",
            )],
            Utc::now(),
        );
        store.attach_enrichment("3", &enrichment).await.unwrap();

        let candidates = store.enrichment_candidates(false, None).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(store.enrichment_candidates(true, None).await.unwrap().len(), 3);

        let stored = store.get("3").await.unwrap().unwrap();
        assert_eq!(stored.enrichment, Some(enrichment));
        assert_eq!(stored.text, "sqlite internals");

        let err = store.attach_enrichment("zzz", &stored.enrichment.unwrap()).await;
        assert_eq!(err.unwrap_err().code(), 4);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = seeded().await;
        store.set_processed(&["1".into()], true).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.unprocessed, 2);
        assert_eq!(stats.enriched, 0);
        assert_eq!(stats.top_authors[0].username, "alice");
        assert_eq!(stats.top_authors[0].count, 2);
        assert!(stats.oldest_first_seen < stats.newest_first_seen);
    }

    #[tokio::test]
    async fn test_empty_stats() {
        let store = BookmarkStore::in_memory().await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 0);
        assert!(stats.newest_first_seen.is_none());
        assert!(stats.top_authors.is_empty());
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/bookmarks.db");
        {
            let store = BookmarkStore::open(&path).await.unwrap();
            store.upsert(&record("1", "a", "t", Utc::now())).await.unwrap();
        }
        let reopened = BookmarkStore::open(&path).await.unwrap();
        assert!(reopened.exists("1").await.unwrap());
    }
}
