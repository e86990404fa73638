//! Reconciliation of the remote feed against the local store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::storage::{BookmarkRecord, BookmarkStore};
use crate::twitter::{PageEnd, Paginator, RawBookmark};

/// How far a sync walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Stop at the first bookmark already stored, within the page cap.
    #[default]
    Incremental,
    /// Walk the whole feed, skipping stored bookmarks.
    Full,
}

/// Why a sync run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The feed ran out of bookmarks.
    Exhausted,
    /// Reached a bookmark from an earlier sync.
    AlreadySeen,
    /// Hit the page cap.
    PageLimit,
    /// Network, auth or store failure.
    Error,
    /// Interrupted by the user.
    Cancelled,
}

/// Counts from one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub new_count: usize,
    /// Bookmarks encountered that were already stored.
    pub skipped_count: usize,
    pub pages_fetched: u32,
    pub stopped_reason: StopReason,
}

/// Outcome of a sync run: counts so far, plus the error that ended it, if any.
///
/// Everything counted in `summary` is committed even when `error` is set.
#[derive(Debug)]
pub struct SyncReport {
    pub summary: SyncSummary,
    pub error: Option<Error>,
}

impl SyncReport {
    /// Whether the run ended without error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Split into the summary or the terminating error.
    pub fn into_result(self) -> Result<SyncSummary, (SyncSummary, Error)> {
        match self.error {
            None => Ok(self.summary),
            Some(e) => Err((self.summary, e)),
        }
    }
}

/// Decides per feed item whether to insert, skip or stop.
pub struct Reconciler<'a> {
    store: &'a BookmarkStore,
    mode: SyncMode,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Mutable state of one run.
struct RunState {
    new_count: usize,
    skipped_count: usize,
    seen_this_run: HashSet<String>,
    last_sort_key: Option<u128>,
    stop_on_seen: bool,
}

impl RunState {
    /// Newest-first order is assumed, not trusted. After the first item newer
    /// than its predecessor, stored bookmarks are skipped instead of ending
    /// the run.
    fn check_order(&mut self, raw: &RawBookmark) {
        let Some(key) = raw.sort_key() else {
            return;
        };
        if self.last_sort_key.is_some_and(|prev| key > prev) && self.stop_on_seen {
            tracing::warn!(
                id = %raw.id,
                "Feed is out of order; continuing without stopping at stored bookmarks"
            );
            self.stop_on_seen = false;
        }
        self.last_sort_key = Some(key);
    }
}

enum ItemOutcome {
    Continue,
    Stop,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a BookmarkStore, mode: SyncMode) -> Self {
        Self {
            store,
            mode,
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    /// Stop between items once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Consume `paginator` until a stopping condition.
    ///
    /// New bookmarks are committed one at a time, so the store stays
    /// consistent whatever ends the run.
    pub async fn run(&self, paginator: &mut Paginator<'_>) -> SyncReport {
        let mut state = RunState {
            new_count: 0,
            skipped_count: 0,
            seen_this_run: HashSet::new(),
            last_sort_key: None,
            stop_on_seen: self.mode == SyncMode::Incremental,
        };

        tracing::info!(mode = ?self.mode, "Starting sync");

        let (stopped_reason, error) = loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break (StopReason::Cancelled, None),
                next = paginator.next_page() => next,
            };

            let page = match next {
                Ok(Some(page)) => page,
                Ok(None) => {
                    let reason = match paginator.end() {
                        Some(PageEnd::PageLimit) => StopReason::PageLimit,
                        _ => StopReason::Exhausted,
                    };
                    break (reason, None);
                }
                Err(e) => {
                    tracing::warn!(error = %e, pages = paginator.pages_fetched(), "Sync interrupted");
                    break (StopReason::Error, Some(e));
                }
            };

            match self.reconcile_page(&page.bookmarks, &mut state).await {
                Ok(ItemOutcome::Continue) => {}
                Ok(ItemOutcome::Stop) if self.cancel.is_cancelled() => {
                    break (StopReason::Cancelled, None);
                }
                Ok(ItemOutcome::Stop) => break (StopReason::AlreadySeen, None),
                Err(e) => break (StopReason::Error, Some(e)),
            }
        };

        let summary = SyncSummary {
            new_count: state.new_count,
            skipped_count: state.skipped_count,
            pages_fetched: paginator.pages_fetched(),
            stopped_reason,
        };

        tracing::info!(
            new = summary.new_count,
            skipped = summary.skipped_count,
            pages = summary.pages_fetched,
            stopped = ?summary.stopped_reason,
            "Sync finished"
        );

        SyncReport { summary, error }
    }

    async fn reconcile_page(
        &self,
        bookmarks: &[RawBookmark],
        state: &mut RunState,
    ) -> crate::Result<ItemOutcome> {
        for raw in bookmarks {
            if self.cancel.is_cancelled() {
                return Ok(ItemOutcome::Stop);
            }

            if !state.seen_this_run.insert(raw.id.clone()) {
                tracing::debug!(id = %raw.id, "Duplicate bookmark within run");
                continue;
            }

            state.check_order(raw);

            if self.store.exists(&raw.id).await? {
                state.skipped_count += 1;
                if state.stop_on_seen {
                    tracing::info!(id = %raw.id, "Reached previously synced bookmark");
                    return Ok(ItemOutcome::Stop);
                }
                continue;
            }

            let record = BookmarkRecord::from_raw(raw, self.started_at);
            if self.store.upsert(&record).await? {
                tracing::debug!(id = %raw.id, author = %raw.author.username, "Stored bookmark");
                state.new_count += 1;
            } else {
                state.skipped_count += 1;
            }
        }
        Ok(ItemOutcome::Continue)
    }
}
