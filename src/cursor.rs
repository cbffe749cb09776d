//! Ingestion cursor controller.
//!
//! One poll moves through `Idle -> Fetching -> Committing -> Idle`. Records
//! listed at or after the stored cursor are fetched, normalized and upserted;
//! only once every upsert has succeeded does the cursor move to the newest
//! timestamp of the batch. A failed poll, or one dropped mid-flight by a
//! timeout, leaves the cursor where it was and the next poll re-reads the
//! same window.

use crate::error::Result;
use crate::models::UpsertOutcome;
use crate::normalizer::Normalizer;
use crate::sources::UpstreamSource;
use crate::store::UpstreamRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CursorState {
    Idle,
    Fetching { since: Option<DateTime<Utc>> },
    Committing { records: usize },
}

/// Counts of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records that failed normalization.
    pub skipped: usize,
    /// Cursor after the poll.
    pub cursor: Option<DateTime<Utc>>,
    pub advanced: bool,
}

/// Resets the published state when a poll ends, including by cancellation.
struct IdleOnDrop<'a>(&'a watch::Sender<CursorState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(CursorState::Idle);
    }
}

pub struct CursorController<S: ?Sized> {
    store: Arc<S>,
    source: Arc<dyn UpstreamSource>,
    normalizer: Normalizer,
    /// Serializes polls; concurrent invocations wait for each other.
    gate: Mutex<()>,
    state: watch::Sender<CursorState>,
}

impl<S> CursorController<S>
where
    S: UpstreamRepository + ?Sized,
{
    pub fn new(store: Arc<S>, source: Arc<dyn UpstreamSource>, normalizer: Normalizer) -> Self {
        let (state, _) = watch::channel(CursorState::Idle);
        Self {
            store,
            source,
            normalizer,
            gate: Mutex::new(()),
            state,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CursorState> {
        self.state.subscribe()
    }

    #[instrument(skip(self), fields(source = self.source.name()))]
    pub async fn poll(&self) -> Result<PollReport> {
        let _gate = self.gate.lock().await;
        let _idle = IdleOnDrop(&self.state);

        let since = self.store.get_cursor().await?;
        self.state.send_replace(CursorState::Fetching { since });
        let records = self.source.fetch(since).await?;

        let mut report = PollReport {
            fetched: records.len(),
            cursor: since,
            ..PollReport::default()
        };
        if records.is_empty() {
            info!("No upstream records since {:?}", since);
            return Ok(report);
        }

        self.state.send_replace(CursorState::Committing {
            records: records.len(),
        });
        let mut newest = since;
        for record in &records {
            newest = newest.max(Some(record.timestamp));
            let advisory = match self.normalizer.normalize(record) {
                Ok(advisory) => advisory,
                Err(e) => {
                    warn!("Skipping {}: {}", record.id, e);
                    report.skipped += 1;
                    continue;
                }
            };
            let (_, outcome) = self.store.upsert_upstream_advisory(&advisory).await?;
            match outcome {
                UpsertOutcome::Created => report.created += 1,
                UpsertOutcome::Updated => report.updated += 1,
                UpsertOutcome::Unchanged => report.unchanged += 1,
            }
        }

        if let Some(newest) = newest {
            report.advanced = self.store.advance_cursor(newest).await?;
        }
        report.cursor = self.store.get_cursor().await?;

        info!(
            "Polled {} records: {} created, {} updated, {} unchanged, {} skipped",
            report.fetched, report.created, report.updated, report.unchanged, report.skipped
        );
        Ok(report)
    }
}
