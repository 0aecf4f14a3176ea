//! Sync engine: archives a [`PagedSource`] into the local store.
//!
//! A sync runs up to two phases against one source:
//!
//! 1. **Tail sync**: only when records already exist. Pages forward from the
//!    highest stored id until the source returns an empty page.
//! 2. **Backfill**: while the stored count is below the target, or a
//!    requested `min_date`/`min_id` has not been reached. Pages backward from
//!    the lowest stored id (or the newest message on a fresh source).
//!
//! Records are committed in batches. Each batch and its coverage claim share
//! one transaction, and the resume cursor only moves once that transaction
//! commits, so an interrupted sync re-fetches at most one batch.
//!
//! # Example
//!
//! ```rust,ignore
//! use stream_archiver::sources::sync::{SyncEngine, SyncOptions};
//!
//! let mut engine = SyncEngine::new(&source, &mut storage).with_cancel_signal(cancel);
//! let report = engine.sync("@news", &SyncOptions { target_count: 500, ..Default::default() }).await?;
//! println!("{}..{} ({} stored)", report.min_id, report.max_id, report.total_count);
//! ```

use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cancel::CancelSignal;
use super::retry::{RetryOutcome, RetryPolicy};
use super::{Cursor, Direction, PagedSource, ResolvedSource};
use crate::model::types::Record;
use crate::storage::coverage::IdSpan;
use crate::storage::sqlite::{SqliteStorage, StoreError};

/// Errors that end a sync without a report.
///
/// Rate limits, empty pages, and exhausted retries are not errors; the last
/// one ends the phase early and is visible in [`PhaseReport::stop`].
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("sync cancelled before the source was resolved")]
    Cancelled,

    #[error("sync did not stop within the {grace_secs}s shutdown grace period")]
    ForcedShutdown { grace_secs: u64 },
}

/// Where a sync invocation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    TailSync,
    Backfill,
    Finalizing,
    Done,
    Cancelling,
}

/// Caller-supplied goals and tuning for one sync.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Backfill until at least this many records are stored.
    pub target_count: usize,
    /// Backfill until a record at or before this time (epoch ms) is stored.
    pub min_date_ms: Option<i64>,
    /// Backfill until a record at or below this id is stored.
    pub min_id: Option<i64>,
    /// Records per committed batch.
    pub batch_size: usize,
    /// Maximum records requested per page.
    pub page_size: usize,
    /// Keep each item's raw payload.
    pub store_raw: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            target_count: 100,
            min_date_ms: None,
            min_id: None,
            batch_size: 100,
            page_size: 100,
            store_raw: true,
        }
    }
}

/// Why a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The source returned an empty page.
    EndOfStream,
    /// Count and boundary goals are met.
    TargetReached,
    /// Transient errors exceeded the retry cap.
    RetriesExhausted,
    Cancelled,
}

/// Result of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    /// Newly stored records.
    pub inserted: usize,
    /// Pages received from the source, empty ones included.
    pub pages: usize,
    /// Committed batches.
    pub batches: usize,
    pub stop: StopReason,
}

/// Report from syncing one source.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub source_id: i64,
    pub display_name: String,
    /// Records stored by this invocation.
    pub inserted_count: usize,
    /// Live boundaries after finalization; 0 when nothing is stored.
    pub min_id: i64,
    pub max_id: i64,
    /// Records stored for the source overall.
    pub total_count: i64,
    pub tail: Option<PhaseReport>,
    pub backfill: Option<PhaseReport>,
    /// Set when the sync stopped on the cancel signal. Finalization still ran.
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl SyncReport {
    fn new(source: &ResolvedSource) -> Self {
        Self {
            source_id: source.id,
            display_name: source.display_name.clone(),
            inserted_count: 0,
            min_id: 0,
            max_id: 0,
            total_count: 0,
            tail: None,
            backfill: None,
            cancelled: false,
            duration_ms: 0,
        }
    }

    /// True when a phase gave up on transient errors.
    pub fn soft_stopped(&self) -> bool {
        [&self.tail, &self.backfill]
            .into_iter()
            .flatten()
            .any(|p| p.stop == StopReason::RetriesExhausted)
    }

    fn absorb(&mut self, phase: &PhaseReport) {
        self.inserted_count += phase.inserted;
        self.cancelled |= phase.stop == StopReason::Cancelled;
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Tail,
    Backfill,
}

impl Phase {
    fn direction(self) -> Direction {
        match self {
            Self::Tail => Direction::Ascending,
            Self::Backfill => Direction::Descending,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Tail => "tail",
            Self::Backfill => "backfill",
        }
    }
}

/// Orchestrates one sync at a time over a borrowed source and store.
///
/// Concurrent syncs of the same source must be serialized by the caller.
pub struct SyncEngine<'a, S: PagedSource> {
    source: &'a S,
    storage: &'a mut SqliteStorage,
    retry: RetryPolicy,
    cancel: CancelSignal,
    state: SyncState,
}

impl<'a, S: PagedSource> SyncEngine<'a, S> {
    pub fn new(source: &'a S, storage: &'a mut SqliteStorage) -> Self {
        Self {
            source,
            storage,
            retry: RetryPolicy::default(),
            cancel: CancelSignal::new(),
            state: SyncState::Idle,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    fn enter(&mut self, next: SyncState) {
        debug!(from = ?self.state, to = ?next, "sync state");
        self.state = next;
    }

    /// Sync `reference` toward the goals in `options`.
    ///
    /// Returns a report on success, soft stop, and cancellation alike. Errors
    /// are fatal source or store failures, plus [`SyncError::Cancelled`] when
    /// the signal fires before the source is even resolved.
    pub async fn sync(
        &mut self,
        reference: &str,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        self.enter(SyncState::Idle);

        let source = self.source;
        let resolved = match self
            .retry
            .run(&self.cancel, || source.resolve(reference), || Ok::<(), SyncError>(()))
            .await?
        {
            RetryOutcome::Ready(resolved) => resolved,
            RetryOutcome::Cancelled => return Err(SyncError::Cancelled),
            RetryOutcome::Fatal(msg) => return Err(SyncError::SourceUnavailable(msg)),
            RetryOutcome::Exhausted { last_error, .. } => {
                return Err(SyncError::SourceUnavailable(last_error));
            }
        };
        let source_id = resolved.id;
        self.storage.upsert_source(&resolved.to_source())?;

        let (db_min, db_max) = self.storage.record_boundaries(source_id)?;
        info!(
            source_id,
            name = %resolved.display_name,
            db_min,
            db_max,
            target = options.target_count,
            "syncing source"
        );

        let mut report = SyncReport::new(&resolved);

        if db_max > 0 {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
            } else {
                self.enter(SyncState::TailSync);
                let phase = self.run_phase(&resolved, Phase::Tail, Some(db_max), options).await?;
                report.absorb(&phase);
                report.tail = Some(phase);
            }
        }

        if !report.cancelled {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
            } else if !backfill_satisfied(self.storage, source_id, options, &[])? {
                self.enter(SyncState::Backfill);
                let (low, _) = self.storage.record_boundaries(source_id)?;
                let start = (low > 0).then_some(low);
                let phase = self.run_phase(&resolved, Phase::Backfill, start, options).await?;
                report.absorb(&phase);
                report.backfill = Some(phase);
            } else {
                debug!(source_id, "backfill goals already met");
            }
        }

        if report.cancelled {
            self.enter(SyncState::Cancelling);
        }
        self.enter(SyncState::Finalizing);
        self.finalize(&mut report)?;
        report.duration_ms = started.elapsed().as_millis() as u64;
        self.enter(SyncState::Done);

        info!(
            source_id,
            inserted = report.inserted_count,
            total = report.total_count,
            min_id = report.min_id,
            max_id = report.max_id,
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "sync finished"
        );
        Ok(report)
    }

    /// Recompute boundaries from stored records and collapse this session's
    /// batch ranges.
    fn finalize(&mut self, report: &mut SyncReport) -> Result<(), SyncError> {
        let source_id = report.source_id;
        let (min_id, max_id) = self.storage.record_boundaries(source_id)?;
        self.storage.update_source_boundaries(
            source_id,
            (min_id > 0).then_some(min_id),
            (max_id > 0).then_some(max_id),
        )?;
        let ranges = self.storage.merge_coverage(source_id)?;
        report.min_id = min_id;
        report.max_id = max_id;
        report.total_count = self.storage.record_count(source_id)?;
        debug!(source_id, ranges, "finalized");
        Ok(())
    }

    async fn run_phase(
        &mut self,
        resolved: &ResolvedSource,
        phase: Phase,
        start: Option<i64>,
        options: &SyncOptions,
    ) -> Result<PhaseReport, SyncError> {
        let source = self.source;
        let retry = self.retry;
        let cancel = self.cancel.clone();
        let batch_size = options.batch_size.max(1);
        let page_size = options.page_size.max(1);
        let direction = phase.direction();
        let mut writer = BatchWriter::new(&mut *self.storage, resolved.id, direction, start, batch_size);
        let mut pages = 0;

        info!(source_id = resolved.id, phase = phase.name(), start, "phase started");

        let stop = 'phase: loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            let limit = match phase {
                Phase::Tail => page_size,
                Phase::Backfill => {
                    if backfill_satisfied(writer.storage, resolved.id, options, &writer.buffer)? {
                        break StopReason::TargetReached;
                    }
                    let have = writer.storage.record_count(resolved.id)?.max(0) as usize
                        + writer.buffer.len();
                    match options.target_count.checked_sub(have) {
                        Some(remaining) if remaining > 0 => remaining.min(page_size),
                        _ => page_size,
                    }
                }
            };

            let cursor = writer.fetch_cursor();
            let outcome = retry
                .run(
                    &cancel,
                    move || source.fetch_page(resolved, cursor, limit, direction),
                    || writer.flush().map(|_| ()),
                )
                .await?;

            let items = match outcome {
                RetryOutcome::Ready(items) => items,
                RetryOutcome::Cancelled => break StopReason::Cancelled,
                RetryOutcome::Exhausted {
                    attempts,
                    last_error,
                } => {
                    warn!(
                        source_id = resolved.id,
                        phase = phase.name(),
                        attempts,
                        error = %last_error,
                        "phase stopped early, keeping partial progress"
                    );
                    break StopReason::RetriesExhausted;
                }
                RetryOutcome::Fatal(msg) => {
                    writer.flush()?;
                    return Err(SyncError::SourceUnavailable(msg));
                }
            };
            pages += 1;

            if items.is_empty() {
                debug!(source_id = resolved.id, phase = phase.name(), "empty page, stream exhausted");
                break StopReason::EndOfStream;
            }

            for item in &items {
                if cancel.is_cancelled() {
                    break 'phase StopReason::Cancelled;
                }
                writer.push(source.to_record(item, resolved.id, options.store_raw));
                if writer.is_full() {
                    writer.flush()?;
                    if cancel.is_cancelled() {
                        break 'phase StopReason::Cancelled;
                    }
                    if matches!(phase, Phase::Backfill)
                        && backfill_satisfied(writer.storage, resolved.id, options, &[])?
                    {
                        break 'phase StopReason::TargetReached;
                    }
                }
            }
        };

        // Fetched records are never dropped, whatever ended the phase.
        writer.flush()?;

        let report = PhaseReport {
            inserted: writer.inserted,
            pages,
            batches: writer.batches,
            stop,
        };
        info!(
            source_id = resolved.id,
            phase = phase.name(),
            inserted = report.inserted,
            pages = report.pages,
            batches = report.batches,
            stop = ?report.stop,
            "phase finished"
        );
        Ok(report)
    }
}

/// Count and boundary goals for backfill, counting `pending` records as if
/// they were already stored.
fn backfill_satisfied(
    storage: &SqliteStorage,
    source_id: i64,
    options: &SyncOptions,
    pending: &[Record],
) -> Result<bool, StoreError> {
    let stored = storage.record_count(source_id)?.max(0) as usize;
    if stored + pending.len() < options.target_count {
        return Ok(false);
    }
    if let Some(min_date) = options.min_date_ms {
        let pending_hit = pending
            .iter()
            .any(|r| r.timestamp_ms.is_some_and(|ts| ts <= min_date));
        if !pending_hit && !storage.has_record_at_or_before_ts(source_id, min_date)? {
            return Ok(false);
        }
    }
    if let Some(min_id) = options.min_id {
        let pending_hit = pending.iter().any(|r| r.id <= min_id);
        if !pending_hit && !storage.has_record_at_or_before_id(source_id, min_id)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Buffers converted records and commits them a batch at a time.
///
/// `committed` is the resume cursor: the last id durably stored by this
/// phase (or the phase's starting boundary). It never moves on fetch alone.
struct BatchWriter<'s> {
    storage: &'s mut SqliteStorage,
    source_id: i64,
    direction: Direction,
    committed: Option<i64>,
    buffer: Vec<Record>,
    batch_size: usize,
    inserted: usize,
    batches: usize,
}

impl<'s> BatchWriter<'s> {
    fn new(
        storage: &'s mut SqliteStorage,
        source_id: i64,
        direction: Direction,
        committed: Option<i64>,
        batch_size: usize,
    ) -> Self {
        Self {
            storage,
            source_id,
            direction,
            committed,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            inserted: 0,
            batches: 0,
        }
    }

    fn push(&mut self, record: Record) {
        self.buffer.push(record);
    }

    fn is_full(&self) -> bool {
        self.buffer.len() >= self.batch_size
    }

    /// Next page position: just past the last buffered record, else the
    /// committed cursor.
    fn fetch_cursor(&self) -> Cursor {
        let position = self.buffer.last().map(|r| r.id).or(self.committed);
        match (self.direction, position) {
            (Direction::Ascending, Some(id)) => Cursor::after(id),
            (Direction::Ascending, None) => Cursor::after(0),
            (Direction::Descending, Some(id)) => Cursor::before(id),
            (Direction::Descending, None) => Cursor::newest(),
        }
    }

    fn flush(&mut self) -> Result<usize, StoreError> {
        let (Some(lo), Some(hi)) = (
            self.buffer.iter().map(|r| r.id).min(),
            self.buffer.iter().map(|r| r.id).max(),
        ) else {
            return Ok(0);
        };

        // The claim reaches back to the cursor: the source returned every id
        // between it and this batch, so nothing in between exists.
        let claim = match (self.direction, self.committed) {
            (Direction::Ascending, Some(c)) => IdSpan::new(c.saturating_add(1).min(lo), hi),
            (Direction::Descending, Some(c)) => IdSpan::new(lo, c.saturating_sub(1).max(hi)),
            (_, None) => IdSpan::new(lo, hi),
        };

        let commit = self.storage.commit_batch(self.source_id, &self.buffer, claim)?;
        self.committed = Some(match (self.direction, self.committed) {
            (Direction::Ascending, Some(c)) => c.max(hi),
            (Direction::Ascending, None) => hi,
            (Direction::Descending, Some(c)) => c.min(lo),
            (Direction::Descending, None) => lo,
        });
        self.buffer.clear();
        self.inserted += commit.inserted;
        self.batches += 1;

        debug!(
            source_id = self.source_id,
            inserted = commit.inserted,
            cursor = self.committed,
            claim_min = claim.min_id,
            claim_max = claim.max_id,
            "batch flushed"
        );
        Ok(commit.inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::jsonl::JsonlSource;

    fn dump(ids: std::ops::RangeInclusive<i64>) -> JsonlSource {
        let mut text =
            String::from("{\"type\":\"source\",\"id\":1,\"title\":\"Feed\",\"category\":\"channel\"}\n");
        for id in ids {
            text.push_str(&format!(
                "{{\"type\":\"message\",\"source_id\":1,\"id\":{id},\"date\":\"2024-01-01T00:00:{:02}Z\",\"text\":\"m{id}\"}}\n",
                id % 60
            ));
        }
        JsonlSource::from_reader(text.as_bytes()).unwrap()
    }

    fn options(target: usize, batch: usize) -> SyncOptions {
        SyncOptions {
            target_count: target,
            batch_size: batch,
            page_size: batch,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fresh_source_backfills_to_target() {
        let source = dump(1..=50);
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let mut engine = SyncEngine::new(&source, &mut storage);

        let report = engine.sync("1", &options(20, 10)).await.unwrap();
        assert_eq!(engine.state(), SyncState::Done);
        assert_eq!(report.inserted_count, 20);
        assert_eq!((report.min_id, report.max_id), (31, 50));
        assert!(report.tail.is_none());
        assert_eq!(report.backfill.as_ref().unwrap().stop, StopReason::TargetReached);
        drop(engine);

        let ranges = storage.coverage_ranges(1).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!((ranges[0].min_id, ranges[0].max_id), (31, 50));
        assert_eq!(ranges[0].record_count, 20);
    }

    #[tokio::test]
    async fn backfill_stops_at_beginning_of_stream() {
        let source = dump(1..=15);
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let report = SyncEngine::new(&source, &mut storage)
            .sync("1", &options(100, 10))
            .await
            .unwrap();
        assert_eq!(report.total_count, 15);
        assert_eq!(report.backfill.unwrap().stop, StopReason::EndOfStream);
    }

    #[tokio::test]
    async fn min_id_boundary_drives_backfill_past_target() {
        let source = dump(1..=50);
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let opts = SyncOptions {
            min_id: Some(12),
            ..options(5, 10)
        };
        let report = SyncEngine::new(&source, &mut storage)
            .sync("1", &opts)
            .await
            .unwrap();
        assert!(report.min_id <= 12);
        assert_eq!(report.min_id, 11);
    }

    #[tokio::test]
    async fn tail_sync_picks_up_newer_records() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        SyncEngine::new(&dump(1..=30), &mut storage)
            .sync("1", &options(30, 10))
            .await
            .unwrap();

        let report = SyncEngine::new(&dump(1..=45), &mut storage)
            .sync("1", &options(30, 10))
            .await
            .unwrap();
        let tail = report.tail.unwrap();
        assert_eq!(tail.inserted, 15);
        assert_eq!(tail.stop, StopReason::EndOfStream);
        assert!(report.backfill.is_none());
        assert_eq!(report.max_id, 45);
        assert_eq!(storage.cached_boundaries(1).unwrap(), (1, 45));
        assert_eq!(storage.coverage_ranges(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_before_resolve_is_reported_as_error() {
        let source = dump(1..=10);
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        SyncEngine::new(&source, &mut storage)
            .sync("1", &options(5, 5))
            .await
            .unwrap();

        let cancel = CancelSignal::new();
        cancel.cancel();
        let report = SyncEngine::new(&source, &mut storage)
            .with_cancel_signal(cancel)
            .sync("1", &options(10, 5))
            .await;
        assert!(matches!(report, Err(SyncError::Cancelled)));
        assert_eq!(storage.record_count(1).unwrap(), 5);
    }

    #[test]
    fn backfill_cursor_claims_down_to_previous_batch() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .upsert_source(&crate::model::types::Source::new(
                1,
                "x",
                crate::model::types::SourceCategory::Group,
            ))
            .unwrap();
        let mut writer = BatchWriter::new(&mut storage, 1, Direction::Descending, Some(100), 10);
        writer.push(Record::new(95, 1, 95));
        writer.push(Record::new(90, 1, 90));
        assert_eq!(writer.fetch_cursor(), Cursor::before(90));
        writer.flush().unwrap();
        assert_eq!(writer.committed, Some(90));
        drop(writer);

        let ranges = storage.coverage_ranges(1).unwrap();
        assert_eq!((ranges[0].min_id, ranges[0].max_id), (90, 99));
    }
}
