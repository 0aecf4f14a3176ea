//! Remote stream sources and the sync engine that archives them.
//!
//! # Architecture
//!
//! - [`PagedSource`]: the capability the engine needs from a remote stream
//!   (resolve a reference, fetch one page around a cursor, convert items).
//! - **jsonl**: a [`PagedSource`] that replays a JSONL dump.
//! - **retry**: rate-limit and backoff handling shared by both sync phases.
//! - **cancel**: cooperative cancellation flag.
//! - **sync**: the orchestrator (tail sync, backfill, finalization).
//!
//! # Syncing
//!
//! ```rust,ignore
//! use stream_archiver::sources::jsonl::JsonlSource;
//! use stream_archiver::sources::sync::{SyncEngine, SyncOptions};
//!
//! let source = JsonlSource::open(&dump)?;
//! let mut engine = SyncEngine::new(&source, &mut storage);
//! let report = engine.sync("@news", &SyncOptions::default()).await?;
//! println!("{} new, {} total", report.inserted_count, report.total_count);
//! ```

pub mod cancel;
pub mod jsonl;
pub mod retry;
pub mod sync;

use crate::model::types::{AttachmentKind, Record, Source, SourceCategory};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub use cancel::CancelSignal;
pub use retry::{RetryOutcome, RetryPolicy};
pub use sync::{SyncEngine, SyncError, SyncOptions, SyncReport};

/// Failure signals a source may raise while fetching.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Flood control. Expected; the same request is retried after
    /// `retry_after` without counting as a failed attempt.
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Network or RPC hiccup. Retried with backoff.
    #[error("transient source error: {0}")]
    Transient(String),

    /// Not retryable (private stream, unknown reference, ...).
    #[error("{0}")]
    Fatal(String),
}

/// Iteration order of a page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Oldest to newest.
    Ascending,
    /// Newest to oldest.
    Descending,
}

/// Position of a page request. Id bounds are exclusive.
///
/// `offset_date` (epoch ms) restricts descending pages to records strictly
/// older than it and ascending pages to records at or after it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub after_id: Option<i64>,
    pub before_id: Option<i64>,
    pub offset_date: Option<i64>,
}

impl Cursor {
    /// Start of the stream's newest end.
    pub fn newest() -> Self {
        Self::default()
    }

    pub fn after(id: i64) -> Self {
        Self {
            after_id: Some(id),
            ..Self::default()
        }
    }

    pub fn before(id: i64) -> Self {
        Self {
            before_id: Some(id),
            ..Self::default()
        }
    }
}

/// Identity of a stream as reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSource {
    pub id: i64,
    pub display_name: String,
    pub handle: Option<String>,
    pub category: SourceCategory,
}

impl ResolvedSource {
    pub fn to_source(&self) -> Source {
        let source = Source::new(self.id, self.display_name.clone(), self.category);
        match &self.handle {
            Some(handle) => source.with_handle(handle.clone()),
            None => source,
        }
    }
}

/// A remote, paged, id-ordered message stream.
///
/// An empty page means the stream is exhausted in the requested direction.
pub trait PagedSource {
    type Item;

    fn resolve(
        &self,
        reference: &str,
    ) -> impl Future<Output = Result<ResolvedSource, FetchError>> + Send;

    fn fetch_page(
        &self,
        source: &ResolvedSource,
        cursor: Cursor,
        limit: usize,
        direction: Direction,
    ) -> impl Future<Output = Result<Vec<Self::Item>, FetchError>> + Send;

    /// Convert one raw item. `store_raw = false` must leave `raw_payload`
    /// empty.
    fn to_record(&self, item: &Self::Item, source_id: i64, store_raw: bool) -> Record;
}

/// Media markers a raw item may carry. Several can be set at once; see
/// [`classify_attachment_kind`] for precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentFlags {
    pub photo: bool,
    pub video: bool,
    pub voice: bool,
    pub audio: bool,
    pub sticker: bool,
    pub gif: bool,
    pub document: bool,
    pub web_page: bool,
}

/// Resolve the single attachment kind of an item.
///
/// `None` when the item has no media at all. Media with no recognised marker
/// is [`AttachmentKind::Other`].
pub fn classify_attachment_kind(
    has_media: bool,
    flags: &AttachmentFlags,
) -> Option<AttachmentKind> {
    if !has_media {
        return None;
    }
    let ordered = [
        (flags.photo, AttachmentKind::Photo),
        (flags.video, AttachmentKind::Video),
        (flags.voice, AttachmentKind::Voice),
        (flags.audio, AttachmentKind::Audio),
        (flags.sticker, AttachmentKind::Sticker),
        (flags.gif, AttachmentKind::Gif),
        (flags.document, AttachmentKind::Document),
        (flags.web_page, AttachmentKind::WebPage),
    ];
    Some(
        ordered
            .into_iter()
            .find_map(|(set, kind)| set.then_some(kind))
            .unwrap_or(AttachmentKind::Other),
    )
}
