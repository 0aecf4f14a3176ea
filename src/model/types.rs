//! Normalized entity structs.

use serde::{Deserialize, Serialize};

/// Classification of a remote stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    /// One-to-one conversation with a single account.
    User,
    /// Multi-member discussion (basic groups and supergroups).
    Group,
    /// Broadcast stream.
    Channel,
    #[default]
    Unknown,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Channel => "channel",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Self::User),
            "group" => Some(Self::Group),
            "channel" => Some(Self::Channel),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A remote message stream as stored locally.
///
/// `known_min_id` / `known_max_id` are a cache. They are only ever written
/// from the live record aggregate after a sync and move monotonically; the
/// authoritative boundaries are always [`crate::storage::sqlite::SqliteStorage::record_boundaries`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub display_name: String,
    /// Public handle (e.g. a username), when the stream has one.
    pub handle: Option<String>,
    pub category: SourceCategory,
    pub known_min_id: i64,
    pub known_max_id: i64,
    /// Epoch milliseconds (UTC) of the last finished sync.
    pub last_sync_ms: Option<i64>,
}

impl Source {
    pub fn new(id: i64, display_name: impl Into<String>, category: SourceCategory) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            handle: None,
            category,
            known_min_id: 0,
            known_max_id: 0,
            last_sync_ms: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }
}

/// Kind of attachment carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Photo,
    Video,
    Voice,
    Audio,
    Sticker,
    Gif,
    Document,
    WebPage,
    Other,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Voice => "voice",
            Self::Audio => "audio",
            Self::Sticker => "sticker",
            Self::Gif => "gif",
            Self::Document => "document",
            Self::WebPage => "web_page",
            Self::Other => "other",
        }
    }

    /// Unrecognised tags map to [`AttachmentKind::Other`] so rows written by
    /// a newer build still load.
    pub fn parse(s: &str) -> Self {
        match s {
            "photo" => Self::Photo,
            "video" => Self::Video,
            "voice" => Self::Voice,
            "audio" => Self::Audio,
            "sticker" => Self::Sticker,
            "gif" => Self::Gif,
            "document" => Self::Document,
            "web_page" => Self::WebPage,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One archived message, keyed by `(id, source_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub source_id: i64,
    /// Epoch milliseconds (UTC). Required for persistence; `None` is only
    /// representable so the store can reject it explicitly.
    pub timestamp_ms: Option<i64>,
    pub author_id: Option<i64>,
    pub author_name: Option<String>,
    pub body: Option<String>,
    pub reply_target_id: Option<i64>,
    pub has_attachment: bool,
    pub attachment_kind: Option<AttachmentKind>,
    /// Opaque serialized payload, stored verbatim.
    pub raw_payload: Option<String>,
}

impl Record {
    pub fn new(id: i64, source_id: i64, timestamp_ms: i64) -> Self {
        Self {
            id,
            source_id,
            timestamp_ms: Some(timestamp_ms),
            author_id: None,
            author_name: None,
            body: None,
            reply_target_id: None,
            has_attachment: false,
            attachment_kind: None,
            raw_payload: None,
        }
    }
}

/// A claim that every remote record with an id in `[min_id, max_id]` has been
/// fetched and stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRange {
    pub id: Option<i64>,
    pub source_id: i64,
    pub min_id: i64,
    pub max_id: i64,
    pub min_ts: i64,
    pub max_ts: i64,
    pub record_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Inclusive id interval not covered by any [`CoverageRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdGap {
    pub start_id: i64,
    pub end_id: i64,
}

/// Timestamp interval not covered by any [`CoverageRange`].
///
/// The id bounds are hints derived from the neighbouring ranges; remote id
/// density is not uniform over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateGap {
    pub start_ts: i64,
    pub end_ts: i64,
    pub approx_start_id: Option<i64>,
    pub approx_end_id: Option<i64>,
}

/// Aggregate coverage view for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub ranges: Vec<CoverageRange>,
    pub total_records: i64,
    pub total_ranges: usize,
    pub has_gaps: bool,
    pub gaps: Vec<IdGap>,
    pub oldest_ts: Option<i64>,
    pub newest_ts: Option<i64>,
}
