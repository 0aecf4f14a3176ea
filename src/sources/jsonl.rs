//! [`PagedSource`] over a JSONL dump.
//!
//! Each line is one tagged object:
//!
//! ```text
//! {"type":"source","id":42,"title":"Rust News","username":"rustnews","category":"channel"}
//! {"type":"user","id":7,"first_name":"Ada","last_name":"Lovelace"}
//! {"type":"message","source_id":42,"id":101,"date":"2024-03-01T12:00:00Z","sender_id":7,"text":"hi"}
//! ```
//!
//! Messages may appear in any order. The verbatim line is kept as the raw
//! payload.

use super::{
    AttachmentFlags, Cursor, Direction, FetchError, PagedSource, ResolvedSource,
    classify_attachment_kind,
};
use crate::model::types::{Record, SourceCategory};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const AUTHOR_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum JsonlError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: message references unknown source {source_id}")]
    UnknownSource { line: usize, source_id: i64 },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum DumpLine {
    Source(SourceHeader),
    User(RawUser),
    Message(RawMessage),
}

#[derive(Debug, Clone, Deserialize)]
struct SourceHeader {
    id: i64,
    title: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawUser {
    id: i64,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

impl RawUser {
    /// "First Last", else a title, else `@username`.
    fn display_name(&self) -> Option<String> {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !full.is_empty() {
            return Some(full);
        }
        self.title
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| self.username.as_ref().map(|u| format!("@{u}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawMessage {
    source_id: i64,
    id: i64,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
    #[serde(default)]
    sender_id: Option<i64>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    reply_to_msg_id: Option<i64>,
    #[serde(default)]
    has_media: bool,
    #[serde(default)]
    media: AttachmentFlags,
}

/// One message as read from the dump, with its original line.
#[derive(Debug, Clone)]
pub struct DumpItem {
    message: RawMessage,
    line: String,
}

impl DumpItem {
    pub fn id(&self) -> i64 {
        self.message.id
    }
}

pub struct JsonlSource {
    sources: Vec<SourceHeader>,
    users: HashMap<i64, RawUser>,
    messages: HashMap<i64, BTreeMap<i64, DumpItem>>,
    author_cache: Mutex<LruCache<i64, Option<String>>>,
}

impl JsonlSource {
    pub fn open(path: &Path) -> Result<Self, JsonlError> {
        let file = File::open(path).map_err(|source| JsonlError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let source = Self::from_reader(BufReader::new(file)).map_err(|e| match e {
            JsonlError::Io { source, .. } => JsonlError::Io {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!(
            path = %path.display(),
            sources = source.sources.len(),
            messages = source.messages.values().map(BTreeMap::len).sum::<usize>(),
            "loaded jsonl dump"
        );
        Ok(source)
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self, JsonlError> {
        let mut sources = Vec::new();
        let mut users = HashMap::new();
        let mut pending = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|source| JsonlError::Io {
                path: PathBuf::new(),
                source,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed: DumpLine =
                serde_json::from_str(trimmed).map_err(|source| JsonlError::Parse {
                    line: line_no,
                    source,
                })?;
            match parsed {
                DumpLine::Source(header) => sources.push(header),
                DumpLine::User(user) => {
                    users.insert(user.id, user);
                }
                DumpLine::Message(message) => pending.push((
                    line_no,
                    DumpItem {
                        message,
                        line: trimmed.to_string(),
                    },
                )),
            }
        }

        let mut messages: HashMap<i64, BTreeMap<i64, DumpItem>> = HashMap::new();
        for (line_no, item) in pending {
            let source_id = item.message.source_id;
            if !sources.iter().any(|s: &SourceHeader| s.id == source_id) {
                return Err(JsonlError::UnknownSource {
                    line: line_no,
                    source_id,
                });
            }
            messages
                .entry(source_id)
                .or_default()
                .insert(item.message.id, item);
        }

        let capacity = NonZeroUsize::new(AUTHOR_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            sources,
            users,
            messages,
            author_cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn find_source(&self, reference: &str) -> Option<&SourceHeader> {
        let reference = reference.trim();
        if let Ok(id) = reference.parse::<i64>() {
            return self.sources.iter().find(|s| s.id == id);
        }
        let handle = reference.trim_start_matches('@');
        self.sources.iter().find(|s| {
            s.username
                .as_deref()
                .is_some_and(|u| u.eq_ignore_ascii_case(handle))
        })
    }

    fn author_name(&self, sender_id: i64) -> Option<String> {
        let mut cache = self.author_cache.lock();
        if let Some(name) = cache.get(&sender_id) {
            return name.clone();
        }
        let name = self.users.get(&sender_id).and_then(RawUser::display_name);
        cache.put(sender_id, name.clone());
        name
    }

    fn page(&self, source_id: i64, cursor: Cursor, limit: usize, direction: Direction) -> Vec<DumpItem> {
        let Some(items) = self.messages.get(&source_id) else {
            return Vec::new();
        };
        let lower = cursor.after_id.map_or(i64::MIN, |id| id.saturating_add(1));
        let upper = cursor.before_id.map_or(i64::MAX, |id| id.saturating_sub(1));
        if lower > upper {
            return Vec::new();
        }
        let in_window = items.range(lower..=upper).map(|(_, item)| item);
        let ts = |item: &DumpItem| item.message.date.map(|d| d.timestamp_millis());

        match direction {
            Direction::Ascending => in_window
                .filter(|item| match (cursor.offset_date, ts(item)) {
                    (Some(offset), Some(t)) => t >= offset,
                    _ => true,
                })
                .take(limit)
                .cloned()
                .collect(),
            Direction::Descending => in_window
                .rev()
                .filter(|item| match (cursor.offset_date, ts(item)) {
                    (Some(offset), Some(t)) => t < offset,
                    _ => true,
                })
                .take(limit)
                .cloned()
                .collect(),
        }
    }
}

impl PagedSource for JsonlSource {
    type Item = DumpItem;

    async fn resolve(&self, reference: &str) -> Result<ResolvedSource, FetchError> {
        let header = self
            .find_source(reference)
            .ok_or_else(|| FetchError::Fatal(format!("could not find source '{reference}'")))?;
        let category = header
            .category
            .as_deref()
            .and_then(SourceCategory::parse)
            .unwrap_or_default();
        Ok(ResolvedSource {
            id: header.id,
            display_name: header.title.clone(),
            handle: header.username.clone(),
            category,
        })
    }

    async fn fetch_page(
        &self,
        source: &ResolvedSource,
        cursor: Cursor,
        limit: usize,
        direction: Direction,
    ) -> Result<Vec<DumpItem>, FetchError> {
        let page = self.page(source.id, cursor, limit, direction);
        debug!(
            source_id = source.id,
            ?cursor,
            ?direction,
            limit,
            returned = page.len(),
            "served page"
        );
        Ok(page)
    }

    fn to_record(&self, item: &DumpItem, source_id: i64, store_raw: bool) -> Record {
        let msg = &item.message;
        Record {
            id: msg.id,
            source_id,
            timestamp_ms: msg.date.map(|d| d.timestamp_millis()),
            author_id: msg.sender_id,
            author_name: msg.sender_id.and_then(|id| self.author_name(id)),
            body: msg.text.clone(),
            reply_target_id: msg.reply_to_msg_id,
            has_attachment: msg.has_media,
            attachment_kind: classify_attachment_kind(msg.has_media, &msg.media),
            raw_payload: store_raw.then(|| item.line.clone()),
        }
    }
}
