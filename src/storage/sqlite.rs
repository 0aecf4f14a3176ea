//! `SQLite` backend: schema, pragmas, migrations, and the message store.

use crate::model::types::{
    AttachmentKind, CoverageRange, CoverageSummary, DateGap, IdGap, Record, Source, SourceCategory,
};
use crate::storage::coverage::{self, IdSpan};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by the local store.
///
/// Duplicate inserts are deliberately absent: re-delivery of an already stored
/// record is reported through the normal return value.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {record_id} has no timestamp and cannot be stored")]
    MissingTimestamp { record_id: i64 },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("unknown source category '{0}'")]
    UnknownSourceCategory(String),

    #[error("could not create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Public schema version constant for external checks.
pub const CURRENT_SCHEMA_VERSION: i64 = SCHEMA_VERSION;

const SCHEMA_VERSION: i64 = 2;

const MIGRATION_V1: &str = r"
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY,
    display_name TEXT NOT NULL,
    handle TEXT,
    category TEXT NOT NULL,
    known_min_id INTEGER NOT NULL DEFAULT 0,
    known_max_id INTEGER NOT NULL DEFAULT 0,
    last_sync_ms INTEGER
);
CREATE INDEX IF NOT EXISTS idx_sources_handle ON sources(handle);

CREATE TABLE IF NOT EXISTS records (
    id INTEGER NOT NULL,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    ts_ms INTEGER NOT NULL,
    author_id INTEGER,
    author_name TEXT,
    body TEXT,
    reply_target_id INTEGER,
    has_attachment INTEGER NOT NULL DEFAULT 0,
    attachment_kind TEXT,
    raw_payload TEXT,
    PRIMARY KEY (id, source_id)
);
CREATE INDEX IF NOT EXISTS idx_records_ts ON records(source_id, ts_ms);
CREATE INDEX IF NOT EXISTS idx_records_id ON records(source_id, id);

-- Contiguous id intervals known to be fully synced, per source.
CREATE TABLE IF NOT EXISTS coverage_ranges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    min_id INTEGER NOT NULL,
    max_id INTEGER NOT NULL,
    min_ts INTEGER NOT NULL,
    max_ts INTEGER NOT NULL,
    record_count INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_coverage_source ON coverage_ranges(source_id, min_id);
";

const MIGRATION_V2: &str = r"
-- Reply lookups for the export self-join
CREATE INDEX IF NOT EXISTS idx_records_reply ON records(source_id, reply_target_id);
";

const RECORD_COLUMNS: &str = "id, source_id, ts_ms, author_id, author_name, body, \
     reply_target_id, has_attachment, attachment_kind, raw_payload";

/// Sort direction for record queries. Ties on timestamp break on id in the
/// same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Filters for [`SqliteStorage::query_records`].
///
/// Timestamp bounds are inclusive, id bounds exclusive. `limit: Some(0)`
/// returns nothing; `None` means unlimited.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub since_id: Option<i64>,
    pub until_id: Option<i64>,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub limit: Option<usize>,
    pub order: SortOrder,
}

/// Filters for [`SqliteStorage::records_for_export`]. `last_n` is exclusive
/// with every other field.
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    pub last_n: Option<usize>,
    pub since_id: Option<i64>,
    pub until_id: Option<i64>,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
}

impl ExportFilter {
    pub fn validate(&self) -> StoreResult<()> {
        if let Some(n) = self.last_n {
            if n == 0 {
                return Err(StoreError::InvalidFilter("last_n must be positive".into()));
            }
            if self.since_id.is_some()
                || self.until_id.is_some()
                || self.start_ts.is_some()
                || self.end_ts.is_some()
            {
                return Err(StoreError::InvalidFilter(
                    "last_n cannot be combined with since_id, until_id, start or end".into(),
                ));
            }
        }
        if let (Some(since), Some(until)) = (self.since_id, self.until_id)
            && since >= until
        {
            return Err(StoreError::InvalidFilter(format!(
                "since_id ({since}) must be less than until_id ({until})"
            )));
        }
        if let (Some(start), Some(end)) = (self.start_ts, self.end_ts)
            && start > end
        {
            return Err(StoreError::InvalidFilter(format!(
                "start ({start}) must not be after end ({end})"
            )));
        }
        Ok(())
    }
}

/// A record plus the author name of the record it replies to, if stored.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExportRow {
    #[serde(flatten)]
    pub record: Record,
    pub reply_author_name: Option<String>,
}

/// Outcome of [`SqliteStorage::commit_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCommit {
    pub inserted: usize,
    pub range_registered: bool,
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)?;
        apply_pragmas(&mut conn)?;
        init_meta(&mut conn)?;
        migrate(&mut conn)?;

        info!(path = %path.display(), "opened archive database");
        Ok(Self { conn })
    }

    /// Throwaway database, mostly for tests and benches.
    pub fn open_in_memory() -> StoreResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        apply_common_pragmas(&conn)?;
        init_meta(&mut conn)?;
        migrate(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn raw(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> StoreResult<i64> {
        read_schema_version(&self.conn)
    }

    pub fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // Sources
    // -------------------------------------------------------------------------

    /// Create or refresh a source's descriptive fields. Cached boundaries and
    /// the last sync time are left alone.
    pub fn upsert_source(&self, source: &Source) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO sources(id, display_name, handle, category) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                handle = excluded.handle,
                category = excluded.category",
            params![
                source.id,
                source.display_name,
                source.handle,
                source.category.as_str()
            ],
        )?;
        Ok(())
    }

    pub fn get_source(&self, id: i64) -> StoreResult<Option<Source>> {
        let found = self
            .conn
            .query_row(
                "SELECT id, display_name, handle, category, known_min_id, known_max_id, last_sync_ms
                 FROM sources WHERE id = ?",
                params![id],
                source_from_row,
            )
            .optional()?;
        found.transpose()
    }

    pub fn list_sources(&self) -> StoreResult<Vec<Source>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name, handle, category, known_min_id, known_max_id, last_sync_ms
             FROM sources ORDER BY id",
        )?;
        let rows = stmt.query_map([], source_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    /// Cached `(known_min_id, known_max_id)`; `(0, 0)` for unknown sources.
    pub fn cached_boundaries(&self, source_id: i64) -> StoreResult<(i64, i64)> {
        Ok(self
            .conn
            .query_row(
                "SELECT known_min_id, known_max_id FROM sources WHERE id = ?",
                params![source_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .unwrap_or((0, 0)))
    }

    /// Move the cached boundaries outward and stamp the sync time.
    ///
    /// The minimum only decreases (or is set when still 0), the maximum only
    /// increases.
    pub fn update_source_boundaries(
        &self,
        source_id: i64,
        min_id: Option<i64>,
        max_id: Option<i64>,
    ) -> StoreResult<()> {
        if let Some(min_id) = min_id {
            self.conn.execute(
                "UPDATE sources SET known_min_id = ?1
                 WHERE id = ?2 AND (known_min_id = 0 OR known_min_id > ?1)",
                params![min_id, source_id],
            )?;
        }
        if let Some(max_id) = max_id {
            self.conn.execute(
                "UPDATE sources SET known_max_id = ?1 WHERE id = ?2 AND known_max_id < ?1",
                params![max_id, source_id],
            )?;
        }
        self.conn.execute(
            "UPDATE sources SET last_sync_ms = ? WHERE id = ?",
            params![Self::now_millis(), source_id],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Records
    // -------------------------------------------------------------------------

    /// Insert one record. Returns `false` when `(id, source_id)` is already
    /// stored.
    pub fn insert_record(&self, record: &Record) -> StoreResult<bool> {
        let ts = require_timestamp(record)?;
        Ok(insert_record_row(&self.conn, record, ts)? == 1)
    }

    /// Insert a set of records atomically, returning how many rows were new.
    ///
    /// Every record is validated before anything is written, so a missing
    /// timestamp leaves the store untouched.
    pub fn insert_records(&mut self, records: &[Record]) -> StoreResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let timestamps = records
            .iter()
            .map(require_timestamp)
            .collect::<StoreResult<Vec<_>>>()?;

        let tx = self.conn.transaction()?;
        let inserted = insert_record_rows(&tx, records, &timestamps)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Commit one sync batch: insert the records and, when at least one of
    /// them was new, register `claim` with the coverage tracker. Both happen
    /// in a single transaction so coverage never outruns stored data.
    pub fn commit_batch(
        &mut self,
        source_id: i64,
        records: &[Record],
        claim: IdSpan,
    ) -> StoreResult<BatchCommit> {
        if records.is_empty() {
            return Ok(BatchCommit::default());
        }
        let timestamps = records
            .iter()
            .map(require_timestamp)
            .collect::<StoreResult<Vec<_>>>()?;

        let tx = self.conn.transaction()?;
        let inserted = insert_record_rows(&tx, records, &timestamps)?;

        let mut range_registered = false;
        if inserted > 0 {
            let min_ts = timestamps.iter().copied().min().unwrap_or_default();
            let max_ts = timestamps.iter().copied().max().unwrap_or_default();
            coverage::register_range(
                &tx,
                source_id,
                claim.min_id,
                claim.max_id,
                min_ts,
                max_ts,
                inserted as i64,
            )?;
            range_registered = true;
        }

        tx.commit()?;
        debug!(
            source_id,
            batch = records.len(),
            inserted,
            claim_min = claim.min_id,
            claim_max = claim.max_id,
            "batch committed"
        );
        Ok(BatchCommit {
            inserted,
            range_registered,
        })
    }

    pub fn query_records(&self, source_id: i64, query: &RecordQuery) -> StoreResult<Vec<Record>> {
        let mut conditions = vec!["source_id = ?"];
        let mut args: Vec<Value> = vec![Value::Integer(source_id)];

        if let Some(since_id) = query.since_id {
            conditions.push("id > ?");
            args.push(Value::Integer(since_id));
        }
        if let Some(until_id) = query.until_id {
            conditions.push("id < ?");
            args.push(Value::Integer(until_id));
        }
        if let Some(start) = query.start_ts {
            conditions.push("ts_ms >= ?");
            args.push(Value::Integer(start));
        }
        if let Some(end) = query.end_ts {
            conditions.push("ts_ms <= ?");
            args.push(Value::Integer(end));
        }

        let order = query.order.sql();
        let mut sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE {} ORDER BY ts_ms {order}, id {order}",
            conditions.join(" AND ")
        );
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(limit as i64));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), record_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Records in chronological order for export, each with the author name
    /// of its reply target.
    pub fn records_for_export(
        &self,
        source_id: i64,
        filter: &ExportFilter,
    ) -> StoreResult<Vec<ExportRow>> {
        filter.validate()?;

        let (sql, args) = if let Some(last_n) = filter.last_n {
            (
                format!(
                    "SELECT m.id, m.source_id, m.ts_ms, m.author_id, m.author_name, m.body,
                            m.reply_target_id, m.has_attachment, m.attachment_kind, m.raw_payload,
                            r.author_name
                     FROM (
                         SELECT {RECORD_COLUMNS} FROM records WHERE source_id = ?
                         ORDER BY ts_ms DESC, id DESC LIMIT ?
                     ) m
                     LEFT JOIN records r ON r.source_id = m.source_id AND r.id = m.reply_target_id
                     ORDER BY m.ts_ms ASC, m.id ASC"
                ),
                vec![Value::Integer(source_id), Value::Integer(last_n as i64)],
            )
        } else {
            let mut conditions = vec!["m.source_id = ?"];
            let mut args = vec![Value::Integer(source_id)];
            if let Some(since_id) = filter.since_id {
                conditions.push("m.id > ?");
                args.push(Value::Integer(since_id));
            }
            if let Some(until_id) = filter.until_id {
                conditions.push("m.id < ?");
                args.push(Value::Integer(until_id));
            }
            if let Some(start) = filter.start_ts {
                conditions.push("m.ts_ms >= ?");
                args.push(Value::Integer(start));
            }
            if let Some(end) = filter.end_ts {
                conditions.push("m.ts_ms <= ?");
                args.push(Value::Integer(end));
            }
            (
                format!(
                    "SELECT m.id, m.source_id, m.ts_ms, m.author_id, m.author_name, m.body,
                            m.reply_target_id, m.has_attachment, m.attachment_kind, m.raw_payload,
                            r.author_name
                     FROM records m
                     LEFT JOIN records r ON r.source_id = m.source_id AND r.id = m.reply_target_id
                     WHERE {}
                     ORDER BY m.ts_ms ASC, m.id ASC",
                    conditions.join(" AND ")
                ),
                args,
            )
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok(ExportRow {
                record: record_from_row(row)?,
                reply_author_name: row.get(10)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Live `(MIN(id), MAX(id))` over stored records; `(0, 0)` when empty.
    /// This, not the cached source columns, is the source of truth after a
    /// crash.
    pub fn record_boundaries(&self, source_id: i64) -> StoreResult<(i64, i64)> {
        let (min, max): (Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT MIN(id), MAX(id) FROM records WHERE source_id = ?",
            params![source_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((min.unwrap_or(0), max.unwrap_or(0)))
    }

    pub fn record_count(&self, source_id: i64) -> StoreResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE source_id = ?",
            params![source_id],
            |row| row.get(0),
        )?)
    }

    pub fn oldest_record_ts(&self, source_id: i64) -> StoreResult<Option<i64>> {
        Ok(self.conn.query_row(
            "SELECT MIN(ts_ms) FROM records WHERE source_id = ?",
            params![source_id],
            |row| row.get(0),
        )?)
    }

    pub fn has_record_at_or_before_ts(&self, source_id: i64, ts_ms: i64) -> StoreResult<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM records WHERE source_id = ? AND ts_ms <= ? LIMIT 1",
                params![source_id, ts_ms],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    pub fn has_record_at_or_before_id(&self, source_id: i64, id: i64) -> StoreResult<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM records WHERE source_id = ? AND id <= ? LIMIT 1",
                params![source_id, id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    // -------------------------------------------------------------------------
    // Coverage
    // -------------------------------------------------------------------------

    /// Register a range outside of a batch commit (imports, repairs). Runs in
    /// its own transaction.
    pub fn register_range(
        &mut self,
        source_id: i64,
        min_id: i64,
        max_id: i64,
        min_ts: i64,
        max_ts: i64,
        count: i64,
    ) -> StoreResult<i64> {
        let tx = self.conn.transaction()?;
        let id = coverage::register_range(&tx, source_id, min_id, max_id, min_ts, max_ts, count)?;
        tx.commit()?;
        Ok(id)
    }

    /// Re-run the merge pass for a source without adding a range.
    pub fn merge_coverage(&mut self, source_id: i64) -> StoreResult<usize> {
        let tx = self.conn.transaction()?;
        let remaining = coverage::merge_pass(&tx, source_id)?;
        tx.commit()?;
        Ok(remaining)
    }

    pub fn coverage_ranges(&self, source_id: i64) -> StoreResult<Vec<CoverageRange>> {
        coverage::load_ranges(&self.conn, source_id)
    }

    pub fn gaps_in_id_range(
        &self,
        source_id: i64,
        target_min: Option<i64>,
        target_max: Option<i64>,
    ) -> StoreResult<Vec<IdGap>> {
        let ranges = coverage::load_ranges(&self.conn, source_id)?;
        Ok(coverage::id_gaps(&ranges, target_min, target_max))
    }

    pub fn gaps_in_date_range(
        &self,
        source_id: i64,
        start_ts: i64,
        end_ts: i64,
    ) -> StoreResult<Vec<DateGap>> {
        let ranges = coverage::load_ranges(&self.conn, source_id)?;
        Ok(coverage::date_gaps(&ranges, start_ts, end_ts))
    }

    pub fn coverage_summary(&self, source_id: i64) -> StoreResult<CoverageSummary> {
        let ranges = coverage::load_ranges(&self.conn, source_id)?;
        Ok(coverage::summarize(ranges))
    }
}

fn require_timestamp(record: &Record) -> StoreResult<i64> {
    record.timestamp_ms.ok_or(StoreError::MissingTimestamp {
        record_id: record.id,
    })
}

const INSERT_RECORD_SQL: &str = "INSERT INTO records
    (id, source_id, ts_ms, author_id, author_name, body,
     reply_target_id, has_attachment, attachment_kind, raw_payload)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id, source_id) DO NOTHING";

fn insert_record_row(conn: &Connection, record: &Record, ts_ms: i64) -> StoreResult<usize> {
    let mut stmt = conn.prepare_cached(INSERT_RECORD_SQL)?;
    Ok(stmt.execute(params![
        record.id,
        record.source_id,
        ts_ms,
        record.author_id,
        record.author_name,
        record.body,
        record.reply_target_id,
        record.has_attachment,
        record.attachment_kind.map(|k| k.as_str()),
        record.raw_payload,
    ])?)
}

fn insert_record_rows(conn: &Connection, records: &[Record], timestamps: &[i64]) -> StoreResult<usize> {
    let mut inserted = 0;
    for (record, ts) in records.iter().zip(timestamps) {
        inserted += insert_record_row(conn, record, *ts)?;
    }
    Ok(inserted)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let kind: Option<String> = row.get(8)?;
    Ok(Record {
        id: row.get(0)?,
        source_id: row.get(1)?,
        timestamp_ms: Some(row.get(2)?),
        author_id: row.get(3)?,
        author_name: row.get(4)?,
        body: row.get(5)?,
        reply_target_id: row.get(6)?,
        has_attachment: row.get(7)?,
        attachment_kind: kind.as_deref().map(AttachmentKind::parse),
        raw_payload: row.get(9)?,
    })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<StoreResult<Source>> {
    let category: String = row.get(3)?;
    let Some(category) = SourceCategory::parse(&category) else {
        return Ok(Err(StoreError::UnknownSourceCategory(category)));
    };
    Ok(Ok(Source {
        id: row.get(0)?,
        display_name: row.get(1)?,
        handle: row.get(2)?,
        category,
        known_min_id: row.get(4)?,
        known_max_id: row.get(5)?,
        last_sync_ms: row.get(6)?,
    }))
}

fn apply_pragmas(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch(
        r"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;
    apply_common_pragmas(conn)
}

fn apply_common_pragmas(conn: &Connection) -> StoreResult<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        r"
        PRAGMA temp_store = MEMORY;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

fn read_schema_version(conn: &Connection) -> StoreResult<i64> {
    Ok(conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?
        .unwrap_or(0))
}

fn init_meta(conn: &mut Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    // Start at version 0 so migrate() applies the full schema on first open.
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES('schema_version', '0')",
        [],
    )?;
    Ok(())
}

fn migrate(conn: &mut Connection) -> StoreResult<()> {
    let current = read_schema_version(conn)?;

    if current == SCHEMA_VERSION {
        return Ok(());
    }
    if current > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction()?;

    if current < 1 {
        tx.execute_batch(MIGRATION_V1)?;
    }
    if current < 2 {
        tx.execute_batch(MIGRATION_V2)?;
    }

    tx.execute(
        "UPDATE meta SET value = ? WHERE key = 'schema_version'",
        params![SCHEMA_VERSION.to_string()],
    )?;
    tx.commit()?;

    info!(from = current, to = SCHEMA_VERSION, "migrated archive schema");
    Ok(())
}
