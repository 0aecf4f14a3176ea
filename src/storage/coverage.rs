//! Coverage ranges: which id intervals of a source are known to be fully
//! synced, and where the holes are.
//!
//! Persistence helpers take a plain [`Connection`] so they run unchanged
//! inside the caller's transaction (a `Transaction` derefs to one).

use crate::model::types::{CoverageRange, CoverageSummary, DateGap, IdGap};
use crate::storage::sqlite::{SqliteStorage, StoreResult};
use rusqlite::{Connection, Row, params};
use tracing::debug;

/// Ranges closer than this many ids are merged. Absorbs small holes left by
/// remotely deleted records; not a guaranteed bound.
pub const TOLERANCE: i64 = 10;

/// Inclusive id interval claimed by one committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSpan {
    pub min_id: i64,
    pub max_id: i64,
}

impl IdSpan {
    pub fn new(a: i64, b: i64) -> Self {
        Self {
            min_id: a.min(b),
            max_id: a.max(b),
        }
    }
}

/// Insert a range and run the merge pass for its source. Returns the id of
/// the stored range that now covers `[min_id, max_id]`.
pub fn register_range(
    conn: &Connection,
    source_id: i64,
    min_id: i64,
    max_id: i64,
    min_ts: i64,
    max_ts: i64,
    count: i64,
) -> StoreResult<i64> {
    let span = IdSpan::new(min_id, max_id);
    let now = SqliteStorage::now_millis();
    conn.execute(
        "INSERT INTO coverage_ranges
            (source_id, min_id, max_id, min_ts, max_ts, record_count, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            source_id,
            span.min_id,
            span.max_id,
            min_ts.min(max_ts),
            min_ts.max(max_ts),
            count,
            now,
            now
        ],
    )?;
    let inserted_id = conn.last_insert_rowid();

    merge_pass(conn, source_id)?;

    let covering = load_ranges(conn, source_id)?
        .into_iter()
        .find(|r| r.min_id <= span.min_id && r.max_id >= span.max_id)
        .and_then(|r| r.id);
    Ok(covering.unwrap_or(inserted_id))
}

/// Fold `ranges` (any order) into a disjoint list sorted by `min_id`.
///
/// A range joins the running accumulator when it starts no further than
/// [`TOLERANCE`] ids past the accumulator's end. The accumulator keeps its
/// own id and creation time.
pub fn merge_ranges(mut ranges: Vec<CoverageRange>) -> Vec<CoverageRange> {
    ranges.sort_by_key(|r| (r.min_id, r.max_id));

    let mut merged: Vec<CoverageRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(acc) if range.min_id <= acc.max_id.saturating_add(TOLERANCE) => {
                acc.max_id = acc.max_id.max(range.max_id);
                acc.min_ts = acc.min_ts.min(range.min_ts);
                acc.max_ts = acc.max_ts.max(range.max_ts);
                acc.record_count += range.record_count;
                acc.created_at = acc.created_at.min(range.created_at);
                acc.updated_at = acc.updated_at.max(range.updated_at);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Merge the stored ranges of a source. When anything merged, the stored set
/// is replaced wholesale by the folded one. Returns the range count after the
/// pass.
pub fn merge_pass(conn: &Connection, source_id: i64) -> StoreResult<usize> {
    let ranges = load_ranges(conn, source_id)?;
    let before = ranges.len();
    let merged = merge_ranges(ranges);
    if merged.len() == before {
        return Ok(before);
    }

    let now = SqliteStorage::now_millis();
    conn.execute(
        "DELETE FROM coverage_ranges WHERE source_id = ?",
        params![source_id],
    )?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO coverage_ranges
            (id, source_id, min_id, max_id, min_ts, max_ts, record_count, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for r in &merged {
        stmt.execute(params![
            r.id,
            source_id,
            r.min_id,
            r.max_id,
            r.min_ts,
            r.max_ts,
            r.record_count,
            r.created_at,
            now
        ])?;
    }

    debug!(source_id, before, after = merged.len(), "coverage ranges merged");
    Ok(merged.len())
}

pub fn load_ranges(conn: &Connection, source_id: i64) -> StoreResult<Vec<CoverageRange>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, source_id, min_id, max_id, min_ts, max_ts, record_count, created_at, updated_at
         FROM coverage_ranges WHERE source_id = ? ORDER BY min_id, max_id",
    )?;
    let rows = stmt.query_map(params![source_id], range_from_row)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn range_from_row(row: &Row<'_>) -> rusqlite::Result<CoverageRange> {
    Ok(CoverageRange {
        id: row.get(0)?,
        source_id: row.get(1)?,
        min_id: row.get(2)?,
        max_id: row.get(3)?,
        min_ts: row.get(4)?,
        max_ts: row.get(5)?,
        record_count: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Id gaps between `ranges` (sorted by `min_id`, disjoint), clipped to the
/// optional target window.
///
/// With no ranges the whole window is one gap, but only when both bounds are
/// given; an open-ended window has nothing to report.
pub fn id_gaps(
    ranges: &[CoverageRange],
    target_min: Option<i64>,
    target_max: Option<i64>,
) -> Vec<IdGap> {
    let (Some(first), Some(last)) = (ranges.first(), ranges.last()) else {
        return match (target_min, target_max) {
            (Some(lo), Some(hi)) if lo <= hi => vec![IdGap {
                start_id: lo,
                end_id: hi,
            }],
            _ => Vec::new(),
        };
    };

    let mut raw = Vec::new();
    if let Some(lo) = target_min
        && lo < first.min_id
    {
        raw.push((lo, first.min_id.saturating_sub(1)));
    }
    for pair in ranges.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let (start, end) = (prev.max_id.saturating_add(1), next.min_id.saturating_sub(1));
        if start <= end {
            raw.push((start, end));
        }
    }
    if let Some(hi) = target_max
        && hi > last.max_id
    {
        raw.push((last.max_id.saturating_add(1), hi));
    }

    raw.into_iter()
        .filter_map(|(start, end)| {
            let start = target_min.map_or(start, |lo| start.max(lo));
            let end = target_max.map_or(end, |hi| end.min(hi));
            (start <= end).then_some(IdGap {
                start_id: start,
                end_id: end,
            })
        })
        .collect()
}

/// Timestamp gaps inside `[start_ts, end_ts]`.
///
/// Only ranges overlapping the window split it. Gap edges sit on the
/// neighbouring ranges' timestamps; the id hints come from the nearest range
/// on each side, looking at every range of the source.
pub fn date_gaps(ranges: &[CoverageRange], start_ts: i64, end_ts: i64) -> Vec<DateGap> {
    let nearest_before = |ts: i64| {
        ranges
            .iter()
            .filter(|r| r.max_ts < ts)
            .max_by_key(|r| r.max_ts)
            .map(|r| r.max_id.saturating_add(1))
    };
    let nearest_after = |ts: i64| {
        ranges
            .iter()
            .filter(|r| r.min_ts > ts)
            .min_by_key(|r| r.min_ts)
            .map(|r| r.min_id.saturating_sub(1))
    };

    let relevant: Vec<&CoverageRange> = ranges
        .iter()
        .filter(|r| r.max_ts >= start_ts && r.min_ts <= end_ts)
        .collect();

    let (Some(first), Some(last)) = (relevant.first(), relevant.last()) else {
        return vec![DateGap {
            start_ts,
            end_ts,
            approx_start_id: nearest_before(start_ts),
            approx_end_id: nearest_after(end_ts),
        }];
    };

    let mut gaps = Vec::new();
    if first.min_ts > start_ts {
        gaps.push(DateGap {
            start_ts,
            end_ts: first.min_ts,
            approx_start_id: nearest_before(start_ts),
            approx_end_id: Some(first.min_id.saturating_sub(1)),
        });
    }
    for pair in relevant.windows(2) {
        let (cur, next) = (pair[0], pair[1]);
        if next.min_ts > cur.max_ts {
            gaps.push(DateGap {
                start_ts: cur.max_ts,
                end_ts: next.min_ts,
                approx_start_id: Some(cur.max_id.saturating_add(1)),
                approx_end_id: Some(next.min_id.saturating_sub(1)),
            });
        }
    }
    if last.max_ts < end_ts {
        gaps.push(DateGap {
            start_ts: last.max_ts,
            end_ts,
            approx_start_id: Some(last.max_id.saturating_add(1)),
            approx_end_id: nearest_after(end_ts),
        });
    }
    gaps
}

/// Reporting view over a source's ranges. Empty input gives the default
/// (all zero, no gaps) summary.
pub fn summarize(ranges: Vec<CoverageRange>) -> CoverageSummary {
    if ranges.is_empty() {
        return CoverageSummary::default();
    }
    let gaps = id_gaps(&ranges, None, None);
    CoverageSummary {
        total_records: ranges.iter().map(|r| r.record_count).sum(),
        total_ranges: ranges.len(),
        has_gaps: !gaps.is_empty(),
        gaps,
        oldest_ts: ranges.iter().map(|r| r.min_ts).min(),
        newest_ts: ranges.iter().map(|r| r.max_ts).max(),
        ranges,
    }
}
