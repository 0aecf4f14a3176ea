use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stream_archiver::model::types::{Record, Source, SourceCategory};
use stream_archiver::sources::{
    CancelSignal, Cursor, Direction, FetchError, PagedSource, ResolvedSource,
};
use stream_archiver::storage::sqlite::SqliteStorage;

/// 2024-01-01T00:00:00Z
pub const BASE_TS: i64 = 1_704_067_200_000;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Record `id` of `source_id` with a timestamp one second per id after
/// [`BASE_TS`].
#[allow(dead_code)]
pub fn record(id: i64, source_id: i64) -> Record {
    let mut r = Record::new(id, source_id, BASE_TS + id * 1_000);
    r.author_id = Some(1000 + id % 3);
    r.author_name = Some(format!("user-{}", id % 3));
    r.body = Some(format!("message {id}"));
    r.raw_payload = Some(format!("{{\"id\":{id}}}"));
    r
}

#[allow(dead_code)]
pub fn records(ids: impl IntoIterator<Item = i64>, source_id: i64) -> Vec<Record> {
    ids.into_iter().map(|id| record(id, source_id)).collect()
}

/// In-memory store with `source_id` registered.
#[allow(dead_code)]
pub fn storage_with_source(source_id: i64) -> SqliteStorage {
    let storage = SqliteStorage::open_in_memory().expect("open in-memory store");
    storage
        .upsert_source(&Source::new(source_id, "Fixture", SourceCategory::Group))
        .expect("upsert source");
    storage
}

/// A scripted remote stream.
///
/// Serves `records` like a real paged source would, counts every request,
/// and can inject errors, stall, or raise a cancel signal on chosen fetch
/// calls (numbered from 1).
#[allow(dead_code)]
pub struct ScriptedSource {
    resolved: ResolvedSource,
    records: Mutex<BTreeMap<i64, Record>>,
    faults: Mutex<HashMap<usize, FetchError>>,
    fail_from: Mutex<Option<(usize, FetchError)>>,
    cancel_on: Mutex<Option<(usize, CancelSignal)>>,
    stall_on: Mutex<Option<(usize, Duration)>>,
    fetch_calls: AtomicUsize,
    fetched_items: AtomicUsize,
    requests: Mutex<Vec<(Cursor, usize, Direction)>>,
}

#[allow(dead_code)]
impl ScriptedSource {
    pub fn new(source_id: i64, ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            resolved: ResolvedSource {
                id: source_id,
                display_name: "Scripted Feed".into(),
                handle: Some("feed".into()),
                category: SourceCategory::Channel,
            },
            records: Mutex::new(
                ids.into_iter()
                    .map(|id| (id, record(id, source_id)))
                    .collect(),
            ),
            faults: Mutex::new(HashMap::new()),
            fail_from: Mutex::new(None),
            cancel_on: Mutex::new(None),
            stall_on: Mutex::new(None),
            fetch_calls: AtomicUsize::new(0),
            fetched_items: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail fetch call `call` once with `err`.
    pub fn fail_on(self, call: usize, err: FetchError) -> Self {
        self.faults.lock().unwrap().insert(call, err);
        self
    }

    /// Fail every fetch call from `call` on.
    pub fn fail_from(self, call: usize, err: FetchError) -> Self {
        *self.fail_from.lock().unwrap() = Some((call, err));
        self
    }

    /// Raise `signal` while serving fetch call `call`.
    pub fn cancel_on(self, call: usize, signal: CancelSignal) -> Self {
        *self.cancel_on.lock().unwrap() = Some((call, signal));
        self
    }

    /// Hang fetch call `call` for `delay` before answering. The wait does not
    /// watch any cancel signal, like a stuck network request.
    pub fn stall_on(self, call: usize, delay: Duration) -> Self {
        *self.stall_on.lock().unwrap() = Some((call, delay));
        self
    }

    pub fn push(&self, record: Record) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn fetched_items(&self) -> usize {
        self.fetched_items.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(Cursor, usize, Direction)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn reset_counters(&self) {
        self.fetch_calls.store(0, Ordering::SeqCst);
        self.fetched_items.store(0, Ordering::SeqCst);
        self.requests.lock().unwrap().clear();
        self.faults.lock().unwrap().clear();
        *self.fail_from.lock().unwrap() = None;
        *self.cancel_on.lock().unwrap() = None;
        *self.stall_on.lock().unwrap() = None;
    }

    fn serve(&self, cursor: Cursor, limit: usize, direction: Direction) -> Result<Vec<Record>, FetchError> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push((cursor, limit, direction));

        if let Some((at, signal)) = self.cancel_on.lock().unwrap().as_ref()
            && *at == call
        {
            signal.cancel();
        }
        if let Some(err) = self.faults.lock().unwrap().remove(&call) {
            return Err(err);
        }
        if let Some((from, err)) = self.fail_from.lock().unwrap().as_ref()
            && call >= *from
        {
            return Err(err.clone());
        }

        let records = self.records.lock().unwrap();
        let lower = cursor.after_id.map_or(i64::MIN, |id| id + 1);
        let upper = cursor.before_id.map_or(i64::MAX, |id| id - 1);
        if lower > upper {
            return Ok(Vec::new());
        }
        let window = records.range(lower..=upper).map(|(_, r)| r.clone());
        let page: Vec<Record> = match direction {
            Direction::Ascending => window.take(limit).collect(),
            Direction::Descending => window.rev().take(limit).collect(),
        };
        self.fetched_items.fetch_add(page.len(), Ordering::SeqCst);
        Ok(page)
    }
}

impl PagedSource for ScriptedSource {
    type Item = Record;

    async fn resolve(&self, reference: &str) -> Result<ResolvedSource, FetchError> {
        let wanted = reference.trim_start_matches('@');
        if wanted == "feed" || wanted == self.resolved.id.to_string() {
            Ok(self.resolved.clone())
        } else {
            Err(FetchError::Fatal(format!("could not find source '{reference}'")))
        }
    }

    async fn fetch_page(
        &self,
        _source: &ResolvedSource,
        cursor: Cursor,
        limit: usize,
        direction: Direction,
    ) -> Result<Vec<Record>, FetchError> {
        let stall = *self.stall_on.lock().unwrap();
        if let Some((at, delay)) = stall
            && at == self.fetch_calls() + 1
        {
            tokio::time::sleep(delay).await;
        }
        self.serve(cursor, limit, direction)
    }

    fn to_record(&self, item: &Record, source_id: i64, store_raw: bool) -> Record {
        let mut record = item.clone();
        record.source_id = source_id;
        if !store_raw {
            record.raw_payload = None;
        }
        record
    }
}
