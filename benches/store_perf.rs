use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use stream_archiver::model::types::{CoverageRange, Record, Source, SourceCategory};
use stream_archiver::storage::coverage::{IdSpan, merge_ranges};
use stream_archiver::storage::sqlite::{ExportFilter, SqliteStorage};

const SOURCE: i64 = 1;
const BASE_TS: i64 = 1_704_067_200_000;

fn record(id: i64) -> Record {
    let mut r = Record::new(id, SOURCE, BASE_TS + id * 1_000);
    r.author_id = Some(id % 17);
    r.author_name = Some(format!("user-{}", id % 17));
    r.body = Some(format!("message body number {id} with a little padding text"));
    r.raw_payload = Some(format!("{{\"id\":{id},\"text\":\"message body number {id}\"}}"));
    r
}

fn fresh_storage() -> SqliteStorage {
    let storage = SqliteStorage::open_in_memory().expect("open");
    storage
        .upsert_source(&Source::new(SOURCE, "Bench", SourceCategory::Channel))
        .expect("source");
    storage
}

// =============================================================================
// Batch commit
// =============================================================================

/// One transaction per batch: insert plus coverage claim.
fn bench_commit_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_batch");
    for size in [100usize, 1_000] {
        let batch: Vec<Record> = (1..=size as i64).rev().map(record).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter_batched(
                fresh_storage,
                |mut storage| {
                    let commit = storage
                        .commit_batch(SOURCE, &batch, IdSpan::new(1, size as i64))
                        .expect("commit");
                    black_box(commit);
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

/// Re-submitting an already stored batch (the crash-resume path).
fn bench_commit_duplicates(c: &mut Criterion) {
    let batch: Vec<Record> = (1..=1_000).map(record).collect();
    let mut storage = fresh_storage();
    storage
        .commit_batch(SOURCE, &batch, IdSpan::new(1, 1_000))
        .expect("seed");

    c.bench_function("commit_batch_all_duplicates_1000", |b| {
        b.iter(|| {
            let commit = storage
                .commit_batch(SOURCE, &batch, IdSpan::new(1, 1_000))
                .expect("commit");
            black_box(commit.inserted)
        })
    });
}

// =============================================================================
// Coverage
// =============================================================================

/// Pure fold over many small, partly adjacent ranges.
fn bench_merge_ranges(c: &mut Criterion) {
    let ranges: Vec<CoverageRange> = (0..2_000i64)
        .map(|i| {
            // Every fifth range leaves a hole wider than the merge tolerance.
            let start = i * 100 + (i / 5) * 50;
            CoverageRange {
                id: Some(i),
                source_id: SOURCE,
                min_id: start,
                max_id: start + 99,
                min_ts: BASE_TS + start * 1_000,
                max_ts: BASE_TS + (start + 99) * 1_000,
                record_count: 100,
                created_at: 0,
                updated_at: 0,
            }
        })
        .rev()
        .collect();

    c.bench_function("merge_ranges_2000", |b| {
        b.iter_batched(
            || ranges.clone(),
            |ranges| black_box(merge_ranges(ranges)),
            BatchSize::SmallInput,
        )
    });
}

/// Summary over a store holding many disjoint ranges.
fn bench_coverage_summary(c: &mut Criterion) {
    let mut storage = fresh_storage();
    for i in 0..200i64 {
        let start = i * 1_000;
        storage
            .register_range(
                SOURCE,
                start,
                start + 499,
                BASE_TS + start,
                BASE_TS + start + 499,
                500,
            )
            .expect("register");
    }

    c.bench_function("coverage_summary_200_ranges", |b| {
        b.iter(|| black_box(storage.coverage_summary(SOURCE).expect("summary")))
    });
}

// =============================================================================
// Export
// =============================================================================

fn bench_export_last_n(c: &mut Criterion) {
    let mut storage = fresh_storage();
    let batch: Vec<Record> = (1..=10_000).map(record).collect();
    storage.insert_records(&batch).expect("seed");
    let filter = ExportFilter {
        last_n: Some(500),
        ..Default::default()
    };

    c.bench_function("export_last_500_of_10000", |b| {
        b.iter(|| black_box(storage.records_for_export(SOURCE, &filter).expect("export")))
    });
}

criterion_group!(
    benches,
    bench_commit_batch,
    bench_commit_duplicates,
    bench_merge_ranges,
    bench_coverage_summary,
    bench_export_last_n,
);

criterion_main!(benches);
