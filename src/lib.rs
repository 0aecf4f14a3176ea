pub mod config;
pub mod model;
pub mod sources;
pub mod storage;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand};
use config::ArchiverConfig;
use model::types::Source;
use sources::jsonl::JsonlSource;
use sources::{CancelSignal, SyncEngine, SyncError, SyncOptions, SyncReport};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use storage::sqlite::{ExportFilter, SqliteStorage};
use tracing::{error, info, warn};

/// Exit code for a sync stopped by Ctrl+C or SIGTERM.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "sarc",
    version,
    about = "Incremental, resumable archiver for paged message streams"
)]
pub struct Cli {
    /// Path to the SQLite database (defaults to ARCHIVER_DB, then the platform data dir)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Errors only (wins over --verbose)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Archive a source: pull newer records, then backfill toward the target
    Sync(SyncArgs),
    /// List archived sources
    Sources {
        #[arg(long)]
        json: bool,
    },
    /// Show synced ranges and gaps for a source
    Coverage {
        /// Source id or @handle
        source: String,
        #[arg(long)]
        json: bool,
    },
    /// List unsynced id or date intervals for a source
    Gaps(GapsArgs),
    /// Print archived records in chronological order
    Messages(MessagesArgs),
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Source reference: numeric id or @handle
    pub reference: String,

    /// JSONL dump to replay as the remote stream
    #[arg(long)]
    pub from: PathBuf,

    /// Keep backfilling until this many records are stored
    #[arg(long, default_value_t = 100)]
    pub target: usize,

    /// Keep backfilling until a record at or before this date is stored
    #[arg(long, value_parser = parse_start_ms)]
    pub min_date: Option<i64>,

    /// Keep backfilling until a record at or below this id is stored
    #[arg(long)]
    pub min_id: Option<i64>,

    /// Records per committed batch (overrides ARCHIVER_BATCH_SIZE)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: Option<u64>,

    /// Do not keep raw payloads
    #[arg(long)]
    pub no_store_raw: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct GapsArgs {
    /// Source id or @handle
    pub source: String,

    #[arg(long, conflicts_with_all = ["start", "end"])]
    pub min_id: Option<i64>,

    #[arg(long, conflicts_with_all = ["start", "end"])]
    pub max_id: Option<i64>,

    /// Date window start (YYYY-MM-DD or RFC 3339); switches to date gaps
    #[arg(long, value_parser = parse_start_ms, requires = "end")]
    pub start: Option<i64>,

    /// Date window end, inclusive
    #[arg(long, value_parser = parse_end_ms, requires = "start")]
    pub end: Option<i64>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct MessagesArgs {
    /// Source id or @handle
    pub source: String,

    /// Only the N most recent records
    #[arg(long)]
    pub last: Option<usize>,

    /// Records with id greater than this
    #[arg(long)]
    pub since_id: Option<i64>,

    /// Records with id less than this
    #[arg(long)]
    pub until_id: Option<i64>,

    #[arg(long, value_parser = parse_start_ms)]
    pub start: Option<i64>,

    #[arg(long, value_parser = parse_end_ms)]
    pub end: Option<i64>,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = ArchiverConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Sync(args) => run_sync(config, args).await,
        Commands::Sources { json } => {
            let storage = open_storage(&config)?;
            print_sources(&storage.list_sources()?, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Coverage { source, json } => {
            let storage = open_storage(&config)?;
            let source = find_stored_source(&storage, &source)?;
            let summary = storage.coverage_summary(source.id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} ({}): {} records in {} range(s)",
                    source.display_name, source.id, summary.total_records, summary.total_ranges
                );
                for r in &summary.ranges {
                    println!(
                        "  [{}, {}]  {} .. {}  {} records",
                        r.min_id,
                        r.max_id,
                        format_ms(r.min_ts),
                        format_ms(r.max_ts),
                        r.record_count
                    );
                }
                for g in &summary.gaps {
                    println!("  gap [{}, {}]", g.start_id, g.end_id);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Gaps(args) => {
            let storage = open_storage(&config)?;
            let source = find_stored_source(&storage, &args.source)?;
            if let (Some(start), Some(end)) = (args.start, args.end) {
                if start > end {
                    bail!("--start must not be after --end");
                }
                let gaps = storage.gaps_in_date_range(source.id, start, end)?;
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&gaps)?);
                } else {
                    for g in &gaps {
                        println!(
                            "{} .. {}  ids ~{}..~{}",
                            format_ms(g.start_ts),
                            format_ms(g.end_ts),
                            g.approx_start_id.map_or("?".into(), |id| id.to_string()),
                            g.approx_end_id.map_or("?".into(), |id| id.to_string()),
                        );
                    }
                }
            } else {
                let gaps = storage.gaps_in_id_range(source.id, args.min_id, args.max_id)?;
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&gaps)?);
                } else {
                    for g in &gaps {
                        println!("[{}, {}]", g.start_id, g.end_id);
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Messages(args) => {
            let storage = open_storage(&config)?;
            let source = find_stored_source(&storage, &args.source)?;
            let filter = ExportFilter {
                last_n: args.last,
                since_id: args.since_id,
                until_id: args.until_id,
                start_ts: args.start,
                end_ts: args.end,
            };
            let rows = storage.records_for_export(source.id, &filter)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for row in &rows {
                    let record = &row.record;
                    let reply = match (&row.reply_author_name, record.reply_target_id) {
                        (Some(name), _) => format!(" (reply to {name})"),
                        (None, Some(id)) => format!(" (reply to #{id})"),
                        (None, None) => String::new(),
                    };
                    println!(
                        "[{}] #{} {}{}: {}",
                        record.timestamp_ms.map(format_ms).unwrap_or_default(),
                        record.id,
                        record.author_name.as_deref().unwrap_or("?"),
                        reply,
                        record.body.as_deref().unwrap_or("")
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "sarc", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run one sync with graceful shutdown on Ctrl+C or SIGTERM.
///
/// The store handle lives in this scope and closes when it ends.
async fn run_sync(config: ArchiverConfig, args: SyncArgs) -> Result<ExitCode> {
    let source = JsonlSource::open(&args.from)
        .with_context(|| format!("loading dump {}", args.from.display()))?;
    let mut storage = open_storage(&config)?;

    let options = SyncOptions {
        target_count: args.target,
        min_date_ms: args.min_date,
        min_id: args.min_id,
        batch_size: args
            .batch_size
            .map_or(config.batch_size, |n| n as usize),
        page_size: config.page_size,
        store_raw: config.store_raw && !args.no_store_raw,
    };
    let cancel = CancelSignal::new();

    let mut engine = SyncEngine::new(&source, &mut storage)
        .with_retry_policy(config.retry_policy())
        .with_cancel_signal(cancel.clone());
    let run = run_with_shutdown(
        engine.sync(&args.reference, &options),
        shutdown_signal(),
        &cancel,
        config.shutdown_grace,
    )
    .await;

    let code = run.exit_code();
    match run.result {
        Ok(report) => print_report(&report, args.json)?,
        Err(err @ SyncError::ForcedShutdown { .. }) => {
            error!(%err, "sync dropped; committed batches are kept");
        }
        Err(SyncError::Cancelled) => info!("cancelled before any work started"),
        Err(err) => return Err(err).context("sync failed"),
    }
    Ok(ExitCode::from(code))
}

/// Outcome of a sync raced against a shutdown request.
#[derive(Debug)]
pub struct SyncRun {
    pub result: Result<SyncReport, SyncError>,
    /// Shutdown was requested before the sync finished on its own.
    pub interrupted: bool,
}

impl SyncRun {
    /// 0 on success, [`EXIT_INTERRUPTED`] for any stop caused by a shutdown
    /// request or cancellation, 1 for other errors.
    pub fn exit_code(&self) -> u8 {
        match &self.result {
            Ok(report) if self.interrupted || report.cancelled => EXIT_INTERRUPTED,
            Ok(_) => 0,
            Err(SyncError::ForcedShutdown { .. } | SyncError::Cancelled) => EXIT_INTERRUPTED,
            Err(_) => 1,
        }
    }
}

/// Drive `sync` until it completes or `shutdown` resolves.
///
/// On shutdown the cancel signal is raised and the sync gets `grace` to
/// flush its partial batch and finalize. Past that it is dropped and the
/// result is [`SyncError::ForcedShutdown`]; batches already committed stay.
pub async fn run_with_shutdown<F, S>(
    sync: F,
    shutdown: S,
    cancel: &CancelSignal,
    grace: Duration,
) -> SyncRun
where
    F: Future<Output = Result<SyncReport, SyncError>>,
    S: Future<Output = ()>,
{
    tokio::pin!(sync);
    tokio::select! {
        result = &mut sync => SyncRun { result, interrupted: false },
        () = shutdown => {
            let grace_secs = grace.as_secs();
            warn!(grace_secs, "shutdown requested, stopping after the current batch");
            cancel.cancel();
            let result = match tokio::time::timeout(grace, &mut sync).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::ForcedShutdown { grace_secs }),
            };
            SyncRun { result, interrupted: true }
        }
    }
}

/// Resolves on Ctrl+C, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(%err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}

fn open_storage(config: &ArchiverConfig) -> Result<SqliteStorage> {
    SqliteStorage::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))
}

/// Look up a stored source by numeric id or `@handle`.
fn find_stored_source(storage: &SqliteStorage, reference: &str) -> Result<Source> {
    let reference = reference.trim();
    if let Ok(id) = reference.parse::<i64>() {
        return storage
            .get_source(id)?
            .with_context(|| format!("no archived source with id {id}"));
    }
    let handle = reference.trim_start_matches('@');
    storage
        .list_sources()?
        .into_iter()
        .find(|s| {
            s.handle
                .as_deref()
                .is_some_and(|h| h.eq_ignore_ascii_case(handle))
        })
        .with_context(|| format!("no archived source with handle @{handle}"))
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("Synced: {} (source {})", report.display_name, report.source_id);
    for (name, phase) in [("tail", &report.tail), ("backfill", &report.backfill)] {
        if let Some(phase) = phase {
            println!(
                "  {name}: {} new in {} page(s), stopped: {:?}",
                phase.inserted, phase.pages, phase.stop
            );
        }
    }
    println!("  inserted: {}", report.inserted_count);
    println!("  boundaries: {}..{}", report.min_id, report.max_id);
    println!("  total stored: {}", report.total_count);
    if report.soft_stopped() {
        println!("  note: stopped early on repeated source errors; re-run to continue");
    }
    if report.cancelled {
        println!("  note: interrupted; re-run to continue");
    }
    Ok(())
}

fn print_sources(sources: &[Source], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(sources)?);
        return Ok(());
    }
    if sources.is_empty() {
        println!("No archived sources.");
        return Ok(());
    }
    for s in sources {
        println!(
            "{:>16}  {:<8} {}{}  ids {}..{}  last sync {}",
            s.id,
            s.category.as_str(),
            s.display_name,
            s.handle
                .as_deref()
                .map(|h| format!(" (@{h})"))
                .unwrap_or_default(),
            s.known_min_id,
            s.known_max_id,
            s.last_sync_ms.map(format_ms).unwrap_or_else(|| "never".into())
        );
    }
    Ok(())
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn parse_date(raw: &str, day_time: NaiveTime) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("expected YYYY-MM-DD or RFC 3339, got '{raw}'"))?;
    Ok(Utc.from_utc_datetime(&date.and_time(day_time)).timestamp_millis())
}

/// Date argument as epoch ms; a bare date means its first millisecond.
pub fn parse_start_ms(raw: &str) -> Result<i64> {
    parse_date(raw, NaiveTime::MIN)
}

/// Date argument as epoch ms; a bare date means its last millisecond.
pub fn parse_end_ms(raw: &str) -> Result<i64> {
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    parse_date(raw, end_of_day)
}

pub fn default_db_path() -> PathBuf {
    default_data_dir().join("archive.sqlite")
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "stream-archiver", "stream-archiver")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".stream-archiver"))
}
