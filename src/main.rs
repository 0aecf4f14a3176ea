use clap::Parser;
use std::process::ExitCode;
use stream_archiver::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match stream_archiver::run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
/// `RUST_LOG` wins over the verbosity flags.
fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
