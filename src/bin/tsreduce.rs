//! tsreduce - archive reduction command-line tool.
//!
//! Reads a recorded performance-metric archive and writes a new archive
//! resampled at a coarser interval, with 32-bit counters widened to 64 bits
//! and wrap corrections applied.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use tsreduce::run::{RunConfig, run_reduction};
use tsreduce::source::{ArchiveSource, SnapshotSource};
use tsreduce::util::parse_time_spec;

/// Archive reduction tool.
#[derive(Parser)]
#[command(name = "tsreduce", about = "Reduce a metric archive to a coarser interval", version)]
struct Args {
    /// Output sampling interval in seconds.
    #[arg(short = 't', long, default_value = "3600")]
    interval: u64,

    /// Stop after writing this many output records.
    #[arg(short = 's', long)]
    samples: Option<u64>,

    /// Window start: Unix timestamp, ISO 8601, offset from the recorded
    /// start (+30m), or time of day (07:00).
    #[arg(short = 'S', long)]
    start: Option<String>,

    /// Window end, same formats as --start; offsets are from the recorded end.
    #[arg(short = 'T', long)]
    finish: Option<String>,

    /// Timezone name recorded in the output label instead of the input's.
    #[arg(short = 'Z', long)]
    timezone: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,

    /// Base name of the input archive file set.
    input: PathBuf,

    /// Base name of the output archive file set.
    output: PathBuf,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("tsreduce={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("tsreduce {} starting", env!("CARGO_PKG_VERSION"));

    let source = match ArchiveSource::open(&args.input, args.interval, None, None) {
        Ok(s) => s,
        Err(e) => {
            error!("cannot open input archive {}: {}", args.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    // Window bounds resolve against the recorded range: start offsets from
    // the first recorded timestamp, end offsets from the last.
    let start = match &args.start {
        Some(spec) => match parse_time_spec(spec, source.label().start) {
            Ok(ts) => Some(ts),
            Err(e) => {
                error!("bad --start: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };
    let finish = match &args.finish {
        Some(spec) => match parse_time_spec(spec, source.label().end) {
            Ok(ts) => Some(ts),
            Err(e) => {
                error!("bad --finish: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };
    let mut source = source.with_window(start, finish);

    let config = RunConfig {
        interval: args.interval,
        sample_limit: args.samples,
        start: None,
        timezone: args.timezone.clone(),
    };

    match run_reduction(&config, &mut source, &args.output) {
        Ok(report) => {
            info!(
                "wrote {} records for {} metrics ({} instance-domain updates) to {}",
                report.records_written,
                report.metrics,
                report.indom_records,
                args.output.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}: archive {} not created", e, args.output.display());
            ExitCode::FAILURE
        }
    }
}
