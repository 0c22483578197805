use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use meter_rollup::config::{parse_utc_offset, Config};
use meter_rollup::runner::Runner;

/// Rolls household meter readings up into quarterly consumption totals.
#[derive(Parser)]
#[command(name = "meter-rollup", about)]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input file with a header line and entity,measurement,timestamp rows.
    #[arg(long)]
    input_path: Option<PathBuf>,

    /// Report destination.
    #[arg(long)]
    output_path: Option<PathBuf>,

    /// Number of decode workers.
    #[arg(long)]
    worker_count: Option<usize>,

    /// Number of accumulator shards.
    #[arg(long)]
    num_shards: Option<usize>,

    /// Metering interval added to each timestamp, e.g. "15m".
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// UTC offset timestamps are read in, e.g. "+01:00".
    #[arg(long, value_parser = parse_offset_arg, allow_hyphen_values = true)]
    utc_offset: Option<FixedOffset>,

    /// Lines buffered between the reader and the workers.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn parse_offset_arg(raw: &str) -> Result<FixedOffset, String> {
    parse_utc_offset(raw).map_err(|e| format!("{e:#}"))
}

impl Cli {
    /// Starts from the config file (or defaults) and layers flags on top.
    fn resolve_config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(path) = &self.input_path {
            cfg.input_path = path.clone();
        }
        if let Some(path) = &self.output_path {
            cfg.output_path = path.clone();
        }
        if let Some(n) = self.worker_count {
            cfg.worker_count = n;
        }
        if let Some(n) = self.num_shards {
            cfg.num_shards = n;
        }
        if let Some(interval) = self.interval {
            cfg.interval = interval;
        }
        if let Some(offset) = self.utc_offset {
            cfg.utc_offset = offset;
        }
        if let Some(n) = self.queue_capacity {
            cfg.queue_capacity = n;
        }
        if let Some(level) = &self.log_level {
            cfg.log_level = level.clone();
        }

        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("meter-rollup {}", version::full());
        return Ok(());
    }

    let cfg = cli.resolve_config()?;

    let filter = EnvFilter::try_new(&cfg.log_level)
        .with_context(|| format!("invalid log level: {}", cfg.log_level))?;
    match cli.log_format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).with_target(true).init(),
    }

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting meter-rollup",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    let runner = Runner::new(cfg);

    let token = runner.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received SIGINT, cancelling run");
                token.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "failed to listen for SIGINT"),
        }
    });

    let summary = runner.run().await.context("rollup failed")?;

    tracing::info!(
        rows = summary.ingest.rows_read,
        report_rows = summary.buckets,
        "meter-rollup finished",
    );
    Ok(())
}
