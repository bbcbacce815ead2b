//! ccmeter - local telemetry analyzer and live dashboard for Claude Code
//! usage logs.

mod report;

use anyhow::{Context, Result};
use ccmeter_core::models::{GroupBy, MonitorConfig, OutputFormat, TimelineMode};
use ccmeter_core::Monitor;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ccmeter",
    version,
    about = "Local telemetry analyzer and live dashboard for Claude Code usage logs",
    long_about = "Aggregates Claude Code JSONL transcripts into hourly per-model usage,\n\
                  partitions activity into five-hour rate-limit windows, and shows either\n\
                  a grouped batch report or a live top-style view.\n\
                  \n\
                  Examples:\n\
                    ccmeter                          # batch report grouped by day\n\
                    ccmeter --group-by model         # per-model rollup\n\
                    ccmeter --duration 2w --breakdown\n\
                    ccmeter live --plan max5         # live window monitor\n\
                    ccmeter clear-cache"
)]
struct Cli {
    #[command(subcommand)]
    mode: Option<Mode>,

    /// Transcript root (default: ~/.claude/projects)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Cache directory (default: platform cache dir + /ccmeter)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// IANA timezone name, or "Local"
    #[arg(long, default_value = "Local")]
    timezone: String,

    /// Lookback filter, e.g. 5h, 4d, 3w, 2m, 1y or compositions (1y2m3w4d5h)
    #[arg(long, default_value = "")]
    duration: String,

    /// Grouping: day, hour, week, month, model, project
    #[arg(long, default_value = "day")]
    group_by: String,

    /// Output: table, csv, json, summary
    #[arg(long, default_value = "table")]
    output: String,

    /// Max groups to print (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    limit: usize,

    /// Add per-model sub-rows to each group
    #[arg(long)]
    breakdown: bool,

    /// Parallel parse width (0 = CPU count)
    #[arg(long, default_value_t = 0)]
    concurrency: usize,

    /// Plan for limit math: pro, max5, max20, custom
    #[arg(long, default_value = "custom")]
    plan: String,

    /// Token limit per window for the custom plan
    #[arg(long, default_value_t = 0)]
    custom_limit_tokens: u64,

    /// Seconds between data refreshes in live mode
    #[arg(long, default_value_t = 10)]
    refresh_interval: u64,

    /// Milliseconds between UI redraws in live mode
    #[arg(long, default_value_t = 1500)]
    ui_refresh_ms: u64,

    /// Timeline mode: full, recent, optimized
    #[arg(long, default_value = "recent")]
    timeline_mode: String,

    /// Retention hours for --timeline-mode optimized (0 = all)
    #[arg(long, default_value_t = 0)]
    retention_hours: u64,

    /// Disable incremental re-detection on file changes
    #[arg(long)]
    no_incremental: bool,
}

#[derive(Subcommand)]
enum Mode {
    /// Print the grouped usage report and exit (default)
    Report,
    /// Run the live top-style window monitor
    Live,
    /// Remove every cached session document
    ClearCache,
    /// Fetch the model pricing catalog and cache it
    UpdatePricing,
}

impl Cli {
    fn into_config(self) -> Result<(MonitorConfig, Option<Mode>)> {
        let defaults = MonitorConfig::default();
        let config = MonitorConfig {
            data_dir: self.data_dir.unwrap_or(defaults.data_dir),
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            timezone: self.timezone,
            duration: self.duration,
            group_by: self.group_by.parse::<GroupBy>()?,
            output_format: self.output.parse::<OutputFormat>()?,
            limit: self.limit,
            breakdown: self.breakdown,
            concurrency: self.concurrency,
            plan: self.plan,
            custom_limit_tokens: self.custom_limit_tokens,
            data_refresh_interval: Duration::from_secs(self.refresh_interval.max(1)),
            ui_refresh_rate: Duration::from_millis(self.ui_refresh_ms.max(100)),
            timeline_mode: self.timeline_mode.parse::<TimelineMode>()?,
            data_retention_hours: self.retention_hours,
            enable_incremental_detection: !self.no_incremental,
        };
        Ok((config, self.mode))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, mode) = cli.into_config()?;

    match mode.unwrap_or(Mode::Report) {
        Mode::Report => {
            init_logging();
            run_report(config).await
        }
        Mode::Live => {
            // the terminal belongs to the TUI; no stderr logging
            run_live(config).await
        }
        Mode::ClearCache => {
            init_logging();
            run_clear_cache(config).await
        }
        Mode::UpdatePricing => {
            init_logging();
            run_update_pricing(config).await
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_report(config: MonitorConfig) -> Result<()> {
    let tz = config.resolve_timezone().context("Invalid timezone")?;
    let monitor = Monitor::new(config.clone()).context("Failed to initialize")?;

    let summary = monitor.bootstrap().await;
    if summary.scanned == 0 {
        eprintln!(
            "No transcripts found under {}",
            monitor.config().data_dir.display()
        );
        std::process::exit(1);
    }

    let cutoff = monitor
        .config()
        .duration_cutoff(monitor.clock().as_ref())
        .context("Invalid duration expression")?;

    let aggregated = monitor.memory().all_aggregated();
    let rows = report::build_rows(&aggregated, &config, monitor.pricing(), tz, cutoff);
    if rows.is_empty() {
        eprintln!("No usage in the selected range");
        std::process::exit(1);
    }

    println!("{}", report::render(&rows, &config)?);

    monitor.shutdown_flush().await;
    Ok(())
}

async fn run_live(config: MonitorConfig) -> Result<()> {
    let monitor = Monitor::new(config).context("Failed to initialize")?;
    monitor.bootstrap().await;
    ccmeter_tui::run(monitor).await
}

async fn run_clear_cache(config: MonitorConfig) -> Result<()> {
    let cache_dir = config.cache_dir.clone();
    if !cache_dir.exists() {
        println!("Cache not found at {}; nothing to clear.", cache_dir.display());
        return Ok(());
    }

    let mut removed = 0usize;
    for entry in std::fs::read_dir(&cache_dir)
        .with_context(|| format!("Failed to read cache dir: {}", cache_dir.display()))?
        .flatten()
    {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            removed += 1;
        }
    }

    println!("Cleared {removed} cached documents from {}", cache_dir.display());
    Ok(())
}

async fn run_update_pricing(config: MonitorConfig) -> Result<()> {
    let pricing = ccmeter_core::pricing::PricingProvider::load(&config.cache_dir);
    let count = pricing
        .update_from_litellm()
        .await
        .context("Pricing update failed")?;
    println!("Cached {count} model prices");
    Ok(())
}
