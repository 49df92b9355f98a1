//! # flow_harvest
//!
//! A crawler for the daily top articles of Habr's thematic flows. For every
//! day in a date range and every selected flow it walks the listing pages,
//! fetches each article, extracts its metadata and writes one CSV table per
//! flow.
//!
//! ## Usage
//!
//! ```sh
//! flow_harvest -o ./out --from 2023-01-01 --to 2023-01-07
//! ```
//!
//! ## Architecture
//!
//! 1. **Seeding**: one listing job per day and flow
//! 2. **Crawling**: a fixed pool of workers fetches listing and article
//!    pages from a bounded queue, retrying transient failures
//! 3. **Aggregation**: records are de-duplicated per flow by article id
//! 4. **Output**: per-flow CSV files and a JSON manifest accounting for
//!    every discarded job, under `<output-dir>/<run-id>/`
//!
//! Ctrl-C stops the crawl gracefully: in-flight requests finish, nothing
//! new is claimed, and whatever was collected is still exported.

use chrono::{Days, Local, Utc};
use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod aggregator;
mod cli;
mod config;
mod error;
mod fetcher;
mod models;
mod outputs;
mod parser;
mod pool;
mod queue;
mod report;
mod stats;
mod utils;

use aggregator::ResultAggregator;
use cli::Cli;
use config::{CrawlConfig, DateRange};
use fetcher::HttpFetcher;
use models::Category;
use outputs::{Exporter, json, tabular::CsvExporter};
use parser::PageParser;
use pool::{RunReport, WorkerPool};
use report::{CategoryManifest, RunManifest, discards_by_category};
use utils::{ensure_writable_dir, run_id};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let started_at = Utc::now();
    info!("flow_harvest starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    // ---- Config: defaults < YAML < flags ----
    let mut config = match &args.config {
        Some(path) => CrawlConfig::from_yaml_file(path)?,
        None => CrawlConfig::default(),
    };
    args.apply_overrides(&mut config);
    config.validate()?;

    let yesterday = Local::now()
        .date_naive()
        .checked_sub_days(Days::new(1))
        .ok_or("cannot compute yesterday's date")?;
    let range = DateRange::new(
        args.from.unwrap_or(yesterday),
        args.to.or(args.from).unwrap_or(yesterday),
    )?;
    let categories = args.categories();
    info!(
        from = %range.from,
        to = %range.to,
        categories = ?categories.iter().map(|c| c.slug()).collect::<Vec<_>>(),
        workers = config.workers,
        queue_depth = config.queue_depth,
        "Crawl configured"
    );

    // Early check: the run directory must be writable before any crawling
    let run_id = run_id(started_at);
    let run_dir = Path::new(&args.output_dir).join(&run_id);
    if let Err(e) = ensure_writable_dir(&run_dir).await {
        error!(
            path = %run_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    // ---- Crawl ----
    let fetcher = Arc::new(HttpFetcher::new(&config)?);
    let parser = PageParser::new(&config.base_url)?;
    let pool = WorkerPool::new(config, fetcher, parser, Arc::new(ResultAggregator::new()))?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing in-flight requests and stopping");
                cancel.cancel();
            }
        });
    }

    let report = pool.run(range, &categories, cancel).await;

    // ---- Export ----
    let manifest = export_run(
        pool.aggregator(),
        &categories,
        report,
        &run_dir,
        args.top,
        RunManifest {
            run_id,
            from: range.from,
            to: range.to,
            started_at,
            finished_at: started_at,
            cancelled: false,
            categories: Default::default(),
        },
    );

    if let Err(e) = json::write_manifest(&manifest, &run_dir).await {
        error!(error = %e, "Failed to write manifest");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        exported = manifest.total_exported(),
        discarded = manifest.total_discarded(),
        cancelled = manifest.cancelled,
        "Execution complete"
    );

    Ok(())
}

/// Write every category's CSV and fill in the manifest. A failed export
/// is recorded for its category and the others still proceed.
fn export_run(
    aggregator: &ResultAggregator,
    categories: &[Category],
    report: RunReport,
    run_dir: &Path,
    top: usize,
    mut manifest: RunManifest,
) -> RunManifest {
    let exporter = CsvExporter::new(run_dir);
    let mut discards = discards_by_category(report.discards);

    for &category in categories {
        let snapshot = aggregator.snapshot(category);
        let mut section = CategoryManifest {
            discovered: report.stats.discovered.get(&category).copied().unwrap_or(0),
            by_date: aggregator.count_by_date(category),
            discarded: discards.remove(&category).unwrap_or_default(),
            top_authors: stats::most_active_authors(&snapshot.records, top),
            top_tags: stats::most_common_tags(&snapshot.records, top),
            ..CategoryManifest::default()
        };

        match exporter.export(&snapshot) {
            Ok(path) => {
                section.exported = snapshot.len();
                info!(
                    category = category.slug(),
                    rows = snapshot.len(),
                    discarded = section.discarded.len(),
                    path = %path.display(),
                    "Exported category"
                );
            }
            Err(e) => {
                error!(category = category.slug(), error = %e, "Failed to export category");
                section.export_error = Some(e.to_string());
            }
        }

        if !section.top_authors.is_empty() {
            info!(category = category.slug(), authors = ?section.top_authors, "Most active authors");
        }
        if !section.top_tags.is_empty() {
            info!(category = category.slug(), tags = ?section.top_tags, "Most common tags");
        }

        manifest.categories.insert(category, section);
    }

    manifest.cancelled = report.cancelled;
    manifest.finished_at = Utc::now();
    manifest
}
