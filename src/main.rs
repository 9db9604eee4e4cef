//! # Feed Harvest
//!
//! An incremental news crawler. For every configured vendor it reads the
//! syndication feed, keeps only the entries published since the previous
//! run, extracts each article page with the vendor's CSS/XPath rules and
//! hands valid articles to a sink (Redis queue, SQLite table or HTML files).
//!
//! ## Usage
//!
//! ```sh
//! feed_harvest -l harvest.log -c config.yaml -s state.yaml
//! feed_harvest -l harvest.log -c config.yaml -s state.yaml --archive
//! ```
//!
//! ## Architecture
//!
//! 1. **Feeds**: fetch and parse each feed on the feed worker pool
//! 2. **Diff**: keep entries newer than the source's watermark
//! 3. **Articles**: fetch, extract and store on the article worker pool
//! 4. **Commit**: drain the pools, close the sink, then persist watermarks
//!
//! A watermark is only written after the sink has been closed, so a crash
//! mid-run re-crawls rather than skips.

use clap::Parser;
use std::error::Error;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod archive;
mod cli;
mod config;
mod errors;
mod extract;
mod feeds;
mod fetcher;
mod models;
mod pipeline;
mod pool;
mod sinks;
mod state;
mod utils;

use cli::Cli;
use config::{Config, Source};
use fetcher::HttpFetcher;
use pipeline::Harvester;
use state::CrawlState;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    // --- Tracing init: stdout plus the log file ---
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log)
        .map_err(|e| format!("could not open log file {}: {e}", args.log))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .with_timer(fmt::time::UtcTime::rfc_3339()),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(Arc::new(log_file)),
        )
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "feed_harvest starting up");
    debug!(?args, "Parsed CLI arguments");

    let config = Config::load(&args.config).await.map_err(|e| {
        error!(path = %args.config, error = %e, "Configuration is unusable");
        e
    })?;
    let mut state = CrawlState::load(&args.state).await.map_err(|e| {
        error!(path = %args.state, error = %e, "Crawl state is unreadable");
        e
    })?;

    let sink = sinks::build(&config.sink).await.map_err(|e| {
        error!(error = %e, "Could not construct sink");
        e
    })?;
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
    let harvester = Harvester::new(fetcher, Arc::clone(&sink), config.workers);
    info!(
        feed_workers = harvester.feed_pool.size(),
        article_workers = harvester.article_pool.size(),
        sink = sink.name(),
        archive = args.archive,
        "Pipeline ready"
    );

    let report = if args.archive {
        let vendors: Vec<Source> = config.vendors.values().cloned().collect();
        harvester.run_archive(&vendors).await
    } else {
        harvester.run_feeds(&config.feeds, &mut state).await
    };
    harvester.shutdown().await;

    // The sink is closed before watermarks are written.
    if let Err(e) = sink.close().await {
        error!(sink = sink.name(), error = %e, "Sink did not close cleanly");
    }

    let persisted = if args.archive {
        Ok(())
    } else {
        state.persist(&args.state).await.map_err(|e| {
            error!(path = %args.state, error = %e, "Failed to persist crawl state");
            e
        })
    };

    report.log();
    let elapsed = start_time.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        "feed_harvest finished"
    );

    persisted?;
    Ok(())
}
