//! # Travian KB Scraper
//!
//! A structured extraction pipeline that scrapes building resource cost
//! tables from the Travian knowledge base into schema-validated JSON.
//!
//! ## Features
//!
//! - Static HTTP fetch path for plain pages, rendered WebDriver fetch path
//!   for JavaScript-built pages, selected per target
//! - Declarative table schemas: new page layouts are configuration, not code
//! - Per-row failure isolation: one malformed row never aborts a page
//! - Idempotent JSON sink: re-running a scrape overwrites by key instead of
//!   appending duplicates
//!
//! ## Usage
//!
//! ```sh
//! travian_kb_scraper -o costs.json --target-set travian-buildings
//! ```
//!
//! ## Architecture
//!
//! Named target sets may start from an index page: discovery fetches it
//! once and enumerates one target per entity tile. Each target is then one
//! unit of work moving through a pipeline:
//! 1. **Fetch**: retrieve the page (static GET or rendered browser session)
//! 2. **Extract**: pull raw records out of the table in document order
//! 3. **Normalize**: coerce raw text into typed, validated records
//! 4. **Persist**: write records to the JSON sink, overwriting by key
//!
//! Independent targets run in parallel; the browser session pool bounds
//! concurrent rendered fetches regardless of target parallelism.

use clap::Parser;
use futures::stream::{self, StreamExt};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod cli;
mod discover;
mod errors;
mod extract;
mod fetch;
mod models;
mod normalize;
mod outputs;
mod pipeline;
mod schema;
mod utils;

use cli::Cli;
use fetch::{RenderedFetcher, SessionPool, StaticFetcher};
use models::{FetchTarget, RunStatus};
use outputs::JsonSink;
use pipeline::{Pipeline, PipelineConfig};
use schema::TargetSet;
use utils::truncate_for_log;

#[tokio::main]
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
    info!("travian_kb_scraper starting up");

    let args = Cli::parse();
    debug!(?args.out, ?args.target_set, urls = args.urls.len(), "Parsed CLI arguments");

    // ---- Resolve schema and targets ----
    let TargetSet {
        schema: table_schema,
        discovery,
        targets: fixed_targets,
    } = if let Some(name) = &args.target_set {
        schema::target_set(name).ok_or_else(|| format!("unknown target set: '{name}'"))?
    } else {
        if args.urls.is_empty() {
            return Err("no targets given: pass URLs or --target-set".into());
        }
        TargetSet {
            schema: schema::travian_buildings_schema(),
            discovery: None,
            targets: args
                .urls
                .iter()
                .map(|u| FetchTarget::new(u.clone(), args.rendered))
                .collect(),
        }
    };

    for target in fixed_targets.iter().chain(discovery.iter().map(|d| &d.target)) {
        url::Url::parse(&target.url).map_err(|e| format!("invalid URL '{}': {e}", target.url))?;
    }

    let pipeline_config = PipelineConfig {
        max_fetch_retries: args.max_fetch_retries,
        ..PipelineConfig::default()
    };

    // ---- Build fetchers ----
    let static_fetcher = Arc::new(StaticFetcher::new(Duration::from_secs(
        args.fetch_timeout_seconds,
    ))?);
    let pool = Arc::new(SessionPool::new(
        &args.webdriver_url,
        args.browser_sessions,
        args.headless,
    ));
    let render_wait = Duration::from_secs(args.render_wait_timeout_seconds);
    // The table container doubles as the render-readiness signal.
    let rendered_fetcher = Arc::new(RenderedFetcher::new(
        Arc::clone(&pool),
        table_schema.container_selector.clone(),
        render_wait,
    ));

    // ---- Discover targets from the index page, if the set has one ----
    let targets = match &discovery {
        Some(discovery) => {
            info!(url = %discovery.target.url, "discovering targets from index page");
            // The index readies on its tile selector, not the table container.
            let index_fetcher = RenderedFetcher::new(
                Arc::clone(&pool),
                discovery.tile_selector.clone(),
                render_wait,
            );
            let discovered =
                match pipeline::fetch_with_retry(&index_fetcher, &discovery.target, &pipeline_config)
                    .await
                {
                    Ok(page) => discover::discover_targets(&page, discovery),
                    Err(e) => Err(format!("index fetch failed: {e}")),
                };
            match discovered {
                Ok(targets) => targets,
                Err(e) => {
                    // Close any idle browser session before bailing out.
                    pool.shutdown().await;
                    return Err(e.into());
                }
            }
        }
        None => fixed_targets,
    };
    info!(count = targets.len(), "Targets resolved");

    let pipeline = Arc::new(Pipeline::new(
        static_fetcher,
        rendered_fetcher,
        table_schema,
        JsonSink::new(&args.out),
        pipeline_config,
    ));

    // ---- Process targets in parallel ----
    let concurrency = args.concurrency.max(1);
    info!(concurrency, "Starting scrape runs");
    let runs: Vec<_> = stream::iter(targets)
        .map(|target| {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.run_target(target).await }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    pool.shutdown().await;

    // ---- Per-target summary ----
    let mut failed = 0usize;
    for run in &runs {
        println!(
            "{:6} {}  records={} errors={} warnings={}",
            run.status.to_string(),
            run.target.url,
            run.records.len(),
            run.errors.len(),
            run.warnings.len()
        );
        if run.status == RunStatus::Failed {
            failed += 1;
            if let Some(e) = run.errors.last() {
                println!("       last error [{}]: {}", e.stage, truncate_for_log(&e.reason, 200));
            }
        }
        for warning in &run.warnings {
            println!("       warning: {warning}");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        total = runs.len(),
        failed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    if failed > 0 {
        return Err(format!("{failed} of {} targets failed", runs.len()).into());
    }
    Ok(())
}
