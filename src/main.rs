//! # Cinema Archiver
//!
//! A bulk content scraper that archives tasteofcinema.com articles (text +
//! images) into a local JSON corpus, tracking progress in a durable manifest
//! so repeated runs are incremental and resumable.
//!
//! ## Features
//!
//! - Discovers article URLs from the WordPress sitemap index, falling back
//!   to paginated category listings when the sitemap is unavailable
//! - Merges multi-page articles by following same-article pagination links
//! - Downloads each article's images with deterministic, ordered filenames
//! - Persists the manifest after every article for crash recovery
//! - Serves unchanged articles from cached artifacts on reruns
//!
//! ## Usage
//!
//! ```sh
//! cinema_archiver --discover-only
//! cinema_archiver --limit 10 --sort oldest
//! cinema_archiver --article some-article-slug
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Discovery**: populate the manifest with (url, lastmod) candidates
//! 2. **Selection**: sort and filter the pending entries
//! 3. **Extraction**: fetch, merge pagination, write `articles/<slug>.json`
//! 4. **Archiving**: download images to `images/<slug>/`
//!
//! Exit codes: 0 = all targeted articles succeeded, 1 = partial failure,
//! 2 = fatal error (discovery failure, invalid arguments, unknown slug).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod discover;
mod error;
mod extract;
mod fetch;
mod images;
mod manifest;
mod models;
mod pipeline;
mod utils;

use cli::Cli;
use fetch::{HttpFetcher, RetryFetch};
use manifest::{get_pending_entries, reset_all_to_pending, save_manifest};
use pipeline::{RunTotals, ScrapeOptions, print_summary, run_scrape_phase, run_single_article};

const EXIT_SUCCESS: u8 = 0;
const EXIT_PARTIAL: u8 = 1;
const EXIT_FATAL: u8 = 2;

const MIN_YEAR: i32 = 2000;
const MAX_WORKERS: u32 = 5;

fn exit_code(totals: RunTotals) -> u8 {
    if totals.failure == 0 {
        EXIT_SUCCESS
    } else if totals.success > 0 {
        EXIT_PARTIAL
    } else {
        EXIT_FATAL
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    // --- Tracing init ---
    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("cinema_archiver starting up");

    // --- Validate arguments clap cannot express ---
    if let Some(year) = args.year {
        if year < MIN_YEAR {
            eprintln!("error: --year must be a valid year >= {MIN_YEAR}, got: {year}");
            return ExitCode::from(EXIT_FATAL);
        }
    }

    let workers = args.workers.clamp(1, MAX_WORKERS);
    if workers != args.workers {
        warn!(requested = args.workers, clamped = workers, "--workers clamped (valid range: 1-5)");
    }
    info!(workers, "Worker pool size (reserved for future parallel fetching)");

    let delay = Duration::from_secs_f64(args.delay.max(0.0));
    let output_dir = PathBuf::from(&args.output_dir);
    info!(output_dir = %output_dir.display(), "Output directory");

    let fetcher = match HttpFetcher::new() {
        Ok(http) => RetryFetch::with_defaults(http),
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    // --- Single-article mode short-circuits bulk discovery ---
    if let Some(target) = args.article.as_deref() {
        if args.year.is_some() || args.month.is_some() {
            eprintln!("warning: --article takes precedence; --year/--month filters ignored.");
        }
        return match run_single_article(target, &output_dir, &fetcher, delay, args.force).await {
            Ok(true) => ExitCode::from(EXIT_SUCCESS),
            Ok(false) => ExitCode::from(EXIT_PARTIAL),
            Err(e) => {
                error!(error = %e, "Single-article run failed");
                eprintln!("error: {e}");
                ExitCode::from(EXIT_FATAL)
            }
        };
    }

    // --- Phase 1: Discovery ---
    let (mut manifest, added) =
        match discover::run_discovery(&output_dir, &fetcher, delay, true).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Discovery failed");
                eprintln!("error: {e}");
                return ExitCode::from(EXIT_FATAL);
            }
        };
    info!(
        total = manifest.entries.len(),
        added,
        pending = get_pending_entries(&manifest).len(),
        "Manifest populated"
    );

    if args.discover_only {
        println!("Discovery complete. {} articles in manifest.", manifest.entries.len());
        println!("Manifest saved to: {}", output_dir.join("manifest.json").display());
        return ExitCode::from(EXIT_SUCCESS);
    }

    if args.force {
        let reset = reset_all_to_pending(&mut manifest);
        info!(reset, "--force: reset entries to pending");
        if let Err(e) = save_manifest(&mut manifest, &output_dir) {
            error!(error = %e, "Failed to persist manifest after reset");
            return ExitCode::from(EXIT_FATAL);
        }
    }

    // --- Phase 2: Scrape + images ---
    let opts = ScrapeOptions {
        delay,
        limit: args.limit,
        sort: args.sort,
        year: args.year,
        month: args.month,
        force: args.force,
    };
    let totals = match run_scrape_phase(&mut manifest, &output_dir, &fetcher, opts).await {
        Ok(totals) => totals,
        Err(e) => {
            error!(error = %e, "Scrape phase aborted");
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    print_summary(&manifest, totals);

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        success = totals.success,
        failed = totals.failure,
        "Execution complete"
    );

    ExitCode::from(exit_code(totals))
}
