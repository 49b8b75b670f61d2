//! Command-line interface definitions for the archiver.
//!
//! All selection and behavior flags map onto the orchestrator's already-
//! validated parameters; `main` performs the remaining checks clap cannot
//! express (the `--year` floor, the `--workers` clamp).

use clap::Parser;

use crate::manifest::SortDirection;

/// Bulk scrape tasteofcinema.com articles and images.
///
/// # Examples
///
/// ```sh
/// # Discover URLs and build the manifest only
/// cinema_archiver --discover-only
///
/// # Scrape the five most recent pending articles, politely
/// cinema_archiver --limit 5 --delay 3 --verbose
///
/// # Re-scrape everything from scratch
/// cinema_archiver --force
///
/// # One article, by slug or URL
/// cinema_archiver --article all-25-best-picture-winners
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Only discover URLs and build the manifest; do not scrape
    #[arg(long)]
    pub discover_only: bool,

    /// Re-scrape all articles, ignoring manifest status and cached artifacts
    #[arg(long)]
    pub force: bool,

    /// Maximum number of articles to scrape (default: all)
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Delay between requests in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 2.0)]
    pub delay: f64,

    /// Number of parallel workers (reserved for future use; valid range 1-5)
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub workers: u32,

    /// Output directory for the manifest, articles, and images
    #[arg(short, long, value_name = "DIR", default_value = "scraped")]
    pub output_dir: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Processing order: latest (default) or oldest first
    #[arg(long, value_enum, default_value = "latest")]
    pub sort: SortDirection,

    /// Scrape a single article by slug (manifest lookup) or full URL
    #[arg(long, value_name = "SLUG_OR_URL")]
    pub article: Option<String>,

    /// Filter articles by publication year (extracted from the URL path)
    #[arg(long, value_name = "YYYY")]
    pub year: Option<i32>,

    /// Filter articles by month 1-12 (extracted from last_modified)
    #[arg(long, value_name = "M", value_parser = clap::value_parser!(u32).range(1..=12))]
    pub month: Option<u32>,
}
