//! Per-entry processing and run orchestration.
//!
//! The scrape phase walks the selected manifest entries strictly
//! sequentially: fetch page 1 → extract (writes the artifact, marks the
//! entry completed) → archive images (fills in the downloaded count). Each
//! entry's outcome comes back as a `Result` the orchestrator pattern-matches
//! on: a failure marks that entry failed and the run moves on. The manifest
//! is persisted after every entry, so a crash loses at most the in-flight
//! article.
//!
//! An article whose artifact already exists and passes the plausibility
//! check is served from cache without re-fetching its HTML; `--force`
//! bypasses the cache.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::discover::{run_discovery, url_to_slug};
use crate::error::ScrapeError;
use crate::extract::extract_article;
use crate::fetch::Fetch;
use crate::images::download_article_images;
use crate::manifest::{
    SortDirection, StatusFields, add_entry, extract_month_from_lastmod, extract_year_from_url,
    get_sorted_entries, load_manifest, lookup_slug, save_manifest, update_entry_status,
};
use crate::models::{ArticleData, Manifest, ManifestEntry, ScrapeStatus};

/// Cached artifacts with content at or below this length are treated as
/// implausible (truncated or placeholder) and re-scraped.
pub const MIN_CACHED_CONTENT_LEN: usize = 200;

/// Whether a previously persisted article looks complete enough to reuse.
pub fn is_plausible_cached_article(article: &ArticleData) -> bool {
    article.content.len() > MIN_CACHED_CONTENT_LEN
}

/// Load `articles/<slug>.json` if it exists, parses, and passes the
/// plausibility check. Anything else is a cache miss, never an error.
pub fn try_load_cache(path: &Path) -> Option<ArticleData> {
    let raw = std::fs::read_to_string(path).ok()?;
    let article: ArticleData = serde_json::from_str(&raw).ok()?;
    if is_plausible_cached_article(&article) {
        Some(article)
    } else {
        debug!(path = %path.display(), "Cached artifact failed plausibility check");
        None
    }
}

/// Stats from successfully processing one entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryStats {
    pub pages_found: u32,
    pub images_found: u32,
    pub images_downloaded: u32,
}

/// Selection and behavior knobs for the scrape phase.
#[derive(Debug, Clone, Copy)]
pub struct ScrapeOptions {
    pub delay: Duration,
    pub limit: Option<usize>,
    pub sort: SortDirection,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub force: bool,
}

/// This-run success/failure counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunTotals {
    pub success: usize,
    pub failure: usize,
}

fn tolerant_update(manifest: &mut Manifest, slug: &str, status: ScrapeStatus, fields: StatusFields) {
    if let Err(ScrapeError::EntryNotFound { .. }) =
        update_entry_status(manifest, slug, status, fields)
    {
        debug!(slug, "No manifest entry to update; continuing");
    }
}

/// Extract content and download images for a single manifest entry.
///
/// The returned `Result` is the entry's outcome: the caller decides what a
/// failure means for the run. On success the manifest entry has been marked
/// completed with its final stats.
pub async fn process_entry<F: Fetch>(
    entry: &ManifestEntry,
    output_dir: &Path,
    manifest: &mut Manifest,
    fetcher: &F,
    delay: Duration,
    force: bool,
) -> Result<EntryStats, ScrapeError> {
    let artifact_path = output_dir.join("articles").join(format!("{}.json", entry.slug));

    let cached = if force { None } else { try_load_cache(&artifact_path) };
    let article = match cached {
        Some(article) => {
            info!(slug = %entry.slug, "Using cached article artifact");
            let images_found =
                article.inline_images.len() as u32 + u32::from(article.featured_image.is_some());
            tolerant_update(
                manifest,
                &entry.slug,
                ScrapeStatus::Completed,
                StatusFields {
                    pages_found: Some(article.pages_merged),
                    images_found: Some(images_found),
                    images_downloaded: Some(0),
                    error: None,
                },
            );
            article
        }
        None => {
            let first_page_html = fetcher.fetch(&entry.url).await?;
            tokio::time::sleep(delay).await;
            extract_article(
                &entry.url,
                &first_page_html,
                fetcher,
                delay,
                Some(output_dir),
                Some(&mut *manifest),
                Some(&entry.slug),
            )
            .await?
        }
    };

    let images = download_article_images(
        &entry.slug,
        article.featured_image.as_deref(),
        &article.inline_images,
        output_dir,
        delay,
        fetcher,
    )
    .await?;

    debug!(
        slug = %images.slug,
        total = images.total_found(),
        files = images.local_paths.len(),
        errors = images.errors.len(),
        "Image archive complete"
    );

    let images_downloaded = images.downloaded + images.skipped;
    tolerant_update(
        manifest,
        &entry.slug,
        ScrapeStatus::Completed,
        StatusFields { images_downloaded: Some(images_downloaded), ..Default::default() },
    );

    Ok(EntryStats {
        pages_found: article.pages_merged,
        images_found: article.inline_images.len() as u32
            + u32::from(article.featured_image.is_some()),
        images_downloaded,
    })
}

/// Run extraction + image download for the selected pending entries.
///
/// Selection: pending/failed entries in sort order, filtered by year (from
/// the URL path) and month (from `last_modified`), then limited. Filters
/// apply before the limit so the limit counts matching articles.
pub async fn run_scrape_phase<F: Fetch>(
    manifest: &mut Manifest,
    output_dir: &Path,
    fetcher: &F,
    opts: ScrapeOptions,
) -> Result<RunTotals, ScrapeError> {
    let mut selected = get_sorted_entries(manifest, opts.sort, true);
    if let Some(year) = opts.year {
        selected.retain(|e| extract_year_from_url(&e.url) == Some(year));
    }
    if let Some(month) = opts.month {
        selected.retain(|e| extract_month_from_lastmod(e.last_modified.as_deref()) == Some(month));
    }
    if let Some(limit) = opts.limit {
        selected.truncate(limit);
    }

    let total = selected.len();
    if total == 0 {
        println!("No matching articles to process.");
        return Ok(RunTotals::default());
    }

    let mut totals = RunTotals::default();
    for (i, entry) in selected.iter().enumerate() {
        info!(n = i + 1, total, url = %entry.url, "Scraping");

        match process_entry(entry, output_dir, manifest, fetcher, opts.delay, opts.force).await {
            Ok(stats) => {
                info!(
                    slug = %entry.slug,
                    pages = stats.pages_found,
                    images_found = stats.images_found,
                    images_downloaded = stats.images_downloaded,
                    "Entry completed"
                );
                totals.success += 1;
            }
            Err(e) => {
                error!(url = %entry.url, error = %e, "Failed to process entry");
                tolerant_update(
                    manifest,
                    &entry.slug,
                    ScrapeStatus::Failed,
                    StatusFields { error: Some(e.to_string()), ..Default::default() },
                );
                totals.failure += 1;
            }
        }

        // Persist after every entry so a crash loses at most this one.
        save_manifest(manifest, output_dir)?;
    }

    Ok(totals)
}

/// Scrape a single article by slug (manifest lookup) or full URL.
///
/// A URL target skips bulk discovery and synthesizes a manifest entry when
/// absent. A slug target is looked up in the manifest (running discovery
/// first when the manifest is empty); an unknown slug is fatal. A completed
/// target is reset to pending first, since it was explicitly requested.
///
/// Returns whether the article was scraped successfully.
pub async fn run_single_article<F: Fetch>(
    target: &str,
    output_dir: &Path,
    fetcher: &F,
    delay: Duration,
    force: bool,
) -> Result<bool, ScrapeError> {
    let mut manifest = load_manifest(output_dir)?;

    let slug = if target.starts_with("http") {
        let slug = url_to_slug(target);
        info!(url = %target, %slug, "Single-article mode (URL)");
        add_entry(&mut manifest, target, &slug, None);
        slug
    } else {
        info!(slug = %target, "Single-article mode (slug)");
        if manifest.entries.is_empty() {
            let (discovered, _) = run_discovery(output_dir, fetcher, delay, true).await?;
            manifest = discovered;
        }
        lookup_slug(&manifest, target)?;
        target.to_string()
    };

    // Explicitly requested, so a completed entry gets reprocessed.
    if let Some(entry) = manifest.entries.get_mut(&slug) {
        if entry.status == ScrapeStatus::Completed {
            entry.status = ScrapeStatus::Pending;
            entry.scraped_at = None;
        }
    }

    let entry = manifest
        .entries
        .get(&slug)
        .cloned()
        .ok_or_else(|| ScrapeError::EntryNotFound { slug: slug.clone() })?;

    let ok = match process_entry(&entry, output_dir, &mut manifest, fetcher, delay, force).await {
        Ok(_) => true,
        Err(e) => {
            error!(url = %entry.url, error = %e, "Failed to process article");
            tolerant_update(
                &mut manifest,
                &slug,
                ScrapeStatus::Failed,
                StatusFields { error: Some(e.to_string()), ..Default::default() },
            );
            false
        }
    };
    save_manifest(&mut manifest, output_dir)?;

    if ok {
        println!("Successfully scraped: {slug}");
    } else {
        println!("Failed to scrape: {slug}");
    }
    Ok(ok)
}

/// Operator-facing end-of-run summary.
pub fn print_summary(manifest: &Manifest, totals: RunTotals) {
    println!();
    println!("{}", "=".repeat(60));
    println!("Scrape complete");
    println!("  Total articles in manifest : {}", manifest.entries.len());
    println!("  Completed                  : {}", manifest.completed);
    println!("  This run — success         : {}", totals.success);
    println!("  This run — failed          : {}", totals.failure);
    if manifest.failed > 0 {
        println!("  Overall failed entries     : {}", manifest.failed);
    }
    println!("{}", "=".repeat(60));
}
