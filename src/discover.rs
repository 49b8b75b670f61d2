//! Article URL discovery via the WordPress sitemap, with a category-listing
//! fallback.
//!
//! Discovery produces `(url, lastmod)` candidates and merges them into the
//! manifest keyed by slug. The sitemap index is the primary strategy; the
//! category pages are only crawled when the sitemap yields nothing (including
//! when the index fetch itself fails). Merging is append-only: slugs already
//! tracked keep their status and history, which is what makes re-discovery
//! on later runs incremental.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{info, warn};
use url::Url;

use crate::error::ScrapeError;
use crate::fetch::Fetch;
use crate::manifest::{add_entry, load_manifest, now_iso, save_manifest};
use crate::models::Manifest;
use crate::utils::absolutize;

const SITEMAP_INDEX_URL: &str = "https://www.tasteofcinema.com/wp-sitemap.xml";

/// WordPress-generated post sitemaps follow this naming pattern; taxonomy
/// and user sitemaps do not and are ignored.
static POST_SITEMAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)wp-sitemap-posts-post-\d+\.xml").unwrap());

/// Category listing pages crawled when the sitemap is unavailable.
const CATEGORY_URLS: [&str; 4] = [
    "https://www.tasteofcinema.com/category/features/",
    "https://www.tasteofcinema.com/category/film-lists/",
    "https://www.tasteofcinema.com/category/reviews/",
    "https://www.tasteofcinema.com/category/editorial/",
];

/// A discovered candidate: article URL plus the sitemap `lastmod`, if any.
pub type UrlLastmod = (String, Option<String>);

// ---------------------------------------------------------------------------
// Sitemap parsing
// ---------------------------------------------------------------------------

/// Parse a sitemap index document and return the sub-sitemap URLs matching
/// the post sitemap pattern.
pub fn parse_sitemap_index(xml: &[u8]) -> Result<Vec<String>, ScrapeError> {
    let text = String::from_utf8_lossy(xml);
    let mut reader = Reader::from_str(&text);
    let mut locs = Vec::new();
    let mut in_loc = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"loc" => in_loc = true,
            Event::Text(e) if in_loc => {
                let loc = quick_xml::escape::unescape(
                    &e.decode().map_err(quick_xml::Error::from)?,
                )
                .map_err(quick_xml::Error::from)?
                .trim()
                .to_string();
                if POST_SITEMAP_RE.is_match(&loc) {
                    locs.push(loc);
                }
            }
            Event::End(e) if e.name().as_ref() == b"loc" => in_loc = false,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(locs)
}

/// Parse a post sub-sitemap into `(article_url, lastmod)` pairs.
///
/// `lastmod` is `None` when absent from the XML. Image extension elements
/// (`image:loc`) are not picked up because their qualified name differs.
pub fn parse_post_sitemap(xml: &[u8]) -> Result<Vec<UrlLastmod>, ScrapeError> {
    let text = String::from_utf8_lossy(xml);
    let mut reader = Reader::from_str(&text);
    let mut results = Vec::new();

    let mut in_url = false;
    let mut in_loc = false;
    let mut in_lastmod = false;
    let mut loc = String::new();
    let mut lastmod: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"url" => {
                    in_url = true;
                    loc.clear();
                    lastmod = None;
                }
                b"loc" if in_url => in_loc = true,
                b"lastmod" if in_url => in_lastmod = true,
                _ => {}
            },
            Event::Text(e) if in_loc => {
                loc = quick_xml::escape::unescape(
                    &e.decode().map_err(quick_xml::Error::from)?,
                )
                .map_err(quick_xml::Error::from)?
                .trim()
                .to_string();
            }
            Event::Text(e) if in_lastmod => {
                let value = quick_xml::escape::unescape(
                    &e.decode().map_err(quick_xml::Error::from)?,
                )
                .map_err(quick_xml::Error::from)?
                .trim()
                .to_string();
                if !value.is_empty() {
                    lastmod = Some(value);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"loc" => in_loc = false,
                b"lastmod" => in_lastmod = false,
                b"url" => {
                    if in_url && !loc.is_empty() {
                        results.push((loc.clone(), lastmod.take()));
                    }
                    in_url = false;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(results)
}

/// Pull the sitemap index and iterate over all post sub-sitemaps.
///
/// A sub-sitemap that fails to fetch or parse is logged and skipped; only a
/// failure of the index request itself propagates. Results are deduplicated
/// by URL.
pub async fn fetch_sitemap_articles<F: Fetch>(
    fetcher: &F,
    delay: Duration,
) -> Result<Vec<UrlLastmod>, ScrapeError> {
    info!(url = SITEMAP_INDEX_URL, "Fetching sitemap index");
    let index_bytes = fetcher.fetch(SITEMAP_INDEX_URL).await?;
    let sub_sitemaps = parse_sitemap_index(&index_bytes)?;
    info!(count = sub_sitemaps.len(), "Found post sub-sitemaps");

    let mut seen: HashSet<String> = HashSet::new();
    let mut articles = Vec::new();

    for sub_url in sub_sitemaps {
        tokio::time::sleep(delay).await;
        let parsed = match fetcher.fetch(&sub_url).await {
            Ok(bytes) => parse_post_sitemap(&bytes),
            Err(e) => {
                warn!(url = %sub_url, error = %e, "Failed to fetch sub-sitemap; skipping");
                continue;
            }
        };
        match parsed {
            Ok(entries) => {
                for (url, lastmod) in entries {
                    if seen.insert(url.clone()) {
                        articles.push((url, lastmod));
                    }
                }
            }
            Err(e) => warn!(url = %sub_url, error = %e, "Failed to parse sub-sitemap; skipping"),
        }
    }

    Ok(articles)
}

// ---------------------------------------------------------------------------
// Category fallback
// ---------------------------------------------------------------------------

/// Extract article links from a category listing page.
///
/// WordPress themes wrap listing links in `entry-title` headings.
pub fn extract_listing_urls(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector =
        Selector::parse("h1.entry-title a[href], h2.entry-title a[href], h3.entry-title a[href]")
            .unwrap();
    let base = match Url::parse(base_url) {
        Ok(base) => base,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| absolutize(&base, href))
        .collect()
}

/// URL of the next listing page, or `None` on the last page.
///
/// Checks the head-level `rel="next"` link first, then the in-body
/// WordPress paginator control.
pub fn find_next_page(html: &str, current_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let base = Url::parse(current_url).ok()?;

    let head_link = Selector::parse(r#"link[rel="next"]"#).unwrap();
    if let Some(href) = document.select(&head_link).filter_map(|el| el.value().attr("href")).next()
    {
        return absolutize(&base, href);
    }

    let paginator = Selector::parse("a.next.page-numbers").unwrap();
    document
        .select(&paginator)
        .filter_map(|el| el.value().attr("href"))
        .next()
        .and_then(|href| absolutize(&base, href))
}

/// Fallback: discover article URLs by paginating through the category
/// listing pages. Deduplicates across the whole run; a page failure ends
/// that category's crawl but not the others.
pub async fn fetch_category_articles<F: Fetch>(fetcher: &F, delay: Duration) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut urls = Vec::new();

    for category_url in CATEGORY_URLS {
        let mut page_url = Some(category_url.to_string());
        let mut page_num = 1u32;

        while let Some(current) = page_url.take() {
            info!(page = page_num, url = %current, "Category scan");
            tokio::time::sleep(delay).await;
            let html = match fetcher.fetch(&current).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!(url = %current, error = %e, "Failed to fetch category page");
                    break;
                }
            };

            let mut added = 0;
            for url in extract_listing_urls(&html, &current) {
                if seen.insert(url.clone()) {
                    urls.push(url);
                    added += 1;
                }
            }
            info!(added, "New URLs on this page");

            page_url = find_next_page(&html, &current);
            page_num += 1;
        }
    }

    urls
}

// ---------------------------------------------------------------------------
// Slug derivation and manifest merge
// ---------------------------------------------------------------------------

/// Derive a slug from a URL: the last non-empty path segment.
///
/// e.g. `https://www.tasteofcinema.com/2024/my-article/` → `my-article`.
/// URLs with no path segments fall back to the URL itself.
pub fn url_to_slug(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .next_back()
        .map(str::to_string)
        .unwrap_or_else(|| url.to_string())
}

/// Merge discovered pairs into the manifest, skipping slugs already tracked.
///
/// Returns the count of newly added entries.
pub fn populate_manifest(manifest: &mut Manifest, pairs: &[UrlLastmod]) -> usize {
    let mut added = 0;
    for (url, lastmod) in pairs {
        let slug = url_to_slug(url);
        if !manifest.entries.contains_key(&slug) {
            add_entry(manifest, url, &slug, lastmod.clone());
            added += 1;
        }
    }
    added
}

// ---------------------------------------------------------------------------
// High-level entry point
// ---------------------------------------------------------------------------

/// Full discovery pipeline:
/// 1. Load the existing manifest (or start fresh).
/// 2. Fetch all article URLs from the WordPress sitemaps.
/// 3. Fall back to category listings when the sitemap yields nothing.
/// 4. Merge new URLs into the manifest and persist it.
///
/// Returns the updated manifest and the count of newly added entries.
pub async fn run_discovery<F: Fetch>(
    output_dir: &Path,
    fetcher: &F,
    delay: Duration,
    use_category_fallback: bool,
) -> Result<(Manifest, usize), ScrapeError> {
    let mut manifest = load_manifest(output_dir)?;

    let mut pairs = match fetch_sitemap_articles(fetcher, delay).await {
        Ok(pairs) => pairs,
        Err(e) => {
            if !use_category_fallback {
                return Err(ScrapeError::Discovery(e.to_string()));
            }
            warn!(error = %e, "Sitemap discovery failed; attempting category fallback");
            Vec::new()
        }
    };

    if pairs.is_empty() && use_category_fallback {
        info!("No URLs from sitemap; using category page fallback");
        pairs = fetch_category_articles(fetcher, delay)
            .await
            .into_iter()
            .map(|url| (url, None))
            .collect();
    }

    let added = populate_manifest(&mut manifest, &pairs);
    manifest.discovered_at = now_iso();
    info!(total = manifest.entries.len(), added, "Discovery complete");

    save_manifest(&mut manifest, output_dir)?;
    Ok((manifest, added))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::StubFetcher;
    use tempfile::TempDir;

    const SITEMAP_INDEX_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap>
    <loc>https://www.tasteofcinema.com/wp-sitemap-posts-post-1.xml</loc>
  </sitemap>
  <sitemap>
    <loc>https://www.tasteofcinema.com/wp-sitemap-posts-post-2.xml</loc>
  </sitemap>
</sitemapindex>
"#;

    const POST_SITEMAP_1_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"
        xmlns:image="http://www.google.com/schemas/sitemap-image/1.1">
  <url>
    <loc>https://www.tasteofcinema.com/2024/all-25-best-picture-winners/</loc>
    <lastmod>2024-01-15T00:00:00+00:00</lastmod>
  </url>
  <url>
    <loc>https://www.tasteofcinema.com/2023/top-10-films-2023/</loc>
    <lastmod>2023-12-31T00:00:00+00:00</lastmod>
  </url>
</urlset>
"#;

    #[test]
    fn test_parse_sitemap_index_extracts_post_sitemaps() {
        let urls = parse_sitemap_index(SITEMAP_INDEX_XML.as_bytes()).unwrap();
        assert_eq!(urls.len(), 2);
        assert!(urls.iter().all(|u| u.contains("wp-sitemap-posts-post-")));
    }

    #[test]
    fn test_parse_sitemap_index_ignores_taxonomy_sitemaps() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/wp-sitemap-taxonomies-category-1.xml</loc></sitemap>
  <sitemap><loc>https://example.com/wp-sitemap-posts-post-1.xml</loc></sitemap>
</sitemapindex>"#;
        let urls = parse_sitemap_index(xml).unwrap();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].contains("wp-sitemap-posts-post-1"));
    }

    #[test]
    fn test_parse_post_sitemap_returns_urls_and_lastmod() {
        let results = parse_post_sitemap(POST_SITEMAP_1_XML.as_bytes()).unwrap();
        assert_eq!(results.len(), 2);
        let urls: Vec<&str> = results.iter().map(|(u, _)| u.as_str()).collect();
        assert!(urls.contains(&"https://www.tasteofcinema.com/2024/all-25-best-picture-winners/"));
        assert!(urls.contains(&"https://www.tasteofcinema.com/2023/top-10-films-2023/"));
        assert!(results.iter().all(|(_, lastmod)| lastmod.is_some()));
    }

    #[test]
    fn test_parse_post_sitemap_handles_missing_lastmod() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/article/</loc></url>
</urlset>"#;
        let results = parse_post_sitemap(xml).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "https://example.com/article/");
        assert!(results[0].1.is_none());
    }

    #[test]
    fn test_extract_listing_urls_from_entry_titles() {
        let html = r#"<html><body>
<h2 class="entry-title"><a href="https://example.com/article-one/">Title</a></h2>
<h2 class="entry-title"><a href="/article-two/">Title 2</a></h2>
</body></html>"#;
        let urls = extract_listing_urls(html, "https://example.com/category/features/");
        assert!(urls.contains(&"https://example.com/article-one/".to_string()));
        assert!(urls.contains(&"https://example.com/article-two/".to_string()));
    }

    #[test]
    fn test_find_next_page_detects_rel_next() {
        let html = r#"<html><head>
<link rel="next" href="https://example.com/category/page/2/" />
</head><body></body></html>"#;
        assert_eq!(
            find_next_page(html, "https://example.com/category/").as_deref(),
            Some("https://example.com/category/page/2/")
        );
    }

    #[test]
    fn test_find_next_page_detects_paginator_anchor() {
        let html = r#"<html><body>
<div class="pagination"><a class="next page-numbers" href="/category/page/3/">Next</a></div>
</body></html>"#;
        assert_eq!(
            find_next_page(html, "https://example.com/category/page/2/").as_deref(),
            Some("https://example.com/category/page/3/")
        );
    }

    #[test]
    fn test_find_next_page_none_on_last_page() {
        let html = r#"<html><head></head><body><div class="pagination"></div></body></html>"#;
        assert!(find_next_page(html, "https://example.com/category/page/5/").is_none());
    }

    #[test]
    fn test_url_to_slug_takes_last_segment() {
        assert_eq!(url_to_slug("https://www.tasteofcinema.com/2024/my-article/"), "my-article");
        assert_eq!(url_to_slug("https://www.tasteofcinema.com/2024/my-article"), "my-article");
    }

    #[test]
    fn test_populate_manifest_adds_entries() {
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        let pairs = vec![
            ("https://example.com/article-a/".to_string(), Some("2026-01-01T00:00:00Z".to_string())),
            ("https://example.com/article-b/".to_string(), None),
        ];
        assert_eq!(populate_manifest(&mut manifest, &pairs), 2);
        assert!(manifest.entries.contains_key("article-a"));
        assert!(manifest.entries.contains_key("article-b"));
    }

    #[test]
    fn test_populate_manifest_deduplicates_same_slug() {
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        // Both URLs derive the same slug.
        let pairs = vec![
            ("https://example.com/2024/article-a/".to_string(), None),
            ("https://example.com/2025/article-a/".to_string(), None),
        ];
        assert_eq!(populate_manifest(&mut manifest, &pairs), 1);
        assert_eq!(manifest.entries.len(), 1);
    }

    #[test]
    fn test_populate_manifest_is_append_only() {
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        add_entry(&mut manifest, "https://example.com/existing/", "existing", None);

        let pairs = vec![
            ("https://example.com/existing/".to_string(), None),
            ("https://example.com/brand-new/".to_string(), None),
        ];
        assert_eq!(populate_manifest(&mut manifest, &pairs), 1);
        assert!(manifest.entries.contains_key("brand-new"));
        assert_eq!(manifest.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_sitemap_articles_skips_failing_sub_sitemap() {
        let fetcher = StubFetcher::new()
            .route("wp-sitemap.xml", SITEMAP_INDEX_XML.as_bytes())
            .route("wp-sitemap-posts-post-1.xml", POST_SITEMAP_1_XML.as_bytes())
            .fail("wp-sitemap-posts-post-2.xml", "timeout");

        let results = fetch_sitemap_articles(&fetcher, Duration::ZERO).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_run_discovery_populates_and_saves() {
        let dir = TempDir::new().unwrap();
        let fetcher = StubFetcher::new()
            .route("wp-sitemap.xml", SITEMAP_INDEX_XML.as_bytes())
            .route("wp-sitemap-posts-post-1.xml", POST_SITEMAP_1_XML.as_bytes())
            .fail("wp-sitemap-posts-post-2.xml", "timeout");

        let (manifest, added) =
            run_discovery(dir.path(), &fetcher, Duration::ZERO, true).await.unwrap();
        assert_eq!(added, 2);
        assert!(manifest.entries.contains_key("all-25-best-picture-winners"));
        assert!(dir.path().join("manifest.json").exists());

        // Second run discovers the same URLs and adds nothing.
        let (_, added_again) =
            run_discovery(dir.path(), &fetcher, Duration::ZERO, true).await.unwrap();
        assert_eq!(added_again, 0);
    }

    #[tokio::test]
    async fn test_run_discovery_falls_back_to_categories() {
        let dir = TempDir::new().unwrap();
        let listing = r#"<html><body>
<h2 class="entry-title"><a href="https://www.tasteofcinema.com/2024/fallback-article/">T</a></h2>
</body></html>"#;
        let fetcher = StubFetcher::new()
            .fail("wp-sitemap.xml", "connection refused")
            .route("/category/", listing.as_bytes());

        let (manifest, added) =
            run_discovery(dir.path(), &fetcher, Duration::ZERO, true).await.unwrap();
        assert_eq!(added, 1);
        assert!(manifest.entries.contains_key("fallback-article"));
    }

    #[tokio::test]
    async fn test_run_discovery_fatal_without_fallback() {
        let dir = TempDir::new().unwrap();
        let fetcher = StubFetcher::new().fail("wp-sitemap.xml", "connection refused");
        let err = run_discovery(dir.path(), &fetcher, Duration::ZERO, false).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Discovery(_)));
    }
}
