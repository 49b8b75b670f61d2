//! Article content extraction: per-page parsing, pagination merge, movie
//! title recognition, and artifact output.
//!
//! The caller fetches the first page; this module follows same-article
//! pagination links breadth-first to assemble the complete article. Content
//! fragments are only ever appended in page-fetch order, inline images keep
//! first-seen order with duplicates dropped, and all page-1 metadata (title,
//! author, featured image, category, tags) wins. A visited set plus a hard
//! page cap bound the walk against malformed or cyclic paginators.
//!
//! Failure of a continuation page is logged and skipped; failure of the
//! first page is the caller's problem and never reaches this module.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::time::Duration;

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::discover::url_to_slug;
use crate::error::ScrapeError;
use crate::fetch::Fetch;
use crate::manifest::{StatusFields, now_iso, update_entry_status};
use crate::models::{ArticleData, Manifest, PageFields, ScrapeStatus};
use crate::utils::{absolutize, last_path_segment};

/// Byline used when the page carries no author markup.
pub const DEFAULT_AUTHOR: &str = "Taste of Cinema";
pub const DEFAULT_CATEGORY: &str = "uncategorized";

/// Hard cap on pages fetched per article; the visited set is the primary
/// cycle guard, this bounds malformed paginators.
pub const MAX_ARTICLE_PAGES: usize = 20;

// Movie title patterns. Bold items like "<strong>25. Crash (2005)</strong>"
// and plain numbered lines like "10. Movie Name" in tag-stripped text.
static BOLD_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<(?:strong|b)>\s*(?:\d{1,3}\.\s+)?([A-Z][\w\s'"&:-]{3,}?)\s*(?:\(\d{4}\))?\s*</(?:strong|b)>"#,
    )
    .unwrap()
});
static NUMBERED_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*\d{1,3}\.\s+([A-Z][\w\s'"&:-]+?)(?:\s*\(\d{4}\))?\s*$"#).unwrap()
});
static TAG_STRIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

// ---------------------------------------------------------------------------
// Per-page parsing
// ---------------------------------------------------------------------------

/// Parse one article page into its [`PageFields`].
///
/// Selector targets follow the WordPress theme: `.entry-title`,
/// `.author-name`, `.entry-content`, `.wp-post-image`, the paginator
/// controls, and the category/tag link spans. Missing author and category
/// get their fixed defaults here.
pub fn parse_article_page(html: &str, url: &str) -> PageFields {
    let document = Html::parse_document(html);
    let base = Url::parse(url).ok();

    let resolve = |href: &str| -> Option<String> {
        match &base {
            Some(base) => absolutize(base, href),
            None => (!href.is_empty()).then(|| href.to_string()),
        }
    };

    let title_sel = Selector::parse("h1.entry-title, h2.entry-title").unwrap();
    let title = document
        .select(&title_sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|t| !t.is_empty())
        .unwrap_or_default();

    let author_sel = Selector::parse("span.author-name").unwrap();
    let author = document
        .select(&author_sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|a| !a.is_empty())
        .unwrap_or_else(|| DEFAULT_AUTHOR.to_string());

    let content_sel = Selector::parse("div.entry-content").unwrap();
    let content_parts: Vec<String> =
        document.select(&content_sel).map(|el| el.inner_html()).collect();

    let featured_sel = Selector::parse("img.wp-post-image").unwrap();
    let featured_image = document
        .select(&featured_sel)
        .filter_map(|el| el.value().attr("src"))
        .find_map(resolve);

    let inline_sel = Selector::parse("div.entry-content img[src]").unwrap();
    let inline_images: Vec<String> = document
        .select(&inline_sel)
        .filter_map(|el| el.value().attr("src"))
        .filter_map(resolve)
        .collect();

    let paginator_sel =
        Selector::parse(".page-links a[href], .pagination a[href], a.post-page-numbers[href]")
            .unwrap();
    let pagination_links: Vec<String> = document
        .select(&paginator_sel)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(resolve)
        .unique()
        .collect();

    let category_sel = Selector::parse("span.cat-links a[href]").unwrap();
    let category = document
        .select(&category_sel)
        .filter_map(|el| el.value().attr("href"))
        .find_map(last_path_segment)
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let tag_sel = Selector::parse("span.tag-links a[href]").unwrap();
    let tags: Vec<String> = document
        .select(&tag_sel)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| last_path_segment(href))
        .unique()
        .collect();

    PageFields {
        title,
        author,
        content_parts,
        featured_image,
        inline_images,
        pagination_links,
        category,
        tags,
    }
}

// ---------------------------------------------------------------------------
// Pagination merge
// ---------------------------------------------------------------------------

fn url_path(url: &str) -> String {
    Url::parse(url).map(|u| u.path().to_string()).unwrap_or_else(|_| url.to_string())
}

/// Whether `page_url` is a paginated continuation of `base_url`.
///
/// e.g. base `.../my-article/`, page `.../my-article/2/`.
pub fn is_same_article(base_url: &str, page_url: &str) -> bool {
    let base_path = url_path(base_url);
    let page_path = url_path(page_url);
    page_path.trim_end_matches('/').starts_with(base_path.trim_end_matches('/'))
}

/// Follow pagination links breadth-first and return all parsed pages in
/// fetch order, starting with the already-parsed first page.
///
/// A continuation page that fails to fetch is skipped; pages collected so
/// far are still returned. Terminates within `max_pages` even when a
/// paginator links back to an earlier page.
pub async fn fetch_all_pages<F: Fetch>(
    base_url: &str,
    first_page: PageFields,
    fetcher: &F,
    delay: Duration,
    max_pages: usize,
) -> Vec<PageFields> {
    let mut visited: HashSet<String> = HashSet::from([base_url.to_string()]);
    let mut queue: VecDeque<String> = first_page
        .pagination_links
        .iter()
        .filter(|link| !visited.contains(*link) && is_same_article(base_url, link))
        .cloned()
        .collect();
    let mut pages = vec![first_page];

    while let Some(next_url) = queue.pop_front() {
        if pages.len() >= max_pages {
            warn!(base = %base_url, cap = max_pages, "Page cap reached; stopping pagination walk");
            break;
        }
        if !visited.insert(next_url.clone()) {
            continue;
        }

        tokio::time::sleep(delay).await;
        let html = match fetcher.fetch(&next_url).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(url = %next_url, error = %e, "Failed to fetch continuation page; skipping");
                continue;
            }
        };

        let page = parse_article_page(&html, &next_url);
        for link in &page.pagination_links {
            if !visited.contains(link) && is_same_article(base_url, link) {
                queue.push_back(link.clone());
            }
        }
        debug!(url = %next_url, "Merged continuation page");
        pages.push(page);
    }

    pages
}

// ---------------------------------------------------------------------------
// Movie title extraction
// ---------------------------------------------------------------------------

/// Recognize movie titles in merged content HTML.
///
/// Two independent passes over the same content: bold/emphasis-wrapped
/// titles (optionally numbered), then plain numbered lines after markup is
/// stripped. Union of both, exact duplicates dropped, first-seen order.
pub fn extract_movie_titles(content_html: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut titles = Vec::new();

    for captures in BOLD_TITLE_RE.captures_iter(content_html) {
        let title = captures[1].trim().to_string();
        if title.len() >= 3 && seen.insert(title.clone()) {
            titles.push(title);
        }
    }

    let text_only = TAG_STRIP_RE.replace_all(content_html, " ");
    for captures in NUMBERED_TITLE_RE.captures_iter(&text_only) {
        let title = captures[1].trim().to_string();
        if title.len() >= 3 && seen.insert(title.clone()) {
            titles.push(title);
        }
    }

    titles
}

// ---------------------------------------------------------------------------
// High-level extraction
// ---------------------------------------------------------------------------

/// Extract the complete article at `url`, following pagination.
///
/// 1. Parse the first page (already fetched by the caller).
/// 2. Merge continuation pages.
/// 3. Derive movie titles from the merged content.
/// 4. Persist `articles/<slug>.json` when an output directory is given.
/// 5. Mark the manifest entry completed when a manifest and slug are given;
///    a slug the manifest does not track is tolerated silently so ad hoc
///    single-article runs work without one.
pub async fn extract_article<F: Fetch>(
    url: &str,
    first_page_html: &[u8],
    fetcher: &F,
    delay: Duration,
    output_dir: Option<&Path>,
    manifest: Option<&mut Manifest>,
    slug: Option<&str>,
) -> Result<ArticleData, ScrapeError> {
    let first_page = parse_article_page(&String::from_utf8_lossy(first_page_html), url);
    let pages = fetch_all_pages(url, first_page, fetcher, delay, MAX_ARTICLE_PAGES).await;

    let merged_content =
        pages.iter().flat_map(|p| p.content_parts.iter().map(String::as_str)).join("\n");
    let inline_images: Vec<String> =
        pages.iter().flat_map(|p| p.inline_images.iter()).unique().cloned().collect();

    // Metadata comes from page 1 only.
    let first = &pages[0];
    let title = if first.title.is_empty() { url.to_string() } else { first.title.clone() };
    let movie_titles = extract_movie_titles(&merged_content);

    let article = ArticleData {
        title,
        content: merged_content,
        author: first.author.clone(),
        url: url.to_string(),
        featured_image: first.featured_image.clone(),
        inline_images,
        movie_titles,
        category: first.category.clone(),
        tags: first.tags.clone(),
        pages_merged: pages.len() as u32,
        scraped_at: now_iso(),
    };

    if let Some(output_dir) = output_dir {
        let slug_owned = slug.map(str::to_string).unwrap_or_else(|| url_to_slug(url));
        let articles_dir = output_dir.join("articles");
        tokio::fs::create_dir_all(&articles_dir).await?;
        let out_path = articles_dir.join(format!("{slug_owned}.json"));
        let mut json = serde_json::to_string_pretty(&article)?;
        json.push('\n');
        tokio::fs::write(&out_path, json).await?;
        info!(
            path = %out_path.display(),
            pages = article.pages_merged,
            images = article.inline_images.len(),
            "Saved article artifact"
        );
    }

    if let (Some(manifest), Some(slug)) = (manifest, slug) {
        let images_found =
            article.inline_images.len() as u32 + u32::from(article.featured_image.is_some());
        let update = update_entry_status(
            manifest,
            slug,
            ScrapeStatus::Completed,
            StatusFields {
                pages_found: Some(article.pages_merged),
                images_found: Some(images_found),
                // Filled in by the image archiver afterwards.
                images_downloaded: Some(0),
                error: None,
            },
        );
        if let Err(ScrapeError::EntryNotFound { .. }) = update {
            debug!(slug, "No manifest entry to update; continuing");
        }
    }

    Ok(article)
}
