//! Data models for the manifest and scraped articles.
//!
//! This module defines the core data structures used throughout the
//! application:
//! - [`Manifest`]: the persisted tracking document for all discovered articles
//! - [`ManifestEntry`]: per-article scrape status and stats, keyed by slug
//! - [`ArticleData`]: one fully extracted article, written to
//!   `articles/<slug>.json`
//! - [`PageFields`]: the fixed-shape record produced by parsing a single
//!   article page
//!
//! `Manifest::entries` is an [`IndexMap`] rather than a `HashMap` because
//! insertion order is significant: default iteration follows discovery order
//! and sorted views break ties by it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Status of a single article in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Pending,
    Completed,
    Failed,
}

/// Tracking entry for a single article in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Canonical source URL of the article.
    pub url: String,
    /// Stable identifier: last non-empty path segment of the URL.
    pub slug: String,
    pub status: ScrapeStatus,
    /// `lastmod` value from the sitemap, when the article came from one.
    #[serde(default)]
    pub last_modified: Option<String>,
    /// Set when the entry transitions to completed or failed.
    #[serde(default)]
    pub scraped_at: Option<String>,
    /// Last failure message; `None` unless status is failed.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub pages_found: u32,
    #[serde(default)]
    pub images_found: u32,
    #[serde(default)]
    pub images_downloaded: u32,
}

impl ManifestEntry {
    pub fn new(url: impl Into<String>, slug: impl Into<String>, last_modified: Option<String>) -> Self {
        Self {
            url: url.into(),
            slug: slug.into(),
            status: ScrapeStatus::Pending,
            last_modified,
            scraped_at: None,
            error: None,
            pages_found: 0,
            images_found: 0,
            images_downloaded: 0,
        }
    }
}

/// Root manifest tracking all discovered articles.
///
/// Persisted as `manifest.json` in the output directory. The summary
/// counters (`total`, `completed`, `failed`) are recomputed from `entries`
/// on every save; in-memory values are never trusted at persistence time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// When discovery last ran, ISO 8601.
    pub discovered_at: String,
    pub total: usize,
    #[serde(default)]
    pub completed: usize,
    #[serde(default)]
    pub failed: usize,
    /// Keyed by slug; insertion order is discovery order.
    #[serde(default)]
    pub entries: IndexMap<String, ManifestEntry>,
}

impl Manifest {
    /// A fresh empty manifest stamped with the current time.
    pub fn new(discovered_at: impl Into<String>) -> Self {
        Self {
            version: 1,
            discovered_at: discovered_at.into(),
            total: 0,
            completed: 0,
            failed: 0,
            entries: IndexMap::new(),
        }
    }
}

/// A single fully scraped article, written to `articles/<slug>.json`.
///
/// Built fresh on every extraction and never mutated afterwards; reruns
/// overwrite the persisted file with a new value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleData {
    pub title: String,
    /// Merged HTML content across all pages, in page order.
    pub content: String,
    pub author: String,
    pub url: String,
    #[serde(default)]
    pub featured_image: Option<String>,
    /// First-seen order across pages, no duplicates.
    #[serde(default)]
    pub inline_images: Vec<String>,
    /// Titles recognized in the merged content, first-seen order.
    #[serde(default)]
    pub movie_titles: Vec<String>,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// How many pages were merged into `content`; at least 1.
    pub pages_merged: u32,
    /// When extraction ran, ISO 8601.
    pub scraped_at: String,
}

/// Fields parsed out of one article page.
///
/// A fixed-shape record rather than an open map so the extraction
/// contract is statically checkable. Missing title is empty, missing
/// author and category get their defaults at parse time.
#[derive(Debug, Clone, Default)]
pub struct PageFields {
    pub title: String,
    pub author: String,
    /// Raw inner HTML of each content container on the page.
    pub content_parts: Vec<String>,
    pub featured_image: Option<String>,
    pub inline_images: Vec<String>,
    pub pagination_links: Vec<String>,
    pub category: String,
    pub tags: Vec<String>,
}
