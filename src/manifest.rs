//! Manifest store: load/save, entry CRUD, status transitions, and the
//! sorted/filtered views the orchestrator selects work from.
//!
//! The manifest is a single JSON document (`manifest.json` in the output
//! directory). Saving recomputes the summary counters from the entries and
//! writes through a temp file + rename so an interrupted run never leaves a
//! corrupt manifest behind the previous valid one.

use std::path::Path;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use clap::ValueEnum;
use tracing::debug;
use url::Url;

use crate::error::ScrapeError;
use crate::models::{Manifest, ManifestEntry, ScrapeStatus};

const MANIFEST_FILENAME: &str = "manifest.json";

/// Current UTC time as an ISO 8601 string with a `Z` suffix.
pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Load `manifest.json` from `output_dir`.
///
/// A missing file yields a fresh empty manifest (not yet persisted);
/// a present-but-unreadable file is an error.
pub fn load_manifest(output_dir: &Path) -> Result<Manifest, ScrapeError> {
    let path = output_dir.join(MANIFEST_FILENAME);
    if !path.exists() {
        return Ok(Manifest::new(now_iso()));
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Persist `manifest` to `output_dir/manifest.json`.
///
/// Recomputes `total`/`completed`/`failed` from the entries before writing,
/// creates the output directory if absent, and replaces the previous file
/// atomically via rename.
pub fn save_manifest(manifest: &mut Manifest, output_dir: &Path) -> Result<(), ScrapeError> {
    manifest.total = manifest.entries.len();
    manifest.completed = manifest
        .entries
        .values()
        .filter(|e| e.status == ScrapeStatus::Completed)
        .count();
    manifest.failed = manifest
        .entries
        .values()
        .filter(|e| e.status == ScrapeStatus::Failed)
        .count();

    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(MANIFEST_FILENAME);
    let tmp = output_dir.join(format!("{MANIFEST_FILENAME}.tmp"));

    let mut json = serde_json::to_string_pretty(manifest)?;
    json.push('\n');
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, &path)?;
    debug!(path = %path.display(), total = manifest.total, "Saved manifest");
    Ok(())
}

/// Add an entry for `url`/`slug` unless the slug is already tracked.
///
/// Idempotent: an existing entry is returned unchanged, with its status and
/// history intact. This is what makes re-discovery append-only.
pub fn add_entry<'a>(
    manifest: &'a mut Manifest,
    url: &str,
    slug: &str,
    last_modified: Option<String>,
) -> &'a ManifestEntry {
    manifest
        .entries
        .entry(slug.to_string())
        .or_insert_with(|| ManifestEntry::new(url, slug, last_modified))
}

/// Optional fields accompanying a status transition.
///
/// Counters update only when explicitly supplied; an omitted counter keeps
/// its previous value.
#[derive(Debug, Default, Clone)]
pub struct StatusFields {
    pub pages_found: Option<u32>,
    pub images_found: Option<u32>,
    pub images_downloaded: Option<u32>,
    pub error: Option<String>,
}

/// Transition the entry for `slug` to `status`.
///
/// Completion stamps `scraped_at` and clears any previous error; failure
/// stamps `scraped_at` and records the message. Addressing an untracked
/// slug is a [`ScrapeError::EntryNotFound`], never a silent insert.
pub fn update_entry_status<'a>(
    manifest: &'a mut Manifest,
    slug: &str,
    status: ScrapeStatus,
    fields: StatusFields,
) -> Result<&'a ManifestEntry, ScrapeError> {
    let entry = manifest
        .entries
        .get_mut(slug)
        .ok_or_else(|| ScrapeError::EntryNotFound { slug: slug.to_string() })?;

    entry.status = status;
    match status {
        ScrapeStatus::Completed => {
            entry.scraped_at = Some(now_iso());
            entry.error = None;
        }
        ScrapeStatus::Failed => {
            entry.scraped_at = Some(now_iso());
            entry.error = fields.error.clone();
        }
        ScrapeStatus::Pending => {}
    }

    if let Some(pages) = fields.pages_found {
        entry.pages_found = pages;
    }
    if let Some(images) = fields.images_found {
        entry.images_found = images;
    }
    if let Some(downloaded) = fields.images_downloaded {
        entry.images_downloaded = downloaded;
    }

    Ok(entry)
}

/// Entries still needing work, in manifest order.
///
/// Failed entries are included: they are retry candidates on the next
/// incremental run.
pub fn get_pending_entries(manifest: &Manifest) -> Vec<&ManifestEntry> {
    manifest
        .entries
        .values()
        .filter(|e| matches!(e.status, ScrapeStatus::Pending | ScrapeStatus::Failed))
        .collect()
}

/// Force every entry back to pending, clearing error and scrape timestamps.
///
/// Returns how many entries actually changed.
pub fn reset_all_to_pending(manifest: &mut Manifest) -> usize {
    let mut count = 0;
    for entry in manifest.entries.values_mut() {
        if entry.status != ScrapeStatus::Pending {
            entry.status = ScrapeStatus::Pending;
            entry.scraped_at = None;
            entry.error = None;
            count += 1;
        }
    }
    count
}

/// Processing order for the scrape phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortDirection {
    /// Newest `last_modified` first.
    Latest,
    /// Oldest `last_modified` first.
    Oldest,
}

/// Entries ordered by `last_modified`.
///
/// Dated entries are compared on their UTC instant; entries without a
/// parsable date always sort after every dated entry, for both directions.
/// The sort is stable, so ties keep manifest insertion order. Returns
/// clones so the caller can keep iterating while mutating the manifest.
pub fn get_sorted_entries(
    manifest: &Manifest,
    direction: SortDirection,
    pending_only: bool,
) -> Vec<ManifestEntry> {
    let mut dated: Vec<(DateTime<Utc>, ManifestEntry)> = Vec::new();
    let mut undated: Vec<ManifestEntry> = Vec::new();

    for entry in manifest.entries.values() {
        if pending_only && !matches!(entry.status, ScrapeStatus::Pending | ScrapeStatus::Failed) {
            continue;
        }
        match entry.last_modified.as_deref().and_then(parse_last_modified) {
            Some(ts) => dated.push((ts.with_timezone(&Utc), entry.clone())),
            None => undated.push(entry.clone()),
        }
    }

    match direction {
        SortDirection::Latest => dated.sort_by(|a, b| b.0.cmp(&a.0)),
        SortDirection::Oldest => dated.sort_by(|a, b| a.0.cmp(&b.0)),
    }

    dated.into_iter().map(|(_, e)| e).chain(undated).collect()
}

/// Parse a sitemap `lastmod` value, keeping its own UTC offset.
///
/// Timestamps without an explicit offset (naive datetimes, bare dates) are
/// treated as UTC.
pub fn parse_last_modified(value: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc().fixed_offset());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().fixed_offset());
    }
    None
}

/// Publication year from the URL's leading path segment.
///
/// Only the first non-empty segment counts; a year-like substring later in
/// the path (e.g. inside the slug) is never matched.
pub fn extract_year_from_url(url: &str) -> Option<i32> {
    let parsed = Url::parse(url).ok()?;
    let first = parsed.path_segments()?.find(|s| !s.is_empty())?;
    if first.len() == 4 && first.chars().all(|c| c.is_ascii_digit()) {
        first.parse().ok()
    } else {
        None
    }
}

/// Calendar month (1–12) of a `lastmod` value, in the timestamp's own
/// timezone, not normalized to UTC. `None` for absent or unparsable input.
pub fn extract_month_from_lastmod(last_modified: Option<&str>) -> Option<u32> {
    parse_last_modified(last_modified?).map(|dt| dt.month())
}

/// Resolve a slug to its URL for single-article mode.
///
/// A miss is fatal for the invocation; the error message tells the operator
/// how to proceed.
pub fn lookup_slug(manifest: &Manifest, slug: &str) -> Result<String, ScrapeError> {
    manifest
        .entries
        .get(slug)
        .map(|e| e.url.clone())
        .ok_or_else(|| ScrapeError::SlugNotFound { slug: slug.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_manifest(entries: Vec<ManifestEntry>) -> Manifest {
        let mut manifest = Manifest::new("2026-01-01T00:00:00Z");
        for entry in entries {
            manifest.entries.insert(entry.slug.clone(), entry);
        }
        manifest
    }

    fn entry(slug: &str, last_modified: Option<&str>) -> ManifestEntry {
        ManifestEntry::new(
            format!("https://www.tasteofcinema.com/2024/{slug}/"),
            slug,
            last_modified.map(String::from),
        )
    }

    // ------------------------------------------------------------------
    // load / save
    // ------------------------------------------------------------------

    #[test]
    fn test_load_manifest_missing_file_returns_empty() {
        let dir = TempDir::new().unwrap();
        let manifest = load_manifest(&dir.path().join("fresh")).unwrap();
        assert_eq!(manifest.total, 0);
        assert!(manifest.entries.is_empty());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::new("2026-02-28T12:00:00Z");
        add_entry(&mut manifest, "https://example.com/article/", "article", None);
        save_manifest(&mut manifest, dir.path()).unwrap();

        let loaded = load_manifest(dir.path()).unwrap();
        assert_eq!(loaded.total, 1);
        assert_eq!(loaded.entries["article"].url, "https://example.com/article/");
        assert_eq!(loaded.completed, manifest.completed);
        assert_eq!(loaded.failed, manifest.failed);
    }

    #[test]
    fn test_save_manifest_creates_directory() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("new_dir");
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        save_manifest(&mut manifest, &target).unwrap();
        assert!(target.join("manifest.json").exists());
    }

    #[test]
    fn test_save_manifest_recomputes_counts() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        add_entry(&mut manifest, "https://example.com/a/", "a", None);
        add_entry(&mut manifest, "https://example.com/b/", "b", None);
        add_entry(&mut manifest, "https://example.com/c/", "c", None);
        update_entry_status(&mut manifest, "b", ScrapeStatus::Completed, StatusFields::default())
            .unwrap();
        update_entry_status(
            &mut manifest,
            "c",
            ScrapeStatus::Failed,
            StatusFields { error: Some("timeout".to_string()), ..Default::default() },
        )
        .unwrap();

        save_manifest(&mut manifest, dir.path()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("manifest.json")).unwrap())
                .unwrap();
        assert_eq!(raw["total"], 3);
        assert_eq!(raw["completed"], 1);
        assert_eq!(raw["failed"], 1);
    }

    #[test]
    fn test_save_manifest_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        save_manifest(&mut manifest, dir.path()).unwrap();
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }

    // ------------------------------------------------------------------
    // add_entry
    // ------------------------------------------------------------------

    #[test]
    fn test_add_entry_creates_pending() {
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        let entry = add_entry(&mut manifest, "https://example.com/x/", "x", None);
        assert_eq!(entry.slug, "x");
        assert_eq!(entry.status, ScrapeStatus::Pending);
        assert!(manifest.entries.contains_key("x"));
    }

    #[test]
    fn test_add_entry_is_idempotent() {
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        add_entry(&mut manifest, "https://example.com/x/", "x", None);
        update_entry_status(&mut manifest, "x", ScrapeStatus::Completed, StatusFields::default())
            .unwrap();

        // Second add must not clobber the completed status.
        let entry = add_entry(&mut manifest, "https://example.com/x/", "x", None);
        assert_eq!(entry.status, ScrapeStatus::Completed);
        assert_eq!(manifest.entries.len(), 1);
    }

    // ------------------------------------------------------------------
    // update_entry_status
    // ------------------------------------------------------------------

    #[test]
    fn test_update_entry_to_completed() {
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        add_entry(&mut manifest, "https://example.com/x/", "x", None);
        update_entry_status(
            &mut manifest,
            "x",
            ScrapeStatus::Completed,
            StatusFields {
                pages_found: Some(3),
                images_found: Some(10),
                images_downloaded: Some(10),
                error: None,
            },
        )
        .unwrap();

        let entry = &manifest.entries["x"];
        assert_eq!(entry.status, ScrapeStatus::Completed);
        assert_eq!(entry.pages_found, 3);
        assert_eq!(entry.images_found, 10);
        assert!(entry.scraped_at.is_some());
        assert!(entry.error.is_none());
    }

    #[test]
    fn test_update_entry_to_failed_records_error() {
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        add_entry(&mut manifest, "https://example.com/x/", "x", None);
        update_entry_status(
            &mut manifest,
            "x",
            ScrapeStatus::Failed,
            StatusFields { error: Some("Connection timeout".to_string()), ..Default::default() },
        )
        .unwrap();

        let entry = &manifest.entries["x"];
        assert_eq!(entry.status, ScrapeStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("Connection timeout"));
    }

    #[test]
    fn test_update_entry_omitted_counters_keep_values() {
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        add_entry(&mut manifest, "https://example.com/x/", "x", None);
        update_entry_status(
            &mut manifest,
            "x",
            ScrapeStatus::Completed,
            StatusFields { pages_found: Some(4), images_found: Some(7), ..Default::default() },
        )
        .unwrap();
        // Later update with only the downloaded counter.
        update_entry_status(
            &mut manifest,
            "x",
            ScrapeStatus::Completed,
            StatusFields { images_downloaded: Some(7), ..Default::default() },
        )
        .unwrap();

        let entry = &manifest.entries["x"];
        assert_eq!(entry.pages_found, 4);
        assert_eq!(entry.images_found, 7);
        assert_eq!(entry.images_downloaded, 7);
    }

    #[test]
    fn test_update_entry_missing_slug_is_not_found() {
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        let err = update_entry_status(
            &mut manifest,
            "nonexistent",
            ScrapeStatus::Completed,
            StatusFields::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ScrapeError::EntryNotFound { .. }));
        assert!(manifest.entries.is_empty());
    }

    // ------------------------------------------------------------------
    // get_pending_entries / reset_all_to_pending
    // ------------------------------------------------------------------

    #[test]
    fn test_get_pending_entries_retries_failed_skips_completed() {
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        add_entry(&mut manifest, "https://example.com/a/", "a", None);
        add_entry(&mut manifest, "https://example.com/b/", "b", None);
        add_entry(&mut manifest, "https://example.com/c/", "c", None);
        update_entry_status(&mut manifest, "b", ScrapeStatus::Completed, StatusFields::default())
            .unwrap();
        update_entry_status(&mut manifest, "c", ScrapeStatus::Failed, StatusFields::default())
            .unwrap();

        let slugs: Vec<&str> = get_pending_entries(&manifest).iter().map(|e| e.slug.as_str()).collect();
        assert_eq!(slugs, vec!["a", "c"]);
    }

    #[test]
    fn test_reset_all_to_pending_counts_changes() {
        let mut manifest = Manifest::new("2026-02-28T00:00:00Z");
        add_entry(&mut manifest, "https://example.com/a/", "a", None);
        add_entry(&mut manifest, "https://example.com/b/", "b", None);
        add_entry(&mut manifest, "https://example.com/c/", "c", None);
        update_entry_status(&mut manifest, "a", ScrapeStatus::Completed, StatusFields::default())
            .unwrap();
        update_entry_status(
            &mut manifest,
            "b",
            ScrapeStatus::Failed,
            StatusFields { error: Some("err".to_string()), ..Default::default() },
        )
        .unwrap();

        // "c" is already pending and must not count.
        assert_eq!(reset_all_to_pending(&mut manifest), 2);
        for entry in manifest.entries.values() {
            assert_eq!(entry.status, ScrapeStatus::Pending);
            assert!(entry.error.is_none());
            assert!(entry.scraped_at.is_none());
        }
    }

    // ------------------------------------------------------------------
    // get_sorted_entries
    // ------------------------------------------------------------------

    fn varied_entries() -> Vec<ManifestEntry> {
        vec![
            entry("old-article", Some("2022-06-15T10:00:00+00:00")),
            entry("newest-article", Some("2024-03-20T14:30:00+00:00")),
            entry("mid-article", Some("2023-09-01T08:00:00-08:00")),
            entry("no-date-article", None),
        ]
    }

    #[test]
    fn test_sorted_latest_puts_newest_first() {
        let manifest = make_manifest(varied_entries());
        let slugs: Vec<String> = get_sorted_entries(&manifest, SortDirection::Latest, false)
            .into_iter()
            .map(|e| e.slug)
            .collect();
        assert_eq!(slugs[0], "newest-article");
        assert_eq!(slugs.last().unwrap(), "no-date-article");
    }

    #[test]
    fn test_sorted_oldest_puts_oldest_first() {
        let manifest = make_manifest(varied_entries());
        let slugs: Vec<String> = get_sorted_entries(&manifest, SortDirection::Oldest, false)
            .into_iter()
            .map(|e| e.slug)
            .collect();
        assert_eq!(slugs[0], "old-article");
        assert_eq!(slugs.last().unwrap(), "no-date-article");
    }

    #[test]
    fn test_sorted_undated_last_in_both_directions() {
        let manifest = make_manifest(varied_entries());
        let latest = get_sorted_entries(&manifest, SortDirection::Latest, false);
        let oldest = get_sorted_entries(&manifest, SortDirection::Oldest, false);
        assert_eq!(latest.last().unwrap().slug, "no-date-article");
        assert_eq!(oldest.last().unwrap().slug, "no-date-article");
    }

    #[test]
    fn test_sorted_compares_on_utc_instant() {
        // Same wall clock, different offsets: -08:00 is the later instant.
        let manifest = make_manifest(vec![
            entry("early-utc", Some("2024-01-01T10:00:00+00:00")),
            entry("later-utc", Some("2024-01-01T10:00:00-08:00")),
        ]);
        let slugs: Vec<String> = get_sorted_entries(&manifest, SortDirection::Latest, false)
            .into_iter()
            .map(|e| e.slug)
            .collect();
        assert_eq!(slugs, vec!["later-utc", "early-utc"]);
    }

    #[test]
    fn test_sorted_pending_only_excludes_completed() {
        let mut manifest = make_manifest(varied_entries());
        update_entry_status(
            &mut manifest,
            "newest-article",
            ScrapeStatus::Completed,
            StatusFields::default(),
        )
        .unwrap();

        let slugs: Vec<String> = get_sorted_entries(&manifest, SortDirection::Latest, true)
            .into_iter()
            .map(|e| e.slug)
            .collect();
        assert!(!slugs.contains(&"newest-article".to_string()));
        assert!(slugs.contains(&"old-article".to_string()));
    }

    #[test]
    fn test_sorted_empty_manifest() {
        let manifest = make_manifest(vec![]);
        assert!(get_sorted_entries(&manifest, SortDirection::Latest, false).is_empty());
    }

    #[test]
    fn test_sorted_all_undated_keeps_insertion_order() {
        let manifest = make_manifest(vec![entry("a", None), entry("b", None)]);
        let slugs: Vec<String> = get_sorted_entries(&manifest, SortDirection::Latest, false)
            .into_iter()
            .map(|e| e.slug)
            .collect();
        assert_eq!(slugs, vec!["a", "b"]);
    }

    #[test]
    fn test_naive_lastmod_treated_as_utc() {
        let parsed = parse_last_modified("2024-01-01T10:00:00").unwrap();
        let explicit = parse_last_modified("2024-01-01T10:00:00+00:00").unwrap();
        assert_eq!(parsed.with_timezone(&Utc), explicit.with_timezone(&Utc));
    }

    // ------------------------------------------------------------------
    // year / month extraction
    // ------------------------------------------------------------------

    #[test]
    fn test_extract_year_standard_url() {
        assert_eq!(
            extract_year_from_url("https://www.tasteofcinema.com/2024/my-article/"),
            Some(2024)
        );
    }

    #[test]
    fn test_extract_year_none_for_category_and_root() {
        assert_eq!(extract_year_from_url("https://www.tasteofcinema.com/category/features/"), None);
        assert_eq!(extract_year_from_url("https://www.tasteofcinema.com/"), None);
    }

    #[test]
    fn test_extract_year_ignores_year_in_slug() {
        assert_eq!(
            extract_year_from_url(
                "https://www.tasteofcinema.com/2022/10-best-american-movies-2012-roundup/"
            ),
            Some(2022)
        );
    }

    #[test]
    fn test_extract_month_standard() {
        assert_eq!(extract_month_from_lastmod(Some("2024-06-20T14:00:00+00:00")), Some(6));
        assert_eq!(extract_month_from_lastmod(Some("2024-01-15T10:00:00+00:00")), Some(1));
    }

    #[test]
    fn test_extract_month_uses_local_offset_not_utc() {
        // Jan 1 in UTC, but still Dec 31 in the timestamp's own zone.
        assert_eq!(extract_month_from_lastmod(Some("2023-12-31T23:00:00-08:00")), Some(12));
    }

    #[test]
    fn test_extract_month_absent_or_invalid() {
        assert_eq!(extract_month_from_lastmod(None), None);
        assert_eq!(extract_month_from_lastmod(Some("not-a-date")), None);
    }

    // ------------------------------------------------------------------
    // lookup_slug
    // ------------------------------------------------------------------

    #[test]
    fn test_lookup_slug_found_returns_url() {
        let manifest = make_manifest(vec![entry("jan-2024-article", None)]);
        assert_eq!(
            lookup_slug(&manifest, "jan-2024-article").unwrap(),
            "https://www.tasteofcinema.com/2024/jan-2024-article/"
        );
    }

    #[test]
    fn test_lookup_slug_missing_has_guidance() {
        let manifest = make_manifest(vec![]);
        let err = lookup_slug(&manifest, "nonexistent-slug").unwrap_err();
        assert!(matches!(err, ScrapeError::SlugNotFound { .. }));
        let message = err.to_string();
        assert!(message.contains("nonexistent-slug"));
        assert!(message.to_lowercase().contains("full url"));
    }
}
