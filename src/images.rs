//! Image archiving: deterministic filenames, skip-existing downloads, and
//! per-image failure isolation.
//!
//! Files land in `images/<slug>/` named `<index>-<stem><ext>`: the featured
//! image is always index 0 with the fixed stem `thumbnail`, inline images
//! follow in list order. Existing files are never re-fetched, which is what
//! keeps repeated runs cheap.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::error::ScrapeError;
use crate::fetch::Fetch;

static UNSAFE_CHAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]").unwrap());
static MULTI_DASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").unwrap());

const FALLBACK_EXT: &str = ".jpg";
const FALLBACK_STEM: &str = "image";

/// Lowercase `name` and reduce it to `[a-z0-9-]`, collapsing repeated
/// hyphens and trimming them from the ends.
pub fn sanitize_filename(name: &str) -> String {
    let lowered = name.to_lowercase();
    let replaced = UNSAFE_CHAR_RE.replace_all(&lowered, "-");
    let collapsed = MULTI_DASH_RE.replace_all(&replaced, "-");
    collapsed.trim_matches('-').to_string()
}

fn url_basename(url: &str) -> String {
    let path = Url::parse(url).map(|u| u.path().to_string()).unwrap_or_else(|_| url.to_string());
    let basename = path.rsplit('/').next().unwrap_or("");
    basename.split('?').next().unwrap_or("").to_string()
}

/// Bare filename stem (no extension) from a URL path.
fn extract_stem(url: &str) -> String {
    let basename = url_basename(url);
    match basename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => {
            if basename.is_empty() {
                FALLBACK_STEM.to_string()
            } else {
                basename
            }
        }
    }
}

/// Lowercase extension (with dot) from a URL path; implausibly long or
/// absent extensions fall back to `.jpg`.
fn extract_extension(url: &str) -> String {
    let basename = url_basename(url);
    match basename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 5 => format!(".{}", ext.to_lowercase()),
        _ => FALLBACK_EXT.to_string(),
    }
}

/// Build the index-prefixed sanitized filename for one image.
///
/// ```text
/// index=0, is_thumbnail=true          → "00-thumbnail.jpg"
/// index=1, url=".../crash-2005.jpg"   → "01-crash-2005.jpg"
/// index=12, url=".../film.jpg"        → "12-film.jpg"
/// ```
pub fn build_filename(index: usize, url: &str, is_thumbnail: bool) -> String {
    let ext = extract_extension(url);
    let stem = if is_thumbnail {
        "thumbnail".to_string()
    } else {
        let sanitized = sanitize_filename(&extract_stem(url));
        if sanitized.is_empty() { FALLBACK_STEM.to_string() } else { sanitized }
    };
    format!("{index:02}-{stem}{ext}")
}

/// Summary of one article's image downloads.
///
/// Invariant: `total_found() == downloaded + skipped + failed`.
#[derive(Debug, Default)]
pub struct ImageDownloadResult {
    pub slug: String,
    pub downloaded: u32,
    pub skipped: u32,
    pub failed: u32,
    pub errors: Vec<String>,
    pub local_paths: Vec<PathBuf>,
}

impl ImageDownloadResult {
    pub fn total_found(&self) -> u32 {
        self.downloaded + self.skipped + self.failed
    }
}

/// Download all images for one article into `output_dir/images/<slug>/`.
///
/// The featured image (when present) becomes `00-thumbnail.<ext>`; inline
/// images take the following indices in list order. Files already on disk
/// are counted as skipped without a fetch. A failed download is recorded
/// and does not abort the remaining images.
pub async fn download_article_images<F: Fetch>(
    slug: &str,
    featured_image_url: Option<&str>,
    inline_image_urls: &[String],
    output_dir: &Path,
    delay: Duration,
    fetcher: &F,
) -> Result<ImageDownloadResult, ScrapeError> {
    let article_dir = output_dir.join("images").join(slug);
    tokio::fs::create_dir_all(&article_dir).await?;

    let mut result = ImageDownloadResult { slug: slug.to_string(), ..Default::default() };

    let mut targets: Vec<(String, String)> = Vec::new();
    let mut index = 0usize;
    if let Some(featured) = featured_image_url {
        targets.push((featured.to_string(), build_filename(index, featured, true)));
        index += 1;
    }
    for url in inline_image_urls {
        targets.push((url.clone(), build_filename(index, url, false)));
        index += 1;
    }

    for (url, filename) in targets {
        let local_path = article_dir.join(&filename);

        if local_path.exists() {
            result.skipped += 1;
            result.local_paths.push(local_path);
            debug!(%url, file = %filename, "Image already present; skipping");
            continue;
        }

        tokio::time::sleep(delay).await;
        match fetcher.fetch(&url).await {
            Ok(bytes) => {
                tokio::fs::write(&local_path, bytes).await?;
                result.downloaded += 1;
                result.local_paths.push(local_path);
                debug!(%url, file = %filename, "Downloaded image");
            }
            Err(e) => {
                result.failed += 1;
                let message = format!("Failed to download {url}: {e}");
                warn!("{message}");
                result.errors.push(message);
            }
        }
    }

    Ok(result)
}
