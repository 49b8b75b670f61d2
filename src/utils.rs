//! URL helpers shared by discovery and extraction.

use url::Url;

/// Resolve `href` against `base`, passing absolute URLs through untouched.
///
/// Returns `None` when the href cannot be resolved (empty, or malformed in
/// a way `Url::join` rejects).
pub fn absolutize(base: &Url, href: &str) -> Option<String> {
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http") {
        return Some(href.to_string());
    }
    base.join(href).ok().map(|u| u.to_string())
}

/// Last non-empty path segment of a URL or bare path.
///
/// Relative hrefs (as found in category/tag links) are handled by treating
/// the whole value as a path; query strings and fragments are ignored.
pub fn last_path_segment(href: &str) -> Option<String> {
    let path = match Url::parse(href) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => href.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .next_back()
        .map(str::to_string)
}
