//! Error taxonomy shared across the scraper pipeline.
//!
//! Every component returns [`ScrapeError`] so the orchestrator can
//! pattern-match on per-entry outcomes instead of catching panics or
//! inspecting stringly-typed failures. `main` maps the final outcome to
//! the process exit code.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A fetch that failed for reasons other than a reqwest transport error
    /// (e.g. a stubbed failure in tests, or a non-success status).
    #[error("fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Status update addressed to a slug the manifest does not track.
    #[error("no manifest entry for slug '{slug}'")]
    EntryNotFound { slug: String },

    /// Single-article lookup miss. The message carries operator guidance.
    #[error(
        "slug '{slug}' not found in manifest. \
         Provide the full URL instead, or run discovery first to rebuild the manifest."
    )]
    SlugNotFound { slug: String },

    #[error("discovery failed: {0}")]
    Discovery(String),
}
