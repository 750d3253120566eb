//! Error types for the scraping and ingestion pipeline.
//!
//! Fetch and parse failures are handled locally inside a scrape session;
//! only configuration and storage-availability problems abort a run.

use thiserror::Error;

/// Failure while fetching a page from a retailer.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Retryable: timeouts, connection resets, 429/5xx responses.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Not retryable: 404/410, malformed URL, or a detected block page.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Page content had no recognizable review structure at all.
///
/// A page with zero reviews is not a parse error; only a page where no
/// review container or product frame can be located is.
#[derive(Debug, Error)]
#[error("unparseable page: {0}")]
pub struct ParseError(pub String);

/// A raw candidate row could not be normalized into a valid review record.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("rating {value} outside canonical scale {min}..={max}")]
    RatingOutOfRange { value: f64, min: f64, max: f64 },

    #[error("review has neither text nor title")]
    EmptyContent,
}

/// Persistence-layer failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal configuration problems, detected before any session starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no target URLs configured")]
    NoTargets,

    #[error("unknown retailer for URL: {0}")]
    UnknownRetailer(String),

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
