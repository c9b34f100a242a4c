//! Error taxonomy for the crawl-and-ingest pipeline
//!
//! Session and crawl failures abort the run; detail-fetch failures are
//! isolated per identifier; ingestion failures are isolated per batch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    /// Login did not produce an authenticated session.
    #[error("authentication failed: {reason}")]
    Authentication { reason: String },

    /// The catalog page did not carry the expected pagination marker.
    #[error("catalog format error at {url}: {reason}")]
    CatalogFormat { url: String, reason: String },

    /// A scraped-record line failed the trust-boundary checks before ingestion.
    #[error("invalid record at line {line}: {reason}")]
    DataValidation { line: usize, reason: String },

    /// Browser automation failed (navigation, extraction, context lifecycle).
    #[error("browser automation error: {0}")]
    Browser(String),

    /// A batch write to the primary datastore failed; earlier batches stay
    /// committed.
    #[error("batch {index} failed: {reason}")]
    BatchWrite { index: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl HarvestError {
    pub fn browser(err: impl std::fmt::Display) -> Self {
        Self::Browser(err.to_string())
    }

    pub fn validation(line: usize, reason: impl Into<String>) -> Self {
        Self::DataValidation {
            line,
            reason: reason.into(),
        }
    }
}
