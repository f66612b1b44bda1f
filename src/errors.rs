//! Error taxonomy for the scrape pipeline.
//!
//! Each pipeline stage has its own error enum so callers can route on the
//! failure kind without string matching:
//!
//! - [`FetchError`]: page retrieval failures (static HTTP or rendered browser)
//! - [`ValidationError`]: per-record normalization failures
//! - [`PersistError`]: sink/destination failures
//!
//! Only `Network` and `Timeout` fetch failures are worth retrying — an HTTP
//! status or a broken render will not improve on its own, and the pipeline
//! treats them as final.

use thiserror::Error;

/// A failure while retrieving a page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be completed (DNS, connect, reset, etc.).
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// The request or the render-readiness wait exceeded its bounded timeout.
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    /// The server answered with a non-2xx status.
    #[error("HTTP status {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// The browser session failed to navigate or capture the rendered DOM.
    #[error("render failure fetching {url}: {reason}")]
    RenderFailure { url: String, reason: String },
}

impl FetchError {
    /// Whether the pipeline's bounded retry loop should attempt this fetch again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network { .. } | FetchError::Timeout { .. })
    }
}

/// A failure while coercing one raw record into a [`NormalizedRecord`].
///
/// [`NormalizedRecord`]: crate::models::NormalizedRecord
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A numeric field did not parse as an integer after separator stripping.
    #[error("field '{field}' is not numeric: '{value}'")]
    NotNumeric { field: String, value: String },

    /// A resource label has no entry in the resource-kind lookup table.
    #[error("unknown resource kind label: '{label}'")]
    UnknownResourceKind { label: String },

    /// A required field was absent or empty in the raw record.
    #[error("missing required field: '{field}'")]
    MissingRequiredField { field: String },
}

/// A failure while persisting a completed run.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("destination IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The destination already holds data that does not parse as a cost table.
    #[error("destination holds incompatible data: {reason}")]
    SchemaMismatch { reason: String },
}
