//! Error types for listing, fetching and aggregating receipts.

use thiserror::Error;

/// Failure of a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The message (or mailbox) no longer exists.
    #[error("not found: {0}")]
    NotFound(String),
    /// Provider quota exceeded.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Credential rejected by the provider.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Network failure, server error or any other retryable condition.
    #[error("transient error: {0}")]
    Transient(String),
    /// Response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Still outstanding when the run deadline expired.
    #[error("timed out before the run deadline")]
    TimedOut,
}

impl FetchError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Failure of a whole aggregation run. Per-message failures never end up here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("listing candidate messages failed: {0}")]
    ListingFailed(#[source] FetchError),
    #[error("credential expired during the run")]
    AuthExpired,
    #[error("run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AggregateError>;
