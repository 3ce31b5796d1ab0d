//! Reporting API trait and structured error types.
//!
//! The ReportingApi trait abstracts over the remote dashboard API so the fetch
//! and collect layers can be driven by scripted fakes in tests.

use crate::domain::{RegionId, SpecimenRecord, Structure};
use thiserror::Error;

/// Errors raised by a single API call.
///
/// Every variant is treated as transient by the per-region fetcher: the call
/// is retried until the attempt budget runs out.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by API (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("api error: {0}")]
    Other(String),
}

/// A remote source of per-region long-format records.
pub trait ReportingApi: Send + Sync {
    /// Human-readable name of this API.
    fn name(&self) -> &str;

    /// Fetch every record for one region, with the fields selected by `structure`.
    ///
    /// An empty vector is a successful call that returned no data; it is up to
    /// the caller to decide what that means.
    fn fetch_region(
        &self,
        region: &RegionId,
        structure: &Structure,
    ) -> Result<Vec<SpecimenRecord>, ApiError>;
}
