//! Error taxonomy for sync operations
//!
//! Remote failures are classified once, at the call site that observed them,
//! into one of four kinds. Nothing above the transport re-classifies.

use std::fmt;

/// Errors surfaced by the transport, the detail fetcher and the sync engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Credentials were rejected or have expired
    #[error("Authorization required: {0}")]
    AuthorizationRequired(String),

    /// Rate-limited or transient server failure
    #[error("Retry later: {0}")]
    RetryLater(String),

    /// The change-log starting point is no longer valid
    #[error("History ID expired or invalid")]
    ResyncRequired,

    /// Malformed response, transport failure, exhausted retries or cancellation
    #[error("Sync failed: {0}")]
    Fatal(String),
}

/// Fieldless view of [`SyncError`] for matching and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthorizationRequired,
    RetryLater,
    ResyncRequired,
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::AuthorizationRequired => "authorization_required",
            ErrorKind::RetryLater => "retry_later",
            ErrorKind::ResyncRequired => "resync_required",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Remote endpoint a failure was observed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    Listing,
    Changes,
    Detail,
    Profile,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::AuthorizationRequired(_) => ErrorKind::AuthorizationRequired,
            SyncError::RetryLater(_) => ErrorKind::RetryLater,
            SyncError::ResyncRequired => ErrorKind::ResyncRequired,
            SyncError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the next scheduled tick may succeed without intervention
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RetryLater(_))
    }

    pub fn cancelled() -> Self {
        SyncError::Fatal("sync cancelled".to_string())
    }

    pub fn deadline() -> Self {
        SyncError::Fatal("sync deadline exceeded".to_string())
    }

    pub fn malformed(what: impl fmt::Display) -> Self {
        SyncError::Fatal(format!("malformed response: {}", what))
    }
}

/// Map an HTTP status observed at `site` into the error taxonomy
///
/// A 404 only means "history expired" on the changes endpoint; anywhere else
/// it is fatal for the cycle.
pub fn classify_status(status: u16, site: CallSite, context: &str) -> SyncError {
    match (status, site) {
        (401 | 403, _) => {
            SyncError::AuthorizationRequired(format!("{} (HTTP {})", context, status))
        }
        (429 | 500 | 502 | 503 | 504, _) => {
            SyncError::RetryLater(format!("{} (HTTP {})", context, status))
        }
        (404, CallSite::Changes) => SyncError::ResyncRequired,
        _ => SyncError::Fatal(format!("{} (HTTP {})", context, status)),
    }
}

/// Google error reasons that report throttling rather than a permission problem
const RATE_LIMIT_REASONS: [&str; 2] = ["rateLimitExceeded", "userRateLimitExceeded"];

/// Like [`classify_status`], also using the error reason from the response body
///
/// Gmail reports per-user rate limiting as 403 with a rate-limit reason; that
/// is throttling, not a credential problem.
pub fn classify_status_with_reason(
    status: u16,
    reason: Option<&str>,
    site: CallSite,
    context: &str,
) -> SyncError {
    match (status, reason) {
        (403, Some(reason)) if RATE_LIMIT_REASONS.contains(&reason) => {
            SyncError::RetryLater(format!("{} (HTTP 403 {})", context, reason))
        }
        _ => classify_status(status, site, context),
    }
}
