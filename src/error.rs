//! Error taxonomy for queue execution
//!
//! Repositories and wiring code use `anyhow`; everything that crosses the
//! engine boundary is classified into a [`SearchError`] so history rows and
//! queue error messages carry a stable, readable reason.

use thiserror::Error;

/// Errors raised while admitting or executing a search queue.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The queue does not exist (or was soft-deleted).
    #[error("search queue {0} not found")]
    QueueNotFound(i64),

    /// The queue exists but is not active; rejected before any side effect.
    #[error("search queue {0} is inactive")]
    QueueInactive(i64),

    /// Another executor holds the lease for this queue.
    #[error("search queue {0} is already running")]
    QueueBusy(i64),

    #[error("instance {0} not found")]
    InstanceNotFound(i64),

    /// Stored credentials could not be decrypted with the configured key.
    #[error("failed to decrypt instance credentials: {0}")]
    Decryption(String),

    /// Connect/timeout/DNS failure talking to the instance.
    #[error("instance unreachable: {0}")]
    InstanceUnreachable(String),

    /// The instance rejected the API key.
    #[error("instance rejected credentials (HTTP {status})")]
    InstanceAuth { status: u16 },

    /// Any other non-success response from the instance.
    #[error("instance API error (HTTP {status}): {message}")]
    InstanceApi { status: u16, message: String },

    /// The instance itself answered with a throttling response.
    #[error("instance is rate limiting requests")]
    InstanceRateLimited { retry_after_secs: Option<u64> },

    /// The external budget source failed. Never surfaces past the resolver.
    #[error("budget oracle unavailable: {0}")]
    BudgetOracleUnavailable(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SearchError {
    /// Whether retrying the same call shortly afterwards may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::InstanceUnreachable(_) | SearchError::InstanceRateLimited { .. } => true,
            SearchError::InstanceApi { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }

    /// Whether this error rejects the run before anything was touched.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            SearchError::QueueNotFound(_) | SearchError::QueueInactive(_) | SearchError::QueueBusy(_)
        )
    }
}

impl From<sqlx::Error> for SearchError {
    fn from(e: sqlx::Error) -> Self {
        SearchError::Storage(e.into())
    }
}
