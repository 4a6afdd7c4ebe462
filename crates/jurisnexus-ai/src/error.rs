use thiserror::Error;

/// Failure of a single model call attempt.
///
/// Never escapes [`ModelClient::invoke`](crate::ModelClient::invoke): the
/// client retries what it can and folds the last failure into the record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Connection failure, rate limit, or 5xx. Retried.
    #[error("transient network error: {0}")]
    Transient(String),

    /// The attempt exceeded its time bound. Retried.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The upstream refused the request or returned something unusable. Not retried.
    #[error("upstream rejected request: {0}")]
    UpstreamRejection(String),
}

impl CallError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UpstreamRejection(_))
    }
}
