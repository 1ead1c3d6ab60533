use std::sync::Arc;

/// Errors fetching a decision from the prediction service.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum CmabError {
    /// Transport-level failure (connection refused, reset, per-request timeout, etc.).
    #[error("network error while fetching bandit decision")]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(#[source] Arc<reqwest::Error>),

    /// Prediction service responded with a non-success status code.
    #[error("prediction service responded with status {0}")]
    Status(u16),

    /// Successful response that doesn't contain a usable variation id.
    #[error("invalid response from prediction service: {0}")]
    InvalidResponse(String),

    /// The overall time limit for fetching a decision (including retries) was exceeded.
    #[error("timed out fetching bandit decision")]
    Timeout,

    /// All attempts failed with retryable errors.
    #[error("failed to fetch bandit decision after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<CmabError>,
    },
}

impl CmabError {
    /// Network failures and server-side (5xx) errors are worth retrying. Client errors and
    /// malformed responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            CmabError::Network(_) => true,
            CmabError::Status(status) => (500..600).contains(status),
            CmabError::InvalidResponse(_)
            | CmabError::Timeout
            | CmabError::RetriesExhausted { .. } => false,
        }
    }
}

impl From<reqwest::Error> for CmabError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) => CmabError::Status(status.as_u16()),
            None if value.is_decode() => CmabError::InvalidResponse(value.to_string()),
            None => CmabError::Network(Arc::new(value.without_url())),
        }
    }
}
