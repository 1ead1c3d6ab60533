use std::sync::Arc;

use crate::cmab::CmabError;

/// Represents a result type for operations in the decision core.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// crate-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors returned from decision services.
///
/// A user that is not eligible for an experiment or feature is *not* an error. Such outcomes are
/// reported as a [`Decision`](crate::decision::Decision) that is not decided, with a
/// machine-readable [`Reason`](crate::decision::Reason).
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The requested experiment is not present in the configuration.
    #[error("experiment not found: {0}")]
    ExperimentNotFound(String),

    /// The requested feature flag is not present in the configuration.
    #[error("feature flag not found: {0}")]
    FeatureNotFound(String),

    /// User id is required to make a decision.
    #[error("user id must not be empty")]
    InvalidUserId,

    /// Fetching a decision from the contextual bandit service failed. The user may still be
    /// eligible, so callers must handle it separately from "not decided".
    #[error(transparent)]
    Cmab(CmabError),

    /// Retry configuration is invalid.
    #[error("invalid retry configuration: {0}")]
    InvalidRetryConfig(&'static str),

    /// Invalid prediction endpoint configuration.
    #[error("invalid prediction endpoint configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// An error occurred while parsing the configuration.
    #[error("error parsing configuration: {0}")]
    ConfigurationParse(Arc<serde_json::Error>),

    /// Failed to build the HTTP client.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<CmabError> for Error {
    fn from(value: CmabError) -> Self {
        Error::Cmab(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::ConfigurationParse(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
