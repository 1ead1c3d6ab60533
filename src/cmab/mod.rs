//! Contextual multi-armed bandit (CMAB) decisions.
//!
//! For bandit-driven experiments, the variation is chosen by a remote prediction service instead
//! of static traffic allocation. [`CmabService`] filters the user's attributes down to the ones the
//! bandit model uses, serves repeated requests from a [`CmabCacheStore`] ([`CmabCache`] by default),
//! and fetches fresh decisions
//! through a [`CmabClient`] ([`HttpCmabClient`] by default, retrying per [`RetryConfig`]).
use std::time::Duration;

mod cache;
mod client;
mod error;
mod retry;
mod service;

pub use cache::{CmabCache, CmabCacheStore, CmabCacheValue};
pub use client::{CmabClient, HttpCmabClient, DEFAULT_PREDICTION_ENDPOINT};
pub use error::CmabError;
pub use retry::RetryConfig;
pub use service::{CmabDecision, CmabService};

/// Configuration for [`CmabService::from_config`].
// Not implementing `Copy` as `RetryConfig` and the endpoint are not copyable.
#[derive(Debug, Clone, PartialEq)]
pub struct CmabConfig {
    /// Maximum number of cached decisions. Zero disables caching.
    ///
    /// Defaults to [`CmabConfig::DEFAULT_CACHE_CAPACITY`].
    pub cache_capacity: usize,
    /// How long a cached decision stays valid. Zero means cached decisions never expire.
    ///
    /// Defaults to [`CmabConfig::DEFAULT_CACHE_TTL`].
    pub cache_ttl: Duration,
    /// Base URL of the prediction service. Rule ids are appended to it.
    ///
    /// Defaults to [`DEFAULT_PREDICTION_ENDPOINT`].
    pub prediction_endpoint: String,
    pub retry: RetryConfig,
}

impl CmabConfig {
    /// Default value for [`CmabConfig::cache_capacity`].
    pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
    /// Default value for [`CmabConfig::cache_ttl`].
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

    /// Create a new `CmabConfig` using default configuration.
    pub fn new() -> CmabConfig {
        CmabConfig::default()
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> CmabConfig {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> CmabConfig {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn with_prediction_endpoint(mut self, endpoint: impl Into<String>) -> CmabConfig {
        self.prediction_endpoint = endpoint.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> CmabConfig {
        self.retry = retry;
        self
    }
}

impl Default for CmabConfig {
    fn default() -> CmabConfig {
        CmabConfig {
            cache_capacity: CmabConfig::DEFAULT_CACHE_CAPACITY,
            cache_ttl: CmabConfig::DEFAULT_CACHE_TTL,
            prediction_endpoint: DEFAULT_PREDICTION_ENDPOINT.to_owned(),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn builds_service_from_config() {
        let config = CmabConfig::new()
            .with_cache_capacity(10)
            .with_cache_ttl(Duration::ZERO)
            .with_retry(RetryConfig::no_retry());
        assert_eq!(config.prediction_endpoint, DEFAULT_PREDICTION_ENDPOINT);

        let service = CmabService::from_config(&config).unwrap();
        assert_eq!(service.cache().lookup("1-u-rule"), None);
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let config = CmabConfig::new().with_prediction_endpoint("not a url");
        assert!(matches!(
            CmabService::from_config(&config),
            Err(Error::InvalidBaseUrl(_))
        ));
    }
}
