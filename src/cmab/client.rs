//! HTTP client for the contextual bandit prediction service.
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CmabError, RetryConfig};
use crate::{AttributeValue, Attributes, Error, Result};

/// Default prediction endpoint. Rule ids are appended as the last path segment.
pub const DEFAULT_PREDICTION_ENDPOINT: &str = "https://prediction.cmab.optimizely.com/predict";

/// Source of bandit decisions.
#[async_trait]
pub trait CmabClient: Send + Sync {
    /// Fetch the variation id the bandit assigns to the user for `rule_id`.
    async fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &Attributes,
        cmab_uuid: &str,
    ) -> std::result::Result<String, CmabError>;
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    instances: [PredictionInstance<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionInstance<'a> {
    visitor_id: &'a str,
    experiment_id: &'a str,
    #[serde(rename = "cmabUUID")]
    cmab_uuid: &'a str,
    attributes: Vec<PredictionAttribute<'a>>,
}

#[derive(Debug, Serialize)]
struct PredictionAttribute<'a> {
    id: &'a str,
    value: &'a AttributeValue,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    variation_id: Value,
}

/// [`CmabClient`] that calls the prediction service over HTTP and retries failures according to
/// [`RetryConfig`].
pub struct HttpCmabClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    endpoint: Url,
    retry: RetryConfig,
}

impl HttpCmabClient {
    pub fn new(prediction_endpoint: &str, retry: RetryConfig) -> Result<HttpCmabClient> {
        let endpoint = Url::parse(prediction_endpoint).map_err(Error::InvalidBaseUrl)?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::InvalidBaseUrl(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }

        let mut builder = reqwest::Client::builder();
        if !retry.max_timeout().is_zero() {
            builder = builder.timeout(retry.max_timeout());
        }

        Ok(HttpCmabClient {
            client: builder.build()?,
            endpoint,
            retry,
        })
    }

    fn rule_url(&self, rule_id: &str) -> Url {
        let mut url = self.endpoint.clone();
        // Can't fail: `new` rejects cannot-be-a-base URLs.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(rule_id);
        }
        url
    }

    async fn request_once(
        &self,
        url: &Url,
        body: &PredictionRequest<'_>,
    ) -> std::result::Result<String, CmabError> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        parse_variation_id(&body)
    }
}

#[async_trait]
impl CmabClient for HttpCmabClient {
    async fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &Attributes,
        cmab_uuid: &str,
    ) -> std::result::Result<String, CmabError> {
        let url = self.rule_url(rule_id);
        let mut sorted: Vec<_> = attributes.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let body = PredictionRequest {
            instances: [PredictionInstance {
                visitor_id: user_id,
                experiment_id: rule_id,
                cmab_uuid,
                attributes: sorted
                    .into_iter()
                    .map(|(key, value)| PredictionAttribute {
                        id: key,
                        value,
                        kind: "custom_attribute",
                    })
                    .collect(),
            }],
        };

        log::debug!(target: "decision_core", rule_id, user_id; "fetching bandit decision");
        let result = self
            .retry
            .run(|_| self.request_once(&url, &body))
            .await;
        if let Err(err) = &result {
            log::warn!(target: "decision_core", rule_id, user_id; "failed to fetch bandit decision: {err}");
        }
        result
    }
}

/// Extract `predictions[0].variation_id`. Numeric ids are accepted and converted to strings.
fn parse_variation_id(body: &str) -> std::result::Result<String, CmabError> {
    let invalid = || CmabError::InvalidResponse(body.to_owned());

    let response: PredictionResponse = serde_json::from_str(body).map_err(|_| invalid())?;
    let prediction = response.predictions.into_iter().next().ok_or_else(invalid)?;
    match prediction.variation_id {
        Value::String(id) if !id.is_empty() => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        _ => Err(invalid()),
    }
}
