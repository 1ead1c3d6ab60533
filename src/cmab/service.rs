use std::{collections::BTreeMap, sync::Arc};

use uuid::Uuid;

use super::{CmabCache, CmabCacheStore, CmabCacheValue, CmabClient, CmabConfig, HttpCmabClient};
use crate::{
    config::ProjectConfig, sharder::murmur3_32, Attributes, DecideOption, Error, Result,
};

/// Sentinel hash of an empty attribute set.
const EMPTY_ATTRIBUTES_HASH: &str = "empty";

/// Variation assigned by the bandit together with the id of the prediction that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmabDecision {
    pub variation_id: String,
    pub cmab_uuid: String,
}

/// Resolves bandit decisions, serving repeated requests from a cache while the user's relevant
/// attributes stay the same.
pub struct CmabService {
    cache: Arc<dyn CmabCacheStore>,
    client: Arc<dyn CmabClient>,
}

impl CmabService {
    pub fn new(cache: Arc<dyn CmabCacheStore>, client: Arc<dyn CmabClient>) -> CmabService {
        CmabService { cache, client }
    }

    /// Create a service backed by [`HttpCmabClient`] and an in-memory [`CmabCache`].
    pub fn from_config(config: &CmabConfig) -> Result<CmabService> {
        let client = HttpCmabClient::new(&config.prediction_endpoint, config.retry.clone())?;
        Ok(CmabService::new(
            Arc::new(CmabCache::new(config.cache_capacity, config.cache_ttl)),
            Arc::new(client),
        ))
    }

    pub fn cache(&self) -> &dyn CmabCacheStore {
        self.cache.as_ref()
    }

    /// Get the bandit decision for the user in rule `rule_id`.
    ///
    /// Only attributes listed in the rule's bandit configuration are sent to the prediction
    /// service and taken into account for caching. A cached decision is reused only if it was
    /// made for the same attribute values. Failed fetches are not cached.
    pub async fn get_decision(
        &self,
        config: &ProjectConfig,
        user_id: &str,
        attributes: &Attributes,
        rule_id: &str,
        options: &[DecideOption],
    ) -> Result<CmabDecision> {
        if user_id.is_empty() {
            return Err(Error::InvalidUserId);
        }

        let filtered = filter_attributes(config, attributes, rule_id);

        if options.contains(&DecideOption::IgnoreCmabCache) {
            return self.fetch_decision(rule_id, user_id, &filtered).await;
        }

        if options.contains(&DecideOption::ResetCmabCache) {
            self.cache.reset();
        }

        let cache_key = cache_key(user_id, rule_id);
        if options.contains(&DecideOption::InvalidateUserCmabCache) {
            self.cache.remove(&cache_key);
        }

        let attributes_hash = hash_attributes(&filtered);
        if let Some(cached) = self.cache.lookup(&cache_key) {
            if cached.attributes_hash == attributes_hash {
                log::debug!(target: "decision_core", user_id, rule_id; "using cached bandit decision");
                return Ok(CmabDecision {
                    variation_id: cached.variation_id,
                    cmab_uuid: cached.cmab_uuid,
                });
            }
            log::debug!(target: "decision_core",
                        user_id,
                        rule_id;
                        "attributes changed since bandit decision was cached, refetching");
            self.cache.remove(&cache_key);
        }

        let decision = self.fetch_decision(rule_id, user_id, &filtered).await?;
        self.cache.save(
            cache_key,
            CmabCacheValue {
                attributes_hash,
                variation_id: decision.variation_id.clone(),
                cmab_uuid: decision.cmab_uuid.clone(),
            },
        );
        Ok(decision)
    }

    async fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<CmabDecision> {
        let cmab_uuid = Uuid::new_v4().to_string();
        let variation_id = self
            .client
            .fetch_decision(rule_id, user_id, attributes, &cmab_uuid)
            .await?;
        log::info!(target: "decision_core",
                   user_id,
                   rule_id,
                   variation_id = variation_id.as_str(),
                   cmab_uuid = cmab_uuid.as_str();
                   "fetched bandit decision");
        Ok(CmabDecision {
            variation_id,
            cmab_uuid,
        })
    }
}

/// Keep only the user attributes that the rule's bandit model uses, keyed by attribute key.
fn filter_attributes(config: &ProjectConfig, attributes: &Attributes, rule_id: &str) -> Attributes {
    let Some(cmab) = config.experiment(rule_id).and_then(|e| e.cmab.as_ref()) else {
        log::debug!(target: "decision_core", rule_id; "no bandit configuration for rule");
        return Attributes::new();
    };

    cmab.attribute_ids
        .iter()
        .filter_map(|id| {
            let Some(attribute) = config.attribute(id) else {
                log::debug!(target: "decision_core", rule_id, attribute_id = id.as_str(); "unknown bandit attribute");
                return None;
            };
            let value = attributes.get(&attribute.key)?;
            Some((attribute.key.clone(), value.clone()))
        })
        .collect()
}

/// Order-independent hash of the attribute set.
fn hash_attributes(attributes: &Attributes) -> String {
    if attributes.is_empty() {
        return EMPTY_ATTRIBUTES_HASH.to_owned();
    }
    let sorted: BTreeMap<_, _> = attributes.iter().collect();
    // Serializing string keys and attribute values can't fail.
    let canonical = serde_json::to_vec(&sorted).unwrap_or_default();
    format!("{:x}", murmur3_32(&canonical, 0))
}

/// Cache key for a user and rule. The length prefix keeps keys unambiguous when ids contain the
/// separator.
fn cache_key(user_id: &str, rule_id: &str) -> String {
    format!("{}-{}-{}", user_id.len(), user_id, rule_id)
}
