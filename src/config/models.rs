use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::audience::{deserialize_encoded, Condition};

/// Experiment lifecycle status as reported in configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExperimentStatus {
    #[default]
    Running,
    Launched,
    Paused,
    #[serde(rename = "Not started")]
    NotStarted,
    Archived,
    /// Any status this library doesn't know about. Such experiments are not active.
    #[serde(other)]
    Unknown,
}

impl ExperimentStatus {
    /// Only running and launched experiments assign variations.
    pub fn is_active(self) -> bool {
        matches!(self, ExperimentStatus::Running | ExperimentStatus::Launched)
    }
}

/// Cumulative range cutoff mapping bucket values below `end_of_range` to `entity_id`.
///
/// An empty `entity_id` represents unallocated traffic.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficAllocation {
    pub entity_id: String,
    pub end_of_range: u32,
}

impl TrafficAllocation {
    pub fn new(entity_id: impl Into<String>, end_of_range: u32) -> TrafficAllocation {
        TrafficAllocation {
            entity_id: entity_id.into(),
            end_of_range,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Variation {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub feature_enabled: bool,
    /// Feature variable values keyed by variable id.
    #[serde(
        default,
        rename = "variables",
        deserialize_with = "deserialize_variables",
        serialize_with = "serialize_variables"
    )]
    pub variables_map: HashMap<String, String>,
}

impl Variation {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Variation {
        Variation {
            id: id.into(),
            key: key.into(),
            feature_enabled: false,
            variables_map: HashMap::new(),
        }
    }

    pub fn with_feature_enabled(mut self, feature_enabled: bool) -> Variation {
        self.feature_enabled = feature_enabled;
        self
    }

    pub fn with_variable(mut self, id: impl Into<String>, value: impl Into<String>) -> Variation {
        self.variables_map.insert(id.into(), value.into());
        self
    }
}

#[derive(Serialize, Deserialize)]
struct VariableUsage {
    id: String,
    value: String,
}

fn deserialize_variables<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<HashMap<String, String>, D::Error> {
    let usages = Vec::<VariableUsage>::deserialize(deserializer)?;
    Ok(usages
        .into_iter()
        .map(|usage| (usage.id, usage.value))
        .collect())
}

fn serialize_variables<S: serde::Serializer>(
    variables: &HashMap<String, String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(variables.iter().map(|(id, value)| VariableUsage {
        id: id.clone(),
        value: value.clone(),
    }))
}

/// Marks an experiment as driven by the contextual bandit service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Cmab {
    /// Ids of the configured [`Attribute`]s the bandit model uses.
    #[serde(default)]
    pub attribute_ids: Vec<String>,
    /// Share of experiment traffic (out of 10000) that is sent to the bandit.
    pub traffic_allocation: u32,
}

impl Cmab {
    pub fn new(
        attribute_ids: impl IntoIterator<Item = impl Into<String>>,
        traffic_allocation: u32,
    ) -> Cmab {
        Cmab {
            attribute_ids: attribute_ids.into_iter().map(Into::into).collect(),
            traffic_allocation,
        }
    }
}

/// An experiment, a mutually-exclusive group member, or a rollout rule.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    #[serde(default, skip_serializing)]
    pub audience_conditions: Option<Condition>,
    pub traffic_allocation: Vec<TrafficAllocation>,
    /// Group this experiment belongs to. Filled in when the experiment is listed under a group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_variations",
        serialize_with = "serialize_variations"
    )]
    pub variations: HashMap<String, Variation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmab: Option<Cmab>,
}

fn deserialize_variations<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<HashMap<String, Variation>, D::Error> {
    let variations = Vec::<Variation>::deserialize(deserializer)?;
    Ok(variations
        .into_iter()
        .map(|variation| (variation.id.clone(), variation))
        .collect())
}

fn serialize_variations<S: serde::Serializer>(
    variations: &HashMap<String, Variation>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(variations.values())
}

impl Experiment {
    /// Create a running experiment without audiences or variations.
    pub fn new(
        id: impl Into<String>,
        key: impl Into<String>,
        traffic_allocation: Vec<TrafficAllocation>,
    ) -> Experiment {
        Experiment {
            id: id.into(),
            key: key.into(),
            status: ExperimentStatus::Running,
            audience_ids: Vec::new(),
            audience_conditions: None,
            traffic_allocation,
            group_id: None,
            variations: HashMap::new(),
            cmab: None,
        }
    }

    pub fn with_status(mut self, status: ExperimentStatus) -> Experiment {
        self.status = status;
        self
    }

    pub fn with_audience_ids(
        mut self,
        audience_ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Experiment {
        self.audience_ids = audience_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_audience_conditions(mut self, conditions: Condition) -> Experiment {
        self.audience_conditions = Some(conditions);
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Experiment {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_variation(mut self, variation: Variation) -> Experiment {
        self.variations.insert(variation.id.clone(), variation);
        self
    }

    pub fn with_cmab(mut self, cmab: Cmab) -> Experiment {
        self.cmab = Some(cmab);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn variation(&self, id: &str) -> Option<&Variation> {
        self.variations.get(id)
    }
}

/// Group policy that makes member experiments mutually exclusive.
pub const RANDOM_POLICY: &str = "random";

/// A set of experiments sharing one traffic allocation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub policy: String,
    /// Ranges over member experiment ids.
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

impl Group {
    pub fn is_mutually_exclusive(&self) -> bool {
        self.policy == RANDOM_POLICY
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct FeatureFlag {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
    /// Empty when the flag has no rollout.
    #[serde(default)]
    pub rollout_id: String,
}

/// Ordered targeting rules. The last rule is the catch-all for everyone else.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    pub id: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

/// Configured user attribute.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub id: String,
    pub key: String,
}

impl Attribute {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Attribute {
        Attribute {
            id: id.into(),
            key: key.into(),
        }
    }
}

/// A named, reusable targeting rule.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Audience {
    pub id: String,
    pub name: String,
    #[serde(deserialize_with = "deserialize_encoded")]
    pub conditions: Condition,
}

impl Audience {
    pub fn new(id: impl Into<String>, name: impl Into<String>, conditions: Condition) -> Audience {
        Audience {
            id: id.into(),
            name: name.into(),
            conditions,
        }
    }
}

/// Subset of the datafile that the decision core reads.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Datafile {
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub feature_flags: Vec<FeatureFlag>,
    #[serde(default)]
    pub rollouts: Vec<Rollout>,
    /// Legacy audiences with JSON-encoded string conditions.
    #[serde(default)]
    pub audiences: Vec<Audience>,
    /// Audiences with inline conditions. They override legacy audiences with the same id.
    #[serde(default)]
    pub typed_audiences: Vec<Audience>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_experiment() {
        let experiment: Experiment = serde_json::from_value(json!({
            "id": "1886780721",
            "key": "exp",
            "status": "Not started",
            "layerId": "l1",
            "audienceIds": ["a1"],
            "audienceConditions": ["or", "a1"],
            "trafficAllocation": [{"entityId": "v1", "endOfRange": 5000}],
            "variations": [
                {"id": "v1", "key": "control", "featureEnabled": true,
                 "variables": [{"id": "var1", "value": "42"}]}
            ],
            "forcedVariations": {},
            "cmab": {"attributeIds": ["attr1"], "trafficAllocation": 10000}
        }))
        .unwrap();

        assert_eq!(experiment.status, ExperimentStatus::NotStarted);
        assert!(!experiment.is_active());
        assert_eq!(
            experiment.audience_conditions,
            Some(Condition::Or(vec![Condition::audience("a1")]))
        );
        assert_eq!(experiment.traffic_allocation, vec![TrafficAllocation::new("v1", 5000)]);
        assert_eq!(
            experiment.variation("v1"),
            Some(
                &Variation::new("v1", "control")
                    .with_feature_enabled(true)
                    .with_variable("var1", "42")
            )
        );
        assert_eq!(experiment.cmab, Some(Cmab::new(["attr1"], 10000)));
        assert_eq!(experiment.group_id, None);
    }

    #[test]
    fn unknown_status_is_inactive() {
        let status: ExperimentStatus = serde_json::from_value(json!("Deleted")).unwrap();
        assert_eq!(status, ExperimentStatus::Unknown);
        assert!(!status.is_active());
        assert!(ExperimentStatus::Launched.is_active());
    }

    #[test]
    fn parses_audience_with_encoded_conditions() {
        let audience: Audience = serde_json::from_value(json!({
            "id": "a1",
            "name": "chrome",
            "conditions": "[\"and\", [\"or\", {\"type\": \"custom_attribute\", \"name\": \"browser\", \"match\": \"exact\", \"value\": \"chrome\"}]]"
        }))
        .unwrap();
        assert_eq!(
            audience.conditions,
            Condition::And(vec![Condition::Or(vec![Condition::leaf(
                "browser", "exact", "chrome"
            )])])
        );
    }
}
