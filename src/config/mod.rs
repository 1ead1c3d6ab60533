//! Read-only configuration object graph.
//!
//! [`ProjectConfig`] is built once from a [`Datafile`] and never mutated, so a single snapshot can
//! be shared between threads (usually behind an `Arc`) for the lifetime of the configuration.
mod models;

use std::collections::HashMap;

pub use models::{
    Attribute, Audience, Cmab, Datafile, Experiment, ExperimentStatus, FeatureFlag, Group,
    Rollout, TrafficAllocation, Variation, RANDOM_POLICY,
};

use crate::{audience::AudienceLookup, Result};

/// Indexed configuration snapshot.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    /// All experiments by id: top-level experiments, group members, and rollout rules.
    experiments: HashMap<String, Experiment>,
    experiment_ids_by_key: HashMap<String, String>,
    groups: HashMap<String, Group>,
    feature_flags: HashMap<String, FeatureFlag>,
    rollouts: HashMap<String, Rollout>,
    audiences: HashMap<String, Audience>,
    attributes: HashMap<String, Attribute>,
}

impl ProjectConfig {
    /// Parse configuration from datafile JSON.
    pub fn parse(json: &str) -> Result<ProjectConfig> {
        let datafile: Datafile = serde_json::from_str(json)?;
        Ok(ProjectConfig::from(datafile))
    }

    pub fn experiment(&self, id: &str) -> Option<&Experiment> {
        self.experiments.get(id)
    }

    pub fn experiment_by_key(&self, key: &str) -> Option<&Experiment> {
        self.experiment_ids_by_key
            .get(key)
            .and_then(|id| self.experiments.get(id))
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn feature_flag(&self, key: &str) -> Option<&FeatureFlag> {
        self.feature_flags.get(key)
    }

    pub fn rollout(&self, id: &str) -> Option<&Rollout> {
        self.rollouts.get(id)
    }

    pub fn attribute(&self, id: &str) -> Option<&Attribute> {
        self.attributes.get(id)
    }
}

impl AudienceLookup for ProjectConfig {
    fn audience(&self, id: &str) -> Option<&Audience> {
        self.audiences.get(id)
    }
}

impl From<Datafile> for ProjectConfig {
    fn from(datafile: Datafile) -> Self {
        let mut experiments = HashMap::new();
        let mut experiment_ids_by_key = HashMap::new();
        let mut index = |experiment: Experiment| {
            experiment_ids_by_key.insert(experiment.key.clone(), experiment.id.clone());
            experiments.insert(experiment.id.clone(), experiment);
        };

        for rollout in &datafile.rollouts {
            for rule in &rollout.experiments {
                index(rule.clone());
            }
        }
        for experiment in datafile.experiments {
            index(experiment);
        }

        let mut groups = HashMap::with_capacity(datafile.groups.len());
        for mut group in datafile.groups {
            for experiment in &mut group.experiments {
                experiment.group_id = Some(group.id.clone());
                index(experiment.clone());
            }
            groups.insert(group.id.clone(), group);
        }

        // Typed audiences go last so they override legacy audiences with the same id.
        let audiences = datafile
            .audiences
            .into_iter()
            .chain(datafile.typed_audiences)
            .map(|audience| (audience.id.clone(), audience))
            .collect();

        ProjectConfig {
            experiments,
            experiment_ids_by_key,
            groups,
            feature_flags: datafile
                .feature_flags
                .into_iter()
                .map(|flag| (flag.key.clone(), flag))
                .collect(),
            rollouts: datafile
                .rollouts
                .into_iter()
                .map(|rollout| (rollout.id.clone(), rollout))
                .collect(),
            audiences,
            attributes: datafile
                .attributes
                .into_iter()
                .map(|attribute| (attribute.id.clone(), attribute))
                .collect(),
        }
    }
}
