//! Experiment and feature decisions.
//!
//! [`ExperimentDecisionService`] decides a variation for a single experiment: status check,
//! audience targeting, mutually-exclusive group bucketing, and then either static variation
//! bucketing or a bandit decision. [`FeatureDecisionService`] tries a feature flag's experiments
//! in order and falls back to the flag's rollout rules.
//!
//! A user that doesn't get a variation is not an error: the returned [`Decision`] is simply not
//! decided and carries a [`Reason`].
use serde::Serialize;

use crate::config::Variation;

mod experiment;
mod feature;

pub use experiment::ExperimentDecisionService;
pub use feature::FeatureDecisionService;

/// Which part of the pipeline produced a decision.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Experiment,
    Rollout,
    Cmab,
}

/// Machine-readable outcome of a decision.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    /// The user was assigned a variation.
    BucketedIntoVariation,
    ExperimentNotRunning,
    FailedAudienceTargeting,
    /// The user belongs to a different experiment (or none) of the experiment's group.
    NotInExperimentGroup,
    /// The user landed in unallocated traffic.
    NotBucketedIntoVariation,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DecisionStatus {
    pub is_decided: bool,
    pub reason: Reason,
}

/// Result of a decision for one user.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Experiment or rollout rule that produced the decision, if any was reached.
    pub experiment_id: Option<String>,
    pub variation: Option<Variation>,
    pub source: DecisionSource,
    pub status: DecisionStatus,
    /// Id of the bandit prediction. Only set for bandit decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmab_uuid: Option<String>,
}

impl Decision {
    pub(crate) fn decided(
        source: DecisionSource,
        experiment_id: &str,
        variation: Variation,
        cmab_uuid: Option<String>,
    ) -> Decision {
        Decision {
            experiment_id: Some(experiment_id.to_owned()),
            variation: Some(variation),
            source,
            status: DecisionStatus {
                is_decided: true,
                reason: Reason::BucketedIntoVariation,
            },
            cmab_uuid,
        }
    }

    pub(crate) fn not_decided(
        source: DecisionSource,
        experiment_id: Option<&str>,
        reason: Reason,
    ) -> Decision {
        Decision {
            experiment_id: experiment_id.map(str::to_owned),
            variation: None,
            source,
            status: DecisionStatus {
                is_decided: false,
                reason,
            },
            cmab_uuid: None,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.status.is_decided
    }

    pub fn reason(&self) -> Reason {
        self.status.reason
    }

    /// Key of the assigned variation.
    pub fn variation_key(&self) -> Option<&str> {
        self.variation.as_ref().map(|variation| variation.key.as_str())
    }
}
