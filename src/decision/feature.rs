use super::{Decision, DecisionSource, ExperimentDecisionService, Reason};
use crate::{
    config::{FeatureFlag, ProjectConfig, Rollout},
    Attributes, DecideOption, Error, Result,
};

/// Decides a variation for a feature flag: the flag's experiments first, then its rollout rules.
pub struct FeatureDecisionService {
    experiments: ExperimentDecisionService,
}

impl FeatureDecisionService {
    pub fn new(experiments: ExperimentDecisionService) -> FeatureDecisionService {
        FeatureDecisionService { experiments }
    }

    pub fn experiment_service(&self) -> &ExperimentDecisionService {
        &self.experiments
    }

    /// Decide a variation for the feature flag identified by `feature_key`.
    pub async fn decide(
        &self,
        config: &ProjectConfig,
        feature_key: &str,
        user_id: &str,
        attributes: &Attributes,
        options: &[DecideOption],
    ) -> Result<Decision> {
        let feature = config
            .feature_flag(feature_key)
            .ok_or_else(|| Error::FeatureNotFound(feature_key.to_owned()))?;
        self.get_variation_for_feature(config, feature, user_id, attributes, options)
            .await
    }

    pub async fn get_variation_for_feature(
        &self,
        config: &ProjectConfig,
        feature: &FeatureFlag,
        user_id: &str,
        attributes: &Attributes,
        options: &[DecideOption],
    ) -> Result<Decision> {
        if user_id.is_empty() {
            return Err(Error::InvalidUserId);
        }

        for experiment_id in &feature.experiment_ids {
            let Some(experiment) = config.experiment(experiment_id) else {
                log::warn!(target: "decision_core",
                           feature_key = feature.key.as_str(),
                           experiment_id = experiment_id.as_str();
                           "feature refers to unknown experiment");
                continue;
            };

            let decision = self
                .experiments
                .get_variation(config, experiment, user_id, attributes, options)
                .await?;
            if decision.is_decided() {
                log::info!(target: "decision_core",
                           feature_key = feature.key.as_str(),
                           user_id,
                           experiment_key = experiment.key.as_str();
                           "user is in feature experiment");
                return Ok(decision);
            }
        }

        let rollout = if feature.rollout_id.is_empty() {
            None
        } else {
            let rollout = config.rollout(&feature.rollout_id);
            if rollout.is_none() {
                log::warn!(target: "decision_core",
                           feature_key = feature.key.as_str(),
                           rollout_id = feature.rollout_id.as_str();
                           "feature refers to unknown rollout");
            }
            rollout
        };

        let decision = match rollout {
            Some(rollout) => {
                self.get_variation_for_rollout(config, rollout, user_id, attributes, options)
                    .await?
            }
            None => Decision::not_decided(
                DecisionSource::Rollout,
                None,
                Reason::NotBucketedIntoVariation,
            ),
        };

        if decision.is_decided() {
            log::info!(target: "decision_core",
                       feature_key = feature.key.as_str(),
                       user_id,
                       rule_id:? = decision.experiment_id;
                       "user is in feature rollout");
        } else {
            log::info!(target: "decision_core",
                       feature_key = feature.key.as_str(),
                       user_id;
                       "user is not in any feature experiment or rollout rule");
        }
        Ok(decision)
    }

    /// Evaluate rollout rules in order. A user that fails a rule's audience or lands outside its
    /// traffic moves on to the next rule.
    async fn get_variation_for_rollout(
        &self,
        config: &ProjectConfig,
        rollout: &Rollout,
        user_id: &str,
        attributes: &Attributes,
        options: &[DecideOption],
    ) -> Result<Decision> {
        let mut last = Decision::not_decided(
            DecisionSource::Rollout,
            None,
            Reason::NotBucketedIntoVariation,
        );

        for (index, rule) in rollout.experiments.iter().enumerate() {
            let rule_number = index + 1;
            if !self
                .experiments
                .is_user_in_audience(config, rule, attributes)
            {
                log::debug!(target: "decision_core",
                            rollout_id = rollout.id.as_str(),
                            rule_number,
                            user_id;
                            "user does not meet rollout rule audience");
                last = Decision::not_decided(
                    DecisionSource::Rollout,
                    Some(&rule.id),
                    Reason::FailedAudienceTargeting,
                );
                continue;
            }

            let decision = self
                .experiments
                .bucket_user(
                    config,
                    rule,
                    user_id,
                    attributes,
                    options,
                    DecisionSource::Rollout,
                )
                .await?;
            if decision.is_decided() {
                return Ok(decision);
            }
            log::debug!(target: "decision_core",
                        rollout_id = rollout.id.as_str(),
                        rule_number,
                        user_id;
                        "user not bucketed into rollout rule");
            last = decision;
        }

        Ok(last)
    }
}
