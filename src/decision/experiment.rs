use std::sync::Arc;

use super::{Decision, DecisionSource, Reason};
use crate::{
    attributes::bucketing_id,
    audience::{AudienceEvaluator, MatchRegistry},
    cmab::CmabService,
    config::{Experiment, ProjectConfig, TrafficAllocation},
    sharder::{
        experiment_bucketing_key, find_bucket, group_bucketing_key, Murmur3Sharder, Sharder,
    },
    Attributes, DecideOption, Error, Result,
};

/// Entity id of the single range used to gate bandit traffic.
const CMAB_TRAFFIC_ENTITY: &str = "$";

/// Decides which variation of an experiment a user gets.
///
/// The service is stateless apart from the injected [`CmabService`] (whose cache is shared by all
/// decisions), so it can be created once and shared between tasks.
pub struct ExperimentDecisionService {
    registry: MatchRegistry,
    sharder: Murmur3Sharder,
    cmab: Arc<CmabService>,
}

impl ExperimentDecisionService {
    pub fn new(registry: MatchRegistry, cmab: Arc<CmabService>) -> ExperimentDecisionService {
        ExperimentDecisionService {
            registry,
            sharder: Murmur3Sharder::default(),
            cmab,
        }
    }

    pub fn cmab_service(&self) -> &CmabService {
        &self.cmab
    }

    /// Decide a variation for the experiment identified by `experiment_key`.
    pub async fn decide(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        attributes: &Attributes,
        options: &[DecideOption],
    ) -> Result<Decision> {
        let experiment = config
            .experiment_by_key(experiment_key)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_key.to_owned()))?;
        self.get_variation(config, experiment, user_id, attributes, options)
            .await
    }

    /// Decide a variation for `experiment`.
    ///
    /// Returns `Err` only for invalid input or when the bandit service fails. All other outcomes
    /// are reported as a [`Decision`].
    pub async fn get_variation(
        &self,
        config: &ProjectConfig,
        experiment: &Experiment,
        user_id: &str,
        attributes: &Attributes,
        options: &[DecideOption],
    ) -> Result<Decision> {
        if user_id.is_empty() {
            return Err(Error::InvalidUserId);
        }

        if !experiment.is_active() {
            log::info!(target: "decision_core",
                       experiment_key = experiment.key.as_str(),
                       status:? = experiment.status;
                       "experiment is not running");
            return Ok(Decision::not_decided(
                DecisionSource::Experiment,
                Some(&experiment.id),
                Reason::ExperimentNotRunning,
            ));
        }

        if !self.is_user_in_audience(config, experiment, attributes) {
            log::info!(target: "decision_core",
                       experiment_key = experiment.key.as_str(),
                       user_id;
                       "user does not meet audience conditions");
            return Ok(Decision::not_decided(
                DecisionSource::Experiment,
                Some(&experiment.id),
                Reason::FailedAudienceTargeting,
            ));
        }

        self.bucket_user(
            config,
            experiment,
            user_id,
            attributes,
            options,
            DecisionSource::Experiment,
        )
        .await
    }

    pub(crate) fn is_user_in_audience(
        &self,
        config: &ProjectConfig,
        experiment: &Experiment,
        attributes: &Attributes,
    ) -> bool {
        AudienceEvaluator::new(&self.registry).evaluate(experiment, attributes, config)
    }

    /// Group and variation bucketing, without status or audience checks.
    pub(crate) async fn bucket_user(
        &self,
        config: &ProjectConfig,
        experiment: &Experiment,
        user_id: &str,
        attributes: &Attributes,
        options: &[DecideOption],
        source: DecisionSource,
    ) -> Result<Decision> {
        let bucketing_id = bucketing_id(user_id, attributes);

        if !self.is_in_group_experiment(config, experiment, bucketing_id) {
            return Ok(Decision::not_decided(
                source,
                Some(&experiment.id),
                Reason::NotInExperimentGroup,
            ));
        }

        let bucket_value = self
            .sharder
            .bucket(&experiment_bucketing_key(bucketing_id, &experiment.id));
        log::debug!(target: "decision_core",
                    experiment_key = experiment.key.as_str(),
                    bucketing_id,
                    bucket_value;
                    "assigned bucket for variation bucketing");

        if let Some(cmab) = &experiment.cmab {
            let gate = [TrafficAllocation::new(
                CMAB_TRAFFIC_ENTITY,
                cmab.traffic_allocation,
            )];
            if find_bucket(bucket_value, &gate).is_none() {
                log::info!(target: "decision_core",
                           experiment_key = experiment.key.as_str(),
                           user_id;
                           "user not in bandit traffic");
                return Ok(Decision::not_decided(
                    source,
                    Some(&experiment.id),
                    Reason::NotBucketedIntoVariation,
                ));
            }

            let decision = self
                .cmab
                .get_decision(config, user_id, attributes, &experiment.id, options)
                .await?;
            let Some(variation) = experiment.variation(&decision.variation_id) else {
                log::warn!(target: "decision_core",
                           experiment_key = experiment.key.as_str(),
                           variation_id = decision.variation_id.as_str();
                           "bandit returned a variation that is not in the experiment");
                return Ok(Decision::not_decided(
                    source,
                    Some(&experiment.id),
                    Reason::NotBucketedIntoVariation,
                ));
            };
            log::info!(target: "decision_core",
                       experiment_key = experiment.key.as_str(),
                       user_id,
                       variation_key = variation.key.as_str();
                       "user is in bandit variation");
            return Ok(Decision::decided(
                DecisionSource::Cmab,
                &experiment.id,
                variation.clone(),
                Some(decision.cmab_uuid),
            ));
        }

        let variation = find_bucket(bucket_value, &experiment.traffic_allocation)
            .and_then(|variation_id| experiment.variation(variation_id));
        match variation {
            Some(variation) => {
                log::info!(target: "decision_core",
                           experiment_key = experiment.key.as_str(),
                           bucketing_id,
                           variation_key = variation.key.as_str();
                           "user is in variation");
                Ok(Decision::decided(
                    source,
                    &experiment.id,
                    variation.clone(),
                    None,
                ))
            }
            None => {
                log::info!(target: "decision_core",
                           experiment_key = experiment.key.as_str(),
                           bucketing_id;
                           "user is not in any variation");
                Ok(Decision::not_decided(
                    source,
                    Some(&experiment.id),
                    Reason::NotBucketedIntoVariation,
                ))
            }
        }
    }

    /// For experiments in a mutually-exclusive group, check that the user is bucketed into this
    /// experiment of the group. Experiments outside such groups always pass.
    fn is_in_group_experiment(
        &self,
        config: &ProjectConfig,
        experiment: &Experiment,
        bucketing_id: &str,
    ) -> bool {
        let Some(group_id) = &experiment.group_id else {
            return true;
        };
        let Some(group) = config.group(group_id) else {
            log::warn!(target: "decision_core",
                       experiment_key = experiment.key.as_str(),
                       group_id = group_id.as_str();
                       "experiment refers to unknown group");
            return false;
        };
        if !group.is_mutually_exclusive() {
            return true;
        }

        let bucket_value = self
            .sharder
            .bucket(&group_bucketing_key(bucketing_id, &group.id));
        log::debug!(target: "decision_core",
                    group_id = group.id.as_str(),
                    bucketing_id,
                    bucket_value;
                    "assigned bucket for group bucketing");

        match find_bucket(bucket_value, &group.traffic_allocation) {
            Some(experiment_id) if experiment_id == experiment.id => true,
            bucketed => {
                log::info!(target: "decision_core",
                           experiment_key = experiment.key.as_str(),
                           group_id = group.id.as_str(),
                           bucketed_experiment_id:? = bucketed;
                           "user is not in this experiment of the group");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        cmab::{CmabCache, CmabClient, CmabError},
        AttributeValue, BUCKETING_ID_ATTRIBUTE,
    };

    const DATAFILE: &str = include_str!("../../tests/data/datafile.json");

    struct FixedClient {
        variation_id: Option<&'static str>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CmabClient for FixedClient {
        async fn fetch_decision(
            &self,
            _rule_id: &str,
            _user_id: &str,
            _attributes: &Attributes,
            _cmab_uuid: &str,
        ) -> std::result::Result<String, CmabError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.variation_id
                .map(str::to_owned)
                .ok_or(CmabError::Status(503))
        }
    }

    fn service_with_client(
        variation_id: Option<&'static str>,
    ) -> (ExperimentDecisionService, Arc<FixedClient>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = Arc::new(FixedClient {
            variation_id,
            calls: AtomicU32::new(0),
        });
        let cmab = CmabService::new(
            Arc::new(CmabCache::new(100, Duration::from_secs(60))),
            client.clone(),
        );
        (
            ExperimentDecisionService::new(MatchRegistry::default(), Arc::new(cmab)),
            client,
        )
    }

    fn service() -> ExperimentDecisionService {
        service_with_client(Some("2202")).0
    }

    fn config() -> ProjectConfig {
        ProjectConfig::parse(DATAFILE).unwrap()
    }

    fn chrome() -> Attributes {
        [("browser".to_owned(), AttributeValue::from("chrome"))]
            .into_iter()
            .collect()
    }

    async fn decide(key: &str, user_id: &str, attributes: &Attributes) -> Result<Decision> {
        service()
            .decide(&config(), key, user_id, attributes, &[])
            .await
    }

    #[tokio::test]
    async fn buckets_into_variation() {
        let decision = decide("exp_basic", "user_1", &Attributes::new())
            .await
            .unwrap();
        assert!(decision.is_decided());
        assert_eq!(decision.source, DecisionSource::Experiment);
        assert_eq!(decision.experiment_id.as_deref(), Some("1001"));
        assert!(matches!(decision.variation_key(), Some("control" | "treatment")));
        assert_eq!(decision.cmab_uuid, None);
    }

    #[tokio::test]
    async fn bucketing_is_deterministic_and_split() {
        let service = service();
        let config = config();
        let mut treatment = 0;
        for i in 0..1000 {
            let user_id = format!("user_{i}");
            let first = service
                .decide(&config, "exp_basic", &user_id, &Attributes::new(), &[])
                .await
                .unwrap();
            let second = service
                .decide(&config, "exp_basic", &user_id, &Attributes::new(), &[])
                .await
                .unwrap();
            assert_eq!(first, second);
            if first.variation_key() == Some("treatment") {
                treatment += 1;
            }
        }
        assert!((400..600).contains(&treatment), "treatment = {treatment}");
    }

    #[tokio::test]
    async fn bucketing_id_attribute_overrides_user_id() {
        let service = service();
        let config = config();
        for i in 0..50 {
            let bucketing_id = format!("user_{i}");
            let expected = service
                .decide(&config, "exp_basic", &bucketing_id, &Attributes::new(), &[])
                .await
                .unwrap();
            let attributes: Attributes =
                [(BUCKETING_ID_ATTRIBUTE.to_owned(), bucketing_id.into())]
                    .into_iter()
                    .collect();
            let actual = service
                .decide(&config, "exp_basic", "someone_else", &attributes, &[])
                .await
                .unwrap();
            assert_eq!(actual.variation, expected.variation);
        }
    }

    #[tokio::test]
    async fn inactive_experiment_is_not_decided() {
        let decision = decide("exp_paused", "user_1", &Attributes::new())
            .await
            .unwrap();
        assert!(!decision.is_decided());
        assert_eq!(decision.reason(), Reason::ExperimentNotRunning);
    }

    #[tokio::test]
    async fn audience_targeting() {
        let decision = decide("exp_targeted", "user_1", &chrome()).await.unwrap();
        assert_eq!(decision.variation_key(), Some("chrome_variation"));

        let decision = decide("exp_targeted", "user_1", &Attributes::new())
            .await
            .unwrap();
        assert_eq!(decision.reason(), Reason::FailedAudienceTargeting);
    }

    #[tokio::test]
    async fn audience_conditions_override_audience_ids() {
        let mut desktop = chrome();
        desktop.insert("is_mobile".to_owned(), false.into());
        let decision = decide("exp_typed_conditions", "user_1", &desktop)
            .await
            .unwrap();
        assert_eq!(decision.variation_key(), Some("targeted"));

        // Unknown device: `not` of an unknown audience is still unknown.
        let decision = decide("exp_typed_conditions", "user_1", &chrome())
            .await
            .unwrap();
        assert_eq!(decision.reason(), Reason::FailedAudienceTargeting);

        let mut mobile = chrome();
        mobile.insert("is_mobile".to_owned(), true.into());
        let decision = decide("exp_typed_conditions", "user_1", &mobile)
            .await
            .unwrap();
        assert_eq!(decision.reason(), Reason::FailedAudienceTargeting);

        // audienceIds would let adults in, but audienceConditions take precedence.
        let adult = [("age".to_owned(), AttributeValue::from(30i64))]
            .into_iter()
            .collect();
        let decision = decide("exp_typed_conditions", "user_1", &adult)
            .await
            .unwrap();
        assert_eq!(decision.reason(), Reason::FailedAudienceTargeting);
    }

    #[tokio::test]
    async fn unallocated_traffic_is_not_decided() {
        let decision = decide("exp_holdback", "user_1", &Attributes::new())
            .await
            .unwrap();
        assert_eq!(decision.reason(), Reason::NotBucketedIntoVariation);
        assert_eq!(decision.variation, None);
    }

    #[tokio::test]
    async fn group_experiments_are_mutually_exclusive() {
        let service = service();
        let config = config();
        let mut in_a = 0;
        for i in 0..500 {
            let user_id = format!("user_{i}");
            let a = service
                .decide(&config, "exp_group_a", &user_id, &Attributes::new(), &[])
                .await
                .unwrap();
            let b = service
                .decide(&config, "exp_group_b", &user_id, &Attributes::new(), &[])
                .await
                .unwrap();

            assert_ne!(a.is_decided(), b.is_decided(), "user {user_id}");
            let excluded = if a.is_decided() { &b } else { &a };
            assert_eq!(excluded.reason(), Reason::NotInExperimentGroup);
            if a.is_decided() {
                in_a += 1;
            }
        }
        assert!((175..325).contains(&in_a), "in_a = {in_a}");
    }

    #[tokio::test]
    async fn overlapping_groups_do_not_exclude() {
        let decision = decide("exp_overlapping", "user_1", &Attributes::new())
            .await
            .unwrap();
        assert_eq!(decision.variation_key(), Some("overlapping_variation"));
    }

    #[tokio::test]
    async fn bandit_experiment_uses_cmab_service() {
        let (service, client) = service_with_client(Some("2202"));
        let decision = service
            .decide(&config(), "exp_cmab", "user_1", &chrome(), &[])
            .await
            .unwrap();

        assert!(decision.is_decided());
        assert_eq!(decision.source, DecisionSource::Cmab);
        assert_eq!(decision.variation_key(), Some("arm_b"));
        assert!(decision.cmab_uuid.is_some());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bandit_experiment_checks_audience_first() {
        let (service, client) = service_with_client(Some("2202"));
        let decision = service
            .decide(&config(), "exp_cmab", "user_1", &Attributes::new(), &[])
            .await
            .unwrap();

        assert_eq!(decision.reason(), Reason::FailedAudienceTargeting);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bandit_traffic_gate() {
        let (service, client) = service_with_client(Some("2211"));
        let decision = service
            .decide(&config(), "exp_cmab_closed", "user_1", &Attributes::new(), &[])
            .await
            .unwrap();

        assert_eq!(decision.reason(), Reason::NotBucketedIntoVariation);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_bandit_variation_is_not_decided() {
        let (service, _) = service_with_client(Some("9999"));
        let decision = service
            .decide(&config(), "exp_cmab", "user_1", &chrome(), &[])
            .await
            .unwrap();
        assert_eq!(decision.reason(), Reason::NotBucketedIntoVariation);
    }

    #[tokio::test]
    async fn bandit_failure_is_an_error() {
        let (service, _) = service_with_client(None);
        let result = service
            .decide(&config(), "exp_cmab", "user_1", &chrome(), &[])
            .await;
        assert!(matches!(result, Err(Error::Cmab(CmabError::Status(503)))));
    }

    #[tokio::test]
    async fn invalid_input() {
        assert!(matches!(
            decide("missing", "user_1", &Attributes::new()).await,
            Err(Error::ExperimentNotFound(key)) if key == "missing"
        ));
        assert!(matches!(
            decide("exp_basic", "", &Attributes::new()).await,
            Err(Error::InvalidUserId)
        ));
    }
}
