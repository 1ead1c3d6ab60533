use super::{
    Condition, LeafCondition, MatchRegistry, MatchType, CUSTOM_ATTRIBUTE_TYPE,
    THIRD_PARTY_DIMENSION_TYPE,
};
use crate::{
    config::{Audience, Experiment},
    Attributes,
};

/// Maximum nesting of audience references. Deeper (or cyclic) references evaluate to unknown.
pub const MAX_AUDIENCE_DEPTH: usize = 10;

/// Source of audiences referenced by id from condition trees.
pub trait AudienceLookup {
    fn audience(&self, id: &str) -> Option<&Audience>;
}

impl AudienceLookup for std::collections::HashMap<String, Audience> {
    fn audience(&self, id: &str) -> Option<&Audience> {
        self.get(id)
    }
}

/// Evaluates condition trees against a user's attributes with three-valued logic.
///
/// `None` stands for unknown: the condition can't be resolved because an attribute is missing,
/// has the wrong type, or the configuration is inconsistent. Unknown propagates through `and`,
/// `or`, and `not` following Kleene logic.
pub struct ConditionEvaluator<'a> {
    registry: &'a MatchRegistry,
    attributes: &'a Attributes,
    audiences: &'a dyn AudienceLookup,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(
        registry: &'a MatchRegistry,
        attributes: &'a Attributes,
        audiences: &'a dyn AudienceLookup,
    ) -> ConditionEvaluator<'a> {
        ConditionEvaluator {
            registry,
            attributes,
            audiences,
        }
    }

    pub fn evaluate(&self, condition: &Condition) -> Option<bool> {
        self.evaluate_at(condition, 0)
    }

    fn evaluate_at(&self, condition: &Condition, depth: usize) -> Option<bool> {
        match condition {
            Condition::Leaf(leaf) => self.evaluate_leaf(leaf),
            Condition::AudienceId(id) => self.evaluate_audience(id, depth),
            Condition::And(children) => {
                let mut unknown = false;
                for child in children {
                    match self.evaluate_at(child, depth) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                (!unknown).then_some(true)
            }
            Condition::Or(children) => {
                let mut unknown = false;
                for child in children {
                    match self.evaluate_at(child, depth) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                (!unknown).then_some(false)
            }
            Condition::Not(child) => child
                .as_deref()
                .and_then(|child| self.evaluate_at(child, depth))
                .map(|result| !result),
        }
    }

    fn evaluate_leaf(&self, leaf: &LeafCondition) -> Option<bool> {
        let supported_kind = leaf.kind == CUSTOM_ATTRIBUTE_TYPE
            || (leaf.kind == THIRD_PARTY_DIMENSION_TYPE
                && leaf.match_type.as_deref() == Some(MatchType::Qualified.name()));
        if !supported_kind {
            log::warn!(target: "decision_core",
                       attribute = leaf.name.as_str(),
                       kind = leaf.kind.as_str();
                       "unsupported condition type, treating condition as unknown");
            return None;
        }

        let attribute = self.attributes.get(&leaf.name);
        match self
            .registry
            .eval(leaf.match_type.as_deref(), &leaf.value, attribute)
        {
            Ok(result) => {
                if result.is_none() {
                    log::debug!(target: "decision_core",
                                attribute = leaf.name.as_str();
                                "attribute missing or of incompatible type, condition is unknown");
                }
                result
            }
            Err(err) => {
                log::warn!(target: "decision_core",
                           attribute = leaf.name.as_str();
                           "failed to evaluate condition: {err}");
                None
            }
        }
    }

    fn evaluate_audience(&self, id: &str, depth: usize) -> Option<bool> {
        if depth >= MAX_AUDIENCE_DEPTH {
            log::warn!(target: "decision_core",
                       audience_id = id;
                       "audience references nested too deeply, treating audience as unknown");
            return None;
        }
        let Some(audience) = self.audiences.audience(id) else {
            log::warn!(target: "decision_core",
                       audience_id = id;
                       "audience not found in configuration");
            return None;
        };
        let result = self.evaluate_at(&audience.conditions, depth + 1);
        log::debug!(target: "decision_core",
                    audience_id = id,
                    result:? = result;
                    "evaluated audience");
        result
    }
}

/// Decides whether a user qualifies for an experiment.
pub struct AudienceEvaluator<'a> {
    registry: &'a MatchRegistry,
}

impl<'a> AudienceEvaluator<'a> {
    pub fn new(registry: &'a MatchRegistry) -> AudienceEvaluator<'a> {
        AudienceEvaluator { registry }
    }

    /// Evaluate experiment audiences for the user. Unknown results do not qualify.
    ///
    /// Explicit `audience_conditions` take precedence over `audience_ids`, which are combined
    /// with an implicit `or`. An experiment without audiences qualifies everyone.
    pub fn evaluate(
        &self,
        experiment: &Experiment,
        attributes: &Attributes,
        audiences: &dyn AudienceLookup,
    ) -> bool {
        let implicit;
        let condition = match &experiment.audience_conditions {
            Some(Condition::Or(children)) if children.is_empty() => return true,
            Some(condition) => condition,
            None if experiment.audience_ids.is_empty() => return true,
            None => {
                implicit = Condition::Or(
                    experiment
                        .audience_ids
                        .iter()
                        .map(|id| Condition::AudienceId(id.clone()))
                        .collect(),
                );
                &implicit
            }
        };

        let result = ConditionEvaluator::new(self.registry, attributes, audiences)
            .evaluate(condition)
            .unwrap_or(false);
        log::info!(target: "decision_core",
                   experiment_key = experiment.key.as_str(),
                   result;
                   "evaluated audiences for experiment");
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{config::TrafficAllocation, AttributeValue};

    fn audiences() -> HashMap<String, Audience> {
        [
            Audience::new("chrome", "Chrome users", Condition::leaf("browser", "exact", "chrome")),
            Audience::new("adults", "Adults", Condition::leaf("age", "ge", 18i64)),
            Audience::new("self", "Cyclic", Condition::audience("self")),
        ]
        .into_iter()
        .map(|audience| (audience.id.clone(), audience))
        .collect()
    }

    fn attributes() -> Attributes {
        [
            ("browser".to_owned(), "chrome".into()),
            ("age".to_owned(), 30i64.into()),
        ]
        .into_iter()
        .collect()
    }

    fn matching() -> Condition {
        Condition::leaf("browser", "exact", "chrome")
    }

    fn mismatching() -> Condition {
        Condition::leaf("browser", "exact", "firefox")
    }

    fn unknown() -> Condition {
        Condition::leaf("missing", "exact", "x")
    }

    fn eval(condition: &Condition) -> Option<bool> {
        let _ = env_logger::builder().is_test(true).try_init();
        let registry = MatchRegistry::default();
        let attributes = attributes();
        let audiences = audiences();
        ConditionEvaluator::new(&registry, &attributes, &audiences).evaluate(condition)
    }

    #[test]
    fn three_valued_and() {
        assert_eq!(eval(&Condition::And(vec![matching(), unknown()])), None);
        assert_eq!(eval(&Condition::And(vec![mismatching(), unknown()])), Some(false));
        assert_eq!(eval(&Condition::And(vec![unknown(), mismatching()])), Some(false));
        assert_eq!(eval(&Condition::And(vec![matching(), matching()])), Some(true));
        assert_eq!(eval(&Condition::And(vec![])), Some(true));
    }

    #[test]
    fn three_valued_or() {
        assert_eq!(eval(&Condition::Or(vec![mismatching(), unknown()])), None);
        assert_eq!(eval(&Condition::Or(vec![matching(), unknown()])), Some(true));
        assert_eq!(eval(&Condition::Or(vec![unknown(), matching()])), Some(true));
        assert_eq!(eval(&Condition::Or(vec![mismatching(), mismatching()])), Some(false));
        assert_eq!(eval(&Condition::Or(vec![])), Some(false));
    }

    #[test]
    fn three_valued_not() {
        assert_eq!(eval(&Condition::not(unknown())), None);
        assert_eq!(eval(&Condition::not(matching())), Some(false));
        assert_eq!(eval(&Condition::not(mismatching())), Some(true));
        assert_eq!(eval(&Condition::Not(None)), None);
    }

    #[test]
    fn leaf_errors_are_unknown() {
        assert_eq!(eval(&Condition::leaf("age", "gt", "eighteen")), None);
        assert_eq!(eval(&Condition::leaf("age", "regex", "1.*")), None);
        assert_eq!(
            eval(&Condition::not(Condition::leaf("age", "gt", AttributeValue::Null))),
            None
        );
    }

    #[test]
    fn unsupported_leaf_kind_is_unknown() {
        let mut leaf = LeafCondition::new("browser", "exact", "chrome");
        leaf.kind = "device_type".to_owned();
        assert_eq!(eval(&Condition::Leaf(leaf)), None);
    }

    #[test]
    fn legacy_leaf_matches_exactly() {
        let mut leaf = LeafCondition::new("browser", "exact", "chrome");
        leaf.match_type = None;
        assert_eq!(eval(&Condition::Leaf(leaf)), Some(true));
    }

    #[test]
    fn audience_references() {
        assert_eq!(eval(&Condition::audience("chrome")), Some(true));
        assert_eq!(
            eval(&Condition::And(vec![Condition::audience("chrome"), Condition::audience("adults")])),
            Some(true)
        );
        assert_eq!(eval(&Condition::audience("unknown")), None);
        assert_eq!(eval(&Condition::audience("self")), None);
    }

    fn experiment() -> Experiment {
        Experiment::new("1", "exp", vec![TrafficAllocation::new("v1", 10000)])
    }

    fn qualifies(experiment: &Experiment, attributes: &Attributes) -> bool {
        let registry = MatchRegistry::default();
        AudienceEvaluator::new(&registry).evaluate(experiment, attributes, &audiences())
    }

    #[test]
    fn experiment_without_audiences_qualifies_everyone() {
        assert!(qualifies(&experiment(), &Attributes::new()));
        assert!(qualifies(
            &experiment().with_audience_conditions(Condition::Or(vec![])),
            &Attributes::new()
        ));
    }

    #[test]
    fn audience_ids_are_implicit_or() {
        let experiment = experiment().with_audience_ids(["chrome", "adults"]);
        assert!(qualifies(&experiment, &attributes()));
        assert!(qualifies(
            &experiment,
            &[("age".to_owned(), 20i64.into())].into_iter().collect()
        ));
        assert!(!qualifies(&experiment, &Attributes::new()));
    }

    #[test]
    fn audience_conditions_take_precedence() {
        let experiment = experiment()
            .with_audience_ids(["chrome"])
            .with_audience_conditions(Condition::not(Condition::audience("chrome")));
        assert!(!qualifies(&experiment, &attributes()));
    }

    #[test]
    fn unknown_does_not_qualify() {
        let experiment = experiment().with_audience_ids(["unknown"]);
        assert!(!qualifies(&experiment, &attributes()));

        let experiment = experiment
            .with_audience_ids(Vec::<String>::new())
            .with_audience_conditions(Condition::not(Condition::leaf("age", "gt", true)));
        assert!(!qualifies(&experiment, &attributes()));
    }
}
