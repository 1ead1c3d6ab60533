//! Audience evaluation.
//!
//! [`Condition`] trees are evaluated by [`ConditionEvaluator`] with three-valued logic, using
//! leaf matchers looked up in a [`MatchRegistry`]. [`AudienceEvaluator`] applies an experiment's
//! audiences and collapses the result to a yes/no answer (unknown does not qualify).
mod condition;
mod evaluator;
mod matchers;
mod semantic_version;

pub use condition::{Condition, LeafCondition, CUSTOM_ATTRIBUTE_TYPE, THIRD_PARTY_DIMENSION_TYPE};
pub(crate) use condition::deserialize_encoded;
pub use evaluator::{AudienceEvaluator, AudienceLookup, ConditionEvaluator, MAX_AUDIENCE_DEPTH};
pub use matchers::{CustomMatcher, MatchError, MatchRegistry, MatchResult, MatchType, Matcher};
pub use semantic_version::SemanticVersion;
