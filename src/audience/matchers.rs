use std::{cmp::Ordering, collections::HashMap, fmt, sync::Arc};

use super::SemanticVersion;
use crate::AttributeValue;

/// Errors raised by leaf matchers.
///
/// The condition evaluator absorbs these into an unknown result. They are only visible when
/// calling matchers directly.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MatchError {
    /// Condition value is not compatible with the match type.
    #[error("condition value has unexpected type for match type {0:?}")]
    UnexpectedValueType(String),

    /// No matcher is registered under the match type.
    #[error("unknown match type: {0:?}")]
    UnknownMatchType(String),

    /// Condition or attribute value is not a valid semantic version.
    #[error("invalid semantic version: {0:?}")]
    InvalidSemanticVersion(String),
}

/// Result of a leaf match: `Some(bool)` when the matcher could decide, `None` when the attribute
/// is missing or has a type the matcher can't compare.
pub type MatchResult = Result<Option<bool>, MatchError>;

/// Signature of user-supplied matchers.
pub type CustomMatcher =
    dyn Fn(&AttributeValue, Option<&AttributeValue>) -> MatchResult + Send + Sync;

/// Built-in match types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    Exact,
    Gt,
    Ge,
    Lt,
    Le,
    Substring,
    Exists,
    SemverEq,
    SemverGt,
    SemverGe,
    SemverLt,
    SemverLe,
    Qualified,
}

impl MatchType {
    pub const ALL: [MatchType; 13] = [
        MatchType::Exact,
        MatchType::Gt,
        MatchType::Ge,
        MatchType::Lt,
        MatchType::Le,
        MatchType::Substring,
        MatchType::Exists,
        MatchType::SemverEq,
        MatchType::SemverGt,
        MatchType::SemverGe,
        MatchType::SemverLt,
        MatchType::SemverLe,
        MatchType::Qualified,
    ];

    /// Name used in configuration.
    pub fn name(self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Gt => "gt",
            MatchType::Ge => "ge",
            MatchType::Lt => "lt",
            MatchType::Le => "le",
            MatchType::Substring => "substring",
            MatchType::Exists => "exists",
            MatchType::SemverEq => "semver_eq",
            MatchType::SemverGt => "semver_gt",
            MatchType::SemverGe => "semver_ge",
            MatchType::SemverLt => "semver_lt",
            MatchType::SemverLe => "semver_le",
            MatchType::Qualified => "qualified",
        }
    }

    /// Apply the match to a condition value and an (optional) user attribute.
    ///
    /// Returns `Err` if the condition value is incompatible with the match type (or is a
    /// malformed version), and `Ok(None)` if the attribute can't be compared. `Exact` looks at a
    /// numeric attribute first: against a non-numeric condition it is unknown, not an error.
    pub fn eval(
        self,
        condition_value: &AttributeValue,
        attribute: Option<&AttributeValue>,
    ) -> MatchResult {
        let unexpected = || MatchError::UnexpectedValueType(self.name().to_owned());

        match self {
            MatchType::Exists => Ok(Some(attribute.is_some_and(|v| !v.is_null()))),

            MatchType::Exact => {
                if let Some(actual) = attribute.and_then(AttributeValue::as_valid_number) {
                    return Ok(condition_value
                        .as_valid_number()
                        .map(|expected| actual == expected));
                }
                match (condition_value, attribute) {
                    (AttributeValue::String(expected), Some(AttributeValue::String(actual))) => {
                        Ok(Some(expected == actual))
                    }
                    (AttributeValue::Boolean(expected), Some(AttributeValue::Boolean(actual))) => {
                        Ok(Some(expected == actual))
                    }
                    (AttributeValue::String(_) | AttributeValue::Boolean(_), _) => Ok(None),
                    _ => Err(unexpected()),
                }
            }

            MatchType::Gt | MatchType::Ge | MatchType::Lt | MatchType::Le => {
                let expected = condition_value.as_valid_number().ok_or_else(unexpected)?;
                let Some(actual) = attribute.and_then(AttributeValue::as_valid_number) else {
                    return Ok(None);
                };
                Ok(Some(match self {
                    MatchType::Gt => actual > expected,
                    MatchType::Ge => actual >= expected,
                    MatchType::Lt => actual < expected,
                    _ => actual <= expected,
                }))
            }

            MatchType::Substring => {
                let expected = condition_value.as_str().ok_or_else(unexpected)?;
                Ok(attribute
                    .and_then(AttributeValue::as_str)
                    .map(|actual| actual.contains(expected)))
            }

            MatchType::SemverEq
            | MatchType::SemverGt
            | MatchType::SemverGe
            | MatchType::SemverLt
            | MatchType::SemverLe => {
                let target: SemanticVersion =
                    condition_value.as_str().ok_or_else(unexpected)?.parse()?;
                let Some(actual) = attribute.and_then(AttributeValue::as_str) else {
                    return Ok(None);
                };
                let ordering = actual.parse::<SemanticVersion>()?.compare_to(&target);
                Ok(Some(match self {
                    MatchType::SemverEq => ordering == Ordering::Equal,
                    MatchType::SemverGt => ordering == Ordering::Greater,
                    MatchType::SemverGe => ordering != Ordering::Less,
                    MatchType::SemverLt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                }))
            }

            MatchType::Qualified => {
                let segment = condition_value.as_str().ok_or_else(unexpected)?;
                match attribute {
                    None | Some(AttributeValue::Null) => Ok(None),
                    Some(AttributeValue::List(segments)) => Ok(Some(
                        segments.iter().any(|s| s.as_str() == Some(segment)),
                    )),
                    Some(_) => Err(unexpected()),
                }
            }
        }
    }
}

/// A matcher registered under a match-type name.
#[derive(Clone)]
pub enum Matcher {
    Builtin(MatchType),
    Custom(Arc<CustomMatcher>),
}

impl Matcher {
    pub fn eval(
        &self,
        condition_value: &AttributeValue,
        attribute: Option<&AttributeValue>,
    ) -> MatchResult {
        match self {
            Matcher::Builtin(match_type) => match_type.eval(condition_value, attribute),
            Matcher::Custom(f) => f(condition_value, attribute),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Builtin(match_type) => f.debug_tuple("Builtin").field(match_type).finish(),
            Matcher::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Lookup table from match-type names to matchers.
///
/// Registries are explicit values: create one at startup (usually with
/// [`MatchRegistry::default()`]) and pass it to evaluators.
#[derive(Debug, Clone)]
pub struct MatchRegistry {
    matchers: HashMap<String, Matcher>,
}

impl MatchRegistry {
    /// Create a registry without any matchers.
    pub fn empty() -> MatchRegistry {
        MatchRegistry {
            matchers: HashMap::new(),
        }
    }

    /// Register (or replace) a custom matcher.
    pub fn with_matcher<F>(mut self, name: impl Into<String>, matcher: F) -> MatchRegistry
    where
        F: Fn(&AttributeValue, Option<&AttributeValue>) -> MatchResult + Send + Sync + 'static,
    {
        self.matchers
            .insert(name.into(), Matcher::Custom(Arc::new(matcher)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Matcher> {
        self.matchers.get(name)
    }

    /// Evaluate a leaf. A missing match type means exact matching.
    pub fn eval(
        &self,
        match_type: Option<&str>,
        condition_value: &AttributeValue,
        attribute: Option<&AttributeValue>,
    ) -> MatchResult {
        let name = match_type.unwrap_or(MatchType::Exact.name());
        let matcher = self
            .get(name)
            .ok_or_else(|| MatchError::UnknownMatchType(name.to_owned()))?;
        matcher.eval(condition_value, attribute)
    }
}

impl Default for MatchRegistry {
    /// Registry with all built-in matchers.
    fn default() -> Self {
        MatchRegistry {
            matchers: MatchType::ALL
                .into_iter()
                .map(|match_type| (match_type.name().to_owned(), Matcher::Builtin(match_type)))
                .collect(),
        }
    }
}
