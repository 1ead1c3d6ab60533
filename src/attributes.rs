use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Reserved attribute that overrides the identifier used for bucketing.
pub const BUCKETING_ID_ATTRIBUTE: &str = "$opt_bucketing_id";

/// Largest magnitude a number may have to participate in numeric matching. Anything larger can't
/// be represented exactly as `f64`.
const MAX_VALID_NUMBER: f64 = 9_007_199_254_740_992.0; // 2^53

/// Type alias for a HashMap representing key-value pairs of user attributes.
///
/// # Examples
/// ```
/// # use decision_core::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30i64.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("username".to_owned(), "john_doe".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Enum representing possible values of a user attribute (and of a condition value in audience
/// configuration).
///
/// Integers and floating-point numbers are kept apart so that they serialize back in their
/// original form, but all numeric matching treats them interchangeably.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// An integer value.
    Integer(i64),
    /// A floating-point value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A list value, e.g., qualified segments.
    List(Vec<AttributeValue>),
    /// A null value or absence of value.
    #[from(ignore)]
    Null,
}

impl AttributeValue {
    /// Returns the string value if the attribute is a string.
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Returns the numeric value if the attribute is a number that can take part in numeric
    /// comparisons: finite and not larger than 2^53 in magnitude.
    pub fn as_valid_number(&self) -> Option<f64> {
        let n = match self {
            AttributeValue::Integer(i) => *i as f64,
            AttributeValue::Number(n) => *n,
            _ => return None,
        };
        (n.is_finite() && n.abs() <= MAX_VALID_NUMBER).then_some(n)
    }

    /// Returns `true` if value is [`AttributeValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(value: Vec<&str>) -> Self {
        Self::List(value.into_iter().map(AttributeValue::from).collect())
    }
}

/// Resolve the identifier used for bucketing.
///
/// The [`BUCKETING_ID_ATTRIBUTE`] attribute takes precedence over `user_id` but only if it holds a
/// string. Any other type is ignored.
pub fn bucketing_id<'a>(user_id: &'a str, attributes: &'a Attributes) -> &'a str {
    match attributes.get(BUCKETING_ID_ATTRIBUTE) {
        Some(AttributeValue::String(id)) => {
            log::debug!(target: "decision_core", bucketing_id = id.as_str(); "using bucketing id override");
            id
        }
        Some(_) => {
            log::warn!(target: "decision_core",
                       user_id;
                       "bucketing id attribute is not a string, defaulting to user id");
            user_id
        }
        None => user_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_integers_and_floats_separately() {
        let value: AttributeValue = serde_json::from_str("42").unwrap();
        assert_eq!(value, AttributeValue::Integer(42));

        let value: AttributeValue = serde_json::from_str("4.2").unwrap();
        assert_eq!(value, AttributeValue::Number(4.2));

        let value: AttributeValue = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(value, vec!["a", "b"].into());

        let value: AttributeValue = serde_json::from_str("null").unwrap();
        assert_eq!(value, AttributeValue::Null);
    }

    #[test]
    fn valid_numbers() {
        assert_eq!(AttributeValue::from(1i64).as_valid_number(), Some(1.0));
        assert_eq!(AttributeValue::from(1.5).as_valid_number(), Some(1.5));
        assert_eq!(AttributeValue::from(f64::INFINITY).as_valid_number(), None);
        assert_eq!(AttributeValue::from(f64::NAN).as_valid_number(), None);
        assert_eq!(AttributeValue::from(2f64.powi(53) + 2.0).as_valid_number(), None);
        assert_eq!(AttributeValue::from(i64::MAX).as_valid_number(), None);
        assert_eq!(AttributeValue::from("1").as_valid_number(), None);
        assert_eq!(AttributeValue::from(true).as_valid_number(), None);
    }

    #[test]
    fn bucketing_id_defaults_to_user_id() {
        assert_eq!(bucketing_id("user", &Attributes::new()), "user");
    }

    #[test]
    fn bucketing_id_uses_string_override() {
        let attributes = Attributes::from([(BUCKETING_ID_ATTRIBUTE.to_owned(), "override".into())]);
        assert_eq!(bucketing_id("user", &attributes), "override");
    }

    #[test]
    fn bucketing_id_ignores_non_string_override() {
        let attributes = Attributes::from([(BUCKETING_ID_ATTRIBUTE.to_owned(), 42i64.into())]);
        assert_eq!(bucketing_id("user", &attributes), "user");
    }
}
