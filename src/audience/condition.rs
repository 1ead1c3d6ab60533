use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

use crate::AttributeValue;

/// Leaf type for conditions on user-supplied attributes.
pub const CUSTOM_ATTRIBUTE_TYPE: &str = "custom_attribute";
/// Leaf type for conditions on externally qualified segments.
pub const THIRD_PARTY_DIMENSION_TYPE: &str = "third_party_dimension";

/// Targeting condition tree.
///
/// Trees are built once from configuration and never mutated afterwards. They evaluate to
/// `Some(true)`, `Some(false)`, or `None` (unknown) with
/// [`ConditionEvaluator`](super::ConditionEvaluator).
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Leaf(LeafCondition),
    /// Reference to an audience whose conditions are evaluated in place of this node.
    AudienceId(String),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    /// Negation. A `not` without an operand evaluates to unknown.
    Not(Option<Box<Condition>>),
}

/// A single attribute comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafCondition {
    /// Leaf type, normally [`CUSTOM_ATTRIBUTE_TYPE`].
    pub kind: String,
    /// Attribute name the condition reads.
    pub name: String,
    /// Match type. `None` means a legacy condition that is matched exactly.
    pub match_type: Option<String>,
    pub value: AttributeValue,
}

impl LeafCondition {
    pub fn new(
        name: impl Into<String>,
        match_type: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> LeafCondition {
        LeafCondition {
            kind: CUSTOM_ATTRIBUTE_TYPE.to_owned(),
            name: name.into(),
            match_type: Some(match_type.into()),
            value: value.into(),
        }
    }
}

impl Condition {
    /// Shorthand for a custom-attribute leaf.
    pub fn leaf(
        name: impl Into<String>,
        match_type: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Condition {
        Condition::Leaf(LeafCondition::new(name, match_type, value))
    }

    pub fn audience(id: impl Into<String>) -> Condition {
        Condition::AudienceId(id.into())
    }

    pub fn not(condition: Condition) -> Condition {
        Condition::Not(Some(Box::new(condition)))
    }

    /// Build a condition tree from its datafile JSON form.
    ///
    /// The JSON form is a list whose first element may be one of `"and"`, `"or"`, `"not"` followed
    /// by operands. A list without a leading operator is an implicit `"or"`. Operands are nested
    /// lists, leaf objects, or audience id strings.
    pub fn from_json(value: &Value) -> Result<Condition, String> {
        match value {
            Value::Array(items) => {
                let (operator, operands) = match items.first() {
                    Some(Value::String(s)) if is_operator(s) => (s.as_str(), &items[1..]),
                    _ => ("or", &items[..]),
                };
                let mut children = operands
                    .iter()
                    .map(Condition::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match operator {
                    "and" => Condition::And(children),
                    "not" => {
                        // Only the first operand of `not` is meaningful.
                        children.truncate(1);
                        Condition::Not(children.pop().map(Box::new))
                    }
                    _ => Condition::Or(children),
                })
            }
            Value::Object(fields) => {
                let field_str = |key: &str| fields.get(key).and_then(Value::as_str);
                Ok(Condition::Leaf(LeafCondition {
                    kind: field_str("type").unwrap_or_default().to_owned(),
                    name: field_str("name")
                        .ok_or("leaf condition is missing attribute name")?
                        .to_owned(),
                    match_type: field_str("match").map(str::to_owned),
                    value: fields
                        .get("value")
                        .map(attribute_value_from_json)
                        .unwrap_or(AttributeValue::Null),
                }))
            }
            Value::String(id) => Ok(Condition::AudienceId(id.clone())),
            other => Err(format!("unexpected condition node: {other}")),
        }
    }

    /// Parse a condition tree from a JSON-encoded string, as used by legacy audiences.
    pub fn from_json_str(s: &str) -> Result<Condition, String> {
        let value: Value = serde_json::from_str(s).map_err(|err| err.to_string())?;
        Condition::from_json(&value)
    }
}

fn is_operator(s: &str) -> bool {
    matches!(s, "and" | "or" | "not")
}

/// Convert a condition value. Values that can't be compared (objects) become `Null` and fail
/// type validation in matchers.
fn attribute_value_from_json(value: &Value) -> AttributeValue {
    match value {
        Value::String(s) => AttributeValue::String(s.clone()),
        Value::Bool(b) => AttributeValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AttributeValue::Integer(i),
            None => n
                .as_f64()
                .map(AttributeValue::Number)
                .unwrap_or(AttributeValue::Null),
        },
        Value::Array(items) => {
            AttributeValue::List(items.iter().map(attribute_value_from_json).collect())
        }
        Value::Null | Value::Object(_) => AttributeValue::Null,
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Condition::from_json(&value).map_err(de::Error::custom)
    }
}

/// Deserialize audience conditions that are either a JSON-encoded string or inline JSON.
pub(crate) fn deserialize_encoded<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Condition, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Condition::from_json_str(&s),
        value => Condition::from_json(&value),
    }
    .map_err(de::Error::custom)
}
