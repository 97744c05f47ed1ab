//! Parameter values carried by beliefs, predictions and intents, and the
//! expectations a prediction places on them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single named parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// Named parameter values. Absent values mean disbelief at the belief level.
pub type Values = BTreeMap<String, Value>;

/// Convenience constructor for a `Values` map.
pub fn values<const N: usize>(entries: [(&str, Value); N]) -> Values {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// The acceptable sub-domain a prediction assigns to one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expectation {
    Equals(Value),
    OneOf(Vec<Value>),
    InRange { min: f64, max: f64 },
}

impl Expectation {
    pub fn contains(&self, value: &Value) -> bool {
        self.distance(value) == 0.0
    }

    /// Normalized deviation of `value` from this expectation, in `[0, 1]`.
    /// In-range values deviate by 0; out-of-range numeric values deviate by
    /// their overshoot measured against the range span, clamped to 1; values
    /// of the wrong shape deviate maximally.
    pub fn distance(&self, value: &Value) -> f64 {
        match self {
            Expectation::Equals(expected) => {
                if expected == value {
                    0.0
                } else {
                    1.0
                }
            }
            Expectation::OneOf(options) => {
                if options.contains(value) {
                    0.0
                } else {
                    1.0
                }
            }
            Expectation::InRange { min, max } => match value.as_number() {
                None => 1.0,
                Some(n) if n >= *min && n <= *max => 0.0,
                Some(n) => {
                    let span = max - min;
                    if span <= f64::EPSILON {
                        return 1.0;
                    }
                    let overshoot = if n < *min { min - n } else { n - max };
                    (overshoot / span).min(1.0)
                }
            },
        }
    }
}

/// Per-parameter expectations of a prediction.
pub type Expectations = BTreeMap<String, Expectation>;

/// Mean per-parameter deviation of `actual` from `expected`, in `[0, 1]`.
/// A parameter the prediction expects but the values lack deviates maximally.
pub fn deviation(expected: &Expectations, actual: &Values) -> f64 {
    if expected.is_empty() {
        return 0.0;
    }
    let total: f64 = expected
        .iter()
        .map(|(param, expectation)| match actual.get(param) {
            Some(value) => expectation.distance(value),
            None => 1.0,
        })
        .sum();
    total / expected.len() as f64
}
