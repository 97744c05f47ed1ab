//! Courses of action, their learned efficacies, and the intents they emit.
//!
//! A course of action is an ordered intention sequence chosen to validate a
//! conjecture activation. Selection is reinforcement-driven: past CoA shapes
//! carry learned efficacy degrees, one untried candidate is always on offer,
//! and the pick is a draw over the normalized degrees.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gm::activation::ConjectureActivation;
use crate::perception::Subject;
use crate::value::{Value, Values};

/// What an intention valuator emits: the intent value and an optional
/// actuation duration.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentValue {
    pub value: Value,
    pub duration: Option<Duration>,
}

impl From<Value> for IntentValue {
    fn from(value: Value) -> Self {
        Self {
            value,
            duration: None,
        }
    }
}

/// Maps belief values to an intent value; `None` makes the intention a no-op.
pub type IntentValuator = Arc<dyn Fn(Option<&Values>) -> Option<IntentValue> + Send + Sync>;

/// A named, reusable way of acting.
#[derive(Clone)]
pub struct Intention {
    pub name: String,
    /// The actuator-facing intent name (`Intent::about`).
    pub intent_name: String,
    pub valuator: IntentValuator,
    pub repeatable: bool,
}

impl Intention {
    pub fn new(name: impl Into<String>, intent_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            intent_name: intent_name.into(),
            valuator: Arc::new(|_: Option<&Values>| None),
            repeatable: true,
        }
    }

    pub fn with_valuator(mut self, valuator: IntentValuator) -> Self {
        self.valuator = valuator;
        self
    }

    pub fn non_repeatable(mut self) -> Self {
        self.repeatable = false;
        self
    }
}

impl fmt::Debug for Intention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intention")
            .field("name", &self.name)
            .field("intent_name", &self.intent_name)
            .field("repeatable", &self.repeatable)
            .finish()
    }
}

/// A concrete motor output bound for actuators.
#[derive(Debug, Clone)]
pub struct Intent {
    pub about: String,
    pub value: Value,
    pub duration: Option<Duration>,
    pub created_at: DateTime<Utc>,
}

impl Intent {
    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }

    /// Stale intents are still realized; realizers log a warning.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() > threshold
    }
}

/// An ordered intention sequence bound to a conjecture activation.
#[derive(Debug, Clone)]
pub struct CourseOfAction {
    pub activation: ConjectureActivation,
    pub intention_names: Vec<String>,
}

impl CourseOfAction {
    /// Two CoAs are of the same type iff subjects and intention-name
    /// sequences match.
    pub fn shape_matches(&self, subject: &Subject, intention_names: &[String]) -> bool {
        self.activation.subject() == *subject && self.intention_names == intention_names
    }
}

/// A CoA as recorded in a round, with the satisfaction state of its
/// conjecture at execution time (the efficacy partition key).
#[derive(Debug, Clone)]
pub struct ExecutedCoa {
    pub coa: CourseOfAction,
    pub already_satisfied: bool,
}

/// Learned correlation between a CoA shape and conjecture satisfaction,
/// partitioned by whether the conjecture was already satisfied when the CoA
/// ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Efficacy {
    pub subject: Subject,
    pub intention_names: Vec<String>,
    pub when_already_satisfied: bool,
    pub degree: f64,
}

/// Decode a candidate index into an intention-name sequence over the domain.
///
/// The index is read as a number in base `|domain|`; its digit sequence picks
/// intention names in order. Consecutive repeats of a non-repeatable
/// intention collapse to one.
pub fn decode_candidate(
    index: u64,
    domain: &[String],
    intentions: &HashMap<String, Intention>,
) -> Vec<String> {
    if domain.is_empty() {
        return Vec::new();
    }
    let base = domain.len() as u64;
    let digits = if base == 1 {
        vec![0usize]
    } else {
        let mut digits = Vec::new();
        let mut n = index;
        loop {
            digits.push((n % base) as usize);
            n /= base;
            if n == 0 {
                break;
            }
        }
        digits.reverse();
        digits
    };

    let mut names: Vec<String> = Vec::with_capacity(digits.len());
    for digit in digits {
        let name = &domain[digit];
        let repeatable = intentions.get(name).map_or(true, |i| i.repeatable);
        if !repeatable && names.last().map(|s| s.as_str()) == Some(name.as_str()) {
            continue;
        }
        names.push(name.clone());
    }
    names
}

/// Pick an index from `degrees` interpreted as unnormalized selection
/// weights, given a uniform draw in `[0, 1)`. The first candidate whose
/// cumulative probability exceeds the draw wins; an all-zero weight vector
/// falls back to a uniform pick.
pub fn pick_weighted(degrees: &[f64], draw: f64) -> usize {
    assert!(!degrees.is_empty());
    let total: f64 = degrees.iter().sum();
    if total <= f64::EPSILON {
        return ((draw * degrees.len() as f64) as usize).min(degrees.len() - 1);
    }
    let mut cumulative = 0.0;
    for (i, degree) in degrees.iter().enumerate() {
        cumulative += degree / total;
        if cumulative > draw {
            return i;
        }
    }
    degrees.len() - 1
}
