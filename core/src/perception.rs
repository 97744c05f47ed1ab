//! Beliefs, predictions, prediction errors and the perception union.
//!
//! A perception is either a prediction this generative model made (downward)
//! or a prediction error reported against one of its predictions (upward).
//! Both variants answer to a common subject identity so rounds can enforce
//! one-perception-per-subject on completion.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::{deviation, Expectations, Values};

/// Predicate a goal activation must see hold over belief values.
pub type GoalPredicate = Arc<dyn Fn(&Values) -> bool + Send + Sync>;

/// What a perception or belief refers to: a conjecture bound to a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subject {
    pub conjecture_name: String,
    pub about: String,
}

impl Subject {
    pub fn new(conjecture_name: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            conjecture_name: conjecture_name.into(),
            about: about.into(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.conjecture_name, self.about)
    }
}

/// What a generative model holds true about a conjecture activation.
/// Absent `values` is disbelief.
#[derive(Clone)]
pub struct Belief {
    pub source: String,
    pub conjecture_name: String,
    pub about: String,
    pub goal: Option<GoalPredicate>,
    pub values: Option<Values>,
}

impl Belief {
    pub fn subject(&self) -> Subject {
        Subject::new(self.conjecture_name.clone(), self.about.clone())
    }

    /// A belief satisfies its conjecture iff values are present and, when a
    /// goal is set, the goal holds over them.
    pub fn satisfies_conjecture(&self) -> bool {
        match &self.values {
            None => false,
            Some(values) => self.goal.as_ref().map_or(true, |goal| goal(values)),
        }
    }
}

impl fmt::Debug for Belief {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Belief")
            .field("source", &self.source)
            .field("conjecture_name", &self.conjecture_name)
            .field("about", &self.about)
            .field("goal", &self.goal.as_ref().map(|_| "<predicate>"))
            .field("values", &self.values)
            .finish()
    }
}

/// A generative model's downward claim about what will be perceived.
#[derive(Clone)]
pub struct Prediction {
    /// Name of the predicting generative model.
    pub source: String,
    pub conjecture_name: String,
    pub about: String,
    pub goal: Option<GoalPredicate>,
    pub expected_values: Expectations,
    pub carry_overs: u32,
}

impl Prediction {
    pub fn new(conjecture_name: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            source: String::new(),
            conjecture_name: conjecture_name.into(),
            about: about.into(),
            goal: None,
            expected_values: Expectations::new(),
            carry_overs: 0,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_goal(mut self, goal: GoalPredicate) -> Self {
        self.goal = Some(goal);
        self
    }

    pub fn with_expectation(
        mut self,
        param: impl Into<String>,
        expectation: crate::value::Expectation,
    ) -> Self {
        self.expected_values.insert(param.into(), expectation);
        self
    }

    pub fn subject(&self) -> Subject {
        Subject::new(self.conjecture_name.clone(), self.about.clone())
    }

    /// Normalized deviation of belief values from this prediction, in `[0, 1]`.
    pub fn error_size(&self, values: &Values) -> f64 {
        deviation(&self.expected_values, values)
    }
}

impl fmt::Debug for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prediction")
            .field("source", &self.source)
            .field("conjecture_name", &self.conjecture_name)
            .field("about", &self.about)
            .field("goal", &self.goal.as_ref().map(|_| "<predicate>"))
            .field("expected_values", &self.expected_values)
            .field("carry_overs", &self.carry_overs)
            .finish()
    }
}

/// An upward report that perception deviated from a prediction.
/// `size` of 1.0 covers "no belief where one was predicted".
#[derive(Debug, Clone)]
pub struct PredictionError {
    pub prediction: Prediction,
    pub belief: Belief,
    pub size: f64,
    pub carry_overs: u32,
}

impl PredictionError {
    /// Subject of an error is that of its prediction.
    pub fn subject(&self) -> Subject {
        self.prediction.subject()
    }

    /// The reporting source (a sub-GM or detector name).
    pub fn source(&self) -> &str {
        &self.belief.source
    }
}

/// Prediction or prediction error, under one subject identity.
#[derive(Debug, Clone)]
pub enum Perception {
    Prediction(Prediction),
    Error(PredictionError),
}

impl Perception {
    pub fn subject(&self) -> Subject {
        match self {
            Perception::Prediction(p) => p.subject(),
            Perception::Error(e) => e.subject(),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Perception::Prediction(p) => &p.source,
            Perception::Error(e) => e.source(),
        }
    }

    pub fn carry_overs(&self) -> u32 {
        match self {
            Perception::Prediction(p) => p.carry_overs,
            Perception::Error(e) => e.carry_overs,
        }
    }

    pub fn carry_overs_mut(&mut self) -> &mut u32 {
        match self {
            Perception::Prediction(p) => &mut p.carry_overs,
            Perception::Error(e) => &mut e.carry_overs,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Perception::Error(_))
    }

    /// How much this perception counts when perceptions compete over a
    /// subject: a prediction at full gain, an error at the precision weight
    /// of its reporting source (unseen sources weigh 1.0).
    pub fn gain(&self, precision_weights: &HashMap<String, f64>) -> f64 {
        match self {
            Perception::Prediction(_) => 1.0,
            Perception::Error(e) => *precision_weights.get(e.source()).unwrap_or(&1.0),
        }
    }
}
