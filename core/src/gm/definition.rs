//! Static description of a generative model: its conjectures, their
//! activators/predictors/valuators, contradictions, priors and intentions.
//!
//! Definitions are authored per agent profile and validated before a GM is
//! spawned; a malformed definition is fatal (spec-level misconfiguration,
//! not a runtime condition).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::gm::activation::{mutually_exclusive, ConjectureActivation};
use crate::gm::coa::Intention;
use crate::perception::{GoalPredicate, Prediction};
use crate::round::Round;
use crate::value::Values;
use crate::{CortexError, Result};

/// Derives activations from round history; `prediction_about` is set when a
/// super-GM prediction triggered the derivation.
pub type Activator =
    Arc<dyn Fn(&Conjecture, &[Round], Option<&str>) -> Vec<ConjectureActivation> + Send + Sync>;

/// Produces a downward prediction for an activation, or abstains.
pub type Predictor = Arc<dyn Fn(&ConjectureActivation, &[Round]) -> Option<Prediction> + Send + Sync>;

/// Produces belief values for an activation, or abstains (disbelief).
pub type Valuator = Arc<dyn Fn(&ConjectureActivation, &[Round]) -> Option<Values> + Send + Sync>;

/// A named hypothesis a GM may come to believe.
#[derive(Clone)]
pub struct Conjecture {
    pub name: String,
    pub activator: Activator,
    pub predictors: Vec<Predictor>,
    pub valuator: Valuator,
    /// Ordered intention names available to validate this conjecture.
    pub intention_domain: Vec<String>,
}

impl Conjecture {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            activator: self_activator(),
            predictors: Vec::new(),
            valuator: Arc::new(|_: &ConjectureActivation, _: &[Round]| None),
            intention_domain: Vec::new(),
        }
    }

    pub fn with_activator(mut self, activator: Activator) -> Self {
        self.activator = activator;
        self
    }

    pub fn with_predictor(mut self, predictor: Predictor) -> Self {
        self.predictors.push(predictor);
        self
    }

    pub fn with_valuator(mut self, valuator: Valuator) -> Self {
        self.valuator = valuator;
        self
    }

    pub fn with_intention_domain(mut self, names: &[&str]) -> Self {
        self.intention_domain = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

impl fmt::Debug for Conjecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conjecture")
            .field("name", &self.name)
            .field("predictors", &self.predictors.len())
            .field("intention_domain", &self.intention_domain)
            .finish()
    }
}

/// Activator binding the conjecture to the predicted subject, or to "self"
/// absent a prediction.
pub fn self_activator() -> Activator {
    Arc::new(
        |conjecture: &Conjecture, _rounds: &[Round], prediction_about: Option<&str>| {
            let about = prediction_about.unwrap_or("self");
            vec![ConjectureActivation::new(conjecture.name.clone(), about)]
        },
    )
}

/// Like [`self_activator`], with a goal predicate attached: the activation
/// persists across rounds until the goal holds over belief values.
pub fn goal_activator(goal: GoalPredicate) -> Activator {
    Arc::new(
        move |conjecture: &Conjecture, _rounds: &[Round], prediction_about: Option<&str>| {
            let about = prediction_about.unwrap_or("self");
            vec![ConjectureActivation::new(conjecture.name.clone(), about).with_goal(goal.clone())]
        },
    )
}

/// Static description of one generative model.
#[derive(Clone)]
pub struct GmDefinition {
    pub name: String,
    pub conjectures: Vec<Conjecture>,
    /// Each set lists pairwise mutually exclusive conjecture names.
    pub contradictions: Vec<HashSet<String>>,
    /// Initial belief values per conjecture, used until a valuator speaks.
    pub priors: BTreeMap<String, Values>,
    pub intentions: HashMap<String, Intention>,
    pub max_round_duration: Duration,
    /// Hyper-prior GMs activate all their conjectures each round, absent
    /// external predictions.
    pub hyper_prior: bool,
}

impl GmDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conjectures: Vec::new(),
            contradictions: Vec::new(),
            priors: BTreeMap::new(),
            intentions: HashMap::new(),
            max_round_duration: Duration::from_millis(500),
            hyper_prior: false,
        }
    }

    pub fn with_conjecture(mut self, conjecture: Conjecture) -> Self {
        self.conjectures.push(conjecture);
        self
    }

    pub fn with_contradiction(mut self, names: &[&str]) -> Self {
        self.contradictions
            .push(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_prior(mut self, conjecture_name: impl Into<String>, values: Values) -> Self {
        self.priors.insert(conjecture_name.into(), values);
        self
    }

    pub fn with_intention(mut self, intention: Intention) -> Self {
        self.intentions.insert(intention.name.clone(), intention);
        self
    }

    pub fn with_max_round_duration(mut self, duration: Duration) -> Self {
        self.max_round_duration = duration;
        self
    }

    pub fn hyper_prior(mut self) -> Self {
        self.hyper_prior = true;
        self
    }

    pub fn conjecture(&self, name: &str) -> Option<&Conjecture> {
        self.conjectures.iter().find(|c| c.name == name)
    }

    pub fn excluded_by_any(&self, conjecture_name: &str, active: &[String]) -> bool {
        active
            .iter()
            .any(|a| mutually_exclusive(&self.contradictions, a, conjecture_name))
    }

    /// Fatal misconfiguration checks, run before a GM is spawned.
    pub fn validate(&self) -> Result<()> {
        if self.max_round_duration.is_zero() {
            return Err(CortexError::DefinitionError(format!(
                "{}: max_round_duration must be nonzero",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for conjecture in &self.conjectures {
            if !seen.insert(conjecture.name.as_str()) {
                return Err(CortexError::DefinitionError(format!(
                    "{}: duplicate conjecture {}",
                    self.name, conjecture.name
                )));
            }
            for intention_name in &conjecture.intention_domain {
                if !self.intentions.contains_key(intention_name) {
                    return Err(CortexError::DefinitionError(format!(
                        "{}: conjecture {} references undefined intention {}",
                        self.name, conjecture.name, intention_name
                    )));
                }
            }
        }

        for set in &self.contradictions {
            if set.len() < 2 {
                return Err(CortexError::DefinitionError(format!(
                    "{}: contradiction set needs at least two conjectures",
                    self.name
                )));
            }
            for name in set {
                if seen.contains(name.as_str()) {
                    continue;
                }
                return Err(CortexError::DefinitionError(format!(
                    "{}: contradiction references undefined conjecture {}",
                    self.name, name
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for GmDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GmDefinition")
            .field("name", &self.name)
            .field("conjectures", &self.conjectures)
            .field("contradictions", &self.contradictions)
            .field("intentions", &self.intentions.keys().collect::<Vec<_>>())
            .field("max_round_duration", &self.max_round_duration)
            .field("hyper_prior", &self.hyper_prior)
            .finish()
    }
}
