//! Conjecture activations and their rationalization against contradictions.

use std::collections::HashSet;
use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::perception::{GoalPredicate, Subject};

/// A conjecture bound to a subject, optionally with a goal predicate.
/// Goal activations persist across rounds until achieved or excluded;
/// opinion activations are re-derived each round.
#[derive(Clone)]
pub struct ConjectureActivation {
    pub conjecture_name: String,
    pub about: String,
    pub goal: Option<GoalPredicate>,
}

impl ConjectureActivation {
    pub fn new(conjecture_name: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            conjecture_name: conjecture_name.into(),
            about: about.into(),
            goal: None,
        }
    }

    pub fn with_goal(mut self, goal: GoalPredicate) -> Self {
        self.goal = Some(goal);
        self
    }

    pub fn subject(&self) -> Subject {
        Subject::new(self.conjecture_name.clone(), self.about.clone())
    }

    pub fn is_goal(&self) -> bool {
        self.goal.is_some()
    }
}

impl fmt::Debug for ConjectureActivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConjectureActivation")
            .field("conjecture_name", &self.conjecture_name)
            .field("about", &self.about)
            .field("goal", &self.goal.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

/// Whether two conjecture names appear together in any contradiction set.
pub fn mutually_exclusive(contradictions: &[HashSet<String>], a: &str, b: &str) -> bool {
    a != b
        && contradictions
            .iter()
            .any(|set| set.contains(a) && set.contains(b))
}

/// Resolve a candidate set into a consistent one: shuffle for fairness, give
/// goals priority over opinions, then greedily drop any candidate mutually
/// exclusive with an already-kept one (or duplicating a kept subject).
pub fn rationalize(
    mut candidates: Vec<ConjectureActivation>,
    contradictions: &[HashSet<String>],
    rng: &mut impl Rng,
) -> Vec<ConjectureActivation> {
    candidates.shuffle(rng);
    // Stable sort: goals first, so they win exclusion contests.
    candidates.sort_by_key(|c| !c.is_goal());

    let mut kept: Vec<ConjectureActivation> = Vec::new();
    for candidate in candidates {
        if kept.iter().any(|k| k.subject() == candidate.subject()) {
            continue;
        }
        if kept
            .iter()
            .any(|k| mutually_exclusive(contradictions, &k.conjecture_name, &candidate.conjecture_name))
        {
            continue;
        }
        kept.push(candidate);
    }
    kept
}
