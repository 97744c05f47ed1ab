//! The episodic record of one perceive-believe-act cycle.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::gm::coa::{ExecutedCoa, Intent};
use crate::perception::{Belief, Perception, Prediction, Subject};

/// One round of a generative model. Rounds are immutable once completed
/// except through the engine's own transitions; the engine keeps them
/// newest-first, index 0 being the round in progress.
#[derive(Debug, Clone)]
pub struct Round {
    pub id: u64,
    pub index: u64,
    pub started_on: DateTime<Utc>,
    pub completed_on: Option<DateTime<Utc>>,
    /// Sub-GM names that reported completion into this round.
    pub reported_in: HashSet<String>,
    pub perceptions: Vec<Perception>,
    pub received_predictions: Vec<Prediction>,
    pub beliefs: Vec<Belief>,
    pub courses_of_action: Vec<ExecutedCoa>,
    pub intents: Vec<Intent>,
}

impl Round {
    pub fn new(id: u64, index: u64) -> Self {
        Self {
            id,
            index,
            started_on: Utc::now(),
            completed_on: None,
            reported_in: HashSet::new(),
            perceptions: Vec::new(),
            received_predictions: Vec::new(),
            beliefs: Vec::new(),
            courses_of_action: Vec::new(),
            intents: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_on.is_some()
    }

    pub fn belief_for(&self, subject: &Subject) -> Option<&Belief> {
        self.beliefs.iter().find(|b| &b.subject() == subject)
    }

    /// Insert a perception, replacing any prior perception with the same
    /// subject.
    pub fn upsert_perception(&mut self, perception: Perception) {
        let subject = perception.subject();
        match self.perceptions.iter().position(|p| p.subject() == subject) {
            Some(i) => self.perceptions[i] = perception,
            None => self.perceptions.push(perception),
        }
    }
}

/// Drop rounds obsolete at `now`: completed longer than `forget_after` ago.
/// Rounds are newest-first and older rounds have non-greater completion
/// times, so everything from the first obsolete round on is dropped.
pub fn drop_obsolete(rounds: &mut Vec<Round>, now: DateTime<Utc>, forget_after: Duration) {
    let cutoff = now - forget_after;
    if let Some(first_obsolete) = rounds
        .iter()
        .position(|r| r.completed_on.map_or(false, |t| t <= cutoff))
    {
        rounds.truncate(first_obsolete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::Prediction;
    use crate::value::Expectation;

    fn prediction(conjecture: &str, about: &str) -> Perception {
        Perception::Prediction(
            Prediction::new(conjecture, about)
                .with_source("gm")
                .with_expectation("dist", Expectation::InRange { min: 0.0, max: 5.0 }),
        )
    }

    #[test]
    fn upsert_replaces_same_subject() {
        let mut round = Round::new(1, 0);
        round.upsert_perception(prediction("obstacle", "ahead"));
        round.upsert_perception(prediction("obstacle", "behind"));
        assert_eq!(round.perceptions.len(), 2);

        round.upsert_perception(prediction("obstacle", "ahead"));
        assert_eq!(round.perceptions.len(), 2);
    }

    #[test]
    fn retention_truncates_from_first_obsolete() {
        let now = Utc::now();
        let mut rounds: Vec<Round> = (0..4)
            .map(|i| {
                let mut r = Round::new(4 - i, 3 - i);
                // Newest first: 10s, 30s, 90s, 120s old.
                let ages = [10, 30, 90, 120];
                r.completed_on = Some(now - Duration::seconds(ages[i as usize]));
                r
            })
            .collect();

        drop_obsolete(&mut rounds, now, Duration::seconds(60));
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].id, 4);
        assert_eq!(rounds[1].id, 3);
    }

    #[test]
    fn retention_keeps_open_round() {
        let now = Utc::now();
        let mut rounds = vec![Round::new(2, 1), Round::new(1, 0)];
        rounds[1].completed_on = Some(now - Duration::seconds(600));

        drop_obsolete(&mut rounds, now, Duration::seconds(60));
        assert_eq!(rounds.len(), 1);
        assert!(rounds[0].completed_on.is_none());
    }
}
