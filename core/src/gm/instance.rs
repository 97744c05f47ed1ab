//! The generative-model round engine.
//!
//! One long-lived actor per GM, owning exclusive mutable access to its own
//! state. Events arrive through a mailbox and are handled strictly one at a
//! time; each handler runs the state transition to completion before the
//! actor suspends again. All cross-GM traffic goes through the event bus.
//!
//! A round moves through initialization (carry over, re-activate, predict),
//! running (absorb predictions, errors and sub-GM reports), and completion
//! (weigh precision, settle beliefs, raise errors upward, learn efficacies,
//! choose and execute courses of action), then the next round begins.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::event::{topics, Event, EventBus};
use crate::gm::activation::{self, ConjectureActivation};
use crate::gm::coa::{self, CourseOfAction, Efficacy, ExecutedCoa, Intent};
use crate::gm::definition::GmDefinition;
use crate::gm::precision;
use crate::memory::MemoryStore;
use crate::perception::{Belief, Perception, Prediction, PredictionError, Subject};
use crate::round::{self, Round};
use crate::telemetry::MetricsCollector;
use crate::{CortexError, Result};

/// A GM's position in the cognition graph, held by name only; neighbours are
/// reached through the bus, never owned.
#[derive(Debug, Clone, Default)]
pub struct GmLinks {
    pub super_gms: Vec<String>,
    pub sub_gms: Vec<String>,
}

impl GmLinks {
    pub fn with_subs(sub_gms: &[&str]) -> Self {
        Self {
            super_gms: Vec::new(),
            sub_gms: sub_gms.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_supers(super_gms: &[&str]) -> Self {
        Self {
            super_gms: super_gms.iter().map(|s| s.to_string()).collect(),
            sub_gms: Vec::new(),
        }
    }
}

const LEARNING_KEY: &str = "learning";

/// What survives a GM across restarts and shutdowns.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LearningSnapshot {
    efficacies: Vec<Efficacy>,
    coa_indices: Vec<(Subject, u64)>,
}

/// One generative model: an event-driven actor cycling through rounds.
pub struct GenerativeModel {
    def: GmDefinition,
    links: GmLinks,
    bus: Arc<EventBus>,
    memory: Arc<dyn MemoryStore>,
    config: Arc<RuntimeConfig>,
    metrics: Arc<MetricsCollector>,

    /// Newest first; index 0 is the round in progress.
    rounds: Vec<Round>,
    activations: Vec<ConjectureActivation>,
    precision_weights: HashMap<String, f64>,
    efficacies: HashMap<Subject, Vec<Efficacy>>,
    coa_indices: HashMap<Subject, u64>,

    next_round_id: u64,
    timer_started: bool,
    round_started_at: Instant,
    rng: SmallRng,
}

impl GenerativeModel {
    pub fn new(
        def: GmDefinition,
        links: GmLinks,
        bus: Arc<EventBus>,
        memory: Arc<dyn MemoryStore>,
        config: Arc<RuntimeConfig>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(base) => {
                let mut hasher = DefaultHasher::new();
                def.name.hash(&mut hasher);
                SmallRng::seed_from_u64(base ^ hasher.finish())
            }
            None => SmallRng::from_entropy(),
        };

        Self {
            def,
            links,
            bus,
            memory,
            config,
            metrics,
            rounds: Vec::new(),
            activations: Vec::new(),
            precision_weights: HashMap::new(),
            efficacies: HashMap::new(),
            coa_indices: HashMap::new(),
            next_round_id: 1,
            timer_started: false,
            round_started_at: Instant::now(),
            rng,
        }
    }

    /// Run the actor until shutdown or mailbox closure.
    #[tracing::instrument(skip(self, events), fields(gm = %self.def.name))]
    pub async fn run(mut self, events: &mut mpsc::Receiver<Event>) -> Result<()> {
        info!("Generative model {} starting", self.def.name);
        self.restore_learning().await?;
        self.begin_round().await?;

        while let Some(event) = events.recv().await {
            match event {
                Event::Shutdown => {
                    self.persist_learning().await?;
                    info!("Generative model {} stopped", self.def.name);
                    return Ok(());
                }
                other => self.handle_event(other).await?,
            }
        }

        // Mailbox closed from outside; persist what was learned.
        self.persist_learning().await?;
        info!("Generative model {} mailbox closed", self.def.name);
        Ok(())
    }

    async fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Prediction(prediction) => self.on_prediction(prediction).await,
            Event::PredictionError(error) => self.on_prediction_error(error).await,
            Event::RoundCompleted { gm } => self.on_sub_reported(gm).await,
            Event::RoundTimedOut { gm, round_id } => self.on_round_timed_out(gm, round_id).await,
            // Intents are actuator traffic; a GM can see them only through
            // misrouted subscriptions.
            Event::Intended(_) | Event::Shutdown => Ok(()),
        }
    }

    // ----- running phase -----------------------------------------------

    /// A super-GM predicted one of our conjectures: remember the prediction,
    /// derive activations for its subject, and re-predict.
    async fn on_prediction(&mut self, prediction: Prediction) -> Result<()> {
        let from_super = self.links.super_gms.iter().any(|s| *s == prediction.source);
        if !from_super || self.def.conjecture(&prediction.conjecture_name).is_none() {
            debug!(
                "Prediction of {} from {} not addressed to {}; ignoring",
                prediction.conjecture_name, prediction.source, self.def.name
            );
            return Ok(());
        }

        self.rounds[0].received_predictions.push(prediction.clone());
        self.start_round_timer();

        let Some(conjecture) = self.def.conjecture(&prediction.conjecture_name).cloned() else {
            return Ok(());
        };
        let mut derived =
            (conjecture.activator)(&conjecture, &self.rounds, Some(prediction.about.as_str()));
        for derived_activation in &mut derived {
            // Goal pressure propagates down unless the activator overrides.
            if derived_activation.goal.is_none() {
                derived_activation.goal = prediction.goal.clone();
            }
        }

        let existing: HashSet<Subject> = self.activations.iter().map(|a| a.subject()).collect();
        let mut candidates = self.activations.clone();
        candidates.extend(
            derived
                .into_iter()
                .filter(|a| !existing.contains(&a.subject())),
        );
        self.activations =
            activation::rationalize(candidates, &self.def.contradictions, &mut self.rng);
        self.prune_for_activations();
        self.generate_predictions().await
    }

    /// A sub-GM or detector contradicted one of our predictions: the error
    /// supersedes the prediction on its subject. Competing errors from other
    /// sources stay in place until completion weighs them.
    async fn on_prediction_error(&mut self, error: PredictionError) -> Result<()> {
        if error.prediction.source != self.def.name {
            debug!(
                "Prediction error addressed to {} reached {}; ignoring",
                error.prediction.source, self.def.name
            );
            return Ok(());
        }

        let subject = error.subject();
        let source = error.source().to_string();
        let round = &mut self.rounds[0];
        round
            .perceptions
            .retain(|p| !(matches!(p, Perception::Prediction(_)) && p.subject() == subject));
        match round
            .perceptions
            .iter()
            .position(|p| p.is_error() && p.subject() == subject && p.source() == source)
        {
            // Latest report from one source wins.
            Some(i) => round.perceptions[i] = Perception::Error(error),
            None => round.perceptions.push(Perception::Error(error)),
        }
        Ok(())
    }

    async fn on_sub_reported(&mut self, sub_gm: String) -> Result<()> {
        if !self.links.sub_gms.contains(&sub_gm) {
            debug!(
                "Round completion of {} is not awaited by {}; ignoring",
                sub_gm, self.def.name
            );
            return Ok(());
        }
        self.rounds[0].reported_in.insert(sub_gm);
        if self.round_ready() {
            self.complete_round().await?;
        }
        Ok(())
    }

    async fn on_round_timed_out(&mut self, gm: String, round_id: u64) -> Result<()> {
        if gm != self.def.name {
            return Ok(());
        }
        if self.rounds[0].id != round_id {
            debug!(
                "Timeout for round {} of {} is obsolete (current {}); discarding",
                round_id, self.def.name, self.rounds[0].id
            );
            return Ok(());
        }
        self.complete_round().await
    }

    /// All sub-GMs have either reported or are fully ignored. Vacuously true
    /// without sub-GMs.
    fn round_ready(&self) -> bool {
        self.links
            .sub_gms
            .iter()
            .all(|sub| self.rounds[0].reported_in.contains(sub) || self.precision_weight(sub) == 0.0)
    }

    fn precision_weight(&self, source: &str) -> f64 {
        *self.precision_weights.get(source).unwrap_or(&1.0)
    }

    fn start_round_timer(&mut self) {
        if self.timer_started {
            return;
        }
        self.timer_started = true;
        let event = Event::RoundTimedOut {
            gm: self.def.name.clone(),
            round_id: self.rounds[0].id,
        };
        self.bus
            .notify_after(topics::gm(&self.def.name), event, self.def.max_round_duration);
    }

    // ----- initialization phase ----------------------------------------

    async fn begin_round(&mut self) -> Result<()> {
        let id = self.next_round_id;
        self.next_round_id += 1;
        let index = self.rounds.first().map(|r| r.index + 1).unwrap_or(0);
        self.rounds.insert(0, Round::new(id, index));
        self.timer_started = false;
        self.round_started_at = Instant::now();
        debug!("{} begins round {} (id {})", self.def.name, index, id);
        self.initialize_round().await
    }

    async fn initialize_round(&mut self) -> Result<()> {
        self.carry_over();
        self.reset_activations();
        self.prune_for_activations();
        self.generate_predictions().await?;

        if self.round_ready() {
            // Completion goes through the mailbox so queued events are never
            // starved; a stale id is discarded like an obsolete timeout.
            let event = Event::RoundTimedOut {
                gm: self.def.name.clone(),
                round_id: self.rounds[0].id,
            };
            self.bus
                .notify_after(topics::gm(&self.def.name), event, Duration::ZERO);
        }
        Ok(())
    }

    /// Carry perceptions (aging them out past the carry-over cap) and
    /// beliefs over from the previous round.
    fn carry_over(&mut self) {
        if self.rounds.len() < 2 {
            return;
        }
        let max = self.config.max_carry_overs;
        let (current, rest) = self.rounds.split_at_mut(1);
        let previous = &rest[0];

        let mut carried = previous.perceptions.clone();
        for perception in &mut carried {
            *perception.carry_overs_mut() += 1;
        }
        carried.retain(|p| p.carry_overs() <= max);
        current[0].perceptions = carried;

        // Beliefs carry verbatim; completion overwrites them.
        current[0].beliefs = previous.beliefs.clone();
    }

    /// Keep unachieved goal activations; hyper-priors additionally offer all
    /// their conjectures as fresh candidates.
    fn reset_activations(&mut self) {
        let beliefs = self.rounds[0].beliefs.clone();
        let mut candidates: Vec<ConjectureActivation> = Vec::new();
        for act in std::mem::take(&mut self.activations) {
            if act.is_goal() && !goal_achieved(&act, &beliefs) {
                candidates.push(act);
            }
        }

        if self.def.hyper_prior {
            for conjecture in &self.def.conjectures {
                for act in (conjecture.activator)(conjecture, &self.rounds, None) {
                    if candidates.iter().any(|c| c.subject() == act.subject()) {
                        continue;
                    }
                    candidates.push(act);
                }
            }
        }

        self.activations =
            activation::rationalize(candidates, &self.def.contradictions, &mut self.rng);
    }

    /// Drop perceptions and beliefs contradicting any current activation.
    fn prune_for_activations(&mut self) {
        let active: Vec<String> = self
            .activations
            .iter()
            .map(|a| a.conjecture_name.clone())
            .collect();
        let contradictions = &self.def.contradictions;
        let excluded = |name: &str| {
            active
                .iter()
                .any(|a| activation::mutually_exclusive(contradictions, a, name))
        };

        let round = &mut self.rounds[0];
        round
            .perceptions
            .retain(|p| !excluded(&p.subject().conjecture_name));
        round.beliefs.retain(|b| !excluded(&b.conjecture_name));
    }

    /// Run every activation's predictors, record and publish what they
    /// produce, and arm the round timer if anything was predicted.
    async fn generate_predictions(&mut self) -> Result<()> {
        let mut produced: Vec<Prediction> = Vec::new();
        for act in self.activations.clone() {
            let Some(conjecture) = self.def.conjecture(&act.conjecture_name) else {
                return Err(CortexError::DefinitionError(format!(
                    "{}: activation references undefined conjecture {}",
                    self.def.name, act.conjecture_name
                )));
            };
            for predictor in &conjecture.predictors {
                if let Some(mut prediction) = predictor(&act, &self.rounds) {
                    prediction.source = self.def.name.clone();
                    produced.push(prediction);
                }
            }
        }

        if produced.is_empty() {
            return Ok(());
        }
        self.start_round_timer();
        for prediction in produced {
            let topic = topics::prediction(&prediction.conjecture_name);
            self.rounds[0].upsert_perception(Perception::Prediction(prediction.clone()));
            self.bus.publish(&topic, Event::Prediction(prediction)).await?;
        }
        Ok(())
    }

    // ----- completion phase --------------------------------------------

    /// Close the current round and open the next. Runs as one uninterrupted
    /// transition.
    #[tracing::instrument(skip(self), fields(gm = %self.def.name))]
    async fn complete_round(&mut self) -> Result<()> {
        // 1. Confirmation bias: sources whose errors were smallest gain
        // precision.
        self.update_precision_weights();

        // 2. Among perceptions competing over a subject, the highest gain
        // survives.
        let perceptions = std::mem::take(&mut self.rounds[0].perceptions);
        self.rounds[0].perceptions =
            precision::resolve_competing(perceptions, &self.precision_weights);

        // 3. One belief per active conjecture activation.
        self.determine_beliefs()?;

        // 4. Answer every received prediction that deviates.
        let raised = self.raise_prediction_errors();
        for error in raised {
            let topic = topics::error(&error.prediction.source);
            self.bus.publish(&topic, Event::PredictionError(error)).await?;
        }

        // 5. Learn how well past courses of action correlated with
        // satisfaction.
        self.update_efficacies();

        // 6.-7. Choose and execute a course of action per activation.
        let chosen = self.select_courses_of_action()?;
        let intent_count = self.execute_courses_of_action(chosen).await?;

        // 8. Mark completed and notify super-GMs.
        let full_report = self.round_ready();
        self.rounds[0].completed_on = Some(Utc::now());
        self.metrics
            .record_round(self.round_started_at.elapsed(), full_report)
            .await;
        if intent_count > 0 {
            self.metrics.record_intents(intent_count).await;
        }
        let name = self.def.name.clone();
        self.bus
            .publish(&topics::completed(&name), Event::RoundCompleted { gm: name.clone() })
            .await?;
        debug!("{} completed round {}", name, self.rounds[0].index);

        // 9. Forget obsolete rounds.
        let forget_after = chrono::Duration::from_std(self.config.forget_round_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        round::drop_obsolete(&mut self.rounds, Utc::now(), forget_after);

        // 10. Next round.
        self.begin_round().await
    }

    fn update_precision_weights(&mut self) {
        let mut by_subject: BTreeMap<Subject, Vec<(String, f64)>> = BTreeMap::new();
        for perception in &self.rounds[0].perceptions {
            if let Perception::Error(error) = perception {
                by_subject
                    .entry(error.subject())
                    .or_default()
                    .push((error.source().to_string(), error.size));
            }
        }
        if by_subject.is_empty() {
            return;
        }

        let mut confidences: HashMap<String, Vec<f64>> = HashMap::new();
        for competing in by_subject.into_values() {
            let sizes: Vec<f64> = competing.iter().map(|(_, size)| *size).collect();
            for ((source, _), confidence) in competing
                .iter()
                .zip(precision::relative_confidences(&sizes))
            {
                confidences.entry(source.clone()).or_default().push(confidence);
            }
        }
        precision::update_weights(&mut self.precision_weights, &confidences);
    }

    /// Invoke each activation's valuator; priors seed values only while no
    /// earlier belief exists for the subject.
    fn determine_beliefs(&mut self) -> Result<()> {
        let mut beliefs = Vec::with_capacity(self.activations.len());
        for act in &self.activations {
            let Some(conjecture) = self.def.conjecture(&act.conjecture_name) else {
                return Err(CortexError::DefinitionError(format!(
                    "{}: activation references undefined conjecture {}",
                    self.def.name, act.conjecture_name
                )));
            };
            let subject = act.subject();
            let mut values = (conjecture.valuator)(act, &self.rounds);
            if values.is_none() && self.rounds[0].belief_for(&subject).is_none() {
                values = self.def.priors.get(&act.conjecture_name).cloned();
            }
            beliefs.push(Belief {
                source: self.def.name.clone(),
                conjecture_name: act.conjecture_name.clone(),
                about: act.about.clone(),
                goal: act.goal.clone(),
                values,
            });
        }
        self.rounds[0].beliefs = beliefs;
        Ok(())
    }

    /// Compare each received prediction against the matching belief; deviations
    /// (including missing beliefs) become upward prediction errors.
    fn raise_prediction_errors(&self) -> Vec<PredictionError> {
        let round = &self.rounds[0];
        let mut raised = Vec::new();
        for prediction in &round.received_predictions {
            let (belief, size) = match round.belief_for(&prediction.subject()) {
                None => {
                    let disbelief = Belief {
                        source: self.def.name.clone(),
                        conjecture_name: prediction.conjecture_name.clone(),
                        about: prediction.about.clone(),
                        goal: None,
                        values: None,
                    };
                    (disbelief, 1.0)
                }
                Some(belief) => match &belief.values {
                    None => (belief.clone(), 1.0),
                    Some(values) => {
                        let size = prediction.error_size(values);
                        if size <= 0.0 {
                            continue;
                        }
                        (belief.clone(), size)
                    }
                },
            };
            raised.push(PredictionError {
                prediction: prediction.clone(),
                belief,
                size,
                carry_overs: 0,
            });
        }
        raised
    }

    /// Re-score every efficacy touching a freshly settled belief. History is
    /// partitioned by the satisfaction state recorded when each CoA ran; each
    /// execution counts for or against the shape depending on whether the
    /// belief satisfied the conjecture in the round that followed it, and
    /// recent executions weigh more than old ones.
    fn update_efficacies(&mut self) {
        let n = self.rounds.len();
        let max = (n as f64 + 1.0) / 2.0;
        let beliefs = self.rounds[0].beliefs.clone();

        for belief in beliefs {
            let subject = belief.subject();
            let Some(efficacies) = self.efficacies.get_mut(&subject) else {
                continue;
            };
            for efficacy in efficacies.iter_mut() {
                // (round index, did satisfaction follow) per execution.
                let mut hits: Vec<(usize, bool)> = Vec::new();
                for (i, round) in self.rounds.iter().enumerate().skip(1) {
                    let executed_here = round.courses_of_action.iter().any(|executed| {
                        executed.already_satisfied == efficacy.when_already_satisfied
                            && executed.coa.shape_matches(&subject, &efficacy.intention_names)
                    });
                    if executed_here {
                        let outcome = self.rounds[i - 1]
                            .belief_for(&subject)
                            .map_or(false, |b| b.satisfies_conjecture());
                        hits.push((i, outcome));
                    }
                }

                let normalized = if hits.is_empty() {
                    0.0
                } else {
                    let count = hits.len() as f64;
                    let contributions: f64 = hits
                        .iter()
                        .map(|&(i, outcome)| {
                            let closeness = (n - i) as f64 / count;
                            if outcome {
                                closeness
                            } else {
                                -closeness
                            }
                        })
                        .sum();
                    contributions / max
                };
                efficacy.degree = ((normalized + efficacy.degree) / 2.0).clamp(0.0, 1.0);
            }
        }
    }

    /// Pick one course of action per activation still worth acting on:
    /// unachieved goals and currently-believed opinions.
    fn select_courses_of_action(&mut self) -> Result<Vec<ExecutedCoa>> {
        let mut chosen = Vec::new();
        for act in self.activations.clone() {
            let Some(conjecture) = self.def.conjecture(&act.conjecture_name) else {
                continue;
            };
            if conjecture.intention_domain.is_empty() {
                continue;
            }
            let domain = conjecture.intention_domain.clone();
            let subject = act.subject();
            let satisfied = self.rounds[0]
                .belief_for(&subject)
                .map_or(false, |b| b.satisfies_conjecture());
            if act.is_goal() && satisfied {
                continue; // achieved; nothing left to validate
            }
            if !act.is_goal() && !satisfied {
                continue; // not believed; nothing to reinforce
            }

            let tried: Vec<Efficacy> = self
                .efficacies
                .get(&subject)
                .map(|all| {
                    all.iter()
                        .filter(|e| e.when_already_satisfied == satisfied)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            // One untried candidate is always on offer, rated at the average
            // of the tried ones.
            let candidate_index = *self.coa_indices.get(&subject).unwrap_or(&0);
            let fresh_names =
                coa::decode_candidate(candidate_index, &domain, &self.def.intentions);
            let hypothetical = if tried.is_empty() {
                1.0
            } else {
                tried.iter().map(|e| e.degree).sum::<f64>() / tried.len() as f64
            };
            let fresh = !tried.iter().any(|e| e.intention_names == fresh_names);

            let mut candidates: Vec<Vec<String>> =
                tried.iter().map(|e| e.intention_names.clone()).collect();
            let mut degrees: Vec<f64> = tried.iter().map(|e| e.degree).collect();
            if fresh {
                candidates.push(fresh_names);
                degrees.push(hypothetical);
            }

            let draw: f64 = self.rng.gen();
            let pick = coa::pick_weighted(&degrees, draw);
            let picked_names = candidates[pick].clone();
            let picked_fresh = fresh && pick + 1 == candidates.len();
            if picked_fresh {
                *self.coa_indices.entry(subject.clone()).or_insert(0) += 1;
                self.efficacies.entry(subject.clone()).or_default().push(Efficacy {
                    subject: subject.clone(),
                    intention_names: picked_names.clone(),
                    when_already_satisfied: satisfied,
                    degree: 0.0,
                });
            }

            debug!(
                "{} selected CoA {:?} for {} (satisfied: {})",
                self.def.name, picked_names, subject, satisfied
            );
            chosen.push(ExecutedCoa {
                coa: CourseOfAction {
                    activation: act,
                    intention_names: picked_names,
                },
                already_satisfied: satisfied,
            });
        }
        Ok(chosen)
    }

    /// Realize the chosen courses of action as intents. A non-repeatable
    /// intention is suppressed when a remembered intent already carries the
    /// same name and value.
    async fn execute_courses_of_action(&mut self, chosen: Vec<ExecutedCoa>) -> Result<u64> {
        let mut outgoing: Vec<Intent> = Vec::new();
        for executed in chosen {
            let subject = executed.coa.activation.subject();
            let belief_values = self.rounds[0]
                .belief_for(&subject)
                .and_then(|b| b.values.clone());

            for intention_name in &executed.coa.intention_names {
                let Some(intention) = self.def.intentions.get(intention_name) else {
                    return Err(CortexError::DefinitionError(format!(
                        "{}: CoA references undefined intention {}",
                        self.def.name, intention_name
                    )));
                };
                let Some(payload) = (intention.valuator)(belief_values.as_ref()) else {
                    continue; // abstaining valuator makes the intention a no-op
                };
                let intent = Intent {
                    about: intention.intent_name.clone(),
                    value: payload.value,
                    duration: payload.duration,
                    created_at: Utc::now(),
                };
                let remembered = self.rounds.iter().any(|r| {
                    r.intents
                        .iter()
                        .any(|i| i.about == intent.about && i.value == intent.value)
                });
                if !intention.repeatable && remembered {
                    debug!(
                        "{} suppresses repeated non-repeatable intent {}",
                        self.def.name, intent.about
                    );
                    continue;
                }
                self.rounds[0].intents.push(intent.clone());
                outgoing.push(intent);
            }
            self.rounds[0].courses_of_action.push(executed);
        }

        let count = outgoing.len() as u64;
        for intent in outgoing {
            if intent.is_stale(self.config.intent_stale_after) {
                warn!("{} publishing stale intent {}", self.def.name, intent.about);
            }
            self.bus.publish(topics::INTENT, Event::Intended(intent)).await?;
        }
        Ok(count)
    }

    // ----- persistence --------------------------------------------------

    async fn persist_learning(&self) -> Result<()> {
        let snapshot = LearningSnapshot {
            efficacies: self.efficacies.values().flatten().cloned().collect(),
            coa_indices: self
                .coa_indices
                .iter()
                .map(|(subject, index)| (subject.clone(), *index))
                .collect(),
        };
        let value = serde_json::to_value(&snapshot)?;
        self.memory.store(&self.def.name, LEARNING_KEY, value).await?;
        debug!("{} persisted learning state", self.def.name);
        Ok(())
    }

    async fn restore_learning(&mut self) -> Result<()> {
        let Some(value) = self.memory.recall(&self.def.name, LEARNING_KEY).await? else {
            return Ok(());
        };
        let snapshot: LearningSnapshot = serde_json::from_value(value).map_err(|e| {
            CortexError::MemoryError(format!(
                "{}: corrupt learning snapshot: {}",
                self.def.name, e
            ))
        })?;
        for efficacy in snapshot.efficacies {
            self.efficacies
                .entry(efficacy.subject.clone())
                .or_default()
                .push(efficacy);
        }
        self.coa_indices = snapshot.coa_indices.into_iter().collect();
        info!("{} restored learning state", self.def.name);
        Ok(())
    }
}

fn goal_achieved(activation: &ConjectureActivation, beliefs: &[Belief]) -> bool {
    let Some(goal) = &activation.goal else {
        return false;
    };
    let subject = activation.subject();
    beliefs
        .iter()
        .find(|b| b.subject() == subject)
        .and_then(|b| b.values.as_ref())
        .map_or(false, |values| goal(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gm::coa::{IntentValue, Intention};
    use crate::gm::definition::Conjecture;
    use crate::memory::InMemoryStore;
    use crate::value::{values, Expectation, Value, Values};

    async fn harness(def: GmDefinition, links: GmLinks) -> GenerativeModel {
        let bus = Arc::new(EventBus::new().await.unwrap());
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let config = Arc::new(RuntimeConfig::default().with_seed(7));
        let metrics = Arc::new(MetricsCollector::new());
        GenerativeModel::new(def, links, bus, memory, config, metrics)
    }

    fn ranging_error(source: &str, size: f64, dist: f64) -> PredictionError {
        PredictionError {
            prediction: Prediction::new("obstacle", "ahead")
                .with_source("scout")
                .with_expectation("dist", Expectation::InRange { min: 0.0, max: 5.0 }),
            belief: Belief {
                source: source.into(),
                conjecture_name: "obstacle".into(),
                about: "ahead".into(),
                goal: None,
                values: Some(values([("dist", Value::Number(dist))])),
            },
            size,
            carry_overs: 0,
        }
    }

    fn scout_def() -> GmDefinition {
        GmDefinition::new("scout")
            .hyper_prior()
            .with_conjecture(
                Conjecture::new("obstacle")
                    .with_activator(Arc::new(
                        |conjecture: &Conjecture, _: &[Round], _: Option<&str>| {
                            vec![ConjectureActivation::new(conjecture.name.clone(), "ahead")]
                        },
                    ))
                    .with_predictor(Arc::new(
                        |act: &ConjectureActivation, _rounds: &[Round]| {
                            Some(
                                Prediction::new("obstacle", act.about.clone()).with_expectation(
                                    "dist",
                                    Expectation::InRange { min: 0.0, max: 5.0 },
                                ),
                            )
                        },
                    )),
            )
            .with_max_round_duration(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn carried_perceptions_age_and_expire() {
        let mut gm = harness(GmDefinition::new("gm"), GmLinks::default()).await;
        gm.begin_round().await.unwrap();

        let mut young = Perception::Error(ranging_error("ranger", 0.5, 20.0));
        let mut old = Perception::Error(PredictionError {
            prediction: Prediction::new("obstacle", "behind").with_source("gm"),
            ..ranging_error("ranger", 0.5, 20.0)
        });
        *young.carry_overs_mut() = 0;
        *old.carry_overs_mut() = 3;
        gm.rounds[0].perceptions.push(young);
        gm.rounds[0].perceptions.push(old);

        gm.begin_round().await.unwrap();
        let carried = &gm.rounds[0].perceptions;
        assert_eq!(carried.len(), 1, "over-carried perception must drop");
        assert_eq!(carried[0].carry_overs(), 1);
        assert!(carried
            .iter()
            .all(|p| p.carry_overs() <= gm.config.max_carry_overs));
    }

    #[tokio::test]
    async fn error_supersedes_prediction_and_weight_updates() {
        let mut gm = harness(scout_def(), GmLinks::with_subs(&["ranger"])).await;
        gm.begin_round().await.unwrap();
        assert!(matches!(
            gm.rounds[0].perceptions.as_slice(),
            [Perception::Prediction(_)]
        ));
        let round_id = gm.rounds[0].id;

        gm.on_prediction_error(ranging_error("ranger", 0.8, 20.0))
            .await
            .unwrap();
        assert_eq!(gm.rounds[0].perceptions.len(), 1);
        assert!(gm.rounds[0].perceptions[0].is_error());

        gm.on_round_timed_out("scout".into(), round_id).await.unwrap();
        let completed = &gm.rounds[1];
        assert!(completed.is_completed());
        assert_eq!(completed.perceptions.len(), 1);
        assert!(completed.perceptions[0].is_error());
        // Sole reporter gets relative confidence 1.0, blended with 1.0.
        assert!((gm.precision_weight("ranger") - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn competing_errors_weigh_and_resolve_by_gain() {
        let mut gm = harness(scout_def(), GmLinks::with_subs(&["gm_a", "gm_b"])).await;
        gm.begin_round().await.unwrap();
        let round_id = gm.rounds[0].id;

        gm.on_prediction_error(ranging_error("gm_a", 0.2, 6.0))
            .await
            .unwrap();
        gm.on_prediction_error(ranging_error("gm_b", 0.8, 20.0))
            .await
            .unwrap();
        assert_eq!(gm.rounds[0].perceptions.len(), 2);

        gm.on_round_timed_out("scout".into(), round_id).await.unwrap();
        assert!((gm.precision_weight("gm_a") - 0.9).abs() < 1e-9);
        assert!((gm.precision_weight("gm_b") - 0.6).abs() < 1e-9);

        let completed = &gm.rounds[1];
        assert_eq!(completed.perceptions.len(), 1, "one perception per subject");
        assert_eq!(completed.perceptions[0].source(), "gm_a");
    }

    #[tokio::test]
    async fn goal_activation_persists_until_achieved() {
        let def = GmDefinition::new("child")
            .with_conjecture(
                Conjecture::new("fed").with_valuator(Arc::new(
                    |_act: &ConjectureActivation, rounds: &[Round]| {
                        Some(values([("full", Value::Bool(rounds.len() >= 3))]))
                    },
                )),
            )
            .with_max_round_duration(Duration::from_millis(200));
        let mut gm = harness(def, GmLinks::with_supers(&["parent"])).await;
        gm.begin_round().await.unwrap();

        let goal: crate::perception::GoalPredicate =
            Arc::new(|v: &Values| v.get("full") == Some(&Value::Bool(true)));
        let prediction = Prediction::new("fed", "self")
            .with_source("parent")
            .with_goal(goal)
            .with_expectation("full", Expectation::Equals(Value::Bool(true)));
        gm.on_prediction(prediction).await.unwrap();
        assert_eq!(gm.activations.len(), 1);
        assert!(gm.activations[0].is_goal(), "goal inherited from prediction");

        // Unachieved goal survives two completions.
        gm.complete_round().await.unwrap();
        assert_eq!(gm.activations.len(), 1);
        gm.complete_round().await.unwrap();
        assert_eq!(gm.activations.len(), 1);

        // Third completion believes full=true; reset drops the goal.
        gm.complete_round().await.unwrap();
        assert!(gm.activations.is_empty());
    }

    #[tokio::test]
    async fn obsolete_timeout_is_discarded() {
        let mut gm = harness(scout_def(), GmLinks::with_subs(&["lagger"])).await;
        gm.begin_round().await.unwrap();
        let stale_id = gm.rounds[0].id;

        gm.on_round_timed_out("scout".into(), stale_id).await.unwrap();
        let current_id = gm.rounds[0].id;
        let round_count = gm.rounds.len();

        // Delivering the stale timeout twice more changes nothing.
        gm.on_round_timed_out("scout".into(), stale_id).await.unwrap();
        gm.on_round_timed_out("scout".into(), stale_id).await.unwrap();
        assert_eq!(gm.rounds[0].id, current_id);
        assert_eq!(gm.rounds.len(), round_count);
    }

    #[tokio::test]
    async fn priors_seed_first_belief_only() {
        let def = GmDefinition::new("moody")
            .hyper_prior()
            .with_conjecture(Conjecture::new("mood"))
            .with_prior("mood", values([("level", Value::Number(5.0))]))
            .with_max_round_duration(Duration::from_millis(200));
        let mut gm = harness(def, GmLinks::default()).await;
        gm.begin_round().await.unwrap();

        gm.complete_round().await.unwrap();
        let first = &gm.rounds[1].beliefs[0];
        assert_eq!(first.values, Some(values([("level", Value::Number(5.0))])));

        // With a belief carried, the silent valuator means disbelief.
        gm.complete_round().await.unwrap();
        assert!(gm.rounds[1].beliefs[0].values.is_none());
    }

    #[tokio::test]
    async fn contradictory_activations_cannot_coexist() {
        let def = GmDefinition::new("torn")
            .hyper_prior()
            .with_conjecture(Conjecture::new("happy"))
            .with_conjecture(Conjecture::new("sad"))
            .with_contradiction(&["happy", "sad"])
            .with_max_round_duration(Duration::from_millis(200));
        let mut gm = harness(def, GmLinks::default()).await;
        gm.begin_round().await.unwrap();
        assert_eq!(gm.activations.len(), 1);
    }

    #[tokio::test]
    async fn non_repeatable_intents_suppress_across_rounds() {
        let def = GmDefinition::new("greeter")
            .hyper_prior()
            .with_conjecture(
                Conjecture::new("greeting")
                    .with_valuator(Arc::new(
                        |_: &ConjectureActivation, _: &[Round]| Some(Values::new()),
                    ))
                    .with_intention_domain(&["say", "beep"]),
            )
            .with_intention(
                Intention::new("say", "say")
                    .with_valuator(Arc::new(|_: Option<&Values>| {
                        Some(IntentValue::from(Value::Text("hello".into())))
                    }))
                    .non_repeatable(),
            )
            .with_intention(Intention::new("beep", "beep").with_valuator(Arc::new(
                |_: Option<&Values>| Some(IntentValue::from(Value::Bool(true))),
            )))
            .with_max_round_duration(Duration::from_millis(200));
        let mut gm = harness(def, GmLinks::default()).await;
        gm.begin_round().await.unwrap();
        gm.determine_beliefs().unwrap();

        let coa = ExecutedCoa {
            coa: CourseOfAction {
                activation: ConjectureActivation::new("greeting", "self"),
                intention_names: vec!["say".into(), "beep".into()],
            },
            already_satisfied: true,
        };

        let published = gm.execute_courses_of_action(vec![coa.clone()]).await.unwrap();
        assert_eq!(published, 2);
        assert_eq!(gm.rounds[0].intents.len(), 2);

        // Same CoA next round, same belief values: only the repeatable
        // intention fires again.
        gm.begin_round().await.unwrap();
        gm.determine_beliefs().unwrap();
        let published = gm.execute_courses_of_action(vec![coa]).await.unwrap();
        assert_eq!(published, 1);
        assert_eq!(gm.rounds[0].intents.len(), 1);
        assert_eq!(gm.rounds[0].intents[0].about, "beep");
    }

    #[tokio::test]
    async fn late_report_lands_in_next_round() {
        let mut gm = harness(scout_def(), GmLinks::with_subs(&["helper"])).await;
        gm.begin_round().await.unwrap();
        let first_id = gm.rounds[0].id;

        // Helper never reports; the timer closes the round.
        gm.on_round_timed_out("scout".into(), first_id).await.unwrap();
        assert!(gm.rounds[1].reported_in.is_empty());

        // The late report applies to the new round and completes it.
        gm.on_sub_reported("helper".into()).await.unwrap();
        assert!(gm.rounds[1].reported_in.contains("helper"));
        assert!(gm.rounds[1].is_completed());
    }

    #[tokio::test]
    async fn learning_state_round_trips_through_memory() {
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let bus = Arc::new(EventBus::new().await.unwrap());
        let config = Arc::new(RuntimeConfig::default().with_seed(7));
        let metrics = Arc::new(MetricsCollector::new());

        let mut gm = GenerativeModel::new(
            GmDefinition::new("gm"),
            GmLinks::default(),
            Arc::clone(&bus),
            Arc::clone(&memory),
            Arc::clone(&config),
            Arc::clone(&metrics),
        );
        let subject = Subject::new("reach_food", "self");
        gm.efficacies.insert(
            subject.clone(),
            vec![Efficacy {
                subject: subject.clone(),
                intention_names: vec!["forward".into()],
                when_already_satisfied: false,
                degree: 0.75,
            }],
        );
        gm.coa_indices.insert(subject.clone(), 2);
        gm.persist_learning().await.unwrap();

        let mut revived = GenerativeModel::new(
            GmDefinition::new("gm"),
            GmLinks::default(),
            bus,
            memory,
            config,
            metrics,
        );
        revived.restore_learning().await.unwrap();
        assert_eq!(revived.coa_indices[&subject], 2);
        let restored = &revived.efficacies[&subject][0];
        assert_eq!(restored.intention_names, vec!["forward".to_string()]);
        assert!((restored.degree - 0.75).abs() < 1e-9);
    }
}
