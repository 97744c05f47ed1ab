// Event bus implementation
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::gm::coa::Intent;
use crate::perception::{Prediction, PredictionError};
use crate::Result;

/// Topic families the core publishes and consumes.
pub mod topics {
    /// Intents bound for actuators.
    pub const INTENT: &str = "intent";
    /// System-wide control events (shutdown).
    pub const SYSTEM: &str = "system";

    /// Downward predictions, routed by the predicted conjecture.
    pub fn prediction(conjecture_name: &str) -> String {
        format!("prediction.{conjecture_name}")
    }

    /// Upward prediction errors, routed to the GM that predicted.
    pub fn error(gm_name: &str) -> String {
        format!("error.{gm_name}")
    }

    /// Round-completed notifications of one GM.
    pub fn completed(gm_name: &str) -> String {
        format!("completed.{gm_name}")
    }

    /// A GM's private topic, used for self-addressed round events.
    pub fn gm(gm_name: &str) -> String {
        format!("gm.{gm_name}")
    }
}

/// Every event the core exchanges over the bus.
#[derive(Debug, Clone)]
pub enum Event {
    Prediction(Prediction),
    PredictionError(PredictionError),
    RoundCompleted { gm: String },
    RoundTimedOut { gm: String, round_id: u64 },
    Intended(Intent),
    Shutdown,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Prediction(_) => "prediction",
            Event::PredictionError(_) => "prediction_error",
            Event::RoundCompleted { .. } => "round_completed",
            Event::RoundTimedOut { .. } => "round_timed_out",
            Event::Intended(_) => "intended",
            Event::Shutdown => "shutdown",
        }
    }

    /// The topic this event naturally publishes to.
    pub fn topic(&self) -> String {
        match self {
            Event::Prediction(p) => topics::prediction(&p.conjecture_name),
            Event::PredictionError(e) => topics::error(&e.prediction.source),
            Event::RoundCompleted { gm } => topics::completed(gm),
            Event::RoundTimedOut { gm, .. } => topics::gm(gm),
            Event::Intended(_) => topics::INTENT.to_string(),
            Event::Shutdown => topics::SYSTEM.to_string(),
        }
    }
}

/// Subscription information
struct Subscription {
    id: String,
    sender: mpsc::Sender<Event>,
}

/// Event bus statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusStats {
    pub total_published: u64,
    pub total_delivered: u64,
    pub active_subscriptions: usize,
    pub dropped_events: u64,
}

const SUBSCRIBER_QUEUE_CAP: usize = 1024;

/// Ordered broadcast of typed events to topic subscribers.
///
/// Delivery per subscriber is sequential over a bounded mpsc channel;
/// publishing awaits when a subscriber queue is full, so subscribers see
/// events in publication order with no reordering.
pub struct EventBus {
    // Topic -> Subscriber list
    subscriptions: Arc<DashMap<String, Vec<Subscription>>>,

    // Statistics per topic
    stats: Arc<DashMap<String, EventBusStats>>,

    next_subscription: AtomicU64,
}

impl EventBus {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            subscriptions: Arc::new(DashMap::new()),
            stats: Arc::new(DashMap::new()),
            next_subscription: AtomicU64::new(0),
        })
    }

    pub async fn start(&self) -> Result<()> {
        info!("Event bus started");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Event bus shutting down");
        self.subscriptions.clear();
        Ok(())
    }

    /// Publish an event to a topic, returning how many subscribers took it.
    #[tracing::instrument(skip(self, event), fields(topic = %topic, kind = %event.kind()))]
    pub async fn publish(&self, topic: &str, event: Event) -> Result<u64> {
        debug!("Publishing {} to topic {}", event.kind(), topic);

        self.update_stats(topic, |stats| stats.total_published += 1);

        // Snapshot live senders so delivery does not hold the map entry
        // across awaits.
        let senders: Vec<(String, mpsc::Sender<Event>)> = match self.subscriptions.get(topic) {
            Some(subs) => subs
                .iter()
                .map(|s| (s.id.clone(), s.sender.clone()))
                .collect(),
            None => Vec::new(),
        };

        if senders.is_empty() {
            debug!("No subscriptions for topic: {}", topic);
            return Ok(0);
        }

        let mut delivered = 0u64;
        let mut dropped = 0u64;
        for (id, sender) in senders {
            match sender.send(event.clone()).await {
                Ok(_) => delivered += 1,
                Err(_) => {
                    dropped += 1;
                    debug!("Subscriber {} gone; event dropped", id);
                }
            }
        }

        self.update_stats(topic, |stats| {
            stats.total_delivered += delivered;
            stats.dropped_events += dropped;
        });

        Ok(delivered)
    }

    /// Publish an event to a topic after a delay. Used by GMs to arm their
    /// round timers; the timer fires asynchronously and enqueues the event
    /// like any other.
    pub fn notify_after(self: &Arc<Self>, topic: String, event: Event, delay: Duration) {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = bus.publish(&topic, event).await {
                warn!("Deferred publish to {} failed: {}", topic, e);
            }
        });
    }

    /// Subscribe to a topic.
    #[tracing::instrument(skip(self), fields(topic = %topic, subscription_id))]
    pub async fn subscribe(&self, topic: String) -> Result<(String, mpsc::Receiver<Event>)> {
        let seq = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let subscription_id = format!("sub_{topic}_{seq}");

        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAP);
        self.subscriptions
            .entry(topic.clone())
            .or_default()
            .push(Subscription {
                id: subscription_id.clone(),
                sender: tx,
            });

        self.update_stats(&topic, |stats| stats.active_subscriptions += 1);

        debug!("Created subscription {} for topic {}", subscription_id, topic);
        Ok((subscription_id, rx))
    }

    /// Unsubscribe from a topic.
    #[tracing::instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        for mut entry in self.subscriptions.iter_mut() {
            let topic = entry.key().clone();
            let before = entry.value().len();
            entry.value_mut().retain(|sub| sub.id != subscription_id);
            if entry.value().len() != before {
                self.update_stats(&topic, |stats| {
                    stats.active_subscriptions = stats.active_subscriptions.saturating_sub(1);
                });
            }
        }
        debug!("Unsubscribed {}", subscription_id);
        Ok(())
    }

    /// Get stats
    pub fn get_stats(&self, topic: &str) -> Option<EventBusStats> {
        self.stats.get(topic).map(|s| s.clone())
    }

    fn update_stats<F>(&self, topic: &str, f: F)
    where
        F: FnOnce(&mut EventBusStats),
    {
        f(self.stats.entry(topic.to_string()).or_default().value_mut());
    }
}
