//! Lifecycle management for the generative models of one runtime.
//!
//! Spawning a GM wires its bus subscriptions into a single mailbox through
//! forwarder tasks, then runs the actor under a supervisor: a fatal error
//! rebuilds the GM from its persisted learning snapshot with a fresh round
//! history and re-enters the event loop.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::RuntimeConfig;
use crate::event::{topics, Event, EventBus};
use crate::gm::instance::{GenerativeModel, GmLinks};
use crate::gm::GmDefinition;
use crate::memory::MemoryStore;
use crate::telemetry::MetricsCollector;
use crate::{CortexError, Result};

/// Restart budget for a failing GM before the runtime gives up on it.
const MAX_RESTARTS: u32 = 3;

const MAILBOX_CAP: usize = 1024;

/// Subscription handle for a GM
struct GmSubscription {
    subscription_id: String,
    forwarder_handle: JoinHandle<()>,
}

/// Per-GM bookkeeping tracked by the runtime
struct GmHandle {
    task_handle: JoinHandle<()>,
    subscriptions: Vec<GmSubscription>,
}

/// Generative-model runtime manager
pub struct GmRuntime {
    gms: Arc<DashMap<String, GmHandle>>,
    event_bus: Arc<EventBus>,
    memory: Arc<dyn MemoryStore>,
    config: Arc<RuntimeConfig>,
    metrics: Arc<MetricsCollector>,
}

impl GmRuntime {
    pub fn new(
        event_bus: Arc<EventBus>,
        memory: Arc<dyn MemoryStore>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            gms: Arc::new(DashMap::new()),
            event_bus,
            memory,
            config,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    pub async fn start(&self) -> Result<()> {
        info!("GM runtime started");
        Ok(())
    }

    /// Validate a definition, subscribe its topic set, and run the GM actor
    /// under supervision.
    #[tracing::instrument(skip(self, def, links), fields(gm = %def.name))]
    pub async fn spawn_gm(&self, def: GmDefinition, links: GmLinks) -> Result<String> {
        def.validate()?;
        let name = def.name.clone();
        if self.gms.contains_key(&name) {
            return Err(CortexError::GmError(format!("{} is already running", name)));
        }

        // One mailbox per GM; every subscription forwards into it, which
        // keeps event handling strictly sequential.
        let (event_tx, mut event_rx) = mpsc::channel::<Event>(MAILBOX_CAP);

        let mut subscription_topics = vec![
            topics::gm(&name),
            topics::SYSTEM.to_string(),
            topics::error(&name),
        ];
        for conjecture in &def.conjectures {
            subscription_topics.push(topics::prediction(&conjecture.name));
        }
        for sub_gm in &links.sub_gms {
            subscription_topics.push(topics::completed(sub_gm));
        }

        let mut subscriptions = Vec::with_capacity(subscription_topics.len());
        for topic in subscription_topics {
            let (subscription_id, mut rx) = self.event_bus.subscribe(topic).await?;
            let tx = event_tx.clone();
            let forwarder_handle = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
            subscriptions.push(GmSubscription {
                subscription_id,
                forwarder_handle,
            });
        }

        let bus = Arc::clone(&self.event_bus);
        let memory = Arc::clone(&self.memory);
        let config = Arc::clone(&self.config);
        let metrics = Arc::clone(&self.metrics);
        let task_name = name.clone();
        let task_handle = tokio::spawn(async move {
            let mut restarts = 0u32;
            loop {
                let gm = GenerativeModel::new(
                    def.clone(),
                    links.clone(),
                    Arc::clone(&bus),
                    Arc::clone(&memory),
                    Arc::clone(&config),
                    Arc::clone(&metrics),
                );
                match gm.run(&mut event_rx).await {
                    Ok(()) => break,
                    Err(e) => {
                        restarts += 1;
                        if restarts > MAX_RESTARTS {
                            error!(
                                "Generative model {} failed {} times; giving up: {}",
                                task_name, restarts, e
                            );
                            break;
                        }
                        warn!(
                            "Generative model {} failed: {}; restarting from persisted state",
                            task_name, e
                        );
                    }
                }
            }
        });

        self.gms.insert(
            name.clone(),
            GmHandle {
                task_handle,
                subscriptions,
            },
        );

        info!("Spawned generative model {}", name);
        Ok(name)
    }

    /// Broadcast shutdown, wait for the actors to persist and exit, then
    /// tear down subscriptions.
    pub async fn shutdown(&self) -> Result<()> {
        info!("GM runtime shutting down");
        self.event_bus
            .publish(topics::SYSTEM, Event::Shutdown)
            .await?;

        let names: Vec<String> = self.gms.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, handle)) = self.gms.remove(&name) {
                if tokio::time::timeout(std::time::Duration::from_secs(2), handle.task_handle)
                    .await
                    .is_err()
                {
                    warn!("Generative model {} did not stop in time", name);
                }
                for sub in handle.subscriptions {
                    let _ = self.event_bus.unsubscribe(&sub.subscription_id).await;
                    sub.forwarder_handle.abort();
                }
            }
        }
        Ok(())
    }
}
