// Cortex Core Library
// Predictive-processing cognitive runtime for embodied agents

pub mod config;
pub mod event;
pub mod gm;
pub mod memory;
pub mod perception;
pub mod round;
pub mod telemetry;
pub mod value;

// Export core types
pub use config::RuntimeConfig;
pub use event::{topics, Event, EventBus, EventBusStats};
pub use gm::{
    goal_activator, self_activator, Conjecture, ConjectureActivation, CourseOfAction, Efficacy,
    GenerativeModel, GmDefinition, GmLinks, GmRuntime, Intent, IntentValue, Intention,
};
pub use memory::{InMemoryStore, MemoryStore};
pub use perception::{Belief, GoalPredicate, Perception, Prediction, PredictionError, Subject};
pub use round::Round;
pub use telemetry::{MetricsCollector, RoundMetrics};
pub use value::{values, Expectation, Value, Values};

// Error types
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CortexError {
    #[error("Event bus error: {0}")]
    EventBusError(String),

    #[error("Generative model error: {0}")]
    GmError(String),

    #[error("GM definition error: {0}")]
    DefinitionError(String),

    #[error("Memory error: {0}")]
    MemoryError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, CortexError>;

/// Core runtime: the event bus, the GM runtime, and the injected long-term
/// memory capability.
pub struct Cortex {
    pub event_bus: Arc<EventBus>,
    pub gm_runtime: GmRuntime,
    pub memory: Arc<dyn MemoryStore>,
}

impl Cortex {
    /// Runtime with the in-process memory store.
    pub async fn new(config: RuntimeConfig) -> Result<Self> {
        Self::with_memory(config, Arc::new(InMemoryStore::new())).await
    }

    /// Runtime with an injected long-term memory store.
    pub async fn with_memory(
        config: RuntimeConfig,
        memory: Arc<dyn MemoryStore>,
    ) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new().await?);
        let config = Arc::new(config);
        Ok(Self {
            gm_runtime: GmRuntime::new(Arc::clone(&event_bus), Arc::clone(&memory), config),
            event_bus,
            memory,
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("Starting Cortex...");
        self.event_bus.start().await?;
        self.gm_runtime.start().await?;
        tracing::info!("Cortex started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down Cortex...");
        self.gm_runtime.shutdown().await?;
        self.event_bus.shutdown().await?;
        tracing::info!("Cortex shut down successfully");
        Ok(())
    }
}
