//! Rover demo: a two-level cognition graph driving away from a wall.
//!
//! The navigator GM conjectures that the course is safe and predicts that no
//! obstacle is near. The proximity GM turns that prediction into a range
//! prediction answered by a scripted rangefinder whose wall creeps closer
//! over time. Once the range degrades, prediction errors climb the graph,
//! the navigator's goal becomes unsatisfied, and steering intents reach the
//! helm.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cortex_core::gm::{Conjecture, GmDefinition, GmLinks, Intention};
use cortex_core::{
    goal_activator, topics, values, Belief, ConjectureActivation, Cortex, Event, EventBus,
    Expectation, GoalPredicate, IntentValue, Perception, PredictionError, Prediction, Result,
    Round, RuntimeConfig, Value, Values,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Scripted range detector: answers range predictions with measurements of a
/// wall that approaches over time.
struct Rangefinder {
    bus: Arc<EventBus>,
    started: Instant,
}

impl Rangefinder {
    const NAME: &'static str = "rangefinder";
    const INITIAL_DISTANCE: f64 = 120.0;
    const APPROACH_PER_SEC: f64 = 30.0;

    fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            started: Instant::now(),
        }
    }

    fn measure(&self) -> f64 {
        let travelled = self.started.elapsed().as_secs_f64() * Self::APPROACH_PER_SEC;
        (Self::INITIAL_DISTANCE - travelled).max(5.0)
    }

    async fn start(self) -> Result<JoinHandle<()>> {
        let (_sub, mut rx) = self.bus.subscribe(topics::prediction("range")).await?;
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Event::Prediction(prediction) = event else {
                    continue;
                };
                let measured = self.measure();
                let measurement = values([("dist", Value::Number(measured))]);
                let size = prediction.error_size(&measurement);
                if size <= 0.0 {
                    continue;
                }
                info!(target: "rangefinder", "Range {:.0} deviates (size {:.2})", measured, size);
                let gm_name = prediction.source.clone();
                let error = PredictionError {
                    prediction,
                    belief: Belief {
                        source: Self::NAME.to_string(),
                        conjecture_name: "range".to_string(),
                        about: "ahead".to_string(),
                        goal: None,
                        values: Some(measurement),
                    },
                    size,
                    carry_overs: 0,
                };
                let _ = self
                    .bus
                    .publish(&topics::error(&gm_name), Event::PredictionError(error))
                    .await;
            }
        });
        Ok(handle)
    }
}

/// Logging actuator: realizes steering intents.
struct Helm {
    bus: Arc<EventBus>,
    stale_after: Duration,
}

impl Helm {
    fn new(bus: Arc<EventBus>, stale_after: Duration) -> Self {
        Self { bus, stale_after }
    }

    async fn start(self) -> Result<JoinHandle<()>> {
        let (_sub, mut rx) = self.bus.subscribe(topics::INTENT.to_string()).await?;
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Event::Intended(intent) = event else {
                    continue;
                };
                if intent.is_stale(self.stale_after) {
                    warn!(target: "helm", "Realizing stale intent {} ({:?} old)", intent.about, intent.age());
                }
                info!(target: "helm", "Realizing {} = {:?}", intent.about, intent.value);
            }
        });
        Ok(handle)
    }
}

fn navigator() -> GmDefinition {
    let goal: GoalPredicate = Arc::new(|v: &Values| v.get("safe") == Some(&Value::Bool(true)));
    GmDefinition::new("navigator")
        .hyper_prior()
        .with_conjecture(
            Conjecture::new("course_safe")
                .with_activator(goal_activator(goal))
                .with_predictor(Arc::new(|_: &ConjectureActivation, _: &[Round]| {
                    Some(
                        Prediction::new("obstacle_near", "ahead")
                            .with_expectation("near", Expectation::Equals(Value::Bool(false))),
                    )
                }))
                .with_valuator(Arc::new(|_: &ConjectureActivation, rounds: &[Round]| {
                    // Safe unless the proximity GM contradicted our prediction.
                    let near = rounds[0].perceptions.iter().any(|p| match p {
                        Perception::Error(e) => {
                            e.prediction.conjecture_name == "obstacle_near"
                                && e.belief
                                    .values
                                    .as_ref()
                                    .and_then(|v| v.get("near"))
                                    == Some(&Value::Bool(true))
                        }
                        Perception::Prediction(_) => false,
                    });
                    Some(values([("safe", Value::Bool(!near))]))
                }))
                .with_intention_domain(&["steer"]),
        )
        .with_intention(
            Intention::new("steer", "steer").with_valuator(Arc::new(|_: Option<&Values>| {
                Some(IntentValue::from(Value::Text("left".into())))
            })),
        )
        .with_max_round_duration(Duration::from_millis(400))
}

fn proximity() -> GmDefinition {
    GmDefinition::new("proximity")
        .with_conjecture(
            Conjecture::new("obstacle_near")
                .with_predictor(Arc::new(|act: &ConjectureActivation, _: &[Round]| {
                    Some(
                        Prediction::new("range", act.about.clone()).with_expectation(
                            "dist",
                            Expectation::InRange {
                                min: 30.0,
                                max: 400.0,
                            },
                        ),
                    )
                }))
                .with_valuator(Arc::new(|act: &ConjectureActivation, rounds: &[Round]| {
                    // Near iff the rangefinder reported a short distance.
                    let near = rounds[0].perceptions.iter().any(|p| match p {
                        Perception::Error(e) => {
                            e.prediction.conjecture_name == "range"
                                && e.prediction.about == act.about
                                && e.belief
                                    .values
                                    .as_ref()
                                    .and_then(|v| v.get("dist"))
                                    .and_then(|v| v.as_number())
                                    .map_or(false, |dist| dist < 30.0)
                        }
                        Perception::Prediction(_) => false,
                    });
                    Some(values([("near", Value::Bool(near))]))
                })),
        )
        .with_max_round_duration(Duration::from_millis(300))
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,cortex_core=info,rover_agent=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(target: "rover_agent", "Starting rover demo: navigator -> proximity -> rangefinder");

    let config = RuntimeConfig::from_env();
    let stale_after = config.intent_stale_after;
    let mut cortex = Cortex::new(config).await?;
    cortex.start().await?;

    let bus = Arc::clone(&cortex.event_bus);

    // Leaves first: the detector and the actuator listen before the GMs
    // start predicting.
    let rangefinder_handle = Rangefinder::new(Arc::clone(&bus)).start().await?;
    let helm_handle = Helm::new(Arc::clone(&bus), stale_after).start().await?;

    // The cognition graph, children before parents.
    cortex
        .gm_runtime
        .spawn_gm(proximity(), GmLinks {
            super_gms: vec!["navigator".to_string()],
            sub_gms: vec![Rangefinder::NAME.to_string()],
        })
        .await?;
    cortex
        .gm_runtime
        .spawn_gm(navigator(), GmLinks::with_subs(&["proximity"]))
        .await?;

    // Let the wall creep close enough to force a course change.
    tokio::time::sleep(Duration::from_secs(5)).await;

    cortex.gm_runtime.metrics().print_metrics().await;

    cortex.shutdown().await?;
    rangefinder_handle.abort();
    helm_handle.abort();

    info!(target: "rover_agent", "Rover demo finished");
    Ok(())
}
