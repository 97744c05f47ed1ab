// Telemetry and observability
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// Round-engine performance metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundMetrics {
    pub rounds_completed: u64,
    /// Rounds that closed on the timer rather than on full sub-GM reporting.
    pub rounds_timed_out: u64,
    pub intents_published: u64,
    pub avg_round_ms: f64,
}

/// Metrics collector shared across the generative models of one runtime.
pub struct MetricsCollector {
    metrics: Arc<RwLock<RoundMetrics>>,
    durations: Arc<RwLock<Vec<Duration>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(RoundMetrics::default())),
            durations: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Record a completed round.
    pub async fn record_round(&self, latency: Duration, full_report: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.rounds_completed += 1;
        if !full_report {
            metrics.rounds_timed_out += 1;
        }

        let mut durations = self.durations.write().await;
        durations.push(latency);
        let total_ms: f64 = durations.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
        metrics.avg_round_ms = total_ms / durations.len() as f64;
    }

    pub async fn record_intents(&self, count: u64) {
        self.metrics.write().await.intents_published += count;
    }

    /// Get current metrics
    pub async fn get_metrics(&self) -> RoundMetrics {
        self.metrics.read().await.clone()
    }

    /// Print metrics to log
    pub async fn print_metrics(&self) {
        let metrics = self.get_metrics().await;
        info!("=== Round Metrics ===");
        info!("Rounds completed: {}", metrics.rounds_completed);
        info!("Rounds timed out: {}", metrics.rounds_timed_out);
        info!("Intents published: {}", metrics.intents_published);
        info!("Avg round: {:.2}ms", metrics.avg_round_ms);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
