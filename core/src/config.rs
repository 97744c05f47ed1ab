//! Runtime tunables, overridable from the environment.

use std::time::Duration;

use tracing::warn;

/// Knobs shared by every generative model in the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How many rounds a perception may be carried over before it is dropped.
    pub max_carry_overs: u32,
    /// How long a completed round stays in episodic memory.
    pub forget_round_after: Duration,
    /// Intents older than this are logged as stale when realized.
    pub intent_stale_after: Duration,
    /// Base seed for per-GM randomness; unset draws from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_carry_overs: 3,
            forget_round_after: Duration::from_secs(60),
            intent_stale_after: Duration::from_millis(5_000),
            rng_seed: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `MAX_CARRY_OVERS`, `FORGET_ROUND_AFTER_SECS`
    /// and `INTENT_STALE_AFTER_MS` from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_parse::<u32>("MAX_CARRY_OVERS") {
            config.max_carry_overs = n;
        }
        if let Some(secs) = env_parse::<u64>("FORGET_ROUND_AFTER_SECS") {
            config.forget_round_after = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("INTENT_STALE_AFTER_MS") {
            config.intent_stale_after = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring unparseable {}={}", name, raw);
            None
        }
    }
}
