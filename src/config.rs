//! Harness run configuration.
//!
//! Settings are plain values with environment-variable overrides:
//! - `HARNESS_SEED`: RNG seed for the whole run
//! - `HARNESS_POLL_MS`: scheduler re-poll interval for pending processes
//! - `HARNESS_RECOVERY_WAIT_MS`: quiet window between final heal and the
//!   closing client operations

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Seed for every random decision in the run.
    pub seed: u64,
    /// How long a process sleeps before re-polling a pending generator.
    pub poll_interval: Duration,
    /// Recovery window scheduled between the nemesis's final heal and the
    /// final client operations.
    pub recovery_wait: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            seed: 42,
            poll_interval: Duration::from_millis(5),
            recovery_wait: Duration::from_secs(10),
        }
    }
}

impl RunConfig {
    pub fn with_seed(seed: u64) -> Self {
        RunConfig { seed, ..Default::default() }
    }

    /// Defaults overlaid with any `HARNESS_*` environment variables.
    pub fn from_env() -> Self {
        let base = Self::default();
        RunConfig {
            seed: env_u64("HARNESS_SEED").unwrap_or(base.seed),
            poll_interval: env_u64("HARNESS_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.poll_interval),
            recovery_wait: env_u64("HARNESS_RECOVERY_WAIT_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.recovery_wait),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
    }

    #[test]
    fn test_with_seed_keeps_other_defaults() {
        let config = RunConfig::with_seed(7);
        assert_eq!(config.seed, 7);
        assert_eq!(config.recovery_wait, RunConfig::default().recovery_wait);
    }
}
