//! Background settlement sweeper
//!
//! Periodically settles OPEN bill roots whose merge window elapsed with no
//! further candidates. Merge correctness does not depend on this task (the
//! engine also settles lazily during lookup); the sweeper keeps long-idle
//! records from staying OPEN indefinitely.
//!
//! Configured via environment variables:
//!
//! - `TALLY_SWEEP_INTERVAL_SECS`: Seconds between sweeps (default: 60,
//!   "0" disables the sweeper)

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use tally_core::pipeline::Pipeline;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Configuration for the settlement sweeper
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Interval between sweeps
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl SweepConfig {
    /// Parse configuration from environment variables
    ///
    /// Returns None if the sweeper is explicitly disabled
    /// (`TALLY_SWEEP_INTERVAL_SECS=0`).
    pub fn from_env() -> Option<Self> {
        match std::env::var("TALLY_SWEEP_INTERVAL_SECS") {
            Ok(raw) => match raw.parse::<u64>() {
                Ok(0) => {
                    warn!("TALLY_SWEEP_INTERVAL_SECS is 0, settlement sweeper disabled");
                    None
                }
                Ok(secs) => Some(Self {
                    interval: Duration::from_secs(secs),
                }),
                Err(_) => {
                    warn!(value = %raw, "Unparseable TALLY_SWEEP_INTERVAL_SECS, using default");
                    Some(Self::default())
                }
            },
            Err(_) => Some(Self::default()),
        }
    }
}

/// Start the settlement sweeper as a background task
pub fn start_settlement_sweeper(pipeline: Arc<Pipeline>, config: SweepConfig) {
    info!(
        "Starting settlement sweeper: every {} seconds",
        config.interval.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = interval(config.interval);

        // Skip the first immediate tick - nothing can have expired at startup.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match pipeline.settle_expired() {
                Ok(0) => {}
                Ok(settled) => {
                    info!(settled, "settled bills past their merge window");
                }
                Err(e) => {
                    error!("Settlement sweep failed: {}", e);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env_not_set() {
        // When TALLY_SWEEP_INTERVAL_SECS is not set, the default applies.
        std::env::remove_var("TALLY_SWEEP_INTERVAL_SECS");
        let config = SweepConfig::from_env().unwrap();
        assert_eq!(config.interval, Duration::from_secs(60));
    }

    #[test]
    fn test_config_from_env_zero_disables() {
        std::env::set_var("TALLY_SWEEP_INTERVAL_SECS", "0");
        assert!(SweepConfig::from_env().is_none());
        std::env::remove_var("TALLY_SWEEP_INTERVAL_SECS");
    }
}
