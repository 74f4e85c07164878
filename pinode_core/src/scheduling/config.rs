// Poll scheduler configuration
use crate::error::{PinodeError, PinodeResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for the poll scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Floor for any poll interval; faster requests are clamped to it
    #[serde(default = "default_min_poll_interval_ms")]
    pub min_poll_interval_ms: u64,

    /// How long `stop` waits for in-flight polls before abandoning them
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_min_poll_interval_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_poll_interval_ms: default_min_poll_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> PinodeResult<()> {
        if self.min_poll_interval_ms == 0 {
            return Err(PinodeError::config(
                "scheduler.min_poll_interval_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}
