use std::time::Duration;

use super::types::{WatchError, WatchResult};

/// Default steady-state polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
/// Default bound on push subscription establishment.
pub const DEFAULT_WS_CONNECT_TIMEOUT: Duration = Duration::from_millis(8_000);

/// Timing configuration for one watcher.
///
/// `ws_connect_timeout` only bounds subscription establishment; once streaming, the push path runs
/// until it ends or errors. `poll_interval` only governs polling cadence, not poll latency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchTimings {
    pub poll_interval: Duration,
    pub ws_connect_timeout: Duration,
}

impl Default for WatchTimings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            ws_connect_timeout: DEFAULT_WS_CONNECT_TIMEOUT,
        }
    }
}

impl WatchTimings {
    pub fn new(poll_interval: Duration, ws_connect_timeout: Duration) -> Self {
        Self {
            poll_interval,
            ws_connect_timeout,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_ws_connect_timeout(mut self, ws_connect_timeout: Duration) -> Self {
        self.ws_connect_timeout = ws_connect_timeout;
        self
    }

    pub fn validate(&self) -> WatchResult<()> {
        if self.poll_interval.is_zero() {
            return Err(WatchError::InvalidConfig(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.ws_connect_timeout.is_zero() {
            return Err(WatchError::InvalidConfig(
                "ws_connect_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
