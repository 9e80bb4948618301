use std::time::Duration;

use bean_core::ConfigSnapshot;

/// Default executor tick
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Settings shared by the executor and every timer service
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Extra attempts after a failed timeout callback
    pub retry_attempts: u32,
    /// Pause before each retry
    pub retry_delay: Duration,
    /// Executor sleep between scans when nothing wakes it
    pub tick_interval: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 1,
            retry_delay: Duration::from_secs(1),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl TimerConfig {
    /// Read `timer.retry_attempts`, `timer.retry_delay_ms` and
    /// `timer.tick_interval_ms`.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        let defaults = Self::default();
        Self {
            retry_attempts: snapshot
                .get_u32("timer.retry_attempts")
                .unwrap_or(defaults.retry_attempts),
            retry_delay: snapshot
                .get_u64("timer.retry_delay_ms")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            tick_interval: snapshot
                .get_u64("timer.tick_interval_ms")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
        }
    }

    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }
}
