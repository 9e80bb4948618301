use std::time::Duration;

use bean_core::ConfigSnapshot;

/// Default cap on concurrently executing jobs per worker
pub const DEFAULT_MAX_JOBS: usize = 200;

/// Default pause after each full scan of a worker's messages
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(100);

/// Configuration shared by every worker a queue manager starts
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of jobs a single (queue, priority) worker runs at once
    pub max_jobs: usize,
    /// Sleep after each full scan, on top of the per-message priority delay
    pub idle_delay: Duration,
    /// Capacity of the message event channel
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            idle_delay: DEFAULT_IDLE_DELAY,
            event_capacity: 1024,
        }
    }
}

impl QueueConfig {
    /// Read `queue.max_jobs`, `queue.idle_delay_ms` and
    /// `queue.event_capacity`, falling back to defaults.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        let defaults = Self::default();
        Self {
            max_jobs: snapshot
                .get_usize("queue.max_jobs")
                .filter(|max| *max > 0)
                .unwrap_or(defaults.max_jobs),
            idle_delay: snapshot
                .get_u64("queue.idle_delay_ms")
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_delay),
            event_capacity: snapshot
                .get_usize("queue.event_capacity")
                .filter(|cap| *cap > 0)
                .unwrap_or(defaults.event_capacity),
        }
    }

    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs.max(1);
        self
    }

    pub fn with_idle_delay(mut self, idle_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self
    }
}
