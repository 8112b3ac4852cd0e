//! Engine configuration.

use std::time::Duration;

/// Shortest tick the coordinator accepts.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Runtime settings of a [`crate::JobEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker actors, i.e. tasks that may run at once.
    pub workers: usize,
    /// How often the coordinator re-evaluates blocked and waiting work.
    pub tick_interval: Duration,
    /// Upper bound on a single task body. `None` lets tasks run forever.
    pub task_timeout: Option<Duration>,
    /// Buffer size of the change event channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            tick_interval: Duration::from_secs(1),
            task_timeout: None,
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Read the configuration from `JOB_ENGINE_*` environment variables,
    /// falling back to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let workers = env_parse("JOB_ENGINE_WORKERS")
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.workers);
        let tick_interval = env_parse("JOB_ENGINE_TICK_MS")
            .filter(|ms: &u64| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.tick_interval);
        let task_timeout = env_parse("JOB_ENGINE_TASK_TIMEOUT_SECS")
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs)
            .or(defaults.task_timeout);
        let event_capacity = env_parse("JOB_ENGINE_EVENT_CAPACITY")
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.event_capacity);

        Self {
            workers,
            tick_interval,
            task_timeout,
            event_capacity,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(MIN_TICK_INTERVAL);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
