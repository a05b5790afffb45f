//! Configuration for the application updater.

use std::time::Duration;

/// Configuration for the application updater.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Maximum number of passes per cycle. `None` restarts until storage
    /// settles, however long that takes.
    pub max_passes: Option<u32>,
    /// Capacity of the notification channel used by the in-memory agent.
    pub notification_capacity: usize,
    /// Name of the worker thread draining the event queue.
    pub worker_name: String,
    /// How long callers wait for the queue to drain.
    pub idle_timeout: Duration,
}

impl UpdaterConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self {
            max_passes: Some(32),
            notification_capacity: 256,
            worker_name: "secsync-updater".to_string(),
            idle_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the maximum number of passes per cycle.
    pub fn with_max_passes(mut self, passes: u32) -> Self {
        self.max_passes = Some(passes.max(1));
        self
    }

    /// Removes the pass limit.
    pub fn unbounded(mut self) -> Self {
        self.max_passes = None;
        self
    }

    /// Sets the notification channel capacity.
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity.max(1);
        self
    }

    /// Sets the worker thread name.
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Sets the idle wait timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Returns true if another pass may start after `passes` completed ones.
    pub fn allows_pass(&self, passes: u32) -> bool {
        self.max_passes.is_none_or(|max| passes < max)
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self::new()
    }
}
