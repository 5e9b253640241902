use collector_worker::QueueConfig;
use core::time::Duration;

/// Polling policy of the `resolve_*` helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: usize,
    interval: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: usize = 10;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

    /// Zero attempts are raised to one.
    pub const fn new(attempts: usize, interval: Duration) -> Self {
        Self {
            attempts: if attempts == 0 { 1 } else { attempts },
            interval,
        }
    }

    pub const fn attempts(&self) -> usize {
        self.attempts
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS, Self::DEFAULT_INTERVAL)
    }
}

/// Deployment knobs of the register workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterConfig {
    /// Serial worker instances per entity kind. Keys are hash-partitioned
    /// across them.
    pub serial_instances: usize,
    /// Queue of every serial worker instance.
    pub queue: QueueConfig,
    pub retry: RetryPolicy,
    /// Deadline of calls to peer nodes; `None` waits indefinitely.
    pub remote_timeout: Option<Duration>,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            serial_instances: 1,
            queue: QueueConfig::default(),
            retry: RetryPolicy::default(),
            remote_timeout: None,
        }
    }
}
