//! Configuration for the coordinator, participants and proxies.

use std::time::Duration;

/// Configuration for a [`crate::Coordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for each of the vote and acknowledgment phases.
    pub phase_timeout: Duration,
    /// Interval at which a waiting phase re-checks collected replies.
    pub poll_interval: Duration,
    /// Capacity of the coordinator's inbound message queue.
    pub inbox_capacity: usize,
}

impl CoordinatorConfig {
    /// Creates a configuration with the default timings.
    pub fn new() -> Self {
        Self {
            phase_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            inbox_capacity: 1024,
        }
    }

    /// Sets the per-phase deadline.
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the inbox capacity. Zero is raised to one.
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a [`crate::Participant`].
#[derive(Debug, Clone)]
pub struct ParticipantConfig {
    /// Capacity of the participant's inbound message queue.
    pub inbox_capacity: usize,
}

impl ParticipantConfig {
    /// Creates a configuration with the default capacity.
    pub fn new() -> Self {
        Self { inbox_capacity: 256 }
    }

    /// Sets the inbox capacity. Zero is raised to one.
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a [`crate::ChannelProxy`].
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Simulated network delay applied before each delivery.
    pub delay: Option<Duration>,
}

impl ProxyConfig {
    /// Creates a configuration with immediate delivery.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every delivery by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}
