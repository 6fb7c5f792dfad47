//! Periodic task configuration.

use std::time::Duration;

use crate::error::{BswError, Result};

/// Lowest accepted real-time priority.
pub const MIN_PRIORITY: i32 = 1;
/// Highest accepted real-time priority.
pub const MAX_PRIORITY: i32 = 98;

/// Size of the stack region touched before the first iteration.
pub const STACK_PREFAULT_SIZE: usize = 8 * 1024;

/// Scheduling policy applied to the task thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedPolicy {
    /// `SCHED_RR`: fixed priority with time slicing among equal priorities.
    #[default]
    RoundRobin,
    /// `SCHED_FIFO`: fixed priority, runs until it blocks or yields.
    Fifo,
    /// Keep the policy of the spawning thread. Useful without real-time
    /// privileges.
    Inherit,
}

impl SchedPolicy {
    pub(crate) fn os_policy(self) -> Option<libc::c_int> {
        match self {
            SchedPolicy::RoundRobin => Some(libc::SCHED_RR),
            SchedPolicy::Fifo => Some(libc::SCHED_FIFO),
            SchedPolicy::Inherit => None,
        }
    }
}

/// Configuration of one periodic real-time task.
///
/// Priority and period are validated on construction and fixed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    priority: i32,
    period: Duration,
    policy: SchedPolicy,
    lock_memory: bool,
    stack_prefault: bool,
    start_delay: Duration,
    name: Option<String>,
    stack_size: Option<usize>,
}

impl TaskConfig {
    /// Create a configuration with round-robin scheduling and locked memory.
    ///
    /// Fails if `priority` is outside `1..=98`, or if `period` is zero or does
    /// not fit into a signed 64-bit nanosecond count.
    pub fn new(priority: i32, period: Duration) -> Result<Self> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(BswError::InvalidPriority(priority));
        }
        if period.is_zero() || period.as_nanos() > i64::MAX as u128 {
            return Err(BswError::InvalidPeriod(period));
        }

        Ok(Self {
            priority,
            period,
            policy: SchedPolicy::default(),
            lock_memory: true,
            stack_prefault: true,
            start_delay: Duration::ZERO,
            name: None,
            stack_size: None,
        })
    }

    /// Create a configuration with the period given in microseconds.
    pub fn from_micros(priority: i32, period_us: u64) -> Result<Self> {
        Self::new(priority, Duration::from_micros(period_us))
    }

    pub fn with_policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Lock all process memory before the loop starts (`mlockall`).
    pub fn with_memory_lock(mut self, enabled: bool) -> Self {
        self.lock_memory = enabled;
        self
    }

    pub fn with_stack_prefault(mut self, enabled: bool) -> Self {
        self.stack_prefault = enabled;
        self
    }

    /// Delay the first iteration relative to the start of the loop.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Name of the spawned OS thread.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size of the spawned OS thread; the platform default if unset.
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub(crate) fn period_nanos(&self) -> i64 {
        // Bounded by validation in `new`.
        self.period.as_nanos() as i64
    }

    pub fn policy(&self) -> SchedPolicy {
        self.policy
    }

    pub fn lock_memory(&self) -> bool {
        self.lock_memory
    }

    pub fn stack_prefault(&self) -> bool {
        self.stack_prefault
    }

    pub fn start_delay(&self) -> Duration {
        self.start_delay
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }
}
