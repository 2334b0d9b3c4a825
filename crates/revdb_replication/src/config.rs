//! Configuration for replicators.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ReplicationError;
use revdb_core::ReplicationDirection;

/// Which way a replicator moves revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local changes go to the peer.
    Push,
    /// Peer changes come to the local datastore.
    Pull,
    /// Pull, then push.
    Both,
}

impl Direction {
    /// Returns the checkpoint directions this mode runs, in order.
    #[must_use]
    pub fn legs(self) -> &'static [ReplicationDirection] {
        match self {
            Direction::Push => &[ReplicationDirection::Push],
            Direction::Pull => &[ReplicationDirection::Pull],
            Direction::Both => &[ReplicationDirection::Pull, ReplicationDirection::Push],
        }
    }

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Push => "push",
            Direction::Pull => "pull",
            Direction::Both => "both",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push" => Ok(Direction::Push),
            "pull" => Ok(Direction::Pull),
            "both" => Ok(Direction::Both),
            other => Err(ReplicationError::InvalidConfig(format!(
                "unknown replication direction {other:?}"
            ))),
        }
    }
}

/// Configuration for one replicator.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Which way revisions move.
    pub direction: Direction,
    /// Maximum number of changed documents per batch.
    pub batch_size: usize,
    /// Retry behaviour for failed batches.
    pub retry: RetryConfig,
}

impl ReplicatorConfig {
    /// Creates a configuration with default batch size and retries.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            batch_size: 100,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero batch size or zero attempts.
    pub fn validate(&self) -> Result<(), ReplicationError> {
        if self.batch_size == 0 {
            return Err(ReplicationError::InvalidConfig(
                "batch size must be greater than zero".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ReplicationError::InvalidConfig(
                "retry attempts must be at least one".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per batch step, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% on top
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pseudo-random fraction in `[0, 1)` taken from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
