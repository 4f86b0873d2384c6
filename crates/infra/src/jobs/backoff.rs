//! Retry policy and backoff delays.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of attempts a job gets (first run included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    #[default]
    Exponential,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff strategy: {other}")),
        }
    }
}

/// Maps an attempt number to the delay before the next attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    /// Base delay
    pub base_delay: Duration,
    /// Optional cap applied before jitter
    pub max_delay: Option<Duration>,
    /// Jitter factor in `0.0..=1.0`. Zero disables jitter.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: None,
            jitter: 0.0,
        }
    }
}

impl BackoffPolicy {
    pub fn exponential(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Default::default()
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay: delay,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retrying after failed attempt number `attempt` (1-indexed).
    ///
    /// Attempt `0` never failed, so its delay is zero. Jitter is ignored here.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                base_ms.saturating_mul(factor)
            }
        };

        let delay = Duration::from_millis(delay_ms);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Like [`delay_for_attempt`](Self::delay_for_attempt), spread by the
    /// configured jitter.
    ///
    /// The spread is a pure function of `(attempt, seed)`, so a given job
    /// (seeded by its id) always gets the same delay for the same attempt.
    pub fn delay_with_seed(&self, attempt: u32, seed: u64) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let unit = splitmix64(seed ^ u64::from(attempt)) as f64 / u64::MAX as f64;
        let factor = 1.0 + self.jitter * (unit * 2.0 - 1.0);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
    }
}

/// Retry policy: attempt ceiling plus backoff between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, first run included
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Whether a job that has made `attempts_made` attempts may run again.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
