//! Retry budgets and backoff between recovery attempts

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const JITTER_FACTOR: f64 = 0.3;

/// Delay strategy applied before a phase is re-entered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    None,
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
        #[serde(default)]
        jitter: bool,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffStrategy {
    /// Reject parameters that cannot produce a sensible delay
    pub fn validate(&self) -> Result<(), String> {
        if let BackoffStrategy::Exponential { multiplier, .. } = self {
            if !multiplier.is_finite() || *multiplier < 1.0 {
                return Err(format!(
                    "exponential backoff multiplier must be finite and at least 1, got {}",
                    multiplier
                ));
            }
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        match self {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            BackoffStrategy::Exponential {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
                jitter,
            } => {
                // Clamp in float millis; huge factors saturate instead of overflowing
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let millis = (*initial_delay_ms as f64 * multiplier.max(1.0).powi(exponent))
                    .min(*max_delay_ms as f64);
                let delay = Duration::from_millis(millis as u64);

                if *jitter {
                    add_jitter(delay)
                } else {
                    delay
                }
            }
        }
    }
}

fn add_jitter(delay: Duration) -> Duration {
    let range = delay.mul_f64(JITTER_FACTOR);
    if range.is_zero() {
        return delay;
    }

    let mut rng = rand::thread_rng();
    let jitter = rng.gen_range(Duration::ZERO..range);
    if rng.gen_bool(0.5) {
        delay + jitter
    } else {
        delay.saturating_sub(jitter)
    }
}

/// Retry policy carried by a workflow template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum recovery attempts per execution (0 disables retries)
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffStrategy::None,
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::Fixed {
                delay_ms: delay.as_millis() as u64,
            },
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Execution overrides may only lower the template's budget
    pub fn effective_max_retries(&self, requested: Option<u32>) -> u32 {
        requested.map_or(self.max_retries, |r| r.min(self.max_retries))
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }
}
