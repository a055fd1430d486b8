//! Retry strategies for failed append attempts
//!
//! The quorum wait retries a failing secondary for as long as the node is
//! running; the policy only decides how long to wait between attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay strategy between consecutive attempts to the same secondary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Same delay before every retry
    Fixed {
        /// Delay between attempts
        #[serde(with = "duration_millis")]
        interval: Duration,
    },
    /// Exponential backoff with jitter
    Exponential {
        /// Delay before the first retry
        #[serde(with = "duration_millis")]
        initial: Duration,
        /// Upper bound on the delay
        #[serde(with = "duration_millis")]
        max: Duration,
        /// Growth factor per attempt
        multiplier: f64,
        /// Fraction of the delay randomized in either direction
        jitter: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Fixed-interval policy
    pub fn fixed(interval: Duration) -> Self {
        Self::Fixed { interval }
    }

    /// Exponential policy without jitter
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self::Exponential {
            initial,
            max,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempt` (1 = first retry)
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { interval } => *interval,
            Self::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            } => {
                let exponent = attempt.saturating_sub(1).min(63) as i32;
                let base = initial.as_nanos() as f64 * multiplier.powi(exponent);
                let base = base.min(max.as_nanos() as f64);

                let jitter_range = base * jitter;
                let offset = if jitter_range > 0.0 {
                    (rand::random::<f64>() - 0.5) * 2.0 * jitter_range
                } else {
                    0.0
                };

                Duration::from_nanos((base + offset).max(0.0) as u64)
            }
        }
    }

    /// Validate policy parameters
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Fixed { .. } => Ok(()),
            Self::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            } => {
                if *multiplier < 1.0 {
                    return Err("retry multiplier must be at least 1.0".into());
                }
                if !(0.0..=1.0).contains(jitter) {
                    return Err("retry jitter must be between 0.0 and 1.0".into());
                }
                if initial > max {
                    return Err("retry initial delay exceeds max delay".into());
                }
                Ok(())
            }
        }
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
