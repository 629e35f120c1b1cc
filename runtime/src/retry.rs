//! Redelivery policy for messages that fail with a transient error.
//!
//! A failed delivery is requeued after an exponential backoff. The policy
//! decides whether that goes on forever or whether the message is moved to
//! the dead-letter queue after a fixed number of failed attempts.
//!
//! # Example
//!
//! ```rust
//! use order_pipeline_runtime::retry::RedeliveryPolicy;
//! use std::time::Duration;
//!
//! let policy = RedeliveryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! assert!(!policy.should_dead_letter(4));
//! assert!(policy.should_dead_letter(5));
//! assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
//! ```

use std::time::Duration;

const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// What to do with a message that keeps failing.
///
/// # Default Values
///
/// - `max_attempts`: `None` (requeue forever)
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each attempt)
#[derive(Debug, Clone, PartialEq)]
pub struct RedeliveryPolicy {
    /// Failed attempts after which the message is dead-lettered. `None`
    /// requeues without limit.
    pub max_attempts: Option<u32>,
    /// Backoff before the first requeue.
    pub initial_delay: Duration,
    /// Cap on the backoff.
    pub max_delay: Duration,
    /// Growth factor between consecutive backoffs.
    pub multiplier: f64,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RedeliveryPolicy {
    /// Requeue forever with default backoff.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// Dead-letter after `attempts` failures, with default backoff.
    ///
    /// `attempts` below 1 is treated as 1.
    #[must_use]
    pub const fn dead_letter_after(attempts: u32) -> Self {
        Self {
            max_attempts: Some(if attempts == 0 { 1 } else { attempts }),
            ..Self::unbounded()
        }
    }

    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RedeliveryPolicyBuilder {
        RedeliveryPolicyBuilder {
            max_attempts: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Whether this policy ever dead-letters.
    #[must_use]
    pub const fn dead_letters(&self) -> bool {
        self.max_attempts.is_some()
    }

    /// Whether a message that has failed `attempts` times goes to the
    /// dead-letter queue instead of back to the work queue.
    #[must_use]
    pub fn should_dead_letter(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Backoff before requeueing after the `attempt`-th failure (1-based).
    ///
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);

        #[allow(clippy::cast_precision_loss)] // millisecond delays are far below 2^52
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        #[allow(clippy::cast_precision_loss)]
        let cap_ms = self.max_delay.as_millis() as f64;
        if !delay_ms.is_finite() || delay_ms >= cap_ms {
            return self.max_delay;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // bounded by cap_ms above
        let delay_ms = delay_ms.max(0.0) as u64;
        Duration::from_millis(delay_ms)
    }
}

/// Builder for [`RedeliveryPolicy`].
#[derive(Debug, Clone)]
pub struct RedeliveryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RedeliveryPolicyBuilder {
    /// Dead-letter after this many failed attempts. Zero means unbounded.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = if attempts == 0 { None } else { Some(attempts) };
        self
    }

    /// Set backoff before the first requeue.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the backoff cap.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the backoff growth factor.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RedeliveryPolicy`].
    #[must_use]
    pub fn build(self) -> RedeliveryPolicy {
        RedeliveryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay.unwrap_or(DEFAULT_INITIAL_DELAY),
            max_delay: self.max_delay.unwrap_or(DEFAULT_MAX_DELAY),
            multiplier: self.multiplier.unwrap_or(DEFAULT_MULTIPLIER),
        }
    }
}
