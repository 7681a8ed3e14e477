//! # Reconnect policies
//!
//! Both connectors recover from lost connections, but with deliberately
//! different rules:
//!
//! - The broker is assumed to come back eventually, so it is retried forever
//!   at a [fixed](Backoff::Fixed) interval.
//! - The store is not, so it is retried a bounded number of times with a
//!   [linear](Backoff::Linear) delay, after which the connector gives up.
//!
//! ```
//! use std::time::Duration;
//! use topic_relay::ReconnectPolicy;
//!
//! let policy = ReconnectPolicy::store();
//! assert_eq!(policy.delay_for(1), Some(Duration::from_millis(1000)));
//! assert_eq!(policy.delay_for(5), Some(Duration::from_millis(5000)));
//! assert_eq!(policy.delay_for(6), None);
//! ```

use std::time::Duration;

use crate::constants::{
    BROKER_RECONNECT_DELAY, STORE_MAX_RECONNECT_ATTEMPTS, STORE_RECONNECT_CEILING,
    STORE_RECONNECT_STEP,
};

/// How the delay between attempts grows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay before every attempt.
    Fixed(Duration),
    /// `attempt * step`, clamped to `max`.
    Linear { step: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the given attempt (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear { step, max } => step.saturating_mul(attempt).min(max),
        }
    }
}

/// When to retry a lost connection, and when to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl ReconnectPolicy {
    /// Unbounded, every 5 seconds.
    pub fn broker() -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed(BROKER_RECONNECT_DELAY),
        }
    }

    /// At most 5 attempts, `attempt * 1s` capped at 5s.
    pub fn store() -> Self {
        Self {
            max_attempts: Some(STORE_MAX_RECONNECT_ATTEMPTS),
            backoff: Backoff::Linear {
                step: STORE_RECONNECT_STEP,
                max: STORE_RECONNECT_CEILING,
            },
        }
    }

    /// Returns the delay to wait before `attempt` (1-indexed), or `None` once
    /// the attempt budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.backoff.delay(attempt)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_policy_is_linear_and_capped() {
        let policy = ReconnectPolicy {
            max_attempts: Some(8),
            ..ReconnectPolicy::store()
        };
        let delays: Vec<_> = (1..=8)
            .map(|n| policy.delay_for(n).unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 3000, 4000, 5000, 5000, 5000, 5000]);
    }

    #[test]
    fn store_policy_gives_up_after_five() {
        let policy = ReconnectPolicy::store();
        assert!(policy.delay_for(5).is_some());
        assert_eq!(policy.delay_for(6), None);
        assert_eq!(policy.delay_for(u32::MAX), None);
    }

    #[test]
    fn broker_policy_never_gives_up() {
        let policy = ReconnectPolicy::broker();
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for(10_000), Some(Duration::from_secs(5)));
    }

    #[test]
    fn linear_backoff_does_not_overflow() {
        let backoff = Backoff::Linear {
            step: Duration::MAX,
            max: Duration::from_secs(1),
        };
        assert_eq!(backoff.delay(3), Duration::from_secs(1));
    }
}
