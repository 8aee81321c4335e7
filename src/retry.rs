//! Capped exponential backoff bookkeeping
//!
//! Shared by failed address binds and subprocess restarts. Callers pass the
//! current instant in, so the schedule is checked once per reconciliation
//! cycle rather than slept on.

use crate::config::BackoffConfig;
use chrono_machines::{BackoffStrategy, ExponentialBackoff};
use rand::rng;
use std::time::{Duration, Instant};

/// Retry state for a single operation
#[derive(Debug)]
pub struct RetryState {
    /// Consecutive failures
    attempts: u8,
    /// Backoff calculator
    backoff: ExponentialBackoff,
    /// Floor for every delay
    base_delay: Duration,
    /// Cap applied once the schedule is exhausted
    max_delay: Duration,
    /// Earliest instant the next attempt may run
    next_attempt: Option<Instant>,
}

impl RetryState {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            attempts: 0,
            backoff: ExponentialBackoff::new()
                .base_delay_ms(config.base_delay_ms)
                .max_delay_ms(config.max_delay_ms)
                .multiplier(config.multiplier)
                .max_attempts(config.max_attempts)
                .jitter_factor(config.jitter),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            next_attempt: None,
        }
    }

    /// Whether an attempt may run at `now`
    pub fn ready(&self, now: Instant) -> bool {
        self.next_attempt.is_none_or(|at| now >= at)
    }

    /// Record a failure and schedule the next attempt
    ///
    /// Returns the delay until the next attempt.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        let delay = self.next_delay();
        self.attempts = self.attempts.saturating_add(1);
        self.next_attempt = Some(now + delay);
        delay
    }

    /// Forget past failures
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_attempt = None;
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    fn next_delay(&self) -> Duration {
        if !self.backoff.should_retry(self.attempts) {
            return self.max_delay;
        }
        let mut rng = rng();
        self.backoff
            .delay(self.attempts, &mut rng)
            .map(Duration::from_millis)
            .unwrap_or(self.max_delay)
            .max(self.base_delay)
            .min(self.max_delay)
    }
}
