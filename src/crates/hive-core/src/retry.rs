//! Retry policies - deterministic exponential backoff
//!
//! A node's retry policy governs how many times the engine invokes it within
//! one superstep and how long it sleeps between attempts. Backoff is pure
//! exponential with **no jitter**: replaying a run against the same injected
//! clock reproduces the same sleep sequence, which the runtime's determinism
//! guarantee depends on.
//!
//! The delay before attempt `n+1` (after `n` failures) is
//! `min(max_ns, floor(initial_ns * factor^(n-1)))`, slept through the
//! injected [`Clock`](crate::clock::Clock) so tests can fake time.
//!
//! # Example
//!
//! ```rust
//! use hive_core::retry::RetryPolicy;
//!
//! // 3 attempts, 10ms doubling to a 1s cap
//! let policy = RetryPolicy::exponential_backoff(10_000_000, 2.0, 3, 1_000_000_000);
//! assert_eq!(policy.delay_ns(1), 10_000_000);
//! assert_eq!(policy.delay_ns(2), 20_000_000);
//! assert!(policy.validate().is_ok());
//! ```

/// Deterministic exponential-backoff retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt, in nanoseconds
    pub initial_ns: u64,
    /// Multiplier applied per failed attempt
    pub factor: f64,
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Upper bound on any single delay, in nanoseconds
    pub max_ns: u64,
}

impl RetryPolicy {
    /// No retries: a single attempt
    pub fn none() -> Self {
        Self {
            initial_ns: 0,
            factor: 1.0,
            max_attempts: 1,
            max_ns: 0,
        }
    }

    /// Exponential backoff with the given parameters
    pub fn exponential_backoff(initial_ns: u64, factor: f64, max_attempts: u32, max_ns: u64) -> Self {
        Self {
            initial_ns,
            factor,
            max_attempts,
            max_ns,
        }
    }

    /// Policy validation, run before any step executes
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(format!("factor must be finite and >= 1.0, got {}", self.factor));
        }
        Ok(())
    }

    /// Should another attempt follow `attempts_made` failures?
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay after the `attempt`-th failure (1-based), in nanoseconds
    pub fn delay_ns(&self, attempt: u32) -> u64 {
        let scaled = (self.initial_ns as f64) * self.factor.powi(attempt.saturating_sub(1) as i32);
        if !scaled.is_finite() || scaled >= self.max_ns as f64 {
            self.max_ns
        } else {
            scaled.floor() as u64
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
