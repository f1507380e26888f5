//! Clock collaborator contract
//!
//! The engine never reads time or sleeps directly; it goes through an
//! injected [`Clock`] so retry backoff is testable and replayable. Sleeps
//! must be cancellable: the engine races them against its cancellation
//! signal and abandons the sleep future when cancellation wins.

use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Monotonic time source with a cancellable sleep
#[async_trait]
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin; monotonic
    fn now_ns(&self) -> u64;

    /// Suspend for the given number of nanoseconds
    async fn sleep(&self, ns: u64);
}

/// Process clock: `Instant`-based time, `tokio::time` sleeps
///
/// `tokio::time::sleep` cooperates with `pause()`/`advance()` under
/// `tokio::test(start_paused = true)`, so tests that exercise backoff do not
/// wait in real time.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    async fn sleep(&self, ns: u64) {
        tokio::time::sleep(Duration::from_nanos(ns)).await;
    }
}
