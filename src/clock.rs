//! Injectable time source.
//!
//! Lock expiry and cursor lifetimes are measured against a [`Clock`] so runs
//! against a real service wait on tokio time while the harness' own tests
//! advance a [`SimulatedClock`] instead of sleeping.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

/// Monotonic time source.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by tokio's timer.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Start a clock at the current instant.
    #[must_use]
    pub fn new() -> Self { Self { origin: Instant::now() } }
}

impl Default for SystemClock {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Duration { self.origin.elapsed() }

    async fn sleep(&self, duration: Duration) { tokio::time::sleep(duration).await; }
}

/// Clock advanced explicitly. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    elapsed: Arc<Mutex<Duration>>,
}

impl SimulatedClock {
    /// Create a clock at zero.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = guard.saturating_add(by);
    }
}

#[async_trait]
impl Clock for SimulatedClock {
    fn now(&self) -> Duration { *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn simulated_sleep_advances_shared_time() {
        let clock = SimulatedClock::new();
        let shared = clock.clone();
        clock.sleep(Duration::from_secs(30)).await;
        shared.advance(Duration::from_secs(4));
        assert_eq!(clock.now(), Duration::from_secs(34));
    }

    #[rstest]
    #[tokio::test]
    async fn system_clock_follows_tokio_time() {
        let clock = SystemClock::new();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() >= Duration::from_millis(5));
    }
}
