//! Tokio-based clock implementation.

use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::traits::Clock;

/// Production clock backed by the system clock and Tokio's async sleep.
///
/// Service expiry windows and relayer backoff both read time through this
/// clock, so tests can swap in [`FakeClock`](crate::testing::FakeClock).
///
/// # Examples
///
/// ```rust
/// use attestation_bridge::providers::TokioClock;
/// use attestation_bridge::Clock;
///
/// let clock = TokioClock::new();
/// let start = clock.now();
/// assert!(clock.now() >= start);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl TokioClock {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}
