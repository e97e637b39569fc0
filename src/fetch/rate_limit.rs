use std::{collections::VecDeque, num::NonZeroU32, time::Duration};

use governor::{
    clock::{QuantaClock, QuantaInstant},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Jitter, Quota,
};
use tokio::{
    sync::Mutex,
    time::{sleep_until, Instant},
};

pub const WINDOW: Duration = Duration::from_secs(60);

type BurstLimiter =
    governor::RateLimiter<NotKeyed, InMemoryState, QuantaClock, NoOpMiddleware<QuantaInstant>>;

/// Admits at most `max_calls` calls in any trailing `window`.
///
/// Optionally smooths bursts with a per-second `governor` quota plus jitter on
/// top of the window; the window alone decides whether a call may proceed.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
    burst: Option<(BurstLimiter, Duration)>,
}

impl RateLimiter {
    pub fn per_minute(max_calls: NonZeroU32) -> Self {
        Self::new(max_calls, WINDOW)
    }

    pub fn new(max_calls: NonZeroU32, window: Duration) -> Self {
        let max_calls = max_calls.get() as usize;
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls.min(256))),
            burst: None,
        }
    }

    #[must_use]
    pub fn with_burst(mut self, per_second: NonZeroU32, jitter: Duration) -> Self {
        let limiter = governor::RateLimiter::direct(Quota::per_second(per_second));
        self.burst = Some((limiter, jitter));
        self
    }

    /// Waits until the window admits another call and records it.
    /// Returns how long the caller was held back.
    pub async fn acquire(&self) -> Duration {
        let start = Instant::now();
        loop {
            let wake_at = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                while calls
                    .front()
                    .is_some_and(|at| now.duration_since(*at) >= self.window)
                {
                    calls.pop_front();
                }
                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    break;
                }
                calls.front().map_or(now, |oldest| *oldest + self.window)
            };
            log::trace!(
                "rate limit window full, waiting {:?}",
                wake_at.saturating_duration_since(Instant::now())
            );
            sleep_until(wake_at).await;
        }
        if let Some((limiter, jitter)) = &self.burst {
            limiter
                .until_ready_with_jitter(Jitter::new(Duration::ZERO, *jitter))
                .await;
        }
        start.elapsed()
    }

    /// Calls still inside the trailing window.
    #[cfg(test)]
    pub async fn in_window(&self) -> usize {
        let calls = self.calls.lock().await;
        let now = Instant::now();
        calls
            .iter()
            .filter(|at| now.duration_since(**at) < self.window)
            .count()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_calls", &self.max_calls)
            .field("window", &self.window)
            .field("burst", &self.burst.as_ref().map(|(_, jitter)| jitter))
            .finish_non_exhaustive()
    }
}
