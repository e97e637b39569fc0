use std::time::Duration;

use chrono::{DateTime, Utc};

use super::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; the total attempt count is one more.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Longest server-requested `Retry-After` we are willing to wait out.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retry_after: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `retry` (1-based), capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// A server-provided `Retry-After` wins over the computed backoff.
    ///
    /// `None` when the server asks for a longer wait than `max_retry_after`;
    /// the caller gives up instead of stalling.
    pub fn delay_for(&self, retry: u32, error: &Error) -> Option<Duration> {
        match error {
            Error::RateLimited {
                retry_after: Some(after),
            } => (*after <= self.max_retry_after).then_some(*after),
            _ => Some(self.backoff(retry)),
        }
    }
}

/// Parses a `Retry-After` header value: delta seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    // a date in the past means "now"
    Some(
        at.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            max_retry_after: Duration::from_secs(60),
        };
        let delays: Vec<_> = (1..=6).map(|n| policy.backoff(n)).collect();
        assert_eq!(
            delays,
            [500, 1000, 2000, 4000, 5000, 5000].map(Duration::from_millis)
        );
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = RetryPolicy::default();
        let limited = Error::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(policy.delay_for(3, &limited), Some(Duration::from_secs(7)));
        let bare = Error::RateLimited { retry_after: None };
        assert_eq!(policy.delay_for(3, &bare), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_retry_after_beyond_cap_gives_up() {
        let policy = RetryPolicy::default();
        let forever = Error::RateLimited {
            retry_after: Some(Duration::from_secs(99_999_999)),
        };
        assert_eq!(policy.delay_for(1, &forever), None);
        let at_cap = Error::RateLimited {
            retry_after: Some(policy.max_retry_after),
        };
        assert_eq!(policy.delay_for(1, &at_cap), Some(policy.max_retry_after));
    }

    #[test]
    fn test_parse_retry_after() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }
}
