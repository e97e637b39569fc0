mod backoff;
mod error;
mod rate_limit;

use std::{num::NonZeroU32, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client};
use tokio::time::{sleep, Instant};
use tracing::{instrument, Level};
use url::Url;

use crate::config::FetchSettings;

pub use backoff::{parse_retry_after, RetryPolicy};
pub use error::Error;
pub use rate_limit::RateLimiter;

/// What a transport hands back for one request, before any retry decision.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl RawResponse {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<RawResponse, Error>;
}

pub fn make_client(settings: &FetchSettings) -> Result<Client, Error> {
    Client::builder()
        .gzip(true)
        .timeout(Duration::from_secs(settings.timeout_secs))
        .user_agent(settings.user_agent.as_str())
        .build()
        .map_err(From::from)
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport(Client);

impl ReqwestTransport {
    pub const fn new(client: Client) -> Self {
        Self(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, Error> {
        let res = self.0.get(url.clone()).send().await?;
        let status = res.status().as_u16();
        let retry_after = res
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, chrono::Utc::now()));
        let start = Instant::now();
        let body = res.text().await?;
        log::trace!("Got body of {url} in \t {:?}", start.elapsed());
        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Everything one `Fetcher::fetch` call did, success or not.
#[derive(Debug)]
pub struct FetchReport {
    pub url: Url,
    pub attempts: u32,
    /// Delay slept before each retry, in order.
    pub waits: Vec<Duration>,
    pub elapsed: Duration,
    pub outcome: Result<String, Error>,
}

/// Rate-limited GETs with bounded retries.
pub struct Fetcher<T = ReqwestTransport> {
    transport: T,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn from_settings(settings: &FetchSettings) -> Result<Self, Error> {
        let client = make_client(settings)?;
        Ok(Self::new(
            ReqwestTransport::new(client),
            Arc::new(limiter_from_settings(settings)),
            settings.retry_policy(),
        ))
    }
}

pub fn limiter_from_settings(settings: &FetchSettings) -> RateLimiter {
    let per_minute = NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);
    let limiter = RateLimiter::per_minute(per_minute);
    match settings.burst_per_second.and_then(NonZeroU32::new) {
        Some(per_second) => {
            limiter.with_burst(per_second, Duration::from_millis(settings.jitter_ms))
        }
        None => limiter,
    }
}

impl<T: Transport> Fetcher<T> {
    pub const fn new(transport: T, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            limiter,
            policy,
        }
    }

    /// Never panics and never retries past the policy: the report's outcome
    /// carries the terminal error when the page could not be fetched.
    #[instrument(skip(self, url), fields(url = %url), level = Level::TRACE)]
    pub async fn fetch(&self, url: &Url) -> FetchReport {
        let start = Instant::now();
        let mut waits = Vec::new();
        let mut attempts = 0;
        let outcome = loop {
            let waited = self.limiter.acquire().await;
            if !waited.is_zero() {
                log::debug!("Rate limited {url} for {waited:?}");
            }
            attempts += 1;
            let error = match self.transport.get(url).await {
                Ok(res) if res.is_success() => break Ok(res.body),
                Ok(res) => Error::from_status(res.status, res.retry_after),
                Err(e) => e,
            };
            if !error.is_retryable() {
                log::warn!("Fetching {url} failed, not retrying: {error}");
                break Err(error);
            }
            if attempts > self.policy.max_retries {
                log::warn!("Fetching {url} failed {attempts} times, giving up: {error}");
                break Err(Error::Exhausted {
                    attempts,
                    last: Box::new(error),
                });
            }
            let Some(delay) = self.policy.delay_for(attempts, &error) else {
                log::warn!("Fetching {url} failed, server asks for too long a wait: {error}");
                break Err(error);
            };
            log::info!("Fetching {url} failed ({error}), retry {attempts} in {delay:?}");
            waits.push(delay);
            sleep(delay).await;
        };
        FetchReport {
            url: url.clone(),
            attempts,
            waits,
            elapsed: start.elapsed(),
            outcome,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    const URL: &str = "https://shop.example/anvil";

    fn fetcher(transport: ScriptedTransport, max_retries: u32) -> Fetcher<ScriptedTransport> {
        Fetcher::new(transport, unlimited(), fast_policy(max_retries))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let transport = ScriptedTransport::default();
        transport.status(URL, 500);
        transport.status(URL, 500);
        transport.push(URL, Ok(page(200, "<h1>ok</h1>")));
        let fetcher = fetcher(transport, 3);

        let report = fetcher.fetch(&Url::parse(URL).unwrap()).await;
        assert_eq!(report.outcome.unwrap(), "<h1>ok</h1>");
        assert_eq!(report.attempts, 3);
        assert_eq!(report.waits, [Duration::from_secs(1), Duration::from_secs(2)]);
        assert!(report.waits.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(report.elapsed, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let transport = ScriptedTransport::default();
        for _ in 0..10 {
            transport.status(URL, 503);
        }
        let fetcher = fetcher(transport, 3);

        let report = fetcher.fetch(&Url::parse(URL).unwrap()).await;
        assert_eq!(report.attempts, 4);
        assert_eq!(report.waits.len(), 3);
        assert!(report.waits.windows(2).all(|w| w[0] <= w[1]));
        match report.outcome {
            Err(Error::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, Error::Status(503)));
            }
            other => panic!("expected a terminal failure, got {other:?}"),
        }
        assert_eq!(fetcher.transport.requests().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_honors_retry_after() {
        let transport = ScriptedTransport::default();
        transport.push(
            URL,
            Ok(RawResponse {
                status: 429,
                retry_after: Some(Duration::from_secs(7)),
                body: String::new(),
            }),
        );
        transport.status(URL, 429);
        transport.push(URL, Ok(page(200, "fine")));
        let fetcher = fetcher(transport, 3);

        let report = fetcher.fetch(&Url::parse(URL).unwrap()).await;
        assert!(report.outcome.is_ok());
        // server delay first, then backoff for retry 2
        assert_eq!(report.waits, [Duration::from_secs(7), Duration::from_secs(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excessive_retry_after_is_terminal() {
        let transport = ScriptedTransport::default();
        transport.push(
            URL,
            Ok(RawResponse {
                status: 429,
                retry_after: Some(Duration::from_secs(99_999_999)),
                body: String::new(),
            }),
        );
        transport.push(URL, Ok(page(200, "never reached")));
        let fetcher = fetcher(transport, 3);

        let report = fetcher.fetch(&Url::parse(URL).unwrap()).await;
        assert_eq!(report.attempts, 1);
        assert!(report.waits.is_empty());
        assert_eq!(report.elapsed, Duration::ZERO);
        assert!(matches!(
            report.outcome,
            Err(Error::RateLimited { retry_after: Some(_) })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let transport = ScriptedTransport::default();
        transport.status(URL, 404);
        transport.push(URL, Ok(page(200, "never reached")));
        let fetcher = fetcher(transport, 3);

        let report = fetcher.fetch(&Url::parse(URL).unwrap()).await;
        assert_eq!(report.attempts, 1);
        assert!(report.waits.is_empty());
        assert!(matches!(report.outcome, Err(Error::Status(404))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failures_are_retried() {
        let transport = ScriptedTransport::default();
        transport.push(URL, Err(Error::Timeout("deadline".into())));
        transport.push(URL, Err(Error::Connect("refused".into())));
        transport.push(URL, Ok(page(200, "up")));
        let fetcher = fetcher(transport, 3);

        let report = fetcher.fetch(&Url::parse(URL).unwrap()).await;
        assert_eq!(report.attempts, 3);
        assert_eq!(report.outcome.unwrap(), "up");
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_transport_failure_is_terminal() {
        let transport = ScriptedTransport::default();
        transport.push(URL, Err(Error::Transport("bad body".into())));
        let fetcher = fetcher(transport, 3);

        let report = fetcher.fetch(&Url::parse(URL).unwrap()).await;
        assert_eq!(report.attempts, 1);
        assert!(matches!(report.outcome, Err(Error::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_go_through_the_limiter() {
        let transport = ScriptedTransport::default();
        transport.status(URL, 500);
        transport.push(URL, Ok(page(200, "ok")));
        let limiter = Arc::new(RateLimiter::per_minute(NonZeroU32::new(1).unwrap()));
        let fetcher = Fetcher::new(transport, Arc::clone(&limiter), fast_policy(3));

        let report = fetcher.fetch(&Url::parse(URL).unwrap()).await;
        assert!(report.outcome.is_ok());
        // the retry after 1s of backoff still had to wait out the window
        assert_eq!(report.elapsed, Duration::from_secs(60));
    }

    #[test]
    fn test_limiter_from_settings() {
        let settings = FetchSettings {
            requests_per_minute: 0,
            burst_per_second: Some(0),
            ..FetchSettings::default()
        };
        let limiter = format!("{:?}", limiter_from_settings(&settings));
        assert!(limiter.contains("max_calls: 1"), "{limiter}");
        assert!(limiter.contains("burst: None"), "{limiter}");
    }
}
