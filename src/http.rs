use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::{FetchError, PipelineError};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Shared outbound client. Every request waits for a rate-limit slot first.
pub struct HttpClient {
    client: reqwest::Client,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl HttpClient {
    /// `delay` is the minimum spacing between two requests; zero disables limiting.
    pub fn new(delay: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()?;
        let limiter = Quota::with_period(delay)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Ok(HttpClient { client, limiter })
    }

    async fn acquire_slot(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// GET returning the status and body without judging the status.
    pub async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<(StatusCode, String), FetchError> {
        self.acquire_slot().await;
        debug!("GET {} {:?}", url, query);
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(timeout)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// GET that treats any non-2xx status as a failure.
    pub async fn get_text(
        &self,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let (status, body) = self.get(url, query, timeout).await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(body)
    }
}

/// Bounded retry with linear backoff: `base_delay * attempt`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `op` until it succeeds or attempts run out. No sleep after the last attempt.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}, backing off {:.1}s",
                        label,
                        attempt,
                        self.max_attempts,
                        e,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        label, attempt, self.max_attempts, e
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn linear_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(1500));
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::ZERO).unwrap();
        let url = format!("{}/missing", server.uri());
        match client.get_text(&url, &[], TIMEOUT).await {
            Err(FetchError::Status { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn query_parameters_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "a b"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::ZERO).unwrap();
        let url = format!("{}/search", server.uri());
        let body = client.get_text(&url, &[("q", "a b")], TIMEOUT).await.unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn requests_are_spaced_by_delay() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paced"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_millis(150)).unwrap();
        let url = format!("{}/paced", server.uri());
        let start = std::time::Instant::now();
        for _ in 0..3 {
            client.get_text(&url, &[], TIMEOUT).await.unwrap();
        }
        // first request goes out immediately, the next two wait one period each
        assert!(start.elapsed() >= Duration::from_millis(290), "{:?}", start.elapsed());
    }

    #[tokio::test]
    async fn retry_sleeps_between_attempts_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::ZERO).unwrap();
        let url = format!("{}/down", server.uri());
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let start = std::time::Instant::now();
        let result = policy.run("down", || client.get_text(&url, &[], TIMEOUT)).await;
        let elapsed = start.elapsed();

        assert!(result.is_err());
        // 100ms after attempt 1, 200ms after attempt 2, nothing after attempt 3
        assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(600), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn retry_recovers_after_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::ZERO).unwrap();
        let url = format!("{}/flaky", server.uri());
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let body = policy
            .run("flaky", || client.get_text(&url, &[], TIMEOUT))
            .await
            .unwrap();
        assert_eq!(body, "recovered");
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::ZERO).unwrap();
        let url = format!("{}/down", server.uri());
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let result = policy.run("down", || client.get_text(&url, &[], TIMEOUT)).await;
        assert!(matches!(result, Err(FetchError::Status { status: 500, .. })));
    }
}
