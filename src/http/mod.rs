//! HTTP plumbing shared by the model clients
//!
//! Rate limiting and retry with exponential backoff for the hosted model APIs
//! (Voyage AI embeddings, Azure OpenAI completions).

use std::time::{Duration, Instant};

use anyhow::Result;
use reqwest::{RequestBuilder, StatusCode};
use thiserror::Error;
use tokio::sync::Mutex;

/// Default number of retries after the first attempt
pub const MAX_RETRIES: u32 = 3;

/// Initial backoff (ms), doubled on every retry
pub const INITIAL_BACKOFF_MS: u64 = 2000;

/// Upper bound for a server-provided `retry-after`
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

// ============================================================================
// Errors
// ============================================================================

/// Error response from a hosted API
#[derive(Debug, Error)]
#[error("{service} API error ({status}): {message}")]
pub struct ApiError {
    pub service: &'static str,
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// Whether the request may succeed if repeated
    pub fn is_retryable(&self) -> bool {
        is_retryable_status(self.status)
    }
}

/// 429 and transient 5xx responses are retried
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || matches!(status.as_u16(), 500 | 502 | 503 | 504)
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Sliding-window rate limiter with a minimum delay between requests
#[derive(Debug)]
pub struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    /// # Arguments
    /// * `max_requests` - requests allowed per `window`
    /// * `window` - window length
    /// * `min_delay` - minimum spacing between two requests
    pub fn new(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay,
            last_request: None,
        }
    }

    /// Wait until a request is allowed, then record it
    pub async fn acquire(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }

    /// Requests recorded in the current window
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        self.requests
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count()
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Retry settings for one client
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Send a request, retrying on 429/5xx and transport errors.
///
/// `build` is called once per attempt because a `RequestBuilder` is consumed by
/// `send`. `extract_message` pulls a readable message out of an error body.
///
/// # Returns
/// The response body of the first successful attempt
pub async fn send_with_retry<F>(
    service: &'static str,
    policy: &RetryPolicy,
    limiter: Option<&Mutex<RateLimiter>>,
    build: F,
    extract_message: fn(&str) -> Option<String>,
) -> Result<String>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..=policy.max_retries {
        if let Some(limiter) = limiter {
            limiter.lock().await.acquire().await;
        }

        let (status, retry_after, body) = match receive(build()).await {
            Ok(received) => received,
            Err((step, e)) => {
                let error = anyhow::anyhow!("Failed to {} {} request: {}", step, service, e);
                if attempt < policy.max_retries {
                    let backoff = policy.backoff(attempt);
                    tracing::warn!(
                        "{:#}, retrying in {:?} (attempt {}/{})",
                        error,
                        backoff,
                        attempt + 1,
                        policy.max_retries
                    );
                    last_error = Some(error);
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                last_error = Some(error);
                break;
            }
        };

        if status.is_success() {
            return Ok(body);
        }

        let error = ApiError {
            service,
            status,
            message: extract_message(&body).unwrap_or(body),
        };

        if !error.is_retryable() {
            return Err(error.into());
        }

        if attempt < policy.max_retries {
            let backoff = retry_after.unwrap_or_else(|| policy.backoff(attempt));
            tracing::warn!(
                "{} returned {}, backing off {:?} (attempt {}/{})",
                service,
                status,
                backoff,
                attempt + 1,
                policy.max_retries
            );
            last_error = Some(error.into());
            tokio::time::sleep(backoff).await;
        } else {
            last_error = Some(error.into());
        }
    }

    Err(last_error.unwrap_or_else(|| {
        anyhow::anyhow!("{} request failed after {} retries", service, policy.max_retries)
    }))
}

/// Send and read the whole body; transport errors carry the failed step
async fn receive(
    request: RequestBuilder,
) -> std::result::Result<(StatusCode, Option<Duration>, String), (&'static str, reqwest::Error)> {
    let response = request.send().await.map_err(|e| ("send", e))?;
    let status = response.status();
    let retry_after = retry_after(&response);
    let body = response.text().await.map_err(|e| ("read", e))?;
    Ok((status, retry_after, body))
}

/// `retry-after` in whole seconds, capped
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(2000));
        assert_eq!(policy.backoff(1), Duration::from_millis(4000));
        assert_eq!(policy.backoff(2), Duration::from_millis(8000));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("3600"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError {
            service: "Voyage",
            status: StatusCode::UNAUTHORIZED,
            message: "invalid key".to_string(),
        };
        assert_eq!(err.to_string(), "Voyage API error (401 Unauthorized): invalid key");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limiter_records_requests() {
        let mut limiter = RateLimiter::new(10, Duration::from_secs(60), Duration::ZERO);
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.in_window(), 2);
    }

    #[tokio::test]
    async fn test_rate_limiter_min_delay() {
        let mut limiter = RateLimiter::new(10, Duration::from_secs(60), Duration::from_millis(50));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    // ------------------------------------------------------------------------
    // Retry sequences against a local server
    // ------------------------------------------------------------------------

    use crate::testing::{serve_sequence, Reply};
    use std::sync::atomic::Ordering;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    fn detail_message(body: &str) -> Option<String> {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()?
            .get("detail")?
            .as_str()
            .map(str::to_string)
    }

    async fn send(url: &str) -> Result<String> {
        let client = reqwest::Client::new();
        send_with_retry(
            "Test",
            &fast_policy(),
            None,
            || client.post(url).body("{}"),
            detail_message,
        )
        .await
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (url, hits) = serve_sequence(vec![
            Reply::new(429, r#"{"detail": "slow down"}"#),
            Reply::new(503, "unavailable"),
            Reply::new(200, r#"{"ok": true}"#),
        ])
        .await;

        let body = send(&url).await.unwrap();
        assert_eq!(body, r#"{"ok": true}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (url, hits) =
            serve_sequence(vec![Reply::new(401, r#"{"detail": "Provided API key is invalid."}"#)])
                .await;

        let err = send(&url).await.unwrap_err();
        let api = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api.status, StatusCode::UNAUTHORIZED);
        assert_eq!(api.message, "Provided API key is invalid.");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (url, hits) = serve_sequence(vec![Reply::new(500, "internal error")]).await;

        let err = send(&url).await.unwrap_err();
        let api = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, "internal error");
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_truncated_body_is_retried() {
        let (url, hits) = serve_sequence(vec![
            Reply::cut_short(200, r#"{"data": [0.1,"#),
            Reply::new(200, r#"{"data": []}"#),
        ])
        .await;

        let body = send(&url).await.unwrap();
        assert_eq!(body, r#"{"data": []}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let (url, hits) = serve_sequence(vec![Reply::cut_short(200, r#"{"data": [0.1,"#)]).await;

        let err = send(&url).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read Test request"));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
