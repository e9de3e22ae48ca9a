//! Shared HTTP plumbing for live sources.
//!
//! One `reqwest::Client` per live source. Transient failures (429, 408, 5xx,
//! connect/timeout) are retried with capped exponential backoff; the adapter's
//! own timeout still bounds the whole call.

use std::time::Duration;

use crate::error::UpstreamError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 1_000,
        }
    }
}

fn retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    Duration::from_millis(base)
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    policy: RetryPolicy,
    label: &'static str,
}

impl HttpClient {
    pub fn new(label: &'static str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("{}: falling back to default HTTP client: {}", label, e);
                reqwest::Client::new()
            });
        Self {
            client,
            policy: RetryPolicy::default(),
            label,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// GET `url` with query parameters and decode the body as JSON.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, UpstreamError> {
        self.execute(|| self.client.get(url).query(query)).await
    }

    /// POST a JSON body with extra headers and decode the response as JSON.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.execute(|| {
            headers
                .iter()
                .fold(self.client.post(url).json(body), |req, (name, value)| {
                    req.header(*name, value.as_str())
                })
        })
        .await
    }

    async fn execute(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, UpstreamError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = UpstreamError::Transport("request was never sent".to_string());

        for attempt in 1..=attempts {
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response.text().await?;
                        return Ok(serde_json::from_str(&body)?);
                    }
                    let message = response.text().await.unwrap_or_default();
                    last_error = UpstreamError::Status {
                        status: status.as_u16(),
                        message: truncate(&message, 200),
                    };
                }
                Err(err) => last_error = UpstreamError::from(err),
            }
            if !last_error.is_retryable() {
                return Err(last_error);
            }

            if attempt < attempts {
                let delay = retry_delay(attempt, &self.policy);
                log::debug!(
                    "{}: retry {}/{} after {} (sleep {:?})",
                    self.label,
                    attempt,
                    attempts,
                    last_error,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Number from a JSON field that upstreams send either as a number or a string.
pub(crate) fn json_f64(value: &serde_json::Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn json_str(value: &serde_json::Value, key: &str) -> Option<String> {
    match value.get(key)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(retry_delay(1, &policy), Duration::from_millis(200));
        assert_eq!(retry_delay(2, &policy), Duration::from_millis(400));
        assert_eq!(retry_delay(10, &policy), Duration::from_millis(1_000));
    }

    #[test]
    fn test_json_field_helpers() {
        let v = serde_json::json!({ "LAT": "51.9", "SPEED": 124, "NAME": "  ", "MMSI": 244 });
        assert_eq!(json_f64(&v, "LAT"), Some(51.9));
        assert_eq!(json_f64(&v, "SPEED"), Some(124.0));
        assert_eq!(json_f64(&v, "MISSING"), None);
        assert_eq!(json_str(&v, "NAME"), None);
        assert_eq!(json_str(&v, "MMSI").as_deref(), Some("244"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = HttpClient::new("test", Duration::from_millis(500)).with_policy(RetryPolicy {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        });
        let err = client
            .get_json("http://127.0.0.1:1/nothing", &[])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    /// Local server answering every request with `status_line` and an empty
    /// JSON body. Returns its URL and a request count.
    fn status_server(status_line: &'static str) -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::io::{Read, Write};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/", listener.local_addr().expect("addr"));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    continue;
                };
                let mut request = Vec::new();
                let mut buffer = [0u8; 4096];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buffer) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buffer[..n]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{{}}",
                    status_line
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        (url, hits)
    }

    fn quick_retries(max_attempts: u32) -> HttpClient {
        HttpClient::new("test", Duration::from_millis(2_000)).with_policy(RetryPolicy {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        })
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let (url, hits) = status_server("503 Service Unavailable");
        let err = quick_retries(3).get_json(&url, &[]).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 503, .. }));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let (url, hits) = status_server("401 Unauthorized");
        let err = quick_retries(3).get_json(&url, &[]).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 401, .. }));
        assert!(!err.is_retryable());
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
