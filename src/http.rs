//! Throttled HTTP GET returning raw bytes.
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} returned {status}")]
    Status { url: String, status: StatusCode },
    #[error("GET {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// `GET url -> body bytes`. Non-2xx responses are [`FetchError::Status`]; there is no retry.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// A client that leaves at least `min_interval` between the end of one
/// request and the start of the next.
pub struct ThrottledClient {
    http: Client,
    min_interval: Duration,
    last_done: Mutex<Option<Instant>>,
}

impl fmt::Debug for ThrottledClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottledClient")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}

impl ThrottledClient {
    pub fn new(user_agent: &str, min_interval: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            http,
            min_interval,
            last_done: Mutex::new(None),
        })
    }

    async fn send(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let res = self.http.get(url).send().await.map_err(transport)?;
        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = res.bytes().await.map_err(transport)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl HttpFetcher for ThrottledClient {
    #[instrument(skip_all, fields(url = %url))]
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        // Held across the request so concurrent callers queue up behind each other.
        let mut last_done = self.last_done.lock().await;
        if let Some(prev) = *last_done {
            let wait = self.min_interval.saturating_sub(prev.elapsed());
            if !wait.is_zero() {
                debug!(wait_ms = wait.as_millis() as u64, "throttling request");
                tokio::time::sleep(wait).await;
            }
        }
        let result = self.send(url).await;
        *last_done = Some(Instant::now());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_expose_code() {
        let err = FetchError::Status {
            url: "https://blog.example.com/posts/1".into(),
            status: StatusCode::NOT_FOUND,
        };
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error_and_still_throttles() {
        let client = ThrottledClient::new("devio-index-test", Duration::from_millis(200)).unwrap();
        let first = client.get("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(first, FetchError::Transport { .. }));

        let started = std::time::Instant::now();
        let _ = client.get("http://127.0.0.1:9/").await;
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
