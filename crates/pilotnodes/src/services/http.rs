use async_trait::async_trait;
use pilotcore::services::{HttpClient, HttpRequest, HttpResponse};
use pilotcore::CollaboratorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry with exponential backoff for retryable collaborator failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        Duration::from_millis((self.delay_ms as f64 * factor) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 200,
            backoff_multiplier: 2.0,
        }
    }
}

/// Outbound HTTP through reqwest
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Unavailable(format!("http client: {}", e)))?;
        Ok(Self { client, retry })
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse, CollaboratorError> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| CollaboratorError::Evaluation(format!("invalid method: {}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout
            } else {
                CollaboratorError::Network(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CollaboratorError::Network(format!("failed to read response: {}", e)))?;

        // Surface throttling and server errors so they can be retried
        if status == 429 || status >= 500 {
            return Err(CollaboratorError::Rejected {
                status,
                message: body,
            });
        }
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, CollaboratorError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(response) => return Ok(response),
                Err(CollaboratorError::Rejected { status, message })
                    if attempt + 1 >= attempts =>
                {
                    // Out of retries: hand back the final response as is
                    return Ok(HttpResponse {
                        status,
                        body: message,
                    });
                }
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        url = %request.url,
                        attempt = attempt + 1,
                        "Retrying HTTP request in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 4,
            delay_ms: 100,
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn invalid_method_is_not_retried() {
        let client = ReqwestHttpClient::new(Duration::from_secs(1), RetryPolicy::default()).unwrap();
        let err = client
            .request(HttpRequest {
                method: "NOT A METHOD".into(),
                url: "http://localhost:1".into(),
                headers: Default::default(),
                body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Evaluation(_)));
    }

    /// Serve one scripted status per connection and count the requests
    async fn scripted_server(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/items", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses[n.min(statuses.len() - 1)];

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buf[..read]),
                    }
                }

                let body = format!("attempt {}", n + 1);
                let response = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (url, hits)
    }

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            method: "GET".into(),
            url: url.into(),
            headers: Default::default(),
            body: None,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let (url, hits) = scripted_server(vec![503, 503, 200]).await;
        let client = ReqwestHttpClient::new(Duration::from_secs(5), fast_retry(3)).unwrap();

        let response = client.request(get(&url)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "attempt 3");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_response() {
        let (url, hits) = scripted_server(vec![503]).await;
        let client = ReqwestHttpClient::new(Duration::from_secs(5), fast_retry(3)).unwrap();

        let response = client.request(get(&url)).await.unwrap();
        assert_eq!(response.status, 503);
        assert!(!response.is_success());
        assert_eq!(response.body, "attempt 3");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits) = scripted_server(vec![404, 200]).await;
        let client = ReqwestHttpClient::new(Duration::from_secs(5), fast_retry(3)).unwrap();

        let response = client.request(get(&url)).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
