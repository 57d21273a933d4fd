//! Webhook delivery with exponential-backoff retry.
//!
//! [`WebhookDelivery`] issues the HTTP call configured on a `webhook`
//! transition action. Any response status of 400 or above is a failure.
//! A request may ask for up to three retries, spaced 1 s, 2 s and 4 s apart.

use std::collections::BTreeMap;
use std::time::Duration;

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
pub const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server answered with a status of 400 or above.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),
}

// ---------------------------------------------------------------------------
// WebhookRequest
// ---------------------------------------------------------------------------

/// A fully rendered webhook call.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub url: String,
    /// Upper-case HTTP method.
    pub method: String,
    pub headers: BTreeMap<String, String>,
    /// JSON body; omitted from the request when `None`.
    pub body: Option<serde_json::Value>,
    /// Extra attempts after the first failure, capped at three.
    pub retries: u8,
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

pub struct WebhookDelivery {
    client: reqwest::Client,
}

impl WebhookDelivery {
    /// Create a delivery service whose client enforces `request_timeout`
    /// per attempt.
    pub fn new(request_timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Send the request, retrying on failure as the request allows.
    ///
    /// Returns the response status of the first successful attempt, or the
    /// error of the last attempt.
    pub async fn send(&self, request: &WebhookRequest) -> Result<u16, WebhookError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| WebhookError::InvalidMethod(request.method.clone()))?;
        let retries = usize::from(request.retries).min(RETRY_DELAYS_SECS.len());

        let mut attempt = 0;
        loop {
            match self.try_send(method.clone(), request).await {
                Ok(status) => return Ok(status),
                Err(e) if attempt < retries => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url = %request.url,
                        error = %e,
                        "Webhook attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(RETRY_DELAYS_SECS[attempt])).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(url = %request.url, error = %e, "Webhook delivery failed");
                    return Err(e);
                }
            }
        }
    }

    /// Execute a single request and check the response status.
    async fn try_send(
        &self,
        method: reqwest::Method,
        request: &WebhookRequest,
    ) -> Result<u16, WebhookError> {
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let status = builder.send().await?.status().as_u16();
        if status >= 400 {
            return Err(WebhookError::HttpStatus(status));
        }
        Ok(status)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve one canned status line per accepted connection.
    async fn serve(statuses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for status in statuses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/hook")
    }

    fn request(url: String, retries: u8) -> WebhookRequest {
        WebhookRequest {
            url,
            method: "POST".to_string(),
            headers: BTreeMap::from([("X-Source".to_string(), "triage".to_string())]),
            body: Some(serde_json::json!({"incident": "INC-000001"})),
            retries,
        }
    }

    #[tokio::test]
    async fn success_returns_status() {
        let url = serve(vec!["204 No Content"]).await;
        let delivery = WebhookDelivery::new(Duration::from_secs(5)).unwrap();
        assert_eq!(delivery.send(&request(url, 0)).await.unwrap(), 204);
    }

    #[tokio::test]
    async fn status_400_or_above_is_a_failure() {
        let url = serve(vec!["400 Bad Request"]).await;
        let delivery = WebhookDelivery::new(Duration::from_secs(5)).unwrap();
        assert_matches!(
            delivery.send(&request(url, 0)).await,
            Err(WebhookError::HttpStatus(400))
        );
    }

    #[tokio::test]
    async fn retry_recovers_after_server_error() {
        let url = serve(vec!["503 Service Unavailable", "200 OK"]).await;
        let delivery = WebhookDelivery::new(Duration::from_secs(5)).unwrap();
        assert_eq!(delivery.send(&request(url, 1)).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn invalid_method_is_rejected_before_sending() {
        let delivery = WebhookDelivery::new(Duration::from_secs(5)).unwrap();
        let mut req = request("http://127.0.0.1:9/".to_string(), 0);
        req.method = "NOT A METHOD".to_string();
        assert_matches!(delivery.send(&req).await, Err(WebhookError::InvalidMethod(_)));
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }
}
