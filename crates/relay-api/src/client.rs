//! Chat-completions client for OpenAI-compatible endpoints.

use std::time::Duration;

use relay_types::{ApiError, ChatRequest, ChatResponse};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::retry::{RetryConfig, calculate_delay, is_retryable};

/// Upper bound for one HTTP exchange, including reading the body.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Client for `POST {base_url}/chat/completions`.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    retry_config: RetryConfig,
}

impl ChatClient {
    /// Create a new client. An empty `api_key` sends no `Authorization` header.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry_config: RetryConfig::default(),
        })
    }

    /// Set the retry configuration for transient errors (429, 5xx, network).
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one request and decode the complete reply.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.headers()?;
        let body = serde_json::to_string(request).map_err(|e| ApiError::BadRequest {
            message: format!("Failed to serialize request: {e}"),
        })?;

        let max_retries = self.retry_config.max_retries;
        let mut attempt = 0;
        loop {
            tracing::debug!("POST {url} (attempt {}/{})", attempt + 1, max_retries + 1);

            let result = self
                .http
                .post(&url)
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await;

            let (err, retry_after) = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = response.text().await.map_err(|e| transport_error(&e))?;
                        return serde_json::from_str(&text)
                            .map_err(|e| ApiError::Decode(format!("{e}: {}", snippet(&text))));
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body_text = response.text().await.unwrap_or_default();
                    (
                        classify_error(status.as_u16(), &body_text, retry_after),
                        retry_after,
                    )
                }
                Err(e) => (transport_error(&e), None),
            };

            if !is_retryable(&err) || attempt >= max_retries {
                return Err(err);
            }

            let delay = calculate_delay(&self.retry_config, attempt, retry_after);
            tracing::warn!(
                "Retryable API error (attempt {}/{}): {err}. Retrying in {delay}ms...",
                attempt + 1,
                max_retries,
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }

    fn headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !self.api_key.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|_| {
                ApiError::Auth {
                    message: "Invalid API key format".into(),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

fn transport_error(e: &reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(e.to_string())
    }
}

fn snippet(body: &str) -> &str {
    relay_types::truncate_str(body, 200)
}

/// Parse the `retry-after` header value as seconds and convert to milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| (secs * 1000.0) as u64)
}

/// Classify an HTTP error response into a typed ApiError.
fn classify_error(status: u16, body: &str, retry_after: Option<u64>) -> ApiError {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }
    #[derive(serde::Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.to_string());

    match status {
        401 | 403 => ApiError::Auth { message },
        400 | 404 | 422 => ApiError::BadRequest { message },
        429 => ApiError::RateLimited {
            retry_after_ms: retry_after,
        },
        503 | 529 => ApiError::Unavailable { message },
        _ => ApiError::Server { status, message },
    }
}
