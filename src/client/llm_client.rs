//! Chat-completions client for OpenAI-compatible endpoints.
//!
//! Epistemic foundation:
//! - K_i: OpenAI API schema is the de facto standard
//! - K_i: Aggregators (OpenRouter) and on-prem (vLLM, Ollama) all support it
//! - B_i: API will respond within timeout (might fail)
//! - B_i: Response will be valid JSON (might fail)
//! - I^B: Network availability unknowable → bounded transport retry

use crate::client::RateLimiter;
use crate::client::rate_limiter::MAX_BACKOFF_SECS;
use crate::models::{ConfigError, LabelrunError, ResolvedService, Result, ServiceError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Response from a completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,
    /// Model used (may differ from requested)
    pub model: String,
    /// Input tokens
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
    /// Request duration
    pub duration: Duration,
}

/// Client for one OpenAI-compatible endpoint.
///
/// Features:
/// - Rate limit handling with adaptive backoff
/// - Bounded transport retry (`max_retries` attempts in total)
/// - Token accounting
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
    max_retries: u32,
    rate_limiter: Arc<RateLimiter>,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
    total_requests: AtomicU64,
}

impl LlmClient {
    /// Create a client from resolved service settings.
    pub fn new(service: &ResolvedService, rate_limiter: Option<Arc<RateLimiter>>) -> Result<Self> {
        let timeout = Duration::from_secs(service.timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(Self::headers(service)?)
            .build()
            .map_err(|e| LabelrunError::Service(ServiceError::Network(e)))?;

        Ok(Self {
            client,
            base_url: service.base_url.clone(),
            model: service.model.clone(),
            max_tokens: service.max_tokens,
            temperature: service.temperature,
            timeout,
            max_retries: service.max_retries.max(1),
            rate_limiter: rate_limiter.unwrap_or_else(|| Arc::new(RateLimiter::new())),
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
        })
    }

    /// Build default headers for every request.
    fn headers(service: &ResolvedService) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        if let Some(api_key) = &service.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
                ConfigError::Invalid("API key contains characters not allowed in a header".into())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("labelrun"));

        for (key, value) in &service.headers {
            let name = HeaderName::try_from(key.as_str())
                .map_err(|_| ConfigError::Invalid(format!("invalid header name '{key}'")))?;
            let val = HeaderValue::from_str(value)
                .map_err(|_| ConfigError::Invalid(format!("invalid value for header '{key}'")))?;
            headers.insert(name, val);
        }

        Ok(headers)
    }

    /// Model requested by this client.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Base URL of the endpoint.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Complete a chat request.
    ///
    /// B_i(API available) → Result
    /// B_i(valid response) → Result
    /// I^B(rate limits) → adaptive backoff
    ///
    /// Only transient errors are retried; every failure, including a hostile
    /// `retry-after` header, comes back as a `ServiceError`.
    pub async fn complete(
        &self,
        messages: Vec<Message>,
    ) -> std::result::Result<CompletionResponse, ServiceError> {
        let start = Instant::now();
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error: Option<ServiceError> = None;

        for attempt in 0..self.max_retries {
            self.rate_limiter.wait_if_needed(&self.model).await;
            self.total_requests.fetch_add(1, Ordering::Relaxed);

            let error = match self.send_once(&url, &request).await {
                Ok(body) => return self.into_completion(body, start),
                Err(e) => e,
            };

            if !error.is_transient() {
                return Err(error);
            }
            if attempt + 1 < self.max_retries {
                let delay = retry_delay(&error, attempt);
                debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
            last_error = Some(error);
        }

        Err(match last_error {
            Some(e) if self.max_retries == 1 => e,
            Some(e) => ServiceError::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: e.to_string(),
            },
            None => ServiceError::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: "Unknown error".to_string(),
            },
        })
    }

    /// One HTTP round trip, with the status mapped onto `ServiceError`.
    async fn send_once(
        &self,
        url: &str,
        request: &ChatCompletionRequest<'_>,
    ) -> std::result::Result<ChatCompletionResponse, ServiceError> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout(self.timeout)
                } else {
                    ServiceError::Network(e)
                }
            })?;

        let status = response.status().as_u16();
        self.rate_limiter
            .record_request(&self.model, status, response.headers());

        match status {
            429 => {
                return Err(ServiceError::RateLimited {
                    retry_after_secs: retry_after_secs(response.headers()),
                });
            }
            401 | 403 => return Err(ServiceError::AuthenticationFailed),
            404 => return Err(ServiceError::ModelNotFound(self.model.clone())),
            _ => {}
        }

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .map(|e| e.error.message)
                .unwrap_or(error_body);
            return Err(ServiceError::Api { status, message });
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(format!("Failed to parse response: {e}")))
    }

    fn into_completion(
        &self,
        body: ChatCompletionResponse,
        start: Instant,
    ) -> std::result::Result<CompletionResponse, ServiceError> {
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::InvalidResponse("No content in response".into()))?;

        let usage = body.usage.unwrap_or_default();
        self.total_input_tokens
            .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
        self.total_output_tokens
            .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);

        Ok(CompletionResponse {
            content,
            model: body.model.unwrap_or_else(|| self.model.clone()),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            duration: start.elapsed(),
        })
    }

    /// Complete with system and user prompts (convenience method).
    pub async fn complete_with_system(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<CompletionResponse, ServiceError> {
        let messages = vec![Message::system(system_prompt), Message::user(user_prompt)];
        self.complete(messages).await
    }

    /// Get total tokens tracked (input, output).
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }

    /// Number of HTTP requests sent, retries included.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Probe the endpoint's `/models` listing.
    ///
    /// B_i: endpoint is usable if the listing answers 2xx
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let probe = self
            .client
            .get(format!("{}/models", self.base_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        let latency_ms = Some(start.elapsed().as_millis() as u64);

        let (status, latency_ms, error) = match probe {
            Ok(r) if r.status().is_success() => (HealthStatus::Healthy, latency_ms, None),
            Ok(r) => (
                HealthStatus::Unhealthy,
                latency_ms,
                Some(format!("HTTP {}", r.status().as_u16())),
            ),
            Err(e) => (HealthStatus::Unreachable, None, Some(e.to_string())),
        };

        HealthCheckResult {
            status,
            latency_ms,
            error,
        }
    }
}

/// `retry-after` in seconds; absent, negative or non-finite values fall back to 1s.
fn retry_after_secs(headers: &HeaderMap) -> f64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| s.min(MAX_BACKOFF_SECS))
        .unwrap_or(1.0)
}

/// Exponential backoff, capped at `MAX_BACKOFF_SECS`.
fn backoff(attempt: u32) -> Duration {
    let secs = 2u64
        .checked_pow(attempt)
        .map_or(MAX_BACKOFF_SECS, |s| (s as f64).min(MAX_BACKOFF_SECS));
    Duration::from_secs_f64(secs)
}

/// Delay before the next attempt: the server's hint when usable, else backoff.
fn retry_delay(error: &ServiceError, attempt: u32) -> Duration {
    error
        .retry_after()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| Duration::from_secs_f64(s.min(MAX_BACKOFF_SECS)))
        .unwrap_or_else(|| backoff(attempt))
}

/// Health check result.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    /// Latency in milliseconds (if reachable)
    pub latency_ms: Option<u64>,
    /// Error message (if unhealthy or unreachable)
    pub error: Option<String>,
}

/// Health status of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unreachable,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}
