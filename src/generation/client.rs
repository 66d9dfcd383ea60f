//! Generation transports
//!
//! Two implementations of [`GenerationClient`]:
//! - `HttpGenerationClient`: OpenAI-compatible `/chat/completions` over reqwest (production)
//! - `MockClient`: scripted responses keyed on the request payload (testing)
//!
//! `HttpGenerationClient` retries timeouts, 429 and 5xx responses through
//! [`RetryPolicy`].

use crate::config::GenerationSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors from generation transports.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation provider not available: {0}")]
    Unavailable(String),
    #[error("invocation failed: {0}")]
    InvocationFailed(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("response parse error: {0}")]
    ParseError(String),
}

/// One generation call: a system instruction plus the human turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub system: String,
    pub human: String,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, human: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            human: human.into(),
        }
    }
}

/// Client trait for the external generation capability.
///
/// Returns the raw response text; validation happens in the contract adapter.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

impl GenerationError {
    /// Transient failures worth another attempt: timeouts and an
    /// unreachable or overloaded provider.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded retries with exponential backoff for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_settings(settings: &GenerationSettings) -> Self {
        Self::new(settings.max_retries, Duration::from_millis(settings.retry_backoff_ms))
    }

    /// Delay before retry number `retry` (1-based), with up to 10% jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor).min(MAX_BACKOFF);
        let jitter_cap = (delay.as_millis() as u64 / 10).max(1);
        delay + Duration::from_millis(jitter() % jitter_cap)
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error,
    /// or the retries are used up. The last error is returned.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> Result<String, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, GenerationError>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_retryable() && retries < self.max_retries => {
                    retries += 1;
                    let wait = self.backoff(retries);
                    warn!(
                        retry = retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "generation attempt failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&GenerationSettings::default())
    }
}

fn jitter() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % 1000)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// HttpGenerationClient
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat completions client.
pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpGenerationClient {
    /// Build a client from settings. The API key is read from the
    /// environment variable named by `api_key_env`, if set.
    pub fn new(settings: &GenerationSettings) -> Result<Self, GenerationError> {
        let endpoint = settings
            .endpoint
            .clone()
            .ok_or_else(|| GenerationError::Unavailable("no generation endpoint configured".into()))?;
        let model = settings
            .model
            .clone()
            .ok_or_else(|| GenerationError::Unavailable("no generation model configured".into()))?;
        let timeout = Duration::from_secs(settings.request_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            api_key: std::env::var(&settings.api_key_env).ok(),
            temperature: settings.temperature,
            timeout,
            retry: RetryPolicy::from_settings(settings),
        })
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

impl HttpGenerationClient {
    /// One POST to the provider. Timeouts, connection failures, 429 and 5xx
    /// come back as retryable errors.
    async fn send_once(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.human,
                },
            ],
            temperature: self.temperature,
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout)
            } else if e.is_connect() {
                GenerationError::Unavailable(e.to_string())
            } else {
                GenerationError::InvocationFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(GenerationError::Unavailable(format!("provider returned {}", status)));
        }
        if !status.is_success() {
            return Err(GenerationError::InvocationFailed(format!(
                "provider returned {}",
                status
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::ParseError(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::ParseError("response has no choices".into()))
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.retry.run(|| self.send_once(request)).await
    }
}

// ---------------------------------------------------------------------------
// MockClient
// ---------------------------------------------------------------------------

struct Rule {
    needle: String,
    reply: Result<String, GenerationError>,
}

/// Mock client for testing: returns scripted responses.
///
/// Rules are matched in registration order against the human payload;
/// the first rule whose needle occurs in it wins.
pub struct MockClient {
    available: bool,
    rules: Vec<Rule>,
    fallback: Option<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockClient {
    /// Create a mock client that reports as available.
    pub fn available() -> Self {
        Self {
            available: true,
            rules: Vec::new(),
            fallback: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Create a mock client whose every call fails with `Unavailable`.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::available()
        }
    }

    /// Reply with `response` when the human payload contains `needle`.
    pub fn with_response(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Ok(response.into()),
        });
        self
    }

    /// Fail with `error` when the human payload contains `needle`.
    pub fn with_failure(mut self, needle: impl Into<String>, error: GenerationError) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Err(error),
        });
        self
    }

    /// Reply used when no rule matches.
    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationClient for MockClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.available {
            return Err(GenerationError::Unavailable(
                "mock client configured as unavailable".to_string(),
            ));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let rule = self
            .rules
            .iter()
            .find(|rule| request.human.contains(&rule.needle));
        match (rule, &self.fallback) {
            (Some(rule), _) => rule.reply.clone(),
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(GenerationError::InvocationFailed(
                "no mock response for request".to_string(),
            )),
        }
    }
}
