//! LLM chat-completion client.
//!
//! [`ChatCompletion`] is the seam the planner and synthesizer depend on.
//! [`OpenAiClient`] implements it against any OpenAI-compatible
//! `/chat/completions` endpoint with retry/backoff and a consecutive-failure
//! circuit breaker. Callers treat every error as "LLM unavailable" and fall
//! back to deterministic paths.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use awardsearch_shared::{AwardSearchError, LlmConfig, Result};

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// One chat message (`system`, `user`, or `assistant`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// A completion request. Unset options fall back to client defaults.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Text completion over a list of chat messages.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn chat_completion(&self, request: ChatRequest) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

#[derive(Debug)]
struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remaining open time, if the circuit currently rejects calls.
    fn open_for(&self) -> Option<Duration> {
        let state = self.lock();
        state
            .open_until
            .and_then(|until| until.checked_duration_since(Instant::now()))
    }

    fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            warn!(
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "llm circuit opened"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

/// Client for an OpenAI-compatible chat completions API.
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    default_model: String,
    max_attempts: u32,
    retry_base: Duration,
    breaker: CircuitBreaker,
}

impl OpenAiClient {
    /// Build a client from `[llm]` config and a resolved API key.
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AwardSearchError::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            default_model: config.default_model.clone(),
            max_attempts: config.max_retries.max(1),
            retry_base: Duration::from_millis(config.retry_base_ms),
            breaker: CircuitBreaker::new(
                config.breaker_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
        })
    }

    /// Backoff before attempt `attempt + 1`: `base * 2^attempt`, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base
            .checked_mul(1u32 << attempt.min(16))
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// One HTTP round trip. The flag on the error says whether a retry may help.
    async fn attempt(&self, body: &CompletionBody<'_>) -> std::result::Result<String, (bool, AwardSearchError)> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let err = if e.is_timeout() {
                    AwardSearchError::Llm(format!("request timed out: {e}"))
                } else {
                    AwardSearchError::Llm(format!("request failed: {e}"))
                };
                (true, err)
            })?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
            let detail = response.text().await.unwrap_or_default();
            return Err((
                retryable,
                AwardSearchError::Llm(format!(
                    "HTTP {status}: {}",
                    detail.chars().take(200).collect::<String>()
                )),
            ));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| (false, AwardSearchError::parse(format!("malformed completion: {e}"))))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| (false, AwardSearchError::Llm("empty completion".into())))
    }
}

#[async_trait]
impl ChatCompletion for OpenAiClient {
    #[instrument(skip_all, fields(messages = request.messages.len()))]
    async fn chat_completion(&self, request: ChatRequest) -> Result<String> {
        if let Some(remaining) = self.breaker.open_for() {
            return Err(AwardSearchError::Llm(format!(
                "circuit open, retry in {}s",
                remaining.as_secs().max(1)
            )));
        }

        let body = CompletionBody {
            model: request.model.as_deref().unwrap_or(&self.default_model),
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut attempt = 0;
        loop {
            match self.attempt(&body).await {
                Ok(text) => {
                    self.breaker.record_success();
                    return Ok(text);
                }
                Err((true, e)) if attempt + 1 < self.max_attempts => {
                    let wait = self.backoff(attempt);
                    debug!(attempt, wait_ms = wait.as_millis() as u64, error = %e, "retrying completion");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err((_, e)) => {
                    self.breaker.record_failure();
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            max_retries: 3,
            retry_base_ms: 1,
            breaker_threshold: 2,
            breaker_cooldown_secs: 60,
            ..LlmConfig::default()
        }
    }

    fn completion(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": text } }]
        }))
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            temperature: Some(0.3),
            ..ChatRequest::default()
        }
    }

    #[tokio::test]
    async fn sends_openai_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "temperature": 0.3,
                "messages": [{ "role": "system", "content": "be brief" }, { "role": "user", "content": "hi" }]
            })))
            .respond_with(completion("hello"))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::new(&config(&format!("{}/v1", server.uri())), "sk-test").unwrap();
        assert_eq!(client.chat_completion(request()).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(completion("recovered"))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(&config(&server.uri()), "sk-test").unwrap();
        assert_eq!(client.chat_completion(request()).await.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::new(&config(&server.uri()), "sk-bad").unwrap();
        let err = client.chat_completion(request()).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(&config(&server.uri()), "sk-test").unwrap();
        assert!(client.chat_completion(request()).await.is_err());
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(2)
            .mount(&server)
            .await;

        let client = OpenAiClient::new(&config(&server.uri()), "sk-test").unwrap();
        assert!(client.chat_completion(request()).await.is_err());
        assert!(client.chat_completion(request()).await.is_err());

        // Third call fails fast without reaching the server.
        let err = client.chat_completion(request()).await.unwrap_err();
        assert!(err.to_string().contains("circuit open"));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let mut cfg = config("http://unused");
        cfg.retry_base_ms = 2_000;
        let client = OpenAiClient::new(&cfg, "k").unwrap();
        assert_eq!(client.backoff(0), Duration::from_secs(2));
        assert_eq!(client.backoff(1), Duration::from_secs(4));
        assert_eq!(client.backoff(2), Duration::from_secs(8));
        assert_eq!(client.backoff(3), MAX_BACKOFF);
    }
}
