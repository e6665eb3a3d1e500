/// LLM Client: the single point of entry for all model calls in the pipeline.
///
/// ARCHITECTURAL RULE: classifiers never talk HTTP. They hand a `StructuredPrompt`
/// to `LlmClient::submit` and get raw text back; retry, backoff and per-attempt
/// timeouts live here and nowhere else.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;
pub mod retry;
#[cfg(test)]
pub mod testing;

use retry::{RetryPolicy, RetryStep};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Could not decode API response: {0}")]
    Decode(String),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LlmError> },
}

impl LlmError {
    /// Rate limits, 5xx, timeouts and network failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => !e.is_builder(),
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Timeout { .. } | LlmError::Decode(_) | LlmError::EmptyContent => true,
            LlmError::RetriesExhausted { .. } => false,
        }
    }

    /// Errors that must halt the whole run (auth, malformed request, ...).
    /// An exhausted retry budget is not fatal: the batch becomes a partial failure.
    pub fn is_fatal(&self) -> bool {
        match self {
            LlmError::RetriesExhausted { .. } => false,
            other => !other.is_transient(),
        }
    }
}

/// A rendered instruction plus the batch payload it embeds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredPrompt {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

/// Raw model output. Expected, but not guaranteed, to contain the requested JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl StructuredResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// The JSON array embedded in the text, with code fences and prose trimmed off.
    pub fn json_array(&self) -> Option<&str> {
        extract_json_array(&self.text)
    }
}

/// One attempt against a model provider. No retries at this level.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &StructuredPrompt) -> Result<StructuredResponse, LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Anthropic Messages API backend
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl MessagesResponse {
    /// Extracts the text content from the first text block.
    fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl AnthropicBackend {
    pub fn new(
        api_key: String,
        base_url: &str,
        model: String,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            model,
        })
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    async fn complete(&self, request: &StructuredPrompt) -> Result<StructuredResponse, LlmError> {
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        let text = parsed.text().ok_or(LlmError::EmptyContent)?;

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            parsed.usage.input_tokens, parsed.usage.output_tokens
        );

        Ok(StructuredResponse {
            text: text.to_string(),
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// The LLM client shared by every classifier. Stateless between calls: the only
/// mutable state is the retry bookkeeping scoped to one `submit`.
#[derive(Clone)]
pub struct LlmClient {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            backend,
            policy,
            timeout,
        }
    }

    /// Submits one request, retrying transient failures with exponential backoff.
    ///
    /// Each attempt is bounded by the client timeout; an attempt that overruns it
    /// counts as a transient failure.
    pub async fn submit(&self, request: &StructuredPrompt) -> Result<StructuredResponse, LlmError> {
        let mut state = self.policy.start();

        loop {
            let outcome = match tokio::time::timeout(self.timeout, self.backend.complete(request)).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout {
                    seconds: self.timeout.as_secs(),
                }),
            };

            match outcome {
                Ok(response) => {
                    if state.attempts() > 0 {
                        debug!("LLM call succeeded after {} retries", state.attempts());
                    }
                    return Ok(response);
                }
                Err(error) => match state.on_failure(error) {
                    RetryStep::RetryAfter(delay) => {
                        warn!(
                            "LLM call attempt {} failed ({}), retrying after {}ms...",
                            state.attempts(),
                            state.last_error().unwrap_or("unknown error"),
                            delay.as_millis()
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryStep::GiveUp(error) => return Err(error),
                },
            }
        }
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

/// Locates the outermost JSON array in model output, tolerating fences and
/// leading or trailing prose. Returns `None` when no bracket pair exists.
pub fn extract_json_array(text: &str) -> Option<&str> {
    let text = strip_json_fences(text);
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}
