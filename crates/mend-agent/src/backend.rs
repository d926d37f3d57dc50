//! Generation backends
//!
//! [`HttpBackend`] speaks to a real service. [`MockBackend`] answers from
//! canned rules and counts calls, which is how the pipeline tests prove that
//! cache hits never reach the network.

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::types::{
    AnthropicRequest, AnthropicResponse, ChatCompletionRequest, ChatCompletionResponse,
    GenerationRequest,
};
use async_trait::async_trait;
use mend_core::config::{GenerationConfig, GenerationProvider};
use mend_core::{MendError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_COMPATIBLE_URL: &str = "https://router.huggingface.co/v1/chat/completions";

// Retry configuration for 429 / 5xx responses
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 30;

/// Something that turns a request into generated text
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// HTTP backend for Anthropic or OpenAI-compatible services
pub struct HttpBackend {
    provider: GenerationProvider,
    endpoint: String,
    api_key_env: String,
    max_retries: u32,
    http: reqwest::Client,
    breaker: CircuitBreaker,
}

impl HttpBackend {
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| {
            match config.provider {
                GenerationProvider::Anthropic => ANTHROPIC_API_URL,
                GenerationProvider::OpenaiCompatible => OPENAI_COMPATIBLE_URL,
            }
            .to_string()
        });

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MendError::Generation(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            provider: config.provider,
            endpoint,
            api_key_env: config.api_key_env.clone(),
            max_retries: config.max_retries,
            http,
            breaker: CircuitBreaker::default(),
        })
    }

    fn build_request(&self, request: &GenerationRequest, api_key: &str) -> reqwest::RequestBuilder {
        let builder = self.http.post(&self.endpoint).header("content-type", "application/json");

        match self.provider {
            GenerationProvider::Anthropic => builder
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&AnthropicRequest {
                    model: request.model.clone(),
                    max_tokens: request.max_tokens,
                    temperature: request.temperature,
                    messages: request.messages.clone(),
                }),
            GenerationProvider::OpenaiCompatible => builder
                .bearer_auth(api_key)
                .json(&ChatCompletionRequest {
                    model: request.model.clone(),
                    messages: request.messages.clone(),
                    max_tokens: request.max_tokens,
                    temperature: request.temperature,
                }),
        }
    }

    async fn extract_text(&self, response: reqwest::Response) -> Result<String> {
        match self.provider {
            GenerationProvider::Anthropic => {
                let parsed: AnthropicResponse = response
                    .json()
                    .await
                    .map_err(|e| MendError::Generation(format!("Failed to parse response: {}", e)))?;

                if let Some(usage) = &parsed.usage {
                    tracing::debug!(
                        "Generation used {} input / {} output tokens",
                        usage.input_tokens,
                        usage.output_tokens
                    );
                }

                parsed
                    .content
                    .into_iter()
                    .find(|block| block.content_type == "text")
                    .map(|block| block.text)
                    .ok_or_else(|| MendError::Generation("No text content in response".to_string()))
            }
            GenerationProvider::OpenaiCompatible => {
                let parsed: ChatCompletionResponse = response
                    .json()
                    .await
                    .map_err(|e| MendError::Generation(format!("Failed to parse response: {}", e)))?;

                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .ok_or_else(|| MendError::Generation("No choices in response".to_string()))
            }
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        if !self.breaker.can_execute() {
            return Err(MendError::ApiLimit(format!(
                "Circuit breaker is OPEN after repeated failures. Retry in {} seconds.",
                self.breaker.time_until_retry() / 1000
            )));
        }

        let api_key = auth::get_api_key(&self.api_key_env)?;

        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            tracing::debug!(
                "Sending generation request to {} (attempt {})",
                self.endpoint,
                retries + 1
            );

            let response = match self.build_request(request, &api_key).send().await {
                Ok(response) => response,
                Err(e) => {
                    self.breaker.record_failure();
                    return Err(MendError::Generation(format!("Failed to send request: {}", e)));
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                retries += 1;
                if retries > self.max_retries {
                    let failures = self.breaker.record_failure();
                    tracing::error!("Generation service unavailable (failure count: {})", failures);
                    let body = response.text().await.unwrap_or_else(|_| "Unknown".to_string());
                    return Err(MendError::ApiLimit(format!(
                        "Service returned {} after {} retries: {}",
                        status, self.max_retries, body
                    )));
                }

                let wait_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs)
                    .min(MAX_BACKOFF_SECS);

                tracing::warn!(
                    "Generation service returned {}. Waiting {} seconds before retry {}/{}",
                    status,
                    wait_secs,
                    retries,
                    self.max_retries
                );

                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            if !status.is_success() {
                self.breaker.record_failure();
                let body = response.text().await.unwrap_or_else(|_| "Unknown".to_string());
                return Err(MendError::Generation(format!(
                    "Generation service error {}: {}",
                    status, body
                )));
            }

            let text = self.extract_text(response).await?;
            self.breaker.record_success();
            return Ok(text);
        }
    }

    fn name(&self) -> &str {
        match self.provider {
            GenerationProvider::Anthropic => "anthropic",
            GenerationProvider::OpenaiCompatible => "openai_compatible",
        }
    }
}

/// Rule-based backend for tests
///
/// Rules are checked in insertion order; the first whose needle occurs in the
/// prompt answers. Prompts matching no rule fail with `Generation`.
#[derive(Default)]
pub struct MockBackend {
    rules: Vec<(String, std::result::Result<String, String>)>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer prompts containing `needle` with `response`
    pub fn with_response(mut self, needle: &str, response: &str) -> Self {
        self.rules.push((needle.to_string(), Ok(response.to_string())));
        self
    }

    /// Fail prompts containing `needle`
    pub fn with_failure(mut self, needle: &str, message: &str) -> Self {
        self.rules.push((needle.to_string(), Err(message.to_string())));
        self
    }

    /// Number of generate calls that reached this backend
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt seen, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.prompt().to_string();
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.clone());

        match self.rules.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            Some((_, Ok(response))) => Ok(response.clone()),
            Some((_, Err(message))) => Err(MendError::Generation(message.clone())),
            None => Err(MendError::Generation(format!(
                "No mock response for prompt: {}",
                prompt.chars().take(60).collect::<String>()
            ))),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
