//! Generative model service trait and implementations.
//!
//! - `HttpModelService` talks to any OpenAI-compatible chat-completions
//!   endpoint (vLLM, LM Studio, OpenAI itself). This is the production
//!   backend.
//! - `ScriptedModel` replays canned replies with an optional delay, for
//!   tests and offline dry runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vox_core::config::ModelConfig;

use crate::composer::{BlockRole, PromptPayload};

/// Errors from one model invocation.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model call timed out after {0} ms")]
    Timeout(u64),
    #[error("model call failed: {0}")]
    Faulted(String),
}

/// Service that turns a composed prompt into raw response text.
///
/// Whole-response only; no streaming contract.
pub trait ModelService: Send + Sync {
    /// Generate a completion for the payload.
    fn generate(
        &self,
        payload: &PromptPayload,
    ) -> impl std::future::Future<Output = Result<String, ModelError>> + Send;
}

/// Object-safe version of [`ModelService`] for dynamic dispatch.
///
/// A blanket implementation is provided so that every `ModelService`
/// automatically implements `DynModelService`.
pub trait DynModelService: Send + Sync {
    /// Generate a completion for the payload (boxed future).
    fn generate_boxed<'a>(
        &'a self,
        payload: &'a PromptPayload,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<String, ModelError>> + Send + 'a>,
    >;
}

impl<T: ModelService> DynModelService for T {
    fn generate_boxed<'a>(
        &'a self,
        payload: &'a PromptPayload,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<String, ModelError>> + Send + 'a>,
    > {
        Box::pin(self.generate(payload))
    }
}

// ---------------------------------------------------------------------------
// HttpModelService - OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any endpoint implementing the OpenAI chat-completions format.
pub struct HttpModelService {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl HttpModelService {
    /// Build a client from configuration.
    ///
    /// The API key, if any, is read from the environment variable named in
    /// the config; local servers typically need none.
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ModelError::Faulted(format!("could not build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }
}

impl ModelService for HttpModelService {
    async fn generate(&self, payload: &PromptPayload) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        let messages: Vec<ChatMessage> = payload
            .blocks
            .iter()
            .map(|block| ChatMessage {
                role: match block.role {
                    BlockRole::System => "system".to_string(),
                    BlockRole::User => "user".to_string(),
                    BlockRole::Assistant => "assistant".to_string(),
                },
                content: block.text.clone(),
            })
            .collect();

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ModelError::Faulted(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ModelError::Faulted(format!("could not read response: {}", e)))?;

        if !status.is_success() {
            return Err(ModelError::Faulted(format!("HTTP {}: {}", status, body)));
        }

        let completion: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ModelError::Faulted(format!("could not parse response: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ModelError::Faulted("no completion in response".to_string()))
    }
}

impl std::fmt::Debug for HttpModelService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpModelService")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ScriptedModel - canned replies for tests and dry runs
// ---------------------------------------------------------------------------

/// Model service that replays a fixed list of replies in order.
///
/// Errors with `Faulted` once the script runs out. An optional delay per
/// call makes timeout paths testable.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl ModelService for ScriptedModel {
    async fn generate(&self, _payload: &PromptPayload) -> Result<String, ModelError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .replies
            .lock()
            .map_err(|e| ModelError::Faulted(format!("script lock poisoned: {}", e)))?
            .pop_front();
        next.ok_or_else(|| ModelError::Faulted("script exhausted".to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::PromptBlock;

    fn payload() -> PromptPayload {
        PromptPayload {
            blocks: vec![PromptBlock {
                role: BlockRole::User,
                text: "hi".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_scripted_model_replays_in_order() {
        let model = ScriptedModel::new(vec!["first", "second"]);
        assert_eq!(model.generate(&payload()).await.unwrap(), "first");
        assert_eq!(model.generate(&payload()).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_scripted_model_faults_when_exhausted() {
        let model = ScriptedModel::new(vec![]);
        let err = model.generate(&payload()).await.unwrap_err();
        assert!(matches!(err, ModelError::Faulted(_)));
    }

    #[tokio::test]
    async fn test_scripted_model_delay() {
        let model =
            ScriptedModel::new(vec!["slow"]).with_delay(Duration::from_millis(30));
        let start = std::time::Instant::now();
        model.generate(&payload()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_dyn_model_via_blanket_impl() {
        let model: std::sync::Arc<dyn DynModelService> =
            std::sync::Arc::new(ScriptedModel::new(vec!["boxed"]));
        assert_eq!(model.generate_boxed(&payload()).await.unwrap(), "boxed");
    }

    #[test]
    fn test_http_service_from_config() {
        let config = ModelConfig {
            base_url: "http://localhost:8000/v1/".to_string(),
            ..ModelConfig::default()
        };
        let service = HttpModelService::new(&config).unwrap();
        // Trailing slash is normalized away.
        assert_eq!(service.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn test_model_error_display() {
        assert_eq!(
            ModelError::Timeout(500).to_string(),
            "model call timed out after 500 ms"
        );
        assert_eq!(
            ModelError::Faulted("boom".to_string()).to_string(),
            "model call failed: boom"
        );
    }
}
