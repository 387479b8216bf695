//! LLM integration.
//!
//! The reply generator and the extraction refinement both go through the
//! [`LlmProvider`] trait. The concrete provider is OpenAI via rig-core; the
//! whole capability is optional — every caller holds an
//! `Option<Arc<dyn LlmProvider>>` and falls back to its deterministic path
//! when it is absent or the call fails.

mod rig_adapter;

pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a completion request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request: system instructions plus conversation history.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
}

/// Text-completion provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run a completion. Empty content is an error (`LlmError::EmptyResponse`)
    /// so callers can treat it uniformly as "no reply generated".
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Create an OpenAI-backed provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_constructs_with_any_key() {
        // rig-core clients accept any string as API key at construction time.
        // The actual auth failure happens when making a request.
        let config = LlmConfig {
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o-mini".to_string(),
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "gpt-4o-mini");
    }

    #[test]
    fn request_builder() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hola"),
        ])
        .with_max_tokens(256)
        .with_temperature(0.2);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.max_tokens, Some(256));
        assert_eq!(request.temperature, Some(0.2));
    }
}
