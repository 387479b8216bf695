//! Bridges rig's `CompletionModel` trait to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionModel, CompletionRequestBuilder, Message};

use crate::error::LlmError;
use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider, Role};

/// Adapter wrapping any rig `CompletionModel`.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M: CompletionModel> LlmProvider for RigAdapter<M> {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        // rig wants: preamble (system), chat history, and a final prompt.
        let mut preamble = String::new();
        let mut history: Vec<Message> = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => {
                    if !preamble.is_empty() {
                        preamble.push('\n');
                    }
                    preamble.push_str(&message.content);
                }
                Role::User => history.push(Message::user(message.content.clone())),
                Role::Assistant => history.push(Message::assistant(message.content.clone())),
            }
        }

        // The last user turn becomes the prompt; everything before is history.
        let prompt = match history.pop() {
            Some(message) => message,
            None => Message::user(String::new()),
        };

        let mut builder = CompletionRequestBuilder::new(self.model.clone(), prompt)
            .messages(history)
            .preamble(preamble);
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: "openai".to_string(),
            reason: e.to_string(),
        })?;

        let content: String = response
            .choice
            .into_iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: "openai".to_string(),
            });
        }

        Ok(CompletionResponse { content })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
