//! Anthropic (Claude) structured inference provider implementation

use super::client::AnthropicClient;
use super::types::{ContentBlock, Message, MessageRequest, MessageResponse};
use crate::{InferenceProvider, InferenceRequest};
use async_trait::async_trait;
use docket_core::{DocketResult, ValidationError};
use serde_json::Value;

/// Anthropic inference provider using Claude models.
pub struct AnthropicInferenceProvider {
    client: AnthropicClient,
    model: String,
}

impl AnthropicInferenceProvider {
    /// Create a new Anthropic inference provider.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `model` - Model name (e.g. "claude-3-5-sonnet-20241022", "claude-3-haiku-20240307")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: AnthropicClient::new(api_key, 50),
            model: model.into(),
        }
    }

    /// Create provider with default Claude 3.5 Sonnet model.
    pub fn with_default_model(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "claude-3-5-sonnet-20241022")
    }

    /// Extract text from content blocks.
    fn extract_text(content: Vec<ContentBlock>) -> String {
        content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Strip a markdown code fence if the model wrapped its JSON in one.
    fn strip_code_fence(text: &str) -> &str {
        let trimmed = text.trim();
        let without_open = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .unwrap_or(trimmed);
        without_open.strip_suffix("```").unwrap_or(without_open).trim()
    }
}

#[async_trait]
impl InferenceProvider for AnthropicInferenceProvider {
    async fn complete_structured(&self, request: &InferenceRequest) -> DocketResult<Value> {
        let system = format!(
            "{}\n\nRespond with a single JSON object matching this schema, and nothing else:\n{}",
            request.system,
            serde_json::to_string_pretty(&request.schema).unwrap_or_default()
        );

        let api_request = MessageRequest {
            model: self.model.clone(),
            system: Some(system),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
            temperature: Some(request.temperature),
        };

        let response: MessageResponse = self.client.request("messages", api_request).await?;
        let text = Self::extract_text(response.content);

        let raw = Self::strip_code_fence(&text);
        serde_json::from_str(raw).map_err(|e| {
            ValidationError::SchemaMismatch {
                reason: format!("response is not valid JSON: {}", e),
            }
            .into()
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for AnthropicInferenceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicInferenceProvider")
            .field("model", &self.model)
            .finish()
    }
}
