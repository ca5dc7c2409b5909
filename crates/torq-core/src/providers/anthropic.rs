//! Anthropic Claude provider

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::types::{ChatMessage, ChatResponse, ChatRole, ChatUsage, LlmProvider, StopReason};
use super::REQUEST_TIMEOUT_SECS;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, base_url: String, max_tokens: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_tokens,
        })
    }

    /// Convert provider-agnostic messages to Anthropic wire format.
    /// System messages travel in the top-level `system` field instead.
    fn to_anthropic_messages(messages: &[ChatMessage]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| AnthropicMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn from_anthropic_response(resp: AnthropicApiResponse) -> ChatResponse {
        let text = resp
            .content
            .into_iter()
            .filter_map(|b| match b {
                AnthropicBlock::Text { text } => Some(text),
                AnthropicBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let stop_reason = match resp.stop_reason.as_deref() {
            Some("end_turn") | Some("stop_sequence") => StopReason::EndTurn,
            Some("max_tokens") => StopReason::MaxTokens,
            _ => StopReason::Unknown,
        };

        ChatResponse {
            text,
            stop_reason,
            usage: ChatUsage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage], system: &str) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let anthropic_messages = Self::to_anthropic_messages(messages);

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": anthropic_messages,
        });

        debug!(
            "Anthropic request: model={}, messages={}",
            self.model,
            anthropic_messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: AnthropicApiResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic API response")?;

        debug!(
            "Anthropic response: blocks={}, stop_reason={:?}",
            api_response.content.len(),
            api_response.stop_reason
        );

        Ok(Self::from_anthropic_response(api_response))
    }
}

// ── Anthropic wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicApiResponse {
    content: Vec<AnthropicBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_anthropic_messages_filters_system() {
        let msgs = vec![
            ChatMessage {
                role: ChatRole::System,
                content: "system prompt".to_string(),
            },
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ];
        let result = AnthropicProvider::to_anthropic_messages(&msgs);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].role, "user");
        assert_eq!(result[1].role, "assistant");
    }

    #[test]
    fn test_parse_response_joins_text_blocks() {
        let raw = serde_json::json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "first"},
                {"type": "tool_use", "id": "tu_1", "name": "x", "input": {}},
                {"type": "text", "text": "second"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let resp: AnthropicApiResponse = serde_json::from_value(raw).unwrap();
        let result = AnthropicProvider::from_anthropic_response(resp);
        assert_eq!(result.text, "first\nsecond");
        assert_eq!(result.stop_reason, StopReason::EndTurn);
        assert_eq!(result.usage.input_tokens, 10);
    }

    #[test]
    fn test_parse_response_max_tokens() {
        let raw = serde_json::json!({
            "content": [{"type": "text", "text": "partial"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 1, "output_tokens": 4096}
        });
        let resp: AnthropicApiResponse = serde_json::from_value(raw).unwrap();
        let result = AnthropicProvider::from_anthropic_response(resp);
        assert!(result.stop_reason.is_truncated());
    }

    #[test]
    fn test_anthropic_provider_debug_hides_key() {
        let provider = AnthropicProvider::new(
            "sk-ant-secret".to_string(),
            DEFAULT_MODEL.to_string(),
            DEFAULT_BASE_URL.to_string(),
            4096,
        )
        .unwrap();
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("sk-ant-secret"));
        assert!(debug.contains(DEFAULT_MODEL));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = AnthropicProvider::new(
            String::new(),
            DEFAULT_MODEL.to_string(),
            "http://localhost:8080/".to_string(),
            1024,
        )
        .unwrap();
        assert_eq!(provider.base_url, "http://localhost:8080");
    }
}
