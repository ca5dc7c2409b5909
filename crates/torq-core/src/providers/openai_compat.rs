//! Endpoints speaking the OpenAI chat-completions protocol under another
//! label: a local Ollama or LM Studio, Groq, Together.

use anyhow::{Result, ensure};
use async_trait::async_trait;

use super::openai::OpenAiProvider;
use super::types::{ChatMessage, ChatResponse, LlmProvider};

pub struct OpenAiCompatProvider {
    label: String,
    wire: OpenAiProvider,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("label", &self.label)
            .field("wire", &self.wire)
            .finish()
    }
}

impl OpenAiCompatProvider {
    /// `label` is what status output and failover logs call this endpoint.
    /// Local servers usually take an empty `api_key`.
    pub fn new(
        label: String,
        api_key: String,
        model: String,
        base_url: String,
        max_tokens: u32,
    ) -> Result<Self> {
        ensure!(
            !base_url.trim().is_empty(),
            "openai_compat provider '{}' has no base_url",
            label
        );
        let label = if label.trim().is_empty() {
            "openai_compat".to_string()
        } else {
            label
        };
        Ok(Self {
            wire: OpenAiProvider::new(api_key, model, base_url, max_tokens)?,
            label,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn provider_name(&self) -> &str {
        &self.label
    }

    fn model(&self) -> &str {
        self.wire.model()
    }

    async fn chat(&self, messages: &[ChatMessage], system: &str) -> Result<ChatResponse> {
        self.wire.chat(messages, system).await
    }
}
