//! Multi-provider LLM abstraction layer
//!
//! Supports Anthropic, OpenAI and any OpenAI-compatible endpoint.
//! Providers implement the [`LlmProvider`] trait and are composed via [`ModelRouter`]
//! for automatic failover.

pub mod anthropic;
pub mod openai;
pub mod openai_compat;
pub mod router;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::ModelRouter;
pub use types::{ChatMessage, ChatResponse, ChatRole, ChatUsage, LlmProvider, StopReason};

/// Per-request HTTP timeout for every provider
pub const REQUEST_TIMEOUT_SECS: u64 = 120;
