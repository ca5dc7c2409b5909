//! torq-core - agents, routing and orchestration for the TORQ console
//!
//! This crate provides:
//! - The six built-in agent personas and a registry tracking their status
//! - Heuristic query routing with optional LLM classification
//! - LLM providers (Anthropic, OpenAI, OpenAI-compatible) with failover
//! - An orchestrator running single-agent, multi-agent, pipeline and parallel modes
//! - Review skill playbooks, voice shortcuts and an HTTP MCP client

pub mod agents;
pub mod error;
pub mod mcp;
pub mod orchestrator;
pub mod providers;
pub mod query_router;
pub mod shortcuts;
pub mod skills;
pub mod types;

// Re-export main types for convenience
pub use agents::{AgentProfile, AgentRegistry, AgentStatus, Capability, builtin_profiles};
pub use error::{Result, TorqError};
pub use mcp::McpClient;
pub use orchestrator::{
    AgentEvent, ChatOutcome, ChatRequest, Orchestrator, OrchestratorConfig, build_system_prompt,
};
pub use providers::{ChatMessage, LlmProvider, ModelRouter};
pub use query_router::{Complexity, QueryRouterConfig, RoutingDecision};
pub use shortcuts::{ShortcutMatch, match_shortcut};
pub use skills::{SkillDefinition, SkillSet, load_skills_dir, parse_skill};
pub use types::{ChatSession, Message, MessageRole, MessageType, OrchestrationMode, SessionSummary};

