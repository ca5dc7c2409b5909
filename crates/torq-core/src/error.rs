//! Error types for torq-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TorqError {
    #[error("Agent '{0}' not found")]
    AgentNotFound(String),

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("Skill error: {0}")]
    Skill(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TorqError {
    /// Whether the error refers to something that does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AgentNotFound(_) | Self::SessionNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, TorqError>;
