//! Shared types for torq-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TorqError;

/// Who authored a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// How the frontend should render a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Code,
    Diff,
    Error,
    System,
}

impl MessageType {
    /// Guess the type from the content of a message
    pub fn infer(content: &str) -> Self {
        if content.trim_start().starts_with("```") {
            return Self::Code;
        }
        let mut has_old = false;
        let mut has_new = false;
        for line in content.lines() {
            if line.starts_with("@@ ") {
                return Self::Diff;
            }
            has_old |= line.starts_with("--- ");
            has_new |= line.starts_with("+++ ");
        }
        if has_old && has_new {
            Self::Diff
        } else {
            Self::Text
        }
    }
}

/// Optional extra data attached to a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl MessageMetadata {
    pub fn is_empty(&self) -> bool {
        self.file_path.is_none() && self.language.is_none() && self.agent_id.is_none()
    }
}

/// A single message in a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        let content = content.into();
        let message_type = match role {
            MessageRole::System => MessageType::System,
            _ => MessageType::infer(&content),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            message_type,
            metadata: MessageMetadata::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>, agent_id: &str) -> Self {
        let mut msg = Self::new(MessageRole::Assistant, content);
        msg.metadata.agent_id = Some(agent_id.to_string());
        msg
    }

    /// An assistant-side error message (rendered differently by the frontend)
    pub fn error(content: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageRole::Assistant, content);
        msg.message_type = MessageType::Error;
        msg
    }
}

/// An ordered conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Session listing entry without the message bodies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.updated_at = message.timestamp.max(self.updated_at);
        self.messages.push(message);
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// How many agents take part in answering one query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationMode {
    #[default]
    SingleAgent,
    MultiAgent,
    Pipeline,
    Parallel,
}

impl OrchestrationMode {
    pub const ALL: [OrchestrationMode; 4] = [
        Self::SingleAgent,
        Self::MultiAgent,
        Self::Pipeline,
        Self::Parallel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleAgent => "single_agent",
            Self::MultiAgent => "multi_agent",
            Self::Pipeline => "pipeline",
            Self::Parallel => "parallel",
        }
    }
}

impl std::fmt::Display for OrchestrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrchestrationMode {
    type Err = TorqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "single_agent" | "single" => Ok(Self::SingleAgent),
            "multi_agent" | "multi" => Ok(Self::MultiAgent),
            "pipeline" => Ok(Self::Pipeline),
            "parallel" => Ok(Self::Parallel),
            other => {
                let known: Vec<&str> = Self::ALL.iter().map(Self::as_str).collect();
                Err(TorqError::InvalidRequest(format!(
                    "unknown orchestration mode '{}' (expected one of {})",
                    other,
                    known.join(", ")
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_message_type() {
        assert_eq!(MessageType::infer("hello there"), MessageType::Text);
        assert_eq!(
            MessageType::infer("```rust\nfn main() {}\n```"),
            MessageType::Code
        );
        assert_eq!(
            MessageType::infer("--- a/src/lib.rs\n+++ b/src/lib.rs\n-old\n+new"),
            MessageType::Diff
        );
        assert_eq!(
            MessageType::infer("@@ -1,3 +1,3 @@\n-a\n+b"),
            MessageType::Diff
        );
        // A markdown rule alone is not a diff
        assert_eq!(MessageType::infer("Title\n--- \nbody"), MessageType::Text);
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::assistant("done", "debugging");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["type"], "text");
        assert_eq!(json["metadata"]["agent_id"], "debugging");
        assert!(json["metadata"].get("file_path").is_none());

        let user = Message::user("hi");
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_system_and_error_messages() {
        assert_eq!(
            Message::new(MessageRole::System, "```not code```").message_type,
            MessageType::System
        );
        let err = Message::error("Error: backend down");
        assert_eq!(err.message_type, MessageType::Error);
        assert_eq!(err.role, MessageRole::Assistant);
    }

    #[test]
    fn test_session_push_and_summary() {
        let mut session = ChatSession::new("Debugging");
        let created = session.updated_at;
        session.push(Message::user("why does it crash?"));
        session.push(Message::assistant("null pointer", "debugging"));
        assert_eq!(session.messages.len(), 2);
        assert!(session.updated_at >= created);

        let summary = session.summary();
        assert_eq!(summary.message_count, 2);
        assert_eq!(summary.title, "Debugging");
        assert_eq!(summary.id, session.id);
    }

    #[test]
    fn test_orchestration_mode_parse() {
        assert_eq!(
            "single_agent".parse::<OrchestrationMode>().unwrap(),
            OrchestrationMode::SingleAgent
        );
        assert_eq!(
            "Multi-Agent".parse::<OrchestrationMode>().unwrap(),
            OrchestrationMode::MultiAgent
        );
        assert_eq!(
            "PIPELINE".parse::<OrchestrationMode>().unwrap(),
            OrchestrationMode::Pipeline
        );
        let err = "swarm".parse::<OrchestrationMode>().unwrap_err();
        assert!(err.to_string().contains("'swarm'"));
        assert!(err.to_string().contains("single_agent, multi_agent, pipeline, parallel"));
    }

    #[test]
    fn test_orchestration_mode_serde() {
        let json = serde_json::to_string(&OrchestrationMode::MultiAgent).unwrap();
        assert_eq!(json, "\"multi_agent\"");
        let mode: OrchestrationMode = serde_json::from_str("\"parallel\"").unwrap();
        assert_eq!(mode, OrchestrationMode::Parallel);
        assert_eq!(OrchestrationMode::default(), OrchestrationMode::SingleAgent);
    }
}
