//! Gateway protocol: JSON bodies of the REST API and WebSocket events

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use torq_core::{Capability, ChatOutcome, OrchestrationMode, RoutingDecision, TorqError};

/// Body of `POST /api/agents/{id}/chat`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequestBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Review skill to attach
    #[serde(default)]
    pub skill: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponseMetadata {
    pub mode: OrchestrationMode,
    pub routing_decision: RoutingDecision,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_used: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub used_tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponseBody {
    pub response: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: ChatResponseMetadata,
}

impl From<ChatOutcome> for ChatResponseBody {
    fn from(outcome: ChatOutcome) -> Self {
        Self {
            response: outcome.response,
            agent_id: outcome.agent_id,
            timestamp: outcome.timestamp,
            metadata: ChatResponseMetadata {
                mode: outcome.mode,
                routing_decision: outcome.routing_decision,
                success: outcome.success,
                agent_used: outcome.agent_used,
                capabilities: outcome.capabilities,
                used_tools: outcome.used_tools,
            },
        }
    }
}

/// Body of `POST /api/sessions`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub title: Option<String>,
}

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Gateway → client event (broadcast on `/ws`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event: String,
    pub data: Value,
}

impl GatewayEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Events the server broadcasts
pub mod events {
    pub const AGENT_STATUS: &str = "agent.status";
    pub const MESSAGE_CREATED: &str = "message.created";
    pub const SESSION_CREATED: &str = "session.created";
}

/// JSON error response: `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<TorqError> for ApiError {
    fn from(err: TorqError) -> Self {
        let status = match &err {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            TorqError::InvalidRequest(_) | TorqError::Skill(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_minimal() {
        let body: ChatRequestBody = serde_json::from_str(r#"{"message":"hello"}"#).unwrap();
        assert_eq!(body.message, "hello");
        assert!(body.mode.is_none());
        assert!(body.session_id.is_none());
    }

    #[test]
    fn test_chat_request_missing_message_is_empty() {
        let body: ChatRequestBody = serde_json::from_str(r#"{"mode":"pipeline"}"#).unwrap();
        assert!(body.message.is_empty());
        assert_eq!(body.mode.as_deref(), Some("pipeline"));
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (TorqError::AgentNotFound("x".into()), StatusCode::NOT_FOUND),
            (TorqError::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (TorqError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (TorqError::Provider("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_error_message_kept() {
        let err = ApiError::from(TorqError::AgentNotFound("ghost".into()));
        assert!(err.message.contains("ghost"));
    }

    #[test]
    fn test_event_serialize() {
        let evt = GatewayEvent::new(events::SESSION_CREATED, serde_json::json!({"id": "s1"}));
        let json = serde_json::to_string(&evt).unwrap();
        assert!(json.contains("\"event\":\"session.created\""));
        assert!(json.contains("\"id\":\"s1\""));
    }
}
