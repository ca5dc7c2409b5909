//! Session management: in-memory store of chat sessions

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use torq_core::{ChatSession, Message, Result, SessionSummary, TorqError};

/// Holds every chat session for the lifetime of the process
pub struct SessionManager {
    sessions: RwLock<HashMap<String, ChatSession>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Summaries, most recently updated first
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<SessionSummary> = sessions.values().map(ChatSession::summary).collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list
    }

    pub async fn get(&self, id: &str) -> Option<ChatSession> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn create(&self, title: &str) -> ChatSession {
        let session = ChatSession::new(title);
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session.clone());
        info!("Created session '{}' ({})", title, session.id);
        session
    }

    /// Messages of a session, oldest first
    pub async fn history(&self, id: &str) -> Result<Vec<Message>> {
        self.get(id)
            .await
            .map(|s| s.messages)
            .ok_or_else(|| TorqError::SessionNotFound(id.to_string()))
    }

    pub async fn append(&self, id: &str, message: Message) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| TorqError::SessionNotFound(id.to_string()))?;
        session.push(message);
        debug!(
            "Session '{}' now has {} messages",
            id,
            session.messages.len()
        );
        Ok(())
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
