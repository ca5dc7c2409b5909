//! Agent registry: the fixed set of personas plus their live status

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::profile::{builtin_profiles, AgentProfile, AgentStatus, Capability};
use crate::error::{Result, TorqError};

/// Holds the known agents in registration order
pub struct AgentRegistry {
    profiles: Vec<AgentProfile>,
    statuses: RwLock<HashMap<String, AgentStatus>>,
}

impl AgentRegistry {
    /// Create a registry from explicit profiles (ids must be unique)
    pub fn new(profiles: Vec<AgentProfile>) -> Self {
        let mut unique: Vec<AgentProfile> = Vec::with_capacity(profiles.len());
        for profile in profiles {
            if unique.iter().any(|p| p.id == profile.id) {
                debug!("AgentRegistry: ignoring duplicate agent '{}'", profile.id);
                continue;
            }
            unique.push(profile);
        }
        let statuses = unique
            .iter()
            .map(|p| (p.id.clone(), AgentStatus::Idle))
            .collect();
        info!("AgentRegistry: initialized with {} agents", unique.len());
        Self {
            profiles: unique,
            statuses: RwLock::new(statuses),
        }
    }

    /// Registry with the six built-in personas
    pub fn with_builtin_agents() -> Self {
        Self::new(builtin_profiles())
    }

    /// Override the model used by one agent
    pub fn set_model(&mut self, id: &str, model: impl Into<String>) -> Result<()> {
        let profile = self
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| TorqError::AgentNotFound(id.to_string()))?;
        profile.model = Some(model.into());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.profiles.iter().any(|p| p.id == id)
    }

    /// Static profile data (status is not kept here)
    pub fn profile(&self, id: &str) -> Option<&AgentProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.id.as_str()).collect()
    }

    /// Snapshot of an agent including its current status
    pub async fn get(&self, id: &str) -> Option<AgentProfile> {
        let profile = self.profile(id)?;
        let statuses = self.statuses.read().await;
        let mut snapshot = profile.clone();
        snapshot.status = statuses.get(id).copied().unwrap_or_default();
        Some(snapshot)
    }

    /// All agents with their current status, in registration order
    pub async fn list(&self) -> Vec<AgentProfile> {
        let statuses = self.statuses.read().await;
        self.profiles
            .iter()
            .map(|p| {
                let mut snapshot = p.clone();
                snapshot.status = statuses.get(&p.id).copied().unwrap_or_default();
                snapshot
            })
            .collect()
    }

    pub async fn set_status(&self, id: &str, status: AgentStatus) -> Result<()> {
        if !self.contains(id) {
            return Err(TorqError::AgentNotFound(id.to_string()));
        }
        let mut statuses = self.statuses.write().await;
        statuses.insert(id.to_string(), status);
        debug!("Agent '{}' is now {}", id, status);
        Ok(())
    }

    pub async fn status(&self, id: &str) -> Option<AgentStatus> {
        self.statuses.read().await.get(id).copied()
    }

    /// Ids of agents that are not idle
    pub async fn active_agents(&self) -> Vec<String> {
        let statuses = self.statuses.read().await;
        self.profiles
            .iter()
            .filter(|p| {
                matches!(
                    statuses.get(&p.id),
                    Some(AgentStatus::Thinking | AgentStatus::Active)
                )
            })
            .map(|p| p.id.clone())
            .collect()
    }

    /// Agents offering a capability, in registration order
    pub fn find_by_capability(&self, capability: Capability) -> Vec<&AgentProfile> {
        self.profiles
            .iter()
            .filter(|p| p.has_capability(capability))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::with_builtin_agents()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::profile::{DEBUGGING, RESEARCH, TESTING};

    #[tokio::test]
    async fn test_builtin_registry() {
        let registry = AgentRegistry::with_builtin_agents();
        assert_eq!(registry.len(), 6);
        assert!(registry.contains(DEBUGGING));
        assert!(!registry.contains("nonexistent"));

        let list = registry.list().await;
        assert_eq!(list[0].id, "code_generation");
        assert!(list.iter().all(|a| a.status == AgentStatus::Idle));
    }

    #[tokio::test]
    async fn test_set_status() {
        let registry = AgentRegistry::with_builtin_agents();
        registry.set_status(TESTING, AgentStatus::Thinking).await.unwrap();
        assert_eq!(registry.status(TESTING).await, Some(AgentStatus::Thinking));

        let agent = registry.get(TESTING).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Thinking);
        assert_eq!(registry.active_agents().await, vec![TESTING.to_string()]);

        registry.set_status(TESTING, AgentStatus::Success).await.unwrap();
        assert!(registry.active_agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_status_unknown_agent() {
        let registry = AgentRegistry::with_builtin_agents();
        let err = registry
            .set_status("ghost", AgentStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, TorqError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let registry = AgentRegistry::with_builtin_agents();
        assert!(registry.get("missing").await.is_none());
    }

    #[test]
    fn test_duplicate_ids_ignored() {
        let registry = AgentRegistry::new(vec![
            AgentProfile::new("a", "First"),
            AgentProfile::new("a", "Second"),
            AgentProfile::new("b", "Other"),
        ]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.profile("a").unwrap().name, "First");
    }

    #[test]
    fn test_find_by_capability() {
        let registry = AgentRegistry::with_builtin_agents();
        let found = registry.find_by_capability(Capability::Ideation);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, RESEARCH);
        assert!(registry.find_by_capability(Capability::Refactoring).len() == 1);
    }

    #[test]
    fn test_set_model() {
        let mut registry = AgentRegistry::with_builtin_agents();
        registry.set_model(RESEARCH, "gpt-4o").unwrap();
        assert_eq!(registry.profile(RESEARCH).unwrap().model.as_deref(), Some("gpt-4o"));
        assert!(registry.set_model("ghost", "x").is_err());
    }
}
