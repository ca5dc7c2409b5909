//! Multi-agent orchestration
//!
//! Routes a chat request to one or more agents and combines their answers
//! according to the requested [`OrchestrationMode`]:
//!
//! - `single_agent`: primary answers, fallbacks are tried in order on failure
//! - `multi_agent`: all answer concurrently, the primary synthesizes
//! - `pipeline`: each agent refines the previous agent's output
//! - `parallel`: all answer concurrently, results listed per agent

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::agents::{AgentRegistry, AgentStatus, Capability};
use crate::error::{Result, TorqError};
use crate::providers::{ChatMessage, LlmProvider};
use crate::query_router::{self, QueryRouterConfig, RoutingDecision};
use crate::skills::SkillDefinition;
use crate::types::OrchestrationMode;

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_agents: usize,
    pub agent_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 4,
            agent_timeout_secs: 120,
        }
    }
}

/// One query to answer
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub message: String,
    pub context: Option<String>,
    pub mode: OrchestrationMode,
    /// Skip routing and use this agent as primary
    pub agent_id: Option<String>,
    /// Earlier turns of the conversation, oldest first
    pub history: Vec<ChatMessage>,
    pub skill: Option<SkillDefinition>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_mode(mut self, mode: OrchestrationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_skill(mut self, skill: SkillDefinition) -> Self {
        self.skill = Some(skill);
        self
    }
}

/// Result of handling a [`ChatRequest`]
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    /// The routed primary agent
    pub agent_id: String,
    /// The agent whose answer was returned, if any answered
    pub agent_used: Option<String>,
    pub mode: OrchestrationMode,
    pub routing_decision: RoutingDecision,
    pub success: bool,
    pub capabilities: Vec<Capability>,
    pub used_tools: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Status change published while a request is in flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub agent_id: String,
    pub status: AgentStatus,
    pub timestamp: DateTime<Utc>,
}

/// Status of one agent's run in the concurrent modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRunStatus {
    Completed,
    Failed,
    TimedOut,
}

impl std::fmt::Display for AgentRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentRunResult {
    pub agent_id: String,
    pub status: AgentRunStatus,
    pub output: String,
}

/// Updates the registry and forwards status changes to the event channel.
///
/// One reporter is scoped to one request and remembers which agents it set
/// to thinking, so only those are reset afterwards.
#[derive(Clone)]
struct StatusReporter {
    registry: Arc<AgentRegistry>,
    events: Option<mpsc::Sender<AgentEvent>>,
    ran: Arc<Mutex<Vec<String>>>,
}

impl StatusReporter {
    async fn report(&self, agent_id: &str, status: AgentStatus) {
        if let Err(e) = self.registry.set_status(agent_id, status).await {
            warn!("Failed to update status of {}: {}", agent_id, e);
            return;
        }
        if status == AgentStatus::Thinking {
            let mut ran = self.ran.lock().unwrap_or_else(|e| e.into_inner());
            if !ran.iter().any(|id| id == agent_id) {
                ran.push(agent_id.to_string());
            }
        }
        if let Some(tx) = &self.events {
            let event = AgentEvent {
                agent_id: agent_id.to_string(),
                status,
                timestamp: Utc::now(),
            };
            if let Err(e) = tx.send(event).await {
                debug!("Agent event dropped: {}", e);
            }
        }
    }

    fn take_ran(&self) -> Vec<String> {
        std::mem::take(&mut *self.ran.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Set every agent this request ran back to idle
    async fn reset(&self) {
        for agent_id in self.take_ran() {
            self.report(&agent_id, AgentStatus::Idle).await;
        }
    }
}

/// Resets the request's agents when `handle` is dropped before finishing
struct ResetOnDrop {
    reporter: Option<StatusReporter>,
}

impl ResetOnDrop {
    fn new(reporter: StatusReporter) -> Self {
        Self {
            reporter: Some(reporter),
        }
    }

    async fn finish(mut self) {
        if let Some(reporter) = self.reporter.take() {
            reporter.reset().await;
        }
    }
}

impl Drop for ResetOnDrop {
    fn drop(&mut self) {
        let Some(reporter) = self.reporter.take() else {
            return;
        };
        let ran = reporter.take_ran();
        if ran.is_empty() {
            return;
        }
        debug!("Request cancelled, resetting {:?}", ran);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    for agent_id in ran {
                        reporter.report(&agent_id, AgentStatus::Idle).await;
                    }
                });
            }
            Err(_) => warn!("No runtime to reset agents {:?}", ran),
        }
    }
}

/// Everything needed to ask one agent, detached from the orchestrator so it
/// can move into a spawned task
struct AgentCall {
    agent_id: String,
    provider: Arc<dyn LlmProvider>,
    system: String,
    messages: Vec<ChatMessage>,
    timeout: Duration,
}

impl AgentCall {
    async fn run(self, reporter: &StatusReporter) -> AgentRunResult {
        reporter.report(&self.agent_id, AgentStatus::Thinking).await;
        let result = tokio::time::timeout(
            self.timeout,
            self.provider.chat(&self.messages, &self.system),
        )
        .await;

        let (status, output) = match result {
            Ok(Ok(response)) => {
                debug!(
                    "Agent {} used {} input / {} output tokens",
                    self.agent_id, response.usage.input_tokens, response.usage.output_tokens
                );
                if response.stop_reason.is_truncated() {
                    warn!("Agent {} hit the token limit, answer is truncated", self.agent_id);
                }
                (AgentRunStatus::Completed, response.text)
            }
            Ok(Err(e)) => (AgentRunStatus::Failed, format!("Error: {}", e)),
            Err(_) => (
                AgentRunStatus::TimedOut,
                format!("Error: agent timed out after {}s", self.timeout.as_secs()),
            ),
        };

        let agent_status = match status {
            AgentRunStatus::Completed => AgentStatus::Success,
            _ => AgentStatus::Error,
        };
        reporter.report(&self.agent_id, agent_status).await;
        if status != AgentRunStatus::Completed {
            warn!("Agent {} {}: {}", self.agent_id, status, output);
        }

        AgentRunResult {
            agent_id: self.agent_id,
            status,
            output,
        }
    }
}

/// Build an agent's system prompt from its persona, request context and skill
pub fn build_system_prompt(
    persona: &str,
    context: Option<&str>,
    skill: Option<&SkillDefinition>,
) -> String {
    let mut prompt = String::new();

    if !persona.is_empty() {
        prompt.push_str("# ROLE\n\n");
        prompt.push_str(persona);
        prompt.push_str("\n\n");
    }

    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("# CONTEXT\n\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }

    if let Some(skill) = skill {
        prompt.push_str(&format!("# REVIEW SKILL: {}\n\n", skill.name));
        if !skill.checks.is_empty() {
            prompt.push_str("Checks:\n");
            for check in &skill.checks {
                prompt.push_str(&format!("- {}\n", check));
            }
            prompt.push('\n');
        }
        prompt.push_str(&skill.instructions);
        prompt.push_str("\n\n");
    }

    prompt.push_str("# CURRENT TIME\n\n");
    prompt.push_str(&Utc::now().to_rfc3339());
    prompt.push_str("\n\n");

    prompt.push_str("# INSTRUCTIONS\n\n");
    prompt.push_str("Answer as the role above. Be concise but thorough. ");
    prompt.push_str("Use fenced code blocks for code and unified diffs for patches.\n");

    debug!("Built system prompt ({} chars)", prompt.len());
    prompt
}

/// Format concurrent results into a markdown string
pub fn format_results(results: &[AgentRunResult]) -> String {
    let mut output = String::from("## Results\n\n");
    for result in results {
        output.push_str(&format!("### {} ({})\n", result.agent_id, result.status));
        output.push_str(&result.output);
        output.push_str("\n\n");
    }
    output
}

/// Routes requests to agents and runs them in the requested mode
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    agent_providers: HashMap<String, Arc<dyn LlmProvider>>,
    registry: Arc<AgentRegistry>,
    router_config: QueryRouterConfig,
    config: OrchestratorConfig,
    events: Option<mpsc::Sender<AgentEvent>>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            provider,
            agent_providers: HashMap::new(),
            registry,
            router_config: QueryRouterConfig::default(),
            config: OrchestratorConfig::default(),
            events: None,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_router_config(mut self, config: QueryRouterConfig) -> Self {
        self.router_config = config;
        self
    }

    /// Use a dedicated provider for one agent (per-agent model override)
    pub fn with_agent_provider(
        mut self,
        agent_id: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        self.agent_providers.insert(agent_id.into(), provider);
        self
    }

    /// Publish agent status changes on this channel
    pub fn with_events(mut self, tx: mpsc::Sender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    fn reporter(&self) -> StatusReporter {
        StatusReporter {
            registry: self.registry.clone(),
            events: self.events.clone(),
            ran: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn provider_for(&self, agent_id: &str) -> Arc<dyn LlmProvider> {
        self.agent_providers
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| self.provider.clone())
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.agent_timeout_secs)
    }

    /// Prepare a call to one agent. `extra_context` is appended to the
    /// request context (used for pipeline hand-offs).
    fn prepare(
        &self,
        agent_id: &str,
        request: &ChatRequest,
        extra_context: Option<&str>,
        message: &str,
    ) -> AgentCall {
        let persona = self
            .registry
            .profile(agent_id)
            .map(|p| p.system_prompt.as_str())
            .unwrap_or("");

        let context = match (request.context.as_deref(), extra_context) {
            (Some(base), Some(extra)) => Some(format!("{}\n\n{}", base, extra)),
            (Some(base), None) => Some(base.to_string()),
            (None, Some(extra)) => Some(extra.to_string()),
            (None, None) => None,
        };

        let mut messages = request.history.clone();
        messages.push(ChatMessage::user(message));

        AgentCall {
            agent_id: agent_id.to_string(),
            provider: self.provider_for(agent_id),
            system: build_system_prompt(persona, context.as_deref(), request.skill.as_ref()),
            messages,
            timeout: self.timeout(),
        }
    }

    async fn route(&self, request: &ChatRequest) -> Result<RoutingDecision> {
        if let Some(agent_id) = &request.agent_id {
            return query_router::explicit(
                agent_id,
                &request.message,
                &self.registry,
                self.router_config.max_fallbacks,
            );
        }
        match query_router::route_query(
            &request.message,
            Some(self.provider.as_ref()),
            &self.registry,
            &self.router_config,
        )
        .await
        {
            Ok(decision) => Ok(decision),
            Err(e) => {
                debug!("Routing failed, using heuristic: {}", e);
                Ok(query_router::classify(&request.message, &self.registry))
            }
        }
    }

    /// Route and answer a request.
    ///
    /// Provider failures are reported through `success = false`; only
    /// invalid requests (empty message, unknown agent) are errors.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatOutcome> {
        if request.message.trim().is_empty() {
            return Err(TorqError::InvalidRequest("Message cannot be empty".into()));
        }

        let decision = self.route(&request).await?;
        info!(
            "Handling request in {} mode: primary={}, fallbacks={:?}, confidence={:.2}",
            request.mode, decision.primary_agent, decision.fallback_agents, decision.confidence
        );

        let reporter = self.reporter();
        let reset = ResetOnDrop::new(reporter.clone());
        let result = match request.mode {
            OrchestrationMode::SingleAgent => self.run_single(&request, &decision, &reporter).await,
            OrchestrationMode::MultiAgent => self.run_multi(&request, &decision, &reporter).await,
            OrchestrationMode::Pipeline => self.run_pipeline(&request, &decision, &reporter).await,
            OrchestrationMode::Parallel => self.run_parallel(&request, &decision, &reporter).await,
        };
        reset.finish().await;

        let (response, agent_used, success) = match result {
            Ok((response, agent_used)) => (response, Some(agent_used), true),
            Err(e) => (format!("Error: {}", e), None, false),
        };

        let capabilities = agent_used
            .as_deref()
            .and_then(|id| self.registry.profile(id))
            .map(|p| p.capabilities.clone())
            .unwrap_or_else(|| decision.required_capabilities.clone());

        Ok(ChatOutcome {
            response,
            agent_id: decision.primary_agent.clone(),
            agent_used,
            mode: request.mode,
            routing_decision: decision,
            success,
            capabilities,
            used_tools: Vec::new(),
            timestamp: Utc::now(),
        })
    }

    /// Primary first, then each fallback until one answers
    async fn run_single(
        &self,
        request: &ChatRequest,
        decision: &RoutingDecision,
        reporter: &StatusReporter,
    ) -> anyhow::Result<(String, String)> {
        let mut last_error = None;

        for agent_id in decision.agents() {
            let call = self.prepare(&agent_id, request, None, &request.message);
            let result = call.run(reporter).await;
            if result.status == AgentRunStatus::Completed {
                if agent_id != decision.primary_agent {
                    info!("Fallback agent {} answered", agent_id);
                }
                return Ok((result.output, agent_id));
            }
            last_error = Some(result.output);
        }

        Err(anyhow!(
            "{}",
            last_error
                .map(|e| e.trim_start_matches("Error: ").to_string())
                .unwrap_or_else(|| "No agent available".to_string())
        ))
    }

    /// Run the given agents concurrently, bounded by the semaphore
    async fn run_concurrently(
        &self,
        agents: &[String],
        request: &ChatRequest,
        reporter: &StatusReporter,
    ) -> Vec<AgentRunResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_agents.max(1)));
        // Dropping the set aborts calls still in flight
        let mut join_set = JoinSet::new();

        for (index, agent_id) in agents.iter().enumerate() {
            let call = self.prepare(agent_id, request, None, &request.message);
            let sem = semaphore.clone();
            let reporter = reporter.clone();
            join_set.spawn(async move {
                let _permit = sem.acquire().await.ok();
                (index, call.run(&reporter).await)
            });
        }

        let mut slots: Vec<Option<AgentRunResult>> = agents.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("Agent task failed: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(agents)
            .map(|(slot, agent_id)| {
                slot.unwrap_or_else(|| AgentRunResult {
                    agent_id: agent_id.clone(),
                    status: AgentRunStatus::Failed,
                    output: "Error: agent task panicked".to_string(),
                })
            })
            .collect()
    }

    /// All agents answer, then the primary merges their contributions
    async fn run_multi(
        &self,
        request: &ChatRequest,
        decision: &RoutingDecision,
        reporter: &StatusReporter,
    ) -> anyhow::Result<(String, String)> {
        let agents = decision.agents();
        let results = self.run_concurrently(&agents, request, reporter).await;
        let contributions: Vec<&AgentRunResult> = results
            .iter()
            .filter(|r| r.status == AgentRunStatus::Completed)
            .collect();

        match contributions.as_slice() {
            [] => {
                let last = results
                    .last()
                    .map(|r| r.output.trim_start_matches("Error: ").to_string())
                    .unwrap_or_else(|| "No agent available".to_string());
                return Err(anyhow!("{}", last));
            }
            [only] => return Ok((only.output.clone(), only.agent_id.clone())),
            _ => {}
        }

        let combined = contributions
            .iter()
            .map(|r| format!("### {}\n{}", r.agent_id, r.output))
            .collect::<Vec<_>>()
            .join("\n\n");

        let synthesis_prompt = format!(
            "Synthesize the following agent contributions into a single answer to the \
             original request.\n\nOriginal request:\n{}\n\nContributions:\n\n{}",
            request.message, combined
        );

        let primary = &decision.primary_agent;
        let call = self.prepare(primary, request, None, &synthesis_prompt);
        let synthesis = call.run(reporter).await;
        if synthesis.status == AgentRunStatus::Completed {
            Ok((synthesis.output, primary.clone()))
        } else {
            warn!("Synthesis by {} failed, returning raw contributions", primary);
            Ok((combined, contributions[0].agent_id.clone()))
        }
    }

    /// Each agent refines the previous one's output
    async fn run_pipeline(
        &self,
        request: &ChatRequest,
        decision: &RoutingDecision,
        reporter: &StatusReporter,
    ) -> anyhow::Result<(String, String)> {
        let mut previous: Option<(String, String)> = None;
        let mut last_error = None;

        for agent_id in decision.agents() {
            let hand_off = previous.as_ref().map(|(prev_agent, output)| {
                format!(
                    "Output of the previous stage ({}), to review and improve:\n\n{}",
                    prev_agent, output
                )
            });
            let call = self.prepare(&agent_id, request, hand_off.as_deref(), &request.message);
            let result = call.run(reporter).await;
            if result.status == AgentRunStatus::Completed {
                debug!("Pipeline stage {} completed", agent_id);
                previous = Some((agent_id, result.output));
            } else {
                debug!("Pipeline stage {} skipped", agent_id);
                last_error = Some(result.output);
            }
        }

        match previous {
            Some((agent_id, output)) => Ok((output, agent_id)),
            None => Err(anyhow!(
                "{}",
                last_error
                    .map(|e| e.trim_start_matches("Error: ").to_string())
                    .unwrap_or_else(|| "No agent available".to_string())
            )),
        }
    }

    /// All agents answer; results are listed per agent
    async fn run_parallel(
        &self,
        request: &ChatRequest,
        decision: &RoutingDecision,
        reporter: &StatusReporter,
    ) -> anyhow::Result<(String, String)> {
        let agents = decision.agents();
        let results = self.run_concurrently(&agents, request, reporter).await;
        let first_completed = results
            .iter()
            .find(|r| r.status == AgentRunStatus::Completed)
            .map(|r| r.agent_id.clone());

        match first_completed {
            Some(agent_id) => Ok((format_results(&results), agent_id)),
            None => Err(anyhow!("All agents failed\n\n{}", format_results(&results))),
        }
    }
}
