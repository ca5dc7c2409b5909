//! Query routing
//!
//! Classifies an incoming query by intent and complexity and picks the agent
//! that should answer it, plus up to two fallbacks. Keyword heuristics run
//! first (fast, free); an optional LLM pass only handles queries no rule
//! matched.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agents::profile::{
    ARCHITECTURE, CODE_GENERATION, DEBUGGING, DOCUMENTATION, RESEARCH, TESTING,
};
use crate::agents::{AgentRegistry, Capability};
use crate::error::TorqError;
use crate::providers::{ChatMessage, LlmProvider};

/// Estimated effort needed to answer a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Which agent answers a query, and who to try next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub primary_agent: String,
    pub fallback_agents: Vec<String>,
    pub required_capabilities: Vec<Capability>,
    pub complexity: Complexity,
    /// Informational only; nothing retries or throttles on it
    pub confidence: f32,
    pub reasoning: String,
}

impl RoutingDecision {
    /// Primary followed by fallbacks
    pub fn agents(&self) -> Vec<String> {
        let mut agents = Vec::with_capacity(1 + self.fallback_agents.len());
        agents.push(self.primary_agent.clone());
        agents.extend(self.fallback_agents.iter().cloned());
        agents
    }
}

/// Configuration for the query router
#[derive(Debug, Clone)]
pub struct QueryRouterConfig {
    /// Whether to ask the LLM when no keyword rule matched
    pub use_llm_classification: bool,
    /// Whether the router is enabled at all
    pub enabled: bool,
    pub max_fallbacks: usize,
}

impl Default for QueryRouterConfig {
    fn default() -> Self {
        Self {
            use_llm_classification: false, // heuristics are free
            enabled: true,
            max_fallbacks: 2,
        }
    }
}

/// Keyword rules in tie-break order. A single-word keyword matches any word
/// starting with it ("test" matches "tests", not "latest").
const AGENT_RULES: &[(&str, &[&str])] = &[
    (
        DEBUGGING,
        &[
            "debug", "bug", "error", "exception", "traceback", "stack trace", "crash", "fix",
            "broken", "not working", "fails", "failing", "panic", "segfault",
        ],
    ),
    (
        TESTING,
        &["test", "unit test", "coverage", "mock", "assert", "pytest", "jest", "tdd"],
    ),
    (
        DOCUMENTATION,
        &["document", "docs", "explain", "readme", "docstring", "comment", "tutorial", "describe"],
    ),
    (
        ARCHITECTURE,
        &["architect", "design", "scalab", "microservice", "system design", "pattern", "diagram"],
    ),
    (
        RESEARCH,
        &[
            "research", "compare", "latest", "investigate", "idea", "brainstorm", "alternative",
            "best practice", "pros and cons",
        ],
    ),
    (
        CODE_GENERATION,
        &[
            "write", "implement", "create", "function", "class", "refactor", "generate", "build",
            "code", "script",
        ],
    ),
];

/// Who to try when the primary agent cannot answer
fn default_fallback(primary: &str) -> &'static str {
    match primary {
        DEBUGGING => CODE_GENERATION,
        TESTING => CODE_GENERATION,
        DOCUMENTATION => RESEARCH,
        ARCHITECTURE => RESEARCH,
        RESEARCH => DOCUMENTATION,
        _ => DEBUGGING,
    }
}

const HIGH_COMPLEXITY_SIGNALS: &[&str] = &[
    "architect",
    "system design",
    "end to end",
    "entire",
    "multiple",
    "across",
    "step by step",
    "migrat",
];

const LOW_COMPLEXITY_MAX_WORDS: usize = 8;
const HIGH_COMPLEXITY_MIN_WORDS: usize = 41;
const UNMATCHED_CONFIDENCE: f32 = 0.3;
const LLM_CONFIDENCE: f32 = 0.7;

fn tokenize(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether the word sequence contains the keyword; the last keyword word
/// only has to prefix the query word
fn matches_keyword(words: &[String], keyword: &str) -> bool {
    let parts: Vec<&str> = keyword.split(' ').collect();
    let n = parts.len();
    if n == 0 || words.len() < n {
        return false;
    }
    words.windows(n).any(|window| {
        window[..n - 1]
            .iter()
            .zip(&parts[..n - 1])
            .all(|(w, p)| w == p)
            && window[n - 1].starts_with(parts[n - 1])
    })
}

/// Keyword hits per agent id, in rule order
fn score_agents(words: &[String]) -> Vec<(&'static str, usize)> {
    AGENT_RULES
        .iter()
        .map(|(agent, keywords)| {
            let hits = keywords.iter().filter(|k| matches_keyword(words, k)).count();
            (*agent, hits)
        })
        .collect()
}

fn estimate_complexity(query: &str, words: &[String]) -> Complexity {
    let high_signal = HIGH_COMPLEXITY_SIGNALS
        .iter()
        .any(|s| matches_keyword(words, s));
    if words.len() >= HIGH_COMPLEXITY_MIN_WORDS || high_signal {
        Complexity::High
    } else if words.len() <= LOW_COMPLEXITY_MAX_WORDS && !query.contains("```") {
        Complexity::Low
    } else {
        Complexity::Medium
    }
}

fn capabilities_of(registry: &AgentRegistry, agent_id: &str) -> Vec<Capability> {
    registry
        .profile(agent_id)
        .map(|p| p.capabilities.clone())
        .unwrap_or_default()
}

/// Fallbacks ranked by keyword hits, then the primary's default fallback
fn pick_fallbacks(
    registry: &AgentRegistry,
    primary: &str,
    scores: &[(&'static str, usize)],
    max: usize,
) -> Vec<String> {
    let mut ranked: Vec<(&'static str, usize)> = scores
        .iter()
        .filter(|(agent, hits)| *hits > 0 && *agent != primary)
        .copied()
        .collect();
    // Stable sort keeps rule order between equal scores
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let mut fallbacks: Vec<String> = Vec::new();
    let candidates = ranked
        .into_iter()
        .map(|(agent, _)| agent)
        .chain(std::iter::once(default_fallback(primary)));
    for agent in candidates {
        if fallbacks.len() >= max {
            break;
        }
        if agent != primary && registry.contains(agent) && !fallbacks.iter().any(|f| f == agent) {
            fallbacks.push(agent.to_string());
        }
    }
    fallbacks
}

/// Heuristic classification (fast, no API call)
pub fn classify(query: &str, registry: &AgentRegistry) -> RoutingDecision {
    classify_with_limit(query, registry, QueryRouterConfig::default().max_fallbacks)
}

fn classify_with_limit(query: &str, registry: &AgentRegistry, max_fallbacks: usize) -> RoutingDecision {
    let words = tokenize(query);
    let scores: Vec<(&'static str, usize)> = score_agents(&words)
        .into_iter()
        .filter(|(agent, _)| registry.contains(agent))
        .collect();

    let best = scores
        .iter()
        .fold(None::<(&'static str, usize)>, |best, &(agent, hits)| match best {
            Some((_, best_hits)) if best_hits >= hits => best,
            _ if hits == 0 => best,
            _ => Some((agent, hits)),
        });

    let (primary, confidence, reasoning) = match best {
        Some((agent, hits)) => (
            agent.to_string(),
            (0.5 + 0.15 * hits as f32).min(1.0),
            format!("Matched {} keyword(s) for {}", hits, agent),
        ),
        None => {
            let fallback = if registry.contains(CODE_GENERATION) {
                CODE_GENERATION.to_string()
            } else {
                registry.ids().first().map(|s| s.to_string()).unwrap_or_default()
            };
            let reasoning = format!("No keyword matched; defaulting to {}", fallback);
            (fallback, UNMATCHED_CONFIDENCE, reasoning)
        }
    };

    RoutingDecision {
        fallback_agents: pick_fallbacks(registry, &primary, &scores, max_fallbacks),
        required_capabilities: capabilities_of(registry, &primary),
        complexity: estimate_complexity(query, &words),
        confidence,
        reasoning,
        primary_agent: primary,
    }
}

/// Decision for a caller-chosen agent; fallbacks still come from the query
pub fn explicit(
    agent_id: &str,
    query: &str,
    registry: &AgentRegistry,
    max_fallbacks: usize,
) -> std::result::Result<RoutingDecision, TorqError> {
    if !registry.contains(agent_id) {
        return Err(TorqError::AgentNotFound(agent_id.to_string()));
    }
    let words = tokenize(query);
    let scores: Vec<(&'static str, usize)> = score_agents(&words);
    Ok(RoutingDecision {
        primary_agent: agent_id.to_string(),
        fallback_agents: pick_fallbacks(registry, agent_id, &scores, max_fallbacks),
        required_capabilities: capabilities_of(registry, agent_id),
        complexity: estimate_complexity(query, &words),
        confidence: 1.0,
        reasoning: format!("Agent {} selected explicitly", agent_id),
    })
}

/// Route a query to an agent.
///
/// Uses heuristics first, with optional LLM classification when no rule
/// matched.
pub async fn route_query(
    query: &str,
    provider: Option<&dyn LlmProvider>,
    registry: &AgentRegistry,
    config: &QueryRouterConfig,
) -> Result<RoutingDecision> {
    if !config.enabled {
        let words = tokenize(query);
        return Ok(RoutingDecision {
            primary_agent: CODE_GENERATION.to_string(),
            fallback_agents: Vec::new(),
            required_capabilities: capabilities_of(registry, CODE_GENERATION),
            complexity: estimate_complexity(query, &words),
            confidence: UNMATCHED_CONFIDENCE,
            reasoning: "Routing disabled".to_string(),
        });
    }

    let heuristic = classify_with_limit(query, registry, config.max_fallbacks);
    let unmatched = heuristic.confidence <= UNMATCHED_CONFIDENCE;

    if config.use_llm_classification && unmatched {
        if let Some(provider) = provider {
            match classify_with_llm(provider, query, registry).await {
                Ok(Some(agent)) => {
                    debug!("LLM routed query to {}", agent);
                    let mut decision = heuristic.clone();
                    decision.fallback_agents = pick_fallbacks(
                        registry,
                        &agent,
                        &[],
                        config.max_fallbacks,
                    );
                    decision.required_capabilities = capabilities_of(registry, &agent);
                    decision.confidence = LLM_CONFIDENCE;
                    decision.reasoning = format!("LLM classified query as {}", agent);
                    decision.primary_agent = agent;
                    return Ok(decision);
                }
                Ok(None) => debug!("LLM returned an unknown agent, using heuristic"),
                Err(e) => debug!("LLM classification failed, using heuristic: {}", e),
            }
        }
    }

    debug!(
        "Heuristic routed query to {} (fallbacks {:?}, complexity {})",
        heuristic.primary_agent, heuristic.fallback_agents, heuristic.complexity
    );
    Ok(heuristic)
}

/// LLM-based classification for queries no rule matched
async fn classify_with_llm(
    provider: &dyn LlmProvider,
    query: &str,
    registry: &AgentRegistry,
) -> Result<Option<String>> {
    let agent_list = registry
        .ids()
        .iter()
        .map(|id| {
            let description = registry
                .profile(id)
                .map(|p| p.description.as_str())
                .unwrap_or("");
            format!("- {}: {}", id, description)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "Pick the agent best suited to answer this query. Respond with ONLY the agent id.\n\n\
         Agents:\n{}\n\nQuery: {}\n\nAgent id:",
        agent_list, query
    );

    let response = provider
        .chat(
            &[ChatMessage::user(prompt)],
            "You are a query classifier. Respond with exactly one agent id.",
        )
        .await
        .context("Failed to classify query")?;

    let answer = response
        .text
        .trim()
        .trim_matches(|c: char| c == '`' || c == '"' || c == '.')
        .to_lowercase();
    Ok(registry.contains(&answer).then_some(answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::providers::{ChatResponse, ChatUsage, StopReason};

    fn registry() -> AgentRegistry {
        AgentRegistry::with_builtin_agents()
    }

    fn primary(query: &str) -> String {
        classify(query, &registry()).primary_agent
    }

    struct FixedAnswer(&'static str);

    #[async_trait]
    impl LlmProvider for FixedAnswer {
        fn provider_name(&self) -> &str {
            "fixed"
        }
        fn model(&self) -> &str {
            "fixed-model"
        }
        async fn chat(&self, _messages: &[ChatMessage], _system: &str) -> Result<ChatResponse> {
            Ok(ChatResponse {
                text: self.0.to_string(),
                stop_reason: StopReason::EndTurn,
                usage: ChatUsage::default(),
            })
        }
    }

    #[test]
    fn test_routes_debugging() {
        assert_eq!(primary("fix the bug in the login handler"), DEBUGGING);
        assert_eq!(primary("Why does this crash with a traceback?"), DEBUGGING);
        assert_eq!(primary("my build is failing"), DEBUGGING);
    }

    #[test]
    fn test_routes_testing() {
        assert_eq!(primary("write unit tests for the parser"), TESTING);
        assert_eq!(primary("improve coverage of the auth module"), TESTING);
    }

    #[test]
    fn test_latest_is_not_a_test() {
        assert_eq!(primary("what are the latest trends in databases"), RESEARCH);
    }

    #[test]
    fn test_routes_documentation() {
        assert_eq!(primary("explain this function"), DOCUMENTATION);
        assert_eq!(primary("update the README"), DOCUMENTATION);
    }

    #[test]
    fn test_routes_architecture() {
        assert_eq!(primary("design a microservice architecture for payments"), ARCHITECTURE);
    }

    #[test]
    fn test_routes_research() {
        assert_eq!(primary("compare postgres and mysql"), RESEARCH);
        assert_eq!(primary("brainstorm ideas for a side project"), RESEARCH);
    }

    #[test]
    fn test_routes_code_generation() {
        assert_eq!(primary("implement a binary search in Rust"), CODE_GENERATION);
    }

    #[test]
    fn test_unmatched_defaults_to_code_generation() {
        let decision = classify("hello there", &registry());
        assert_eq!(decision.primary_agent, CODE_GENERATION);
        assert!((decision.confidence - UNMATCHED_CONFIDENCE).abs() < f32::EPSILON);
        assert_eq!(decision.fallback_agents, vec![DEBUGGING.to_string()]);
        assert!(decision.reasoning.contains("No keyword matched"));
    }

    #[test]
    fn test_fallbacks_ranked_and_capped() {
        // debugging 2 hits, testing 1, code_generation 1
        let decision = classify("fix the bug and write a test", &registry());
        assert_eq!(decision.primary_agent, DEBUGGING);
        assert_eq!(
            decision.fallback_agents,
            vec![TESTING.to_string(), CODE_GENERATION.to_string()]
        );
        assert!(!decision.fallback_agents.contains(&decision.primary_agent));
    }

    #[test]
    fn test_default_fallback_added() {
        let decision = classify("update the readme", &registry());
        assert_eq!(decision.primary_agent, DOCUMENTATION);
        assert_eq!(decision.fallback_agents, vec![RESEARCH.to_string()]);
    }

    #[test]
    fn test_fallback_ids_exist() {
        let reg = registry();
        for query in ["fix tests", "design docs", "research code patterns", "nothing"] {
            let decision = classify(query, &reg);
            assert!(reg.contains(&decision.primary_agent));
            for f in &decision.fallback_agents {
                assert!(reg.contains(f), "{} is not a known agent", f);
            }
        }
    }

    #[test]
    fn test_complexity() {
        assert_eq!(classify("fix this bug", &registry()).complexity, Complexity::Low);
        assert_eq!(
            classify("migrate the database layer to async", &registry()).complexity,
            Complexity::High
        );
        assert_eq!(
            classify("design the system end-to-end", &registry()).complexity,
            Complexity::High
        );
        assert_eq!(
            classify("```\nlet x = 1;\n```", &registry()).complexity,
            Complexity::Medium
        );
        assert_eq!(
            classify(
                "please write a function that parses the config file and returns a struct",
                &registry()
            )
            .complexity,
            Complexity::Medium
        );
        let long = "word ".repeat(45);
        assert_eq!(classify(&long, &registry()).complexity, Complexity::High);
    }

    #[test]
    fn test_confidence_grows_with_hits() {
        let one = classify("explain", &registry());
        let many = classify("debug the crash, fix the exception and panic", &registry());
        assert!((one.confidence - 0.65).abs() < 1e-4);
        assert!(many.confidence > one.confidence);
        assert!(many.confidence <= 1.0);
    }

    #[test]
    fn test_required_capabilities_follow_primary() {
        let decision = classify("write unit tests", &registry());
        assert_eq!(
            decision.required_capabilities,
            vec![Capability::Testing, Capability::TestGeneration]
        );
    }

    #[test]
    fn test_explicit_routing() {
        let decision = explicit(ARCHITECTURE, "fix the bug", &registry(), 2).unwrap();
        assert_eq!(decision.primary_agent, ARCHITECTURE);
        assert_eq!(decision.fallback_agents[0], DEBUGGING);
        assert!((decision.confidence - 1.0).abs() < f32::EPSILON);

        let err = explicit("ghost", "anything", &registry(), 2).unwrap_err();
        assert!(matches!(err, TorqError::AgentNotFound(_)));
    }

    #[test]
    fn test_explicit_routing_respects_fallback_limit() {
        let query = "fix the bug and write a test";
        let none = explicit(RESEARCH, query, &registry(), 0).unwrap();
        assert_eq!(none.primary_agent, RESEARCH);
        assert!(none.fallback_agents.is_empty());

        let one = explicit(RESEARCH, query, &registry(), 1).unwrap();
        assert_eq!(one.fallback_agents, vec![DEBUGGING.to_string()]);
    }

    #[test]
    fn test_agents_order() {
        let decision = classify("fix the bug and write a test", &registry());
        let agents = decision.agents();
        assert_eq!(agents[0], DEBUGGING);
        assert_eq!(agents.len(), 3);
    }

    #[test]
    fn test_decision_serialization() {
        let decision = classify("fix the crash", &registry());
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["primary_agent"], "debugging");
        assert_eq!(json["complexity"], "low");
        assert_eq!(json["required_capabilities"][0], "debugging");
    }

    #[test]
    fn test_matches_keyword() {
        let words = tokenize("Run the unit-tests, step by step!");
        assert!(matches_keyword(&words, "unit test"));
        assert!(matches_keyword(&words, "step by step"));
        assert!(!matches_keyword(&words, "stack trace"));
    }

    #[tokio::test]
    async fn test_route_disabled() {
        let config = QueryRouterConfig {
            enabled: false,
            ..Default::default()
        };
        let decision = route_query("fix the bug", None, &registry(), &config)
            .await
            .unwrap();
        assert_eq!(decision.primary_agent, CODE_GENERATION);
        assert!(decision.fallback_agents.is_empty());
    }

    #[tokio::test]
    async fn test_route_heuristic_ignores_llm_when_matched() {
        let config = QueryRouterConfig {
            use_llm_classification: true,
            ..Default::default()
        };
        let llm = FixedAnswer("research");
        let decision = route_query("fix the bug", Some(&llm), &registry(), &config)
            .await
            .unwrap();
        assert_eq!(decision.primary_agent, DEBUGGING);
    }

    #[tokio::test]
    async fn test_route_uses_llm_for_unmatched() {
        let config = QueryRouterConfig {
            use_llm_classification: true,
            ..Default::default()
        };
        let llm = FixedAnswer("`architecture`");
        let decision = route_query("hello there", Some(&llm), &registry(), &config)
            .await
            .unwrap();
        assert_eq!(decision.primary_agent, ARCHITECTURE);
        assert_eq!(decision.fallback_agents, vec![RESEARCH.to_string()]);
        assert!(decision.reasoning.contains("LLM"));
    }

    #[tokio::test]
    async fn test_route_llm_unknown_answer_falls_back() {
        let config = QueryRouterConfig {
            use_llm_classification: true,
            ..Default::default()
        };
        let llm = FixedAnswer("poetry");
        let decision = route_query("hello there", Some(&llm), &registry(), &config)
            .await
            .unwrap();
        assert_eq!(decision.primary_agent, CODE_GENERATION);
    }
}
