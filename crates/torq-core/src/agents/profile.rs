//! Agent profile: a named persona with capabilities and a system prompt

use serde::{Deserialize, Serialize};

/// Lifecycle state shown next to each agent in the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Thinking,
    Active,
    Error,
    Success,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Thinking => write!(f, "thinking"),
            Self::Active => write!(f, "active"),
            Self::Error => write!(f, "error"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// Something an agent is good at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CodeGeneration,
    Refactoring,
    Debugging,
    ErrorAnalysis,
    Documentation,
    Explanation,
    Testing,
    TestGeneration,
    Architecture,
    SystemDesign,
    Research,
    WebSearch,
    Ideation,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Same spelling as the serde representation
        let s = match self {
            Self::CodeGeneration => "code_generation",
            Self::Refactoring => "refactoring",
            Self::Debugging => "debugging",
            Self::ErrorAnalysis => "error_analysis",
            Self::Documentation => "documentation",
            Self::Explanation => "explanation",
            Self::Testing => "testing",
            Self::TestGeneration => "test_generation",
            Self::Architecture => "architecture",
            Self::SystemDesign => "system_design",
            Self::Research => "research",
            Self::WebSearch => "web_search",
            Self::Ideation => "ideation",
        };
        f.write_str(s)
    }
}

/// An agent persona
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing)]
    pub system_prompt: String,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            capabilities: Vec::new(),
            status: AgentStatus::Idle,
            model: None,
            system_prompt: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[Capability]) -> Self {
        self.capabilities = capabilities.to_vec();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

pub const CODE_GENERATION: &str = "code_generation";
pub const DEBUGGING: &str = "debugging";
pub const DOCUMENTATION: &str = "documentation";
pub const TESTING: &str = "testing";
pub const ARCHITECTURE: &str = "architecture";
pub const RESEARCH: &str = "research";

/// The six personas every console starts with, in display order
pub fn builtin_profiles() -> Vec<AgentProfile> {
    vec![
        AgentProfile::new(CODE_GENERATION, "Code Generation Agent")
            .with_description("Writes, completes and refactors code")
            .with_capabilities(&[Capability::CodeGeneration, Capability::Refactoring])
            .with_system_prompt(
                "You are an expert software engineer. Write correct, idiomatic, \
                 well-structured code. Return code in fenced blocks with the language \
                 tag and keep explanations short.",
            ),
        AgentProfile::new(DEBUGGING, "Debugging Agent")
            .with_description("Finds root causes of errors and proposes fixes")
            .with_capabilities(&[Capability::Debugging, Capability::ErrorAnalysis])
            .with_system_prompt(
                "You are a debugging specialist. Identify the root cause of the problem \
                 before suggesting a fix. Quote the relevant lines, explain the failure, \
                 then give the minimal change that fixes it.",
            ),
        AgentProfile::new(DOCUMENTATION, "Documentation Agent")
            .with_description("Explains code and writes documentation")
            .with_capabilities(&[Capability::Documentation, Capability::Explanation])
            .with_system_prompt(
                "You are a technical writer. Produce clear, accurate documentation and \
                 explanations aimed at the reader's level. Prefer examples over prose.",
            ),
        AgentProfile::new(TESTING, "Testing Agent")
            .with_description("Designs and writes automated tests")
            .with_capabilities(&[Capability::Testing, Capability::TestGeneration])
            .with_system_prompt(
                "You are a test engineer. Write focused automated tests covering normal \
                 behaviour, edge cases and failure paths. Use the project's existing test \
                 framework when one is apparent.",
            ),
        AgentProfile::new(ARCHITECTURE, "Architecture Agent")
            .with_description("Reviews and designs system architecture")
            .with_capabilities(&[Capability::Architecture, Capability::SystemDesign])
            .with_system_prompt(
                "You are a software architect. Reason about components, boundaries, data \
                 flow and trade-offs. State assumptions and recommend one design.",
            ),
        AgentProfile::new(RESEARCH, "Research Agent")
            .with_description("Investigates topics, compares options and generates ideas")
            .with_capabilities(&[
                Capability::Research,
                Capability::WebSearch,
                Capability::Ideation,
            ])
            .with_system_prompt(
                "You are a research assistant. Investigate the question, compare the \
                 options you find and summarise the evidence with a clear conclusion.",
            ),
    ]
}
