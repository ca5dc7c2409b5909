//! Interactive console: slash commands plus free-form chat routed through
//! the orchestrator

use anyhow::Result;
use serde_json::Value;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use torq_core::{
    ChatMessage, ChatRequest, ChatSession, McpClient, Message, OrchestrationMode, Orchestrator,
    SkillDefinition, SkillSet, match_shortcut,
};

const RESEARCH_AGENT: &str = "research";

const IDEATION_CONTEXT: &str = "Ideation session: brainstorm freely. Offer several distinct \
ideas before narrowing down, note the trade-offs of each and say which one you would try first.";

const HELP: &str = "\
Commands:
  /help                 Show this help
  /agents               List agents and their capabilities
  /agent <id|auto>      Pin an agent, or return to automatic routing
  /mode <mode>          single_agent, multi_agent, pipeline or parallel
  /skills               List review skills
  /skill <name|off>     Attach a review skill to every message
  /tools                List tools of the connected MCP server
  /tool <name> <json>   Call an MCP tool
  /clear                Start a new conversation
  /quit                 Exit";

/// Route a request the way ideation mode does
pub fn apply_ideation(mut request: ChatRequest) -> ChatRequest {
    if request.agent_id.is_none() {
        request.agent_id = Some(RESEARCH_AGENT.to_string());
    }
    request.mode = OrchestrationMode::MultiAgent;
    request.context = Some(match request.context.take() {
        Some(ctx) => format!("{}\n\n{}", ctx, IDEATION_CONTEXT),
        None => IDEATION_CONTEXT.to_string(),
    });
    request
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Help,
    Agents,
    Agent(Option<String>),
    Mode(String),
    Skills,
    Skill(Option<String>),
    Tools,
    Tool { name: String, args: String },
    Clear,
    Quit,
    Unknown(String),
    Chat(String),
    Empty,
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Chat(line.to_string());
    };

    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest, ""),
    };

    match cmd {
        "help" | "?" => Command::Help,
        "agents" => Command::Agents,
        "agent" => match arg {
            "" | "auto" => Command::Agent(None),
            id => Command::Agent(Some(id.to_string())),
        },
        "mode" => Command::Mode(arg.to_string()),
        "skills" => Command::Skills,
        "skill" => match arg {
            "" | "off" => Command::Skill(None),
            name => Command::Skill(Some(name.to_string())),
        },
        "tools" => Command::Tools,
        "tool" => {
            let (name, args) = match arg.split_once(char::is_whitespace) {
                Some((name, args)) => (name, args.trim()),
                None => (arg, ""),
            };
            Command::Tool {
                name: name.to_string(),
                args: args.to_string(),
            }
        }
        "clear" => Command::Clear,
        "quit" | "exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

pub enum Flow {
    Continue(String),
    Quit,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleOptions {
    pub voice_shortcuts: bool,
    pub ideate: bool,
}

pub struct Console {
    orchestrator: Orchestrator,
    skills: SkillSet,
    mcp: Option<McpClient>,
    options: ConsoleOptions,
    session: ChatSession,
    agent: Option<String>,
    mode: OrchestrationMode,
    skill: Option<SkillDefinition>,
}

impl Console {
    pub fn new(
        orchestrator: Orchestrator,
        skills: SkillSet,
        mcp: Option<McpClient>,
        options: ConsoleOptions,
    ) -> Self {
        Self {
            orchestrator,
            skills,
            mcp,
            options,
            session: ChatSession::new("Console"),
            agent: None,
            mode: OrchestrationMode::SingleAgent,
            skill: None,
        }
    }

    /// Read lines from stdin until `/quit` or EOF
    pub async fn run(mut self) -> Result<()> {
        println!(
            "TORQ console ({} / {}). Type /help for commands.",
            self.orchestrator.provider_name(),
            self.orchestrator.model()
        );
        if self.options.ideate {
            println!("Ideation mode: questions go to the research agent with multiple contributors.");
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("{}> ", self.prompt_label());
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            match self.handle_line(&line).await {
                Flow::Continue(output) => {
                    if !output.is_empty() {
                        println!("{}\n", output);
                    }
                }
                Flow::Quit => break,
            }
        }
        println!("Bye.");
        Ok(())
    }

    fn prompt_label(&self) -> String {
        let agent = self.agent.as_deref().unwrap_or("auto");
        match &self.skill {
            Some(skill) => format!("{} [{}]", agent, skill.name),
            None => agent.to_string(),
        }
    }

    pub async fn handle_line(&mut self, line: &str) -> Flow {
        let output = match parse_command(line) {
            Command::Empty => String::new(),
            Command::Quit => return Flow::Quit,
            Command::Help => HELP.to_string(),
            Command::Agents => self.list_agents().await,
            Command::Agent(None) => {
                self.agent = None;
                "Automatic routing".to_string()
            }
            Command::Agent(Some(id)) => {
                if self.orchestrator.registry().contains(&id) {
                    let out = format!("Pinned agent '{}'", id);
                    self.agent = Some(id);
                    out
                } else {
                    format!(
                        "Unknown agent '{}'. Available: {}",
                        id,
                        self.orchestrator.registry().ids().join(", ")
                    )
                }
            }
            Command::Mode(mode) => match mode.parse::<OrchestrationMode>() {
                Ok(mode) => {
                    self.mode = mode;
                    format!("Mode set to {}", mode)
                }
                Err(e) => e.to_string(),
            },
            Command::Skills => self.list_skills(),
            Command::Skill(None) => {
                self.skill = None;
                "Review skill detached".to_string()
            }
            Command::Skill(Some(name)) => match self.skills.require(&name) {
                Ok(skill) => {
                    self.skill = Some(skill.clone());
                    format!("Review skill '{}' attached", name)
                }
                Err(e) => e.to_string(),
            },
            Command::Tools => self.list_tools(),
            Command::Tool { name, args } => self.call_tool(&name, &args).await,
            Command::Clear => {
                self.session = ChatSession::new("Console");
                "Conversation cleared".to_string()
            }
            Command::Unknown(cmd) => format!("Unknown command '/{}'. Type /help.", cmd),
            Command::Chat(text) => self.chat(&text).await,
        };
        Flow::Continue(output)
    }

    fn build_request(&self, text: &str) -> ChatRequest {
        let mut request = ChatRequest::new(text).with_mode(self.mode);
        if let Some(agent) = &self.agent {
            request = request.with_agent(agent.clone());
        }

        if self.options.voice_shortcuts {
            if let Some(shortcut) = match_shortcut(text) {
                debug!("Voice shortcut selected agent '{}'", shortcut.agent_id);
                request.message = shortcut.message;
                request.agent_id = Some(shortcut.agent_id.to_string());
                if let Some(mode) = shortcut.mode {
                    request.mode = mode;
                }
            }
        }

        if self.options.ideate {
            request = apply_ideation(request);
        }
        if let Some(skill) = &self.skill {
            request = request.with_skill(skill.clone());
        }

        let history: Vec<ChatMessage> = self.session.messages.iter().map(ChatMessage::from).collect();
        request.with_history(history)
    }

    async fn chat(&mut self, text: &str) -> String {
        let request = self.build_request(text);
        match self.orchestrator.handle(request).await {
            Ok(outcome) => {
                self.session.push(Message::user(text));
                let agent = outcome.agent_used.as_deref().unwrap_or(&outcome.agent_id);
                let reply = if outcome.success {
                    Message::assistant(outcome.response.clone(), agent)
                } else {
                    Message::error(outcome.response.clone())
                };
                self.session.push(reply);
                format!("[{} | {}]\n{}", agent, outcome.mode, outcome.response)
            }
            Err(e) => format!("Error: {}", e),
        }
    }

    async fn list_agents(&self) -> String {
        self.orchestrator
            .registry()
            .list()
            .await
            .iter()
            .map(|agent| {
                let caps: Vec<String> = agent.capabilities.iter().map(|c| c.to_string()).collect();
                format!("{:<16} {:<8} {}", agent.id, agent.status, caps.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn list_skills(&self) -> String {
        if self.skills.is_empty() {
            return "No review skills loaded".to_string();
        }
        self.skills
            .iter()
            .map(|s| format!("{:<20} {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn list_tools(&self) -> String {
        match &self.mcp {
            None => "No MCP server connected (use --mcp-connect <url>)".to_string(),
            Some(client) if client.tools().is_empty() => {
                format!("{} exposes no tools", client.url())
            }
            Some(client) => client
                .tools()
                .iter()
                .map(|t| format!("{:<20} {}", t.name, t.description))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    async fn call_tool(&mut self, name: &str, args: &str) -> String {
        let Some(client) = self.mcp.as_mut() else {
            return "No MCP server connected (use --mcp-connect <url>)".to_string();
        };
        if name.is_empty() {
            return "Usage: /tool <name> <json>".to_string();
        }

        let args: Value = if args.is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(args) {
                Ok(v) => v,
                Err(e) => return format!("Invalid JSON arguments: {}", e),
            }
        };

        match client.call_tool(name, args).await {
            Ok(result) => result.text(),
            Err(e) => {
                warn!("MCP tool '{}' failed: {}", name, e);
                format!("Error: {}", e)
            }
        }
    }
}
