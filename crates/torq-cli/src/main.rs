use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use torq_core::providers::{AnthropicProvider, OpenAiCompatProvider, OpenAiProvider};
use torq_core::{
    AgentRegistry, ChatRequest, LlmProvider, McpClient, ModelRouter, OrchestrationMode,
    Orchestrator, SkillSet, load_skills_dir,
};
use torq_gateway::GatewayServer;

mod config;
mod console;

use config::TorqConfig;
use console::{Console, ConsoleOptions};

/// Review skills installed by `torq init`
const BUNDLED_SKILLS: &[(&str, &str)] = &[
    ("firebase", include_str!("../../../skills/firebase/SKILL.md")),
    ("github", include_str!("../../../skills/github/SKILL.md")),
    ("supabase", include_str!("../../../skills/supabase/SKILL.md")),
    ("vercel", include_str!("../../../skills/vercel/SKILL.md")),
];

const DEFAULT_PROVIDER_ORDER: &[&str] = &["anthropic", "openai", "openai_compat"];

#[derive(Parser)]
#[command(name = "torq")]
#[command(version)]
#[command(about = "TORQ console: route questions to specialised AI agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Start the interactive console
    #[arg(short, long)]
    interactive: bool,

    /// Connect to an MCP server (HTTP JSON-RPC endpoint) at startup
    #[arg(long, value_name = "URL", global = true)]
    mcp_connect: Option<String>,

    /// Match voice shortcut phrases ("debug this", "write tests for") in the console
    #[arg(long)]
    voice_shortcuts: bool,

    /// Ideation mode: brainstorm with the research agent and its peers
    #[arg(long, global = true)]
    ideate: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Send a one-shot message
    Ask {
        /// The message to send
        message: String,

        /// Skip routing and ask this agent
        #[arg(long)]
        agent: Option<String>,

        /// single_agent, multi_agent, pipeline or parallel
        #[arg(long)]
        mode: Option<String>,

        /// Attach a review skill
        #[arg(long)]
        skill: Option<String>,
    },

    /// Initialize config directory, default config and review skills
    Init,

    /// Show current configuration
    Config,

    /// List agents and their capabilities
    Agents,

    /// List loaded review skills
    Skills,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Some(Commands::Init) => cmd_init().await,
        Some(Commands::Config) => cmd_config(&cli.config),
        Some(Commands::Agents) => cmd_agents().await,
        Some(Commands::Skills) => cmd_skills(&cli.config),
        Some(Commands::Serve { bind, port }) => cmd_serve(&cli, bind.clone(), *port).await,
        Some(Commands::Ask {
            message,
            agent,
            mode,
            skill,
        }) => cmd_ask(&cli, message, agent.as_deref(), mode.as_deref(), skill.as_deref()).await,
        None => cmd_console(&cli).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        restrict_permissions(&config_path)?;
        info!("Created default config at {}", config_path.display());
    }

    let skills_dir = config_dir.join("skills");
    for (name, content) in BUNDLED_SKILLS {
        let dir = skills_dir.join(name);
        let path = dir.join("SKILL.md");
        if path.exists() {
            continue;
        }
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(&path, content).await?;
        info!("Installed review skill at {}", path.display());
    }

    println!("TORQ initialized at {}", config_dir.display());
    println!("Edit {} to configure your API keys.", config_path.display());
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = TorqConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}

async fn cmd_agents() -> Result<()> {
    let registry = AgentRegistry::with_builtin_agents();
    for agent in registry.list().await {
        let caps: Vec<String> = agent.capabilities.iter().map(|c| c.to_string()).collect();
        println!("{:<16} {:<26} {}", agent.id, agent.name, caps.join(", "));
    }
    Ok(())
}

fn cmd_skills(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = TorqConfig::load(config_path)?;
    let skills = load_skills(&cfg);
    if skills.is_empty() {
        println!("No review skills in {}", cfg.skills_dir().display());
        return Ok(());
    }
    for skill in skills.iter() {
        let platform = skill.platform.as_deref().unwrap_or("-");
        println!("{:<20} {:<10} {}", skill.name, platform, skill.description);
    }
    Ok(())
}

async fn cmd_serve(cli: &Cli, bind: Option<String>, port: Option<u16>) -> Result<()> {
    let mut cfg = TorqConfig::load(&cli.config)?;
    if let Some(bind) = bind {
        cfg.gateway.bind = bind;
    }
    if let Some(port) = port {
        cfg.gateway.port = port;
    }
    let addr = cfg.gateway.socket_addr().await?;

    let orchestrator = build_orchestrator(&cfg)?;
    let mcp = connect_mcp(&cfg, cli.mcp_connect.as_deref()).await;

    let mut server = GatewayServer::new(addr, orchestrator)
        .with_skills(load_skills(&cfg))
        .with_mcp_tools(mcp.as_ref().map(McpClient::tool_names).unwrap_or_default());
    if !cfg.gateway.auth_token.is_empty() {
        server = server.with_auth_token(cfg.gateway.auth_token.clone());
    } else {
        warn!("Gateway auth_token is empty, the API is open to anyone who can reach {}", addr);
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
        }
        shutdown.cancel();
    });

    server.run(cancel).await
}

async fn cmd_ask(
    cli: &Cli,
    message: &str,
    agent: Option<&str>,
    mode: Option<&str>,
    skill: Option<&str>,
) -> Result<()> {
    let cfg = TorqConfig::load(&cli.config)?;
    let orchestrator = build_orchestrator(&cfg)?;

    let mut request = ChatRequest::new(message);
    if let Some(agent) = agent {
        request = request.with_agent(agent);
    }
    if let Some(mode) = mode {
        request = request.with_mode(mode.parse::<OrchestrationMode>()?);
    }
    if let Some(name) = skill {
        let skills = load_skills(&cfg);
        request = request.with_skill(skills.require(name)?.clone());
    }
    if cli.ideate {
        request = console::apply_ideation(request);
    }

    let outcome = orchestrator.handle(request).await?;
    if cli.debug {
        eprintln!("{}", serde_json::to_string_pretty(&outcome.routing_decision)?);
    }
    println!("{}", outcome.response);

    if !outcome.success {
        return Err(anyhow!("No agent could answer ({})", outcome.agent_id));
    }
    Ok(())
}

async fn cmd_console(cli: &Cli) -> Result<()> {
    if cli.interactive {
        info!("Starting interactive console");
    }
    let cfg = TorqConfig::load(&cli.config)?;
    let orchestrator = build_orchestrator(&cfg)?;
    let mcp = connect_mcp(&cfg, cli.mcp_connect.as_deref()).await;

    let options = ConsoleOptions {
        voice_shortcuts: cli.voice_shortcuts,
        ideate: cli.ideate,
    };
    Console::new(orchestrator, load_skills(&cfg), mcp, options)
        .run()
        .await
}

fn load_skills(cfg: &TorqConfig) -> SkillSet {
    let dir = cfg.skills_dir();
    match load_skills_dir(&dir) {
        Ok(skills) => {
            info!("Loaded {} review skills from {}", skills.len(), dir.display());
            skills
        }
        Err(e) => {
            warn!("Failed to load review skills from {}: {}", dir.display(), e);
            SkillSet::default()
        }
    }
}

/// MCP connection failures are logged; the console and gateway still start
async fn connect_mcp(cfg: &TorqConfig, cli_url: Option<&str>) -> Option<McpClient> {
    let url = cfg.mcp_url(cli_url)?;
    match McpClient::connect(url).await {
        Ok(client) => {
            info!("Connected to MCP server {} ({} tools)", url, client.tools().len());
            Some(client)
        }
        Err(e) => {
            warn!("Could not connect to MCP server {}: {}", url, e);
            None
        }
    }
}

fn provider_order(cfg: &TorqConfig) -> Vec<String> {
    if cfg.providers.failover_order.is_empty() {
        DEFAULT_PROVIDER_ORDER.iter().map(|s| s.to_string()).collect()
    } else {
        cfg.providers.failover_order.clone()
    }
}

/// Build one provider by name. `None` when it is not configured.
fn build_provider(
    cfg: &TorqConfig,
    name: &str,
    model_override: Option<&str>,
) -> Result<Option<Box<dyn LlmProvider>>> {
    let provider: Box<dyn LlmProvider> = match name {
        "anthropic" => {
            let Some(a) = cfg.providers.anthropic.as_ref().filter(|a| !a.api_key.is_empty()) else {
                return Ok(None);
            };
            let model = model_override.unwrap_or(&cfg.agent.default_model);
            Box::new(AnthropicProvider::new(
                a.api_key.clone(),
                model.to_string(),
                a.base_url.clone(),
                cfg.agent.max_tokens,
            )?)
        }
        "openai" => {
            let Some(o) = cfg.providers.openai.as_ref().filter(|o| !o.api_key.is_empty()) else {
                return Ok(None);
            };
            let model = model_override.unwrap_or(&o.model);
            Box::new(OpenAiProvider::new(
                o.api_key.clone(),
                model.to_string(),
                o.base_url.clone(),
                o.max_tokens,
            )?)
        }
        "openai_compat" => {
            let Some(c) = cfg.providers.openai_compat.as_ref() else {
                return Ok(None);
            };
            let model = model_override.unwrap_or(&c.model);
            Box::new(OpenAiCompatProvider::new(
                c.name.clone(),
                c.api_key.clone(),
                model.to_string(),
                c.base_url.clone(),
                c.max_tokens,
            )?)
        }
        other => {
            warn!("Unknown provider '{}' in failover_order, skipping", other);
            return Ok(None);
        }
    };
    Ok(Some(provider))
}

fn build_model_router(cfg: &TorqConfig) -> Result<ModelRouter> {
    let mut providers = Vec::new();
    for name in provider_order(cfg) {
        if let Some(provider) = build_provider(cfg, &name, None)? {
            info!("Provider '{}' ready (model: {})", name, provider.model());
            providers.push(provider);
        }
    }
    ModelRouter::with_failover(providers).context(
        "No LLM provider configured. Set ANTHROPIC_API_KEY or add [providers.openai] / [providers.openai_compat] to config.toml",
    )
}

fn build_orchestrator(cfg: &TorqConfig) -> Result<Orchestrator> {
    let router = build_model_router(cfg)?;
    let primary = provider_order(cfg)
        .into_iter()
        .find(|name| router.provider_names().contains(&name_label(cfg, name)))
        .unwrap_or_else(|| "anthropic".to_string());

    let mut registry = AgentRegistry::with_builtin_agents();
    let mut overrides: Vec<(String, Arc<dyn LlmProvider>)> = Vec::new();
    for (agent_id, model) in &cfg.agent.models {
        if let Err(e) = registry.set_model(agent_id, model.clone()) {
            warn!("Ignoring model override: {}", e);
            continue;
        }
        if let Some(provider) = build_provider(cfg, &primary, Some(model))? {
            info!("Agent '{}' uses model {}", agent_id, model);
            overrides.push((agent_id.clone(), Arc::from(provider)));
        }
    }

    let orchestrator = Orchestrator::new(Arc::new(router), Arc::new(registry))
        .with_config((&cfg.orchestrator).into())
        .with_router_config((&cfg.router).into());
    Ok(overrides
        .into_iter()
        .fold(orchestrator, |orch, (agent_id, provider)| {
            orch.with_agent_provider(agent_id, provider)
        }))
}

/// Name a configured provider reports through `provider_name()`
fn name_label<'a>(cfg: &'a TorqConfig, name: &'a str) -> &'a str {
    match (name, cfg.providers.openai_compat.as_ref()) {
        ("openai_compat", Some(c)) => &c.name,
        _ => name,
    }
}
