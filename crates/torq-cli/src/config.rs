use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::warn;

use torq_core::{OrchestratorConfig, QueryRouterConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TorqConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-agent model overrides, keyed by agent id
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            max_tokens: default_max_tokens(),
            models: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: Option<AnthropicConfig>,
    #[serde(default)]
    pub openai: Option<OpenAiProviderConfig>,
    #[serde(default)]
    pub openai_compat: Option<OpenAiCompatProviderConfig>,
    /// Provider names tried in order: "anthropic", "openai", "openai_compat"
    #[serde(default)]
    pub failover_order: Vec<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl std::fmt::Debug for OpenAiProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiCompatProviderConfig {
    #[serde(default = "default_compat_name")]
    pub name: String,
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl std::fmt::Debug for OpenAiCompatProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProviderConfig")
            .field("name", &self.name)
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn default_compat_name() -> String {
    "openai_compat".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub use_llm_classification: bool,
    #[serde(default = "default_max_fallbacks")]
    pub max_fallbacks: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_fallbacks() -> usize {
    2
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_llm_classification: false,
            max_fallbacks: default_max_fallbacks(),
        }
    }
}

impl From<&RouterConfig> for QueryRouterConfig {
    fn from(cfg: &RouterConfig) -> Self {
        Self {
            use_llm_classification: cfg.use_llm_classification,
            enabled: cfg.enabled,
            max_fallbacks: cfg.max_fallbacks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
}

fn default_max_concurrent_agents() -> usize {
    4
}

fn default_agent_timeout_secs() -> u64 {
    120
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            agent_timeout_secs: default_agent_timeout_secs(),
        }
    }
}

impl From<&OrchestratorSection> for OrchestratorConfig {
    fn from(cfg: &OrchestratorSection) -> Self {
        Self {
            max_concurrent_agents: cfg.max_concurrent_agents.max(1),
            agent_timeout_secs: cfg.agent_timeout_secs,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_token: String,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("auth_token", &mask_secret(&self.auth_token))
            .finish()
    }
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            port: default_gateway_port(),
            auth_token: String::new(),
        }
    }
}

impl GatewayConfig {
    /// Listen address; `bind` is an IP literal (v4 or v6) or a hostname
    pub async fn socket_addr(&self) -> Result<SocketAddr> {
        let bind = self.bind.trim();
        let bind = bind
            .strip_prefix('[')
            .and_then(|b| b.strip_suffix(']'))
            .unwrap_or(bind);
        if let Ok(ip) = bind.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        tokio::net::lookup_host((bind, self.port))
            .await
            .with_context(|| format!("Invalid gateway bind address '{}'", self.bind))?
            .next()
            .with_context(|| format!("Gateway host '{}' did not resolve", self.bind))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    #[serde(default = "default_skills_dir")]
    pub dir: String,
}

fn default_skills_dir() -> String {
    "~/.torq/skills".to_string()
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            dir: default_skills_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub url: Option<String>,
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".torq")
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

impl TorqConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        #[cfg(unix)]
        check_permissions(&path)?;

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `torq init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.warn_hardcoded_secrets();
        Ok(config)
    }

    /// Parse TOML after expanding allowlisted `${VAR}` references
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        Ok(toml::from_str(&expanded)?)
    }

    pub fn skills_dir(&self) -> PathBuf {
        expand_home(&self.skills.dir)
    }

    /// The configured MCP server, unless overridden on the command line
    pub fn mcp_url<'a>(&'a self, cli_override: Option<&'a str>) -> Option<&'a str> {
        cli_override
            .or(self.mcp.url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }

    fn warn_hardcoded_secrets(&self) {
        let anthropic_hardcoded = self
            .providers
            .anthropic
            .as_ref()
            .is_some_and(|a| a.api_key.starts_with("sk-ant-"));
        if anthropic_hardcoded {
            warn!(
                "API key is hardcoded in config file. For security, use environment variables: api_key = \"${{ANTHROPIC_API_KEY}}\""
            );
        }

        let openai_hardcoded = self
            .providers
            .openai
            .as_ref()
            .is_some_and(|o| o.api_key.starts_with("sk-"));
        if openai_hardcoded {
            warn!(
                "OpenAI key is hardcoded in config file. For security, use environment variables: api_key = \"${{OPENAI_API_KEY}}\""
            );
        }
    }
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        // group or other can read
        if mode & 0o077 != 0 {
            return Err(anyhow::anyhow!(
                "Config file {:?} has overly permissive permissions ({:o}). \
                 It may contain secrets. Fix with: chmod 600 {:?}",
                path,
                mode & 0o777,
                path
            ));
        }
    }
    Ok(())
}

/// Environment variables that may be expanded in config files
const ALLOWED_ENV_VARS: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "GROQ_API_KEY",
    "TORQ_GATEWAY_TOKEN",
    "TORQ_MCP_URL",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let cfg = TorqConfig::parse(include_str!("../../../config/default.toml")).unwrap();
        assert!(cfg.router.enabled);
        assert!(!cfg.router.use_llm_classification);
        assert_eq!(cfg.orchestrator.max_concurrent_agents, 4);
        assert_eq!(cfg.gateway.port, 8000);
        assert!(cfg.providers.anthropic.is_some());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = TorqConfig::parse("").unwrap();
        assert_eq!(cfg.agent.max_tokens, 4096);
        assert_eq!(cfg.gateway.bind, "127.0.0.1");
        assert!(cfg.providers.anthropic.is_none());
        assert!(cfg.mcp.url.is_none());
        assert_eq!(cfg.skills.dir, "~/.torq/skills");
    }

    #[test]
    fn test_sections() {
        let cfg = TorqConfig::parse(
            r#"
[agent]
default_model = "claude-haiku"
[agent.models]
testing = "gpt-4o-mini"

[providers.openai_compat]
name = "groq"
base_url = "https://api.groq.com/openai/v1"
model = "llama-3.3-70b"

[router]
use_llm_classification = true

[orchestrator]
agent_timeout_secs = 30

[gateway]
port = 9100
auth_token = "secret-token"

[mcp]
url = "http://localhost:3001/mcp"
"#,
        )
        .unwrap();
        assert_eq!(cfg.agent.default_model, "claude-haiku");
        assert_eq!(cfg.agent.models["testing"], "gpt-4o-mini");
        let compat = cfg.providers.openai_compat.as_ref().unwrap();
        assert_eq!(compat.name, "groq");
        assert_eq!(compat.max_tokens, 4096);
        assert!(cfg.router.enabled);

        let router = QueryRouterConfig::from(&cfg.router);
        assert!(router.use_llm_classification);
        let orch = OrchestratorConfig::from(&cfg.orchestrator);
        assert_eq!(orch.agent_timeout_secs, 30);
        assert_eq!(orch.max_concurrent_agents, 4);

        assert_eq!(cfg.mcp_url(None), Some("http://localhost:3001/mcp"));
        assert_eq!(cfg.mcp_url(Some("http://other/mcp")), Some("http://other/mcp"));
    }

    #[tokio::test]
    async fn test_gateway_addr_forms() {
        let mut gateway = GatewayConfig {
            port: 9100,
            ..GatewayConfig::default()
        };
        let addr = gateway.socket_addr().await.unwrap();
        assert_eq!(addr, "127.0.0.1:9100".parse::<SocketAddr>().unwrap());

        gateway.bind = "::1".into();
        let addr = gateway.socket_addr().await.unwrap();
        assert_eq!(addr, "[::1]:9100".parse::<SocketAddr>().unwrap());

        gateway.bind = "[::]".into();
        let addr = gateway.socket_addr().await.unwrap();
        assert!(addr.is_ipv6());
        assert!(addr.ip().is_unspecified());

        gateway.bind = "localhost".into();
        let addr = gateway.socket_addr().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 9100);
    }

    #[tokio::test]
    async fn test_invalid_gateway_addr() {
        let mut cfg = TorqConfig::default();
        cfg.gateway.bind = "not an address".into();
        assert!(cfg.gateway.socket_addr().await.is_err());
    }

    #[test]
    fn test_zero_concurrency_clamped() {
        let section = OrchestratorSection {
            max_concurrent_agents: 0,
            agent_timeout_secs: 5,
        };
        assert_eq!(OrchestratorConfig::from(&section).max_concurrent_agents, 1);
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-ant-abcdefgh1234"), "sk-...1234");
    }

    #[test]
    fn test_debug_masks_secrets() {
        let gateway = GatewayConfig {
            auth_token: "super-secret-token".into(),
            ..GatewayConfig::default()
        };
        let out = format!("{:?}", gateway);
        assert!(!out.contains("super-secret-token"));
        assert!(out.contains("sup...oken"));
    }

    #[test]
    fn test_expand_env_vars_allowlist() {
        let home = std::env::var("HOME").unwrap_or_default();
        assert_eq!(expand_env_vars("dir = \"${HOME}/x\""), format!("dir = \"{}/x\"", home));
        assert_eq!(expand_env_vars("key = \"${SECRET_THING}\""), "key = \"${SECRET_THING}\"");
        assert_eq!(expand_env_vars("open ${HOME"), "open ${HOME");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/skills"), home.join("skills"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_load_rejects_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = TorqConfig::load(&Some(path.clone())).unwrap_err();
        assert!(err.to_string().contains("chmod 600"));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(TorqConfig::load(&Some(path)).is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TorqConfig::load(&Some(dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("torq init"));
    }
}
