//! Configuration loader with environment variable overrides.
//!
//! Loads configuration from (lowest to highest precedence):
//! 1. Default values
//! 2. `~/.agentdesk/config.yaml` in home directory
//! 3. `.agentdesk/config.yaml` in project directory
//! 4. Environment variables with `AGENTDESK_` prefix
//! 5. `ANTHROPIC_API_KEY` for the upstream API key

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Base URL of the JSON/SSE API; nothing is served at `/`
    pub fn api_base_url(&self) -> String {
        format!("http://{}:{}/api", self.host, self.port)
    }
}

/// Upstream chat API configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Value of the `anthropic-version` header
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_version: default_api_version(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Filesystem roots the tools operate on
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkspaceConfig {
    /// The only tree tools may write to
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    /// Read-only root searched after the workspace (shared templates, docs)
    #[serde(default)]
    pub framework_root: Option<PathBuf>,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            framework_root: None,
        }
    }
}

/// Chat loop configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatConfig {
    /// Safety valve on upstream round trips per user message
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Replaces the built-in base prompt when set
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_max_iterations() -> usize {
    10
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: None,
        }
    }
}

/// Flat-file storage locations
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_conversations_dir")]
    pub conversations_dir: PathBuf,
    #[serde(default = "default_agents_dir")]
    pub agents_dir: PathBuf,
}

fn default_conversations_dir() -> PathBuf {
    PathBuf::from(".agentdesk/conversations")
}

fn default_agents_dir() -> PathBuf {
    PathBuf::from(".agentdesk/agents")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            conversations_dir: default_conversations_dir(),
            agents_dir: default_agents_dir(),
        }
    }
}

impl AppConfig {
    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), String> {
        if self.chat.max_iterations == 0 {
            return Err("chat.max_iterations must be at least 1".to_string());
        }
        if self.upstream.model.trim().is_empty() {
            return Err("upstream.model must not be empty".to_string());
        }
        if self.upstream.max_tokens == 0 {
            return Err("upstream.max_tokens must be at least 1".to_string());
        }
        Ok(())
    }

    /// Copy safe to print: the API key is masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.upstream.api_key = copy.upstream.api_key.as_ref().map(|key| mask_key(key));
        copy
    }
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(7).collect();
    if key.chars().count() <= 7 {
        "***".to_string()
    } else {
        format!("{}***", visible)
    }
}

/// Load configuration from all sources
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // Set defaults
    builder = builder
        .set_default("server.host", default_host())?
        .set_default("server.port", default_port() as i64)?
        .set_default("upstream.base_url", default_base_url())?
        .set_default("upstream.model", default_model())?
        .set_default("upstream.max_tokens", default_max_tokens() as i64)?
        .set_default("upstream.api_version", default_api_version())?
        .set_default("chat.max_iterations", default_max_iterations() as i64)?;

    // Load from home directory config file
    if let Some(home) = dirs::home_dir() {
        let home_config: PathBuf = home.join(".agentdesk/config.yaml");
        if home_config.exists() {
            builder = builder.add_source(File::from(home_config).required(false));
        }
    }

    // Load from project config file
    let project_config = PathBuf::from(".agentdesk/config.yaml");
    if project_config.exists() {
        builder = builder.add_source(File::from(project_config).required(false));
    }

    // e.g., AGENTDESK_SERVER__PORT=9090, AGENTDESK_CHAT__MAX_ITERATIONS=5
    builder = builder.add_source(
        Environment::with_prefix("AGENTDESK")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        builder = builder.set_override("upstream.api_key", key)?;
    }

    builder.build()?.try_deserialize()
}

/// Default config file written by `agentdesk init`
pub const DEFAULT_CONFIG_YAML: &str = r#"# agentdesk configuration

server:
  host: "127.0.0.1"
  port: 8080

upstream:
  base_url: https://api.anthropic.com
  # api_key: set ANTHROPIC_API_KEY instead of storing the key here
  model: claude-sonnet-4-20250514
  max_tokens: 8192

workspace:
  # Tools may only write below this directory
  root: "."
  # Optional read-only directory searched after the workspace
  # framework_root: /path/to/shared/templates

chat:
  # Upper bound on model round trips per user message
  max_iterations: 10
  # system_prompt: "You are a helpful assistant."

storage:
  conversations_dir: .agentdesk/conversations
  agents_dir: .agentdesk/agents
"#;
