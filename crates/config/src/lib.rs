//! Configuration loading, validation, and management for InfraPilot.
//!
//! Loads configuration from `~/.infrapilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Policy text seeded as the first message of every new thread.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AWS infrastructure assistant. \
You provision resources by calling the tools you have been given: create a Terraform \
project with one of the create_* tools, then run terraform_plan and terraform_apply for \
that project. Always attempt the relevant tool call before claiming you lack access or \
permissions; the tools report permission problems themselves. Use get_user_permissions \
when the user asks what they are allowed to do. Keep answers short and mention the \
project_name of anything you created.";

/// The root configuration structure.
///
/// Maps directly to `~/.infrapilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Fallback API key used when a provider has no key of its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider used by the CLI when none is given
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model override for the default provider (catalog default otherwise)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Terraform / AWS tool settings
    #[serde(default)]
    pub terraform: TerraformConfig,

    /// Provider-specific configurations, keyed by catalog key
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("gateway", &self.gateway)
            .field("terraform", &self.terraform)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// What to do when a request arrives for a thread that already has a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Fail the second request immediately
    #[default]
    Reject,
    /// Wait until the running request releases the thread
    Queue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model invocations per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Characters per streamed content chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Replace the built-in policy prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Per model call timeout; unbounded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_timeout_secs: Option<u64>,

    /// Whole-run timeout; unbounded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,

    #[serde(default)]
    pub busy_policy: BusyPolicy,
}

fn default_max_iterations() -> u32 {
    5
}
fn default_chunk_size() -> usize {
    60
}

impl AgentConfig {
    /// The system prompt to seed new threads with.
    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            chunk_size: default_chunk_size(),
            system_prompt: None,
            model_timeout_secs: None,
            run_timeout_secs: None,
            busy_policy: BusyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Maximum accepted request body size
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerraformConfig {
    /// Terraform executable
    #[serde(default = "default_terraform_binary")]
    pub binary: String,

    /// Directory holding one sub-directory per generated project
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    /// Timeout for init/plan/apply/destroy
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for `terraform show -json`
    #[serde(default = "default_show_timeout")]
    pub show_timeout_secs: u64,

    /// AWS CLI executable used for identity and permission checks
    #[serde(default = "default_aws_cli")]
    pub aws_cli: String,

    /// Region used when a tool call does not name one
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Simulate IAM permissions before writing a project
    #[serde(default = "default_true")]
    pub check_permissions: bool,
}

fn default_terraform_binary() -> String {
    "terraform".into()
}
fn default_workspace_dir() -> PathBuf {
    PathBuf::from("./terraform_workspace")
}
fn default_command_timeout() -> u64 {
    1800
}
fn default_show_timeout() -> u64 {
    60
}
fn default_aws_cli() -> String {
    "aws".into()
}
fn default_region() -> String {
    "us-east-1".into()
}
fn default_true() -> bool {
    true
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: default_terraform_binary(),
            workspace_dir: default_workspace_dir(),
            command_timeout_secs: default_command_timeout(),
            show_timeout_secs: default_show_timeout(),
            aws_cli: default_aws_cli(),
            default_region: default_region(),
            check_permissions: true,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.infrapilot/config.toml).
    ///
    /// Environment overrides:
    /// - `INFRAPILOT_API_KEY` (fallback key when the file sets none)
    /// - `INFRAPILOT_PROVIDER`
    /// - `INFRAPILOT_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("INFRAPILOT_API_KEY");
        }

        if let Some(provider) = lookup("INFRAPILOT_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("INFRAPILOT_MODEL") {
            self.default_model = Some(model);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".infrapilot")
    }

    /// Provider section for `key`, if the file has one.
    pub fn provider(&self, key: &str) -> Option<&ProviderConfig> {
        self.providers.get(key)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "agent.chunk_size must be at least 1".into(),
            ));
        }

        if self.terraform.command_timeout_secs == 0 || self.terraform.show_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "terraform timeouts must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: None,
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            gateway: GatewayConfig::default(),
            terraform: TerraformConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for infrapilot_core::Error {
    fn from(e: ConfigError) -> Self {
        infrapilot_core::Error::Config { message: e.to_string() }
    }
}
