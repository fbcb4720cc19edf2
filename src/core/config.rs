//! Configuration management for agentform
//!
//! Supports environment variables, config files, and runtime overrides.
//!
//! Config file location: ~/.config/agentform/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{AgentformError, Result};

/// Main configuration for agentform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Management API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Status polling configuration
    #[serde(default)]
    pub poll: PollConfig,
    /// Controller behavior
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which management API implementation to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Remote REST API over HTTP
    Http,
    /// In-process simulation (local dry runs)
    Memory,
}

/// Remote management API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Region the agent lives in
    pub region: String,
    /// Agent management endpoint; derived from the region when unset
    pub endpoint: Option<String>,
    /// Function management endpoint used for invoke permissions
    pub lambda_endpoint: Option<String>,
    /// Optional bearer token sent with every request
    pub bearer_token: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Backend selection
    pub backend: BackendType,
}

/// Status polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// First and smallest delay between status fetches
    pub min_interval_ms: u64,
    /// Largest delay between status fetches
    pub max_interval_ms: u64,
    /// Growth factor applied after each non-terminal fetch
    pub multiplier: f64,
    /// Upper bound for a single status fetch
    pub call_timeout_secs: u64,
}

/// Controller behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Wall-clock budget of one invocation, supplied by the hosting environment
    pub invocation_timeout_secs: u64,
    /// Time kept in reserve to report a timeout before the host kills us
    pub deadline_margin_secs: u64,
    /// Agent version that action groups attach to
    pub agent_version: String,
    /// Grant the agent permission to invoke action group executors
    pub grant_executor_permissions: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Log request and response bodies
    pub debug: bool,
}

fn parse_flag(value: &str) -> bool {
    value == "true" || value == "1"
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            lambda_endpoint: None,
            bearer_token: None,
            timeout_secs: 30,
            backend: BackendType::Http,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1_000,
            max_interval_ms: 15_000,
            multiplier: 2.0,
            call_timeout_secs: 20,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            invocation_timeout_secs: 600,
            deadline_margin_secs: 15,
            agent_version: "DRAFT".to_string(),
            grant_executor_permissions: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            debug: false,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agentform")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > env vars > config file > defaults
    ///
    /// A missing default config file means defaults; an unreadable or
    /// malformed one is an error.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let path = Self::config_file();
        let mut config = if path.exists() {
            Self::read_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from an explicit file, then apply the environment
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AgentformError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let mut config = Self::read_file(path)?;
        config.apply_env();
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AgentformError::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Override file values with environment variables
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| env::var(name).ok());
    }

    /// Override file values from `lookup`, which maps a variable name to its value
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(region) = lookup("BEDROCK_REGION").or_else(|| lookup("AWS_REGION")) {
            self.api.region = region;
        }
        if let Some(endpoint) = lookup("AGENTFORM_API_ENDPOINT") {
            self.api.endpoint = Some(endpoint);
        }
        if let Some(endpoint) = lookup("AGENTFORM_LAMBDA_ENDPOINT") {
            self.api.lambda_endpoint = Some(endpoint);
        }
        if let Some(token) = lookup("AGENTFORM_API_TOKEN") {
            self.api.bearer_token = Some(token);
        }
        match lookup("AGENTFORM_BACKEND").as_deref() {
            Some("memory") => self.api.backend = BackendType::Memory,
            Some("http") => self.api.backend = BackendType::Http,
            Some(other) => tracing::warn!(backend = other, "ignoring unknown AGENTFORM_BACKEND"),
            None => {}
        }
        if let Some(timeout) = lookup("AGENTFORM_INVOCATION_TIMEOUT_SECS") {
            match timeout.parse() {
                Ok(secs) => self.controller.invocation_timeout_secs = secs,
                Err(_) => tracing::warn!(value = %timeout, "ignoring invalid AGENTFORM_INVOCATION_TIMEOUT_SECS"),
            }
        }
        if let Some(json) = lookup("AGENTFORM_LOG_JSON") {
            self.logging.json = parse_flag(&json);
        }
        if let Some(debug) = lookup("AGENTFORM_DEBUG") {
            self.logging.debug = parse_flag(&debug);
        }
    }

    /// Parse configuration from TOML text; missing sections take defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AgentformError::config(format!("Failed to parse config: {}", e)))
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll.min_interval_ms == 0 {
            return Err(AgentformError::config("poll.min_interval_ms must be positive"));
        }
        if self.poll.min_interval_ms > self.poll.max_interval_ms {
            return Err(AgentformError::config(
                "poll.min_interval_ms must not exceed poll.max_interval_ms",
            ));
        }
        if self.poll.multiplier < 1.0 {
            return Err(AgentformError::config("poll.multiplier must be at least 1.0"));
        }
        if self.controller.deadline_margin_secs >= self.controller.invocation_timeout_secs {
            return Err(AgentformError::config(
                "controller.deadline_margin_secs must be smaller than the invocation timeout",
            ));
        }
        if self.controller.agent_version.is_empty() {
            return Err(AgentformError::config("controller.agent_version must be set"));
        }
        Ok(())
    }

    /// Agent management endpoint
    pub fn agent_endpoint(&self) -> String {
        self.api
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-agent.{}.amazonaws.com", self.api.region))
    }

    /// Function management endpoint
    pub fn lambda_endpoint(&self) -> String {
        self.api
            .lambda_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://lambda.{}.amazonaws.com", self.api.region))
    }

    /// Time the controller may spend before it must report
    pub fn working_budget(&self) -> Duration {
        Duration::from_secs(
            self.controller
                .invocation_timeout_secs
                .saturating_sub(self.controller.deadline_margin_secs),
        )
    }

    /// Generate a default config file content for display
    pub fn default_config_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }
}
