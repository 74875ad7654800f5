//! Configuration loading, validation, and management for Hisho.
//!
//! Loads configuration from `~/.hisho/config.toml` (or the file named by
//! `HISHO_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.hisho/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model runtime settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Calendar / task API settings
    #[serde(default)]
    pub graph: GraphConfig,

    /// Wiki integration. Absent = wiki capabilities disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wiki: Option<WikiConfig>,

    /// Session registry limits
    #[serde(default)]
    pub sessions: SessionConfig,
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
            .field("model", &self.model)
            .field("gateway", &self.gateway)
            .field("graph", &self.graph)
            .field("wiki", &self.wiki)
            .field("sessions", &self.sessions)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_id")]
    pub model_id: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Override the runtime endpoint (defaults to the regional one).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bearer API key for the model runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Maximum model/tool round trips per request
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
}

fn default_model_id() -> String {
    "us.anthropic.claude-haiku-4-5-20251001-v1:0".into()
}
fn default_region() -> String {
    "us-east-1".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_tool_iterations() -> u32 {
    25
}

impl ModelConfig {
    /// The runtime base URL: the explicit endpoint, or the regional default.
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", self.region),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            region: default_region(),
            endpoint: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("model_id", &self.model_id)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "0.0.0.0".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,

    /// Timezone used when a request does not name one
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/v1.0".into()
}
/// Timezone applied when neither the request nor the config names one.
pub fn default_timezone() -> String {
    "Asia/Tokyo".into()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            default_timezone: default_timezone(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Wiki (Confluence Cloud) integration settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct WikiConfig {
    /// Site URL, e.g. `https://your-domain.atlassian.net`
    pub url: String,

    /// Account email used for basic auth
    pub email: String,

    /// API token used for basic auth
    pub api_token: String,

    /// Space used by page creation when the caller names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_space_key: Option<String>,
}

impl std::fmt::Debug for WikiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WikiConfig")
            .field("url", &self.url)
            .field("email", &self.email)
            .field("api_token", &"[REDACTED]")
            .field("default_space_key", &self.default_space_key)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session's agent is dropped
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum live sessions; the least recently used is evicted beyond this
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_session_ttl_secs() -> u64 {
    8 * 60 * 60
}
fn default_max_sessions() -> usize {
    1_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `HISHO_CONFIG` or the default path
    /// (`~/.hisho/config.toml`), then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("HISHO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
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

    /// Apply environment overrides through `lookup` (highest priority).
    ///
    /// The wiki integration is switched on only when URL, email and token
    /// are all present; a partial set leaves the file configuration alone.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("AWS_BEARER_TOKEN_BEDROCK") {
            self.model.api_key = Some(key);
        }
        if let Some(region) = get("AWS_REGION") {
            self.model.region = region;
        }
        if let Some(model) = get("HISHO_MODEL") {
            self.model.model_id = model;
        }
        if let Some(port) = get("PORT").and_then(|p| p.parse().ok()) {
            self.gateway.port = port;
        }
        if let Some(base_url) = get("GRAPH_BASE_URL") {
            self.graph.base_url = base_url;
        }

        match (
            get("CONFLUENCE_URL"),
            get("CONFLUENCE_EMAIL"),
            get("CONFLUENCE_API_TOKEN"),
        ) {
            (Some(url), Some(email), Some(api_token)) => {
                self.wiki = Some(WikiConfig {
                    url,
                    email,
                    api_token,
                    default_space_key: get("CONFLUENCE_DEFAULT_SPACE_KEY"),
                });
            }
            _ => {
                if let (Some(wiki), Some(space)) =
                    (self.wiki.as_mut(), get("CONFLUENCE_DEFAULT_SPACE_KEY"))
                {
                    wiki.default_space_key = Some(space);
                }
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".hisho")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.temperature < 0.0 || self.model.temperature > 1.0 {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 1.0".into(),
            ));
        }

        if self.model.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "model.max_tool_iterations must be > 0".into(),
            ));
        }

        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "sessions.max_sessions must be > 0".into(),
            ));
        }

        if !is_http_url(&self.graph.base_url) {
            return Err(ConfigError::ValidationError(
                "graph.base_url must start with http:// or https://".into(),
            ));
        }

        if let Some(wiki) = &self.wiki {
            if !is_http_url(&wiki.url) {
                return Err(ConfigError::ValidationError(
                    "wiki.url must start with http:// or https://".into(),
                ));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            gateway: GatewayConfig::default(),
            graph: GraphConfig::default(),
            wiki: None,
            sessions: SessionConfig::default(),
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
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
