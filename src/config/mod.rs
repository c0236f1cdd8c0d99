pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;

/// Environment variable naming the YAML config file.
pub const CONFIG_PATH_ENV: &str = "GEEKCHAT_BRIDGE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Wire framing for encoded chat chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFraming {
    /// One JSON chunk per line.
    #[default]
    Ndjson,
    /// `data: <json>\n\n` records.
    Sse,
    /// Bare delta text; the terminal chunk encodes to nothing.
    Text,
}

impl fmt::Display for ChunkFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkFraming::Ndjson => write!(f, "ndjson"),
            ChunkFraming::Sse => write!(f, "sse"),
            ChunkFraming::Text => write!(f, "text"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default)]
    pub base_path: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
            base_path: String::new(),
        }
    }
}

/// Backend endpoint, credential and the identity stamped on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// May be left out of the file and supplied by `GEEK_URL`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_credential_header")]
    pub credential_header: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub talk_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub user_role: i64,
    #[serde(default = "default_ide")]
    pub ide: String,
    #[serde(default = "default_ide_version")]
    pub ide_version: String,
    #[serde(default = "default_plugin_version")]
    pub plugin_version: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_credential_header() -> String {
    "Code-Token".to_string()
}
fn default_ide() -> String {
    "VSCode".to_string()
}
fn default_ide_version() -> String {
    "1.95.0".to_string()
}
fn default_plugin_version() -> String {
    "2.17.6".to_string()
}
fn default_locale() -> String {
    "zh".to_string()
}

impl BackendConfig {
    /// Backend config with every optional field at its default.
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            credential_header: default_credential_header(),
            user_id: String::new(),
            talk_id: String::new(),
            model: model.into(),
            user_role: 0,
            ide: default_ide(),
            ide_version: default_ide_version(),
            plugin_version: default_plugin_version(),
            locale: default_locale(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(String::new(), String::new(), String::new())
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub stream_framing: ChunkFraming,
    #[serde(default = "default_aggregate_framing")]
    pub aggregate_framing: ChunkFraming,
    /// Reject misaligned user/assistant pairs instead of dropping them.
    #[serde(default)]
    pub strict_history: bool,
    /// Let a body `stream: true` select streaming alongside the Accept header.
    #[serde(default)]
    pub honor_stream_flag: bool,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_aggregate_framing() -> ChunkFraming {
    ChunkFraming::Text
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            stream_framing: ChunkFraming::default(),
            aggregate_framing: default_aggregate_framing(),
            strict_history: false,
            honor_stream_flag: false,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Apply backend overrides from environment-style lookups.
///
/// Recognized keys: `GEEK_URL`, `CODE_TOKEN`, `USER_ID`, `TALK_ID`, `MODEL`.
/// Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let backend = &mut config.backend;
    let targets: [(&str, &mut String); 5] = [
        ("GEEK_URL", &mut backend.url),
        ("CODE_TOKEN", &mut backend.token),
        ("USER_ID", &mut backend.user_id),
        ("TALK_ID", &mut backend.talk_id),
        ("MODEL", &mut backend.model),
    ];
    for (key, slot) in targets {
        if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
            *slot = value;
        }
    }
}

/// Parse YAML text, apply overrides, and validate.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config<F>(contents: &str, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: AppConfig = serde_yaml::from_str(contents)?;
    apply_env_overrides(&mut config, lookup);
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file, apply process environment
/// overrides, and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents, |key| std::env::var(key).ok())
}
