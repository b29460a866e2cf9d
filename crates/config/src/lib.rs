//! Configuration loading, validation, and management for Cerebro.
//!
//! Settings are resolved once, at startup, from four layers in a fixed order:
//!
//! 1. explicit arguments ([`ConfigOverrides`], e.g. CLI flags)
//! 2. environment ([`EnvSource`], upper-cased field names)
//! 3. the config file (`~/.config/cerebro/config.toml`)
//! 4. built-in defaults
//!
//! The first layer that provides a value wins. The agent core only ever sees
//! the resolved [`AppConfig`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default system prompt. `{system_time}` is replaced with the current UTC
/// timestamp on every model call.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Cerebro, a personal assistant with access to a \
local knowledge management system called \"brain\". You can read and write todos, notes, \
projects, and daily notes through your tools. Help the user stay organised, capture ideas, \
plan work, and reflect on their progress. Be concise and direct.

System time: {system_time}";

/// The root configuration structure.
///
/// Maps directly to `~/.config/cerebro/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// System prompt template sent to the model on every turn
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Model identifier in `provider/model-name` form
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum results returned per web search
    #[serde(default = "default_max_search_results")]
    pub max_search_results: u32,

    /// Model calls allowed per run before a forced stop
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Upper bound for a single tool invocation
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Upper bound for a checkpoint load or save
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,

    /// Model endpoint settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Web search settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Remote tool server discovery
    #[serde(default)]
    pub remote_tools: RemoteToolsConfig,

    /// Conversation persistence
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}
fn default_model() -> String {
    "anthropic/claude-haiku-4-5-20251001".into()
}
fn default_max_search_results() -> u32 {
    10
}
fn default_max_steps() -> u32 {
    25
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_storage_timeout_secs() -> u64 {
    10
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("system_prompt", &format_args!("<{} chars>", self.system_prompt.len()))
            .field("model", &self.model)
            .field("max_search_results", &self.max_search_results)
            .field("max_steps", &self.max_steps)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("storage_timeout_secs", &self.storage_timeout_secs)
            .field("provider", &self.provider)
            .field("search", &self.search)
            .field("remote_tools", &self.remote_tools)
            .field("checkpoint", &self.checkpoint)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            temperature: default_temperature(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_search_url")]
    pub base_url: String,
}

fn default_search_url() -> String {
    "https://api.tavily.com".into()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_search_url(),
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToolsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Executable looked up on PATH
    #[serde(default = "default_remote_command")]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Bound on spawn + handshake + tool listing
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_remote_command() -> String {
    "brain-mcp".into()
}
fn default_discovery_timeout_secs() -> u64 {
    15
}

impl Default for RemoteToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_remote_command(),
            args: Vec::new(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
        }
    }
}

/// Which checkpoint store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Sqlite,
    File,
    Memory,
}

impl FromStr for CheckpointBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "file" => Ok(Self::File),
            "memory" | "in_memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown checkpoint backend '{other}' (expected sqlite, file or memory)"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,

    /// Overrides `~/.local/share/cerebro`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// A key-value source of environment-style overrides.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Explicit overrides, typically from the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub max_search_results: Option<u32>,
    pub max_steps: Option<u32>,
    pub tool_timeout_secs: Option<u64>,
    pub checkpoint_backend: Option<CheckpointBackend>,
    pub data_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Resolve configuration from the default file, the process environment
    /// and the given explicit overrides.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve(Some(&Self::config_path()), &ProcessEnv, overrides)
    }

    /// Resolve configuration from explicit layers. Missing file means defaults.
    pub fn resolve(
        file: Option<&Path>,
        env: &dyn EnvSource,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::read_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env or overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn apply_env(&mut self, env: &dyn EnvSource) -> Result<(), ConfigError> {
        if let Some(prompt) = env_string(env, "SYSTEM_PROMPT") {
            self.system_prompt = prompt;
        }
        if let Some(model) = env_string(env, "MODEL") {
            self.model = model;
        }
        if let Some(n) = env_parse(env, "MAX_SEARCH_RESULTS")? {
            self.max_search_results = n;
        }
        if let Some(n) = env_parse(env, "MAX_STEPS")? {
            self.max_steps = n;
        }
        if let Some(n) = env_parse(env, "TOOL_TIMEOUT_SECS")? {
            self.tool_timeout_secs = n;
        }

        let api_key = env_string(env, "CEREBRO_API_KEY")
            .or_else(|| env_string(env, "OPENROUTER_API_KEY"))
            .or_else(|| env_string(env, "OPENAI_API_KEY"));
        if api_key.is_some() {
            self.provider.api_key = api_key;
        }
        if let Some(url) = env_string(env, "CEREBRO_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(key) = env_string(env, "TAVILY_API_KEY") {
            self.search.api_key = Some(key);
        }
        if let Some(backend) = env_parse(env, "CEREBRO_CHECKPOINT_BACKEND")? {
            self.checkpoint.backend = backend;
        }
        if let Some(dir) = env_string(env, "CEREBRO_DATA_DIR") {
            self.checkpoint.data_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(prompt) = &overrides.system_prompt {
            self.system_prompt = prompt.clone();
        }
        if let Some(model) = &overrides.model {
            self.model = model.clone();
        }
        if let Some(n) = overrides.max_search_results {
            self.max_search_results = n;
        }
        if let Some(n) = overrides.max_steps {
            self.max_steps = n;
        }
        if let Some(n) = overrides.tool_timeout_secs {
            self.tool_timeout_secs = n;
        }
        if let Some(backend) = overrides.checkpoint_backend {
            self.checkpoint.backend = backend;
        }
        if let Some(dir) = &overrides.data_dir {
            self.checkpoint.data_dir = Some(dir.clone());
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::ValidationError("max_steps must be at least 1".into()));
        }
        if self.max_search_results == 0 {
            return Err(ConfigError::ValidationError(
                "max_search_results must be at least 1".into(),
            ));
        }
        if self.tool_timeout_secs == 0 || self.storage_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("timeouts must be greater than 0".into()));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".config").join("cerebro")
    }

    /// Path of the config file read by [`AppConfig::load`].
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Directory holding the checkpoint database and the last-thread file.
    pub fn data_dir(&self) -> PathBuf {
        self.checkpoint
            .data_dir
            .clone()
            .unwrap_or_else(|| dirs_home().join(".local").join("share").join("cerebro"))
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            model: default_model(),
            max_search_results: default_max_search_results(),
            max_steps: default_max_steps(),
            tool_timeout_secs: default_tool_timeout_secs(),
            storage_timeout_secs: default_storage_timeout_secs(),
            provider: ProviderConfig::default(),
            search: SearchConfig::default(),
            remote_tools: RemoteToolsConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

fn env_string(env: &dyn EnvSource, key: &str) -> Option<String> {
    env.var(key).filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(env: &dyn EnvSource, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(env, key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::EnvError {
            key: key.to_string(),
            reason: e.to_string(),
        }),
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

    #[error("Invalid value for environment variable {key}: {reason}")]
    EnvError { key: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
