//! Configuration loading, validation, and management for streamrelay.
//!
//! Loads configuration from `~/.streamrelay/config.toml` with environment
//! variable overrides. Validates all settings at startup. The resulting
//! [`AppConfig`] is immutable for the life of the process and is passed by
//! reference into every constructor that needs it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use streamrelay_core::provider::GenerationParams;

/// The root configuration structure.
///
/// Maps directly to `~/.streamrelay/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which backend variant serves exchanges
    #[serde(default)]
    pub provider: ProviderKind,

    /// Provider API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the provider's base URL (proxies, self-hosted gateways)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model used when a user has no override
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Prepended as a system turn when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Sampling parameters
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Turn loop settings
    #[serde(default)]
    pub exchange: ExchangeConfig,

    /// Partial-answer delivery settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Telegram endpoint
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// History store
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Per-user model overrides, keyed by user id
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub user_models: HashMap<String, String>,
}

/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any OpenAI-compatible `/chat/completions` endpoint (delta streaming)
    #[default]
    OpenAi,
    /// Google Gemini `streamGenerateContent` (structured events)
    Gemini,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" | "openai_compat" | "deepseek" | "openrouter" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(ConfigError::ValidationError(format!(
                "unknown provider '{other}' (expected openai or gemini)"
            ))),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default)]
    pub frequency_penalty: f32,

    #[serde(default)]
    pub presence_penalty: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    1.0
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: default_max_tokens(),
            stop: Vec::new(),
        }
    }
}

impl GenerationConfig {
    pub fn to_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            max_tokens: (self.max_tokens > 0).then_some(self.max_tokens),
            stop: self.stop.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Streaming turns allowed per exchange before it fails with "too many loops"
    #[serde(default = "default_max_loop_depth")]
    pub max_loop_depth: u32,

    /// Finished exchanges replayed as context
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Deadline for one whole exchange
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Feed failed tool calls back to the model as error results instead of
    /// omitting them
    #[serde(default)]
    pub report_tool_errors: bool,
}

fn default_max_loop_depth() -> u32 {
    5
}
fn default_history_limit() -> usize {
    10
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_loop_depth: default_max_loop_depth(),
            history_limit: default_history_limit(),
            timeout_secs: default_timeout_secs(),
            report_tool_errors: false,
        }
    }
}

impl ExchangeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Chars that must accumulate before the first flush of a segment
    #[serde(default = "default_first_send_len")]
    pub first_send_len: usize,

    /// Chars added to the flush threshold after every flush
    #[serde(default = "default_steady_send_len")]
    pub steady_send_len: usize,

    /// Segment size at which a new message is started
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    /// Placeholder reply sent before the first partial answer
    #[serde(default = "default_thinking_text", skip_serializing_if = "Option::is_none")]
    pub thinking_text: Option<String>,

    /// Shown when there is nothing to show
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,

    /// Send with endpoint formatting (Markdown) enabled
    #[serde(default = "default_true")]
    pub formatted: bool,
}

fn default_first_send_len() -> usize {
    30
}
fn default_steady_send_len() -> usize {
    500
}
fn default_max_message_len() -> usize {
    3896
}
fn default_thinking_text() -> Option<String> {
    Some("🤔 thinking...".into())
}
fn default_fallback_text() -> String {
    "get nothing from the model!".into()
}
fn default_true() -> bool {
    true
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            first_send_len: default_first_send_len(),
            steady_send_len: default_steady_send_len(),
            max_message_len: default_max_message_len(),
            thinking_text: default_thinking_text(),
            fallback_text: default_fallback_text(),
            formatted: true,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,

    /// Long-poll timeout for `getUpdates`
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".into()
}
fn default_poll_timeout_secs() -> u64 {
    30
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_url: default_telegram_api_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Backend: "sqlite" or "in_memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// SQLite database path (relative paths resolve under the config dir)
    #[serde(default = "default_memory_path")]
    pub path: String,
}

fn default_memory_backend() -> String {
    "sqlite".into()
}
fn default_memory_path() -> String {
    "history.db".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: default_memory_path(),
        }
    }
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
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("system_prompt", &self.system_prompt)
            .field("generation", &self.generation)
            .field("exchange", &self.exchange)
            .field("delivery", &self.delivery)
            .field("telegram", &self.telegram)
            .field("memory", &self.memory)
            .field("user_models", &self.user_models)
            .finish()
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("api_url", &self.api_url)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.streamrelay/config.toml).
    ///
    /// Environment variables override the file:
    /// - `STREAMRELAY_API_KEY` (highest priority), then `OPENAI_API_KEY` or
    ///   `GEMINI_API_KEY` depending on the provider
    /// - `STREAMRELAY_PROVIDER`
    /// - `STREAMRELAY_MODEL`
    /// - `STREAMRELAY_TELEGRAM_TOKEN`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply process environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(provider) = lookup("STREAMRELAY_PROVIDER") {
            self.provider = provider.parse()?;
        }

        if let Some(model) = lookup("STREAMRELAY_MODEL") {
            self.default_model = model;
        }

        let vendor_key = match self.provider {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
        };
        if let Some(key) = lookup("STREAMRELAY_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = lookup(vendor_key);
        }

        if let Some(token) = lookup("STREAMRELAY_TELEGRAM_TOKEN") {
            self.telegram.bot_token = Some(token);
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".streamrelay")
    }

    /// Resolve the SQLite path against the config directory.
    pub fn memory_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.memory.path);
        if path.is_absolute() || self.memory.path == ":memory:" {
            path
        } else {
            Self::config_dir().join(path)
        }
    }

    /// The model serving `user_id`.
    pub fn model_for(&self, user_id: &str) -> &str {
        self.user_models
            .get(user_id)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.generation;
        if !(0.0..=2.0).contains(&g.temperature) {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&g.top_p) {
            return Err(ConfigError::ValidationError(
                "generation.top_p must be between 0.0 and 1.0".into(),
            ));
        }
        for (name, value) in [
            ("frequency_penalty", g.frequency_penalty),
            ("presence_penalty", g.presence_penalty),
        ] {
            if !(-2.0..=2.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "generation.{name} must be between -2.0 and 2.0"
                )));
            }
        }

        if self.exchange.max_loop_depth == 0 {
            return Err(ConfigError::ValidationError(
                "exchange.max_loop_depth must be at least 1".into(),
            ));
        }

        let d = &self.delivery;
        if d.steady_send_len == 0 {
            return Err(ConfigError::ValidationError(
                "delivery.steady_send_len must be > 0".into(),
            ));
        }
        if d.max_message_len <= d.first_send_len {
            return Err(ConfigError::ValidationError(
                "delivery.max_message_len must exceed delivery.first_send_len".into(),
            ));
        }

        match self.memory.backend.as_str() {
            "sqlite" | "in_memory" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "memory.backend '{other}' is not one of sqlite, in_memory"
            ))),
        }
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
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
            provider: ProviderKind::default(),
            api_key: None,
            api_url: None,
            default_model: default_model(),
            system_prompt: None,
            generation: GenerationConfig::default(),
            exchange: ExchangeConfig::default(),
            delivery: DeliveryConfig::default(),
            telegram: TelegramConfig::default(),
            memory: MemoryConfig::default(),
            user_models: HashMap::new(),
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
