//! Configuration loading, validation, and resolution for stepwise.
//!
//! Loads configuration from `~/.stepwise/config.toml` with environment
//! variable overrides. Validates all settings at startup. The resulting
//! [`AppConfig`] is immutable for the rest of the run and is handed to each
//! component by reference.

mod prep;

pub use prep::{PrepConfig, ResolvedPrep, Sampling, supports_temperature};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stepwise_core::ChannelRoutes;

/// Hard ceiling on the step budget, regardless of configuration.
pub const MAX_STEPS_CAP: u32 = 15;

/// The root configuration structure.
///
/// Maps directly to `~/.stepwise/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model used for the main loop
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Sampling temperature (omitted when `top_p` is set or the model rejects it)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling; when set, temperature is never sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Initial completion cap per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Model context window, used to clamp length backoff
    #[serde(default = "default_context_window")]
    pub context_window: u32,

    /// Trim outbound transcripts to this many estimated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_prompt_tokens: Option<u32>,

    /// Step budget (capped at [`MAX_STEPS_CAP`])
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Per-request HTTP deadline
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Retries performed by the chat client
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base backoff between retries
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Default per-tool timeout
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Maximum concurrently running tool workers
    #[serde(default = "default_tool_concurrency")]
    pub tool_concurrency: usize,

    /// Order in which tool results are appended
    #[serde(default)]
    pub tool_result_order: ToolResultOrder,

    /// Path to the tool manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_manifest: Option<PathBuf>,

    /// Consume server-sent events instead of a single response
    #[serde(default)]
    pub stream: bool,

    /// Surface non-final channels and per-step detail
    #[serde(default)]
    pub verbose: bool,

    /// Disable the hygiene filter
    #[serde(default)]
    pub debug: bool,

    /// `name=destination` channel overrides
    #[serde(default)]
    pub channel_routes: Vec<String>,

    /// Pre-stage configuration
    #[serde(default)]
    pub prep: PrepConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_temperature() -> f32 {
    1.0
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_context_window() -> u32 {
    128_000
}
fn default_max_steps() -> u32 {
    8
}
fn default_http_timeout_secs() -> u64 {
    90
}
fn default_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_tool_concurrency() -> usize {
    8
}

/// How tool results are ordered in the transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultOrder {
    /// Whichever worker finishes first is appended first
    #[default]
    Completion,
    /// Results follow the order of the assistant's tool calls
    Request,
}

/// Redact a secret string for Debug output.
pub(crate) fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_tokens", &self.max_tokens)
            .field("context_window", &self.context_window)
            .field("max_prompt_tokens", &self.max_prompt_tokens)
            .field("max_steps", &self.max_steps)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("retries", &self.retries)
            .field("backoff_ms", &self.backoff_ms)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("tool_concurrency", &self.tool_concurrency)
            .field("tool_result_order", &self.tool_result_order)
            .field("tools_manifest", &self.tools_manifest)
            .field("stream", &self.stream)
            .field("verbose", &self.verbose)
            .field("debug", &self.debug)
            .field("channel_routes", &self.channel_routes)
            .field("prep", &self.prep)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.stepwise/config.toml)
    /// and apply process environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path, |key| std::env::var(key).ok())
    }

    /// Load from `path`, then apply overrides from `env`, then validate.
    pub fn load_with_env<F>(path: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::load_from(path)?;
        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config file found at {}, using defaults", path.display());
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

    /// Apply environment overrides.
    ///
    /// - `STEPWISE_API_KEY` then `OPENAI_API_KEY` fill a missing API key
    /// - `STEPWISE_BASE_URL` and `STEPWISE_MODEL` override their settings
    pub fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.api_key.is_none() {
            self.api_key = env("STEPWISE_API_KEY").or_else(|| env("OPENAI_API_KEY"));
        }
        if let Some(base_url) = env("STEPWISE_BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(model) = env("STEPWISE_MODEL") {
            self.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".stepwise")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_temperature("temperature", Some(self.temperature))?;
        validate_top_p("top_p", self.top_p)?;
        validate_temperature("prep.temperature", self.prep.temperature)?;
        validate_top_p("prep.top_p", self.prep.top_p)?;

        if self.http_timeout_secs == 0 || self.prep.http_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "http timeouts must be greater than zero".into(),
            ));
        }
        if self.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tool_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.tool_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "tool_concurrency must be at least 1".into(),
            ));
        }
        if self.max_tokens == 0 || self.context_window == 0 {
            return Err(ConfigError::ValidationError(
                "max_tokens and context_window must be greater than zero".into(),
            ));
        }

        self.channel_routes()?;
        Ok(())
    }

    /// Parsed channel routing table.
    pub fn channel_routes(&self) -> Result<ChannelRoutes, ConfigError> {
        ChannelRoutes::parse(&self.channel_routes)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Step budget after applying the hard cap; never zero.
    pub fn effective_max_steps(&self) -> u32 {
        self.max_steps.clamp(1, MAX_STEPS_CAP)
    }

    /// Sampling knobs for the main loop (one-knob rule).
    pub fn main_sampling(&self) -> Sampling {
        Sampling::one_knob(&self.model, self.top_p, Some(self.temperature))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn validate_temperature(field: &str, value: Option<f32>) -> Result<(), ConfigError> {
    match value {
        Some(t) if !(0.0..=2.0).contains(&t) => Err(ConfigError::ValidationError(format!(
            "{field} must be between 0.0 and 2.0"
        ))),
        _ => Ok(()),
    }
}

fn validate_top_p(field: &str, value: Option<f32>) -> Result<(), ConfigError> {
    match value {
        Some(p) if !(p > 0.0 && p <= 1.0) => Err(ConfigError::ValidationError(format!(
            "{field} must be in (0.0, 1.0]"
        ))),
        _ => Ok(()),
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            temperature: default_temperature(),
            top_p: None,
            max_tokens: default_max_tokens(),
            context_window: default_context_window(),
            max_prompt_tokens: None,
            max_steps: default_max_steps(),
            http_timeout_secs: default_http_timeout_secs(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            tool_timeout_secs: default_tool_timeout_secs(),
            tool_concurrency: default_tool_concurrency(),
            tool_result_order: ToolResultOrder::default(),
            tools_manifest: None,
            stream: false,
            verbose: false,
            debug: false,
            channel_routes: vec![],
            prep: PrepConfig::default(),
        }
    }
}

/// Get the user's home directory.
pub(crate) fn dirs_home() -> PathBuf {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.tool_result_order, ToolResultOrder::Completion);
        assert!(config.prep.enabled);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.prep.cache_ttl_secs, config.prep.cache_ttl_secs);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_channel_route_rejected() {
        let config = AppConfig {
            channel_routes: vec!["critic=printer".into()],
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
    }

    #[test]
    fn step_budget_is_capped() {
        let mut config = AppConfig {
            max_steps: 40,
            ..AppConfig::default()
        };
        assert_eq!(config.effective_max_steps(), MAX_STEPS_CAP);
        config.max_steps = 0;
        assert_eq!(config.effective_max_steps(), 1);
    }

    #[test]
    fn env_fills_missing_api_key_in_order() {
        let mut config = AppConfig::default();
        config.apply_env(env_of(&[
            ("OPENAI_API_KEY", "sk-openai"),
            ("STEPWISE_API_KEY", "sk-stepwise"),
            ("STEPWISE_MODEL", "gpt-4.1"),
        ]));
        assert_eq!(config.api_key.as_deref(), Some("sk-stepwise"));
        assert_eq!(config.model, "gpt-4.1");

        let mut configured = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        configured.apply_env(env_of(&[("STEPWISE_API_KEY", "sk-env")]));
        assert_eq!(configured.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn load_with_env_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
model = "gpt-4.1-mini"
max_steps = 3
tool_result_order = "request"
channel_routes = ["critic=stdout"]

[prep]
enabled = false
profile = "deterministic"
"#,
        )
        .unwrap();

        let config = AppConfig::load_with_env(&path, env_of(&[])).unwrap();
        assert_eq!(config.model, "gpt-4.1-mini");
        assert_eq!(config.max_steps, 3);
        assert_eq!(config.tool_result_order, ToolResultOrder::Request);
        assert!(!config.prep.enabled);
        assert_eq!(config.prep.profile.as_deref(), Some("deterministic"));
        assert!(config.channel_routes().unwrap().has_override(Some("critic")));
    }

    #[test]
    fn debug_output_redacts_keys() {
        let mut config = AppConfig {
            api_key: Some("sk-very-secret".into()),
            ..AppConfig::default()
        };
        config.prep.api_key = Some("sk-prep-secret".into());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-very-secret"));
        assert!(!rendered.contains("sk-prep-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn main_sampling_follows_one_knob_rule() {
        let config = AppConfig {
            top_p: Some(0.5),
            ..AppConfig::default()
        };
        let sampling = config.main_sampling();
        assert_eq!(sampling.top_p, Some(0.5));
        assert_eq!(sampling.temperature, None);

        let reasoning = AppConfig {
            model: "o3-mini".into(),
            ..AppConfig::default()
        };
        assert_eq!(reasoning.main_sampling(), Sampling::default());
    }
}
