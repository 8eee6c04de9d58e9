//! Pre-stage configuration and its resolution against the main settings.
//!
//! Every pre-stage knob is independently overridable. Resolution order for
//! connection settings is: `[prep]` value → `STEPWISE_PREP_*` environment
//! variable → main setting. Resolution is pure: the environment is passed in
//! as a lookup closure.

use crate::{AppConfig, dirs_home, redact};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Profile name that maps to a low, fixed temperature.
pub const DETERMINISTIC_PROFILE: &str = "deterministic";

/// `[prep]` section of the config file.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrepConfig {
    /// Run the pre-stage at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Named prompt profile (`deterministic` or anything else)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,

    /// System message prepended to the pre-stage request only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Manifest used when external tools are allowed (defaults to the main one)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_manifest: Option<PathBuf>,

    #[serde(default = "default_prep_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Let the pre-stage run manifest tools instead of the read-only built-ins
    #[serde(default)]
    pub allow_external_tools: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Skip cache reads (results are still written)
    #[serde(default)]
    pub cache_bust: bool,
}

fn default_true() -> bool {
    true
}
fn default_prep_http_timeout_secs() -> u64 {
    60
}
fn default_cache_ttl_secs() -> u64 {
    600
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            base_url: None,
            api_key: None,
            temperature: None,
            top_p: None,
            profile: None,
            retries: None,
            backoff_ms: None,
            system_prompt: None,
            tools_manifest: None,
            http_timeout_secs: default_prep_http_timeout_secs(),
            allow_external_tools: false,
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_dir: None,
            cache_bust: false,
        }
    }
}

impl std::fmt::Debug for PrepConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrepConfig")
            .field("enabled", &self.enabled)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("profile", &self.profile)
            .field("retries", &self.retries)
            .field("backoff_ms", &self.backoff_ms)
            .field("system_prompt", &self.system_prompt)
            .field("tools_manifest", &self.tools_manifest)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("allow_external_tools", &self.allow_external_tools)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("cache_dir", &self.cache_dir)
            .field("cache_bust", &self.cache_bust)
            .finish()
    }
}

/// Sampling knobs actually sent on the wire. At most one is set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sampling {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl Sampling {
    /// Apply the one-knob rule: an explicit `top_p` wins and suppresses
    /// temperature; otherwise temperature is kept only if `model` accepts it.
    pub fn one_knob(model: &str, top_p: Option<f32>, temperature: Option<f32>) -> Self {
        if let Some(p) = top_p {
            return Self {
                temperature: None,
                top_p: Some(p),
            };
        }
        Self {
            temperature: temperature.filter(|_| supports_temperature(model)),
            top_p: None,
        }
    }
}

/// Whether `model` accepts a temperature parameter.
///
/// Reasoning models (`o1*`, `o3*`, `o4*`, `gpt-5*`) reject it. A vendor
/// prefix such as `openai/` is ignored.
pub fn supports_temperature(model: &str) -> bool {
    let id = model.rsplit('/').next().unwrap_or(model).to_ascii_lowercase();
    !["o1", "o3", "o4", "gpt-5"]
        .iter()
        .any(|prefix| id.starts_with(prefix))
}

/// Fully resolved pre-stage settings.
#[derive(Clone, PartialEq)]
pub struct ResolvedPrep {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub retries: u32,
    pub backoff_ms: u64,
    pub sampling: Sampling,
    pub http_timeout: Duration,
    pub system_prompt: Option<String>,
    pub allow_external_tools: bool,
    pub tools_manifest: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub cache_bust: bool,
}

impl ResolvedPrep {
    /// The system prompt the pre-stage actually sends, if any.
    pub fn effective_system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref().filter(|p| !p.trim().is_empty())
    }
}

impl std::fmt::Debug for ResolvedPrep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedPrep")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("retries", &self.retries)
            .field("backoff_ms", &self.backoff_ms)
            .field("sampling", &self.sampling)
            .field("http_timeout", &self.http_timeout)
            .field("allow_external_tools", &self.allow_external_tools)
            .field("tools_manifest", &self.tools_manifest)
            .field("cache_dir", &self.cache_dir)
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_bust", &self.cache_bust)
            .finish()
    }
}

impl AppConfig {
    /// Resolve the pre-stage settings against the main ones.
    ///
    /// `env` looks up environment variables; pass `|k| std::env::var(k).ok()`
    /// in production and a map in tests.
    pub fn resolve_prep<F>(&self, env: F) -> ResolvedPrep
    where
        F: Fn(&str) -> Option<String>,
    {
        let prep = &self.prep;

        let model = prep
            .model
            .clone()
            .or_else(|| env("STEPWISE_PREP_MODEL"))
            .unwrap_or_else(|| self.model.clone());
        let base_url = prep
            .base_url
            .clone()
            .or_else(|| env("STEPWISE_PREP_BASE_URL"))
            .unwrap_or_else(|| self.base_url.clone());
        let api_key = prep
            .api_key
            .clone()
            .or_else(|| env("STEPWISE_PREP_API_KEY"))
            .or_else(|| self.api_key.clone());
        let retries = prep
            .retries
            .or_else(|| parse_env(&env, "STEPWISE_PREP_RETRIES"))
            .unwrap_or(self.retries);
        let backoff_ms = prep
            .backoff_ms
            .or_else(|| parse_env(&env, "STEPWISE_PREP_BACKOFF_MS"))
            .unwrap_or(self.backoff_ms);

        let temperature = prep
            .temperature
            .or_else(|| prep.profile.as_deref().map(profile_temperature))
            .or(Some(self.temperature));
        let sampling = Sampling::one_knob(&model, prep.top_p.or(self.top_p), temperature);

        ResolvedPrep {
            model,
            base_url,
            api_key,
            retries,
            backoff_ms,
            sampling,
            http_timeout: Duration::from_secs(prep.http_timeout_secs),
            system_prompt: prep.system_prompt.clone(),
            allow_external_tools: prep.allow_external_tools,
            tools_manifest: prep
                .tools_manifest
                .clone()
                .or_else(|| self.tools_manifest.clone()),
            cache_dir: prep
                .cache_dir
                .clone()
                .unwrap_or_else(|| default_cache_dir(&env)),
            cache_ttl: Duration::from_secs(prep.cache_ttl_secs),
            cache_bust: prep.cache_bust,
        }
    }
}

fn profile_temperature(profile: &str) -> f32 {
    if profile.trim().eq_ignore_ascii_case(DETERMINISTIC_PROFILE) {
        0.1
    } else {
        1.0
    }
}

fn parse_env<T, F>(env: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

fn default_cache_dir<F>(env: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let base = env("XDG_CACHE_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            env("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(dirs_home)
                .join(".cache")
        });
    base.join("stepwise").join("prep")
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

    fn main_config() -> AppConfig {
        AppConfig {
            model: "gpt-4o-mini".into(),
            base_url: "https://main.example/v1".into(),
            api_key: Some("sk-main".into()),
            temperature: 0.7,
            retries: 2,
            backoff_ms: 500,
            ..AppConfig::default()
        }
    }

    #[test]
    fn inherits_main_settings_by_default() {
        let resolved = main_config().resolve_prep(env_of(&[]));
        assert_eq!(resolved.model, "gpt-4o-mini");
        assert_eq!(resolved.base_url, "https://main.example/v1");
        assert_eq!(resolved.api_key.as_deref(), Some("sk-main"));
        assert_eq!(resolved.retries, 2);
        assert_eq!(resolved.backoff_ms, 500);
        assert_eq!(resolved.sampling.temperature, Some(0.7));
        assert_eq!(resolved.http_timeout, Duration::from_secs(60));
    }

    #[test]
    fn override_beats_environment_beats_main() {
        let env = env_of(&[
            ("STEPWISE_PREP_MODEL", "env-model"),
            ("STEPWISE_PREP_BASE_URL", "https://env.example/v1"),
            ("STEPWISE_PREP_RETRIES", "5"),
            ("STEPWISE_PREP_BACKOFF_MS", "not-a-number"),
        ]);
        let mut config = main_config();
        config.prep.model = Some("override-model".into());

        let resolved = config.resolve_prep(env);
        assert_eq!(resolved.model, "override-model");
        assert_eq!(resolved.base_url, "https://env.example/v1");
        assert_eq!(resolved.retries, 5);
        assert_eq!(resolved.backoff_ms, 500);
    }

    #[test]
    fn sampling_precedence() {
        let mut config = main_config();
        config.prep.profile = Some("deterministic".into());
        assert_eq!(
            config.resolve_prep(env_of(&[])).sampling.temperature,
            Some(0.1)
        );

        config.prep.profile = Some("creative".into());
        assert_eq!(
            config.resolve_prep(env_of(&[])).sampling.temperature,
            Some(1.0)
        );

        config.prep.temperature = Some(0.3);
        assert_eq!(
            config.resolve_prep(env_of(&[])).sampling.temperature,
            Some(0.3)
        );

        config.prep.top_p = Some(0.9);
        let sampling = config.resolve_prep(env_of(&[])).sampling;
        assert_eq!(sampling.top_p, Some(0.9));
        assert_eq!(sampling.temperature, None);
    }

    #[test]
    fn temperature_dropped_for_reasoning_models() {
        let mut config = main_config();
        config.prep.model = Some("openai/o4-mini".into());
        config.prep.temperature = Some(0.2);
        let sampling = config.resolve_prep(env_of(&[])).sampling;
        assert_eq!(sampling, Sampling::default());
    }

    #[test]
    fn temperature_support_by_model_family() {
        assert!(supports_temperature("gpt-4o-mini"));
        assert!(supports_temperature("llama3"));
        assert!(!supports_temperature("o1-preview"));
        assert!(!supports_temperature("o3"));
        assert!(!supports_temperature("openai/gpt-5-mini"));
    }

    #[test]
    fn cache_dir_prefers_xdg() {
        let config = main_config();
        let resolved = config.resolve_prep(env_of(&[("XDG_CACHE_HOME", "/xdg")]));
        assert_eq!(resolved.cache_dir, PathBuf::from("/xdg/stepwise/prep"));

        let resolved = config.resolve_prep(env_of(&[("HOME", "/home/u")]));
        assert_eq!(
            resolved.cache_dir,
            PathBuf::from("/home/u/.cache/stepwise/prep")
        );
    }

    #[test]
    fn prep_manifest_falls_back_to_main() {
        let mut config = main_config();
        config.tools_manifest = Some(PathBuf::from("tools.json"));
        assert_eq!(
            config.resolve_prep(env_of(&[])).tools_manifest,
            Some(PathBuf::from("tools.json"))
        );
        config.prep.tools_manifest = Some(PathBuf::from("prep-tools.json"));
        assert_eq!(
            config.resolve_prep(env_of(&[])).tools_manifest,
            Some(PathBuf::from("prep-tools.json"))
        );
    }
}
