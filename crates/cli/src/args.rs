//! Command-line flags and how they override the configuration.

use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use stepwise_config::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "stepwise",
    about = "Run a bounded, tool-using agent loop against an OpenAI-compatible endpoint",
    version
)]
#[command(group(ArgGroup::new("input").required(true).multiple(true).args(["prompt", "messages"])))]
pub struct Cli {
    /// User prompt appended to the seed transcript
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// System message placed first in the seed transcript
    #[arg(long)]
    pub system: Option<String>,

    /// Seed transcript as a JSON array of messages
    #[arg(long, value_name = "FILE")]
    pub messages: Option<PathBuf>,

    /// Config file (default: ~/.stepwise/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub base_url: Option<String>,

    #[arg(long)]
    pub api_key: Option<String>,

    /// Tool manifest (JSON)
    #[arg(long, value_name = "FILE")]
    pub tools: Option<PathBuf>,

    /// Step budget (capped at 15)
    #[arg(long)]
    pub max_steps: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// Nucleus sampling; suppresses temperature
    #[arg(long)]
    pub top_p: Option<f32>,

    /// Initial completion cap
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Stream the answer as it is generated
    #[arg(long)]
    pub stream: bool,

    /// Show non-final channels and debug logs on stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Send tool output unfiltered
    #[arg(long)]
    pub debug: bool,

    /// Route a channel: final|critic|confidence = stdout|stderr|omit
    #[arg(long = "channel-route", value_name = "NAME=DEST")]
    pub channel_routes: Vec<String>,

    /// Skip the pre-stage
    #[arg(long)]
    pub no_prep: bool,

    /// Ignore cached pre-stage results (still refreshes the cache)
    #[arg(long)]
    pub prep_cache_bust: bool,

    #[arg(long)]
    pub prep_model: Option<String>,

    /// Pre-stage sampling profile (e.g. "deterministic")
    #[arg(long)]
    pub prep_profile: Option<String>,

    /// Let the pre-stage run manifest tools instead of the read-only built-ins
    #[arg(long)]
    pub prep_tools_allow_external: bool,

    /// Write the final transcript as JSON
    #[arg(long, value_name = "FILE")]
    pub dump_transcript: Option<PathBuf>,
}

impl Cli {
    /// Apply flag overrides on top of file and environment settings.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = Some(api_key.clone());
        }
        if let Some(tools) = &self.tools {
            config.tools_manifest = Some(tools.clone());
        }
        if let Some(max_steps) = self.max_steps {
            config.max_steps = max_steps;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(top_p) = self.top_p {
            config.top_p = Some(top_p);
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_tokens = max_tokens;
        }
        config.stream |= self.stream;
        config.verbose |= self.verbose;
        config.debug |= self.debug;
        config.channel_routes.extend(self.channel_routes.iter().cloned());

        if self.no_prep {
            config.prep.enabled = false;
        }
        config.prep.cache_bust |= self.prep_cache_bust;
        config.prep.allow_external_tools |= self.prep_tools_allow_external;
        if let Some(model) = &self.prep_model {
            config.prep.model = Some(model.clone());
        }
        if let Some(profile) = &self.prep_profile {
            config.prep.profile = Some(profile.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn prompt_or_messages_required() {
        let err = Cli::try_parse_from(["stepwise"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(Cli::try_parse_from(["stepwise", "-p", "hi"]).is_ok());
        assert!(Cli::try_parse_from(["stepwise", "--messages", "seed.json"]).is_ok());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "stepwise",
            "-p",
            "hi",
            "--model",
            "o3-mini",
            "--top-p",
            "0.5",
            "--channel-route",
            "critic=stdout",
            "--channel-route",
            "confidence=omit",
            "--no-prep",
            "--prep-profile",
            "deterministic",
        ])
        .unwrap();
        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.model, "o3-mini");
        assert_eq!(config.top_p, Some(0.5));
        assert_eq!(config.channel_routes, vec!["critic=stdout", "confidence=omit"]);
        assert!(!config.prep.enabled);
        assert_eq!(config.prep.profile.as_deref(), Some("deterministic"));
        assert!(config.validate().is_ok());
    }
}
