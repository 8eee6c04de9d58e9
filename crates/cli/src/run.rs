//! One `stepwise` invocation: configure, seed, pre-stage, loop.

use crate::args::Cli;
use anyhow::{Context, bail};
use std::path::Path;
use std::sync::Arc;
use stepwise_agent::{
    AgentLoop, Dispatcher, ManifestBackend, Prestage, RunOutcome, StdioSink,
};
use stepwise_config::AppConfig;
use stepwise_core::message::Message;
use stepwise_core::provider::ChatClient;
use stepwise_providers::{OpenAiCompatClient, RetryPolicy};
use stepwise_tools::{SubprocessRunner, ToolManifest};
use tracing::{debug, info, warn};

/// How a completed run ended.
pub enum Completion {
    Answered,
    Exhausted,
}

/// Load the configuration: file, then environment, then flags.
pub fn load_config(cli: &Cli) -> Result<AppConfig, stepwise_config::ConfigError> {
    let env = |key: &str| std::env::var(key).ok();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_with_env(path, env)?,
        None => AppConfig::load()?,
    };
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

pub async fn execute(cli: &Cli, config: &AppConfig) -> anyhow::Result<Completion> {
    let seed = seed_transcript(cli)?;
    debug!(messages = seed.len(), "Seed transcript ready");

    let runner = Arc::new(SubprocessRunner::new());
    let dispatcher = match &config.tools_manifest {
        Some(path) => {
            let manifest = ToolManifest::load(path)?;
            info!(tools = manifest.registry.len(), fingerprint = %manifest.fingerprint, "Tools loaded");
            let backend = ManifestBackend::new(manifest.registry, runner.clone(), config.tool_timeout());
            Some(
                Dispatcher::new(Arc::new(backend))
                    .with_concurrency(config.tool_concurrency)
                    .with_order(config.tool_result_order),
            )
        }
        None => None,
    };

    let seed = if config.prep.enabled {
        run_prestage(config, seed, runner).await
    } else {
        seed
    };

    let client = OpenAiCompatClient::new("openai", &config.base_url, config.api_key.clone(), config.http_timeout())?
        .with_retry_policy(RetryPolicy::new(config.retries, config.backoff_ms));
    let mut agent = AgentLoop::from_config(Arc::new(client), config)?;
    if let Some(dispatcher) = dispatcher {
        agent = agent.with_tools(dispatcher);
    }

    let mut sink = StdioSink;
    let outcome = agent.run(seed, &mut sink).await?;

    if let Some(path) = &cli.dump_transcript {
        dump_transcript(path, outcome.transcript())?;
    }

    Ok(match outcome {
        RunOutcome::Final { steps, .. } => {
            info!(steps, "Run complete");
            Completion::Answered
        }
        RunOutcome::Exhausted { steps, .. } => {
            debug!(steps, "Step budget exhausted");
            Completion::Exhausted
        }
    })
}

/// Build the seed: saved messages, then `--system` if nothing else sets
/// one, then the prompt.
fn seed_transcript(cli: &Cli) -> anyhow::Result<Vec<Message>> {
    let mut seed: Vec<Message> = match &cli.messages {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading messages from {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing messages from {}", path.display()))?
        }
        None => Vec::new(),
    };

    if let Some(system) = &cli.system {
        seed.insert(0, Message::system(system.as_str()));
    }
    if let Some(prompt) = &cli.prompt {
        seed.push(Message::user(prompt.as_str()));
    }
    if seed.is_empty() {
        bail!("the seed transcript is empty");
    }
    Ok(seed)
}

/// Fail-open: a pre-stage that cannot even be built is skipped.
async fn run_prestage(config: &AppConfig, seed: Vec<Message>, runner: Arc<SubprocessRunner>) -> Vec<Message> {
    let settings = config.resolve_prep(|key| std::env::var(key).ok());
    debug!(?settings, "Pre-stage settings");

    let client = match OpenAiCompatClient::new(
        "prep",
        &settings.base_url,
        settings.api_key.clone(),
        settings.http_timeout,
    ) {
        Ok(client) => client.with_retry_policy(RetryPolicy::new(settings.retries, settings.backoff_ms)),
        Err(e) => {
            warn!("pre-stage skipped: {e}");
            return seed;
        }
    };
    let client: Arc<dyn ChatClient> = Arc::new(client);
    let root = std::env::current_dir().unwrap_or_else(|_| ".".into());

    Prestage::from_config(client, config, settings, root, runner)
        .run(seed)
        .await
}

fn dump_transcript(path: &Path, transcript: &[Message]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(transcript)?;
    std::fs::write(path, json).with_context(|| format!("writing transcript to {}", path.display()))
}
