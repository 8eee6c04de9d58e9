//! The pre-stage: one preparatory model call before the main loop.
//!
//! The pre-stage model sees the seed transcript and may answer with hints
//! (extra system/developer guidance) and read-only tool calls. Its output is
//! merged into the seed and cached on disk. It is fail-open: any error
//! yields the original transcript and a single warning.

pub mod cache;
pub mod payload;

pub use cache::{PrepCache, cache_key};
pub use payload::{Hint, PrestagePayload};

use crate::context::prepare_outbound;
use crate::dispatcher::{BuiltinBackend, Dispatcher, ManifestBackend};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stepwise_config::{AppConfig, ResolvedPrep, ToolResultOrder};
use stepwise_core::error::{ProviderError, ToolError, TranscriptError};
use stepwise_core::message::{Message, normalize_transcript};
use stepwise_core::provider::{ChatClient, ChatRequest};
use stepwise_core::tool::ToolRunner;
use stepwise_tools::{BuiltinToolbox, ToolManifest};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a pre-stage attempt was abandoned. Never escapes [`Prestage::run`].
#[derive(Debug, Error)]
pub enum PrestageError {
    #[error("invalid transcript: {0}")]
    Transcript(#[from] TranscriptError),

    #[error("request failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("tools unavailable: {0}")]
    Tool(#[from] ToolError),

    #[error("{0}")]
    Payload(String),
}

/// Which tools the pre-stage model may call.
pub enum PrestageTools {
    /// The read-only built-ins, filesystem access confined to `root`.
    Builtin { root: PathBuf },
    /// An external manifest, loaded when the pre-stage runs.
    External {
        manifest: PathBuf,
        runner: Arc<dyn ToolRunner>,
    },
}

/// The pre-stage engine.
pub struct Prestage {
    client: Arc<dyn ChatClient>,
    settings: ResolvedPrep,
    tools: PrestageTools,
    cache: PrepCache,
    max_tokens: u32,
    tool_timeout: Duration,
    tool_concurrency: usize,
    tool_order: ToolResultOrder,
    debug: bool,
}

impl Prestage {
    pub fn new(client: Arc<dyn ChatClient>, settings: ResolvedPrep, tools: PrestageTools) -> Self {
        let cache = PrepCache::new(settings.cache_dir.clone(), settings.cache_ttl);
        Self {
            client,
            settings,
            tools,
            cache,
            max_tokens: 4096,
            tool_timeout: Duration::from_secs(30),
            tool_concurrency: 8,
            tool_order: ToolResultOrder::Completion,
            debug: false,
        }
    }

    /// Build from configuration. External tools are used only when allowed
    /// and a manifest is configured; otherwise the built-ins, rooted at
    /// `root`.
    pub fn from_config(
        client: Arc<dyn ChatClient>,
        config: &AppConfig,
        settings: ResolvedPrep,
        root: PathBuf,
        runner: Arc<dyn ToolRunner>,
    ) -> Self {
        let tools = match (&settings.tools_manifest, settings.allow_external_tools) {
            (Some(manifest), true) => PrestageTools::External {
                manifest: manifest.clone(),
                runner,
            },
            _ => PrestageTools::Builtin { root },
        };
        let mut prestage = Self::new(client, settings, tools);
        prestage.max_tokens = config.max_tokens;
        prestage.tool_timeout = config.tool_timeout();
        prestage.tool_concurrency = config.tool_concurrency;
        prestage.tool_order = config.tool_result_order;
        prestage.debug = config.debug;
        prestage
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Run the pre-stage, falling back to `transcript` on any failure.
    pub async fn run(&self, transcript: Vec<Message>) -> Vec<Message> {
        match self.try_run(&transcript).await {
            Ok(augmented) => augmented,
            Err(e) => {
                warn!("pre-stage skipped: {e}");
                transcript
            }
        }
    }

    /// Run the pre-stage, reporting failures.
    pub async fn try_run(&self, transcript: &[Message]) -> Result<Vec<Message>, PrestageError> {
        let seed = normalize_transcript(transcript.to_vec());
        let (dispatcher, fingerprint) = self.toolset()?;

        let key = cache_key(&self.settings, &fingerprint, &seed);
        if self.settings.cache_bust {
            debug!(key = %key, "Pre-stage cache bypassed");
        } else if let Some(hit) = self.cache.try_read(&key) {
            info!(key = %key, "Pre-stage cache hit");
            return Ok(hit);
        }

        let mut messages = Vec::with_capacity(seed.len() + 1);
        if let Some(prompt) = self.settings.effective_system_prompt() {
            messages.push(Message::system(prompt));
        }
        messages.extend(seed.iter().cloned());
        let outbound = prepare_outbound(&messages, self.debug, None)?;

        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: outbound,
            temperature: self.settings.sampling.temperature,
            top_p: self.settings.sampling.top_p,
            max_tokens: Some(self.max_tokens),
            tools: dispatcher.definitions(),
        };
        debug!(model = %request.model, messages = request.messages.len(), "Sending pre-stage request");
        let response = self.client.complete(request).await?;
        let reply = response.message.normalized();

        let payload = PrestagePayload::parse(reply.text()).map_err(PrestageError::Payload)?;
        let mut merged = payload.merge_into(seed);

        if !reply.tool_calls.is_empty() {
            debug!(tool_calls = reply.tool_calls.len(), "Pre-stage requested tools");
            let results = dispatcher.dispatch(&reply.tool_calls).await;
            let mut assistant = Message::assistant_tool_calls(reply.tool_calls);
            assistant.channel = reply.channel;
            merged.push(assistant);
            merged.extend(results);
        }

        if let Err(e) = self.cache.write(&key, &merged) {
            warn!(error = %e, dir = %self.cache.dir().display(), "Could not write pre-stage cache");
        }
        Ok(merged)
    }

    /// The dispatcher for this run and its toolset fingerprint.
    fn toolset(&self) -> Result<(Dispatcher, String), PrestageError> {
        let (dispatcher, fingerprint) = match &self.tools {
            PrestageTools::Builtin { root } => {
                let toolbox = BuiltinToolbox::read_only(root.clone());
                let fingerprint = toolbox.fingerprint();
                let backend = BuiltinBackend::new(toolbox, self.tool_timeout);
                (Dispatcher::new(Arc::new(backend)), fingerprint)
            }
            PrestageTools::External { manifest, runner } => {
                let manifest = ToolManifest::load(manifest)?;
                let fingerprint = manifest.fingerprint.clone();
                let backend = ManifestBackend::new(manifest.registry, Arc::clone(runner), self.tool_timeout);
                (Dispatcher::new(Arc::new(backend)), fingerprint)
            }
        };
        Ok((
            dispatcher
                .with_concurrency(self.tool_concurrency)
                .with_order(self.tool_order),
            fingerprint,
        ))
    }
}
