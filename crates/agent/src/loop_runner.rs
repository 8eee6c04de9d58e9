//! The step loop implementation.

use crate::context::token::estimate_tools_tokens;
use crate::context::{estimate_messages_tokens, length_backoff_cap, prepare_outbound};
use crate::dispatcher::Dispatcher;
use crate::output::{OutputSink, emit};
use std::sync::Arc;
use stepwise_config::{AppConfig, ConfigError, MAX_STEPS_CAP, Sampling};
use stepwise_core::channel::{ChannelRoutes, Destination};
use stepwise_core::error::{Error, ProviderError};
use stepwise_core::message::{AUXILIARY_CHANNELS, Message, normalize_channel, normalize_transcript};
use stepwise_core::provider::{ChatClient, ChatRequest, ToolDefinition};
use tracing::{debug, info, warn};

/// Diagnostic printed when the step budget runs out.
pub const EXHAUSTED_DIAGNOSTIC: &str = "reached maximum steps; needs review";

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// A final-channel answer was produced and routed.
    Final {
        text: String,
        transcript: Vec<Message>,
        steps: u32,
    },
    /// The step budget ran out first.
    Exhausted { transcript: Vec<Message>, steps: u32 },
}

impl RunOutcome {
    pub fn transcript(&self) -> &[Message] {
        match self {
            RunOutcome::Final { transcript, .. } | RunOutcome::Exhausted { transcript, .. } => transcript,
        }
    }

    pub fn steps(&self) -> u32 {
        match self {
            RunOutcome::Final { steps, .. } | RunOutcome::Exhausted { steps, .. } => *steps,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, RunOutcome::Final { .. })
    }
}

/// The assistant message of one step, and whether its final-channel text
/// already reached the output while streaming.
struct StepReply {
    message: Message,
    emitted: bool,
}

/// Drives request → response → classification until a final answer or the
/// step budget runs out.
pub struct AgentLoop {
    /// The chat endpoint
    client: Arc<dyn ChatClient>,

    /// The model to use
    model: String,

    /// Sampling knobs (at most one set)
    sampling: Sampling,

    /// Initial completion cap per request
    max_tokens: u32,

    /// Context window used to bound length backoff
    context_window: u32,

    /// Prompt budget; when set the outbound transcript is trimmed to it
    max_prompt_tokens: Option<u32>,

    /// Step budget before the hard cap
    max_steps: u32,

    /// Tool dispatcher, present only when a registry is loaded
    dispatcher: Option<Dispatcher>,

    /// Declarations advertised with every request
    tool_definitions: Vec<ToolDefinition>,

    /// Channel routing overrides
    routes: ChannelRoutes,

    /// Surface non-final channels
    verbose: bool,

    /// Disable outbound hygiene
    debug: bool,

    /// Use the SSE path
    stream: bool,
}

impl AgentLoop {
    /// Create a loop with default limits and no tools.
    pub fn new(client: Arc<dyn ChatClient>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            client,
            sampling: Sampling::one_knob(&model, None, Some(1.0)),
            model,
            max_tokens: 4096,
            context_window: 128_000,
            max_prompt_tokens: None,
            max_steps: 8,
            dispatcher: None,
            tool_definitions: Vec::new(),
            routes: ChannelRoutes::default(),
            verbose: false,
            debug: false,
            stream: false,
        }
    }

    /// Create a loop from the validated configuration. Tools are attached
    /// separately with [`AgentLoop::with_tools`].
    pub fn from_config(client: Arc<dyn ChatClient>, config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(client, config.model.clone())
            .with_sampling(config.main_sampling())
            .with_max_tokens(config.max_tokens)
            .with_context_window(config.context_window)
            .with_max_prompt_tokens(config.max_prompt_tokens)
            .with_max_steps(config.max_steps)
            .with_routes(config.channel_routes()?)
            .with_verbose(config.verbose)
            .with_debug(config.debug)
            .with_streaming(config.stream))
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Set the initial completion cap.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_context_window(mut self, window: u32) -> Self {
        self.context_window = window;
        self
    }

    pub fn with_max_prompt_tokens(mut self, budget: Option<u32>) -> Self {
        self.max_prompt_tokens = budget;
        self
    }

    /// Set the step budget. Clamped to `1..=15` when the loop runs.
    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max;
        self
    }

    /// Attach a tool dispatcher; its declarations go out with every request.
    pub fn with_tools(mut self, dispatcher: Dispatcher) -> Self {
        self.tool_definitions = dispatcher.definitions();
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_routes(mut self, routes: ChannelRoutes) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Effective step budget.
    pub fn max_steps(&self) -> u32 {
        self.max_steps.clamp(1, MAX_STEPS_CAP)
    }

    /// Run the loop on a seed transcript.
    ///
    /// The final answer is written to `sink` as it is routed; the returned
    /// outcome carries the full transcript.
    pub async fn run(&self, seed: Vec<Message>, sink: &mut dyn OutputSink) -> Result<RunOutcome, Error> {
        let mut transcript = normalize_transcript(seed);
        let max_steps = self.max_steps();

        info!(
            model = %self.model,
            messages = transcript.len(),
            tools = self.tool_definitions.len(),
            max_steps,
            "Starting run"
        );

        for step in 1..=max_steps {
            debug!(step, "Step");
            let reply = self.request_step(step, &transcript, sink).await?;
            let mut message = reply.message.normalized();

            if !message.tool_calls.is_empty() {
                if let Some(dispatcher) = &self.dispatcher {
                    debug!(step, tool_calls = message.tool_calls.len(), "Dispatching tool calls");
                    let results = dispatcher.dispatch(&message.tool_calls).await;
                    transcript.push(message);
                    transcript.extend(results);
                    continue;
                }
                warn!(step, "Model requested tools but none are loaded; ignoring the calls");
                message.tool_calls.clear();
            }

            let text = message.text().trim_end().to_string();
            if !text.trim().is_empty() {
                let channel = message.channel.as_deref();
                let destination = self.routes.route(channel);

                if message.is_final_channel() {
                    let out = if reply.emitted { "\n".to_string() } else { format!("{text}\n") };
                    emit(sink, destination, &out).map_err(output_error)?;
                    info!(step, "Final answer produced");
                    transcript.push(message);
                    return Ok(RunOutcome::Final {
                        text,
                        transcript,
                        steps: step,
                    });
                }

                if self.verbose || self.routes.has_override(channel) {
                    emit(sink, destination, &format!("{text}\n")).map_err(output_error)?;
                }
                debug!(step, channel = message.channel_name(), "Non-final channel; continuing");
            }

            transcript.push(message);
        }

        warn!(max_steps, "Step budget exhausted");
        Ok(RunOutcome::Exhausted {
            transcript,
            steps: max_steps,
        })
    }

    /// Send one step's request, applying stream fallback and at most one
    /// length backoff.
    async fn request_step(
        &self,
        step: u32,
        transcript: &[Message],
        sink: &mut dyn OutputSink,
    ) -> Result<StepReply, Error> {
        let budget = self.max_prompt_tokens.map(|t| t as usize);
        let outbound = prepare_outbound(transcript, self.debug, budget)?;

        let mut cap = self.max_tokens;
        let mut length_retried = false;
        let mut streaming = self.stream;

        loop {
            let request = self.build_request(outbound.clone(), cap);

            if streaming {
                match self.stream_reply(request.clone(), sink).await {
                    Ok(reply) => return Ok(reply),
                    Err(Error::Provider(ProviderError::UnsupportedStream { content_type })) => {
                        info!(step, %content_type, "Streaming unsupported; falling back to a complete response");
                        streaming = false;
                    }
                    Err(e) => return Err(e),
                }
            }

            let response = self.client.complete(request).await?;

            if response.hit_length_limit() && !length_retried {
                length_retried = true;
                let prompt_tokens = estimate_messages_tokens(&outbound) + estimate_tools_tokens(&self.tool_definitions);
                let previous = cap;
                cap = length_backoff_cap(cap, self.context_window, prompt_tokens);
                info!(step, previous, cap, "Completion hit the length limit; resending once");
                continue;
            }

            return Ok(StepReply {
                message: response.message,
                emitted: false,
            });
        }
    }

    /// Consume a streamed reply, writing final-channel deltas as they arrive.
    ///
    /// Deltas are held until the channel is settled (a chunk names one, or
    /// the stream completes). Nothing is written once tool-call fragments
    /// have appeared, since such a reply is not terminal.
    async fn stream_reply(&self, request: ChatRequest, sink: &mut dyn OutputSink) -> Result<StepReply, Error> {
        let mut rx = self.client.stream(request).await?;
        let mut content = String::new();
        let mut held = String::new();
        let mut channel: Option<String> = None;
        let mut settled = false;
        let mut tool_calls_seen = false;
        let mut emitted = false;

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(raw) = chunk.channel.as_deref() {
                channel = normalize_channel(raw);
                settled = true;
            }
            settled |= chunk.done;
            tool_calls_seen |= chunk.tool_calls_pending || !chunk.tool_calls.is_empty();

            if let Some(delta) = chunk.content.as_deref() {
                content.push_str(delta);
                held.push_str(delta);
            }

            let is_final = channel.as_deref().is_none_or(|c| !AUXILIARY_CHANNELS.contains(&c));
            if settled && is_final && !tool_calls_seen && !held.is_empty() {
                let destination = self.routes.route(channel.as_deref());
                emit(sink, destination, &held).map_err(output_error)?;
                emitted |= destination != Destination::Omit;
                held.clear();
            }

            if chunk.done {
                let mut message = Message::assistant_tool_calls(chunk.tool_calls);
                message.content = (!content.is_empty()).then_some(content);
                message.channel = channel;
                return Ok(StepReply { message, emitted });
            }
        }

        Err(ProviderError::StreamInterrupted("stream ended before completion".into()).into())
    }

    fn build_request(&self, messages: Vec<Message>, cap: u32) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            max_tokens: Some(cap),
            tools: self.tool_definitions.clone(),
        }
    }
}

fn output_error(e: std::io::Error) -> Error {
    Error::Internal(format!("failed to write output: {e}"))
}
