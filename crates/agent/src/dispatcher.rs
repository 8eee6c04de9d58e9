//! Concurrent tool dispatch.
//!
//! One assistant message may request several tool calls. They run in
//! parallel, bounded by a semaphore, and every call produces exactly one
//! `tool` result message: failures, timeouts, unknown names and even
//! panics become `{"error": ...}` payloads the model can read.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use stepwise_config::ToolResultOrder;
use stepwise_core::error::ToolError;
use stepwise_core::message::{Message, MessageToolCall};
use stepwise_core::provider::ToolDefinition;
use stepwise_core::tool::{ToolRegistry, ToolRunner};
use stepwise_tools::BuiltinToolbox;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Something that can execute tools by name.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Declarations to advertise to the model.
    fn definitions(&self) -> Vec<ToolDefinition>;

    fn has_tool(&self, name: &str) -> bool;

    /// Run one call, returning its output text.
    async fn invoke(&self, name: &str, arguments: &str) -> Result<String, ToolError>;
}

/// External tools from a manifest, run as subprocesses.
pub struct ManifestBackend {
    registry: ToolRegistry,
    runner: Arc<dyn ToolRunner>,
    default_timeout: Duration,
}

impl ManifestBackend {
    pub fn new(registry: ToolRegistry, runner: Arc<dyn ToolRunner>, default_timeout: Duration) -> Self {
        Self {
            registry,
            runner,
            default_timeout,
        }
    }
}

#[async_trait]
impl ToolBackend for ManifestBackend {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    fn has_tool(&self, name: &str) -> bool {
        self.registry.get(name).is_some()
    }

    async fn invoke(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        let spec = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let stdout = self
            .runner
            .run(spec, arguments, spec.timeout(self.default_timeout))
            .await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

/// In-process built-in tools with a shared deadline.
pub struct BuiltinBackend {
    toolbox: BuiltinToolbox,
    timeout: Duration,
}

impl BuiltinBackend {
    pub fn new(toolbox: BuiltinToolbox, timeout: Duration) -> Self {
        Self { toolbox, timeout }
    }
}

#[async_trait]
impl ToolBackend for BuiltinBackend {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.toolbox.definitions()
    }

    fn has_tool(&self, name: &str) -> bool {
        self.toolbox.contains(name)
    }

    async fn invoke(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        let tool = self
            .toolbox
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let args: serde_json::Value = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments)
                .map_err(|e| ToolError::InvalidArguments(format!("{name}: {e}")))?
        };
        let value = tokio::time::timeout(self.timeout, tool.execute(args))
            .await
            .map_err(|_| ToolError::Timeout {
                tool_name: name.to_string(),
                timeout_secs: self.timeout.as_secs(),
            })??;
        Ok(value.to_string())
    }
}

/// Runs the tool calls of one assistant message.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn ToolBackend>,
    concurrency: usize,
    order: ToolResultOrder,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self {
            backend,
            concurrency: 8,
            order: ToolResultOrder::Completion,
        }
    }

    /// Maximum calls in flight at once (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Order in which results are appended.
    pub fn with_order(mut self, order: ToolResultOrder) -> Self {
        self.order = order;
        self
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.backend.definitions()
    }

    /// Execute `calls`, returning exactly one result message per call.
    pub async fn dispatch(&self, calls: &[MessageToolCall]) -> Vec<Message> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut answered = vec![false; calls.len()];
        // (request index, result) in completion order
        let mut results: Vec<(usize, Message)> = Vec::with_capacity(calls.len());
        let mut set = JoinSet::new();

        for (index, call) in calls.iter().enumerate() {
            if !self.backend.has_tool(&call.name) {
                warn!(tool = %call.name, "Model requested an unknown tool");
                answered[index] = true;
                results.push((index, error_result(call, &format!("unknown tool: {}", call.name))));
                continue;
            }

            let backend = Arc::clone(&self.backend);
            let semaphore = Arc::clone(&semaphore);
            let call = call.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                debug!(tool = %call.name, id = %call.id, "Running tool");
                let outcome = AssertUnwindSafe(
                    backend.invoke(&call.name, call.arguments_or_empty_object()),
                )
                .catch_unwind()
                .await;
                let result = match outcome {
                    Ok(Ok(output)) => success_result(&call, &output),
                    Ok(Err(e)) => {
                        warn!(tool = %call.name, error = %e, "Tool failed");
                        error_result(&call, &failure_text(&e))
                    }
                    Err(_) => {
                        warn!(tool = %call.name, "Tool panicked");
                        error_result(&call, "tool panicked")
                    }
                };
                (index, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    answered[index] = true;
                    results.push((index, result));
                }
                Err(e) => warn!(error = %e, "Tool task did not complete"),
            }
        }

        for (index, call) in calls.iter().enumerate() {
            if !answered[index] {
                results.push((index, error_result(call, "tool did not complete")));
            }
        }

        if self.order == ToolResultOrder::Request {
            results.sort_by_key(|(index, _)| *index);
        }
        results.into_iter().map(|(_, message)| message).collect()
    }
}

fn failure_text(error: &ToolError) -> String {
    match error {
        ToolError::Timeout { .. } => "tool timed out".to_string(),
        other => other.to_string(),
    }
}

fn success_result(call: &MessageToolCall, output: &str) -> Message {
    let content = if output.trim().is_empty() { "{}" } else { output };
    Message::tool_result(&call.id, &call.name, content)
}

fn error_result(call: &MessageToolCall, message: &str) -> Message {
    Message::tool_result(
        &call.id,
        &call.name,
        serde_json::json!({ "error": message }).to_string(),
    )
}
