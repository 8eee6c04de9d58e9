//! OpenAI-compatible chat client.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, LM Studio and any endpoint
//! that exposes `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - Per-message `channel` field on responses
//! - Retries with backoff, `Retry-After`, and one temperature-recovery retry

use crate::retry::{ErrorKind, RetryPolicy, classify_http_error};
use crate::sse::SseDecoder;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use stepwise_core::error::ProviderError;
use stepwise_core::message::{Message, MessageToolCall, Role};
use stepwise_core::provider::*;
use tracing::{debug, warn};

/// An OpenAI-compatible chat client.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OpenAiCompatClient {
    /// Create a new client with the given per-request deadline.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
            policy: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: match (&m.content, m.role) {
                    (Some(text), _) => Some(text.clone()),
                    // Tool results must carry content
                    (None, Role::Tool) => Some(String::new()),
                    (None, _) => None,
                },
                name: m.name.clone(),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments_or_empty_object().to_string(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
                channel: None,
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(request: &ChatRequest, stream: bool, with_temperature: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": stream,
        });

        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        } else if let Some(temperature) = request.temperature.filter(|_| with_temperature) {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        body
    }

    /// POST the request, retrying transient failures.
    ///
    /// One `Idempotency-Key` is used for every attempt of the same logical
    /// request. A 400 that rejects `temperature` triggers a single resend
    /// without it, which does not count against the retry budget.
    async fn send(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let idempotency_key = uuid::Uuid::new_v4().to_string();
        let mut with_temperature = true;
        let mut attempt: u32 = 0;

        loop {
            let body = Self::build_body(request, stream, with_temperature);

            let mut builder = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("Idempotency-Key", &idempotency_key)
                .json(&body);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }
            if stream {
                builder = builder.header("Accept", "text/event-stream");
            }

            debug!(client = %self.name, model = %request.model, attempt, stream, "Sending chat request");

            let (kind, error) = match builder.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let error_body = response.text().await.unwrap_or_default();

                    if status == 400
                        && with_temperature
                        && request.temperature.is_some()
                        && request.top_p.is_none()
                        && rejects_temperature(&error_body)
                    {
                        warn!(client = %self.name, model = %request.model, "Endpoint rejected temperature, resending without it");
                        with_temperature = false;
                        continue;
                    }

                    if status == 401 || status == 403 {
                        return Err(ProviderError::AuthenticationFailed(format!(
                            "status {status}: {}",
                            summarize(&error_body)
                        )));
                    }

                    let kind = classify_http_error(status, retry_after.as_deref());
                    let error = match &kind {
                        ErrorKind::RateLimit { retry_after } => ProviderError::RateLimited {
                            retry_after_secs: retry_after.map(|d| d.as_secs()).unwrap_or(0),
                        },
                        _ => ProviderError::ApiError {
                            status_code: status,
                            message: summarize(&error_body),
                        },
                    };
                    (kind, error)
                }
                Err(e) if e.is_timeout() => (ErrorKind::NetworkError, ProviderError::Timeout(e.to_string())),
                Err(e) => (ErrorKind::NetworkError, ProviderError::Network(e.to_string())),
            };

            if !kind.is_retryable() || attempt >= self.policy.max_retries {
                warn!(client = %self.name, attempts = attempt + 1, error = %error, "Chat request failed");
                return Err(error);
            }

            let delay = self.policy.delay_for_attempt(attempt, kind.retry_after());
            warn!(
                event = "backoff",
                client = %self.name,
                attempt = attempt + 1,
                max = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Whether an error body says the temperature parameter is not accepted.
fn rejects_temperature(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("temperature")
        && ["unsupported", "not support", "does not support", "invalid", "only the default"]
            .iter()
            .any(|needle| lower.contains(needle))
}

/// Keep error bodies short in diagnostics.
fn summarize(body: &str) -> String {
    const LIMIT: usize = 512;
    let trimmed = body.trim();
    if trimmed.len() <= LIMIT {
        return trimmed.to_string();
    }
    let mut end = LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let response = self.send(&request, false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let mut message = Message::assistant_tool_calls(tool_calls);
        message.content = choice.message.content.filter(|c| !c.is_empty());
        if let Some(channel) = choice.message.channel.as_deref() {
            message = message.with_channel(channel);
        }

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ChatResponse {
            message,
            finish_reason: choice.finish_reason,
            usage,
            model: api_response.model.unwrap_or_else(|| request.model.clone()),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChunkReceiver, ProviderError> {
        let response = self.send(&request, true).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.to_ascii_lowercase().starts_with("text/event-stream") {
            return Err(ProviderError::UnsupportedStream { content_type });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                let decoded = decoder.push(&bytes);
                for chunk in decoded.chunks {
                    if tx.send(Ok(chunk)).await.is_err() {
                        return; // receiver dropped
                    }
                }
                if decoded.done {
                    break;
                }
            }

            // [DONE] or end of body: emit the closing chunk
            let _ = tx.send(Ok(decoder.finish())).await;
        });

        Ok(rx)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
