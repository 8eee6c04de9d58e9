//! ChatClient trait: the abstraction over chat-completion endpoints.
//!
//! A ChatClient knows how to send a transcript to a model and get a response
//! back, either as a complete message or as a stream of deltas. Retries,
//! backoff and parameter recovery are its own business; the orchestration
//! core only sees the final outcome.

use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Finish reason reported when the completion cap cut the answer short.
pub const FINISH_REASON_LENGTH: &str = "length";

/// A chat-completion request.
///
/// At most one of `temperature` and `top_p` is set (the one-knob rule);
/// request builders enforce it, clients send whatever is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The transcript, already hygiene-filtered
    pub messages: Vec<Message>,

    /// Sampling temperature; omitted from the wire when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling; omitted from the wire when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// A tool declaration sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated assistant message
    pub message: Message,

    /// Why generation stopped ("stop", "length", "tool_calls", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

impl ChatResponse {
    /// Whether the completion cap truncated this response.
    pub fn hit_length_limit(&self) -> bool {
        self.finish_reason.as_deref() == Some(FINISH_REASON_LENGTH)
    }
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Channel announced by the server for this message, if any
    #[serde(default)]
    pub channel: Option<String>,

    /// Fully assembled tool calls (only on the final chunk)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Tool-call fragments have arrived earlier in this reply
    #[serde(default)]
    pub tool_calls_pending: bool,

    /// Finish reason, once the server reports one
    #[serde(default)]
    pub finish_reason: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Receiving end of a streamed completion.
pub type ChunkReceiver = tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>;

/// The core ChatClient trait.
///
/// The step loop and the pre-stage call `complete()` or `stream()` without
/// knowing which endpoint is behind it.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai", "prep").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(&self, request: ChatRequest) -> Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: response.message.content,
                channel: response.message.channel,
                tool_calls_pending: !response.message.tool_calls.is_empty(),
                tool_calls: response.message.tool_calls,
                finish_reason: response.finish_reason,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClient;

    #[async_trait]
    impl ChatClient for FixedClient {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                message: Message::assistant("hello").with_channel("critic"),
                finish_reason: Some("stop".into()),
                usage: None,
                model: "fixed".into(),
            })
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            temperature: None,
            top_p: Some(0.9),
            max_tokens: None,
            tools: vec![],
        }
    }

    #[test]
    fn omitted_knobs_are_not_serialized() {
        let json = serde_json::to_value(request()).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["top_p"], serde_json::json!(0.9f32));
    }

    #[test]
    fn length_finish_reason_detected() {
        let response = ChatResponse {
            message: Message::assistant("cut"),
            finish_reason: Some("length".into()),
            usage: None,
            model: "m".into(),
        };
        assert!(response.hit_length_limit());
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let mut rx = FixedClient.stream(request()).await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.content.as_deref(), Some("hello"));
        assert_eq!(chunk.channel.as_deref(), Some("critic"));
        assert!(rx.recv().await.is_none());
    }
}
