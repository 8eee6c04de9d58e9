//! Shared test utilities for the step loop and the pre-stage.
//!
//! Provides a scripted chat client that returns pre-programmed responses in
//! order and records every request it receives.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use stepwise_core::error::ProviderError;
use stepwise_core::message::{Message, MessageToolCall};
use stepwise_core::provider::{ChatClient, ChatRequest, ChatResponse, ChunkReceiver, StreamChunk};

/// A chat client that replays a script of responses.
///
/// Once the script is exhausted every call fails with `ApiError(500)`.
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<ChatResponse, ProviderError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    streaming: StreamMode,
}

/// How `stream()` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Wrap the next scripted response in a single chunk.
    SingleChunk,
    /// Split content into one chunk per word.
    PerWord,
    /// Refuse with `UnsupportedStream`.
    Unsupported,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<ChatResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            streaming: StreamMode::SingleChunk,
        }
    }

    /// Script of successful responses.
    pub fn replies(responses: Vec<ChatResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub fn with_stream_mode(mut self, mode: StreamMode) -> Self {
        self.streaming = mode;
        self
    }

    /// How many requests have been made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::ApiError {
                    status_code: 500,
                    message: "script exhausted".into(),
                })
            })
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.next(request)
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChunkReceiver, ProviderError> {
        if self.streaming == StreamMode::Unsupported {
            self.requests.lock().unwrap().push(request);
            return Err(ProviderError::UnsupportedStream {
                content_type: "application/json".into(),
            });
        }

        let response = self.next(request)?;
        let message = response.message;
        let pieces: Vec<String> = match (self.streaming, message.content.as_deref()) {
            (StreamMode::PerWord, Some(text)) => text.split_inclusive(' ').map(String::from).collect(),
            (_, Some(text)) => vec![text.to_string()],
            (_, None) => Vec::new(),
        };

        let (tx, rx) = tokio::sync::mpsc::channel(pieces.len() + 1);
        for piece in pieces {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(piece),
                    channel: message.channel.clone(),
                    ..Default::default()
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                channel: message.channel.clone(),
                tool_calls: message.tool_calls,
                finish_reason: response.finish_reason,
                done: true,
                ..Default::default()
            }))
            .await;
        Ok(rx)
    }
}

/// A plain final answer.
pub fn text_response(text: &str) -> ChatResponse {
    response(Message::assistant(text), "stop")
}

/// An answer on a named channel.
pub fn channel_response(text: &str, channel: &str) -> ChatResponse {
    response(Message::assistant(text).with_channel(channel), "stop")
}

/// An answer cut short by the completion cap.
pub fn length_response(text: &str) -> ChatResponse {
    response(Message::assistant(text), "length")
}

/// A tool-call-only response.
pub fn tool_response(calls: Vec<MessageToolCall>) -> ChatResponse {
    response(Message::assistant_tool_calls(calls), "tool_calls")
}

/// A tool call with `id = "call_<name>"`.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

fn response(message: Message, finish_reason: &str) -> ChatResponse {
    ChatResponse {
        message,
        finish_reason: Some(finish_reason.to_string()),
        usage: None,
        model: "mock-model".into(),
    }
}
