//! Incremental decoder for OpenAI-style server-sent events.
//!
//! Bytes are fed in as they arrive; complete `data:` lines are parsed into
//! [`StreamChunk`]s. Tool-call fragments are accumulated by index and only
//! emitted, fully assembled, on the closing chunk; content chunks after the
//! first fragment are flagged `tool_calls_pending`.

use serde::Deserialize;
use std::collections::BTreeMap;
use stepwise_core::message::MessageToolCall;
use stepwise_core::provider::{StreamChunk, Usage};
use tracing::trace;

/// Result of feeding bytes to the decoder.
#[derive(Debug, Default)]
pub(crate) struct Decoded {
    /// Content deltas in arrival order.
    pub chunks: Vec<StreamChunk>,
    /// Whether `[DONE]` was seen.
    pub done: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    channel: Option<String>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the chunks completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Decoded {
        self.buffer.extend_from_slice(bytes);
        let mut decoded = Decoded::default();

        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            // Skip blank separators, comments and non-data fields
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                decoded.done = true;
                self.buffer.clear();
                break;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(event) => {
                    if let Some(chunk) = self.apply(event) {
                        decoded.chunks.push(chunk);
                    }
                }
                Err(e) => trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk"),
            }
        }

        decoded
    }

    /// The closing chunk: assembled tool calls, finish reason and usage.
    pub fn finish(&mut self) -> StreamChunk {
        StreamChunk {
            content: None,
            channel: self.channel.clone(),
            tool_calls_pending: !self.tool_calls.is_empty(),
            tool_calls: std::mem::take(&mut self.tool_calls)
                .into_values()
                .map(ToolCallAccumulator::into_tool_call)
                .collect(),
            finish_reason: self.finish_reason.take(),
            done: true,
            usage: self.usage.take(),
        }
    }

    fn apply(&mut self, event: StreamResponse) -> Option<StreamChunk> {
        if let Some(usage) = event.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        let choice = event.choices.into_iter().next()?;
        let delta = choice.delta;

        if let Some(channel) = delta.channel.filter(|c| !c.trim().is_empty()) {
            self.channel = Some(channel);
        }
        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }

        for tc in delta.tool_calls.unwrap_or_default() {
            let acc = self.tool_calls.entry(tc.index).or_default();
            if let Some(id) = tc.id {
                acc.id = id;
            }
            if let Some(function) = tc.function {
                if let Some(name) = function.name {
                    acc.name = name;
                }
                if let Some(arguments) = function.arguments {
                    acc.arguments.push_str(&arguments);
                }
            }
        }

        let content = delta.content.filter(|c| !c.is_empty())?;
        Some(StreamChunk {
            content: Some(content),
            channel: self.channel.clone(),
            tool_calls_pending: !self.tool_calls.is_empty(),
            ..StreamChunk::default()
        })
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> MessageToolCall {
        MessageToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

// --- Streaming SSE wire types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut SseDecoder, text: &str) -> Decoded {
        decoder.push(text.as_bytes())
    }

    fn contents(decoded: &Decoded) -> Vec<String> {
        decoded
            .chunks
            .iter()
            .filter_map(|c| c.content.clone())
            .collect()
    }

    #[test]
    fn content_deltas_in_order() {
        let mut decoder = SseDecoder::new();
        let decoded = feed(
            &mut decoder,
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        );
        assert_eq!(contents(&decoded), vec!["Hel", "lo"]);
        assert!(!decoded.done);
    }

    #[test]
    fn lines_split_across_pushes() {
        let mut decoder = SseDecoder::new();
        let first = feed(&mut decoder, "data: {\"choices\":[{\"delta\":{\"con");
        assert!(first.chunks.is_empty());
        let second = feed(&mut decoder, "tent\":\"ok\"}}]}\r\n\r\n");
        assert_eq!(contents(&second), vec!["ok"]);
    }

    #[test]
    fn multibyte_char_split_across_pushes() {
        let mut decoder = SseDecoder::new();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"é\"}}]}\n";
        let bytes = line.as_bytes();
        let split = line.find('é').unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).chunks.is_empty());
        assert_eq!(contents(&decoder.push(&bytes[split..])), vec!["é"]);
    }

    #[test]
    fn comments_and_garbage_ignored() {
        let mut decoder = SseDecoder::new();
        let decoded = feed(
            &mut decoder,
            ": keep-alive\nevent: ping\ndata: not json\ndata: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n",
        );
        assert_eq!(contents(&decoded), vec!["x"]);
    }

    #[test]
    fn done_marker_stops_decoding() {
        let mut decoder = SseDecoder::new();
        let decoded = feed(
            &mut decoder,
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\ndata: [DONE]\n",
        );
        assert!(decoded.done);
        let last = decoder.finish();
        assert!(last.done);
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn channel_is_sticky() {
        let mut decoder = SseDecoder::new();
        let decoded = feed(
            &mut decoder,
            "data: {\"choices\":[{\"delta\":{\"channel\":\"critic\",\"content\":\"a\"}}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
        );
        assert_eq!(decoded.chunks[1].channel.as_deref(), Some("critic"));
        assert_eq!(decoder.finish().channel.as_deref(), Some("critic"));
    }

    #[test]
    fn tool_calls_assembled_by_index() {
        let mut decoder = SseDecoder::new();
        feed(
            &mut decoder,
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"call_b\",\"function\":{\"name\":\"calc\",\"arguments\":\"\"}},{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"search\",\"arguments\":\"{\\\"q\\\"\"}}]}}]}\n\
             data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\":\\\"rust\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n",
        );
        let last = decoder.finish();
        assert_eq!(last.tool_calls.len(), 2);
        assert_eq!(last.tool_calls[0].id, "call_a");
        assert_eq!(last.tool_calls[0].arguments, "{\"q\":\"rust\"}");
        assert_eq!(last.tool_calls[1].name, "calc");
        assert_eq!(last.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn content_after_tool_fragments_is_flagged() {
        let mut decoder = SseDecoder::new();
        let decoded = feed(
            &mut decoder,
            "data: {\"choices\":[{\"delta\":{\"content\":\"Let me check. \"}}]}\n\
             data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"search\",\"arguments\":\"{}\"}}]}}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"One moment.\"}}]}\n",
        );
        assert_eq!(decoded.chunks.len(), 2);
        assert!(!decoded.chunks[0].tool_calls_pending);
        assert!(decoded.chunks[1].tool_calls_pending);
        let last = decoder.finish();
        assert!(last.tool_calls_pending);
        assert_eq!(last.tool_calls.len(), 1);
    }

    #[test]
    fn usage_carried_to_final_chunk() {
        let mut decoder = SseDecoder::new();
        feed(
            &mut decoder,
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n",
        );
        let usage = decoder.finish().usage.unwrap();
        assert_eq!(usage.total_tokens, 15);
    }
}
