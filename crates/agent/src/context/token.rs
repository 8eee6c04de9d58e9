//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, rounded up.
//! Close enough for budget decisions on BPE tokenizers; no tokenizer is
//! loaded.

use stepwise_core::message::Message;
use stepwise_core::provider::ToolDefinition;

/// Per-message overhead for role name, delimiters and formatting markers.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Per-tool-call overhead on top of its name and argument text.
pub const TOOL_CALL_OVERHEAD: usize = 8;

/// Floor for a length-backoff completion cap.
pub const MIN_BACKOFF_CAP: u32 = 256;

/// Tokens kept free between prompt and completion.
pub const PROMPT_SAFETY_MARGIN: u32 = 32;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including overhead and tool calls.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|tc| TOOL_CALL_OVERHEAD + estimate_tokens(&tc.name) + estimate_tokens(&tc.arguments))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(message.text()) + calls
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a tool definition (serialized as JSON).
pub fn estimate_tool_tokens(tool: &ToolDefinition) -> usize {
    let json = serde_json::to_string(tool).unwrap_or_default();
    estimate_tokens(&json)
}

/// Estimate tokens for a slice of tool definitions.
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools.iter().map(estimate_tool_tokens).sum()
}

/// Completion cap for the single resend after a `length` finish.
///
/// `clamp(max(256, prev * 2), 1, window - prompt - 32)`; the upper bound
/// never drops below 1.
pub fn length_backoff_cap(prev_cap: u32, context_window: u32, prompt_tokens: usize) -> u32 {
    let prompt = u32::try_from(prompt_tokens).unwrap_or(u32::MAX);
    let upper = context_window
        .saturating_sub(prompt)
        .saturating_sub(PROMPT_SAFETY_MARGIN)
        .max(1);
    prev_cap.saturating_mul(2).max(MIN_BACKOFF_CAP).clamp(1, upper)
}
