//! Outbound hygiene: oversized tool output is replaced by a marker before it
//! is sent. The stored transcript is never modified.

use stepwise_core::message::{Message, Role};

/// Largest tool result sent verbatim.
pub const MAX_TOOL_OUTPUT_BYTES: usize = 8192;

/// Replacement content for oversized tool results.
pub const TRUNCATION_MARKER: &str = r#"{"truncated":true,"reason":"large-tool-output"}"#;

/// Copy of `messages` with oversized tool outputs replaced.
///
/// With `debug` set the copy is byte-identical.
pub fn apply_hygiene(messages: &[Message], debug: bool) -> Vec<Message> {
    if debug {
        return messages.to_vec();
    }
    messages
        .iter()
        .map(|m| {
            if m.role == Role::Tool && m.text().len() > MAX_TOOL_OUTPUT_BYTES {
                let mut filtered = m.clone();
                filtered.content = Some(TRUNCATION_MARKER.to_string());
                filtered
            } else {
                m.clone()
            }
        })
        .collect()
}
