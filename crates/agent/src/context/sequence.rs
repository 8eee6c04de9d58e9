//! Tool-call sequencing check.
//!
//! Every `tool` message must answer a call made by the most recent
//! assistant message that carried tool calls. Violations are reported, never
//! repaired.

use std::collections::HashSet;
use stepwise_core::error::TranscriptError;
use stepwise_core::message::{Message, Role};

/// Validate tool-call sequencing in a single forward pass.
pub fn validate_sequence(messages: &[Message]) -> Result<(), TranscriptError> {
    let mut allowed: HashSet<&str> = HashSet::new();

    for (index, message) in messages.iter().enumerate() {
        match message.role {
            Role::Assistant if !message.tool_calls.is_empty() => {
                allowed = message.tool_calls.iter().map(|tc| tc.id.as_str()).collect();
            }
            Role::Tool => {
                let id = message
                    .tool_call_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .ok_or(TranscriptError::MissingToolCallId { index })?;
                if !allowed.contains(id) {
                    return Err(TranscriptError::UnexpectedToolResult {
                        index,
                        tool_call_id: id.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(())
}
