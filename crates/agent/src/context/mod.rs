//! Outbound context preparation.
//!
//! Every request goes through the same pipeline, in order:
//!
//! | Stage | Module | Effect |
//! |-------|--------|--------|
//! | 1. Hygiene | [`hygiene`] | Oversized tool output replaced by a marker |
//! | 2. Trim | [`trim`] | Optional, only with a prompt budget |
//! | 3. Validate | [`sequence`] | Tool-call sequencing checked, never repaired |

pub mod hygiene;
pub mod sequence;
pub mod token;
pub mod trim;

pub use hygiene::apply_hygiene;
pub use sequence::validate_sequence;
pub use token::{estimate_messages_tokens, length_backoff_cap};
pub use trim::trim_to_budget;

use stepwise_core::error::TranscriptError;
use stepwise_core::message::Message;

/// Build the message list actually sent for one request.
///
/// The stored transcript is not modified.
pub fn prepare_outbound(
    transcript: &[Message],
    debug: bool,
    prompt_budget: Option<usize>,
) -> Result<Vec<Message>, TranscriptError> {
    let mut outbound = apply_hygiene(transcript, debug);
    if let Some(budget) = prompt_budget {
        outbound = trim_to_budget(&outbound, budget);
    }
    validate_sequence(&outbound)?;
    Ok(outbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::message::MessageToolCall;

    #[test]
    fn pipeline_filters_then_validates() {
        let transcript = vec![
            Message::user("q"),
            Message::assistant_tool_calls(vec![MessageToolCall {
                id: "call_1".into(),
                name: "dump".into(),
                arguments: "{}".into(),
            }]),
            Message::tool_result("call_1", "dump", "z".repeat(10_000)),
        ];
        let outbound = prepare_outbound(&transcript, false, None).unwrap();
        assert_eq!(outbound[2].text(), hygiene::TRUNCATION_MARKER);
        assert_eq!(transcript[2].text().len(), 10_000);
    }

    #[test]
    fn pipeline_rejects_orphan_tool_result() {
        let transcript = vec![Message::tool_result("x", "echo", "{}")];
        assert!(prepare_outbound(&transcript, false, None).is_err());
    }
}
