//! Prompt trimming to an estimated token budget.
//!
//! The first system and first developer message are pinned. Everything else
//! is grouped into units (an assistant tool-call message travels with the
//! tool results that answer it) and dropped oldest-first. If the pinned
//! messages alone still exceed the budget their content is truncated
//! proportionally; if even that cannot fit, only the newest message is kept,
//! truncated.

use super::token::{MESSAGE_OVERHEAD, estimate_message_tokens, estimate_messages_tokens};
use std::collections::HashSet;
use stepwise_core::message::{Message, Role};
use tracing::debug;

/// Trim `messages` so their estimate fits within `budget` tokens.
pub fn trim_to_budget(messages: &[Message], budget: usize) -> Vec<Message> {
    if estimate_messages_tokens(messages) <= budget {
        return messages.to_vec();
    }

    let pinned = pinned_indices(messages);
    let mut units = group_units(messages, &pinned);
    let mut total = estimate_messages_tokens(messages);
    let mut dropped = 0usize;

    while total > budget && !units.is_empty() {
        let unit = units.remove(0);
        total -= unit
            .iter()
            .map(|&i| estimate_message_tokens(&messages[i]))
            .sum::<usize>();
        dropped += unit.len();
    }

    if total <= budget && !(pinned.is_empty() && units.is_empty()) {
        debug!(dropped, estimate = total, budget, "Trimmed oldest messages");
        let keep: HashSet<usize> = pinned.iter().copied().chain(units.into_iter().flatten()).collect();
        return messages
            .iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, m)| m.clone())
            .collect();
    }

    let pinned_messages: Vec<Message> = pinned.iter().map(|&i| messages[i].clone()).collect();
    if !pinned_messages.is_empty()
        && let Some(truncated) = truncate_proportionally(&pinned_messages, budget)
    {
        debug!(budget, "Truncated pinned messages to fit");
        return truncated;
    }

    debug!(budget, "Budget too small for pinned messages; keeping newest message only");
    newest_message_only(messages, budget)
}

/// Indices of the first system and the first developer message.
fn pinned_indices(messages: &[Message]) -> Vec<usize> {
    let mut pinned: Vec<usize> = [Role::System, Role::Developer]
        .iter()
        .filter_map(|role| messages.iter().position(|m| m.role == *role))
        .collect();
    pinned.sort_unstable();
    pinned
}

/// Group the unpinned messages into drop units, oldest first.
fn group_units(messages: &[Message], pinned: &[usize]) -> Vec<Vec<usize>> {
    let mut units: Vec<Vec<usize>> = Vec::new();
    let mut open_calls: HashSet<&str> = HashSet::new();

    for (index, message) in messages.iter().enumerate() {
        if pinned.contains(&index) {
            open_calls.clear();
            continue;
        }
        let answers_open_call = message.role == Role::Tool
            && message
                .tool_call_id
                .as_deref()
                .is_some_and(|id| open_calls.contains(id));

        if answers_open_call && let Some(unit) = units.last_mut() {
            unit.push(index);
            continue;
        }

        open_calls.clear();
        if message.role == Role::Assistant && !message.tool_calls.is_empty() {
            open_calls.extend(message.tool_calls.iter().map(|tc| tc.id.as_str()));
        }
        units.push(vec![index]);
    }
    units
}

/// Shrink every message's content by the same ratio so the set fits.
///
/// Returns `None` when the per-message overhead alone exceeds the budget.
fn truncate_proportionally(messages: &[Message], budget: usize) -> Option<Vec<Message>> {
    let fixed: usize = messages
        .iter()
        .map(|m| {
            let mut bare = m.clone();
            bare.content = None;
            estimate_message_tokens(&bare)
        })
        .sum();
    // One token of rounding slack per message.
    let available = budget.checked_sub(fixed + messages.len())?;
    if available == 0 {
        return None;
    }

    let total_bytes: usize = messages.iter().map(|m| m.text().len()).sum();
    let allowed_bytes = available * 4;
    Some(
        messages
            .iter()
            .map(|m| {
                let len = m.text().len();
                let target = if total_bytes == 0 {
                    0
                } else {
                    len * allowed_bytes / total_bytes
                };
                let mut out = m.clone();
                if len > target {
                    out.content = Some(truncate_at_char_boundary(m.text(), target).to_string());
                }
                out
            })
            .collect(),
    )
}

/// The newest non-tool message (tool results cannot stand alone), content
/// truncated to fit. Tool calls are dropped.
fn newest_message_only(messages: &[Message], budget: usize) -> Vec<Message> {
    let Some(newest) = messages
        .iter()
        .rev()
        .find(|m| m.role != Role::Tool)
        .or_else(|| messages.last())
    else {
        return Vec::new();
    };

    let mut kept = newest.clone();
    kept.tool_calls.clear();
    kept.tool_call_id = None;
    let max_bytes = budget.saturating_sub(MESSAGE_OVERHEAD) * 4;
    kept.content = Some(truncate_at_char_boundary(newest.text(), max_bytes).to_string());
    if kept.role == Role::Tool {
        kept.role = Role::User;
        kept.name = None;
    }
    vec![kept]
}

fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::message::MessageToolCall;

    fn call(id: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: "echo".into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn under_budget_is_untouched() {
        let messages = vec![Message::system("s"), Message::user("hello")];
        assert_eq!(trim_to_budget(&messages, 1_000), messages);
    }

    #[test]
    fn drops_oldest_and_keeps_pinned() {
        let messages = vec![
            Message::system("sys"),
            Message::developer("dev"),
            Message::user("a".repeat(400)),
            Message::assistant("b".repeat(400)),
            Message::user("latest"),
        ];
        let trimmed = trim_to_budget(&messages, 40);
        assert_eq!(trimmed[0].role, Role::System);
        assert_eq!(trimmed[1].role, Role::Developer);
        assert_eq!(trimmed.last().unwrap().text(), "latest");
        assert_eq!(trimmed.len(), 3);
        assert!(estimate_messages_tokens(&trimmed) <= 40);
    }

    #[test]
    fn tool_call_unit_dropped_together() {
        let messages = vec![
            Message::system("sys"),
            Message::user("q"),
            Message::assistant_tool_calls(vec![call("a"), call("b")]),
            Message::tool_result("a", "echo", "x".repeat(200)),
            Message::tool_result("b", "echo", "y".repeat(200)),
            Message::user("follow-up question"),
        ];
        let trimmed = trim_to_budget(&messages, 30);
        assert!(trimmed.iter().all(|m| m.role != Role::Tool));
        assert!(trimmed.iter().all(|m| m.tool_calls.is_empty()));
        assert_eq!(trimmed.last().unwrap().text(), "follow-up question");
        super::super::sequence::validate_sequence(&trimmed).unwrap();
    }

    #[test]
    fn pinned_truncated_proportionally() {
        let messages = vec![
            Message::system("s".repeat(800)),
            Message::developer("d".repeat(400)),
            Message::user("u".repeat(400)),
        ];
        let trimmed = trim_to_budget(&messages, 100);
        assert_eq!(trimmed.len(), 2);
        assert!(estimate_messages_tokens(&trimmed) <= 100);
        // 2:1 ratio preserved
        let sys = trimmed[0].text().len();
        let dev = trimmed[1].text().len();
        assert!(sys > dev);
        assert!(dev > 0);
    }

    #[test]
    fn last_resort_keeps_newest_message() {
        let messages = vec![
            Message::system("s".repeat(100)),
            Message::developer("d".repeat(100)),
            Message::user("question"),
        ];
        let trimmed = trim_to_budget(&messages, 10);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].role, Role::User);
        assert_eq!(trimmed[0].text(), "question");
        assert!(estimate_messages_tokens(&trimmed) <= 10);
    }

    #[test]
    fn single_oversized_message_is_truncated_not_dropped() {
        let messages = vec![Message::user("x".repeat(1_000))];
        let trimmed = trim_to_budget(&messages, 20);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].text().len(), 64);
    }

    #[test]
    fn char_boundary_respected() {
        assert_eq!(truncate_at_char_boundary("héllo", 2), "h");
        assert_eq!(truncate_at_char_boundary("abc", 10), "abc");
    }
}
