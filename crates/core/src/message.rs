//! Message and transcript domain types.
//!
//! A run's transcript is an ordered `Vec<Message>`: seed messages first, then
//! assistant turns and the tool results that answer them.

use crate::error::TranscriptError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Channel name treated as the terminal answer.
pub const FINAL_CHANNEL: &str = "final";

/// Channels that carry commentary rather than the answer.
pub const AUXILIARY_CHANNELS: [&str; 2] = ["critic", "confidence"];

/// Maximum length of a normalized channel token.
pub const MAX_CHANNEL_LEN: usize = 32;

/// The role of a message sender in a conversation.
///
/// Parsing trims and lowercases the token; anything outside the five
/// known roles is a [`TranscriptError::InvalidRole`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    /// System instructions
    System,
    /// Developer instructions (higher priority than user text)
    Developer,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Developer => "developer",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl FromStr for Role {
    type Err = TranscriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "developer" => Ok(Role::Developer),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            _ => Err(TranscriptError::InvalidRole(s.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = TranscriptError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Display name, used for tool-result attribution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Semantic output channel of an assistant message; `None` means final
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            tool_call_id: None,
            channel: None,
            tool_calls: Vec::new(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a new developer message.
    pub fn developer(content: impl Into<String>) -> Self {
        Self::with_role(Role::Developer, content)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create an assistant message that only requests tool calls.
    pub fn assistant_tool_calls(tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            ..Self::with_role(Role::Assistant, "")
        }
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    /// Set the channel (normalized).
    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = normalize_channel(channel);
        self
    }

    /// The content, or an empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Whether this message's content is on the final channel.
    ///
    /// Empty and unrecognised channels count as final; only the known
    /// auxiliary channels do not.
    pub fn is_final_channel(&self) -> bool {
        self.channel
            .as_deref()
            .is_none_or(|c| !AUXILIARY_CHANNELS.contains(&c))
    }

    /// Effective channel name (`final` when absent).
    pub fn channel_name(&self) -> &str {
        self.channel.as_deref().unwrap_or(FINAL_CHANNEL)
    }

    /// Normalize channel tokens and drop fields that do not belong to the role.
    pub fn normalized(mut self) -> Self {
        if self.role == Role::Assistant {
            self.channel = self.channel.as_deref().and_then(normalize_channel);
        } else {
            self.channel = None;
            self.tool_calls.clear();
        }
        if self.role != Role::Tool {
            self.tool_call_id = None;
        }
        self
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON text, passed through verbatim
    pub arguments: String,
}

impl MessageToolCall {
    /// Arguments with an empty string normalized to `{}`.
    pub fn arguments_or_empty_object(&self) -> &str {
        if self.arguments.trim().is_empty() {
            "{}"
        } else {
            &self.arguments
        }
    }
}

/// Normalize a channel token: lowercase ASCII `[a-z0-9_-]`, at most 32 chars.
///
/// Returns `None` for an empty result, which callers treat as `final`.
pub fn normalize_channel(raw: &str) -> Option<String> {
    let token: String = raw
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .take(MAX_CHANNEL_LEN)
        .collect();
    if token.is_empty() { None } else { Some(token) }
}

/// Normalize every message of a transcript (see [`Message::normalized`]).
pub fn normalize_transcript(messages: Vec<Message>) -> Vec<Message> {
    messages.into_iter().map(Message::normalized).collect()
}
