//! The pre-stage reply format and how it is merged into the transcript.
//!
//! The pre-stage model answers with a JSON object (optionally inside a
//! ```` ```json ```` fence) carrying hints:
//!
//! ```json
//! {"system": "...", "developer": ["...", "..."], "tool_config": {...}, "image_instructions": "..."}
//! ```

use serde::Deserialize;
use stepwise_core::message::{Message, Role};

/// A hint value: text, a list of texts, or a JSON object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Hint {
    Text(String),
    List(Vec<String>),
    Object(serde_json::Map<String, serde_json::Value>),
}

impl Hint {
    /// Message text for this hint; empty when there is nothing to add.
    pub fn render(&self) -> String {
        match self {
            Hint::Text(text) => text.trim().to_string(),
            Hint::List(items) => items
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            Hint::Object(map) if map.is_empty() => String::new(),
            Hint::Object(map) => serde_json::to_string_pretty(map).unwrap_or_default(),
        }
    }
}

/// Hints returned by the pre-stage model.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PrestagePayload {
    #[serde(default)]
    pub system: Option<Hint>,
    #[serde(default)]
    pub developer: Option<Hint>,
    #[serde(default)]
    pub tool_config: Option<Hint>,
    #[serde(default)]
    pub image_instructions: Option<Hint>,
}

impl PrestagePayload {
    /// Parse reply content. Empty content carries no hints.
    pub fn parse(content: &str) -> Result<Self, String> {
        let body = strip_fence(content.trim());
        if body.is_empty() {
            return Ok(Self::default());
        }
        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|e| format!("pre-stage reply is not JSON: {e}"))?;
        if !value.is_object() {
            return Err("pre-stage reply is not a JSON object".to_string());
        }
        serde_json::from_value(value).map_err(|e| format!("malformed pre-stage payload: {e}"))
    }

    /// Merge the hints into `transcript` additively.
    ///
    /// Each merged message is named `prestage.<field>`; an existing message
    /// with that name is replaced in place. Text already present verbatim in
    /// a message of the same role is not added again.
    pub fn merge_into(&self, mut transcript: Vec<Message>) -> Vec<Message> {
        let fields: [(&str, Role, &Option<Hint>, &str); 4] = [
            ("system", Role::System, &self.system, ""),
            ("developer", Role::Developer, &self.developer, ""),
            ("tool_config", Role::Developer, &self.tool_config, "Tool configuration:\n"),
            ("image_instructions", Role::Developer, &self.image_instructions, "Image instructions:\n"),
        ];

        for (field, role, hint, label) in fields {
            let Some(hint) = hint else { continue };
            let rendered = hint.render();
            if rendered.is_empty() {
                continue;
            }
            let text = format!("{label}{rendered}");
            let name = format!("prestage.{field}");

            if let Some(existing) = transcript.iter_mut().find(|m| m.name.as_deref() == Some(name.as_str())) {
                existing.role = role;
                existing.content = Some(text);
                continue;
            }
            if transcript.iter().any(|m| m.role == role && m.text().contains(&text)) {
                continue;
            }

            let at = insertion_point(&transcript, role);
            let mut message = match role {
                Role::System => Message::system(text),
                _ => Message::developer(text),
            };
            message.name = Some(name);
            transcript.insert(at, message);
        }
        transcript
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_none()
            && self.developer.is_none()
            && self.tool_config.is_none()
            && self.image_instructions.is_none()
    }
}

/// System hints go after the leading system messages; developer hints after
/// the leading system/developer block.
fn insertion_point(transcript: &[Message], role: Role) -> usize {
    let in_block = |m: &Message| match role {
        Role::System => m.role == Role::System,
        _ => matches!(m.role, Role::System | Role::Developer),
    };
    transcript.iter().position(|m| !in_block(m)).unwrap_or(transcript.len())
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
