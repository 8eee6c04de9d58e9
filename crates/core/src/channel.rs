//! Channel routing: where an assistant channel's text is written.
//!
//! Assistant messages may carry a semantic channel ("final", "critic",
//! "confidence"). The router maps a channel to an output destination using
//! the default policy plus an optional `name=destination` override table.

use crate::error::TranscriptError;
use crate::message::{FINAL_CHANNEL, normalize_channel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Channels that may appear in an override table.
pub const KNOWN_CHANNELS: [&str; 3] = [FINAL_CHANNEL, "critic", "confidence"];

/// An output destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// Primary output (the answer stream)
    Stdout,
    /// Diagnostic output
    Stderr,
    /// Discard
    Omit,
}

impl FromStr for Destination {
    type Err = TranscriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(Destination::Stdout),
            "stderr" => Ok(Destination::Stderr),
            "omit" => Ok(Destination::Omit),
            _ => Err(TranscriptError::InvalidChannelRoute(s.to_string())),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Destination::Stdout => "stdout",
            Destination::Stderr => "stderr",
            Destination::Omit => "omit",
        })
    }
}

/// Channel → destination overrides on top of the default policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRoutes {
    overrides: HashMap<String, Destination>,
}

impl ChannelRoutes {
    /// Parse `name=destination` pairs. Later pairs win over earlier ones.
    ///
    /// Names must be one of [`KNOWN_CHANNELS`]; destinations one of
    /// `stdout|stderr|omit`. Anything else is a validation error.
    pub fn parse<S: AsRef<str>>(pairs: &[S]) -> Result<Self, TranscriptError> {
        let mut overrides = HashMap::new();
        for pair in pairs {
            let raw = pair.as_ref();
            let (name, dest) = raw
                .split_once('=')
                .ok_or_else(|| TranscriptError::InvalidChannelRoute(raw.to_string()))?;
            let name = name.trim().to_ascii_lowercase();
            if !KNOWN_CHANNELS.contains(&name.as_str()) {
                return Err(TranscriptError::InvalidChannelRoute(raw.to_string()));
            }
            let dest: Destination = dest
                .parse()
                .map_err(|_| TranscriptError::InvalidChannelRoute(raw.to_string()))?;
            overrides.insert(name, dest);
        }
        Ok(Self { overrides })
    }

    /// Effective destination for a channel.
    ///
    /// Empty and unknown names are treated as `final`.
    pub fn route(&self, channel: Option<&str>) -> Destination {
        let name = canonical_name(channel);
        if let Some(dest) = self.overrides.get(name) {
            return *dest;
        }
        if name == FINAL_CHANNEL {
            Destination::Stdout
        } else {
            Destination::Stderr
        }
    }

    /// Whether the user explicitly routed this channel.
    pub fn has_override(&self, channel: Option<&str>) -> bool {
        self.overrides.contains_key(canonical_name(channel))
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

fn canonical_name(channel: Option<&str>) -> &'static str {
    let normalized = channel.and_then(normalize_channel);
    KNOWN_CHANNELS
        .iter()
        .copied()
        .find(|known| normalized.as_deref() == Some(*known))
        .unwrap_or(FINAL_CHANNEL)
}
