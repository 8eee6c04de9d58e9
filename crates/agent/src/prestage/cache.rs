//! On-disk pre-stage cache.
//!
//! One JSON file per key under the cache directory. Writes go to a temporary
//! file that is renamed into place, so readers never see a partial entry;
//! concurrent writers race and the last rename wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stepwise_config::ResolvedPrep;
use stepwise_core::message::Message;
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    written_at: DateTime<Utc>,
    messages: Vec<Message>,
}

/// Everything that determines a pre-stage result.
#[derive(Serialize)]
struct KeyMaterial<'a> {
    model: &'a str,
    base_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    retries: u32,
    backoff_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
    toolset: &'a str,
    messages: Vec<KeyMessage<'a>>,
}

#[derive(Serialize)]
struct KeyMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Deterministic cache key (SHA-256, hex).
///
/// Messages contribute only their role and trimmed content; tool calls and
/// channels are ignored. The pre-stage system prompt counts only when it is
/// actually sent.
pub fn cache_key(settings: &ResolvedPrep, toolset_fingerprint: &str, messages: &[Message]) -> String {
    let material = KeyMaterial {
        model: &settings.model,
        base_url: &settings.base_url,
        temperature: settings.sampling.temperature,
        top_p: settings.sampling.top_p,
        retries: settings.retries,
        backoff_ms: settings.backoff_ms,
        system_prompt: settings.effective_system_prompt(),
        toolset: toolset_fingerprint,
        messages: messages
            .iter()
            .map(|m| KeyMessage {
                role: m.role.as_str(),
                content: m.text().trim(),
            })
            .collect(),
    };
    let canonical = serde_json::to_vec(&material).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// A directory of cached pre-stage transcripts with a time-to-live.
#[derive(Debug, Clone)]
pub struct PrepCache {
    dir: PathBuf,
    ttl: Duration,
}

impl PrepCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self { dir: dir.into(), ttl }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A fresh entry for `key`, if any. Missing, unreadable, corrupt and
    /// expired entries all read as a miss.
    pub fn try_read(&self, key: &str) -> Option<Vec<Message>> {
        self.try_read_at(key, Utc::now())
    }

    fn try_read_at(&self, key: &str, now: DateTime<Utc>) -> Option<Vec<Message>> {
        let path = self.path_for(key);
        let bytes = std::fs::read(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring corrupt cache entry");
                return None;
            }
        };
        if entry.key != key {
            return None;
        }
        let age = now.signed_duration_since(entry.written_at).to_std().unwrap_or_default();
        if age > self.ttl {
            debug!(key, age_secs = age.as_secs(), "Cache entry expired");
            return None;
        }
        Some(entry.messages)
    }

    /// Store `messages` under `key`.
    pub fn write(&self, key: &str, messages: &[Message]) -> std::io::Result<()> {
        self.write_at(key, messages, Utc::now())
    }

    fn write_at(&self, key: &str, messages: &[Message], now: DateTime<Utc>) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let entry = CacheEntry {
            key: key.to_string(),
            written_at: now,
            messages: messages.to_vec(),
        };
        let bytes = serde_json::to_vec(&entry).map_err(std::io::Error::other)?;
        let tmp = self.dir.join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, self.path_for(key)).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp);
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}
