//! Path sandbox for the filesystem built-ins.
//!
//! Only relative paths are accepted. After lexical normalization no `..`
//! component may remain, and the resolved path (following symlinks when it
//! exists) must stay under the sandbox root.

use std::path::{Component, Path, PathBuf};
use stepwise_core::error::ToolError;

/// A directory that built-in tools may read from.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate `raw` and resolve it under the root.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let relative = normalize_relative(raw)?;
        let joined = self.root.join(&relative);

        // Symlinks may point outside the root; check the real location
        if joined.exists() {
            let canonical_root = self
                .root
                .canonicalize()
                .map_err(|e| ToolError::SandboxViolation(format!("sandbox root: {e}")))?;
            let canonical = joined
                .canonicalize()
                .map_err(|e| ToolError::SandboxViolation(format!("{raw}: {e}")))?;
            if !canonical.starts_with(&canonical_root) {
                return Err(ToolError::SandboxViolation(format!(
                    "{raw} resolves outside the sandbox"
                )));
            }
        }

        Ok(joined)
    }
}

/// Lexically normalize a relative path, rejecting absolute paths and `..`.
pub fn normalize_relative(raw: &str) -> Result<PathBuf, ToolError> {
    let unified = raw.trim().replace('\\', "/");
    if unified.starts_with('/') || Path::new(&unified).is_absolute() {
        return Err(ToolError::SandboxViolation(format!(
            "absolute paths are not allowed: {raw}"
        )));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(ToolError::SandboxViolation(format!(
                    "path traversal is not allowed: {raw}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ToolError::SandboxViolation(format!(
                    "absolute paths are not allowed: {raw}"
                )));
            }
        }
    }
    Ok(normalized)
}
