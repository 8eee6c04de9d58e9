//! Tool manifest loading.
//!
//! A manifest is a JSON file describing external tools:
//!
//! ```json
//! {"tools": [{"name": "echo", "description": "Echo text",
//!             "schema": {"type": "object"},
//!             "command": ["./echo.sh", "--flag"], "timeoutSec": 10}]}
//! ```
//!
//! Relative programs containing a `/` resolve against the manifest's
//! directory; bare names are looked up on `PATH`. Every program must exist
//! at load time so a broken manifest fails before any model call.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use stepwise_core::error::ToolError;
use stepwise_core::provider::ToolDefinition;
use stepwise_core::tool::{ToolRegistry, ToolSpec};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ManifestFile {
    tools: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "parameters")]
    schema: Option<serde_json::Value>,
    command: Vec<String>,
    #[serde(default)]
    timeout_sec: Option<u64>,
}

/// A loaded manifest: registry plus its fingerprint.
#[derive(Debug, Clone)]
pub struct ToolManifest {
    pub path: PathBuf,
    pub registry: ToolRegistry,
    /// SHA-256 (hex) of the name-sorted spec list
    pub fingerprint: String,
}

impl ToolManifest {
    /// Load and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self, ToolError> {
        let text = std::fs::read_to_string(path).map_err(|e| manifest_error(path, e))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, path, base_dir)
    }

    /// Parse manifest text; programs resolve against `base_dir`.
    pub fn parse(text: &str, path: &Path, base_dir: &Path) -> Result<Self, ToolError> {
        let file: ManifestFile = serde_json::from_str(text).map_err(|e| manifest_error(path, e))?;

        let mut registry = ToolRegistry::new();
        for entry in file.tools {
            let name = entry.name.trim().to_string();
            if name.is_empty() {
                return Err(manifest_error(path, "tool with empty name"));
            }
            if registry.get(&name).is_some() {
                return Err(manifest_error(path, format!("duplicate tool name {name:?}")));
            }

            let mut command = entry.command.into_iter();
            let Some(program) = command.next().filter(|p| !p.trim().is_empty()) else {
                return Err(manifest_error(path, format!("tool {name:?} has an empty command")));
            };
            let program = resolve_program(&name, &program, base_dir)?;

            registry.register(ToolSpec {
                name,
                description: entry.description,
                parameters: entry
                    .schema
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
                program,
                args: command.collect(),
                timeout_secs: entry.timeout_sec.filter(|t| *t > 0),
            });
        }

        let fingerprint = fingerprint(&registry);
        debug!(path = %path.display(), tools = registry.len(), fingerprint = %fingerprint, "Loaded tool manifest");

        Ok(Self {
            path: path.to_path_buf(),
            registry,
            fingerprint,
        })
    }

    /// Tool declarations, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }
}

/// Fingerprint of a registry: SHA-256 of its canonical spec list.
pub fn fingerprint(registry: &ToolRegistry) -> String {
    let specs: Vec<&ToolSpec> = registry.specs().collect();
    let canonical = serde_json::to_vec(&specs).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

fn manifest_error(path: &Path, reason: impl std::fmt::Display) -> ToolError {
    ToolError::Manifest {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Resolve a manifest program to something that exists.
fn resolve_program(tool: &str, program: &str, base_dir: &Path) -> Result<PathBuf, ToolError> {
    let unavailable = || ToolError::ProgramUnavailable {
        tool_name: tool.to_string(),
        program: program.to_string(),
    };

    let candidate = Path::new(program);
    if candidate.is_absolute() {
        return is_runnable(candidate)
            .then(|| candidate.to_path_buf())
            .ok_or_else(unavailable);
    }
    if program.contains('/') || program.contains('\\') {
        let joined = base_dir.join(candidate);
        return is_runnable(&joined).then_some(joined).ok_or_else(unavailable);
    }

    let path_var = std::env::var_os("PATH").ok_or_else(unavailable)?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|p| is_runnable(p))
        .ok_or_else(unavailable)
}

#[cfg(unix)]
fn is_runnable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_runnable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\ncat\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn write_manifest(dir: &Path, body: serde_json::Value) -> PathBuf {
        let path = dir.join("tools.json");
        std::fs::write(&path, body.to_string()).unwrap();
        path
    }

    #[test]
    fn loads_relative_and_path_programs() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "echo.sh");
        let path = write_manifest(
            dir.path(),
            serde_json::json!({"tools": [
                {"name": "echo", "description": "Echo", "schema": {"type": "object", "properties": {"text": {"type": "string"}}},
                 "command": ["./echo.sh", "--loud"], "timeoutSec": 5},
                {"name": "cat", "command": ["sh", "-c", "cat"]}
            ]}),
        );

        let manifest = ToolManifest::load(&path).unwrap();
        assert_eq!(manifest.registry.len(), 2);

        let echo = manifest.registry.get("echo").unwrap();
        assert!(echo.program.is_absolute() || echo.program.starts_with(dir.path()));
        assert_eq!(echo.args, vec!["--loud"]);
        assert_eq!(echo.timeout_secs, Some(5));

        let cat = manifest.registry.get("cat").unwrap();
        assert!(cat.program.ends_with("sh"));
        assert_eq!(cat.parameters, serde_json::json!({"type": "object"}));

        let names: Vec<_> = manifest.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["cat", "echo"]);
    }

    #[test]
    fn missing_program_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            serde_json::json!({"tools": [{"name": "ghost", "command": ["./nope.sh"]}]}),
        );
        assert!(matches!(
            ToolManifest::load(&path),
            Err(ToolError::ProgramUnavailable { .. })
        ));
    }

    #[test]
    fn duplicate_and_empty_entries_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for body in [
            serde_json::json!({"tools": [{"name": "a", "command": ["sh"]}, {"name": "a", "command": ["sh"]}]}),
            serde_json::json!({"tools": [{"name": " ", "command": ["sh"]}]}),
            serde_json::json!({"tools": [{"name": "a", "command": []}]}),
            serde_json::json!({"tool": []}),
        ] {
            let path = write_manifest(dir.path(), body.clone());
            assert!(
                matches!(ToolManifest::load(&path), Err(ToolError::Manifest { .. })),
                "{body} should be rejected"
            );
        }
    }

    #[test]
    fn fingerprint_is_order_independent_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let a = ToolManifest::parse(
            r#"{"tools":[{"name":"x","command":["sh"]},{"name":"y","command":["sh"]}]}"#,
            Path::new("a.json"),
            dir.path(),
        )
        .unwrap();
        let b = ToolManifest::parse(
            r#"{"tools":[{"name":"y","command":["sh"]},{"name":"x","command":["sh"]}]}"#,
            Path::new("b.json"),
            dir.path(),
        )
        .unwrap();
        let c = ToolManifest::parse(
            r#"{"tools":[{"name":"x","command":["sh"]},{"name":"y","description":"changed","command":["sh"]}]}"#,
            Path::new("c.json"),
            dir.path(),
        )
        .unwrap();

        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }
}
