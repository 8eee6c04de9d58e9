//! Tool abstractions: what the model may ask the agent to run.
//!
//! Two kinds of tools exist:
//! - **Manifest tools**: external programs described by a [`ToolSpec`],
//!   collected in a [`ToolRegistry`] and executed through a [`ToolRunner`].
//! - **Built-in tools**: in-process implementations of the [`Tool`] trait
//!   (the read-only set the pre-stage may use).

use crate::error::ToolError;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// An external tool: declaration plus the program that implements it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// The unique name the model calls
    pub name: String,

    /// Description sent to the model
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the parameters
    #[serde(default = "empty_object_schema")]
    pub parameters: serde_json::Value,

    /// Program to execute (absolute after manifest resolution, or a bare PATH name)
    pub program: PathBuf,

    /// Fixed argument vector passed to the program
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Per-tool timeout override, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

impl ToolSpec {
    /// Declaration to advertise to the model.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Effective timeout: the spec's own value, else `default`.
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }
}

/// A name → spec map of external tools.
///
/// Ordered by name so declarations and fingerprints are deterministic.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    specs: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spec. Replaces any existing spec with the same name.
    pub fn register(&mut self, spec: ToolSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    /// Get a spec by name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.get(name)
    }

    /// All tool declarations, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.specs.values().map(ToolSpec::to_definition).collect()
    }

    /// All specs, sorted by name.
    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.specs.values()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.specs.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Executes manifest tools.
///
/// Implementations must honour `timeout` and report it as [`ToolError::Timeout`].
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `spec` with the model's arguments, returning raw stdout.
    async fn run(
        &self,
        spec: &ToolSpec,
        arguments: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, ToolError>;
}

/// An in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "fs.read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments, returning a JSON payload.
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.into(),
            description: format!("{name} tool"),
            parameters: empty_object_schema(),
            program: PathBuf::from("/bin/true"),
            args: vec![],
            timeout_secs: None,
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("echo"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("zeta"));
        registry.register(spec("alpha"));
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn spec_timeout_falls_back_to_default() {
        let mut s = spec("echo");
        assert_eq!(s.timeout(Duration::from_secs(30)), Duration::from_secs(30));
        s.timeout_secs = Some(2);
        assert_eq!(s.timeout(Duration::from_secs(30)), Duration::from_secs(2));
    }
}
