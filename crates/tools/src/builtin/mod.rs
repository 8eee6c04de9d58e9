//! Read-only built-in tools available to the pre-stage.
//!
//! `fs.read_file`, `fs.list_dir`, `fs.stat`, `env.get` and `os.info`. The
//! filesystem tools are confined to a [`Sandbox`] root (the working
//! directory in production).

pub mod fs;
pub mod sandbox;
pub mod system;

pub use sandbox::Sandbox;

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use stepwise_core::provider::ToolDefinition;
use stepwise_core::tool::Tool;

/// A name-indexed set of in-process tools.
pub struct BuiltinToolbox {
    tools: BTreeMap<String, Box<dyn Tool>>,
    sandbox: Option<Sandbox>,
}

/// What a toolbox fingerprint covers.
#[derive(Serialize)]
struct FingerprintMaterial {
    declarations: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    root: Option<PathBuf>,
}

impl BuiltinToolbox {
    /// An empty toolbox.
    pub fn empty() -> Self {
        Self {
            tools: BTreeMap::new(),
            sandbox: None,
        }
    }

    /// The read-only set, with filesystem access confined to `root`.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        let sandbox = Sandbox::new(root);
        let mut toolbox = Self::empty();
        toolbox.register(Box::new(fs::ReadFileTool::new(sandbox.clone())));
        toolbox.register(Box::new(fs::ListDirTool::new(sandbox.clone())));
        toolbox.register(Box::new(fs::StatTool::new(sandbox.clone())));
        toolbox.register(Box::new(system::EnvGetTool::new()));
        toolbox.register(Box::new(system::OsInfoTool));
        toolbox.sandbox = Some(sandbox);
        toolbox
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Declarations, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// The directory the filesystem tools read from, if any.
    pub fn root(&self) -> Option<&Path> {
        self.sandbox.as_ref().map(Sandbox::root)
    }

    /// SHA-256 (hex) of the declarations and the canonical sandbox root.
    ///
    /// Two toolboxes over different directories never share a fingerprint,
    /// since their filesystem tools see different files.
    pub fn fingerprint(&self) -> String {
        let material = FingerprintMaterial {
            declarations: self.definitions(),
            root: self
                .root()
                .map(|root| root.canonicalize().unwrap_or_else(|_| root.to_path_buf())),
        };
        let canonical = serde_json::to_vec(&material).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
