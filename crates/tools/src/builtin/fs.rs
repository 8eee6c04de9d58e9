//! Read-only filesystem built-ins: `fs.read_file`, `fs.list_dir`, `fs.stat`.

use super::sandbox::Sandbox;
use async_trait::async_trait;
use serde::Deserialize;
use stepwise_core::error::ToolError;
use stepwise_core::tool::Tool;
use tokio::io::AsyncReadExt;

/// Largest file content returned by `fs.read_file`.
pub const MAX_READ_BYTES: u64 = 256 * 1024;

#[derive(Debug, Deserialize)]
struct PathArgs {
    #[serde(default)]
    path: Option<String>,
}

fn parse_args(tool: &str, arguments: serde_json::Value) -> Result<PathArgs, ToolError> {
    serde_json::from_value(arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("{tool}: {e}")))
}

fn required_path(tool: &str, args: &PathArgs) -> Result<String, ToolError> {
    args.path
        .clone()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("{tool}: missing 'path' argument")))
}

fn io_error(tool: &str, path: &str, e: std::io::Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.to_string(),
        reason: format!("{path}: {e}"),
    }
}

fn kind_of(file_type: std::fs::FileType) -> &'static str {
    if file_type.is_symlink() {
        "symlink"
    } else if file_type.is_dir() {
        "dir"
    } else if file_type.is_file() {
        "file"
    } else {
        "other"
    }
}

fn path_schema(description: &str, required: bool) -> serde_json::Value {
    let mut schema = serde_json::json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": description }
        },
        "additionalProperties": false
    });
    if required {
        schema["required"] = serde_json::json!(["path"]);
    }
    schema
}

/// Read a text file (capped at 256 KiB).
pub struct ReadFileTool {
    sandbox: Sandbox,
}

impl ReadFileTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "fs.read_file"
    }

    fn description(&self) -> &str {
        "Read a text file relative to the working directory. Output is capped at 256 KiB."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        path_schema("Relative path of the file to read", true)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let args = parse_args(self.name(), arguments)?;
        let raw = required_path(self.name(), &args)?;
        let path = self.sandbox.resolve(&raw)?;

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| io_error(self.name(), &raw, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| io_error(self.name(), &raw, e))?
            .len();

        let mut buf = Vec::new();
        file.take(MAX_READ_BYTES)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| io_error(self.name(), &raw, e))?;

        Ok(serde_json::json!({
            "path": raw,
            "content": String::from_utf8_lossy(&buf),
            "bytes": size,
            "truncated": size > MAX_READ_BYTES,
        }))
    }
}

/// List a directory, sorted by name.
pub struct ListDirTool {
    sandbox: Sandbox,
}

impl ListDirTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "fs.list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory relative to the working directory, sorted by name."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        path_schema("Relative directory path (defaults to '.')", false)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let args = parse_args(self.name(), arguments)?;
        let raw = args.path.unwrap_or_else(|| ".".into());
        let path = self.sandbox.resolve(&raw)?;

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| io_error(self.name(), &raw, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_error(self.name(), &raw, e))?
        {
            let kind = entry
                .file_type()
                .await
                .map(kind_of)
                .unwrap_or("other");
            entries.push((entry.file_name().to_string_lossy().into_owned(), kind));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let entries: Vec<_> = entries
            .into_iter()
            .map(|(name, kind)| serde_json::json!({ "name": name, "type": kind }))
            .collect();
        Ok(serde_json::json!({ "path": raw, "entries": entries }))
    }
}

/// Report metadata for a path.
pub struct StatTool {
    sandbox: Sandbox,
}

impl StatTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for StatTool {
    fn name(&self) -> &str {
        "fs.stat"
    }

    fn description(&self) -> &str {
        "Report type, size and modification time of a path relative to the working directory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        path_schema("Relative path to inspect", true)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let args = parse_args(self.name(), arguments)?;
        let raw = required_path(self.name(), &args)?;
        let path = self.sandbox.resolve(&raw)?;

        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| io_error(self.name(), &raw, e))?;
        let modified = meta
            .modified()
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());

        Ok(serde_json::json!({
            "path": raw,
            "type": kind_of(meta.file_type()),
            "size": meta.len(),
            "modified": modified,
            "readonly": meta.permissions().readonly(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_with_files() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "bravo").unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let sandbox = Sandbox::new(dir.path());
        (dir, sandbox)
    }

    #[tokio::test]
    async fn read_file_returns_content() {
        let (_dir, sandbox) = sandbox_with_files();
        let out = ReadFileTool::new(sandbox)
            .execute(serde_json::json!({"path": "a.txt"}))
            .await
            .unwrap();
        assert_eq!(out["content"], "alpha");
        assert_eq!(out["truncated"], false);
    }

    #[tokio::test]
    async fn read_file_is_capped() {
        let (dir, sandbox) = sandbox_with_files();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(300 * 1024)).unwrap();
        let out = ReadFileTool::new(sandbox)
            .execute(serde_json::json!({"path": "big.txt"}))
            .await
            .unwrap();
        assert_eq!(out["content"].as_str().unwrap().len() as u64, MAX_READ_BYTES);
        assert_eq!(out["truncated"], true);
        assert_eq!(out["bytes"], 300 * 1024);
    }

    #[tokio::test]
    async fn read_file_rejects_escape() {
        let (_dir, sandbox) = sandbox_with_files();
        let tool = ReadFileTool::new(sandbox);
        for path in ["/etc/passwd", "../x", "sub/../../x"] {
            assert!(matches!(
                tool.execute(serde_json::json!({ "path": path })).await,
                Err(ToolError::SandboxViolation(_))
            ));
        }
    }

    #[tokio::test]
    async fn read_file_requires_path() {
        let (_dir, sandbox) = sandbox_with_files();
        assert!(matches!(
            ReadFileTool::new(sandbox).execute(serde_json::json!({})).await,
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn list_dir_sorted() {
        let (_dir, sandbox) = sandbox_with_files();
        let out = ListDirTool::new(sandbox)
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        let names: Vec<_> = out["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
        assert_eq!(out["entries"][2]["type"], "dir");
    }

    #[tokio::test]
    async fn stat_reports_metadata() {
        let (_dir, sandbox) = sandbox_with_files();
        let out = StatTool::new(sandbox)
            .execute(serde_json::json!({"path": "b.txt"}))
            .await
            .unwrap();
        assert_eq!(out["type"], "file");
        assert_eq!(out["size"], 5);
        assert!(out["modified"].is_string());
    }

    #[tokio::test]
    async fn stat_missing_path_is_execution_failure() {
        let (_dir, sandbox) = sandbox_with_files();
        assert!(matches!(
            StatTool::new(sandbox)
                .execute(serde_json::json!({"path": "nope"}))
                .await,
            Err(ToolError::ExecutionFailed { .. })
        ));
    }
}
