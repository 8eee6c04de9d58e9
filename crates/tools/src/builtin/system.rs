//! Process-environment built-ins: `env.get` and `os.info`.

use async_trait::async_trait;
use std::sync::Arc;
use stepwise_core::error::ToolError;
use stepwise_core::tool::Tool;

/// Variable names containing any of these are never revealed.
const SENSITIVE_MARKERS: [&str; 4] = ["KEY", "TOKEN", "SECRET", "PASSWORD"];

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Read one environment variable, redacting credentials.
pub struct EnvGetTool {
    lookup: EnvLookup,
}

impl EnvGetTool {
    /// Read from the process environment.
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Read through a custom lookup.
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Arc::new(lookup),
        }
    }
}

impl Default for EnvGetTool {
    fn default() -> Self {
        Self::new()
    }
}

fn is_sensitive(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SENSITIVE_MARKERS.iter().any(|m| upper.contains(m))
}

#[async_trait]
impl Tool for EnvGetTool {
    fn name(&self) -> &str {
        "env.get"
    }

    fn description(&self) -> &str {
        "Read an environment variable. Credentials (names containing KEY, TOKEN, SECRET or PASSWORD) are redacted."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Variable name" }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let name = arguments["name"]
            .as_str()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("env.get: missing 'name' argument".into()))?;

        let value = (self.lookup)(name);
        let set = value.is_some();
        let redacted = set && is_sensitive(name);
        let value = if redacted {
            Some("[REDACTED]".to_string())
        } else {
            value
        };

        Ok(serde_json::json!({
            "name": name,
            "value": value,
            "set": set,
            "redacted": redacted,
        }))
    }
}

/// Report the host operating system.
#[derive(Debug, Default)]
pub struct OsInfoTool;

#[async_trait]
impl Tool for OsInfoTool {
    fn name(&self) -> &str {
        "os.info"
    }

    fn description(&self) -> &str {
        "Report the operating system, CPU architecture and OS family."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "family": std::env::consts::FAMILY,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> EnvGetTool {
        EnvGetTool::with_lookup(|name| match name {
            "HOME" => Some("/home/me".into()),
            "OPENAI_API_KEY" => Some("sk-live".into()),
            "github_token" => Some("ghp".into()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn plain_variable_returned() {
        let out = tool().execute(serde_json::json!({"name": "HOME"})).await.unwrap();
        assert_eq!(out["value"], "/home/me");
        assert_eq!(out["redacted"], false);
    }

    #[tokio::test]
    async fn credentials_redacted() {
        for name in ["OPENAI_API_KEY", "github_token"] {
            let out = tool().execute(serde_json::json!({ "name": name })).await.unwrap();
            assert_eq!(out["value"], "[REDACTED]");
            assert_eq!(out["redacted"], true);
        }
    }

    #[tokio::test]
    async fn unset_variable_is_null() {
        let out = tool().execute(serde_json::json!({"name": "NOPE"})).await.unwrap();
        assert!(out["value"].is_null());
        assert_eq!(out["set"], false);
    }

    #[tokio::test]
    async fn missing_name_is_invalid() {
        assert!(matches!(
            tool().execute(serde_json::json!({})).await,
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn os_info_reports_host() {
        let out = OsInfoTool.execute(serde_json::json!({})).await.unwrap();
        assert_eq!(out["os"], std::env::consts::OS);
        assert_eq!(out["arch"], std::env::consts::ARCH);
        assert_eq!(out["family"], std::env::consts::FAMILY);
    }
}
