//! Subprocess tool runner.
//!
//! Spawns the manifest program with its fixed argv, writes the model's
//! arguments JSON to stdin, and returns stdout. Children are spawned with
//! `kill_on_drop` so a timeout (or a cancelled worker) never leaks a process.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ToolRunner, ToolSpec};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// How much stderr to keep in failure messages.
const STDERR_EXCERPT: usize = 2048;

/// Runs manifest tools as child processes.
#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner;

impl SubprocessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for SubprocessRunner {
    async fn run(
        &self,
        spec: &ToolSpec,
        arguments: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, ToolError> {
        debug!(tool = %spec.name, program = %spec.program.display(), "Spawning tool");

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: spec.name.clone(),
                reason: format!("failed to spawn {}: {e}", spec.program.display()),
            })?;

        let stdin = child.stdin.take();
        let payload = arguments.as_bytes().to_vec();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A child that never reads stdin closes the pipe early
                let _ = stdin.write_all(&payload).await;
                let _ = stdin.shutdown().await;
            }
        };

        let run = async {
            let (_, output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let output = match tokio::time::timeout(timeout, run).await {
            Ok(result) => result.map_err(|e| ToolError::ExecutionFailed {
                tool_name: spec.name.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                warn!(tool = %spec.name, timeout_secs = timeout.as_secs(), "Tool timed out");
                return Err(ToolError::Timeout {
                    tool_name: spec.name.clone(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let excerpt: String = stderr.chars().take(STDERR_EXCERPT).collect();
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into());
            warn!(tool = %spec.name, exit_code = %code, "Tool exited with failure");
            return Err(ToolError::ExecutionFailed {
                tool_name: spec.name.clone(),
                reason: if excerpt.is_empty() {
                    format!("exit status {code}")
                } else {
                    format!("exit status {code}: {excerpt}")
                },
            });
        }

        Ok(output.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(name: &str, script: &str) -> ToolSpec {
        ToolSpec {
            name: name.into(),
            description: String::new(),
            parameters: serde_json::json!({"type": "object"}),
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
            timeout_secs: None,
        }
    }

    #[tokio::test]
    async fn arguments_arrive_on_stdin() {
        let out = SubprocessRunner
            .run(&sh("cat", "cat"), r#"{"text":"hi"}"#, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, br#"{"text":"hi"}"#);
    }

    #[tokio::test]
    async fn child_ignoring_stdin_is_fine() {
        let out = SubprocessRunner
            .run(&sh("hello", "echo hello"), &"x".repeat(1 << 20), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure_with_stderr() {
        let err = SubprocessRunner
            .run(&sh("fail", "echo oops >&2; exit 3"), "{}", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ToolError::ExecutionFailed { reason, .. } => {
                assert!(reason.contains('3'));
                assert!(reason.contains("oops"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let err = SubprocessRunner
            .run(&sh("slow", "sleep 5"), "{}", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_program_fails() {
        let mut spec = sh("ghost", "");
        spec.program = PathBuf::from("/nonexistent/stepwise-tool");
        assert!(matches!(
            SubprocessRunner.run(&spec, "{}", Duration::from_secs(1)).await,
            Err(ToolError::ExecutionFailed { .. })
        ));
    }
}
