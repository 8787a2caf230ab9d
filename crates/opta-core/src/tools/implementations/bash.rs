use std::process::Stdio;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

const MAX_OUTPUT_BYTES: usize = 64 * 1024;

#[derive(Deserialize)]
struct BashParams {
    command: String,
}

/// Run a shell command in the session working directory.
///
/// Timeouts and cancellation are enforced by the registry around every tool
/// call, so the command is simply awaited here.
pub struct BashTool;

#[async_trait::async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory and return its output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command to run"},
                "timeout_ms": {"type": "integer", "description": "Override the execution timeout for this command, in milliseconds"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: BashParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if params.command.trim().is_empty() {
            return ToolResult::error("empty command");
        }

        let output = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&params.command)
            .current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => return ToolResult::error(format!("failed to run command: {}", e)),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        if text.len() > MAX_OUTPUT_BYTES {
            let mut cut = MAX_OUTPUT_BYTES;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n... (output truncated)");
        }

        if output.status.success() {
            ToolResult::success(text)
        } else {
            ToolResult::error(format!(
                "command exited with {}\n{}",
                output.status,
                text.trim_end()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx(dir: &std::path::Path) -> ToolContext {
        ToolContext::new("s", dir.to_path_buf(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_bash_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();

        let result = BashTool
            .execute(json!({"command": "ls"}), &ctx(dir.path()))
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("marker"));
    }

    #[tokio::test]
    async fn test_bash_nonzero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = BashTool
            .execute(json!({"command": "echo bad >&2; exit 2"}), &ctx(dir.path()))
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("bad"));
    }
}
