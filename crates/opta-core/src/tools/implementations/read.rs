use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

const DEFAULT_LINE_LIMIT: usize = 2000;

#[derive(Deserialize)]
struct ReadParams {
    file_path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Read a file with numbered lines, windowed by offset/limit.
pub struct ReadTool;

#[async_trait::async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file from the working directory. Returns numbered lines; use offset and limit for large files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path to the file, relative to the working directory or absolute"},
                "offset": {"type": "integer", "description": "1-based line to start from"},
                "limit": {"type": "integer", "description": "Maximum number of lines to return"}
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: ReadParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let path = ctx.resolve_path(&params.file_path);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                return ToolResult::error(format!("cannot read {}: {}", path.display(), e))
            }
        };

        let start = params.offset.unwrap_or(1).max(1);
        let limit = params.limit.unwrap_or(DEFAULT_LINE_LIMIT);
        let mut out = String::new();
        let mut shown = 0usize;
        let mut total = 0usize;
        for (i, line) in content.lines().enumerate() {
            total = i + 1;
            if total < start || shown >= limit {
                continue;
            }
            out.push_str(&format!("{:>6}\t{}\n", total, line));
            shown += 1;
        }

        if shown == 0 && total > 0 {
            return ToolResult::error(format!(
                "offset {} is past the end of the file ({} lines)",
                start, total
            ));
        }
        if total > start.saturating_sub(1) + shown {
            out.push_str(&format!(
                "... ({} more lines, continue with offset {})\n",
                total - (start - 1) - shown,
                start + shown
            ));
        }
        ToolResult::success(out)
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
    async fn test_read_numbers_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "alpha\nbeta\n").unwrap();

        let result = ReadTool
            .execute(json!({"file_path": "f.txt"}), &ctx(dir.path()))
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("1\talpha"));
        assert!(result.output.contains("2\tbeta"));
    }

    #[tokio::test]
    async fn test_read_window() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=10).map(|i| format!("line{}\n", i)).collect();
        std::fs::write(dir.path().join("f.txt"), body).unwrap();

        let result = ReadTool
            .execute(
                json!({"file_path": "f.txt", "offset": 3, "limit": 2}),
                &ctx(dir.path()),
            )
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("line3"));
        assert!(result.output.contains("line4"));
        assert!(!result.output.contains("line5\n"));
        assert!(result.output.contains("continue with offset 5"));
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReadTool
            .execute(json!({"file_path": "nope.txt"}), &ctx(dir.path()))
            .await;
        assert!(result.is_error);
    }
}
