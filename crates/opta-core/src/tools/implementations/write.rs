use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

#[derive(Deserialize)]
struct WriteParams {
    file_path: String,
    content: String,
}

/// Create or overwrite a file, creating parent directories as needed.
pub struct WriteTool;

#[async_trait::async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, replacing it if it exists. Parent directories are created."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path to the file"},
                "content": {"type": "string", "description": "Full new file content"}
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: WriteParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let path = ctx.resolve_path(&params.file_path);

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!(
                    "cannot create {}: {}",
                    parent.display(),
                    e
                ));
            }
        }
        match tokio::fs::write(&path, &params.content).await {
            Ok(()) => ToolResult::success(format!(
                "Wrote {} bytes to {}",
                params.content.len(),
                params.file_path
            )),
            Err(e) => ToolResult::error(format!("cannot write {}: {}", path.display(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new("s", dir.path().to_path_buf(), CancellationToken::new());

        let result = WriteTool
            .execute(
                json!({"file_path": "a/b/c.txt", "content": "hi\n"}),
                &ctx,
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a/b/c.txt")).unwrap(),
            "hi\n"
        );
    }
}
