use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    path: Option<String>,
}

/// List directory entries, directories suffixed with `/`.
pub struct ListTool;

#[async_trait::async_trait]
impl Tool for ListTool {
    fn name(&self) -> &str {
        "list"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Defaults to the working directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list, relative or absolute"}
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: ListParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let dir = params
            .path
            .as_deref()
            .map(|p| ctx.resolve_path(p))
            .unwrap_or_else(|| ctx.working_dir.clone());

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                return ToolResult::error(format!("cannot list {}: {}", dir.display(), e))
            }
        };

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        if names.is_empty() {
            return ToolResult::success(format!("{} is empty", dir.display()));
        }
        ToolResult::success(names.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_list_marks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let ctx = ToolContext::new("s", dir.path().to_path_buf(), CancellationToken::new());
        let result = ListTool.execute(json!({}), &ctx).await;
        assert!(!result.is_error);
        assert_eq!(result.output, "a.txt\nsub/");
    }
}
