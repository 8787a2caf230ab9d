use serde::Deserialize;
use serde_json::{json, Value};

use crate::checkpoint::patch::{patch_stat, unified_diff};
use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

#[derive(Deserialize)]
struct EditParams {
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

/// Exact string replacement within an existing file.
pub struct EditTool;

#[async_trait::async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file. old_string must match uniquely unless replace_all is set."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path to the file"},
                "old_string": {"type": "string", "description": "Exact text to replace"},
                "new_string": {"type": "string", "description": "Replacement text"},
                "replace_all": {"type": "boolean", "description": "Replace every occurrence instead of requiring uniqueness"}
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: EditParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if params.old_string == params.new_string {
            return ToolResult::error("old_string and new_string are identical");
        }
        let path = ctx.resolve_path(&params.file_path);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                return ToolResult::error(format!("cannot read {}: {}", path.display(), e))
            }
        };

        let occurrences = content.matches(&params.old_string).count();
        if occurrences == 0 {
            return ToolResult::error(format!(
                "old_string not found in {}",
                params.file_path
            ));
        }
        if occurrences > 1 && !params.replace_all {
            return ToolResult::error(format!(
                "old_string matches {} times in {}; provide more context or set replace_all",
                occurrences, params.file_path
            ));
        }

        let updated = if params.replace_all {
            content.replace(&params.old_string, &params.new_string)
        } else {
            content.replacen(&params.old_string, &params.new_string, 1)
        };

        if let Err(e) = tokio::fs::write(&path, &updated).await {
            return ToolResult::error(format!("cannot write {}: {}", path.display(), e));
        }

        let stat = unified_diff(&content, &updated, &params.file_path)
            .map(|d| patch_stat(&d))
            .unwrap_or_default();
        ToolResult::success(format!(
            "Edited {} ({} replaced, +{} -{})",
            params.file_path, occurrences, stat.additions, stat.deletions
        ))
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
    async fn test_edit_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "fn main() {}\n").unwrap();

        let result = EditTool
            .execute(
                json!({"file_path": "f.txt", "old_string": "main", "new_string": "start"}),
                &ctx(dir.path()),
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "fn start() {}\n"
        );
    }

    #[tokio::test]
    async fn test_edit_ambiguous_match_requires_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x = 1\nx = 2\n").unwrap();

        let ambiguous = EditTool
            .execute(
                json!({"file_path": "f.txt", "old_string": "x =", "new_string": "y ="}),
                &ctx(dir.path()),
            )
            .await;
        assert!(ambiguous.is_error);
        assert!(ambiguous.output.contains("2 times"));

        let all = EditTool
            .execute(
                json!({
                    "file_path": "f.txt",
                    "old_string": "x =",
                    "new_string": "y =",
                    "replace_all": true
                }),
                &ctx(dir.path()),
            )
            .await;
        assert!(!all.is_error);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "y = 1\ny = 2\n"
        );
    }

    #[tokio::test]
    async fn test_edit_missing_string() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "abc\n").unwrap();

        let result = EditTool
            .execute(
                json!({"file_path": "f.txt", "old_string": "zzz", "new_string": "q"}),
                &ctx(dir.path()),
            )
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("not found"));
    }
}
