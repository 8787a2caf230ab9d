use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

const MAX_MATCHES: usize = 500;

#[derive(Deserialize)]
struct GlobParams {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

/// Match file paths against a glob pattern under the working directory.
pub struct GlobTool;

#[async_trait::async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern like src/**/*.rs. Returns paths relative to the search root."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Glob pattern"},
                "path": {"type": "string", "description": "Directory to search from, defaults to the working directory"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: GlobParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let root = params
            .path
            .as_deref()
            .map(|p| ctx.resolve_path(p))
            .unwrap_or_else(|| ctx.working_dir.clone());
        let full_pattern = root.join(&params.pattern).to_string_lossy().into_owned();

        // glob walks the filesystem; run it off the async executor.
        let result = tokio::task::spawn_blocking(move || -> Result<Vec<String>, String> {
            let paths = glob::glob(&full_pattern).map_err(|e| e.to_string())?;
            let mut matches = Vec::new();
            for entry in paths {
                let path = entry.map_err(|e| e.to_string())?;
                let shown = path
                    .strip_prefix(&root)
                    .map(|p| p.to_path_buf())
                    .unwrap_or(path);
                matches.push(shown.to_string_lossy().into_owned());
                if matches.len() >= MAX_MATCHES {
                    break;
                }
            }
            matches.sort();
            Ok(matches)
        })
        .await;

        match result {
            Ok(Ok(matches)) if matches.is_empty() => {
                ToolResult::success(format!("no files match '{}'", params.pattern))
            }
            Ok(Ok(matches)) => ToolResult::success(matches.join("\n")),
            Ok(Err(e)) => ToolResult::error(format!("glob '{}' failed: {}", params.pattern, e)),
            Err(e) => ToolResult::error(format!("glob task failed: {}", e)),
        }
    }
}
