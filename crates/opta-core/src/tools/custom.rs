//! Project-defined custom tools.
//!
//! A custom tool is a JSON file describing a shell command. Definitions in
//! `<workdir>/.opta/tools/` shadow same-named ones in `~/.opta/tools/`, and
//! at most [`MAX_CUSTOM_TOOLS`] definitions are kept per session. Registered
//! names are prefixed `custom__` so they can never shadow a built-in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::MAX_CUSTOM_TOOLS;
use crate::tools::registry::{ToolContext, ToolResult, ToolSchema};

/// Search locations, project first.
#[derive(Debug, Clone)]
pub struct CustomToolDirs {
    pub project: PathBuf,
    pub global: Option<PathBuf>,
}

impl CustomToolDirs {
    /// `<workdir>/.opta/tools` plus `~/.opta/tools` when a home dir exists.
    pub fn for_workdir(workdir: &Path) -> Self {
        Self {
            project: workdir.join(".opta").join("tools"),
            global: dirs::home_dir().map(|home| home.join(".opta").join("tools")),
        }
    }
}

/// One definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Shell command; receives the call arguments as JSON on stdin and in
    /// `$OPTA_TOOL_ARGS`.
    pub command: String,
    #[serde(default)]
    pub parameters: Option<Value>,
}

impl CustomToolDef {
    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("missing tool name".into());
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(format!(
                "invalid tool name '{}': expected lowercase, digits, underscores",
                self.name
            ));
        }
        if self.command.trim().is_empty() {
            return Err(format!("tool '{}' has an empty command", self.name));
        }
        Ok(())
    }
}

/// Validated, merged, capped set of custom tools keyed by namespaced name.
pub struct CustomToolSet {
    tools: BTreeMap<String, CustomToolDef>,
}

impl CustomToolSet {
    /// Load definitions from both directories.
    ///
    /// Project definitions win name conflicts against global ones. Files that
    /// fail to parse or validate are skipped with a warning, as are names
    /// colliding with a built-in. The merged set is capped at
    /// [`MAX_CUSTOM_TOOLS`] in sorted-name order.
    pub async fn load(dirs: &CustomToolDirs, builtin_names: &[String]) -> Self {
        let mut tools: BTreeMap<String, CustomToolDef> = BTreeMap::new();

        // Global first so project entries overwrite on merge.
        if let Some(global) = &dirs.global {
            for def in read_defs_from(global, builtin_names).await {
                tools.insert(def.name.clone(), def);
            }
        }
        for def in read_defs_from(&dirs.project, builtin_names).await {
            tools.insert(def.name.clone(), def);
        }

        if tools.len() > MAX_CUSTOM_TOOLS {
            let dropped: Vec<String> = tools.keys().skip(MAX_CUSTOM_TOOLS).cloned().collect();
            warn!(
                kept = MAX_CUSTOM_TOOLS,
                dropped = dropped.len(),
                "Too many custom tool definitions, dropping: {}",
                dropped.join(", ")
            );
            for name in dropped {
                tools.remove(&name);
            }
        }

        let tools = tools
            .into_iter()
            .map(|(name, def)| (namespaced(&name), def))
            .collect();
        Self { tools }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|(name, def)| ToolSchema {
                name: name.clone(),
                description: def.description.clone(),
                parameters: def
                    .parameters
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            })
            .collect()
    }

    /// Run the tool's command in the session working directory.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(def) = self.tools.get(name) else {
            return ToolResult::error(format!("unknown custom tool '{}'", name));
        };
        let args_json = args.to_string();

        let mut child = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&def.command)
            .current_dir(&ctx.working_dir)
            .env("OPTA_TOOL_ARGS", &args_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ToolResult::error(format!("failed to start '{}': {}", def.name, e));
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(args_json.as_bytes()).await {
                debug!(tool = %def.name, error = %e, "custom tool ignored stdin");
            }
        }

        match child.wait_with_output().await {
            Ok(output) if output.status.success() => {
                ToolResult::success(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                ToolResult::error(format!(
                    "'{}' exited with {}: {}",
                    def.name,
                    output.status,
                    stderr.trim()
                ))
            }
            Err(e) => ToolResult::error(format!("'{}' failed: {}", def.name, e)),
        }
    }
}

fn namespaced(name: &str) -> String {
    format!("custom__{}", name)
}

async fn read_defs_from(dir: &Path, builtin_names: &[String]) -> Vec<CustomToolDef> {
    let mut defs = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        // Missing directory just means no custom tools configured there.
        Err(_) => return defs,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable custom tool file");
                continue;
            }
        };
        let def: CustomToolDef = match serde_json::from_str(&content) {
            Ok(def) => def,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid custom tool definition");
                continue;
            }
        };
        if let Err(reason) = def.validate() {
            warn!(path = %path.display(), %reason, "Rejected custom tool definition");
            continue;
        }
        if builtin_names.iter().any(|b| b == &def.name) {
            warn!(
                tool = %def.name,
                "Custom tool name collides with a built-in, skipping"
            );
            continue;
        }
        defs.push(def);
    }
    defs
}
