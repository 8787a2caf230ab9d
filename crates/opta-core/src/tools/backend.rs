//! Backend polymorphism for tool dispatch.
//!
//! Each backend answers `owns(name)` and executes the calls it owns. The
//! registry walks them in a fixed order, so adding a backend kind means
//! adding a struct here, not editing the dispatch function.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::lsp::LspBridge;
use crate::mcp::{namespaced_tool_name, McpManager};
use crate::tools::custom::{CustomToolDirs, CustomToolSet};
use crate::tools::registry::{Tool, ToolContext, ToolResult, ToolSchema};

pub use crate::agent::tools::SubAgentBackend;

#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Backend kind for logs.
    fn kind(&self) -> &'static str;

    /// Does this backend own the (namespaced) tool name?
    fn owns(&self, name: &str) -> bool;

    /// Schemas this backend contributes.
    async fn schemas(&self) -> Vec<ToolSchema>;

    async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult;
}

// ---------------------------------------------------------------------------
// Built-in tools
// ---------------------------------------------------------------------------

/// Local built-in filesystem/shell tools, keyed by bare name.
pub struct BuiltinBackend {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl Default for BuiltinBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinBackend {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// All standard built-ins.
    pub fn with_default_tools() -> Self {
        use crate::tools::implementations::{
            BashTool, EditTool, GlobTool, ListTool, ReadTool, WriteTool,
        };
        let backend = Self::new();
        backend.register(Arc::new(ReadTool));
        backend.register(Arc::new(WriteTool));
        backend.register(Arc::new(EditTool));
        backend.register(Arc::new(ListTool));
        backend.register(Arc::new(GlobTool));
        backend.register(Arc::new(BashTool));
        backend
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().insert(tool.name().to_string(), tool);
    }

    /// Bare names, used to reject custom-tool collisions.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }
}

#[async_trait]
impl ToolBackend for BuiltinBackend {
    fn kind(&self) -> &'static str {
        "builtin"
    }

    fn owns(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    async fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .read()
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let tool = { self.tools.read().get(name).cloned() };
        match tool {
            Some(tool) => tool.execute(args, ctx).await,
            None => ToolResult::error(format!("unknown built-in tool '{}'", name)),
        }
    }
}

// ---------------------------------------------------------------------------
// MCP servers
// ---------------------------------------------------------------------------

/// Externally-discovered tool-server tools, owned under `mcp__<server>__<tool>`.
pub struct McpBackend {
    manager: Arc<McpManager>,
    /// Namespaced name -> (server, bare tool name), snapshotted at build.
    routes: HashMap<String, (String, String)>,
    schemas: Vec<ToolSchema>,
}

impl McpBackend {
    pub async fn new(manager: Arc<McpManager>) -> Self {
        let mut routes = HashMap::new();
        let mut schemas = Vec::new();
        for (server, def) in manager.all_tools().await {
            let full = namespaced_tool_name(&server, &def.name);
            schemas.push(ToolSchema {
                name: full.clone(),
                description: def.description.clone(),
                parameters: def.input_schema.clone(),
            });
            routes.insert(full, (server, def.name));
        }
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            manager,
            routes,
            schemas,
        }
    }
}

#[async_trait]
impl ToolBackend for McpBackend {
    fn kind(&self) -> &'static str {
        "mcp"
    }

    fn owns(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    async fn schemas(&self) -> Vec<ToolSchema> {
        self.schemas.clone()
    }

    async fn execute(&self, name: &str, args: Value, _ctx: &ToolContext) -> ToolResult {
        let Some((server, tool)) = self.routes.get(name) else {
            return ToolResult::error(format!("unknown MCP tool '{}'", name));
        };
        match self.manager.call_tool(server, tool, args).await {
            Ok(output) => ToolResult::success(output),
            Err(e) => ToolResult::error(format!("MCP call '{}' failed: {}", name, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Language-server bridge
// ---------------------------------------------------------------------------

pub struct LspBackend {
    bridge: Arc<dyn LspBridge>,
    names: HashSet<String>,
    schemas: Vec<ToolSchema>,
}

impl LspBackend {
    pub fn new(bridge: Arc<dyn LspBridge>) -> Self {
        let schemas = bridge.tool_defs();
        let names = schemas.iter().map(|s| s.name.clone()).collect();
        Self {
            bridge,
            names,
            schemas,
        }
    }
}

#[async_trait]
impl ToolBackend for LspBackend {
    fn kind(&self) -> &'static str {
        "lsp"
    }

    fn owns(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    async fn schemas(&self) -> Vec<ToolSchema> {
        self.schemas.clone()
    }

    async fn execute(&self, name: &str, args: Value, _ctx: &ToolContext) -> ToolResult {
        match self.bridge.execute(name, args).await {
            Ok(output) => ToolResult::success(output),
            Err(e) => ToolResult::error(format!("LSP tool '{}' failed: {}", name, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Custom tools
// ---------------------------------------------------------------------------

/// Project-defined tools, owned under `custom__<name>`.
pub struct CustomBackend {
    tools: CustomToolSet,
}

impl CustomBackend {
    /// Load and validate definitions from the project and global directories.
    pub async fn load(dirs: &CustomToolDirs, builtin_names: &[String]) -> Self {
        Self {
            tools: CustomToolSet::load(dirs, builtin_names).await,
        }
    }
}

#[async_trait]
impl ToolBackend for CustomBackend {
    fn kind(&self) -> &'static str {
        "custom"
    }

    fn owns(&self, name: &str) -> bool {
        self.tools.contains(name)
    }

    async fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.schemas()
    }

    async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        self.tools.execute(name, args, ctx).await
    }
}
