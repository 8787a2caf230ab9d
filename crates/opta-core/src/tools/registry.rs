//! Tool registry: schema aggregation and the single execute entry point.
//!
//! The registry is an explicit per-session instance owned by the session or
//! daemon context and passed by reference; nothing here is a module-level
//! singleton. Dispatch walks an ordered list of backends, each answering
//! "do you own this name?", so new backend kinds never touch this function.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{SubAgentContext, SubAgentOrchestrator};
use crate::cache::ResultCache;
use crate::checkpoint::CheckpointStore;
use crate::config::{SessionConfig, SCHEMA_TOKEN_BUDGET_FRACTION};
use crate::error::Result;
use crate::lsp::LspBridge;
use crate::mcp::{McpManager, ToolServerTransport};
use crate::tools::backend::{
    BuiltinBackend, CustomBackend, LspBackend, McpBackend, SubAgentBackend, ToolBackend,
};
use crate::tools::custom::CustomToolDirs;

/// Tool category for cache classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    /// Read-only: results are cacheable.
    Read,
    /// Mutating: flushes the whole result cache before running.
    Write,
    /// Neither checked against nor invalidating the cache.
    Transparent,
}

/// Classify a tool by name. Namespaced tools (MCP, custom, LSP) are
/// cache-transparent: their effects are unknown to this core.
pub fn tool_category(name: &str) -> ToolCategory {
    match name {
        "read" | "list" | "glob" => ToolCategory::Read,
        "write" | "edit" | "bash" => ToolCategory::Write,
        _ => ToolCategory::Transparent,
    }
}

/// Function-calling schema advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    /// Serialize to the `{type:"function", function:{...}}` convention so the
    /// list can be sent directly to any compatible inference backend.
    pub fn to_function_value(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Tool execution result. Errors are descriptive strings the model can see
/// and self-correct from; they are conversational events, not host failures.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(msg: impl std::fmt::Display) -> Self {
        Self {
            output: format!("Error: {}", msg),
            is_error: true,
        }
    }
}

/// Parse tool parameters, returning a ToolResult error on failure.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> std::result::Result<T, ToolResult> {
    serde_json::from_value(params).map_err(|e| ToolResult::error(format!("invalid parameters: {}", e)))
}

/// Context threaded through every tool execution.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub working_dir: PathBuf,
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
    /// Present when the call originates from a sub-agent; carries depth and
    /// budget so nested spawns are bounded.
    pub agent_ctx: Option<SubAgentContext>,
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        working_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            working_dir,
            timeout: None,
            cancel,
            agent_ctx: None,
        }
    }

    /// Resolve a path against the working directory (absolute paths pass
    /// through).
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }
}

/// Trait for built-in tool implementations.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

/// Collaborators injected at build time. The wire protocols behind the MCP
/// transports and the LSP bridge are external; only their capability surface
/// enters the registry.
#[derive(Default)]
pub struct RegistryDeps {
    pub mcp_servers: Vec<(String, Arc<dyn ToolServerTransport>)>,
    pub lsp: Option<Arc<dyn LspBridge>>,
    pub orchestrator: Option<Arc<SubAgentOrchestrator>>,
    /// Custom tool directories; defaults to `<workdir>/.opta/tools` and
    /// `~/.opta/tools` when `None`.
    pub custom_tool_dirs: Option<CustomToolDirs>,
}

/// One dispatch surface over heterogeneous tool backends.
pub struct ToolRegistry {
    session: SessionConfig,
    /// Route resolution order: MCP, sub-agent, LSP, custom, built-in.
    backends: Vec<Arc<dyn ToolBackend>>,
    /// Aggregated schemas in registration precedence order.
    schemas: Vec<ToolSchema>,
    cache: ResultCache,
    checkpoints: Arc<CheckpointStore>,
    lsp: Option<Arc<dyn LspBridge>>,
    mcp: Arc<McpManager>,
}

impl ToolRegistry {
    /// Aggregate all backends and their schemas for one session.
    ///
    /// Only construction/connection problems return `Err`; a single MCP
    /// server failing to connect is logged inside the manager and its tools
    /// are absent.
    pub async fn build(session: SessionConfig, deps: RegistryDeps) -> Result<Arc<Self>> {
        let builtin = Arc::new(BuiltinBackend::with_default_tools());

        let subagent = deps
            .orchestrator
            .as_ref()
            .filter(|_| session.delegation_enabled)
            .map(|orchestrator| Arc::new(SubAgentBackend::new(orchestrator.clone())));

        let mcp = Arc::new(McpManager::new());
        mcp.connect_all(deps.mcp_servers).await;
        let mcp_backend = Arc::new(McpBackend::new(mcp.clone()).await);

        let lsp_backend = deps
            .lsp
            .clone()
            .filter(|_| session.lsp_enabled)
            .map(LspBackend::new)
            .map(Arc::new);

        let dirs = deps
            .custom_tool_dirs
            .unwrap_or_else(|| CustomToolDirs::for_workdir(&session.working_dir));
        let custom = Arc::new(CustomBackend::load(&dirs, &builtin.tool_names()).await);

        // Schema precedence: built-ins, sub-agent tools, MCP, LSP, custom.
        let mut schemas = Vec::new();
        schemas.extend(builtin.schemas().await);
        if let Some(backend) = &subagent {
            schemas.extend(backend.schemas().await);
        }
        schemas.extend(mcp_backend.schemas().await);
        if let Some(backend) = &lsp_backend {
            schemas.extend(backend.schemas().await);
        }
        schemas.extend(custom.schemas().await);

        warn_on_schema_budget(&schemas, session.context_window);

        // Resolution order differs from the schema precedence order above.
        let mut backends: Vec<Arc<dyn ToolBackend>> = Vec::new();
        backends.push(mcp_backend);
        if let Some(backend) = subagent {
            backends.push(backend);
        }
        if let Some(backend) = lsp_backend {
            backends.push(backend);
        }
        backends.push(custom);
        backends.push(builtin);

        let registry = Arc::new(Self {
            checkpoints: Arc::new(CheckpointStore::new(session.working_dir.clone())),
            session,
            backends,
            schemas,
            cache: ResultCache::new(),
            lsp: deps.lsp,
            mcp,
        });

        if let Some(orchestrator) = deps.orchestrator {
            orchestrator.attach_registry(&registry);
        }

        info!(
            session = %registry.session.session_id,
            tools = registry.schemas.len(),
            "Tool registry built"
        );
        Ok(registry)
    }

    /// Aggregated schemas, in precedence order.
    pub fn schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    /// Schemas serialized for a chat-completions request.
    pub fn function_schemas(&self) -> Vec<Value> {
        self.schemas.iter().map(ToolSchema::to_function_value).collect()
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    /// Execute one tool call and return its result string.
    ///
    /// Never panics and never returns `Err`: malformed arguments, unknown
    /// tools, timeouts, and backend failures all come back as descriptive
    /// strings the model can read.
    pub async fn execute(
        &self,
        name: &str,
        args_json: &str,
        parent: Option<SubAgentContext>,
        cancel: CancellationToken,
    ) -> String {
        let raw = if args_json.trim().is_empty() {
            "{}"
        } else {
            args_json
        };
        let args: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                return format!("Error: malformed arguments for tool '{}': {}", name, e);
            }
        };

        let category = tool_category(name);

        if category == ToolCategory::Read {
            if let Some(hit) = self.cache.get(name, args_json).await {
                debug!(tool = name, "Result cache hit");
                return hit;
            }
        }
        if category == ToolCategory::Write {
            self.cache.clear().await;
        }

        let Some(backend) = self.backends.iter().find(|b| b.owns(name)) else {
            return format!("Error: unknown tool '{}'", name);
        };

        // A `timeout_ms` argument bounds this one call tighter (or looser)
        // than the session default.
        let timeout_override = args
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis);

        let ctx = ToolContext {
            session_id: self.session.session_id.clone(),
            working_dir: self.session.working_dir.clone(),
            timeout: timeout_override,
            cancel: cancel.clone(),
            agent_ctx: parent,
        };

        // Pre-capture the target file so the checkpoint diff covers exactly
        // this call's effect.
        let target = if category == ToolCategory::Write {
            extract_target_path(&args).map(|p| ctx.resolve_path(&p))
        } else {
            None
        };
        let before = match &target {
            Some(path) => read_file_or_empty(path).await,
            None => String::new(),
        };

        let timeout = ctx.timeout.unwrap_or(self.session.tool_timeout);
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                info!(tool = name, "Tool call cancelled");
                ToolResult::error(format!("tool '{}' was cancelled", name))
            }
            outcome = tokio::time::timeout(timeout, backend.execute(name, args, &ctx)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(tool = name, timeout_ms = timeout.as_millis() as u64, "Tool timed out");
                        ToolResult::error(format!(
                            "tool '{}' timed out after {} ms",
                            name,
                            timeout.as_millis()
                        ))
                    }
                }
            }
        };

        if !result.is_error {
            match category {
                ToolCategory::Read => {
                    self.cache.insert(name, args_json, result.output.clone()).await;
                }
                ToolCategory::Write => {
                    if let Some(path) = &target {
                        self.record_mutation(name, path, &before).await;
                    }
                }
                ToolCategory::Transparent => {}
            }
        }

        result.output
    }

    /// Checkpoint the mutation and notify the LSP bridge. Both are
    /// best-effort with respect to the tool call that already succeeded.
    async fn record_mutation(&self, tool: &str, path: &Path, before: &str) {
        let after = read_file_or_empty(path).await;
        match self
            .checkpoints
            .create_checkpoint(&self.session.session_id, tool, path, before, &after)
            .await
        {
            Ok(Some(checkpoint)) => {
                debug!(tool, n = checkpoint.n, "Mutation checkpointed");
            }
            Ok(None) => {}
            Err(e) => warn!(tool, error = %e, "Checkpoint creation failed"),
        }

        if let Some(lsp) = &self.lsp {
            if let Err(e) = lsp.notify_file_changed(path).await {
                warn!(path = %path.display(), error = %e, "LSP change notification failed");
            }
        }
    }

    /// MCP connection status for UI surfaces.
    pub async fn list_mcp_servers(&self) -> Vec<crate::mcp::McpServerInfo> {
        self.mcp.list_servers().await
    }

    /// Release backend connections. Call when the session ends.
    pub async fn close(&self) {
        self.mcp.close().await;
        if let Some(lsp) = &self.lsp {
            lsp.close().await;
        }
        info!(session = %self.session.session_id, "Tool registry closed");
    }
}

fn extract_target_path(args: &Value) -> Option<String> {
    args.get("file_path")
        .or_else(|| args.get("path"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

async fn read_file_or_empty(path: &Path) -> String {
    tokio::fs::read_to_string(path).await.unwrap_or_default()
}

/// Warn (non-fatally) when the combined schemas eat too much of the model's
/// context window. Rough 4-chars-per-token estimate.
fn warn_on_schema_budget(schemas: &[ToolSchema], context_window: usize) {
    let chars: usize = schemas
        .iter()
        .map(|s| s.to_function_value().to_string().len())
        .sum();
    let estimated_tokens = chars / 4;
    let budget = (context_window as f64 * SCHEMA_TOKEN_BUDGET_FRACTION) as usize;
    if estimated_tokens > budget {
        warn!(
            estimated_tokens,
            budget,
            context_window,
            "Tool schemas exceed the context-window budget; loading anyway"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Spy tool counting backend invocations.
    struct CountingTool {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "counting spy"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            ToolResult::success(format!("call {}", n))
        }
    }

    async fn registry_with_spies(
        dir: &Path,
    ) -> (Arc<ToolRegistry>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let read_calls = Arc::new(AtomicUsize::new(0));
        let write_calls = Arc::new(AtomicUsize::new(0));

        // Spies registered under classified builtin names so the cache and
        // flush paths engage.
        let builtin = BuiltinBackend::new();
        builtin.register(Arc::new(CountingTool {
            name: "list",
            calls: read_calls.clone(),
        }));
        builtin.register(Arc::new(CountingTool {
            name: "write",
            calls: write_calls.clone(),
        }));

        let session = SessionConfig::new("test-session", dir.to_path_buf())
            .with_delegation(false);
        let registry = Arc::new(ToolRegistry {
            checkpoints: Arc::new(CheckpointStore::new(dir.to_path_buf())),
            session,
            backends: vec![Arc::new(builtin)],
            schemas: Vec::new(),
            cache: ResultCache::new(),
            lsp: None,
            mcp: Arc::new(McpManager::new()),
        });
        (registry, read_calls, write_calls)
    }

    #[tokio::test]
    async fn test_repeated_read_hits_cache_not_backend() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, read_calls, _) = registry_with_spies(dir.path()).await;
        let cancel = CancellationToken::new();

        let first = registry
            .execute("list", r#"{"path":"."}"#, None, cancel.clone())
            .await;
        let second = registry
            .execute("list", r#"{"path":"."}"#, None, cancel)
            .await;

        assert_eq!(first, "call 1");
        assert_eq!(second, "call 1");
        assert_eq!(read_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_flushes_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, read_calls, _) = registry_with_spies(dir.path()).await;
        let cancel = CancellationToken::new();

        registry
            .execute("list", r#"{"path":"."}"#, None, cancel.clone())
            .await;
        registry
            .execute("write", r#"{"content":"x"}"#, None, cancel.clone())
            .await;
        assert!(registry.cache.is_empty().await);

        // Read re-invokes the backend after the flush.
        registry
            .execute("list", r#"{"path":"."}"#, None, cancel)
            .await;
        assert_eq!(read_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_arguments_return_error_string() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionConfig::new("s", dir.path().to_path_buf()).with_delegation(false);
        let registry = ToolRegistry::build(session, RegistryDeps::default())
            .await
            .unwrap();

        let output = registry
            .execute("read", "{not json", None, CancellationToken::new())
            .await;
        assert!(output.starts_with("Error: malformed arguments"));
    }

    #[tokio::test]
    async fn test_unknown_tool_returns_error_string() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionConfig::new("s", dir.path().to_path_buf()).with_delegation(false);
        let registry = ToolRegistry::build(session, RegistryDeps::default())
            .await
            .unwrap();

        let output = registry
            .execute("no_such_tool", "{}", None, CancellationToken::new())
            .await;
        assert_eq!(output, "Error: unknown tool 'no_such_tool'");
    }

    #[tokio::test]
    async fn test_write_through_registry_creates_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionConfig::new("ckpt", dir.path().to_path_buf()).with_delegation(false);
        let registry = ToolRegistry::build(session, RegistryDeps::default())
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let args = json!({"file_path": "demo.txt", "content": "hello\n"}).to_string();
        let output = registry.execute("write", &args, None, cancel.clone()).await;
        assert!(!output.starts_with("Error:"), "unexpected: {}", output);

        let args = json!({"file_path": "demo.txt", "content": "hello world\n"}).to_string();
        registry.execute("write", &args, None, cancel).await;

        let checkpoints = registry.checkpoints().list_checkpoints("ckpt").await;
        assert_eq!(checkpoints.len(), 2);
        assert!(checkpoints[0].n < checkpoints[1].n);

        // Undo everything: the file returns to its pre-session (absent -> empty) state.
        let reverted = registry
            .checkpoints()
            .undo_all_checkpoints("ckpt")
            .await
            .unwrap();
        assert_eq!(reverted, 2);
        let content = std::fs::read_to_string(dir.path().join("demo.txt")).unwrap();
        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_call_returns_error_string() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionConfig::new("s", dir.path().to_path_buf()).with_delegation(false);
        let registry = ToolRegistry::build(session, RegistryDeps::default())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let output = registry
            .execute("bash", r#"{"command":"sleep 5"}"#, None, cancel)
            .await;
        assert!(output.contains("cancelled"));
    }

    struct StubTransport;

    #[async_trait::async_trait]
    impl ToolServerTransport for StubTransport {
        async fn list_tools(&self) -> anyhow::Result<Vec<crate::mcp::ToolServerToolDef>> {
            Ok(vec![crate::mcp::ToolServerToolDef {
                name: "stat".into(),
                description: "file stat".into(),
                input_schema: json!({"type": "object"}),
            }])
        }

        async fn call(&self, tool: &str, arguments: Value) -> anyhow::Result<String> {
            Ok(format!("{}:{}", tool, arguments))
        }
    }

    #[tokio::test]
    async fn test_mcp_tool_dispatches_under_namespaced_name() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionConfig::new("s", dir.path().to_path_buf()).with_delegation(false);
        let registry = ToolRegistry::build(
            session,
            RegistryDeps {
                mcp_servers: vec![("files".into(), Arc::new(StubTransport) as _)],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(registry
            .schemas()
            .iter()
            .any(|s| s.name == "mcp__files__stat"));

        let output = registry
            .execute(
                "mcp__files__stat",
                r#"{"path":"x"}"#,
                None,
                CancellationToken::new(),
            )
            .await;
        assert_eq!(output, r#"stat:{"path":"x"}"#);

        let servers = registry.list_mcp_servers().await;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "files");
    }

    #[tokio::test]
    async fn test_timeout_ms_argument_bounds_a_single_call() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionConfig::new("s", dir.path().to_path_buf()).with_delegation(false);
        let registry = ToolRegistry::build(session, RegistryDeps::default())
            .await
            .unwrap();

        let output = registry
            .execute(
                "bash",
                r#"{"command":"sleep 2","timeout_ms":50}"#,
                None,
                CancellationToken::new(),
            )
            .await;
        assert_eq!(output, "Error: tool 'bash' timed out after 50 ms");
    }

    #[test]
    fn test_schema_function_value_shape() {
        let schema = ToolSchema {
            name: "read".into(),
            description: "Read a file".into(),
            parameters: json!({"type": "object"}),
        };
        let value = schema.to_function_value();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "read");
        assert_eq!(value["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_classification() {
        assert_eq!(tool_category("read"), ToolCategory::Read);
        assert_eq!(tool_category("bash"), ToolCategory::Write);
        assert_eq!(tool_category("spawn_agent"), ToolCategory::Transparent);
        assert_eq!(tool_category("mcp__files__stat"), ToolCategory::Transparent);
    }
}
