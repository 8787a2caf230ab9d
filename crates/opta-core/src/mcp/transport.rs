//! Transport seam for tool-discovery servers.
//!
//! Implementations speak whatever RPC protocol the server requires (stdio
//! JSON-RPC, HTTP, ...); the registry only needs `list_tools` and `call`.

use async_trait::async_trait;
use serde_json::Value;

/// Tool definition advertised by a server, before namespacing.
#[derive(Debug, Clone)]
pub struct ToolServerToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait ToolServerTransport: Send + Sync {
    /// Advertised tools. Called once at connection time.
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolServerToolDef>>;

    /// Execute one tool call and return its textual result.
    async fn call(&self, tool: &str, arguments: Value) -> anyhow::Result<String>;

    /// Release the underlying connection. Default: nothing to release.
    async fn close(&self) {}
}
