//! MCP manager: connects configured tool servers and routes calls.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::transport::{ToolServerToolDef, ToolServerTransport};

/// Connection state for UI surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpServerStatus {
    Connected,
    Error(String),
}

impl std::fmt::Display for McpServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpServerStatus::Connected => write!(f, "connected"),
            McpServerStatus::Error(e) => write!(f, "error: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct McpServerInfo {
    pub name: String,
    pub status: McpServerStatus,
    pub tool_count: usize,
}

struct ConnectedServer {
    transport: Arc<dyn ToolServerTransport>,
    tools: Vec<ToolServerToolDef>,
}

/// Holds the connected servers and their advertised tools.
pub struct McpManager {
    servers: RwLock<HashMap<String, ConnectedServer>>,
    failures: RwLock<HashMap<String, String>>,
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl McpManager {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
        }
    }

    /// Connect all configured servers concurrently (fan-out/fan-in).
    ///
    /// Each server's `list_tools` succeeds or fails independently: a failed
    /// server is logged and its tools are simply absent. Startup never aborts
    /// for the others.
    pub async fn connect_all(&self, configured: Vec<(String, Arc<dyn ToolServerTransport>)>) {
        if configured.is_empty() {
            return;
        }
        info!(count = configured.len(), "Connecting to MCP servers");

        let connect_futures: Vec<_> = configured
            .into_iter()
            .map(|(name, transport)| async move {
                let result = transport.list_tools().await;
                (name, transport, result)
            })
            .collect();

        let results = futures::future::join_all(connect_futures).await;

        let mut servers = self.servers.write().await;
        let mut failures = self.failures.write().await;
        for (name, transport, result) in results {
            match result {
                Ok(tools) => {
                    info!(server = %name, tools = tools.len(), "MCP server connected");
                    servers.insert(name, ConnectedServer { transport, tools });
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "MCP server connection failed");
                    failures.insert(name, e.to_string());
                }
            }
        }
    }

    /// All advertised tools as `(server, def)` pairs.
    pub async fn all_tools(&self) -> Vec<(String, ToolServerToolDef)> {
        let servers = self.servers.read().await;
        let mut tools = Vec::new();
        for (name, server) in servers.iter() {
            for tool in &server.tools {
                tools.push((name.clone(), tool.clone()));
            }
        }
        tools
    }

    /// Call a tool on a connected server.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> anyhow::Result<String> {
        let transport = {
            let servers = self.servers.read().await;
            servers
                .get(server)
                .map(|s| s.transport.clone())
                .ok_or_else(|| anyhow::anyhow!("server not connected: {}", server))?
        };
        transport.call(tool, arguments).await
    }

    /// Connection status for UI display, including failed servers.
    pub async fn list_servers(&self) -> Vec<McpServerInfo> {
        let servers = self.servers.read().await;
        let failures = self.failures.read().await;

        let mut infos: Vec<McpServerInfo> = servers
            .iter()
            .map(|(name, server)| McpServerInfo {
                name: name.clone(),
                status: McpServerStatus::Connected,
                tool_count: server.tools.len(),
            })
            .chain(failures.iter().map(|(name, error)| McpServerInfo {
                name: name.clone(),
                status: McpServerStatus::Error(error.clone()),
                tool_count: 0,
            }))
            .collect();

        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Disconnect everything. Called by `ToolRegistry::close`.
    pub async fn close(&self) {
        let mut servers = self.servers.write().await;
        for (name, server) in servers.drain() {
            server.transport.close().await;
            info!(server = %name, "MCP server disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticTransport {
        tools: Vec<&'static str>,
    }

    #[async_trait]
    impl ToolServerTransport for StaticTransport {
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolServerToolDef>> {
            Ok(self
                .tools
                .iter()
                .map(|name| ToolServerToolDef {
                    name: name.to_string(),
                    description: format!("{} tool", name),
                    input_schema: json!({"type": "object"}),
                })
                .collect())
        }

        async fn call(&self, tool: &str, arguments: Value) -> anyhow::Result<String> {
            Ok(format!("{}({})", tool, arguments))
        }
    }

    struct BrokenTransport;

    #[async_trait]
    impl ToolServerTransport for BrokenTransport {
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolServerToolDef>> {
            anyhow::bail!("spawn failed: no such file")
        }

        async fn call(&self, _tool: &str, _arguments: Value) -> anyhow::Result<String> {
            anyhow::bail!("not connected")
        }
    }

    #[tokio::test]
    async fn test_one_failed_server_does_not_block_others() {
        let manager = McpManager::new();
        manager
            .connect_all(vec![
                ("good".into(), Arc::new(StaticTransport { tools: vec!["search"] }) as _),
                ("broken".into(), Arc::new(BrokenTransport) as _),
            ])
            .await;

        let tools = manager.all_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].0, "good");

        let infos = manager.list_servers().await;
        assert_eq!(infos.len(), 2);
        let broken = infos.iter().find(|i| i.name == "broken").unwrap();
        assert!(matches!(broken.status, McpServerStatus::Error(_)));
    }

    #[tokio::test]
    async fn test_call_routes_to_owning_server() {
        let manager = McpManager::new();
        manager
            .connect_all(vec![(
                "files".into(),
                Arc::new(StaticTransport { tools: vec!["stat"] }) as _,
            )])
            .await;

        let result = manager
            .call_tool("files", "stat", json!({"path": "x"}))
            .await
            .unwrap();
        assert_eq!(result, r#"stat({"path":"x"})"#);

        let err = manager.call_tool("gone", "stat", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn test_namespacing() {
        assert_eq!(
            crate::mcp::namespaced_tool_name("files", "stat"),
            "mcp__files__stat"
        );
    }
}
