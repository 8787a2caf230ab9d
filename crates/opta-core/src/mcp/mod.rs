//! Externally-discovered tool servers (MCP).
//!
//! The wire protocol lives behind [`transport::ToolServerTransport`]; this
//! core only consumes the capability surface: list tools, call a tool.

pub mod manager;
pub mod transport;

pub use manager::{McpManager, McpServerInfo, McpServerStatus};
pub use transport::{ToolServerToolDef, ToolServerTransport};

/// Namespace an MCP tool: `mcp__<server>__<tool>`.
pub fn namespaced_tool_name(server: &str, tool: &str) -> String {
    format!("mcp__{}__{}", server, tool)
}
