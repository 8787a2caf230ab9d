//! Language-server bridge seam.
//!
//! The LSP wire protocol is managed elsewhere; the registry consumes only
//! the capability surface: advertised tools, execution, and best-effort
//! file-change notification after writes.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::ToolSchema;

#[async_trait]
pub trait LspBridge: Send + Sync {
    /// Tools the bridge contributes to the registry (already namespaced by
    /// the bridge, e.g. `lsp_goto_definition`).
    fn tool_defs(&self) -> Vec<ToolSchema>;

    async fn execute(&self, name: &str, arguments: Value) -> anyhow::Result<String>;

    /// Tell the language servers a file changed on disk. Best-effort: the
    /// registry logs failures and never fails the originating tool call.
    async fn notify_file_changed(&self, path: &Path) -> anyhow::Result<()>;

    /// Shut down managed servers.
    async fn close(&self) {}
}
