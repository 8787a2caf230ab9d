//! Opta Code orchestration core.
//!
//! One dispatch surface ([`tools::ToolRegistry`]) over built-in, MCP, LSP,
//! custom, and sub-agent tool backends, with a per-session result cache,
//! a unified-diff undo log, bounded sub-agent orchestration, and local-first
//! provider routing.

pub mod agent;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod lsp;
pub mod mcp;
pub mod provider;
pub mod tools;

pub use agent::{AgentNotification, SubAgentContext, SubAgentOrchestrator};
pub use checkpoint::CheckpointStore;
pub use config::SessionConfig;
pub use error::{OrchestratorError, Result};
pub use provider::{probe_provider, ProviderSettings};
pub use tools::{RegistryDeps, ToolRegistry};
