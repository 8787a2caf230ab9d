//! Sub-agent orchestration: bounded recursive spawning and DAG delegation.

pub mod orchestrator;
pub mod subagent;
pub mod tools;

pub use orchestrator::{ClientResolver, ProviderClientResolver, SubAgentOrchestrator, SubTaskSpec};
pub use subagent::{run_subagent, AgentNotification, SubAgentContext};
pub use tools::SubAgentBackend;
