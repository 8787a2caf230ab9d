//! Tool dispatch: one registry over built-in, sub-agent, MCP, LSP, and
//! custom tool backends.

pub mod backend;
pub mod custom;
pub mod implementations;
pub mod registry;

pub use backend::ToolBackend;
pub use registry::{
    parse_params, tool_category, RegistryDeps, Tool, ToolCategory, ToolContext, ToolRegistry,
    ToolResult, ToolSchema,
};
