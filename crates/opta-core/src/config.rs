//! Session-level configuration for the orchestration core.

use std::path::PathBuf;
use std::time::Duration;

/// Maximum number of custom tool definitions loaded per session.
pub const MAX_CUSTOM_TOOLS: usize = 10;

/// Fraction of the model context window the combined tool schemas may
/// consume before a warning is logged. Schemas still load past the budget.
pub const SCHEMA_TOKEN_BUDGET_FRACTION: f64 = 0.10;

/// Default per-tool execution timeout (2 minutes).
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Default recursion depth limit for sub-agents.
pub const DEFAULT_MAX_AGENT_DEPTH: usize = 3;

/// Default tool-call budget per sub-agent.
pub const DEFAULT_MAX_AGENT_CALLS: usize = 25;

/// Configuration for one agent session. Constructed by the session/daemon
/// layer and handed to [`crate::tools::ToolRegistry::build`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session id; keys the checkpoint directory and result cache.
    pub session_id: String,
    /// Working directory all relative tool paths resolve against.
    pub working_dir: PathBuf,
    /// The session's configured (display) model id.
    pub model: String,
    /// Context window of the configured model, in tokens.
    pub context_window: usize,
    /// Whether the sub-agent tools (`spawn_agent`, `delegate_task`) register.
    pub delegation_enabled: bool,
    /// Whether the language-server bridge tools register.
    pub lsp_enabled: bool,
    /// Maximum sub-agent recursion depth.
    pub max_agent_depth: usize,
    /// Maximum tool calls per sub-agent.
    pub max_agent_calls: usize,
    /// Per-tool execution timeout.
    pub tool_timeout: Duration,
}

impl SessionConfig {
    pub fn new(session_id: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            session_id: session_id.into(),
            working_dir,
            model: String::new(),
            context_window: 128_000,
            delegation_enabled: true,
            lsp_enabled: false,
            max_agent_depth: DEFAULT_MAX_AGENT_DEPTH,
            max_agent_calls: DEFAULT_MAX_AGENT_CALLS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, context_window: usize) -> Self {
        self.model = model.into();
        self.context_window = context_window;
        self
    }

    pub fn with_delegation(mut self, enabled: bool) -> Self {
        self.delegation_enabled = enabled;
        self
    }

    pub fn with_max_agent_depth(mut self, depth: usize) -> Self {
        self.max_agent_depth = depth;
        self
    }
}
