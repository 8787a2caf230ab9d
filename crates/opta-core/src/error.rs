//! Error taxonomy for the orchestration core.
//!
//! Validation and execution failures that happen *inside* tool dispatch are
//! converted into descriptive result strings for the model (see
//! [`crate::tools::ToolResult`]); the variants here are reserved for failures
//! the model cannot fix by retrying.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No reachable inference backend and no fallback credential.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed arguments, invalid custom-tool definition, or a forbidden
    /// tool name.
    #[error("validation error: {0}")]
    Validation(String),

    /// Sub-agent recursion depth or call-count budget exceeded.
    #[error("budget exceeded: {0}")]
    Budget(String),

    /// Underlying tool process or transport failure.
    #[error("execution failed: {0}")]
    Execution(String),

    /// A diff failed to apply (or reverse-apply) during undo.
    #[error("patch error: {0}")]
    Patch(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn budget(msg: impl Into<String>) -> Self {
        Self::Budget(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn patch(msg: impl Into<String>) -> Self {
        Self::Patch(msg.into())
    }
}
