//! Registry-facing surface for the orchestrator: the `spawn_agent` and
//! `delegate_task` tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::backend::ToolBackend;
use crate::tools::registry::{parse_params, ToolContext, ToolResult, ToolSchema};

use super::orchestrator::{SubAgentOrchestrator, SubTaskSpec};

#[derive(Deserialize)]
struct SpawnParams {
    task: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    budget: Option<usize>,
}

#[derive(Deserialize)]
struct DelegateParams {
    plan: String,
    subtasks: Vec<SubTaskSpec>,
}

pub struct SubAgentBackend {
    orchestrator: Arc<SubAgentOrchestrator>,
}

impl SubAgentBackend {
    pub fn new(orchestrator: Arc<SubAgentOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl ToolBackend for SubAgentBackend {
    fn kind(&self) -> &'static str {
        "subagent"
    }

    fn owns(&self, name: &str) -> bool {
        matches!(name, "spawn_agent" | "delegate_task")
    }

    async fn schemas(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema {
                name: "spawn_agent".into(),
                description: "Spawn a sub-agent to complete a self-contained task and return its summary.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "task": {"type": "string", "description": "Complete, standalone task description"},
                        "scope": {"type": "string", "description": "Constraint on where the agent may operate, e.g. a directory"},
                        "budget": {"type": "integer", "description": "Maximum tool calls the agent may make (clamped to the session limit)"}
                    },
                    "required": ["task"]
                }),
            },
            ToolSchema {
                name: "delegate_task".into(),
                description: "Run a plan of subtasks as sub-agents. Independent subtasks run concurrently; depends_on entries must reference earlier subtasks and their results are shown to the dependent.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "plan": {"type": "string", "description": "What the plan as a whole accomplishes"},
                        "subtasks": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "id": {"type": "string"},
                                    "task": {"type": "string"},
                                    "scope": {"type": "string"},
                                    "depends_on": {"type": "array", "items": {"type": "string"}}
                                },
                                "required": ["id", "task"]
                            }
                        }
                    },
                    "required": ["plan", "subtasks"]
                }),
            },
        ]
    }

    async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let output = match name {
            "spawn_agent" => {
                let params: SpawnParams = match parse_params(args) {
                    Ok(p) => p,
                    Err(e) => return e,
                };
                self.orchestrator
                    .spawn_agent(
                        &params.task,
                        params.scope.as_deref(),
                        params.budget,
                        ctx.agent_ctx.as_ref(),
                        ctx.cancel.clone(),
                    )
                    .await
            }
            "delegate_task" => {
                let params: DelegateParams = match parse_params(args) {
                    Ok(p) => p,
                    Err(e) => return e,
                };
                self.orchestrator
                    .delegate_task(
                        &params.plan,
                        params.subtasks,
                        ctx.agent_ctx.as_ref(),
                        ctx.cancel.clone(),
                    )
                    .await
            }
            other => return ToolResult::error(format!("unknown sub-agent tool '{}'", other)),
        };

        let is_error = output.starts_with("Error:");
        ToolResult { output, is_error }
    }
}
