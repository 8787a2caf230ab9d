//! The sub-agent execution loop.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{ChatClient, ChatMessage, ChatRequest};
use crate::tools::ToolRegistry;

const SUBAGENT_SYSTEM_PROMPT: &str = "You are a focused sub-agent. Complete the assigned task \
using the available tools, then reply with a concise summary of what you did and found. \
Do not ask questions; make reasonable assumptions.";

/// Lineage carried by every sub-agent tool call so nested spawns stay
/// bounded. Attached to [`crate::tools::ToolContext`] when a call originates
/// from a sub-agent rather than the top-level session.
#[derive(Debug, Clone)]
pub struct SubAgentContext {
    pub parent_session_id: String,
    /// 1 for a child of the top-level session, 2 for its child, and so on.
    pub depth: usize,
    /// Tool calls this agent may still make.
    pub budget: usize,
    /// Model id the agent actually runs against, after routing.
    pub resolved_model: String,
}

/// Progress events surfaced to the UI layer. Delivery is best-effort: a
/// closed receiver never affects the agent.
#[derive(Debug, Clone)]
pub enum AgentNotification {
    Spawned { agent_id: String, task: String },
    ToolCall { agent_id: String, tool: String },
    Done { agent_id: String, summary: String },
}

fn notify(notifier: Option<&UnboundedSender<AgentNotification>>, event: AgentNotification) {
    if let Some(tx) = notifier {
        let _ = tx.send(event);
    }
}

/// Drive one sub-agent to completion and return its summary.
///
/// Chat-transport failures come back as `Error:` strings, matching the
/// registry convention: the parent model sees them as tool output and can
/// react. Budget exhaustion returns whatever was produced plus a note.
pub async fn run_subagent(
    client: Arc<dyn ChatClient>,
    registry: Arc<ToolRegistry>,
    ctx: SubAgentContext,
    agent_id: &str,
    task: &str,
    cancel: CancellationToken,
    notifier: Option<&UnboundedSender<AgentNotification>>,
) -> String {
    info!(
        agent = agent_id,
        depth = ctx.depth,
        model = %ctx.resolved_model,
        "Sub-agent started"
    );

    let mut messages = vec![
        ChatMessage::system(SUBAGENT_SYSTEM_PROMPT),
        ChatMessage::user(task),
    ];
    let tools = registry.function_schemas();
    let mut calls_used = 0usize;

    loop {
        if cancel.is_cancelled() {
            return format!("Error: sub-agent '{}' was cancelled", agent_id);
        }

        let request = ChatRequest {
            model: ctx.resolved_model.clone(),
            messages: messages.clone(),
            tools: tools.clone(),
        };
        let response = match client.chat(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(agent = agent_id, error = %e, "Sub-agent chat failed");
                return format!("Error: sub-agent '{}' failed: {}", agent_id, e);
            }
        };

        if response.tool_calls.is_empty() {
            debug!(agent = agent_id, calls_used, "Sub-agent finished");
            return response.content;
        }

        // The assistant turn must introduce every tool_call_id answered
        // below, or the transcript is invalid on the next request.
        messages.push(ChatMessage::assistant_tool_calls(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        for call in response.tool_calls {
            if calls_used >= ctx.budget {
                warn!(agent = agent_id, budget = ctx.budget, "Sub-agent budget exhausted");
                return format!(
                    "{}\n[stopped: tool-call budget of {} exhausted]",
                    response.content, ctx.budget
                );
            }
            calls_used += 1;
            notify(
                notifier,
                AgentNotification::ToolCall {
                    agent_id: agent_id.to_string(),
                    tool: call.name.clone(),
                },
            );
            let output = registry
                .execute(&call.name, &call.arguments, Some(ctx.clone()), cancel.clone())
                .await;
            messages.push(ChatMessage::tool(call.id, output));
        }
    }
}
