//! Sub-agent orchestrator: `spawn_agent` and `delegate_task`.
//!
//! The orchestrator holds a weak reference back to the registry that owns
//! it, so sub-agents dispatch tools through the same surface (and the same
//! cache and checkpoint store) as the top-level session.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};
use crate::provider::{probe_provider, resolve_subagent_model, ChatClient, ProviderSettings};
use crate::tools::ToolRegistry;

use super::subagent::{run_subagent, AgentNotification, SubAgentContext};

/// Resolves the model id and chat client a sub-agent will run with.
///
/// The production resolver routes through the provider layer; tests inject
/// scripted clients.
#[async_trait]
pub trait ClientResolver: Send + Sync {
    async fn resolve(&self, parent_model: &str) -> Result<(String, Arc<dyn ChatClient>)>;
}

/// Default resolver: probe the local daemon, fall back to cloud, and pick a
/// model the chosen provider can serve.
pub struct ProviderClientResolver {
    settings: ProviderSettings,
}

impl ProviderClientResolver {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ClientResolver for ProviderClientResolver {
    async fn resolve(&self, parent_model: &str) -> Result<(String, Arc<dyn ChatClient>)> {
        let client = probe_provider(&self.settings).await?;
        let model = resolve_subagent_model(&self.settings, parent_model).await;
        Ok((model, client))
    }
}

/// One entry of a `delegate_task` plan.
#[derive(Debug, Clone, Deserialize)]
pub struct SubTaskSpec {
    pub id: String,
    pub task: String,
    /// Optional constraint on where the subtask may operate, appended to its
    /// prompt.
    #[serde(default)]
    pub scope: Option<String>,
    /// Ids of subtasks whose results this one needs. Must reference entries
    /// listed earlier in the plan, which keeps every plan acyclic.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn scoped_prompt(task: &str, scope: Option<&str>) -> String {
    match scope {
        Some(scope) => format!("{}\n\nScope: {}", task, scope),
        None => task.to_string(),
    }
}

pub struct SubAgentOrchestrator {
    registry: OnceLock<Weak<ToolRegistry>>,
    resolver: Arc<dyn ClientResolver>,
    notifier: Option<UnboundedSender<AgentNotification>>,
}

impl SubAgentOrchestrator {
    pub fn new(resolver: Arc<dyn ClientResolver>) -> Self {
        Self {
            registry: OnceLock::new(),
            resolver,
            notifier: None,
        }
    }

    /// Route progress events to a UI channel.
    pub fn with_notifier(mut self, notifier: UnboundedSender<AgentNotification>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Wire the owning registry in after construction. Weak, so dropping the
    /// registry tears the cycle down.
    pub fn attach_registry(&self, registry: &Arc<ToolRegistry>) {
        if self.registry.set(Arc::downgrade(registry)).is_err() {
            warn!("Orchestrator already attached to a registry");
        }
    }

    fn registry(&self) -> Result<Arc<ToolRegistry>> {
        self.registry
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| OrchestratorError::configuration("orchestrator has no live registry"))
    }

    fn notify(&self, event: AgentNotification) {
        if let Some(tx) = &self.notifier {
            let _ = tx.send(event);
        }
    }

    /// Depth of a child spawned from `parent`. Refusal is a typed budget
    /// error; no context is created and no notification fires on it.
    fn child_depth(&self, parent: Option<&SubAgentContext>, max_depth: usize) -> Result<usize> {
        let current = parent.map(|p| p.depth).unwrap_or(0);
        if current >= max_depth {
            return Err(OrchestratorError::budget(format!(
                "maximum sub-agent depth {} reached; complete the task directly",
                max_depth
            )));
        }
        Ok(current + 1)
    }

    fn child_context(
        &self,
        registry: &ToolRegistry,
        parent: Option<&SubAgentContext>,
        depth: usize,
        budget: usize,
        resolved_model: String,
    ) -> SubAgentContext {
        let session = registry.session();
        SubAgentContext {
            parent_session_id: parent
                .map(|p| p.parent_session_id.clone())
                .unwrap_or_else(|| session.session_id.clone()),
            depth,
            budget,
            resolved_model,
        }
    }

    /// Run a single sub-agent to completion and return its summary.
    ///
    /// `scope` is appended to the child prompt; `budget` bounds the child's
    /// tool calls and is clamped to the session maximum.
    pub async fn spawn_agent(
        &self,
        task: &str,
        scope: Option<&str>,
        budget: Option<usize>,
        parent: Option<&SubAgentContext>,
        cancel: CancellationToken,
    ) -> String {
        let registry = match self.registry() {
            Ok(registry) => registry,
            Err(e) => return format!("Error: {}", e),
        };
        let depth = match self.child_depth(parent, registry.session().max_agent_depth) {
            Ok(depth) => depth,
            Err(e) => return format!("Error: {}", e),
        };
        let budget = match resolve_budget(budget, registry.session().max_agent_calls) {
            Ok(budget) => budget,
            Err(e) => return format!("Error: {}", e),
        };

        let parent_model = parent
            .map(|p| p.resolved_model.clone())
            .unwrap_or_else(|| registry.session().model.clone());
        let (model, client) = match self.resolver.resolve(&parent_model).await {
            Ok(resolved) => resolved,
            Err(e) => return format!("Error: cannot start sub-agent: {}", e),
        };

        let agent_id = new_agent_id();
        self.notify(AgentNotification::Spawned {
            agent_id: agent_id.clone(),
            task: task.to_string(),
        });

        let prompt = scoped_prompt(task, scope);
        let ctx = self.child_context(&registry, parent, depth, budget, model);
        let summary = run_subagent(
            client,
            registry,
            ctx,
            &agent_id,
            &prompt,
            cancel,
            self.notifier.as_ref(),
        )
        .await;

        self.notify(AgentNotification::Done {
            agent_id,
            summary: summary.clone(),
        });
        summary
    }

    /// Run a dependency-ordered plan of subtasks and return a combined
    /// report.
    ///
    /// Independent subtasks run concurrently; a subtask waits until each of
    /// its dependencies has published a result, and sees those results in its
    /// prompt. One failed subtask is reported in place, never fatal to its
    /// siblings.
    pub async fn delegate_task(
        &self,
        plan: &str,
        subtasks: Vec<SubTaskSpec>,
        parent: Option<&SubAgentContext>,
        cancel: CancellationToken,
    ) -> String {
        if plan.trim().is_empty() {
            return "Error: invalid plan: plan description is empty".to_string();
        }
        if let Err(reason) = validate_plan(&subtasks) {
            return format!("Error: invalid plan: {}", reason);
        }
        let registry = match self.registry() {
            Ok(registry) => registry,
            Err(e) => return format!("Error: {}", e),
        };
        let depth = match self.child_depth(parent, registry.session().max_agent_depth) {
            Ok(depth) => depth,
            Err(e) => return format!("Error: {}", e),
        };

        let parent_model = parent
            .map(|p| p.resolved_model.clone())
            .unwrap_or_else(|| registry.session().model.clone());
        let (model, client) = match self.resolver.resolve(&parent_model).await {
            Ok(resolved) => resolved,
            Err(e) => return format!("Error: cannot start sub-agents: {}", e),
        };

        info!(plan, subtasks = subtasks.len(), depth, "Delegating task plan");

        // One watch channel per subtask carries its result to dependents.
        let mut senders: HashMap<String, watch::Sender<Option<String>>> = HashMap::new();
        let mut receivers: HashMap<String, watch::Receiver<Option<String>>> = HashMap::new();
        for spec in &subtasks {
            let (tx, rx) = watch::channel(None);
            senders.insert(spec.id.clone(), tx);
            receivers.insert(spec.id.clone(), rx);
        }

        let order: Vec<String> = subtasks.iter().map(|s| s.id.clone()).collect();
        let mut handles = Vec::new();
        for spec in subtasks {
            let deps: Vec<(String, watch::Receiver<Option<String>>)> = spec
                .depends_on
                .iter()
                .map(|id| (id.clone(), receivers[id].clone()))
                .collect();
            // Ids are unique per validate_plan, so the sender is present.
            let Some(tx) = senders.remove(&spec.id) else {
                continue;
            };
            let agent_id = new_agent_id();
            self.notify(AgentNotification::Spawned {
                agent_id: agent_id.clone(),
                task: spec.task.clone(),
            });

            let budget = registry.session().max_agent_calls;
            let ctx = self.child_context(&registry, parent, depth, budget, model.clone());
            let client = client.clone();
            let registry = registry.clone();
            let cancel = cancel.clone();
            let notifier = self.notifier.clone();

            handles.push(tokio::spawn(async move {
                let mut prompt = scoped_prompt(&spec.task, spec.scope.as_deref());
                for (dep_id, mut rx) in deps {
                    let dep_result = loop {
                        let ready = rx.borrow().clone();
                        if let Some(result) = ready {
                            break result;
                        }
                        if rx.changed().await.is_err() {
                            break format!("Error: dependency '{}' aborted", dep_id);
                        }
                    };
                    prompt.push_str(&format!(
                        "\n\nResult of prerequisite subtask '{}':\n{}",
                        dep_id, dep_result
                    ));
                }

                let summary = run_subagent(
                    client,
                    registry,
                    ctx,
                    &agent_id,
                    &prompt,
                    cancel,
                    notifier.as_ref(),
                )
                .await;
                if let Some(tx2) = &notifier {
                    let _ = tx2.send(AgentNotification::Done {
                        agent_id,
                        summary: summary.clone(),
                    });
                }
                let _ = tx.send(Some(summary.clone()));
                (spec.id, summary)
            }));
        }

        let mut results: HashMap<String, String> = HashMap::new();
        for handle in handles {
            match handle.await {
                Ok((id, summary)) => {
                    results.insert(id, summary);
                }
                Err(e) => warn!(error = %e, "Subtask join failed"),
            }
        }

        let mut report = String::new();
        for id in order {
            let summary = results
                .get(&id)
                .map(String::as_str)
                .unwrap_or("Error: subtask did not complete");
            report.push_str(&format!("### {}\n{}\n\n", id, summary));
        }
        report.trim_end().to_string()
    }
}

fn new_agent_id() -> String {
    format!("agent-{}", uuid::Uuid::new_v4().simple())
}

/// Tool-call budget for a child: the caller's request clamped to the session
/// maximum. A zero budget cannot run anything and is refused.
fn resolve_budget(requested: Option<usize>, session_max: usize) -> Result<usize> {
    match requested {
        Some(0) => Err(OrchestratorError::budget(
            "sub-agent tool-call budget must be at least 1",
        )),
        Some(requested) => Ok(requested.min(session_max)),
        None => Ok(session_max),
    }
}

/// Plans must be non-empty, unique by id, and reference only earlier
/// entries, which rules out cycles by construction.
fn validate_plan(plan: &[SubTaskSpec]) -> std::result::Result<(), String> {
    if plan.is_empty() {
        return Err("plan has no subtasks".into());
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for spec in plan {
        if spec.id.is_empty() {
            return Err("subtask with empty id".into());
        }
        if spec.task.trim().is_empty() {
            return Err(format!("subtask '{}' has an empty task", spec.id));
        }
        if !seen.insert(spec.id.as_str()) {
            return Err(format!("duplicate subtask id '{}'", spec.id));
        }
        for dep in &spec.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(format!(
                    "subtask '{}' depends on '{}', which is not an earlier subtask",
                    spec.id, dep
                ));
            }
        }
    }
    Ok(())
}
