//! Executor stage: walks a `WorkflowTemplate`'s step graph, invoking each
//! node's capability adapter, gating on permission where required, and
//! suspending for user input at `user_query` steps (spec §4.6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use warp_core::{
    OutboundMessage, PermissionState, PermissionTier, QuestionId, Scratchpad, SessionId, TemplateStep,
    TerminalErrorKind, UserId, WorkflowTemplate,
};
use warp_permission::PermissionManager;
use warp_registry::{AdapterRegistry, NodeRegistry};

use crate::interaction::InteractionHub;

/// Outbound protocol messages are pushed to the session's WebSocket writer
/// through this channel rather than written directly, so the Executor
/// never depends on a transport.
pub type OutboundSender = UnboundedSender<OutboundMessage>;

const MAX_TRANSIENT_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const RETRY_FACTOR: u32 = 2;
const RETRY_JITTER_RATIO: f64 = 0.2;

/// A scratchpad-key reference is written as `$key` in `bound_inputs`;
/// anything else is a literal value (see [`crate::designer`]).
fn resolve_bound_inputs(
    bound_inputs: &HashMap<String, String>,
    scratchpad: &Scratchpad,
) -> serde_json::Map<String, serde_json::Value> {
    let mut resolved = serde_json::Map::new();
    for (input_name, binding) in bound_inputs {
        let value = match binding.strip_prefix('$') {
            Some(key) => scratchpad.get(key).cloned().unwrap_or(serde_json::Value::Null),
            None => serde_json::Value::String(binding.clone()),
        };
        resolved.insert(input_name.clone(), value);
    }
    resolved
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms =
        RETRY_BASE_DELAY.as_millis() as f64 * (RETRY_FACTOR as f64).powi((attempt - 1) as i32);
    let jitter = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * RETRY_JITTER_RATIO;
    Duration::from_millis((base_ms * jitter).max(0.0) as u64)
}

/// One completed step, surfaced for tests and progress accounting.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step_name: String,
    pub node_name: String,
    pub outputs: serde_json::Map<String, serde_json::Value>,
}

/// A full run's bookkeeping: every step the Executor actually visited, in
/// the order it visited them.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOutcome {
    pub steps: Vec<StepOutcome>,
}

/// Drives a `WorkflowTemplate` to completion or a terminal error against a
/// shared scratchpad (spec §4.6).
pub struct ExecutorStage {
    node_registry: Arc<NodeRegistry>,
    adapter_registry: Arc<AdapterRegistry>,
    permission_manager: Arc<PermissionManager>,
    interaction_hub: Arc<InteractionHub>,
}

impl ExecutorStage {
    pub fn new(
        node_registry: Arc<NodeRegistry>,
        adapter_registry: Arc<AdapterRegistry>,
        permission_manager: Arc<PermissionManager>,
        interaction_hub: Arc<InteractionHub>,
    ) -> Self {
        Self {
            node_registry,
            adapter_registry,
            permission_manager,
            interaction_hub,
        }
    }

    /// The unique step with no incoming edge. A template with more than one
    /// root (a malformed plan the Designer should never produce, but the
    /// Store's validation doesn't check for) falls back to the first step
    /// in declaration order.
    fn entry_step<'a>(&self, template: &'a WorkflowTemplate) -> &'a TemplateStep {
        let mut has_incoming: HashMap<&str, bool> =
            template.steps.iter().map(|s| (s.step_name.as_str(), false)).collect();
        for edge in &template.edges {
            has_incoming.insert(edge.to.as_str(), true);
        }
        template
            .steps
            .iter()
            .find(|s| !has_incoming.get(s.step_name.as_str()).copied().unwrap_or(false))
            .unwrap_or(&template.steps[0])
    }

    fn next_step<'a>(
        &self,
        template: &'a WorkflowTemplate,
        current: &str,
        action_label: &str,
    ) -> Result<Option<&'a TemplateStep>, ()> {
        let outgoing: Vec<&warp_core::Edge> = template.edges.iter().filter(|e| e.from == current).collect();
        if outgoing.is_empty() {
            return Ok(None);
        }
        let matched = outgoing
            .iter()
            .find(|e| e.action_label == action_label)
            .or_else(|| outgoing.iter().find(|e| e.action_label == "default"));
        match matched {
            Some(edge) => template
                .steps
                .iter()
                .find(|s| s.step_name == edge.to)
                .map(Some)
                .ok_or(()),
            None => Err(()),
        }
    }

    pub async fn run(
        &self,
        template: &WorkflowTemplate,
        scratchpad: &mut Scratchpad,
        session_id: SessionId,
        user_id: UserId,
        cancel: &CancellationToken,
        outbound: &OutboundSender,
    ) -> Result<ExecutorOutcome, TerminalErrorKind> {
        let mut outcome = ExecutorOutcome::default();
        let mut current = self.entry_step(template);
        let total_steps = template.steps.len();

        loop {
            if cancel.is_cancelled() {
                return Err(TerminalErrorKind::SessionCancelled);
            }

            let descriptor = self
                .node_registry
                .get(&current.node_name)
                .map_err(|_| TerminalErrorKind::InvalidInput)?;

            let _ = outbound.send(OutboundMessage::WorkflowProgress {
                step_index: outcome.steps.len(),
                total_steps,
                step_name: current.step_name.clone(),
                node_name: current.node_name.clone(),
                description: descriptor.description.clone(),
            });

            if current.requires_permission || descriptor.permission_tier != PermissionTier::None {
                self.gate_on_permission(current, descriptor.permission_tier, session_id, user_id, cancel, outbound)
                    .await?;
            }

            let adapter = self
                .adapter_registry
                .get(&current.node_name)
                .cloned()
                .ok_or(TerminalErrorKind::CapabilityFailed)?;

            let mut prepared_inputs = resolve_bound_inputs(&current.bound_inputs, scratchpad);

            if current.node_name == "user_query" {
                let answer = self.ask_user(&prepared_inputs, cancel, outbound).await?;
                prepared_inputs.insert("response".to_string(), answer);
            }

            let prepared = adapter.prepare(prepared_inputs).map_err(|e| {
                let _ = outbound.send(OutboundMessage::NodeError {
                    step_name: current.step_name.clone(),
                    error_kind: "invalid_input".to_string(),
                    message: e.to_string(),
                });
                TerminalErrorKind::InvalidInput
            })?;

            let result = self.run_with_retry(&adapter, &prepared, current, cancel, outbound).await?;

            let commit = adapter.commit(&prepared, &result).map_err(|e| {
                let _ = outbound.send(OutboundMessage::NodeError {
                    step_name: current.step_name.clone(),
                    error_kind: "capability_failed".to_string(),
                    message: e.to_string(),
                });
                TerminalErrorKind::CapabilityFailed
            })?;

            let now = chrono::Utc::now();
            for (key, value) in commit.outputs.iter() {
                scratchpad.set(key.clone(), value.clone(), now);
            }

            let _ = outbound.send(OutboundMessage::NodeComplete {
                step_name: current.step_name.clone(),
                result: serde_json::Value::Object(commit.outputs.clone()),
            });

            outcome.steps.push(StepOutcome {
                step_name: current.step_name.clone(),
                node_name: current.node_name.clone(),
                outputs: commit.outputs.clone(),
            });

            match self.next_step(template, &current.step_name, commit.action_label()) {
                Ok(Some(next)) => current = next,
                Ok(None) => break,
                Err(()) => return Err(TerminalErrorKind::CapabilityFailed),
            }
        }

        Ok(outcome)
    }

    async fn gate_on_permission(
        &self,
        step: &TemplateStep,
        tier: PermissionTier,
        session_id: SessionId,
        user_id: UserId,
        cancel: &CancellationToken,
        outbound: &OutboundSender,
    ) -> Result<(), TerminalErrorKind> {
        let now = chrono::Utc::now();
        let mut details = serde_json::Map::new();
        details.insert("step_name".to_string(), serde_json::Value::String(step.step_name.clone()));
        details.insert("node_name".to_string(), serde_json::Value::String(step.node_name.clone()));

        let (request_id, awaitable) =
            self.permission_manager.create(user_id, session_id, step.node_name.clone(), details, tier, now);

        let request = self
            .permission_manager
            .list_pending(&warp_permission::PendingFilter { session_id: Some(session_id), user_id: Some(user_id) })
            .into_iter()
            .find(|r| r.id == request_id);
        let expires_at = request.map(|r| r.expires_at).unwrap_or(now);

        let _ = outbound.send(OutboundMessage::PermissionRequest {
            request_id: request_id.to_string(),
            operation: step.node_name.clone(),
            description: format!("Run '{}' ({})", step.step_name, step.node_name),
            reason: "this node requires explicit sign-off before it runs".to_string(),
            tier,
            expires_at,
        });

        let resolution = tokio::select! {
            resolution = awaitable.wait() => resolution,
            _ = cancel.cancelled() => {
                let _ = self.permission_manager.cancel(request_id, chrono::Utc::now());
                return Err(TerminalErrorKind::SessionCancelled);
            }
        };

        match resolution.state {
            PermissionState::Granted => Ok(()),
            PermissionState::Denied => Err(TerminalErrorKind::PermissionDenied),
            PermissionState::Expired => Err(TerminalErrorKind::PermissionExpired),
            PermissionState::Cancelled | PermissionState::Pending => Err(TerminalErrorKind::SessionCancelled),
        }
    }

    async fn ask_user(
        &self,
        prepared_inputs: &serde_json::Map<String, serde_json::Value>,
        cancel: &CancellationToken,
        outbound: &OutboundSender,
    ) -> Result<serde_json::Value, TerminalErrorKind> {
        let question_id = QuestionId::now_v7();
        let receiver = self.interaction_hub.register(question_id);

        let prompt = prepared_inputs
            .get("prompt")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_string();

        let _ = outbound.send(OutboundMessage::UserQuestion {
            question_id: question_id.to_string(),
            question: prompt,
            fields: None,
        });

        tokio::select! {
            answer = receiver => answer.map_err(|_| TerminalErrorKind::SessionCancelled),
            _ = cancel.cancelled() => {
                self.interaction_hub.cancel(question_id);
                Err(TerminalErrorKind::SessionCancelled)
            }
        }
    }

    async fn run_with_retry(
        &self,
        adapter: &Arc<dyn warp_registry::CapabilityAdapter>,
        prepared: &warp_registry::PreparedInputs,
        step: &TemplateStep,
        cancel: &CancellationToken,
        outbound: &OutboundSender,
    ) -> Result<warp_registry::CapabilityResult, TerminalErrorKind> {
        let mut attempt = 0;
        loop {
            match adapter.run(prepared.clone(), cancel.clone()).await {
                Ok(result) => return Ok(result),
                Err(warp_core::CapabilityError::Transient { node_name, reason }) => {
                    attempt += 1;
                    if attempt >= MAX_TRANSIENT_RETRIES {
                        let _ = outbound.send(OutboundMessage::NodeError {
                            step_name: step.step_name.clone(),
                            error_kind: "capability_failed".to_string(),
                            message: format!("'{node_name}' failed after {attempt} attempts: {reason}"),
                        });
                        return Err(TerminalErrorKind::CapabilityFailed);
                    }
                    tracing::warn!(node_name, attempt, %reason, "transient capability failure, retrying");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
                Err(e @ warp_core::CapabilityError::InvalidInput { .. }) => {
                    let _ = outbound.send(OutboundMessage::NodeError {
                        step_name: step.step_name.clone(),
                        error_kind: "invalid_input".to_string(),
                        message: e.to_string(),
                    });
                    return Err(TerminalErrorKind::InvalidInput);
                }
                Err(e @ warp_core::CapabilityError::Failed { .. }) => {
                    let _ = outbound.send(OutboundMessage::NodeError {
                        step_name: step.step_name.clone(),
                        error_kind: "capability_failed".to_string(),
                        message: e.to_string(),
                    });
                    return Err(TerminalErrorKind::CapabilityFailed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use warp_core::PermissionTier as Tier;

    fn channel() -> (OutboundSender, tokio::sync::mpsc::UnboundedReceiver<OutboundMessage>) {
        tokio::sync::mpsc::unbounded_channel()
    }

    fn linear_template(steps: Vec<(&str, &str)>) -> WorkflowTemplate {
        let template_steps: Vec<TemplateStep> = steps
            .iter()
            .map(|(name, node)| TemplateStep {
                step_name: name.to_string(),
                node_name: node.to_string(),
                bound_inputs: HashMap::new(),
                declared_outputs: vec![],
                requires_permission: false,
            })
            .collect();
        let edges: Vec<warp_core::Edge> = steps
            .windows(2)
            .map(|pair| warp_core::Edge {
                from: pair[0].0.to_string(),
                to: pair[1].0.to_string(),
                action_label: "default".to_string(),
            })
            .collect();
        WorkflowTemplate {
            id: warp_core::TemplateId::now_v7(),
            name: "test".to_string(),
            description: "test".to_string(),
            question_pattern: "q".to_string(),
            steps: template_steps,
            edges,
            shared_store_schema: vec![],
            tags: vec![],
            success_rate: 0.0,
            usage_count: 0,
            created_at: chrono::Utc::now(),
            last_used_at: chrono::Utc::now(),
            feedback: vec![],
        }
    }

    fn stage() -> ExecutorStage {
        ExecutorStage::new(
            Arc::new(NodeRegistry::with_builtins()),
            Arc::new(AdapterRegistry::with_builtins()),
            Arc::new(PermissionManager::new(StdDuration::from_secs(300))),
            Arc::new(InteractionHub::new()),
        )
    }

    #[tokio::test]
    async fn single_step_template_runs_to_completion() {
        let stage = stage();
        let template = linear_template(vec![("search", "web_search")]);
        let mut pad = Scratchpad::new();
        pad.set("query", serde_json::json!("flights"), chrono::Utc::now());
        let mut bound = HashMap::new();
        bound.insert("query".to_string(), "$query".to_string());
        let mut template = template;
        template.steps[0].bound_inputs = bound;

        let (tx, _rx) = channel();
        let cancel = CancellationToken::new();
        let outcome = stage
            .run(&template, &mut pad, SessionId::now_v7(), UserId::now_v7(), &cancel, &tx)
            .await
            .unwrap();

        assert_eq!(outcome.steps.len(), 1);
        assert!(pad.get("search_results").is_some());
    }

    #[tokio::test]
    async fn sensitive_step_blocks_until_denied() {
        let stage = stage();
        let mut template = linear_template(vec![("book", "flight_booking")]);
        let mut bound = HashMap::new();
        bound.insert("recommended_option".to_string(), "$option".to_string());
        template.steps[0].bound_inputs = bound;

        let mut pad = Scratchpad::new();
        pad.set("option", serde_json::json!({"carrier": "Demo Air"}), chrono::Utc::now());

        let (tx, _rx) = channel();
        let cancel = CancellationToken::new();
        let session_id = SessionId::now_v7();
        let user_id = UserId::now_v7();

        let permission_manager = Arc::new(PermissionManager::new(StdDuration::from_secs(300)));
        let stage = ExecutorStage::new(
            Arc::new(NodeRegistry::with_builtins()),
            Arc::new(AdapterRegistry::with_builtins()),
            permission_manager.clone(),
            Arc::new(InteractionHub::new()),
        );

        let run_handle = tokio::spawn(async move {
            stage.run(&template, &mut pad, session_id, user_id, &cancel, &tx).await
        });

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        let pending = permission_manager.list_pending(&warp_permission::PendingFilter::default());
        assert_eq!(pending.len(), 1);
        permission_manager.respond(pending[0].id, false, None, chrono::Utc::now()).unwrap();

        let outcome = run_handle.await.unwrap();
        assert_eq!(outcome.unwrap_err(), TerminalErrorKind::PermissionDenied);
    }

    #[test]
    fn entry_step_finds_the_unique_root() {
        let stage = stage();
        let template = linear_template(vec![("a", "web_search"), ("b", "web_search")]);
        assert_eq!(stage.entry_step(&template).step_name, "a");
    }

    #[test]
    fn resolve_bound_inputs_distinguishes_literal_from_reference() {
        let mut pad = Scratchpad::new();
        pad.set("destination", serde_json::json!("Tokyo"), chrono::Utc::now());
        let mut bound = HashMap::new();
        bound.insert("to".to_string(), "$destination".to_string());
        bound.insert("class".to_string(), "economy".to_string());
        let resolved = resolve_bound_inputs(&bound, &pad);
        assert_eq!(resolved.get("to"), Some(&serde_json::json!("Tokyo")));
        assert_eq!(resolved.get("class"), Some(&serde_json::json!("economy")));
    }
}
