//! Per-session runtime: wires Designer, Executor, Interaction and Optimizer
//! into the single cooperative task described by §5, driving one
//! conversation from an inbound `chat` to an outbound `end`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use warp_core::{
    Category, InboundMessage, OutboundMessage, Scratchpad, SessionEndStatus, SessionId,
    SessionPhase, TemplateId, TerminalErrorKind, UserId,
};
use warp_llm::LlmClient;
use warp_permission::PermissionManager;
use warp_registry::{AdapterRegistry, NodeRegistry};
use warp_store::WorkflowStore;

use crate::designer::DesignerStage;
use crate::executor::{ExecutorOutcome, ExecutorStage};
use crate::interaction::InteractionHub;
use crate::optimizer::{OptimizerOutcome, OptimizerStage};

/// Initial scratchpad key every session starts with (§3, §4.5): the raw
/// question text, available to the first step's bindings as `$question`.
const QUESTION_KEY: &str = "question";

/// Everything a session needs to run, shared (cheaply, behind `Arc`) across
/// every conversation the process handles. Built once at startup and handed
/// to each session as it's created (§5).
#[derive(Clone)]
pub struct SessionDeps {
    pub node_registry: Arc<NodeRegistry>,
    pub adapter_registry: Arc<AdapterRegistry>,
    pub store: Arc<dyn WorkflowStore>,
    pub permission_manager: Arc<PermissionManager>,
    pub llm: Arc<dyn LlmClient>,
    pub session_deadline: Duration,
}

impl SessionDeps {
    pub fn new(
        node_registry: Arc<NodeRegistry>,
        adapter_registry: Arc<AdapterRegistry>,
        store: Arc<dyn WorkflowStore>,
        permission_manager: Arc<PermissionManager>,
        llm: Arc<dyn LlmClient>,
        session_deadline: Duration,
    ) -> Self {
        Self {
            node_registry,
            adapter_registry,
            store,
            permission_manager,
            llm,
            session_deadline,
        }
    }
}

/// Mutable state touched across a turn. Held behind a `Mutex` even though a
/// session's own task is its only writer, so the phase/scratchpad can be
/// inspected without requiring `&mut self` everywhere.
struct SessionState {
    phase: SessionPhase,
    scratchpad: Scratchpad,
    current_template_id: Option<TemplateId>,
}

/// The running state of one conversation (§3 `Session`, §5 "a single
/// cooperative task per session"). `id`/`user_id` are immutable for the
/// runtime's lifetime and read without locking; everything that changes
/// across a turn lives in `state`.
pub struct SessionRuntime {
    id: SessionId,
    user_id: UserId,
    deps: SessionDeps,
    state: Mutex<SessionState>,
    interaction: Arc<InteractionHub>,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    designer: DesignerStage,
    executor: ExecutorStage,
    optimizer: OptimizerStage,
}

impl SessionRuntime {
    pub fn new(
        id: SessionId,
        user_id: UserId,
        deps: SessionDeps,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        let interaction = Arc::new(InteractionHub::new());
        let designer = DesignerStage::new(
            deps.node_registry.clone(),
            deps.store.clone(),
            deps.llm.clone(),
        );
        let executor = ExecutorStage::new(
            deps.node_registry.clone(),
            deps.adapter_registry.clone(),
            deps.permission_manager.clone(),
            interaction.clone(),
        );
        let optimizer_designer = Arc::new(DesignerStage::new(
            deps.node_registry.clone(),
            deps.store.clone(),
            deps.llm.clone(),
        ));
        let optimizer = OptimizerStage::new(deps.store.clone(), optimizer_designer);

        Self {
            id,
            user_id,
            deps,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Idle,
                scratchpad: Scratchpad::new(),
                current_template_id: None,
            }),
            interaction,
            cancel: CancellationToken::new(),
            outbound,
            designer,
            executor,
            optimizer,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.id
    }

    /// Cooperative-cancellation handle. A transport closing the socket, or a
    /// session-level timeout, calls this to unwind every outstanding waiter
    /// (§5 "Cancellation").
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Dispatch one inbound protocol message (§4.7, §6).
    ///
    /// `chat` starts a new workflow cycle only from `idle`; while a waiter
    /// is outstanding, `user_response`/`permission_response` are routed to
    /// it. `feedback` is absorbed independent of phase. A `chat` that
    /// arrives mid-turn is dropped — the protocol is turn-based and the
    /// caller is expected to wait for `end` before sending another.
    pub async fn handle_inbound(&self, message: InboundMessage) {
        match message {
            InboundMessage::Chat { content } => self.start_chat(content).await,
            InboundMessage::UserResponse { question_id, content } => match question_id.parse() {
                Ok(question_id) => {
                    if let Err(e) = self.interaction.route_user_response(question_id, content) {
                        tracing::warn!(%e, "dropped unrouted user_response");
                    }
                }
                Err(e) => tracing::warn!(%e, "malformed question_id in user_response"),
            },
            InboundMessage::PermissionResponse { request_id, granted, response } => {
                match request_id.parse() {
                    Ok(request_id) => {
                        let now = chrono::Utc::now();
                        if let Err(e) =
                            self.deps.permission_manager.respond(request_id, granted, response, now)
                        {
                            tracing::warn!(%e, "dropped stale permission_response");
                        }
                    }
                    Err(e) => tracing::warn!(%e, "malformed request_id in permission_response"),
                }
            }
            InboundMessage::Feedback { content } => {
                let template_id = self.state.lock().await.current_template_id;
                if let Some(template_id) = template_id {
                    self.optimizer.absorb_feedback(&template_id, content).await;
                }
            }
        }
    }

    async fn phase_is_idle(&self) -> bool {
        self.state.lock().await.phase == SessionPhase::Idle
    }

    async fn set_phase(&self, phase: SessionPhase) {
        self.state.lock().await.phase = phase;
    }

    /// Run a full Designer -> Executor -> Optimizer cycle for one `chat`
    /// turn, emitting `start`/`workflow_design`/.../`end` along the way
    /// (§4.5-§4.8, §6). A per-session soft deadline (§5) wraps the whole
    /// turn; exceeding it cancels every outstanding waiter and ends the
    /// turn as `cancelled` without touching the Store.
    async fn start_chat(&self, question: String) {
        if !self.phase_is_idle().await {
            tracing::debug!("ignoring chat received while a turn is already in flight");
            return;
        }

        let _ = self.outbound.send(OutboundMessage::Start {});

        tokio::select! {
            _ = tokio::time::sleep(self.deps.session_deadline) => {
                self.cancel.cancel();
                let _ = self.outbound.send(OutboundMessage::End {
                    status: SessionEndStatus::Cancelled,
                    summary: Some("session deadline exceeded".to_string()),
                });
                self.set_phase(SessionPhase::Terminal).await;
            }
            _ = self.run_turn(question) => {}
        }
    }

    async fn run_turn(&self, question: String) {
        self.set_phase(SessionPhase::Designing).await;

        let now = chrono::Utc::now();
        {
            let mut state = self.state.lock().await;
            state.scratchpad = Scratchpad::new();
            state.scratchpad.set(QUESTION_KEY, serde_json::json!(question), now);
        }

        let mut template = match self.designer.design(&question, self.id, None, now).await {
            Ok(template) => template,
            Err(e) => {
                let _ = self.outbound.send(OutboundMessage::End {
                    status: SessionEndStatus::Failed,
                    summary: Some(format!("could not design a workflow: {e}")),
                });
                self.set_phase(SessionPhase::Terminal).await;
                return;
            }
        };

        let _ = self.outbound.send(OutboundMessage::WorkflowDesign {
            template: serde_json::to_value(&template).unwrap_or(serde_json::Value::Null),
        });

        let mut already_redesigned = false;
        loop {
            self.state.lock().await.current_template_id = Some(template.id);
            self.set_phase(SessionPhase::Executing).await;

            let run_result = {
                let mut scratchpad = {
                    let mut state = self.state.lock().await;
                    std::mem::take(&mut state.scratchpad)
                };

                let outcome = self
                    .executor
                    .run(&template, &mut scratchpad, self.id, self.user_id, &self.cancel, &self.outbound)
                    .await;

                self.state.lock().await.scratchpad = scratchpad;
                outcome
            };

            self.set_phase(SessionPhase::Optimizing).await;
            let optimizer_outcome = self
                .optimizer
                .handle_result(
                    &template,
                    run_result.as_ref().map_err(TerminalErrorKind::clone),
                    &question,
                    self.id,
                    already_redesigned,
                    chrono::Utc::now(),
                )
                .await;

            match optimizer_outcome {
                OptimizerOutcome::Completed => {
                    let summary = self.summarize_completion(&run_result.unwrap_or_default());
                    let _ = self.outbound.send(OutboundMessage::End {
                        status: SessionEndStatus::Ok,
                        summary: Some(summary),
                    });
                    break;
                }
                OptimizerOutcome::Redesigned(redesigned) => {
                    already_redesigned = true;
                    template = redesigned;
                    let _ = self.outbound.send(OutboundMessage::WorkflowDesign {
                        template: serde_json::to_value(&template).unwrap_or(serde_json::Value::Null),
                    });
                    continue;
                }
                OptimizerOutcome::Failed(kind) => {
                    let status = end_status_for(&kind);
                    let _ = self.outbound.send(OutboundMessage::End {
                        status,
                        summary: Some(failure_summary(&kind)),
                    });
                    break;
                }
            }
        }

        self.set_phase(SessionPhase::Idle).await;
    }

    /// Assemble the human-readable completion summary from `creation` and
    /// `analysis` step outputs (§4.8). Falls back to a generic message if no
    /// step in either category emitted anything recognizable as a summary.
    fn summarize_completion(&self, outcome: &ExecutorOutcome) -> String {
        let mut fragments = Vec::new();
        for step in &outcome.steps {
            let is_summary_category = self
                .deps
                .node_registry
                .get(&step.node_name)
                .map(|d| matches!(d.category, Category::Creation | Category::Analysis))
                .unwrap_or(false);
            if !is_summary_category {
                continue;
            }
            for value in step.outputs.values() {
                match value.as_str() {
                    Some(text) => fragments.push(text.to_string()),
                    None => fragments.push(value.to_string()),
                }
            }
        }

        if fragments.is_empty() {
            "workflow completed successfully".to_string()
        } else {
            fragments.join(" ")
        }
    }
}

fn end_status_for(kind: &TerminalErrorKind) -> SessionEndStatus {
    match kind {
        TerminalErrorKind::UserCancelled | TerminalErrorKind::SessionCancelled => {
            SessionEndStatus::Cancelled
        }
        _ => SessionEndStatus::Failed,
    }
}

fn failure_summary(kind: &TerminalErrorKind) -> String {
    match kind {
        TerminalErrorKind::PermissionDenied => "the request was not approved".to_string(),
        TerminalErrorKind::PermissionExpired => {
            "the approval request expired before a decision was made".to_string()
        }
        TerminalErrorKind::UserCancelled | TerminalErrorKind::SessionCancelled => {
            "the session was cancelled".to_string()
        }
        other => format!("the workflow could not complete: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_core::PermissionRequestId;
    use warp_llm::MockLlmClient;
    use warp_store::FsWorkflowStore;

    fn plan_json(node: &str) -> String {
        format!(
            r#"{{
                "name": "test plan", "description": "desc",
                "steps": [{{
                    "stepName": "a", "nodeName": "{node}",
                    "boundInputs": {{"query": "$question"}},
                    "declaredOutputs": ["search_results"], "requiresPermission": false
                }}],
                "edges": [], "sharedStoreSchema": []
            }}"#
        )
    }

    async fn deps(llm_response: &str) -> SessionDeps {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn WorkflowStore> = Arc::new(FsWorkflowStore::open(dir.path()).await.unwrap());
        SessionDeps::new(
            Arc::new(NodeRegistry::with_builtins()),
            Arc::new(AdapterRegistry::with_builtins()),
            store,
            Arc::new(PermissionManager::new(Duration::from_secs(300))),
            Arc::new(MockLlmClient::fixed(llm_response.to_string())),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn happy_path_runs_to_ok_end() {
        let deps = deps(&plan_json("web_search")).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runtime = SessionRuntime::new(SessionId::now_v7(), UserId::now_v7(), deps, tx);

        runtime
            .handle_inbound(InboundMessage::Chat { content: "search for flights".to_string() })
            .await;

        let mut saw_start = false;
        let mut end_status = None;
        while let Ok(message) = rx.try_recv() {
            match message {
                OutboundMessage::Start {} => saw_start = true,
                OutboundMessage::End { status, .. } => end_status = Some(status),
                _ => {}
            }
        }
        assert!(saw_start);
        assert_eq!(end_status, Some(SessionEndStatus::Ok));
    }

    #[tokio::test]
    async fn permission_denied_ends_failed_without_store_penalty() {
        let deps = deps(&plan_json("flight_booking")).await;
        let store = deps.store.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(SessionRuntime::new(SessionId::now_v7(), UserId::now_v7(), deps, tx));

        let runtime_clone = runtime.clone();
        let run = tokio::spawn(async move {
            runtime_clone
                .handle_inbound(InboundMessage::Chat { content: "book a flight".to_string() })
                .await;
        });

        let mut request_id: Option<PermissionRequestId> = None;
        for _ in 0..50 {
            if let Ok(OutboundMessage::PermissionRequest { request_id: id, .. }) = rx.try_recv() {
                request_id = Some(id.parse().unwrap());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let request_id = request_id.expect("permission_request emitted");
        runtime
            .deps
            .permission_manager
            .respond(request_id, false, Some("no".to_string()), chrono::Utc::now())
            .unwrap();

        run.await.unwrap();

        let mut end_status = None;
        while let Ok(message) = rx.try_recv() {
            if let OutboundMessage::End { status, .. } = message {
                end_status = Some(status);
            }
        }
        assert_eq!(end_status, Some(SessionEndStatus::Failed));
        let stats = store.stats().await;
        assert_eq!(stats.total_templates, 1, "the plan is still stored");
    }

    #[tokio::test]
    async fn cancellation_unwinds_with_cancelled_status() {
        let deps = deps(&plan_json("user_query")).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(SessionRuntime::new(SessionId::now_v7(), UserId::now_v7(), deps, tx));

        let runtime_clone = runtime.clone();
        let run = tokio::spawn(async move {
            runtime_clone
                .handle_inbound(InboundMessage::Chat { content: "ask me something".to_string() })
                .await;
        });

        let mut saw_question = false;
        for _ in 0..50 {
            if let Ok(OutboundMessage::UserQuestion { .. }) = rx.try_recv() {
                saw_question = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saw_question);

        runtime.cancellation().cancel();
        run.await.unwrap();

        let mut end_status = None;
        while let Ok(message) = rx.try_recv() {
            if let OutboundMessage::End { status, .. } = message {
                end_status = Some(status);
            }
        }
        assert_eq!(end_status, Some(SessionEndStatus::Cancelled));
    }
}
