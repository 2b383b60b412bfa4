//! Optimizer stage: classifies an Executor run's outcome, folds it into
//! the template's track record, and drives the one-shot redesign loop
//! (spec §4.8).

use std::sync::Arc;
use warp_core::{SessionId, TemplateId, TerminalErrorKind, Timestamp, WorkflowTemplate};
use warp_store::WorkflowStore;

use crate::designer::DesignerStage;
use crate::executor::ExecutorOutcome;

/// What the session task should do next after a run finishes.
#[derive(Debug, Clone)]
pub enum OptimizerOutcome {
    /// The run succeeded; the template's success rate has been updated.
    Completed,
    /// The run failed in a recoverable way and a fresh template is ready to
    /// retry against. Only offered once per session (§4.8: "a single
    /// automatic redesign attempt").
    Redesigned(WorkflowTemplate),
    /// The run failed and no further automatic recovery applies, either
    /// because the failure kind doesn't warrant a redesign or a redesign
    /// was already spent on this session.
    Failed(TerminalErrorKind),
}

/// Absorbs Executor outcomes and user feedback into the Workflow Store, and
/// decides whether a failure is worth a single Designer retry (§4.8).
pub struct OptimizerStage {
    store: Arc<dyn WorkflowStore>,
    designer: Arc<DesignerStage>,
}

impl OptimizerStage {
    pub fn new(store: Arc<dyn WorkflowStore>, designer: Arc<DesignerStage>) -> Self {
        Self { store, designer }
    }

    /// `already_redesigned` is the session's own bookkeeping: once a
    /// redesign has already been attempted in this session, further
    /// recoverable failures are reported as final rather than looping.
    pub async fn handle_result(
        &self,
        template: &WorkflowTemplate,
        result: Result<&ExecutorOutcome, TerminalErrorKind>,
        question: &str,
        session_id: SessionId,
        already_redesigned: bool,
        now: Timestamp,
    ) -> OptimizerOutcome {
        match result {
            Ok(_) => {
                if let Err(e) = self.store.record_outcome(&template.id, true).await {
                    tracing::warn!(template_id = %template.id, error = %e, "failed to persist success outcome");
                }
                OptimizerOutcome::Completed
            }
            Err(kind) => {
                if kind.counts_as_template_failure() {
                    if let Err(e) = self.store.record_outcome(&template.id, false).await {
                        tracing::warn!(template_id = %template.id, error = %e, "failed to persist failure outcome");
                    }
                }

                if already_redesigned || !kind.warrants_redesign() {
                    return OptimizerOutcome::Failed(kind.clone());
                }

                match self.designer.design(question, session_id, Some(&kind.to_string()), now).await {
                    Ok(redesigned) => OptimizerOutcome::Redesigned(redesigned),
                    Err(_) => OptimizerOutcome::Failed(kind.clone()),
                }
            }
        }
    }

    /// Append out-of-band user feedback to the template's record without
    /// altering its structure (§4.8).
    pub async fn absorb_feedback(&self, template_id: &TemplateId, feedback: String) {
        if let Err(e) = self.store.append_feedback(template_id, feedback).await {
            tracing::warn!(%template_id, error = %e, "failed to persist feedback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StepOutcome;
    use std::collections::HashMap;
    use warp_llm::MockLlmClient;
    use warp_registry::NodeRegistry;
    use warp_store::FsWorkflowStore;

    async fn store() -> Arc<dyn WorkflowStore> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(FsWorkflowStore::open(dir.path()).await.unwrap())
    }

    fn template() -> WorkflowTemplate {
        WorkflowTemplate {
            id: TemplateId::now_v7(),
            name: "t".to_string(),
            description: "d".to_string(),
            question_pattern: "q".to_string(),
            steps: vec![warp_core::TemplateStep {
                step_name: "a".to_string(),
                node_name: "web_search".to_string(),
                bound_inputs: HashMap::new(),
                declared_outputs: vec![],
                requires_permission: false,
            }],
            edges: vec![],
            shared_store_schema: vec![],
            tags: vec![],
            success_rate: 0.0,
            usage_count: 0,
            created_at: chrono::Utc::now(),
            last_used_at: chrono::Utc::now(),
            feedback: vec![],
        }
    }

    fn plan_json() -> String {
        r#"{
            "name": "n", "description": "d",
            "steps": [{"stepName": "a", "nodeName": "web_search", "boundInputs": {}, "declaredOutputs": [], "requiresPermission": false}],
            "edges": [], "sharedStoreSchema": []
        }"#
            .to_string()
    }

    #[tokio::test]
    async fn successful_run_records_outcome_and_completes() {
        let store = store().await;
        let known = std::collections::HashSet::from(["web_search".to_string()]);
        let template = template();
        store.save(template.clone(), &known).await.unwrap();

        let registry = Arc::new(NodeRegistry::with_builtins());
        let llm = Arc::new(MockLlmClient::fixed(plan_json()));
        let designer = Arc::new(DesignerStage::new(registry, store.clone(), llm));
        let optimizer = OptimizerStage::new(store.clone(), designer);

        let executor_outcome = ExecutorOutcome {
            steps: vec![StepOutcome { step_name: "a".to_string(), node_name: "web_search".to_string(), outputs: serde_json::Map::new() }],
        };
        let outcome = optimizer
            .handle_result(&template, Ok(&executor_outcome), "q", SessionId::now_v7(), false, chrono::Utc::now())
            .await;
        assert!(matches!(outcome, OptimizerOutcome::Completed));

        let stored = store.get(&template.id).await.unwrap();
        assert_eq!(stored.usage_count, 1);
        assert_eq!(stored.success_rate, 1.0);
    }

    #[tokio::test]
    async fn denied_permission_does_not_trigger_redesign() {
        let store = store().await;
        let known = std::collections::HashSet::from(["web_search".to_string()]);
        let template = template();
        store.save(template.clone(), &known).await.unwrap();

        let registry = Arc::new(NodeRegistry::with_builtins());
        let llm = Arc::new(MockLlmClient::fixed(plan_json()));
        let designer = Arc::new(DesignerStage::new(registry, store.clone(), llm));
        let optimizer = OptimizerStage::new(store.clone(), designer);

        let outcome = optimizer
            .handle_result(
                &template,
                Err(TerminalErrorKind::PermissionDenied),
                "q",
                SessionId::now_v7(),
                false,
                chrono::Utc::now(),
            )
            .await;
        assert!(matches!(outcome, OptimizerOutcome::Failed(TerminalErrorKind::PermissionDenied)));

        let stored = store.get(&template.id).await.unwrap();
        assert_eq!(stored.usage_count, 0, "user-choice outcomes must not count against the template");
    }

    #[tokio::test]
    async fn capability_failure_triggers_a_single_redesign() {
        let store = store().await;
        let known = std::collections::HashSet::from(["web_search".to_string()]);
        let template = template();
        store.save(template.clone(), &known).await.unwrap();

        let registry = Arc::new(NodeRegistry::with_builtins());
        let llm = Arc::new(MockLlmClient::fixed(plan_json()));
        let designer = Arc::new(DesignerStage::new(registry, store.clone(), llm));
        let optimizer = OptimizerStage::new(store.clone(), designer);

        let outcome = optimizer
            .handle_result(
                &template,
                Err(TerminalErrorKind::CapabilityFailed),
                "q",
                SessionId::now_v7(),
                false,
                chrono::Utc::now(),
            )
            .await;
        assert!(matches!(outcome, OptimizerOutcome::Redesigned(_)));

        let second = optimizer
            .handle_result(
                &template,
                Err(TerminalErrorKind::CapabilityFailed),
                "q",
                SessionId::now_v7(),
                true,
                chrono::Utc::now(),
            )
            .await;
        assert!(matches!(second, OptimizerOutcome::Failed(TerminalErrorKind::CapabilityFailed)));
    }
}
