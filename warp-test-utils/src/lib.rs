//! Warp Test Utilities
//!
//! Centralized test infrastructure for the Warp workspace:
//! - Proptest generators for all entity types
//! - A deterministic mock capability adapter
//! - Test fixtures for common scenarios
//! - Custom assertions for orchestrator-specific validation

// Re-export core types for convenience.
pub use warp_core::{
    Category, Edge, EntityIdType, NodeDescriptor, NodeExample, OrchestratorError,
    OrchestratorResult, PermissionRequest, PermissionState, PermissionTier, Scratchpad, Session,
    SessionPhase, TemplateStep, Timestamp, WorkflowTemplate,
    // Strongly-typed entity IDs
    PermissionRequestId, QuestionId, SessionId, TemplateId, UserId,
    // Error taxonomy
    CapabilityError, ConfigError, DesignError, InteractionError, LlmError, PermissionError,
    RegistryError, StoreError, TerminalErrorKind,
};
pub use warp_registry::{AdapterRegistry, CapabilityAdapter, CommitOutcome, NodeRegistry, PreparedInputs};
pub use warp_store::{FsWorkflowStore, WorkflowStore};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

// ============================================================================
// MOCK ADAPTER
// ============================================================================

/// A deterministic capability adapter for tests that don't care what a node
/// actually does, only that the Executor can invoke one and get back
/// predictable outputs. Mirrors the shape of the built-in adapters in
/// `warp-registry` but never performs any I/O and never fails unless asked.
#[derive(Clone)]
pub struct MockCapabilityAdapter {
    name: String,
    outputs: Map<String, Value>,
    fail_with: Option<CapabilityError>,
}

impl MockCapabilityAdapter {
    /// An adapter that always succeeds, writing `outputs` verbatim.
    pub fn succeeding(name: impl Into<String>, outputs: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            outputs,
            fail_with: None,
        }
    }

    /// An adapter that always fails with the given error.
    pub fn failing(name: impl Into<String>, error: CapabilityError) -> Self {
        Self {
            name: name.into(),
            outputs: Map::new(),
            fail_with: Some(error),
        }
    }
}

#[async_trait]
impl CapabilityAdapter for MockCapabilityAdapter {
    fn node_name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, inputs: PreparedInputs) -> Result<PreparedInputs, CapabilityError> {
        Ok(inputs)
    }

    async fn run(
        &self,
        _prepared: PreparedInputs,
        _cancel: CancellationToken,
    ) -> Result<Value, CapabilityError> {
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(Value::Object(self.outputs.clone())),
        }
    }

    fn commit(
        &self,
        _prepared: &PreparedInputs,
        _result: &Value,
    ) -> Result<CommitOutcome, CapabilityError> {
        Ok(CommitOutcome::new(self.outputs.clone()))
    }
}

use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Warp entity types.

    use super::*;
    use proptest::prelude::*;

    // === Identity Type Generators ===

    /// Generate a random UUID (for generic ID generation).
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a valid UUIDv7 (timestamp-sortable).
    pub fn arb_uuid_v7() -> impl Strategy<Value = Uuid> {
        Just(()).prop_map(|_| Uuid::now_v7())
    }

    /// Generate a random SessionId.
    pub fn arb_session_id() -> impl Strategy<Value = SessionId> {
        arb_uuid().prop_map(SessionId::new)
    }

    /// Generate a random UserId.
    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        arb_uuid().prop_map(UserId::new)
    }

    /// Generate a random PermissionRequestId.
    pub fn arb_permission_request_id() -> impl Strategy<Value = PermissionRequestId> {
        arb_uuid().prop_map(PermissionRequestId::new)
    }

    /// Generate a random QuestionId.
    pub fn arb_question_id() -> impl Strategy<Value = QuestionId> {
        arb_uuid().prop_map(QuestionId::new)
    }

    /// Generate a content-addressed TemplateId from arbitrary bytes.
    pub fn arb_template_id() -> impl Strategy<Value = TemplateId> {
        prop::collection::vec(any::<u8>(), 1..64)
            .prop_map(|bytes| TemplateId::from_canonical_bytes(&bytes))
    }

    /// Generate a Timestamp within a reasonable range (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    // === Enum Generators ===

    /// Generate a Category variant.
    pub fn arb_category() -> impl Strategy<Value = Category> {
        prop_oneof![
            Just(Category::Search),
            Just(Category::Analysis),
            Just(Category::Communication),
            Just(Category::Booking),
            Just(Category::Payment),
            Just(Category::Transformation),
            Just(Category::Creation),
            Just(Category::Utility),
        ]
    }

    /// Generate a PermissionTier variant.
    pub fn arb_permission_tier() -> impl Strategy<Value = PermissionTier> {
        prop_oneof![
            Just(PermissionTier::None),
            Just(PermissionTier::Basic),
            Just(PermissionTier::Sensitive),
            Just(PermissionTier::Critical),
        ]
    }

    /// Generate a PermissionState variant.
    pub fn arb_permission_state() -> impl Strategy<Value = PermissionState> {
        prop_oneof![
            Just(PermissionState::Pending),
            Just(PermissionState::Granted),
            Just(PermissionState::Denied),
            Just(PermissionState::Expired),
            Just(PermissionState::Cancelled),
        ]
    }

    /// Generate a SessionPhase variant.
    pub fn arb_session_phase() -> impl Strategy<Value = SessionPhase> {
        prop_oneof![
            Just(SessionPhase::Idle),
            Just(SessionPhase::Designing),
            Just(SessionPhase::Executing),
            Just(SessionPhase::AwaitingUser),
            Just(SessionPhase::AwaitingPermission),
            Just(SessionPhase::Optimizing),
            Just(SessionPhase::Terminal),
        ]
    }

    /// Generate a TerminalErrorKind variant.
    pub fn arb_terminal_error_kind() -> impl Strategy<Value = TerminalErrorKind> {
        prop_oneof![
            Just(TerminalErrorKind::InvalidInput),
            Just(TerminalErrorKind::CapabilityFailed),
            Just(TerminalErrorKind::PermissionDenied),
            Just(TerminalErrorKind::PermissionExpired),
            Just(TerminalErrorKind::UserCancelled),
            Just(TerminalErrorKind::SessionCancelled),
            Just(TerminalErrorKind::DesignFailed),
        ]
    }

    // === Struct Generators ===

    /// Generate a NodeExample struct with a single string field each way.
    pub fn arb_node_example() -> impl Strategy<Value = NodeExample> {
        ("[a-z_]{3,10}", "[a-zA-Z0-9 ]{1,30}").prop_map(|(key, value)| {
            let mut inputs = Map::new();
            inputs.insert(key.clone(), Value::String(value.clone()));
            let mut outputs = Map::new();
            outputs.insert(format!("{key}_result"), Value::String(value));
            NodeExample { inputs, outputs }
        })
    }

    /// Generate a NodeDescriptor with a node name drawn from a fixed pool of
    /// built-in names, so generated templates can bind against a real
    /// registry when one is needed.
    pub fn arb_node_descriptor() -> impl Strategy<Value = NodeDescriptor> {
        (
            "[a-z][a-z_]{2,20}",
            "[a-zA-Z0-9 .,]{1,80}",
            arb_category(),
            arb_permission_tier(),
            prop::collection::vec("[a-z_]{2,12}", 0..4),
            prop::collection::vec("[a-z_]{2,12}", 0..4),
            prop::collection::vec(arb_node_example(), 0..3),
            0.0f64..100.0,
            0.1f64..60.0,
        )
            .prop_map(
                |(name, description, category, permission_tier, inputs, outputs, examples, estimated_cost, estimated_time_seconds)| {
                    NodeDescriptor {
                        invoke: name.clone(),
                        name,
                        description,
                        category,
                        permission_tier,
                        inputs,
                        outputs,
                        examples,
                        estimated_cost,
                        estimated_time_seconds,
                    }
                },
            )
    }

    /// Generate a TemplateStep bound to an arbitrary node name.
    pub fn arb_template_step() -> impl Strategy<Value = TemplateStep> {
        (
            "[a-z][a-z_]{2,20}",
            "[a-z][a-z_]{2,20}",
            prop::collection::hash_map("[a-z_]{2,12}", "[a-z_]{2,12}", 0..4),
            prop::collection::vec("[a-z_]{2,12}", 0..4),
            any::<bool>(),
        )
            .prop_map(
                |(step_name, node_name, bound_inputs, declared_outputs, requires_permission)| {
                    TemplateStep {
                        step_name,
                        node_name,
                        bound_inputs,
                        declared_outputs,
                        requires_permission,
                    }
                },
            )
    }

    /// Generate an Edge between two free-form step names.
    pub fn arb_edge() -> impl Strategy<Value = Edge> {
        ("[a-z][a-z_]{2,20}", "[a-z][a-z_]{2,20}", "[a-z_]{2,12}")
            .prop_map(|(from, to, action_label)| Edge { from, to, action_label })
    }

    /// Generate a standalone `WorkflowTemplate` with no edges between its
    /// steps (a valid, if trivial, DAG).
    pub fn arb_workflow_template() -> impl Strategy<Value = WorkflowTemplate> {
        (
            "[a-zA-Z0-9_]{1,40}",
            "[a-zA-Z0-9 .,]{1,200}",
            "[a-zA-Z0-9 ?]{1,200}",
            prop::collection::vec(arb_template_step(), 1..5),
            prop::collection::vec("[a-z_]{2,12}", 0..5),
            prop::collection::vec("[a-z_]{2,6}", 0..4),
            0.0f64..1.0,
            0u64..1000,
            arb_timestamp(),
        )
            .prop_map(
                |(name, description, question_pattern, steps, shared_store_schema, tags, success_rate, usage_count, created_at)| {
                    let canonical = format!("{name}:{description}");
                    WorkflowTemplate {
                        id: TemplateId::from_canonical_bytes(canonical.as_bytes()),
                        name,
                        description,
                        question_pattern,
                        steps,
                        edges: vec![],
                        shared_store_schema,
                        tags,
                        success_rate,
                        usage_count,
                        created_at,
                        last_used_at: created_at,
                        feedback: vec![],
                    }
                },
            )
    }

    /// Generate a PermissionRequest for an arbitrary session/user pair.
    pub fn arb_permission_request(
        session_id: SessionId,
        user_id: UserId,
    ) -> impl Strategy<Value = PermissionRequest> {
        (
            arb_permission_request_id(),
            "[a-z_]{3,20}",
            "[a-zA-Z0-9 .,]{1,80}",
            arb_permission_tier(),
            arb_permission_state(),
            arb_timestamp(),
        )
            .prop_map(
                move |(id, operation, detail_value, tier, state, created_at)| {
                    let mut details = Map::new();
                    details.insert("detail".to_string(), Value::String(detail_value));
                    PermissionRequest {
                        id,
                        user_id,
                        session_id,
                        operation,
                        details,
                        tier,
                        state,
                        created_at,
                        decided_at: None,
                        expires_at: created_at + chrono::Duration::seconds(300),
                        reason: None,
                    }
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// Create a blank, idle Session for testing.
    pub fn idle_session() -> Session {
        Session::new(SessionId::now_v7(), UserId::now_v7(), Utc::now())
    }

    /// Create a minimal single-step WorkflowTemplate bound to `node_name`,
    /// with no edges (the Executor's default fallback action applies).
    pub fn single_step_template(node_name: &str) -> WorkflowTemplate {
        let now = Utc::now();
        let step_name = format!("{node_name}_step");
        let steps = vec![TemplateStep {
            step_name: step_name.clone(),
            node_name: node_name.to_string(),
            bound_inputs: HashMap::new(),
            declared_outputs: vec![],
            requires_permission: false,
        }];
        let canonical = format!("{node_name}:single_step");
        WorkflowTemplate {
            id: TemplateId::from_canonical_bytes(canonical.as_bytes()),
            name: format!("{node_name} plan"),
            description: format!("single-step plan invoking {node_name}"),
            question_pattern: String::new(),
            steps,
            edges: vec![],
            shared_store_schema: vec![],
            tags: vec![node_name.to_string()],
            success_rate: 0.0,
            usage_count: 0,
            created_at: now,
            last_used_at: now,
            feedback: vec![],
        }
    }

    /// Create a pending PermissionRequest for a given session/user pair.
    pub fn pending_permission(session_id: SessionId, user_id: UserId, tier: PermissionTier) -> PermissionRequest {
        let now = Utc::now();
        PermissionRequest {
            id: PermissionRequestId::now_v7(),
            user_id,
            session_id,
            operation: "test_operation".to_string(),
            details: Map::new(),
            tier,
            state: PermissionState::Pending,
            created_at: now,
            decided_at: None,
            expires_at: now + chrono::Duration::seconds(300),
            reason: None,
        }
    }

    /// Create a NodeDescriptor for a no-op utility node, useful whenever a
    /// test only needs a descriptor to exist without caring about its
    /// content.
    pub fn blank_node_descriptor(name: &str) -> NodeDescriptor {
        NodeDescriptor {
            name: name.to_string(),
            description: format!("test descriptor for {name}"),
            category: Category::Utility,
            permission_tier: PermissionTier::None,
            inputs: vec![],
            outputs: vec![],
            examples: vec![],
            estimated_cost: 0.0,
            estimated_time_seconds: 0.1,
            invoke: name.to_string(),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for orchestrator-specific validation.

    use super::*;

    /// Assert that an `OrchestratorResult` is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &OrchestratorResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that an `OrchestratorResult` is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &OrchestratorResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that an `OrchestratorResult` is a Store error.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &OrchestratorResult<T>) {
        match result {
            Err(OrchestratorError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert that an `OrchestratorResult` is a Registry error.
    #[track_caller]
    pub fn assert_registry_error<T: std::fmt::Debug>(result: &OrchestratorResult<T>) {
        match result {
            Err(OrchestratorError::Registry(_)) => {}
            other => panic!("Expected Registry error, got: {:?}", other),
        }
    }

    /// Assert that an `OrchestratorResult` is a Permission error.
    #[track_caller]
    pub fn assert_permission_error<T: std::fmt::Debug>(result: &OrchestratorResult<T>) {
        match result {
            Err(OrchestratorError::Permission(_)) => {}
            other => panic!("Expected Permission error, got: {:?}", other),
        }
    }

    /// Assert that an `OrchestratorResult` is a Design error.
    #[track_caller]
    pub fn assert_design_error<T: std::fmt::Debug>(result: &OrchestratorResult<T>) {
        match result {
            Err(OrchestratorError::Design(_)) => {}
            other => panic!("Expected Design error, got: {:?}", other),
        }
    }

    /// Assert that an `OrchestratorResult` is a Capability error.
    #[track_caller]
    pub fn assert_capability_error<T: std::fmt::Debug>(result: &OrchestratorResult<T>) {
        match result {
            Err(OrchestratorError::Capability(_)) => {}
            other => panic!("Expected Capability error, got: {:?}", other),
        }
    }

    /// Assert that an `OrchestratorResult` is an Llm error.
    #[track_caller]
    pub fn assert_llm_error<T: std::fmt::Debug>(result: &OrchestratorResult<T>) {
        match result {
            Err(OrchestratorError::Llm(_)) => {}
            other => panic!("Expected Llm error, got: {:?}", other),
        }
    }

    /// Assert that an `OrchestratorResult` is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &OrchestratorResult<T>) {
        match result {
            Err(OrchestratorError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a template's success rate sits within `[min, max]`.
    #[track_caller]
    pub fn assert_success_rate_in_range(template: &WorkflowTemplate, min: f64, max: f64) {
        assert!(
            template.success_rate >= min && template.success_rate <= max,
            "success_rate {} not in range [{}, {}]",
            template.success_rate,
            min,
            max
        );
    }

    /// Assert that a Session is in the expected phase.
    #[track_caller]
    pub fn assert_session_phase(session: &Session, expected: SessionPhase) {
        assert_eq!(
            session.phase, expected,
            "Session phase mismatch: expected {:?}, got {:?}",
            expected, session.phase
        );
    }

    /// Assert that a PermissionRequest is in the expected state.
    #[track_caller]
    pub fn assert_permission_state(request: &PermissionRequest, expected: PermissionState) {
        assert_eq!(
            request.state, expected,
            "PermissionRequest state mismatch: expected {:?}, got {:?}",
            expected, request.state
        );
    }

    /// Assert that a terminal error kind's template-failure policy matches
    /// `expected` (a thin wrapper kept mainly for readable failure output).
    #[track_caller]
    pub fn assert_counts_as_template_failure(kind: &TerminalErrorKind, expected: bool) {
        assert_eq!(
            kind.counts_as_template_failure(),
            expected,
            "counts_as_template_failure() mismatch for {:?}",
            kind
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn idle_session_fixture_starts_idle() {
        let session = fixtures::idle_session();
        assertions::assert_session_phase(&session, SessionPhase::Idle);
        assert!(session.current_template.is_none());
    }

    #[test]
    fn single_step_template_fixture_has_one_step() {
        let template = fixtures::single_step_template("web_search");
        assert_eq!(template.steps.len(), 1);
        assert_eq!(template.steps[0].node_name, "web_search");
    }

    #[test]
    fn pending_permission_fixture_is_pending() {
        let request = fixtures::pending_permission(SessionId::now_v7(), UserId::now_v7(), PermissionTier::Critical);
        assertions::assert_permission_state(&request, PermissionState::Pending);
        assert_eq!(request.tier, PermissionTier::Critical);
    }

    #[test]
    fn mock_adapter_succeeds_with_configured_outputs() {
        let mut outputs = Map::new();
        outputs.insert("result".to_string(), Value::String("ok".to_string()));
        let adapter = MockCapabilityAdapter::succeeding("mock", outputs.clone());
        assert_eq!(adapter.node_name(), "mock");
        let prepared = adapter.prepare(Map::new()).unwrap();
        assert!(prepared.is_empty());
    }

    #[test]
    fn assertion_template_failure_policy() {
        assertions::assert_counts_as_template_failure(&TerminalErrorKind::CapabilityFailed, true);
        assertions::assert_counts_as_template_failure(&TerminalErrorKind::PermissionDenied, false);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_session_id_round_trips(id in generators::arb_session_id()) {
            let text = id.to_string();
            let back: SessionId = text.parse().expect("valid SessionId should parse");
            prop_assert_eq!(id, back);
        }

        #[test]
        fn prop_generated_template_has_at_least_one_step(template in generators::arb_workflow_template()) {
            prop_assert!(!template.steps.is_empty());
        }

        #[test]
        fn prop_generated_permission_tier_gating_is_consistent(tier in generators::arb_permission_tier()) {
            let requires = tier.requires_permission();
            match tier {
                PermissionTier::Sensitive | PermissionTier::Critical => prop_assert!(requires),
                PermissionTier::None | PermissionTier::Basic => prop_assert!(!requires),
            }
        }

        #[test]
        fn prop_generated_node_descriptor_invoke_matches_name(descriptor in generators::arb_node_descriptor()) {
            prop_assert_eq!(&descriptor.invoke, &descriptor.name);
        }
    }
}
