//! Core domain entities shared across the orchestrator (spec §3).

use crate::{PermissionRequestId, QuestionId, SessionId, TemplateId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Broad functional grouping for a registered node, used by the Designer to
/// narrow candidate capabilities before asking the LLM to pick one (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Search,
    Analysis,
    Communication,
    Booking,
    Payment,
    Transformation,
    Creation,
    Utility,
}

/// How much user sign-off a node's invocation requires before the Executor
/// may run it (§4.1, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionTier {
    /// No confirmation needed; runs as soon as scheduled.
    None,
    /// Logged but not gated; reversible, low-stakes actions.
    Basic,
    /// Requires an explicit permission grant before the Executor may proceed.
    Sensitive,
    /// Requires an explicit permission grant; irreversible or high-stakes
    /// (e.g. payment capture).
    Critical,
}

impl PermissionTier {
    /// Whether this tier gates execution on a permission request (§4.4).
    pub fn requires_permission(&self) -> bool {
        matches!(self, PermissionTier::Sensitive | PermissionTier::Critical)
    }
}

/// A single `{inputs -> outputs}` few-shot pair attached to a `NodeDescriptor`
/// for the Designer's prompt material (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExample {
    pub inputs: serde_json::Map<String, serde_json::Value>,
    pub outputs: serde_json::Map<String, serde_json::Value>,
}

/// Static description of a capability the registry exposes to the Designer
/// (§4.1). Distinct from the adapter implementation itself: this is the
/// metadata the planner reasons over. `invoke` names the registered
/// `CapabilityAdapter` this descriptor is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub permission_tier: PermissionTier,
    /// Declared input keys, drawn from the scratchpad by convention (not
    /// type-checked here; enforced by each adapter's own `prepare` phase).
    pub inputs: Vec<String>,
    /// Declared output keys written into the scratchpad on success.
    pub outputs: Vec<String>,
    pub examples: Vec<NodeExample>,
    pub estimated_cost: f64,
    pub estimated_time_seconds: f64,
    pub invoke: String,
}

/// One step of a `WorkflowTemplate` (§4.3). `bound_inputs` maps the node's
/// declared input keys to either a literal JSON value or a reference to an
/// earlier step's scratchpad key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateStep {
    pub step_name: String,
    pub node_name: String,
    pub bound_inputs: HashMap<String, String>,
    pub declared_outputs: Vec<String>,
    /// Whether this step, as planned, needs a permission grant to run. This
    /// mirrors the node's `PermissionTier` at plan time; it can't be lowered
    /// by the Designer, only raised.
    pub requires_permission: bool,
}

/// A directed dependency between two steps of a `WorkflowTemplate` (§4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub action_label: String,
}

/// A content-addressed, reusable execution plan (§4.3). Two designer outputs
/// with identical `steps`/`edges` always resolve to the same `TemplateId` and
/// the same stored `WorkflowTemplate`, which is how repeated requests
/// accumulate a track record instead of forking duplicate entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: TemplateId,
    pub name: String,
    pub description: String,
    /// The original question this template was designed to answer.
    pub question_pattern: String,
    pub steps: Vec<TemplateStep>,
    pub edges: Vec<Edge>,
    /// Declared keys this template reads/writes; informational (§3).
    pub shared_store_schema: Vec<String>,
    /// Free-text tokens derived from the categories of nodes present, used
    /// by the similarity index (§4.3).
    pub tags: Vec<String>,
    /// `successes / usageCount`, maintained as an EMA after the first use.
    pub success_rate: f64,
    pub usage_count: u64,
    pub created_at: Timestamp,
    pub last_used_at: Timestamp,
    /// Append-only feedback absorbed by the Optimizer (§4.8). Never alters
    /// the template's structure.
    pub feedback: Vec<String>,
}

impl WorkflowTemplate {
    /// Weight applied to a fresh execution outcome when folding it into
    /// `success_rate` for templates with more than one use (spec §4.3:
    /// `successRate' = successRate * 0.7 + outcome * 0.3`). The very first
    /// use sets `success_rate` to the outcome directly.
    pub const SUCCESS_RATE_OUTCOME_WEIGHT: f64 = 0.3;

    /// Fold a single execution outcome (1.0 success, 0.0 failure) into the
    /// template's running success rate and bump usage bookkeeping.
    pub fn record_outcome(&mut self, outcome: f64, at: Timestamp) {
        self.success_rate = if self.usage_count == 0 {
            outcome
        } else {
            self.success_rate * (1.0 - Self::SUCCESS_RATE_OUTCOME_WEIGHT)
                + outcome * Self::SUCCESS_RATE_OUTCOME_WEIGHT
        };
        self.usage_count += 1;
        self.last_used_at = at;
    }
}

/// Lifecycle state of a `PermissionRequest` (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Pending,
    Granted,
    Denied,
    Expired,
    Cancelled,
}

impl PermissionState {
    /// Whether the request has left `Pending` and can no longer transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PermissionState::Pending)
    }
}

/// A single ask for the user to approve or deny a sensitive/critical node
/// invocation (§4.4). `details` describes the action (amount, recipient,
/// scope, ...) and is what gets canonicalized into a coalescing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: PermissionRequestId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub operation: String,
    pub details: serde_json::Map<String, serde_json::Value>,
    pub tier: PermissionTier,
    pub state: PermissionState,
    pub created_at: Timestamp,
    pub decided_at: Option<Timestamp>,
    pub expires_at: Timestamp,
    pub reason: Option<String>,
}

/// Which orchestration stage currently owns a session (§4.5-§4.8, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Designing,
    Executing,
    AwaitingUser,
    AwaitingPermission,
    Optimizing,
    Terminal,
}

/// Full mutable state for one conversation (§4.6). A session owns exactly
/// one in-flight template execution at a time; the Designer, Executor,
/// Interaction and Optimizer stages all operate on the same `Session`
/// sequentially within a single `tokio::spawn`ed task (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub scratchpad: crate::scratchpad::Scratchpad,
    pub current_template: Option<WorkflowTemplate>,
    pub current_step_index: Option<usize>,
    pub pending_questions: Vec<QuestionId>,
    pub pending_permissions: Vec<PermissionRequestId>,
    pub phase: SessionPhase,
    pub created_at: Timestamp,
}

impl Session {
    pub fn new(id: SessionId, user_id: UserId, created_at: Timestamp) -> Self {
        Self {
            id,
            user_id,
            scratchpad: crate::scratchpad::Scratchpad::new(),
            current_template: None,
            current_step_index: None,
            pending_questions: Vec::new(),
            pending_permissions: Vec::new(),
            phase: SessionPhase::Idle,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn blank_template(success_rate: f64, usage_count: u64) -> WorkflowTemplate {
        let now = Utc::now();
        WorkflowTemplate {
            id: TemplateId::from_canonical_bytes(b"t"),
            name: "test".into(),
            description: String::new(),
            question_pattern: String::new(),
            steps: vec![],
            edges: vec![],
            shared_store_schema: vec![],
            tags: vec![],
            success_rate,
            usage_count,
            created_at: now,
            last_used_at: now,
            feedback: vec![],
        }
    }

    #[test]
    fn permission_tier_gating() {
        assert!(!PermissionTier::None.requires_permission());
        assert!(!PermissionTier::Basic.requires_permission());
        assert!(PermissionTier::Sensitive.requires_permission());
        assert!(PermissionTier::Critical.requires_permission());
    }

    #[test]
    fn first_use_sets_success_rate_to_outcome() {
        let now = Utc::now();
        let mut template = blank_template(0.0, 0);
        template.record_outcome(1.0, now);
        assert_eq!(template.success_rate, 1.0);
        assert_eq!(template.usage_count, 1);
    }

    #[test]
    fn subsequent_use_folds_as_ema() {
        let now = Utc::now();
        let mut template = blank_template(1.0, 1);
        template.record_outcome(0.0, now);
        assert!((template.success_rate - 0.7).abs() < 1e-9);
        assert_eq!(template.usage_count, 2);
    }

    #[test]
    fn permission_state_terminality() {
        assert!(!PermissionState::Pending.is_terminal());
        assert!(PermissionState::Granted.is_terminal());
        assert!(PermissionState::Denied.is_terminal());
        assert!(PermissionState::Expired.is_terminal());
        assert!(PermissionState::Cancelled.is_terminal());
    }

    #[test]
    fn new_session_starts_idle() {
        let session = Session::new(SessionId::now_v7(), UserId::now_v7(), Utc::now());
        assert_eq!(session.phase, SessionPhase::Idle);
        assert!(session.current_template.is_none());
        assert!(session.current_step_index.is_none());
    }
}
