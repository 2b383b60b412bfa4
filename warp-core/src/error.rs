//! Error taxonomy for the workflow orchestrator (spec §7).
//!
//! Each error kind below carries its own propagation policy, encoded in the
//! component that raises it rather than here; this module only defines the
//! shapes so every layer can match on them uniformly.

use crate::{PermissionRequestId, QuestionId, SessionId};
use thiserror::Error;

/// Registry errors, raised during startup or registration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a descriptor named '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("no node registered under the name '{name}'")]
    NotFound { name: String },

    #[error("descriptor '{name}' has an invalid definition: {reason}")]
    InvalidDescriptor { name: String, reason: String },
}

/// Capability adapter errors (§4.2), surfaced through the Executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("invalid input for step '{step_name}': {reason}")]
    InvalidInput { step_name: String, reason: String },

    #[error("transient failure invoking '{node_name}': {reason}")]
    Transient { node_name: String, reason: String },

    #[error("capability '{node_name}' failed after retries: {reason}")]
    Failed { node_name: String, reason: String },
}

/// Designer-stage errors (§4.5).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DesignError {
    #[error("designer produced an invalid plan after {attempts} attempt(s): {reason}")]
    DesignFailed { attempts: u32, reason: String },
}

/// Permission manager errors (§4.4).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("permission request {0:?} not found")]
    NotFound(PermissionRequestId),

    #[error("permission request {0:?} was already decided")]
    AlreadyDecided(PermissionRequestId),
}

/// Session-protocol / interaction errors (§4.7).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InteractionError {
    #[error("no waiter registered for question {0:?}")]
    UnroutedQuestion(QuestionId),

    #[error("no waiter registered for permission request {0:?}")]
    UnroutedPermission(PermissionRequestId),
}

/// Workflow Store errors (§4.3). `StoreIo` is explicitly non-fatal: callers
/// log it and continue (§7), so it never appears inside `OrchestratorError`
/// as an execution-halting variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("template is rejected: {reason}")]
    InvalidTemplate { reason: String },

    #[error("template not found")]
    NotFound,

    #[error("store I/O failure: {reason}")]
    Io { reason: String },
}

/// LLM provider errors (ambient, §4.9).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("no LLM provider configured")]
    ProviderNotConfigured,

    #[error("request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Configuration errors (ambient, §4.10). Always fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Execution-terminating error kinds as carried through the Executor →
/// Optimizer handoff (§4.8, §7). This is distinct from the top-level
/// `OrchestratorError` aggregate: it is the *payload* describing why a
/// session ended, not a `Result::Err` a function returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalErrorKind {
    InvalidInput,
    CapabilityFailed,
    PermissionDenied,
    PermissionExpired,
    UserCancelled,
    SessionCancelled,
    DesignFailed,
}

impl std::fmt::Display for TerminalErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TerminalErrorKind::InvalidInput => "invalid_input",
            TerminalErrorKind::CapabilityFailed => "capability_failed",
            TerminalErrorKind::PermissionDenied => "permission_denied",
            TerminalErrorKind::PermissionExpired => "permission_expired",
            TerminalErrorKind::UserCancelled => "user_cancelled",
            TerminalErrorKind::SessionCancelled => "session_cancelled",
            TerminalErrorKind::DesignFailed => "design_failed",
        };
        write!(f, "{}", label)
    }
}

impl TerminalErrorKind {
    /// Whether the Store should be told the template failed (§4.8, §7). User
    /// choice (denial/expiry) and cancellation are never held against a
    /// template's success rate.
    pub fn counts_as_template_failure(&self) -> bool {
        !matches!(
            self,
            TerminalErrorKind::PermissionDenied
                | TerminalErrorKind::PermissionExpired
                | TerminalErrorKind::UserCancelled
                | TerminalErrorKind::SessionCancelled
        )
    }

    /// Whether the Optimizer should attempt exactly one Designer redesign
    /// pass before giving up (§4.8).
    pub fn warrants_redesign(&self) -> bool {
        matches!(
            self,
            TerminalErrorKind::InvalidInput
                | TerminalErrorKind::DesignFailed
                | TerminalErrorKind::CapabilityFailed
        )
    }
}

/// Master error type for all orchestrator operations.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("design error: {0}")]
    Design(#[from] DesignError),

    #[error("permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("interaction error: {0}")]
    Interaction(#[from] InteractionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("session {session_id:?} was cancelled")]
    SessionCancelled { session_id: SessionId },
}

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_failure_policy_excludes_user_choice_and_cancellation() {
        assert!(TerminalErrorKind::CapabilityFailed.counts_as_template_failure());
        assert!(TerminalErrorKind::InvalidInput.counts_as_template_failure());
        assert!(!TerminalErrorKind::PermissionDenied.counts_as_template_failure());
        assert!(!TerminalErrorKind::PermissionExpired.counts_as_template_failure());
        assert!(!TerminalErrorKind::UserCancelled.counts_as_template_failure());
        assert!(!TerminalErrorKind::SessionCancelled.counts_as_template_failure());
    }

    #[test]
    fn redesign_policy_covers_only_recoverable_kinds() {
        assert!(TerminalErrorKind::InvalidInput.warrants_redesign());
        assert!(TerminalErrorKind::DesignFailed.warrants_redesign());
        assert!(TerminalErrorKind::CapabilityFailed.warrants_redesign());
        assert!(!TerminalErrorKind::PermissionDenied.warrants_redesign());
        assert!(!TerminalErrorKind::SessionCancelled.warrants_redesign());
    }

    #[test]
    fn terminal_error_kind_displays_as_snake_case() {
        assert_eq!(TerminalErrorKind::CapabilityFailed.to_string(), "capability_failed");
    }

    #[test]
    fn orchestrator_error_wraps_component_errors() {
        let err: OrchestratorError = StoreError::NotFound.into();
        assert!(matches!(err, OrchestratorError::Store(StoreError::NotFound)));
    }
}
