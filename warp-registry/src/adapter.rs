//! Capability adapter contract: the uniform three-phase façade the Executor
//! drives over heterogeneous node implementations (spec §4.2).

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use warp_core::CapabilityError;

/// Output of `prepare`: the node's typed inputs, projected from the
/// scratchpad plus the step's bindings. Kept as a JSON object since each
/// built-in adapter interprets its own shape; a future adapter with a richer
/// typed input would wrap this rather than replace it.
pub type PreparedInputs = Map<String, Value>;

/// Output of `run`: whatever the capability produced, before `commit`
/// decides which scratchpad keys it lands on.
pub type CapabilityResult = Value;

/// A three-phase capability invocation (spec §4.2).
///
/// `run` must be idempotent on retry: the Executor retries transient
/// failures with backoff (§4.6), so any side effect a `run` performs (an
/// API call, a charge) must be safe to repeat, or the adapter must
/// internally de-duplicate.
#[async_trait]
pub trait CapabilityAdapter: Send + Sync {
    /// The node name this adapter is registered under; must match the
    /// `invoke` field of exactly one `NodeDescriptor`.
    fn node_name(&self) -> &str;

    /// Pure projection of resolved scratchpad inputs into this node's typed
    /// inputs. May fail with `InvalidInput` if a required key is absent or
    /// malformed.
    fn prepare(&self, inputs: PreparedInputs) -> Result<PreparedInputs, CapabilityError>;

    /// The actual work. May perform I/O. `cancel` is observed cooperatively:
    /// long-running adapters should select against it and return promptly
    /// when it fires (§5 cancellation).
    async fn run(
        &self,
        prepared: PreparedInputs,
        cancel: CancellationToken,
    ) -> Result<CapabilityResult, CapabilityError>;

    /// Writes declared outputs into the scratchpad (handled by the caller
    /// using the keys this returns) and selects the next action label
    /// consumed by the edge selector. Returning `None` is equivalent to
    /// `"default"` (§4.2).
    fn commit(
        &self,
        prepared: &PreparedInputs,
        result: &CapabilityResult,
    ) -> Result<CommitOutcome, CapabilityError>;
}

/// Result of a `commit` call: the key-value pairs to write into the
/// scratchpad and the action label selecting the next edge.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub outputs: Map<String, Value>,
    pub next_action: Option<String>,
}

impl CommitOutcome {
    pub fn new(outputs: Map<String, Value>) -> Self {
        Self {
            outputs,
            next_action: None,
        }
    }

    pub fn with_action(outputs: Map<String, Value>, action: impl Into<String>) -> Self {
        Self {
            outputs,
            next_action: Some(action.into()),
        }
    }

    /// The action label to match against outgoing edges, defaulting to
    /// `"default"` per §4.2.
    pub fn action_label(&self) -> &str {
        self.next_action.as_deref().unwrap_or("default")
    }
}
