//! Node registry and capability adapters for the Warp workflow orchestrator
//! (spec §4.1, §4.2).

pub mod adapter;
pub mod builtins;
mod registry;

pub use adapter::{CapabilityAdapter, CapabilityResult, CommitOutcome, PreparedInputs};
pub use registry::{NodeManifestEntry, NodeRegistry, RegistryManifest};

use std::collections::HashMap;
use std::sync::Arc;

/// A registry of capability adapters, keyed by node name. Built alongside a
/// `NodeRegistry` of descriptors; the Executor looks a step's `node_name` up
/// here to find the adapter its `invoke` field names.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn CapabilityAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn CapabilityAdapter>) {
        self.adapters.insert(adapter.node_name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CapabilityAdapter>> {
        self.adapters.get(name)
    }

    /// Build the registry of built-in demo adapters shipped with the
    /// runtime (§4.2).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(builtins::WebSearch));
        registry.register(Arc::new(builtins::FlightSearch));
        registry.register(Arc::new(builtins::CostAnalysis));
        registry.register(Arc::new(builtins::PreferenceMatcher));
        registry.register(Arc::new(builtins::UserQuery));
        registry.register(Arc::new(builtins::FlightBooking));
        registry.register(Arc::new(builtins::PaymentProcessing));
        registry.register(Arc::new(builtins::ResultSummarizer));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_builtins_registers_all_eight() {
        let registry = AdapterRegistry::with_builtins();
        for name in [
            "web_search",
            "flight_search",
            "cost_analysis",
            "preference_matcher",
            "user_query",
            "flight_booking",
            "payment_processing",
            "result_summarizer",
        ] {
            assert!(registry.get(name).is_some(), "missing adapter {name}");
        }
    }
}
