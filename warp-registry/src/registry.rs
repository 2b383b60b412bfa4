//! The node registry: a declarative, read-only-after-startup catalog of
//! callable capabilities (spec §4.1).

use serde::Deserialize;
use std::collections::BTreeMap;
use warp_core::{Category, NodeDescriptor, NodeExample, PermissionTier, RegistryError};

/// On-disk representation of the registry configuration document (§6:
/// "Registry configuration. One JSON document with a top-level `nodes`
/// mapping of name -> descriptor"). Strict parsing: unknown fields are
/// rejected so a typo in a hand-written manifest fails loudly at startup
/// rather than silently dropping a field, mirroring the teacher's pack
/// manifest schema.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryManifest {
    pub nodes: BTreeMap<String, NodeManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeManifestEntry {
    pub description: String,
    pub category: String,
    pub permission_tier: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub examples: Vec<NodeExample>,
    #[serde(default)]
    pub estimated_cost: f64,
    #[serde(default)]
    pub estimated_time_seconds: f64,
    pub invoke: String,
}

fn parse_category(name: &str, raw: &str) -> Result<Category, RegistryError> {
    match raw {
        "search" => Ok(Category::Search),
        "analysis" => Ok(Category::Analysis),
        "communication" => Ok(Category::Communication),
        "booking" => Ok(Category::Booking),
        "payment" => Ok(Category::Payment),
        "transformation" => Ok(Category::Transformation),
        "creation" => Ok(Category::Creation),
        "utility" => Ok(Category::Utility),
        other => Err(RegistryError::InvalidDescriptor {
            name: name.to_string(),
            reason: format!("unknown category '{other}'"),
        }),
    }
}

fn parse_permission_tier(name: &str, raw: &str) -> Result<PermissionTier, RegistryError> {
    match raw {
        "none" => Ok(PermissionTier::None),
        "basic" => Ok(PermissionTier::Basic),
        "sensitive" => Ok(PermissionTier::Sensitive),
        "critical" => Ok(PermissionTier::Critical),
        other => Err(RegistryError::InvalidDescriptor {
            name: name.to_string(),
            reason: format!("unknown permission tier '{other}'"),
        }),
    }
}

/// Declarative catalog of callable capabilities with typed I/O, category,
/// and permission tier (§4.1). Built once at startup, then shared
/// read-only: `Arc<NodeRegistry>` is cloned into every session (§5), no
/// lock required.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    descriptors: BTreeMap<String, NodeDescriptor>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a manifest document, failing hard (§4.1 startup
    /// contract) on any descriptor with an unknown `category` or
    /// `permissionTier`.
    pub fn from_manifest_json(json: &str) -> Result<Self, RegistryError> {
        let manifest: RegistryManifest =
            serde_json::from_str(json).map_err(|e| RegistryError::InvalidDescriptor {
                name: "<manifest>".to_string(),
                reason: e.to_string(),
            })?;

        let mut registry = Self::new();
        for (name, entry) in manifest.nodes {
            let descriptor = NodeDescriptor {
                category: parse_category(&name, &entry.category)?,
                permission_tier: parse_permission_tier(&name, &entry.permission_tier)?,
                name: name.clone(),
                description: entry.description,
                inputs: entry.inputs,
                outputs: entry.outputs,
                examples: entry.examples,
                estimated_cost: entry.estimated_cost,
                estimated_time_seconds: entry.estimated_time_seconds,
                invoke: entry.invoke,
            };
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Register a descriptor. Fails with `DuplicateName` if one is already
    /// registered under the same name, or `InvalidDescriptor` if the name
    /// does not match `[a-z][a-z0-9_]*` (§3).
    pub fn register(&mut self, descriptor: NodeDescriptor) -> Result<(), RegistryError> {
        if !is_valid_node_name(&descriptor.name) {
            return Err(RegistryError::InvalidDescriptor {
                name: descriptor.name.clone(),
                reason: "name must match [a-z][a-z0-9_]*".to_string(),
            });
        }
        if self.descriptors.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateName {
                name: descriptor.name,
            });
        }
        self.descriptors.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&NodeDescriptor, RegistryError> {
        self.descriptors
            .get(name)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    /// All descriptors, deterministically ordered ascending by name (§4.1).
    pub fn list_all(&self) -> Vec<&NodeDescriptor> {
        self.descriptors.values().collect()
    }

    pub fn list_by_category(&self, category: Category) -> Vec<&NodeDescriptor> {
        self.descriptors
            .values()
            .filter(|d| d.category == category)
            .collect()
    }

    /// A bounded, LLM-consumable textual catalog of every entry: the single
    /// source of truth passed to the Designer (§4.1).
    pub fn summarize_for_planner(&self) -> String {
        let mut out = String::new();
        for descriptor in self.list_all() {
            out.push_str(&format!(
                "- {name} ({category:?}, {tier:?}): {description}\n  inputs: [{inputs}]\n  outputs: [{outputs}]\n",
                name = descriptor.name,
                category = descriptor.category,
                tier = descriptor.permission_tier,
                description = descriptor.description,
                inputs = descriptor.inputs.join(", "),
                outputs = descriptor.outputs.join(", "),
            ));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors for the built-in demo adapters (§4.2), matching the
    /// `AdapterRegistry::with_builtins()` invocation targets one-to-one.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins = [
            (
                "web_search",
                "Searches the web for free-text queries.",
                Category::Search,
                PermissionTier::None,
                vec!["query"],
                vec!["search_results"],
            ),
            (
                "flight_search",
                "Searches for flights between an origin and destination.",
                Category::Search,
                PermissionTier::None,
                vec!["origin", "destination"],
                vec!["flight_options"],
            ),
            (
                "cost_analysis",
                "Filters candidate options against a budget.",
                Category::Analysis,
                PermissionTier::None,
                vec!["flight_options", "max_price_usd"],
                vec!["cost_summary"],
            ),
            (
                "preference_matcher",
                "Ranks affordable options against stated preferences.",
                Category::Analysis,
                PermissionTier::None,
                vec!["cost_summary"],
                vec!["recommendation"],
            ),
            (
                "user_query",
                "Asks the user a clarifying question and waits for a reply.",
                Category::Communication,
                PermissionTier::None,
                vec!["prompt"],
                vec!["user_answer"],
            ),
            (
                "flight_booking",
                "Books the recommended flight option.",
                Category::Booking,
                PermissionTier::Sensitive,
                vec!["recommended_option"],
                vec!["booking_confirmation"],
            ),
            (
                "payment_processing",
                "Captures payment for a confirmed booking.",
                Category::Payment,
                PermissionTier::Critical,
                vec!["booking_confirmation"],
                vec!["payment_receipt"],
            ),
            (
                "result_summarizer",
                "Assembles a human-readable summary from prior step outputs.",
                Category::Creation,
                PermissionTier::None,
                vec![],
                vec!["summary"],
            ),
        ];

        for (name, description, category, tier, inputs, outputs) in builtins {
            registry
                .register(NodeDescriptor {
                    name: name.to_string(),
                    description: description.to_string(),
                    category,
                    permission_tier: tier,
                    inputs: inputs.into_iter().map(String::from).collect(),
                    outputs: outputs.into_iter().map(String::from).collect(),
                    examples: vec![],
                    estimated_cost: 0.0,
                    estimated_time_seconds: 1.0,
                    invoke: name.to_string(),
                })
                .expect("builtin descriptors are well-formed");
        }
        registry
    }
}

fn is_valid_node_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> NodeDescriptor {
        NodeDescriptor {
            name: name.to_string(),
            description: "test node".to_string(),
            category: Category::Utility,
            permission_tier: PermissionTier::None,
            inputs: vec![],
            outputs: vec![],
            examples: vec![],
            estimated_cost: 0.0,
            estimated_time_seconds: 0.0,
            invoke: name.to_string(),
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let mut registry = NodeRegistry::new();
        registry.register(descriptor("web_search")).unwrap();
        assert_eq!(registry.get("web_search").unwrap().name, "web_search");
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut registry = NodeRegistry::new();
        registry.register(descriptor("web_search")).unwrap();
        let err = registry.register(descriptor("web_search")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { .. }));
    }

    #[test]
    fn invalid_name_rejected() {
        let mut registry = NodeRegistry::new();
        let err = registry.register(descriptor("WebSearch")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDescriptor { .. }));
    }

    #[test]
    fn get_missing_returns_not_found() {
        let registry = NodeRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn list_all_is_sorted_by_name() {
        let mut registry = NodeRegistry::new();
        registry.register(descriptor("zeta")).unwrap();
        registry.register(descriptor("alpha")).unwrap();
        let names: Vec<_> = registry.list_all().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn manifest_with_unknown_category_fails_hard() {
        let json = r#"{
            "nodes": {
                "bad_node": {
                    "description": "x",
                    "category": "not_a_category",
                    "permission_tier": "none",
                    "invoke": "bad_node"
                }
            }
        }"#;
        let err = NodeRegistry::from_manifest_json(json).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDescriptor { .. }));
    }

    #[test]
    fn manifest_round_trip() {
        let json = r#"{
            "nodes": {
                "web_search": {
                    "description": "searches the web",
                    "category": "search",
                    "permission_tier": "none",
                    "inputs": ["query"],
                    "outputs": ["results"],
                    "invoke": "web_search"
                }
            }
        }"#;
        let registry = NodeRegistry::from_manifest_json(json).unwrap();
        assert_eq!(registry.len(), 1);
        let descriptor = registry.get("web_search").unwrap();
        assert_eq!(descriptor.category, Category::Search);
        assert_eq!(descriptor.permission_tier, PermissionTier::None);
    }

    #[test]
    fn builtin_registry_has_eight_entries_with_gated_tiers() {
        let registry = NodeRegistry::with_builtins();
        assert_eq!(registry.len(), 8);
        assert_eq!(
            registry.get("flight_booking").unwrap().permission_tier,
            PermissionTier::Sensitive
        );
        assert_eq!(
            registry.get("payment_processing").unwrap().permission_tier,
            PermissionTier::Critical
        );
    }
}
