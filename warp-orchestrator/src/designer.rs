//! Designer stage: turns a question into a validated, stored
//! `WorkflowTemplate` (spec §4.5).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use warp_core::{
    Category, DesignError, Edge, SessionId, TemplateId, TemplateStep, Timestamp, WorkflowTemplate,
};
use warp_llm::{LlmClient, LlmCompletionRequest, LlmMessage, LlmRole};
use warp_registry::NodeRegistry;
use warp_store::WorkflowStore;

const MAX_ATTEMPTS: u32 = 3;
const MAX_SIMILAR_TEMPLATES: usize = 3;

/// Strict wire shape for the LLM's structured plan (spec §6). Unknown
/// top-level fields are rejected so a hallucinated extra field surfaces as
/// a validation error rather than being silently ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct PlanDocument {
    name: String,
    description: String,
    steps: Vec<PlanStep>,
    edges: Vec<PlanEdge>,
    #[serde(default)]
    shared_store_schema: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct PlanStep {
    step_name: String,
    node_name: String,
    #[serde(default)]
    bound_inputs: std::collections::HashMap<String, String>,
    #[serde(default)]
    declared_outputs: Vec<String>,
    #[serde(default)]
    requires_permission: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct PlanEdge {
    from: String,
    to: String,
    #[serde(default = "default_action_label")]
    action_label: String,
}

fn default_action_label() -> String {
    "default".to_string()
}

/// Scratchpad keys considered present when a session begins (spec §3: "an
/// initial scratchpad key"). The Designer may reference these in a first
/// step's bindings without it being a dangling reference.
const INITIAL_SCRATCHPAD_KEYS: &[&str] = &["question"];

/// A bound-input value prefixed with `$` names a scratchpad key (either an
/// initial key or an earlier step's declared output); anything else is a
/// literal passed straight through. This is the Designer's own convention
/// for distinguishing the two cases the spec describes in prose (§3),
/// since `boundInputs` is a flat string-to-string map.
fn scratchpad_reference(binding: &str) -> Option<&str> {
    binding.strip_prefix('$')
}

fn validate_plan(plan: &PlanDocument, registry: &NodeRegistry) -> Result<(), String> {
    if plan.steps.is_empty() {
        return Err("plan has zero steps".to_string());
    }

    let mut known_outputs: HashSet<&str> = INITIAL_SCRATCHPAD_KEYS.iter().copied().collect();
    let mut step_names: HashSet<&str> = HashSet::new();

    for step in &plan.steps {
        if !step_names.insert(step.step_name.as_str()) {
            return Err(format!("duplicate step name '{}'", step.step_name));
        }
        if registry.get(&step.node_name).is_err() {
            return Err(format!(
                "step '{}' references unknown node '{}'",
                step.step_name, step.node_name
            ));
        }
        for binding in step.bound_inputs.values() {
            if let Some(reference) = scratchpad_reference(binding) {
                if !known_outputs.contains(reference) {
                    return Err(format!(
                        "step '{}' references undeclared scratchpad key '{reference}'",
                        step.step_name
                    ));
                }
            }
        }
        known_outputs.extend(step.declared_outputs.iter().map(|s| s.as_str()));
    }

    if !is_acyclic(&plan.steps, &plan.edges) {
        return Err("step graph contains a cycle".to_string());
    }

    for edge in &plan.edges {
        if !step_names.contains(edge.from.as_str()) {
            return Err(format!("edge references unknown step '{}'", edge.from));
        }
        if !step_names.contains(edge.to.as_str()) {
            return Err(format!("edge references unknown step '{}'", edge.to));
        }
    }

    Ok(())
}

/// Same cycle check as the store's save-time validation, duplicated here
/// because the Designer must validate before a `WorkflowTemplate` exists
/// to hand the store.
fn is_acyclic(steps: &[PlanStep], edges: &[PlanEdge]) -> bool {
    let mut adjacency: std::collections::HashMap<&str, Vec<&str>> = std::collections::HashMap::new();
    for step in steps {
        adjacency.entry(step.step_name.as_str()).or_default();
    }
    for edge in edges {
        adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: std::collections::HashMap<&str, Mark> = std::collections::HashMap::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &std::collections::HashMap<&'a str, Vec<&'a str>>,
        marks: &mut std::collections::HashMap<&'a str, Mark>,
    ) -> bool {
        match marks.get(node) {
            Some(Mark::Done) => return true,
            Some(Mark::Visiting) => return false,
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        if let Some(children) = adjacency.get(node) {
            for child in children {
                if !visit(child, adjacency, marks) {
                    return false;
                }
            }
        }
        marks.insert(node, Mark::Done);
        true
    }

    for step in steps {
        if !visit(step.step_name.as_str(), &adjacency, &mut marks) {
            return false;
        }
    }
    true
}

fn category_tag(category: Category) -> &'static str {
    match category {
        Category::Search => "search",
        Category::Analysis => "analysis",
        Category::Communication => "communication",
        Category::Booking => "booking",
        Category::Payment => "payment",
        Category::Transformation => "transformation",
        Category::Creation => "creation",
        Category::Utility => "utility",
    }
}

fn canonical_bytes(steps: &[TemplateStep], edges: &[Edge]) -> Vec<u8> {
    serde_json::to_vec(&(steps, edges)).unwrap_or_default()
}

fn to_domain(plan: PlanDocument, registry: &NodeRegistry, question: &str, now: Timestamp) -> WorkflowTemplate {
    let steps: Vec<TemplateStep> = plan
        .steps
        .into_iter()
        .map(|s| TemplateStep {
            step_name: s.step_name,
            node_name: s.node_name,
            bound_inputs: s.bound_inputs,
            declared_outputs: s.declared_outputs,
            requires_permission: s.requires_permission,
        })
        .collect();
    let edges: Vec<Edge> = plan
        .edges
        .into_iter()
        .map(|e| Edge {
            from: e.from,
            to: e.to,
            action_label: e.action_label,
        })
        .collect();

    let mut tags: Vec<String> = steps
        .iter()
        .filter_map(|s| registry.get(&s.node_name).ok())
        .map(|d| category_tag(d.category).to_string())
        .collect();
    tags.sort();
    tags.dedup();

    let id = TemplateId::from_canonical_bytes(&canonical_bytes(&steps, &edges));

    WorkflowTemplate {
        id,
        name: plan.name,
        description: plan.description,
        question_pattern: question.to_string(),
        steps,
        edges,
        shared_store_schema: plan.shared_store_schema,
        tags,
        success_rate: 0.0,
        usage_count: 0,
        created_at: now,
        last_used_at: now,
        feedback: vec![],
    }
}

fn system_prompt() -> String {
    "You design workflow templates for an agent runtime. Given a user question, the catalog of \
     available nodes, and any similar past templates, respond with a single JSON object matching \
     this schema exactly, with no extra top-level fields: \
     { \"name\": string, \"description\": string, \
     \"steps\": [{ \"stepName\": string, \"nodeName\": string, \"boundInputs\": {string: string}, \
     \"declaredOutputs\": [string], \"requiresPermission\": bool }], \
     \"edges\": [{ \"from\": string, \"to\": string, \"actionLabel\": string }], \
     \"sharedStoreSchema\": [string] }. \
     A boundInputs value prefixed with '$' names a scratchpad key (either the initial '$question' \
     key or an earlier step's declared output); anything else is a literal value. The step graph \
     must be acyclic. Every nodeName must appear in the catalog below."
        .to_string()
}

fn user_prompt(question: &str, registry: &NodeRegistry, similar: &[(WorkflowTemplate, f64)]) -> String {
    let mut prompt = format!("Question: {question}\n\nAvailable nodes:\n{}", registry.summarize_for_planner());
    if !similar.is_empty() {
        prompt.push_str("\nSimilar past templates:\n");
        for (template, score) in similar {
            prompt.push_str(&format!(
                "- \"{}\" (similarity {:.2}, success rate {:.2}): {}\n",
                template.question_pattern, score, template.success_rate, template.name
            ));
        }
    }
    prompt
}

/// Produces validated `WorkflowTemplate`s from free-text questions,
/// consulting the registry for available nodes and the store for similar
/// past attempts (spec §4.5).
pub struct DesignerStage {
    registry: Arc<NodeRegistry>,
    store: Arc<dyn WorkflowStore>,
    llm: Arc<dyn LlmClient>,
}

impl DesignerStage {
    pub fn new(registry: Arc<NodeRegistry>, store: Arc<dyn WorkflowStore>, llm: Arc<dyn LlmClient>) -> Self {
        Self { registry, store, llm }
    }

    /// Design (or retrieve-and-coalesce) a template for `question`.
    /// `diagnostic` carries the Optimizer's failure narration when this is
    /// a one-shot redesign attempt (spec §4.8), folded into the prompt as
    /// extra context.
    pub async fn design(
        &self,
        question: &str,
        _session_id: SessionId,
        diagnostic: Option<&str>,
        now: Timestamp,
    ) -> Result<WorkflowTemplate, DesignError> {
        let similar = self.store.find_similar(question, MAX_SIMILAR_TEMPLATES).await;

        let mut messages = vec![LlmMessage {
            role: LlmRole::User,
            content: user_prompt(question, &self.registry, &similar),
        }];
        if let Some(diagnostic) = diagnostic {
            messages.push(LlmMessage {
                role: LlmRole::User,
                content: format!("The previous attempt failed: {diagnostic}. Produce a corrected plan."),
            });
        }

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let request = LlmCompletionRequest::new(system_prompt(), messages.clone(), 2048);
            let response = self.llm.complete(&request).await.map_err(|e| DesignError::DesignFailed {
                attempts: attempt,
                reason: format!("LLM call failed: {e}"),
            })?;

            match serde_json::from_str::<PlanDocument>(&response.content) {
                Ok(plan) => match validate_plan(&plan, &self.registry) {
                    Ok(()) => {
                        let known_node_names: HashSet<String> =
                            self.registry.list_all().into_iter().map(|d| d.name.clone()).collect();
                        let template = to_domain(plan, &self.registry, question, now);

                        if let Ok(existing) = self.store.get(&template.id).await {
                            tracing::debug!(template_id = %template.id, "designer plan coalesced onto existing template");
                            return Ok(existing);
                        }

                        self.store.save(template.clone(), &known_node_names).await.map_err(|e| {
                            DesignError::DesignFailed {
                                attempts: attempt,
                                reason: format!("validated plan rejected by store: {e}"),
                            }
                        })?;
                        return Ok(template);
                    }
                    Err(reason) => {
                        last_error = reason;
                    }
                },
                Err(e) => {
                    last_error = format!("invalid JSON: {e}");
                }
            }

            messages.push(LlmMessage {
                role: LlmRole::Assistant,
                content: response.content,
            });
            messages.push(LlmMessage {
                role: LlmRole::User,
                content: format!("That plan was invalid: {last_error}. Please correct it and respond with JSON only."),
            });
        }

        Err(DesignError::DesignFailed {
            attempts: MAX_ATTEMPTS,
            reason: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_llm::MockLlmClient;
    use warp_store::FsWorkflowStore;

    fn plan_json(node: &str) -> String {
        format!(
            r#"{{
                "name": "test plan",
                "description": "desc",
                "steps": [{{
                    "stepName": "a",
                    "nodeName": "{node}",
                    "boundInputs": {{"query": "$question"}},
                    "declaredOutputs": ["search_results"],
                    "requiresPermission": false
                }}],
                "edges": [],
                "sharedStoreSchema": []
            }}"#
        )
    }

    async fn store() -> Arc<dyn WorkflowStore> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(FsWorkflowStore::open(dir.path()).await.unwrap())
    }

    #[tokio::test]
    async fn valid_plan_on_first_attempt_is_saved() {
        let registry = Arc::new(NodeRegistry::with_builtins());
        let store = store().await;
        let llm = Arc::new(MockLlmClient::fixed(plan_json("web_search")));
        let designer = DesignerStage::new(registry, store.clone(), llm);

        let template = designer
            .design("search for flights", SessionId::now_v7(), None, chrono::Utc::now())
            .await
            .unwrap();

        assert_eq!(template.steps.len(), 1);
        assert!(store.get(&template.id).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_node_name_retries_then_succeeds() {
        let registry = Arc::new(NodeRegistry::with_builtins());
        let store = store().await;
        let llm = Arc::new(MockLlmClient::scripted(vec![
            plan_json("not_a_real_node"),
            plan_json("web_search"),
        ]));
        let designer = DesignerStage::new(registry, store, llm);

        let template = designer
            .design("search for flights", SessionId::now_v7(), None, chrono::Utc::now())
            .await
            .unwrap();
        assert_eq!(template.steps[0].node_name, "web_search");
    }

    #[tokio::test]
    async fn exhausting_retries_fails_with_design_failed() {
        let registry = Arc::new(NodeRegistry::with_builtins());
        let store = store().await;
        let llm = Arc::new(MockLlmClient::fixed(plan_json("not_a_real_node")));
        let designer = DesignerStage::new(registry, store, llm);

        let err = designer
            .design("search for flights", SessionId::now_v7(), None, chrono::Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DesignError::DesignFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn identical_plans_coalesce_to_same_template_id() {
        let registry = Arc::new(NodeRegistry::with_builtins());
        let store = store().await;
        let llm = Arc::new(MockLlmClient::fixed(plan_json("web_search")));
        let designer = DesignerStage::new(registry, store, llm);

        let first = designer
            .design("search for flights", SessionId::now_v7(), None, chrono::Utc::now())
            .await
            .unwrap();
        let second = designer
            .design("search for flights", SessionId::now_v7(), None, chrono::Utc::now())
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn cyclic_plan_rejected() {
        let registry = NodeRegistry::with_builtins();
        let plan = PlanDocument {
            name: "n".into(),
            description: "d".into(),
            steps: vec![
                PlanStep {
                    step_name: "a".into(),
                    node_name: "web_search".into(),
                    bound_inputs: Default::default(),
                    declared_outputs: vec![],
                    requires_permission: false,
                },
                PlanStep {
                    step_name: "b".into(),
                    node_name: "web_search".into(),
                    bound_inputs: Default::default(),
                    declared_outputs: vec![],
                    requires_permission: false,
                },
            ],
            edges: vec![
                PlanEdge { from: "a".into(), to: "b".into(), action_label: "default".into() },
                PlanEdge { from: "b".into(), to: "a".into(), action_label: "default".into() },
            ],
            shared_store_schema: vec![],
        };
        assert!(validate_plan(&plan, &registry).is_err());
    }
}
