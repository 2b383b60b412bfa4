//! Filesystem-backed `WorkflowStore` (spec §4.3, §6).
//!
//! One JSON document per template under `STORE_ROOT`, written atomically
//! (temp file + rename) so a crash mid-write can't corrupt a template. An
//! in-memory index mirrors the directory for `findSimilar` and stats
//! queries; writers exclude readers for the span of a save (spec §5).

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::RwLock;
use warp_core::{Category, Edge, StoreError, TemplateId, TemplateStep, WorkflowTemplate};

use crate::similarity::{jaccard, tokenize};

/// Aggregate statistics over the store's contents (spec §4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub total_templates: usize,
    pub avg_success_rate: f64,
    pub counts_per_category: HashMap<Category, usize>,
}

/// Persistence + retrieval contract for workflow templates (spec §4.3).
/// Expressed as a trait so an alternate backend can replace the default
/// filesystem implementation without touching callers (Designer, Optimizer).
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Validate and persist a template. Rejects templates with zero steps,
    /// a cyclic step graph, or a step naming a node absent from
    /// `known_node_names`.
    async fn save(
        &self,
        template: WorkflowTemplate,
        known_node_names: &HashSet<String>,
    ) -> Result<(), StoreError>;

    async fn get(&self, id: &TemplateId) -> Result<WorkflowTemplate, StoreError>;

    async fn delete(&self, id: &TemplateId) -> Result<(), StoreError>;

    /// Candidates similar to `question`, ordered by descending score, then
    /// tie-broken by descending `successRate`, descending `usageCount`,
    /// descending `lastUsedAt` (spec §4.3).
    async fn find_similar(&self, question: &str, k: usize) -> Vec<(WorkflowTemplate, f64)>;

    /// Fold one execution outcome into a template's EMA success rate and
    /// usage bookkeeping (spec §4.3).
    async fn record_outcome(&self, id: &TemplateId, success: bool) -> Result<(), StoreError>;

    /// Append-only feedback absorbed by the Optimizer (spec §4.8). Never
    /// alters the template's structure.
    async fn append_feedback(&self, id: &TemplateId, feedback: String) -> Result<(), StoreError>;

    async fn stats(&self) -> StoreStats;
}

/// On-disk document shape (spec §6): `metadata`, `nodes`, `connections`,
/// `sharedStoreSchema`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct TemplateDocument {
    metadata: TemplateMetadata,
    nodes: Vec<TemplateStep>,
    connections: Vec<Edge>,
    shared_store_schema: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct TemplateMetadata {
    id: TemplateId,
    name: String,
    description: String,
    question_pattern: String,
    tags: Vec<String>,
    success_rate: f64,
    usage_count: u64,
    created_at: warp_core::Timestamp,
    last_used_at: warp_core::Timestamp,
    feedback: Vec<String>,
}

fn to_document(t: &WorkflowTemplate) -> TemplateDocument {
    TemplateDocument {
        metadata: TemplateMetadata {
            id: t.id,
            name: t.name.clone(),
            description: t.description.clone(),
            question_pattern: t.question_pattern.clone(),
            tags: t.tags.clone(),
            success_rate: t.success_rate,
            usage_count: t.usage_count,
            created_at: t.created_at,
            last_used_at: t.last_used_at,
            feedback: t.feedback.clone(),
        },
        nodes: t.steps.clone(),
        connections: t.edges.clone(),
        shared_store_schema: t.shared_store_schema.clone(),
    }
}

fn from_document(doc: TemplateDocument) -> WorkflowTemplate {
    WorkflowTemplate {
        id: doc.metadata.id,
        name: doc.metadata.name,
        description: doc.metadata.description,
        question_pattern: doc.metadata.question_pattern,
        steps: doc.nodes,
        edges: doc.connections,
        shared_store_schema: doc.shared_store_schema,
        tags: doc.metadata.tags,
        success_rate: doc.metadata.success_rate,
        usage_count: doc.metadata.usage_count,
        created_at: doc.metadata.created_at,
        last_used_at: doc.metadata.last_used_at,
        feedback: doc.metadata.feedback,
    }
}

/// Detect a cycle in the step graph via iterative DFS over `edges`,
/// keyed by `step_name` (spec §3: "the step graph of t is acyclic").
fn is_acyclic(steps: &[TemplateStep], edges: &[Edge]) -> bool {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
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
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
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

/// Filesystem-backed `WorkflowStore`: one JSON document per template,
/// mirrored in an in-memory index for retrieval (spec §4.3, §5).
pub struct FsWorkflowStore {
    root: PathBuf,
    index: RwLock<HashMap<TemplateId, WorkflowTemplate>>,
}

impl FsWorkflowStore {
    /// Open (creating if absent) a store rooted at `root`, loading any
    /// existing `*.json` template documents into the in-memory index.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| StoreError::Io {
            reason: format!("failed to create store root {}: {e}", root.display()),
        })?;

        let mut index = HashMap::new();
        let mut entries = tokio::fs::read_dir(&root).await.map_err(|e| StoreError::Io {
            reason: format!("failed to read store root {}: {e}", root.display()),
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::Io {
            reason: e.to_string(),
        })? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = tokio::fs::read_to_string(&path).await.map_err(|e| StoreError::Io {
                reason: e.to_string(),
            })?;
            let doc: TemplateDocument = match serde_json::from_str(&contents) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable template document");
                    continue;
                }
            };
            let template = from_document(doc);
            index.insert(template.id, template);
        }

        Ok(Self {
            root,
            index: RwLock::new(index),
        })
    }

    fn path_for(&self, id: &TemplateId) -> PathBuf {
        self.root.join(format!("{}.json", id.to_hex()))
    }

    async fn write_atomically(&self, template: &WorkflowTemplate) -> Result<(), StoreError> {
        let doc = to_document(template);
        let json = serde_json::to_string_pretty(&doc).map_err(|e| StoreError::Io {
            reason: e.to_string(),
        })?;

        let final_path = self.path_for(&template.id);
        let tmp_path = self.root.join(format!(
            "{}.tmp-{:x}",
            template.id.to_hex(),
            rand::random::<u64>()
        ));
        tokio::fs::write(&tmp_path, json).await.map_err(|e| StoreError::Io {
            reason: e.to_string(),
        })?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| StoreError::Io {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl WorkflowStore for FsWorkflowStore {
    async fn save(
        &self,
        template: WorkflowTemplate,
        known_node_names: &HashSet<String>,
    ) -> Result<(), StoreError> {
        if template.steps.is_empty() {
            return Err(StoreError::InvalidTemplate {
                reason: "template has zero steps".to_string(),
            });
        }
        if !is_acyclic(&template.steps, &template.edges) {
            return Err(StoreError::InvalidTemplate {
                reason: "step graph contains a cycle".to_string(),
            });
        }
        for step in &template.steps {
            if !known_node_names.contains(&step.node_name) {
                return Err(StoreError::InvalidTemplate {
                    reason: format!("step '{}' references unknown node '{}'", step.step_name, step.node_name),
                });
            }
        }

        // Writers exclude readers for the span of the save (spec §5).
        let mut index = self.index.write().await;
        self.write_atomically(&template).await?;
        index.insert(template.id, template);
        Ok(())
    }

    async fn get(&self, id: &TemplateId) -> Result<WorkflowTemplate, StoreError> {
        self.index
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: &TemplateId) -> Result<(), StoreError> {
        let mut index = self.index.write().await;
        if index.remove(id).is_none() {
            return Err(StoreError::NotFound);
        }
        let path = self.path_for(id);
        if path.exists() {
            tokio::fs::remove_file(&path).await.map_err(|e| StoreError::Io {
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn find_similar(&self, question: &str, k: usize) -> Vec<(WorkflowTemplate, f64)> {
        let query_tokens = tokenize(question);
        let index = self.index.read().await;

        let mut scored: Vec<(WorkflowTemplate, f64)> = index
            .values()
            .map(|t| (t.clone(), jaccard(&query_tokens, &tokenize(&t.question_pattern))))
            .collect();

        scored.sort_by(|(a, a_score), (b, b_score)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.success_rate.partial_cmp(&a.success_rate).unwrap_or(std::cmp::Ordering::Equal))
                .then(b.usage_count.cmp(&a.usage_count))
                .then(b.last_used_at.cmp(&a.last_used_at))
        });

        scored.truncate(k);
        scored
    }

    async fn record_outcome(&self, id: &TemplateId, success: bool) -> Result<(), StoreError> {
        let mut index = self.index.write().await;
        let template = index.get_mut(id).ok_or(StoreError::NotFound)?;
        template.record_outcome(if success { 1.0 } else { 0.0 }, Utc::now());
        let snapshot = template.clone();
        drop(index);
        self.write_atomically(&snapshot).await
    }

    async fn append_feedback(&self, id: &TemplateId, feedback: String) -> Result<(), StoreError> {
        let mut index = self.index.write().await;
        let template = index.get_mut(id).ok_or(StoreError::NotFound)?;
        template.feedback.push(feedback);
        let snapshot = template.clone();
        drop(index);
        self.write_atomically(&snapshot).await
    }

    async fn stats(&self) -> StoreStats {
        let index = self.index.read().await;
        let total_templates = index.len();
        let avg_success_rate = if total_templates == 0 {
            0.0
        } else {
            index.values().map(|t| t.success_rate).sum::<f64>() / total_templates as f64
        };

        let mut counts_per_category: HashMap<Category, usize> = HashMap::new();
        for template in index.values() {
            for tag in &template.tags {
                if let Some(category) = parse_category_tag(tag) {
                    *counts_per_category.entry(category).or_insert(0) += 1;
                }
            }
        }

        StoreStats {
            total_templates,
            avg_success_rate,
            counts_per_category,
        }
    }
}

fn parse_category_tag(tag: &str) -> Option<Category> {
    match tag {
        "search" => Some(Category::Search),
        "analysis" => Some(Category::Analysis),
        "communication" => Some(Category::Communication),
        "booking" => Some(Category::Booking),
        "payment" => Some(Category::Payment),
        "transformation" => Some(Category::Transformation),
        "creation" => Some(Category::Creation),
        "utility" => Some(Category::Utility),
        _ => None,
    }
}
