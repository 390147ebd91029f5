//! Persisted checkpoint state for one orchestration run.
//!
//! Field declaration order matters: serde writes struct fields in order,
//! and the file format keeps top-level keys sorted. Node maps are
//! `BTreeMap`s so ids serialize lexicographically for determinism.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use gaffer_graph::{Graph, NodeId, NodeOutcome, NodeStatus};
use serde::{Deserialize, Serialize};

/// Summaries longer than this are truncated before hitting disk
pub const MAX_SUMMARY_CHARS: usize = 2000;

/// Per-node record inside a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCheckpoint {
    /// Current lifecycle status
    pub status: NodeStatus,

    /// When the node was dispatched to a handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the node reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Handler summary, truncated to [`MAX_SUMMARY_CHARS`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<String>,

    /// Model the node ran with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,

    /// Artifact paths relative to the project root
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Failure description for failed nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl NodeCheckpoint {
    /// Fresh pending entry
    pub fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            started_at: None,
            completed_at: None,
            output_summary: None,
            model_used: None,
            artifacts: Vec::new(),
            error_details: None,
        }
    }

    /// Reset back to pending, clearing every completion field
    pub fn reset(&mut self) {
        *self = Self::pending();
    }

    /// Rebuild the outcome view the graph engine evaluates edge
    /// conditions against. Only fields the checkpoint stores survive a
    /// resume; the rest default.
    pub fn as_outcome(&self) -> NodeOutcome {
        let mut outcome = NodeOutcome::new(self.status);
        outcome.output_summary = self.output_summary.clone().unwrap_or_default();
        outcome.artifacts = self.artifacts.clone();
        outcome.model_used = self.model_used.clone().unwrap_or_default();
        outcome.error_details = self.error_details.clone();
        outcome
    }
}

/// Whole-run checkpoint, serialized as `checkpoint.json`
///
/// Fields are declared in sorted key order; do not reorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Creation time of the run (ISO-8601 UTC)
    pub created_at: DateTime<Utc>,

    /// Per-gate retry counters; persisted for forward compatibility,
    /// never consumed
    #[serde(default)]
    pub gate_retries: BTreeMap<String, u32>,

    /// Canonical SHA-256 of the graph this run was opened against
    pub graph_hash: String,

    /// Node id to per-node record
    pub nodes: BTreeMap<NodeId, NodeCheckpoint>,

    /// Timestamp-derived run identifier
    pub run_id: String,

    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl CheckpointState {
    /// Fresh state with every graph node pending
    pub fn new(run_id: impl Into<String>, graph_hash: impl Into<String>, graph: &Graph) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            gate_retries: BTreeMap::new(),
            graph_hash: graph_hash.into(),
            nodes: graph
                .nodes
                .iter()
                .map(|n| (n.id.clone(), NodeCheckpoint::pending()))
                .collect(),
            run_id: run_id.into(),
            updated_at: now,
        }
    }

    /// Generate a timestamp-based run id, e.g. `run-20250801-142233-617`.
    /// Millisecond precision keeps back-to-back runs in distinct
    /// directories.
    pub fn generate_run_id() -> String {
        format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S-%3f"))
    }

    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.nodes.get(id).map(|n| n.status)
    }

    /// True when every node has reached a terminal status
    pub fn all_terminal(&self) -> bool {
        self.nodes.values().all(|n| n.status.is_terminal())
    }
}

/// Truncate a summary on a char boundary
pub fn truncate_summary(summary: &str) -> String {
    if summary.chars().count() <= MAX_SUMMARY_CHARS {
        summary.to_string()
    } else {
        summary.chars().take(MAX_SUMMARY_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaffer_graph::Node;

    fn two_node_graph() -> Graph {
        Graph::new(vec![Node::new("a"), Node::new("b")], vec![])
    }

    #[test]
    fn test_new_state_marks_all_pending() {
        let state = CheckpointState::new("run-1", "hash", &two_node_graph());
        assert_eq!(state.nodes.len(), 2);
        assert!(state
            .nodes
            .values()
            .all(|n| n.status == NodeStatus::Pending));
        assert!(!state.all_terminal());
    }

    #[test]
    fn test_json_round_trip() {
        let mut state = CheckpointState::new("run-1", "hash", &two_node_graph());
        let entry = state.nodes.get_mut("a").unwrap();
        entry.status = NodeStatus::Completed;
        entry.output_summary = Some("built the thing".to_string());
        entry.artifacts = vec!["src/lib.rs".to_string()];

        let json = serde_json::to_string_pretty(&state).unwrap();
        let loaded: CheckpointState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, loaded);
    }

    #[test]
    fn test_serialized_keys_are_sorted() {
        let state = CheckpointState::new("run-1", "hash", &two_node_graph());
        let json = serde_json::to_string(&state).unwrap();
        let created = json.find("\"created_at\"").unwrap();
        let gate = json.find("\"gate_retries\"").unwrap();
        let hash = json.find("\"graph_hash\"").unwrap();
        let nodes = json.find("\"nodes\"").unwrap();
        let run = json.find("\"run_id\"").unwrap();
        let updated = json.find("\"updated_at\"").unwrap();
        assert!(created < gate && gate < hash && hash < nodes && nodes < run && run < updated);
    }

    #[test]
    fn test_timestamps_use_utc_z_suffix() {
        let state = CheckpointState::new("run-1", "hash", &two_node_graph());
        let json = serde_json::to_value(&state).unwrap();
        let created = json["created_at"].as_str().unwrap();
        assert!(created.ends_with('Z'), "expected Z suffix, got {}", created);
    }

    #[test]
    fn test_truncate_summary() {
        let short = "fine as is";
        assert_eq!(truncate_summary(short), short);
        let long = "x".repeat(MAX_SUMMARY_CHARS + 100);
        assert_eq!(truncate_summary(&long).chars().count(), MAX_SUMMARY_CHARS);
    }

    #[test]
    fn test_outcome_view_preserves_status_and_summary() {
        let mut entry = NodeCheckpoint::pending();
        entry.status = NodeStatus::Failed;
        entry.output_summary = Some("boom".to_string());
        entry.error_details = Some("stack trace".to_string());
        let outcome = entry.as_outcome();
        assert_eq!(outcome.status, NodeStatus::Failed);
        assert_eq!(outcome.output_summary, "boom");
        assert_eq!(outcome.error_details.as_deref(), Some("stack trace"));
    }

    #[test]
    fn test_gate_retries_round_trip_untouched() {
        let mut state = CheckpointState::new("run-1", "hash", &two_node_graph());
        state.gate_retries.insert("gate-1".to_string(), 2);
        let json = serde_json::to_string(&state).unwrap();
        let loaded: CheckpointState = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.gate_retries.get("gate-1"), Some(&2));
    }
}
