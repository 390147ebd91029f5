//! Durable per-node state with hash-keyed resume and cascade invalidation.
//!
//! One manager owns one `checkpoint.json` exclusively for the life of a
//! run. Every mutation rewrites the whole file atomically: serialize to a
//! sibling temp file, fsync, rename over the target. The driver persists a
//! node's start record before its handler runs and its completion record
//! before the next ready set is computed, so at most one node is ever
//! in-progress on disk and crash recovery is deterministic.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use gaffer_graph::{Graph, NodeId, NodeOutcome, NodeStatus};
use tracing::{debug, info, warn};

use crate::error::{CheckpointError, Result};
use crate::hash::graph_hash;
use crate::state::{truncate_summary, CheckpointState, NodeCheckpoint};

/// File name of the checkpoint inside a run directory
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Manages the checkpoint file for one run of one graph
pub struct CheckpointManager {
    path: PathBuf,
    state: CheckpointState,
    /// Forward adjacency for cascade invalidation
    forward: HashMap<NodeId, Vec<NodeId>>,
}

impl CheckpointManager {
    /// Open (or create) the checkpoint for `graph` inside `run_dir`.
    ///
    /// If `run_dir/checkpoint.json` exists, parses, and carries the same
    /// canonical hash, it is adopted: graph nodes missing from the file
    /// are inserted pending, and any entry left in progress by a crash is
    /// reset to pending with a warning. A parseable file with a different
    /// hash means the pipeline definition changed; the old state is
    /// discarded and a fresh run id generated. The file is only rewritten
    /// when adoption actually changed something, so reopening an
    /// untouched checkpoint is byte-preserving.
    pub fn open(run_dir: &Path, graph: &Graph) -> Result<Self> {
        let hash = graph_hash(graph);
        let path = run_dir.join(CHECKPOINT_FILE);
        let forward = forward_adjacency(graph);

        let (state, dirty) = match Self::load_existing(&path) {
            Some(existing) if existing.graph_hash == hash => {
                info!(run_id = %existing.run_id, "resuming checkpoint");
                Self::adopt(existing, graph)
            }
            Some(existing) => {
                warn!(
                    old_hash = %existing.graph_hash,
                    new_hash = %hash,
                    "pipeline definition changed; starting fresh checkpoint"
                );
                (
                    CheckpointState::new(CheckpointState::generate_run_id(), hash, graph),
                    true,
                )
            }
            None => {
                let state =
                    CheckpointState::new(CheckpointState::generate_run_id(), hash, graph);
                debug!(run_id = %state.run_id, "created new checkpoint state");
                (state, true)
            }
        };

        let mut manager = Self {
            path,
            state,
            forward,
        };
        if dirty {
            fs::create_dir_all(run_dir)?;
            manager.persist()?;
        }
        Ok(manager)
    }

    fn load_existing(path: &Path) -> Option<CheckpointState> {
        let content = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable checkpoint file ignored");
                None
            }
        }
    }

    /// Adopt an existing state: insert pending entries for unknown graph
    /// nodes and revert crashed in-progress entries. Returns whether the
    /// state was modified.
    fn adopt(mut state: CheckpointState, graph: &Graph) -> (CheckpointState, bool) {
        let mut dirty = false;
        for node in &graph.nodes {
            if !state.nodes.contains_key(&node.id) {
                debug!(node = %node.id, "inserting pending entry for new node");
                state.nodes.insert(node.id.clone(), NodeCheckpoint::pending());
                dirty = true;
            }
        }
        for (id, entry) in state.nodes.iter_mut() {
            if entry.status == NodeStatus::InProgress {
                warn!(node = %id, "node was in progress at shutdown; resetting to pending");
                entry.reset();
                dirty = true;
            }
        }
        (state, dirty)
    }

    pub fn run_id(&self) -> &str {
        &self.state.run_id
    }

    pub fn graph_hash(&self) -> &str {
        &self.state.graph_hash
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    /// Transition a node to in-progress, stamping start time and model
    pub fn record_node_start(&mut self, id: &str, model: &str) -> Result<()> {
        let entry = self
            .state
            .nodes
            .get_mut(id)
            .ok_or_else(|| CheckpointError::UnknownNode(id.to_string()))?;
        entry.status = NodeStatus::InProgress;
        entry.started_at = Some(Utc::now());
        entry.completed_at = None;
        entry.output_summary = None;
        entry.model_used = Some(model.to_string());
        entry.artifacts = Vec::new();
        entry.error_details = None;
        self.persist()
    }

    /// Transition a node to its outcome status, stamping end time and
    /// recording summary, artifacts, and error details
    pub fn record_node_completion(&mut self, id: &str, outcome: &NodeOutcome) -> Result<()> {
        let entry = self
            .state
            .nodes
            .get_mut(id)
            .ok_or_else(|| CheckpointError::UnknownNode(id.to_string()))?;
        entry.status = outcome.status;
        entry.completed_at = Some(Utc::now());
        entry.output_summary = Some(truncate_summary(&outcome.output_summary));
        entry.artifacts = outcome.artifacts.clone();
        entry.error_details = outcome.error_details.clone();
        if !outcome.model_used.is_empty() {
            entry.model_used = Some(outcome.model_used.clone());
        }
        self.persist()
    }

    /// Current status of every tracked node
    pub fn status_map(&self) -> HashMap<NodeId, NodeStatus> {
        self.state
            .nodes
            .iter()
            .map(|(id, entry)| (id.clone(), entry.status))
            .collect()
    }

    /// Outcome views for terminal nodes, for edge-condition evaluation
    pub fn outcome_map(&self) -> HashMap<NodeId, NodeOutcome> {
        self.state
            .nodes
            .iter()
            .filter(|(_, entry)| entry.status.is_terminal())
            .map(|(id, entry)| (id.clone(), entry.as_outcome()))
            .collect()
    }

    pub fn output_summary(&self, id: &str) -> Option<String> {
        self.state
            .nodes
            .get(id)
            .and_then(|entry| entry.output_summary.clone())
    }

    pub fn artifacts(&self, id: &str) -> Vec<String> {
        self.state
            .nodes
            .get(id)
            .map(|entry| entry.artifacts.clone())
            .unwrap_or_default()
    }

    pub fn node(&self, id: &str) -> Option<&NodeCheckpoint> {
        self.state.nodes.get(id)
    }

    /// True when every node has reached a terminal status
    pub fn all_terminal(&self) -> bool {
        self.state.all_terminal()
    }

    /// Reset the seed nodes and everything reachable from them over
    /// forward edges back to pending, then persist once.
    pub fn invalidate_nodes(&mut self, seeds: &[NodeId]) -> Result<()> {
        let mut queue: VecDeque<NodeId> = seeds.iter().cloned().collect();
        let mut seen: Vec<NodeId> = Vec::new();
        while let Some(id) = queue.pop_front() {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id.clone());
            if let Some(targets) = self.forward.get(&id) {
                for target in targets {
                    if !seen.contains(target) {
                        queue.push_back(target.clone());
                    }
                }
            }
        }

        let mut touched = 0usize;
        for id in &seen {
            if let Some(entry) = self.state.nodes.get_mut(id) {
                entry.reset();
                touched += 1;
            }
        }
        info!(seeds = seeds.len(), reset = touched, "invalidated checkpoint subtree");
        self.persist()
    }

    /// Atomic write: serialize to a sibling temp file, fsync, rename.
    fn persist(&mut self) -> Result<()> {
        self.state.updated_at = Utc::now();
        let serialized = serde_json::to_string_pretty(&self.state)?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(serialized.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Scan `tasks_dir` for `run-*/checkpoint.json` files whose stored
    /// hash matches, newest (reverse-lexicographic) first. Returns the
    /// run directory to resume, if any.
    pub fn discover_resume_dir(tasks_dir: &Path, hash: &str) -> Option<PathBuf> {
        let entries = fs::read_dir(tasks_dir).ok()?;
        let mut run_dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with("run-"))
                        .unwrap_or(false)
            })
            .collect();
        run_dirs.sort();
        run_dirs.reverse();

        for dir in run_dirs {
            let Some(state) = Self::load_existing(&dir.join(CHECKPOINT_FILE)) else {
                continue;
            };
            if state.graph_hash == hash {
                info!(run_dir = %dir.display(), "found resumable run for graph hash");
                return Some(dir);
            }
        }
        None
    }
}

fn forward_adjacency(graph: &Graph) -> HashMap<NodeId, Vec<NodeId>> {
    let mut forward: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for edge in &graph.edges {
        forward
            .entry(edge.source.clone())
            .or_default()
            .push(edge.target.clone());
    }
    forward
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaffer_graph::{Edge, Node};
    use tempfile::TempDir;

    fn diamond() -> Graph {
        Graph::new(
            vec![
                Node::new("a"),
                Node::new("b"),
                Node::new("c"),
                Node::new("d"),
            ],
            vec![
                Edge::new("a", "b"),
                Edge::new("a", "c"),
                Edge::new("b", "d"),
                Edge::new("c", "d"),
            ],
        )
    }

    #[test]
    fn test_open_creates_pending_state_and_file() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::open(dir.path(), &diamond()).unwrap();
        assert_eq!(manager.state().nodes.len(), 4);
        assert!(dir.path().join(CHECKPOINT_FILE).exists());
        assert!(manager.run_id().starts_with("run-"));
    }

    #[test]
    fn test_start_then_completion_round_trip() {
        let dir = TempDir::new().unwrap();
        let graph = diamond();
        let mut manager = CheckpointManager::open(dir.path(), &graph).unwrap();

        manager.record_node_start("a", "sonnet").unwrap();
        assert_eq!(manager.status_map()["a"], NodeStatus::InProgress);

        let outcome = NodeOutcome::completed("all good")
            .with_model("sonnet")
            .with_artifacts(vec!["src/main.rs".to_string()]);
        manager.record_node_completion("a", &outcome).unwrap();

        let reloaded = CheckpointManager::open(dir.path(), &graph).unwrap();
        let entry = reloaded.node("a").unwrap();
        assert_eq!(entry.status, NodeStatus::Completed);
        assert_eq!(entry.output_summary.as_deref(), Some("all good"));
        assert_eq!(entry.artifacts, vec!["src/main.rs".to_string()]);
        assert!(entry.started_at.is_some());
        assert!(entry.completed_at.is_some());
    }

    #[test]
    fn test_crashed_in_progress_resets_to_pending() {
        let dir = TempDir::new().unwrap();
        let graph = diamond();
        let mut manager = CheckpointManager::open(dir.path(), &graph).unwrap();
        manager.record_node_start("b", "sonnet").unwrap();
        drop(manager);

        let reopened = CheckpointManager::open(dir.path(), &graph).unwrap();
        assert_eq!(reopened.status_map()["b"], NodeStatus::Pending);
        assert!(reopened.node("b").unwrap().started_at.is_none());
    }

    #[test]
    fn test_hash_mismatch_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let graph = diamond();
        let mut manager = CheckpointManager::open(dir.path(), &graph).unwrap();
        manager
            .record_node_completion("a", &NodeOutcome::completed("done"))
            .unwrap();
        let old_run_id = manager.run_id().to_string();
        drop(manager);

        let mut changed = diamond();
        changed.nodes[0].node_class = "review".to_string();
        let fresh = CheckpointManager::open(dir.path(), &changed).unwrap();
        assert_ne!(fresh.run_id(), old_run_id);
        assert_eq!(fresh.status_map()["a"], NodeStatus::Pending);
    }

    #[test]
    fn test_reopen_without_mutation_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let graph = diamond();
        let _first = CheckpointManager::open(dir.path(), &graph).unwrap();
        let before = fs::read(dir.path().join(CHECKPOINT_FILE)).unwrap();

        let _second = CheckpointManager::open(dir.path(), &graph).unwrap();
        let after = fs::read(dir.path().join(CHECKPOINT_FILE)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_missing_nodes_inserted_pending_on_resume() {
        let dir = TempDir::new().unwrap();
        let mut small = diamond();
        small.nodes.pop();
        small.edges.retain(|e| e.target != "d" && e.source != "d");
        let hash = graph_hash(&diamond());

        // Simulate an older file for the same graph missing node "d".
        let mut state = CheckpointState::new("run-old", hash, &small);
        state.graph_hash = graph_hash(&diamond());
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(
            dir.path().join(CHECKPOINT_FILE),
            serde_json::to_string_pretty(&state).unwrap(),
        )
        .unwrap();

        let manager = CheckpointManager::open(dir.path(), &diamond()).unwrap();
        assert_eq!(manager.status_map()["d"], NodeStatus::Pending);
        assert_eq!(manager.run_id(), "run-old");
    }

    #[test]
    fn test_invalidate_resets_subtree_only() {
        let dir = TempDir::new().unwrap();
        let graph = diamond();
        let mut manager = CheckpointManager::open(dir.path(), &graph).unwrap();
        for id in ["a", "b", "c", "d"] {
            manager
                .record_node_completion(id, &NodeOutcome::completed("done"))
                .unwrap();
        }

        manager.invalidate_nodes(&["b".to_string()]).unwrap();
        let statuses = manager.status_map();
        assert_eq!(statuses["a"], NodeStatus::Completed);
        assert_eq!(statuses["b"], NodeStatus::Pending);
        assert_eq!(statuses["c"], NodeStatus::Completed);
        assert_eq!(statuses["d"], NodeStatus::Pending);
        assert!(manager.node("b").unwrap().output_summary.is_none());
    }

    #[test]
    fn test_summary_truncated_on_write() {
        let dir = TempDir::new().unwrap();
        let mut manager = CheckpointManager::open(dir.path(), &diamond()).unwrap();
        let outcome = NodeOutcome::completed("y".repeat(5000));
        manager.record_node_completion("a", &outcome).unwrap();
        let stored = manager.output_summary("a").unwrap();
        assert_eq!(stored.chars().count(), crate::state::MAX_SUMMARY_CHARS);
    }

    #[test]
    fn test_discover_resume_dir_prefers_newest_match() {
        let tasks = TempDir::new().unwrap();
        let graph = diamond();
        let hash = graph_hash(&graph);

        for run in ["run-20250101-000000", "run-20250201-000000"] {
            let dir = tasks.path().join(run);
            fs::create_dir_all(&dir).unwrap();
            let state = CheckpointState::new(run, hash.clone(), &graph);
            fs::write(
                dir.join(CHECKPOINT_FILE),
                serde_json::to_string_pretty(&state).unwrap(),
            )
            .unwrap();
        }
        // A newer run of a different pipeline must not win.
        let other = tasks.path().join("run-20250301-000000");
        fs::create_dir_all(&other).unwrap();
        let state = CheckpointState::new("run-20250301-000000", "deadbeef", &graph);
        fs::write(
            other.join(CHECKPOINT_FILE),
            serde_json::to_string_pretty(&state).unwrap(),
        )
        .unwrap();

        let found = CheckpointManager::discover_resume_dir(tasks.path(), &hash).unwrap();
        assert!(found.ends_with("run-20250201-000000"));
    }

    #[test]
    fn test_unknown_node_rejected() {
        let dir = TempDir::new().unwrap();
        let mut manager = CheckpointManager::open(dir.path(), &diamond()).unwrap();
        let err = manager.record_node_start("ghost", "sonnet").unwrap_err();
        assert!(matches!(err, CheckpointError::UnknownNode(_)));
    }
}
