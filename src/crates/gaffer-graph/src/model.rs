//! Typed nodes, edges, fidelity modes, statuses, and outcomes.
//!
//! These are value types: the driver holds one `Graph` per planner cycle and
//! never mutates it. Two graphs are equal when their node definitions and
//! edge sets match, regardless of the textual order edges were declared in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::EdgeCondition;

/// Node identifier, unique within a graph
pub type NodeId = String;

/// Structural role of a node in the execution DAG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Ordinary unit of work
    Task,
    /// Produces a decision document consumed by downstream planning
    Discovery,
    /// Quality gate
    Gate,
    /// Structural split point
    FanOut,
    /// Structural join point
    FanIn,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Discovery => "discovery",
            Self::Gate => "gate",
            Self::FanOut => "fan_out",
            Self::FanIn => "fan_in",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which executor plane runs a node
///
/// Decoding is lenient: an unknown handler name warns and falls back to
/// software rather than rejecting the whole planner payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum HandlerKind {
    /// Git worktree isolation plus two-phase merge
    Software,
    /// Plain working directory, artifact collection
    Content,
    /// Complexity-classified investigation producing CONTEXT.md
    Discovery,
}

impl From<String> for HandlerKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "software" => Self::Software,
            "content" => Self::Content,
            "discovery" => Self::Discovery,
            other => {
                tracing::warn!(handler = %other, "unknown handler; using software");
                Self::Software
            }
        }
    }
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Content => "content",
            Self::Discovery => "discovery",
        }
    }
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How much upstream context a node's executor receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextFidelity {
    Minimal,
    Partial,
    Full,
}

impl ContextFidelity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Partial => "partial",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for ContextFidelity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Planner-supplied override for discovery complexity selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityHint {
    Simple,
    Complex,
}

/// Project domain, inferred from the outcomes text when the planner omits it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Software,
    Content,
    Mixed,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Content => "content",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting on upstream edges
    Pending,
    /// Frontier: all upstream edges satisfied
    Ready,
    /// Dispatched to a handler
    InProgress,
    /// Handler returned success
    Completed,
    /// Handler returned an error or the merge failed
    Failed,
    /// Executor skipped the work, or an upstream condition deactivated it
    Skipped,
    /// Reserved; retry policy is planner-driven
    Retrying,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Retrying => "retrying",
        }
    }

    /// Terminal statuses never transition again within a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for NodeStatus {
    fn from(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "ready" => Self::Ready,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            "retrying" => Self::Retrying,
            _ => Self::Pending,
        }
    }
}

/// A unit of work in the execution DAG
///
/// Most fields are optional in planner payloads; serde defaults keep the
/// decode lenient so a terse planner emission still produces a usable node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier, unique within the graph
    pub id: NodeId,

    /// Human label
    #[serde(default)]
    pub name: String,

    /// Structural role
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: NodeType,

    /// Key into the model-config resolver (e.g. "planning", "implementation")
    #[serde(default = "default_node_class")]
    pub node_class: String,

    /// Executor plane
    #[serde(default = "default_handler")]
    pub handler: HandlerKind,

    /// Upstream context level passed to the executor
    #[serde(default = "default_fidelity")]
    pub context_fidelity: ContextFidelity,

    /// Free-form mapping consumed by the handler
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,

    /// Ordered quality assertions
    #[serde(default)]
    pub criteria: Vec<String>,

    /// Optional simple/complex override for discovery nodes
    #[serde(default)]
    pub complexity_hint: Option<ComplexityHint>,

    /// Investigation tools suggested to a discovery agent
    #[serde(default)]
    pub discovery_tools: Vec<String>,

    /// Reference material paths for the executor
    #[serde(default)]
    pub source_materials: Vec<String>,

    /// PRD document path (software nodes)
    #[serde(default)]
    pub prd_path: Option<String>,

    /// Git branch the node's work lands on (software nodes)
    #[serde(default)]
    pub branch: Option<String>,

    /// Expected artifact location (content nodes)
    #[serde(default)]
    pub output_path: Option<String>,

    /// Reserved; retry policy is planner-driven
    #[serde(default)]
    pub max_retries: u32,

    /// Reserved; retry policy is planner-driven
    #[serde(default)]
    pub retry_target: Option<String>,
}

fn default_node_type() -> NodeType {
    NodeType::Task
}

fn default_node_class() -> String {
    "implementation".to_string()
}

fn default_handler() -> HandlerKind {
    HandlerKind::Software
}

fn default_fidelity() -> ContextFidelity {
    ContextFidelity::Minimal
}

impl Node {
    /// Create a task node with the given id; everything else defaulted
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            node_type: default_node_type(),
            node_class: default_node_class(),
            handler: default_handler(),
            context_fidelity: default_fidelity(),
            inputs: BTreeMap::new(),
            criteria: Vec::new(),
            complexity_hint: None,
            discovery_tools: Vec::new(),
            source_materials: Vec::new(),
            prd_path: None,
            branch: None,
            output_path: None,
            max_retries: 0,
            retry_target: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_handler(mut self, handler: HandlerKind) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_class(mut self, node_class: impl Into<String>) -> Self {
        self.node_class = node_class.into();
        self
    }

    pub fn with_fidelity(mut self, fidelity: ContextFidelity) -> Self {
        self.context_fidelity = fidelity;
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Directed edge with an activation condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub condition: EdgeCondition,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            condition: EdgeCondition::Always,
        }
    }

    pub fn with_condition(mut self, condition: EdgeCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Sort key used for canonical serialization
    pub fn sort_key(&self) -> (String, String, String) {
        (
            self.source.clone(),
            self.target.clone(),
            self.condition.to_string(),
        )
    }
}

/// One planner emission: nodes, edges, and an optional domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,

    #[serde(default)]
    pub edges: Vec<Edge>,

    #[serde(default)]
    pub domain: Option<Domain>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            nodes,
            edges,
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All node ids in declaration order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl PartialEq for Graph {
    /// Structural equality: node definitions by id, edge set ignoring order
    fn eq(&self, other: &Self) -> bool {
        if self.domain != other.domain || self.nodes.len() != other.nodes.len() {
            return false;
        }
        let by_id: BTreeMap<&str, &Node> = self.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        for node in &other.nodes {
            match by_id.get(node.id.as_str()) {
                Some(mine) if *mine == node => {}
                _ => return false,
            }
        }
        let mut a: Vec<_> = self.edges.iter().map(Edge::sort_key).collect();
        let mut b: Vec<_> = other.edges.iter().map(Edge::sort_key).collect();
        a.sort();
        b.sort();
        a == b
    }
}

/// An executor's return value for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    /// Final status the node reached
    pub status: NodeStatus,

    /// Human-readable summary of what happened
    #[serde(default)]
    pub output_summary: String,

    /// Artifact paths relative to the project root
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Wall-clock seconds spent in the handler
    #[serde(default)]
    pub duration: f64,

    /// Model identifier the agent ran with
    #[serde(default)]
    pub model_used: String,

    /// Failure description when status is failed
    #[serde(default)]
    pub error_details: Option<String>,

    /// Commits the node produced on its branch
    #[serde(default)]
    pub commit_shas: Vec<String>,

    /// Software nodes only: whether the mainline merge succeeded
    #[serde(default)]
    pub merge_success: Option<bool>,

    /// Software nodes only: merge diagnostics
    #[serde(default)]
    pub merge_details: Option<String>,
}

impl NodeOutcome {
    pub fn new(status: NodeStatus) -> Self {
        Self {
            status,
            output_summary: String::new(),
            artifacts: Vec::new(),
            duration: 0.0,
            model_used: String::new(),
            error_details: None,
            commit_shas: Vec::new(),
            merge_success: None,
            merge_details: None,
        }
    }

    pub fn completed(summary: impl Into<String>) -> Self {
        let mut outcome = Self::new(NodeStatus::Completed);
        outcome.output_summary = summary.into();
        outcome
    }

    pub fn failed(summary: impl Into<String>, error: impl Into<String>) -> Self {
        let mut outcome = Self::new(NodeStatus::Failed);
        outcome.output_summary = summary.into();
        outcome.error_details = Some(error.into());
        outcome
    }

    pub fn skipped(summary: impl Into<String>) -> Self {
        let mut outcome = Self::new(NodeStatus::Skipped);
        outcome.output_summary = summary.into();
        outcome
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.output_summary = summary.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_used = model.into();
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = seconds;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Look up an attribute by name, for `output.<field>` edge conditions
    ///
    /// The outcome is viewed through its serde representation so the
    /// condition grammar addresses exactly the fields a checkpoint stores.
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        let value = serde_json::to_value(self).ok()?;
        value.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::EdgeCondition;

    #[test]
    fn test_status_terminal_set() {
        assert!(NodeStatus::Completed.is_terminal());
        assert!(NodeStatus::Failed.is_terminal());
        assert!(NodeStatus::Skipped.is_terminal());
        assert!(!NodeStatus::Pending.is_terminal());
        assert!(!NodeStatus::Ready.is_terminal());
        assert!(!NodeStatus::InProgress.is_terminal());
        assert!(!NodeStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            NodeStatus::Pending,
            NodeStatus::Ready,
            NodeStatus::InProgress,
            NodeStatus::Completed,
            NodeStatus::Failed,
            NodeStatus::Skipped,
            NodeStatus::Retrying,
        ] {
            assert_eq!(NodeStatus::from(status.as_str()), status);
        }
        assert_eq!(NodeStatus::from("bogus"), NodeStatus::Pending);
    }

    #[test]
    fn test_node_decode_with_defaults() {
        let node: Node = serde_json::from_value(serde_json::json!({
            "id": "build-api",
            "name": "Build the API",
            "type": "task",
            "branch": "feat/api"
        }))
        .unwrap();
        assert_eq!(node.handler, HandlerKind::Software);
        assert_eq!(node.node_class, "implementation");
        assert_eq!(node.context_fidelity, ContextFidelity::Minimal);
        assert_eq!(node.branch.as_deref(), Some("feat/api"));
        assert!(node.criteria.is_empty());
    }

    #[test]
    fn test_graph_equality_ignores_edge_order() {
        let nodes = vec![Node::new("a"), Node::new("b"), Node::new("c")];
        let e1 = Edge::new("a", "b");
        let e2 = Edge::new("a", "c").with_condition(EdgeCondition::StatusFail);
        let g1 = Graph::new(nodes.clone(), vec![e1.clone(), e2.clone()]);
        let g2 = Graph::new(nodes, vec![e2, e1]);
        assert_eq!(g1, g2);
    }

    #[test]
    fn test_graph_equality_detects_node_difference() {
        let g1 = Graph::new(vec![Node::new("a")], vec![]);
        let g2 = Graph::new(vec![Node::new("a").with_class("review")], vec![]);
        assert_ne!(g1, g2);
    }

    #[test]
    fn test_outcome_field_lookup() {
        let outcome = NodeOutcome::completed("done").with_model("sonnet");
        assert_eq!(
            outcome.field("status"),
            Some(serde_json::json!("completed"))
        );
        assert_eq!(outcome.field("model_used"), Some(serde_json::json!("sonnet")));
        assert_eq!(outcome.field("no_such_field"), None);
    }
}
