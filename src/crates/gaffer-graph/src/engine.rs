//! Graph validation, adjacency indices, and ready-set computation.
//!
//! Node ids are interned into dense indices at construction; adjacency is
//! held as flat vectors of edge indices so every query is O(V + E). The
//! engine never mutates node state: callers pass the current status and
//! outcome maps (owned by the checkpoint layer) into each query.

use std::collections::{HashMap, VecDeque};

use crate::condition::EdgeCondition;
use crate::error::GraphError;
use crate::model::{Edge, Graph, NodeId, NodeOutcome, NodeStatus};

/// Read-only traversal engine over one planner-emitted graph
pub struct GraphEngine {
    /// Interned node ids, sorted so iteration order is deterministic
    ids: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    /// Edges whose endpoints both resolve; dangling edges are only
    /// reported by validation and never traversed
    edges: Vec<Edge>,
    /// Outgoing edge indices per node
    forward: Vec<Vec<usize>>,
    /// Incoming edge indices per node
    reverse: Vec<Vec<usize>>,
    /// Edges that referenced at least one unknown endpoint
    dangling: Vec<Edge>,
}

impl GraphEngine {
    pub fn new(graph: &Graph) -> Self {
        let mut ids: Vec<NodeId> = graph.nodes.iter().map(|n| n.id.clone()).collect();
        ids.sort();
        ids.dedup();
        let index: HashMap<NodeId, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut edges = Vec::new();
        let mut dangling = Vec::new();
        let mut forward = vec![Vec::new(); ids.len()];
        let mut reverse = vec![Vec::new(); ids.len()];

        for edge in &graph.edges {
            match (index.get(&edge.source), index.get(&edge.target)) {
                (Some(&src), Some(&tgt)) => {
                    let edge_idx = edges.len();
                    edges.push(edge.clone());
                    forward[src].push(edge_idx);
                    reverse[tgt].push(edge_idx);
                }
                _ => dangling.push(edge.clone()),
            }
        }

        Self {
            ids,
            index,
            edges,
            forward,
            reverse,
            dangling,
        }
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All node ids in deterministic (sorted) order
    pub fn node_ids(&self) -> &[NodeId] {
        &self.ids
    }

    /// Outgoing edges of a node, for condition observability logging
    pub fn edges_from(&self, id: &str) -> Vec<&Edge> {
        match self.index.get(id) {
            Some(&idx) => self.forward[idx].iter().map(|&e| &self.edges[e]).collect(),
            None => Vec::new(),
        }
    }

    /// Validate reference integrity and acyclicity.
    ///
    /// Returns one error per unknown node referenced by any edge, plus a
    /// concrete cycle path when the known-endpoint subgraph is cyclic. An
    /// empty vector means the graph is traversable.
    pub fn validate(&self) -> Vec<GraphError> {
        let mut errors = Vec::new();

        let mut reported: Vec<&str> = Vec::new();
        for edge in &self.dangling {
            for endpoint in [edge.source.as_str(), edge.target.as_str()] {
                if !self.index.contains_key(endpoint) && !reported.contains(&endpoint) {
                    reported.push(endpoint);
                    errors.push(GraphError::UnknownNode {
                        edge_source: edge.source.clone(),
                        target: edge.target.clone(),
                        node: endpoint.to_string(),
                    });
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            errors.push(GraphError::Cycle(cycle.join(" -> ")));
        }

        errors
    }

    /// Kahn's algorithm over the known-endpoint subgraph; when it cannot
    /// visit every node, a DFS over the remainder extracts one concrete
    /// cycle path `v0 -> ... -> v0`.
    fn find_cycle(&self) -> Option<Vec<NodeId>> {
        let n = self.ids.len();
        let mut in_degree: Vec<usize> = vec![0; n];
        for (idx, incoming) in self.reverse.iter().enumerate() {
            in_degree[idx] = incoming.len();
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0usize;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            for &edge_idx in &self.forward[node] {
                let tgt = self.index[&self.edges[edge_idx].target];
                in_degree[tgt] -= 1;
                if in_degree[tgt] == 0 {
                    queue.push_back(tgt);
                }
            }
        }
        if visited == n {
            return None;
        }

        // Some node with remaining in-degree sits on or downstream of a
        // cycle; walk forward with a parent array until a node repeats.
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;
        let mut color = vec![WHITE; n];
        let mut parent: Vec<Option<usize>> = vec![None; n];

        for start in (0..n).filter(|&i| in_degree[i] > 0) {
            if color[start] != WHITE {
                continue;
            }
            let mut stack = vec![(start, 0usize)];
            color[start] = GRAY;
            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                if frame.1 < self.forward[node].len() {
                    let edge_idx = self.forward[node][frame.1];
                    frame.1 += 1;
                    let tgt = self.index[&self.edges[edge_idx].target];
                    match color[tgt] {
                        WHITE => {
                            parent[tgt] = Some(node);
                            color[tgt] = GRAY;
                            stack.push((tgt, 0));
                        }
                        GRAY => {
                            // Back edge closes the cycle: walk the parent
                            // chain from the current node back to the
                            // target, then flip it into edge order.
                            let mut path = vec![self.ids[tgt].clone()];
                            let mut cursor = node;
                            while cursor != tgt {
                                path.push(self.ids[cursor].clone());
                                cursor = parent[cursor].expect("gray nodes have parents");
                            }
                            path.push(self.ids[tgt].clone());
                            let last = path.len() - 1;
                            path[1..last].reverse();
                            return Some(path);
                        }
                        _ => {}
                    }
                } else {
                    color[node] = BLACK;
                    stack.pop();
                }
            }
        }
        None
    }

    /// Whether one incoming edge admits its target, given the source's
    /// current status and recorded outcome.
    ///
    /// Completed sources evaluate the condition against their outcome.
    /// Failed sources only satisfy an explicit `status == "fail"` edge;
    /// skipped sources satisfy nothing, so skips cascade downstream.
    fn edge_admits(
        edge: &Edge,
        source_status: NodeStatus,
        outcome: Option<&NodeOutcome>,
    ) -> bool {
        match source_status {
            NodeStatus::Completed => match outcome {
                Some(outcome) => edge.condition.evaluate(outcome),
                None => edge
                    .condition
                    .evaluate(&NodeOutcome::new(NodeStatus::Completed)),
            },
            NodeStatus::Failed => edge.condition == EdgeCondition::StatusFail,
            _ => false,
        }
    }

    /// Compute the ready frontier.
    ///
    /// A node is ready iff it is not terminal and not in progress, every
    /// incoming edge's source is terminal, and every incoming edge admits
    /// it. Nodes with no incoming edges are ready until they terminate.
    pub fn ready_set(
        &self,
        statuses: &HashMap<NodeId, NodeStatus>,
        outcomes: &HashMap<NodeId, NodeOutcome>,
    ) -> Vec<NodeId> {
        self.frontier(statuses, outcomes).0
    }

    /// Nodes whose every upstream is terminal but at least one edge does
    /// not admit them. They can never become ready; the driver records
    /// them as skipped so deactivated branches drain instead of
    /// deadlocking the traversal.
    pub fn skip_eligible(
        &self,
        statuses: &HashMap<NodeId, NodeStatus>,
        outcomes: &HashMap<NodeId, NodeOutcome>,
    ) -> Vec<NodeId> {
        self.frontier(statuses, outcomes).1
    }

    fn frontier(
        &self,
        statuses: &HashMap<NodeId, NodeStatus>,
        outcomes: &HashMap<NodeId, NodeOutcome>,
    ) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut ready = Vec::new();
        let mut skippable = Vec::new();

        for (idx, id) in self.ids.iter().enumerate() {
            let status = statuses.get(id).copied().unwrap_or(NodeStatus::Pending);
            if status.is_terminal() || status == NodeStatus::InProgress {
                continue;
            }

            let mut all_terminal = true;
            let mut all_admit = true;
            for &edge_idx in &self.reverse[idx] {
                let edge = &self.edges[edge_idx];
                let source_status = statuses
                    .get(&edge.source)
                    .copied()
                    .unwrap_or(NodeStatus::Pending);
                if !source_status.is_terminal() {
                    all_terminal = false;
                    break;
                }
                if !Self::edge_admits(edge, source_status, outcomes.get(&edge.source)) {
                    all_admit = false;
                }
            }

            if all_terminal && all_admit {
                ready.push(id.clone());
            } else if all_terminal {
                skippable.push(id.clone());
            }
        }

        (ready, skippable)
    }

    /// For deadlock reporting: each non-terminal node paired with the
    /// upstream sources that are still non-terminal.
    pub fn blocked_report(
        &self,
        statuses: &HashMap<NodeId, NodeStatus>,
    ) -> Vec<(NodeId, Vec<(NodeId, NodeStatus)>)> {
        let mut report = Vec::new();
        for (idx, id) in self.ids.iter().enumerate() {
            let status = statuses.get(id).copied().unwrap_or(NodeStatus::Pending);
            if status.is_terminal() {
                continue;
            }
            let unmet: Vec<(NodeId, NodeStatus)> = self.reverse[idx]
                .iter()
                .map(|&e| &self.edges[e].source)
                .map(|src| {
                    (
                        src.clone(),
                        statuses.get(src).copied().unwrap_or(NodeStatus::Pending),
                    )
                })
                .filter(|(_, s)| !s.is_terminal())
                .collect();
            report.push((id.clone(), unmet));
        }
        report
    }

    /// Direct upstream sources of a node, in edge order
    pub fn upstream_of(&self, id: &str) -> Vec<NodeId> {
        match self.index.get(id) {
            Some(&idx) => self.reverse[idx]
                .iter()
                .map(|&e| self.edges[e].source.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Transitive upstream closure of a node, the node itself excluded,
    /// in deterministic (sorted) order.
    pub fn upstream_closure(&self, id: &str) -> Vec<NodeId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.ids.len()];
        seen[start] = true;
        let mut queue: VecDeque<usize> = VecDeque::from([start]);
        let mut closure = Vec::new();
        while let Some(node) = queue.pop_front() {
            for &edge_idx in &self.reverse[node] {
                let src = self.index[&self.edges[edge_idx].source];
                if !seen[src] {
                    seen[src] = true;
                    queue.push_back(src);
                    closure.push(self.ids[src].clone());
                }
            }
        }
        closure.sort();
        closure
    }

    /// Transitive forward closure of the seed set, seeds included.
    pub fn downstream_closure(&self, seeds: &[NodeId]) -> Vec<NodeId> {
        let mut seen = vec![false; self.ids.len()];
        let mut queue: VecDeque<usize> = VecDeque::new();
        for seed in seeds {
            if let Some(&idx) = self.index.get(seed) {
                if !seen[idx] {
                    seen[idx] = true;
                    queue.push_back(idx);
                }
            }
        }
        let mut closure = Vec::new();
        while let Some(node) = queue.pop_front() {
            closure.push(self.ids[node].clone());
            for &edge_idx in &self.forward[node] {
                let tgt = self.index[&self.edges[edge_idx].target];
                if !seen[tgt] {
                    seen[tgt] = true;
                    queue.push_back(tgt);
                }
            }
        }
        closure
    }
}
