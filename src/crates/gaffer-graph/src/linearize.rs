//! Conversion of legacy flat sprint lists into execution graphs.
//!
//! Older planners emit a `next_task` signal carrying `sprints[]` instead of
//! an explicit graph. Each sprint becomes a software task node. Sprints
//! flagged `parallel_safe` fan out from the nearest preceding sequential
//! sprint, and the next sequential sprint joins them; plain sprints chain.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{Edge, Graph, HandlerKind, Node, NodeType};

/// One sprint from a legacy `next_task` signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub name: String,
    #[serde(default)]
    pub prd: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub parallel_safe: bool,
}

/// Replace everything outside `[A-Za-z0-9._-]` with `-`
pub fn sanitize_id(raw: &str) -> String {
    let mut id: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if id.is_empty() {
        id.push_str("sprint");
    }
    id
}

/// Build a graph from a flat sprint list.
///
/// A parallel block with no preceding sequential sprint is kept: its nodes
/// become independent roots and the next sequential sprint still joins
/// them. Duplicate sanitized ids get `-2`, `-3`, ... suffixes.
pub fn linearize_sprints(sprints: &[Sprint]) -> Graph {
    let mut nodes: Vec<Node> = Vec::new();
    let mut edges: Vec<Edge> = Vec::new();
    let mut used: HashMap<String, usize> = HashMap::new();

    let mut prev_sequential: Option<String> = None;
    let mut open_parallel: Vec<String> = Vec::new();

    for sprint in sprints {
        let base = sanitize_id(&sprint.name);
        let id = match used.get_mut(&base) {
            Some(count) => {
                *count += 1;
                format!("{}-{}", base, count)
            }
            None => {
                used.insert(base.clone(), 1);
                base
            }
        };

        let mut node = Node::new(id.clone())
            .with_name(sprint.name.clone())
            .with_type(NodeType::Task)
            .with_handler(HandlerKind::Software)
            .with_class("implementation");
        node.prd_path = sprint.prd.clone();
        node.branch = sprint.branch.clone();
        nodes.push(node);

        if sprint.parallel_safe {
            if let Some(root) = &prev_sequential {
                edges.push(Edge::new(root.clone(), id.clone()));
            }
            open_parallel.push(id);
        } else {
            if open_parallel.is_empty() {
                if let Some(prev) = &prev_sequential {
                    edges.push(Edge::new(prev.clone(), id.clone()));
                }
            } else {
                for parallel_id in open_parallel.drain(..) {
                    edges.push(Edge::new(parallel_id, id.clone()));
                }
            }
            prev_sequential = Some(id);
        }
    }

    Graph::new(nodes, edges)
}
