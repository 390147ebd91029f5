//! Canonical graph hashing.
//!
//! The hash is the resume key: a restarted orchestrator adopts the newest
//! run whose stored hash matches the incoming graph. Canonicalization
//! erases everything incidental (declaration order, absent optionals) so
//! only semantic changes produce a new hash: nodes sort by id, edges sort
//! by (source, target, condition), enums render as their string values,
//! and absent optionals render as `null`. serde_json's default map is
//! BTreeMap-backed, so object keys come out sorted without extra work.

use gaffer_graph::Graph;
use sha2::{Digest, Sha256};

/// Canonical SHA-256 of a graph, hex-encoded
pub fn graph_hash(graph: &Graph) -> String {
    let canonical =
        serde_json::to_string(&canonical_value(graph)).expect("graph serialization is infallible");
    let digest = Sha256::digest(canonical.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn canonical_value(graph: &Graph) -> serde_json::Value {
    let mut nodes: Vec<&gaffer_graph::Node> = graph.nodes.iter().collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut edges: Vec<serde_json::Value> = Vec::with_capacity(graph.edges.len());
    let mut sorted_edges: Vec<_> = graph.edges.iter().collect();
    sorted_edges.sort_by_key(|e| e.sort_key());
    for edge in sorted_edges {
        edges.push(serde_json::json!({
            "source": edge.source,
            "target": edge.target,
            "condition": edge.condition.to_string(),
        }));
    }

    serde_json::json!({
        "domain": graph.domain,
        "edges": edges,
        "nodes": nodes,
    })
}
