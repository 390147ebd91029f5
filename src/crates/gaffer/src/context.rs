//! Node-context assembly at minimal / partial / full fidelity.
//!
//! Every executor context carries the node's parameters (rendered as
//! structured text), the first 500 characters of the project outcomes, and
//! the well-known memory file listing. Partial fidelity adds direct
//! upstream summaries and the full decision document of any upstream
//! discovery node; full fidelity adds untruncated summaries for the whole
//! transitive upstream set. Budgets are estimated at four characters per
//! token; only the full ceiling changes the output, by downgrading to the
//! partial rendering.

use std::fs;

use gaffer_checkpoint::CheckpointManager;
use gaffer_graph::{ContextFidelity, Graph, GraphEngine, HandlerKind, Node};
use tracing::warn;

use crate::project::ProjectLayout;

/// Soft budget for minimal fidelity, in estimated tokens
pub const MINIMAL_TOKEN_BUDGET: usize = 30_000;
/// Soft budget for partial fidelity
pub const PARTIAL_TOKEN_BUDGET: usize = 60_000;
/// Hard ceiling for full fidelity; exceeding it downgrades to partial
pub const FULL_TOKEN_CEILING: usize = 100_000;

/// Characters of the outcomes file included in every context
const OUTCOMES_CHARS: usize = 500;
/// Per-upstream summary truncation at partial fidelity
const UPSTREAM_SUMMARY_CHARS: usize = 500;

/// chars/4 token estimate
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

/// Builds executor context strings for one graph and checkpoint
pub struct ContextBuilder<'a> {
    project: &'a ProjectLayout,
    graph: &'a Graph,
    engine: &'a GraphEngine,
    checkpoint: &'a CheckpointManager,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(
        project: &'a ProjectLayout,
        graph: &'a Graph,
        engine: &'a GraphEngine,
        checkpoint: &'a CheckpointManager,
    ) -> Self {
        Self {
            project,
            graph,
            engine,
            checkpoint,
        }
    }

    /// Build the context for `node` at `fidelity`.
    pub fn build(&self, node: &Node, fidelity: ContextFidelity) -> String {
        match fidelity {
            ContextFidelity::Minimal => {
                let context = self.base_sections(node);
                Self::warn_over_budget(&node.id, "minimal", &context, MINIMAL_TOKEN_BUDGET);
                context
            }
            ContextFidelity::Partial => {
                let context = self.partial(node);
                Self::warn_over_budget(&node.id, "partial", &context, PARTIAL_TOKEN_BUDGET);
                context
            }
            ContextFidelity::Full => {
                let context = self.full(node);
                if estimate_tokens(&context) > FULL_TOKEN_CEILING {
                    warn!(
                        node = %node.id,
                        estimated_tokens = estimate_tokens(&context),
                        "full context exceeds ceiling; downgrading to partial"
                    );
                    return self.build(node, ContextFidelity::Partial);
                }
                context
            }
        }
    }

    fn warn_over_budget(node_id: &str, level: &str, context: &str, budget: usize) {
        let estimate = estimate_tokens(context);
        if estimate > budget {
            warn!(
                node = %node_id,
                level,
                estimated_tokens = estimate,
                budget,
                "node context exceeds token budget"
            );
        }
    }

    /// Sections included at every fidelity
    fn base_sections(&self, node: &Node) -> String {
        let params = serde_yaml::to_string(node)
            .unwrap_or_else(|_| format!("id: {}\n", node.id));
        let outcomes = self.project.outcomes_summary(OUTCOMES_CHARS);
        format!(
            "NODE: {}\n\n--- NODE PARAMETERS ---\n{}\n--- PROJECT OUTCOMES (excerpt) ---\n{}\n\n--- MEMORY FILES ---\n{}\n",
            node.id,
            params,
            outcomes,
            self.project.memory_file_listing()
        )
    }

    fn partial(&self, node: &Node) -> String {
        let mut context = self.base_sections(node);
        let upstream = self.engine.upstream_of(&node.id);
        if upstream.is_empty() {
            return context;
        }

        context.push_str("\n--- UPSTREAM RESULTS ---\n");
        for source in &upstream {
            let status = self
                .checkpoint
                .node(source)
                .map(|entry| entry.status.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let summary = self
                .checkpoint
                .output_summary(source)
                .unwrap_or_else(|| "no summary recorded".to_string());
            context.push_str(&format!(
                "Upstream '{}' ({}): {}\n",
                source,
                status,
                truncate_chars(&summary, UPSTREAM_SUMMARY_CHARS)
            ));
        }

        // Upstream discovery decisions come through whole: downstream
        // planning depends on the document, not a digest of it.
        for source in &upstream {
            let is_discovery = self
                .graph
                .node(source)
                .map(|n| n.handler == HandlerKind::Discovery)
                .unwrap_or(false);
            if !is_discovery {
                continue;
            }
            let path = self.project.node_dir(source).join("CONTEXT.md");
            match fs::read_to_string(&path) {
                Ok(document) => {
                    context.push_str(&format!(
                        "\n--- DISCOVERY CONTEXT: {} ---\n{}\n",
                        source, document
                    ));
                }
                Err(_) => {
                    context.push_str(&format!(
                        "\n--- DISCOVERY CONTEXT: {} --- (missing)\n",
                        source
                    ));
                }
            }
        }
        context
    }

    fn full(&self, node: &Node) -> String {
        let mut context = self.partial(node);
        let transitive = self.engine.upstream_closure(&node.id);
        let direct = self.engine.upstream_of(&node.id);
        let indirect: Vec<_> = transitive
            .iter()
            .filter(|id| !direct.contains(id))
            .collect();
        if indirect.is_empty() && direct.is_empty() {
            return context;
        }

        context.push_str("\n--- FULL UPSTREAM HISTORY ---\n");
        for source in &transitive {
            let summary = self
                .checkpoint
                .output_summary(source)
                .unwrap_or_else(|| "no summary recorded".to_string());
            context.push_str(&format!("'{}': {}\n", source, summary));
        }
        context
    }
}
