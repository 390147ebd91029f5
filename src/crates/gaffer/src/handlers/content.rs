//! Content handler: non-code production work with artifact validation.
//!
//! No git involvement: the agent produces files either at the node's
//! declared `output_path` or under `tasks/<node-id>/`. After the agent
//! returns, the handler verifies something was actually produced; a
//! `done` signal with no artifacts on disk escalates to a failed outcome
//! with `missing_output`.

use std::time::Instant;

use async_trait::async_trait;
use gaffer_graph::{Node, NodeOutcome, NodeStatus};
use tracing::{info, warn};

use crate::handlers::{collect_files, outcome_from_signal, run_node_agent, HandlerContext, NodeHandler};
use crate::signal::ExecutorSignal;

/// Agent invoked for content nodes
const CONTENT_AGENT: &str = "content";

pub struct ContentHandler;

impl ContentHandler {
    fn agent_context(node: &Node, output_dir: &str, upstream: &str) -> String {
        let mut parts = vec![
            "TASK_KIND: content".to_string(),
            format!("TOPIC: {}", node.name),
        ];
        match &node.output_path {
            Some(path) => parts.push(format!("OUTPUT_PATH: {}", path)),
            None => parts.push(format!("OUTPUT_DIR: {}", output_dir)),
        }
        if let Some(style) = node.inputs.get("style_guide") {
            parts.push(format!("STYLE_GUIDE: {}", style));
        }
        if !node.criteria.is_empty() {
            parts.push(format!("CRITERIA:\n- {}", node.criteria.join("\n- ")));
        }
        if !node.inputs.is_empty() {
            let inputs = serde_yaml::to_string(&node.inputs).unwrap_or_default();
            parts.push(format!("INPUTS:\n{}", inputs));
        }
        if !upstream.is_empty() {
            parts.push(format!("\n{}", upstream));
        }
        parts.join("\n")
    }

    /// Collect artifacts per the node's declaration. Returns an error
    /// description when nothing usable exists.
    fn validate_artifacts(
        node: &Node,
        ctx: &HandlerContext<'_>,
    ) -> std::result::Result<Vec<String>, String> {
        let root = ctx.project.root();
        if let Some(declared) = &node.output_path {
            let path = root.join(declared);
            if path.is_file() {
                return Ok(vec![declared.clone()]);
            }
            if path.is_dir() {
                let files = collect_files(&path, root);
                if files.is_empty() {
                    return Err(format!("declared output directory '{}' is empty", declared));
                }
                return Ok(files);
            }
            return Err(format!("declared output path '{}' does not exist", declared));
        }

        let node_dir = ctx.project.node_dir(&node.id);
        let files = collect_files(&node_dir, root);
        if files.is_empty() {
            return Err(format!(
                "no artifacts produced under tasks/{}/",
                node.id
            ));
        }
        Ok(files)
    }
}

#[async_trait]
impl NodeHandler for ContentHandler {
    async fn execute(&self, node: &Node, ctx: &HandlerContext<'_>) -> NodeOutcome {
        let start = Instant::now();
        let node_dir = ctx.project.node_dir(&node.id);
        if let Err(err) = std::fs::create_dir_all(&node_dir) {
            return NodeOutcome::failed(
                "could not create node working directory".to_string(),
                err.to_string(),
            );
        }

        let context = Self::agent_context(
            node,
            &format!("tasks/{}", node.id),
            ctx.node_context,
        );
        let (signal, _payload, model_used) = run_node_agent(
            CONTENT_AGENT,
            context,
            ctx.project.root().to_path_buf(),
            ctx.model,
            ctx.runner,
        )
        .await;

        let mut outcome = outcome_from_signal(&signal, &model_used, start.elapsed());

        // Artifact validation outranks the agent's own signal: done with
        // nothing on disk is a failure.
        if matches!(signal, ExecutorSignal::Done { .. }) {
            match Self::validate_artifacts(node, ctx) {
                Ok(artifacts) => {
                    info!(node = %node.id, count = artifacts.len(), "content artifacts collected");
                    outcome.artifacts = artifacts;
                }
                Err(details) => {
                    warn!(node = %node.id, details = %details, "content node produced no output");
                    outcome.status = NodeStatus::Failed;
                    outcome.error_details = Some(format!("missing_output: {}", details));
                }
            }
        }
        outcome
    }
}
