//! Software handler: isolated worktree execution plus mainline merge.
//!
//! Each invocation syncs the mainline branch, creates a dedicated
//! worktree for the node's branch, runs the implementation agent inside
//! it, and — when the agent signals done — merges the branch back with
//! the two-phase conflict-aware merge. The worktree is removed on every
//! exit path; the branch is deleted only after a successful merge so a
//! failed node's work stays inspectable.

use std::time::Instant;

use async_trait::async_trait;
use gaffer_graph::linearize::sanitize_id;
use gaffer_graph::{Node, NodeOutcome};
use tracing::{info, warn};

use crate::git::{GitRepo, MergeReport};
use crate::handlers::{outcome_from_signal, run_node_agent, HandlerContext, NodeHandler};
use crate::signal::ExecutorSignal;

/// Agent invoked for implementation nodes
const SOFTWARE_AGENT: &str = "pl";

pub struct SoftwareHandler;

impl SoftwareHandler {
    /// Branch the node's work lands on
    fn branch_for(node: &Node) -> String {
        node.branch
            .clone()
            .unwrap_or_else(|| format!("node/{}", sanitize_id(&node.id)))
    }

    /// Agent context: node identity and branch, the quality criteria,
    /// the inputs as structured text, then whatever upstream context the
    /// caller assembled.
    fn agent_context(node: &Node, branch: &str, upstream: &str) -> String {
        let mut parts = Vec::new();
        if let Some(prd) = &node.prd_path {
            parts.push(format!("PRD_PATH: {}", prd));
        }
        parts.push(format!("BRANCH: {}", branch));
        parts.push(format!("NODE_NAME: {}", node.name));
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
}

#[async_trait]
impl NodeHandler for SoftwareHandler {
    async fn execute(&self, node: &Node, ctx: &HandlerContext<'_>) -> NodeOutcome {
        let start = Instant::now();
        let repo = GitRepo::new(ctx.project.root());

        // Mainline sync first; without it there is nothing to merge into.
        let mainline = match repo.checkout_mainline().await {
            Ok(mainline) => mainline,
            Err(err) => {
                return NodeOutcome::failed(
                    "mainline sync failed".to_string(),
                    err.to_string(),
                )
                .with_duration(start.elapsed().as_secs_f64());
            }
        };

        let branch = Self::branch_for(node);
        let worktree = ctx.project.worktree_path(&sanitize_id(&node.id));
        if let Err(err) = repo.add_worktree(&worktree, &branch).await {
            return NodeOutcome::failed(
                format!("failed to create worktree for branch '{}'", branch),
                err.to_string(),
            )
            .with_duration(start.elapsed().as_secs_f64());
        }

        let context = Self::agent_context(node, &branch, ctx.node_context);
        let (signal, _payload, model_used) = run_node_agent(
            SOFTWARE_AGENT,
            context,
            worktree.clone(),
            ctx.model,
            ctx.runner,
        )
        .await;

        let mut outcome = outcome_from_signal(&signal, &model_used, start.elapsed());

        if matches!(signal, ExecutorSignal::Done { .. }) {
            outcome.commit_shas = repo.branch_commits(&mainline, &branch).await;
            match repo.merge_branch(&branch).await {
                Ok(MergeReport::Merged) => {
                    outcome.merge_success = Some(true);
                    outcome.merge_details =
                        Some(format!("merged '{}' into {}", branch, mainline));
                }
                Ok(MergeReport::Conflict { details, .. }) => {
                    warn!(branch = %branch, "merge conflict; branch preserved for inspection");
                    outcome = NodeOutcome::failed(
                        format!("merge of '{}' failed with conflicts", branch),
                        format!("merge_failed: {}", details),
                    )
                    .with_model(model_used.clone())
                    .with_duration(start.elapsed().as_secs_f64());
                    outcome.merge_success = Some(false);
                    outcome.merge_details = Some(details);
                }
                Err(err) => {
                    outcome = NodeOutcome::failed(
                        format!("merge of '{}' failed", branch),
                        format!("merge_failed: {}", err),
                    )
                    .with_model(model_used.clone())
                    .with_duration(start.elapsed().as_secs_f64());
                    outcome.merge_success = Some(false);
                    outcome.merge_details = Some(err.to_string());
                }
            }
        }

        // Cleanup on every path: the worktree never outlives the node.
        repo.remove_worktree(&worktree).await;
        if outcome.merge_success == Some(true) {
            repo.delete_branch(&branch).await;
        }
        outcome.duration = start.elapsed().as_secs_f64();
        info!(
            node = %node.id,
            status = %outcome.status,
            merge = ?outcome.merge_success,
            "software node finished"
        );
        outcome
    }
}
