//! Per-node-type executors.
//!
//! Handlers form a closed set of three: software (worktree isolation and
//! mainline merge), content (artifact production), and discovery (decision
//! documents). Each takes a node plus the caller-assembled context and
//! returns a `NodeOutcome` — a handler never aborts the orchestrator, it
//! folds every failure into a failed outcome for the planner to react to.

pub mod content;
pub mod discovery;
pub mod software;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use gaffer_graph::{HandlerKind, Node, NodeOutcome};
use serde_json::Value;

use crate::agent::{invoke_with_fallback, AgentRequest, AgentRunner};
use crate::error::GafferError;
use crate::model_config::ModelConfig;
use crate::project::ProjectLayout;
use crate::signal::{parse_signal, ExecutorSignal};

pub use content::ContentHandler;
pub use discovery::DiscoveryHandler;
pub use software::SoftwareHandler;

/// Everything a handler needs besides the node itself
pub struct HandlerContext<'a> {
    pub project: &'a ProjectLayout,
    pub model: &'a ModelConfig,
    /// Upstream context assembled by the context builder
    pub node_context: &'a str,
    pub runner: &'a dyn AgentRunner,
}

/// Capability set each handler satisfies
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(&self, node: &Node, ctx: &HandlerContext<'_>) -> NodeOutcome;
}

/// Handler lookup by kind. The set is closed; dispatch is a match.
pub fn dispatch(kind: HandlerKind) -> &'static dyn NodeHandler {
    match kind {
        HandlerKind::Software => &SoftwareHandler,
        HandlerKind::Content => &ContentHandler,
        HandlerKind::Discovery => &DiscoveryHandler,
    }
}

/// Invoke the node's agent and normalize every failure mode into an
/// executor signal. Returns the signal, the raw payload (for handlers
/// that mine extra fields), and the model that actually ran.
pub(crate) async fn run_node_agent(
    agent: &str,
    context: String,
    cwd: PathBuf,
    model: &ModelConfig,
    runner: &dyn AgentRunner,
) -> (ExecutorSignal, Value, String) {
    let request = AgentRequest {
        agent: agent.to_string(),
        context,
        model: model.clone(),
        cwd,
    };
    match invoke_with_fallback(runner, &request).await {
        Ok((transcript, used)) => {
            let value = parse_signal(&transcript.stdout);
            (ExecutorSignal::from_value(&value), value, used.model)
        }
        Err(GafferError::Timeout { seconds, .. }) => (
            ExecutorSignal::Error {
                error_type: "timeout".to_string(),
                details: format!("agent exceeded {}s timeout", seconds),
            },
            Value::Null,
            model.model.clone(),
        ),
        Err(GafferError::Invocation { details, .. }) => (
            ExecutorSignal::Error {
                error_type: "invocation_failed".to_string(),
                details,
            },
            Value::Null,
            model.model.clone(),
        ),
        Err(err) => (
            ExecutorSignal::Error {
                error_type: "execution_failed".to_string(),
                details: err.to_string(),
            },
            Value::Null,
            model.model.clone(),
        ),
    }
}

/// Map an executor signal to the base outcome: done is completed, skipped
/// is skipped, everything else is failed with the best available
/// description.
pub(crate) fn outcome_from_signal(
    signal: &ExecutorSignal,
    model_used: &str,
    duration: Duration,
) -> NodeOutcome {
    let outcome = match signal {
        ExecutorSignal::Done { summary, .. } => NodeOutcome::completed(summary.clone()),
        ExecutorSignal::Skipped { reason } => NodeOutcome::skipped(reason.clone()),
        ExecutorSignal::Blocked { reason } => {
            NodeOutcome::failed(format!("blocked: {}", reason), reason.clone())
        }
        ExecutorSignal::Error {
            error_type,
            details,
        } => NodeOutcome::failed(
            format!("{}: {}", error_type, details),
            format!("{}: {}", error_type, details),
        ),
    };
    outcome
        .with_model(model_used.to_string())
        .with_duration(duration.as_secs_f64())
}

/// Recursively collect regular files under `root`, as paths relative to
/// `base`, sorted for determinism.
pub(crate) fn collect_files(root: &std::path::Path, base: &std::path::Path) -> Vec<String> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                let rel = path
                    .strip_prefix(base)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| path.to_string_lossy().into_owned());
                files.push(rel);
            }
        }
    }
    files.sort();
    files
}


#[cfg(test)]
mod tests {
    use super::*;
    use gaffer_graph::NodeStatus;

    #[test]
    fn test_outcome_mapping() {
        let done = ExecutorSignal::Done {
            summary: "ok".to_string(),
            payload: Value::Null,
        };
        assert_eq!(
            outcome_from_signal(&done, "m", Duration::from_secs(3)).status,
            NodeStatus::Completed
        );

        let skipped = ExecutorSignal::Skipped {
            reason: "nothing to do".to_string(),
        };
        assert_eq!(
            outcome_from_signal(&skipped, "m", Duration::ZERO).status,
            NodeStatus::Skipped
        );

        let blocked = ExecutorSignal::Blocked {
            reason: "no credentials".to_string(),
        };
        let outcome = outcome_from_signal(&blocked, "m", Duration::ZERO);
        assert_eq!(outcome.status, NodeStatus::Failed);
        assert!(outcome.error_details.unwrap().contains("credentials"));

        let error = ExecutorSignal::Error {
            error_type: "timeout".to_string(),
            details: "too slow".to_string(),
        };
        let outcome = outcome_from_signal(&error, "m", Duration::ZERO);
        assert_eq!(outcome.status, NodeStatus::Failed);
        assert_eq!(outcome.model_used, "m");
    }

    #[test]
    fn test_collect_files_recursive_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/inner")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("sub/inner/c.txt"), "c").unwrap();

        let files = collect_files(dir.path(), dir.path());
        assert_eq!(files, vec!["b.txt", "sub/a.txt", "sub/inner/c.txt"]);
    }
}
