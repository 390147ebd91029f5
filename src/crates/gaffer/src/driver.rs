//! The planner/executor cycle driver.
//!
//! One cycle: invoke the planner, dispatch on its signal, normalize the
//! emitted plan into a validated graph, open or resume the checkpoint for
//! that graph, then traverse — executing every ready node sequentially,
//! persisting state around each dispatch — and feed the categorized
//! results into the next planner invocation. The loop ends when the
//! planner signals complete or blocked, the retry budget runs dry, a
//! stuck loop is detected, or the cycle cap is reached.

use std::collections::HashMap;

use gaffer_checkpoint::{graph_hash, CheckpointManager, CheckpointState};
use gaffer_graph::{
    ContextFidelity, Graph, GraphEngine, HandlerKind, NodeId, NodeOutcome, NodeStatus,
};
use tracing::{error, info, warn};

use crate::agent::{invoke_with_fallback, AgentRequest, AgentRunner};
use crate::context::ContextBuilder;
use crate::domain::infer_domain;
use crate::error::GafferError;
use crate::handlers::{dispatch, HandlerContext};
use crate::model_config::ModelResolver;
use crate::project::ProjectLayout;
use crate::shutdown::ShutdownFlag;
use crate::signal::{parse_signal, PlannerSignal};

/// Agent name for the planner
const PLANNER_AGENT: &str = "pm";

/// Same node name this many cycles in sequence means the planner is stuck
pub const STUCK_THRESHOLD: usize = 3;

/// Retries allowed per kind of planner failure
const PLANNER_RETRIES_PER_KIND: u32 = 1;

/// Driver tuning knobs, fed from the CLI
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum planner cycles before giving up
    pub max_cycles: u32,
    /// Planner invocation timeout in seconds
    pub pm_timeout_secs: u64,
    /// Ceiling applied to every node's model timeout
    pub pl_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_cycles: 50,
            pm_timeout_secs: 600,
            pl_timeout_secs: 7200,
        }
    }
}

/// One node's result, fed back to the planner next cycle
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub node_id: NodeId,
    pub name: String,
    pub outcome: NodeOutcome,
}

enum TraversalEnd {
    Finished(Vec<NodeResult>),
    Deadlock,
    Shutdown,
}

/// The single driver process
pub struct Orchestrator {
    project: ProjectLayout,
    config: OrchestratorConfig,
    resolver: ModelResolver,
    runner: Box<dyn AgentRunner>,
    shutdown: ShutdownFlag,
}

impl Orchestrator {
    pub fn new(
        project: ProjectLayout,
        config: OrchestratorConfig,
        resolver: ModelResolver,
        runner: Box<dyn AgentRunner>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            project,
            config,
            resolver,
            runner,
            shutdown,
        }
    }

    /// Run cycles until terminal. Returns the process exit code: 0 when
    /// the planner signals complete (or a graceful shutdown lands first),
    /// 1 for blocked, stuck, deadlock, exhausted retries, or the cycle
    /// cap.
    pub async fn run(&self) -> i32 {
        let mut retries: HashMap<String, u32> = HashMap::new();
        let mut name_history: Vec<String> = Vec::new();
        let mut last_results: Vec<NodeResult> = Vec::new();
        let mut roadmap = self.project.read_roadmap();
        let mut cycle: u32 = 0;

        loop {
            if self.shutdown.is_requested() {
                info!("graceful shutdown between cycles");
                return 0;
            }
            if cycle >= self.config.max_cycles {
                error!(
                    max_cycles = self.config.max_cycles,
                    "maximum cycles reached without completion; planner is not making progress"
                );
                println!(
                    "\nMaximum cycles ({}) reached. The planner may not be making progress.",
                    self.config.max_cycles
                );
                return 1;
            }
            cycle += 1;
            info!(cycle, max_cycles = self.config.max_cycles, "=== cycle start ===");
            self.project.append_log(&format!("cycle {} started", cycle));

            // 1. Invoke the planner.
            let pm_context = self.planner_context(cycle, roadmap.as_deref(), &last_results);
            let transcript = match self.invoke_planner(pm_context).await {
                Ok(transcript) => transcript,
                Err(GafferError::Timeout { .. }) => {
                    if Self::consume_retry(&mut retries, "timeout") {
                        warn!("planner timed out; retrying");
                        continue;
                    }
                    error!("planner timed out past the retry budget");
                    return 1;
                }
                Err(err) => {
                    if Self::consume_retry(&mut retries, "invocation") {
                        warn!(error = %err, "planner invocation failed; retrying");
                        continue;
                    }
                    error!(error = %err, "planner invocation failed past the retry budget");
                    return 1;
                }
            };

            // 2. Parse and dispatch the signal.
            let value = parse_signal(&transcript);
            let signal = PlannerSignal::from_value(&value);
            let graph = match signal {
                PlannerSignal::Complete {
                    summary,
                    outcomes_completed,
                } => {
                    info!(summary = %summary, "project complete");
                    if !outcomes_completed.is_empty() {
                        info!(outcomes = %outcomes_completed.join(", "), "outcomes completed");
                    }
                    println!("\nProject complete: {}", summary);
                    return 0;
                }
                PlannerSignal::Blocked {
                    reason,
                    what_is_needed,
                    recommendation,
                } => {
                    error!(reason = %reason, "planner blocked");
                    println!("\nBlocked: {}", reason);
                    println!("What is needed: {}", what_is_needed);
                    println!("Recommendation: {}", recommendation);
                    return 1;
                }
                PlannerSignal::Error {
                    error_type,
                    details,
                } => {
                    if Self::consume_retry(&mut retries, &error_type) {
                        warn!(error_type = %error_type, details = %details, "planner error; retrying");
                        continue;
                    }
                    error!(error_type = %error_type, details = %details, "planner errors exceeded retry budget");
                    return 1;
                }
                PlannerSignal::NextGraph { mut graph, summary } => {
                    if !summary.is_empty() {
                        info!(summary = %summary, nodes = graph.nodes.len(), "planner emitted graph");
                    }
                    // 3. Domain fallback via keyword inference.
                    if graph.domain.is_none() {
                        let outcomes = self.project.read_outcomes().unwrap_or_default();
                        let inferred = infer_domain(&outcomes);
                        info!(domain = %inferred, "domain inferred from outcomes text");
                        graph.domain = Some(inferred);
                    }
                    graph
                }
            };

            // 4. Validate.
            let engine = GraphEngine::new(&graph);
            let validation_errors = engine.validate();
            if !validation_errors.is_empty() {
                for problem in &validation_errors {
                    error!(problem = %problem, "graph validation failed");
                }
                if Self::consume_retry(&mut retries, "invalid_graph") {
                    continue;
                }
                return 1;
            }
            retries.clear();

            // 5. Stuck-loop check over node names.
            for node in &graph.nodes {
                name_history.push(node.name.clone());
            }
            if let Some(stuck) = detect_stuck_loop(&name_history) {
                error!(
                    name = %stuck,
                    times = STUCK_THRESHOLD,
                    "planner keeps emitting the same node; check the roadmap for inconsistencies"
                );
                println!(
                    "\nStuck: planner keeps emitting node '{}'. Check ROADMAP.md for inconsistencies.",
                    stuck
                );
                return 1;
            }

            // 6. Open or resume the checkpoint by graph hash.
            let hash = graph_hash(&graph);
            let run_dir = CheckpointManager::discover_resume_dir(&self.project.tasks_dir(), &hash)
                .unwrap_or_else(|| self.project.run_dir(&CheckpointState::generate_run_id()));
            let mut checkpoint = match CheckpointManager::open(&run_dir, &graph) {
                Ok(checkpoint) => checkpoint,
                Err(err) => {
                    error!(error = %err, "could not open checkpoint");
                    return 1;
                }
            };

            // 7. Traverse.
            match self.traverse(&graph, &engine, &mut checkpoint).await {
                TraversalEnd::Finished(results) => {
                    let succeeded = results
                        .iter()
                        .filter(|r| r.outcome.status == NodeStatus::Completed)
                        .count();
                    let failed = results
                        .iter()
                        .filter(|r| r.outcome.status == NodeStatus::Failed)
                        .count();
                    info!(succeeded, failed, total = results.len(), "cycle traversal finished");
                    self.project.append_log(&format!(
                        "cycle {} finished: {} succeeded, {} failed",
                        cycle, succeeded, failed
                    ));
                    last_results = results;
                }
                TraversalEnd::Deadlock => return 1,
                TraversalEnd::Shutdown => return 0,
            }

            // 8. Reread the roadmap for the next planner cycle.
            roadmap = self.project.read_roadmap();
        }
    }

    async fn invoke_planner(&self, context: String) -> crate::error::Result<String> {
        let mut model = self.resolver.resolve("planning");
        model.timeout = self.config.pm_timeout_secs;
        let request = AgentRequest {
            agent: PLANNER_AGENT.to_string(),
            context,
            model,
            cwd: self.project.root().to_path_buf(),
        };
        let (transcript, _used) = invoke_with_fallback(self.runner.as_ref(), &request).await?;
        Ok(transcript.stdout)
    }

    /// Budget of one retry per failure kind
    fn consume_retry(retries: &mut HashMap<String, u32>, kind: &str) -> bool {
        let used = retries.entry(kind.to_string()).or_insert(0);
        if *used < PLANNER_RETRIES_PER_KIND {
            *used += 1;
            true
        } else {
            false
        }
    }

    /// Planner context: project paths, cycle number, current roadmap, and
    /// the categorized per-node results of the previous cycle.
    fn planner_context(
        &self,
        cycle: u32,
        roadmap: Option<&str>,
        results: &[NodeResult],
    ) -> String {
        let mut parts = vec![
            format!("PROJECT_DIR: {}", self.project.root().display()),
            format!("OUTCOMES_PATH: {}", self.project.outcomes_path().display()),
            format!("ROADMAP_PATH: {}", self.project.roadmap_path().display()),
            format!("CYCLE: {}", cycle),
            format!("MAX_CYCLES: {}", self.config.max_cycles),
        ];

        if let Some(roadmap) = roadmap {
            parts.push(format!(
                "\n--- CURRENT ROADMAP ---\n{}\n--- END ROADMAP ---",
                roadmap
            ));
        }

        if !results.is_empty() {
            parts.push("\n--- NODE RESULTS FROM PREVIOUS CYCLE ---".to_string());
            for (title, filter) in [
                ("SUCCEEDED", NodeStatus::Completed),
                ("FAILED", NodeStatus::Failed),
            ] {
                let bucket: Vec<&NodeResult> = results
                    .iter()
                    .filter(|r| r.outcome.status == filter)
                    .collect();
                if bucket.is_empty() {
                    continue;
                }
                parts.push(format!("{}:", title));
                for result in bucket {
                    let mut line = format!(
                        "  {} ({}): {}",
                        result.node_id, result.name, result.outcome.output_summary
                    );
                    if let Some(merged) = result.outcome.merge_success {
                        line.push_str(if merged {
                            " [merged]"
                        } else {
                            " [merge failed]"
                        });
                    }
                    if let Some(details) = &result.outcome.error_details {
                        line.push_str(&format!("\n    details: {}", details));
                    }
                    parts.push(line);
                }
            }
            let unknown: Vec<&NodeResult> = results
                .iter()
                .filter(|r| {
                    r.outcome.status != NodeStatus::Completed
                        && r.outcome.status != NodeStatus::Failed
                })
                .collect();
            if !unknown.is_empty() {
                parts.push("UNKNOWN:".to_string());
                for result in unknown {
                    parts.push(format!(
                        "  {} ({}): {}",
                        result.node_id,
                        result.outcome.status,
                        result.outcome.output_summary
                    ));
                }
            }
            parts.push("--- END NODE RESULTS ---".to_string());
        }

        parts.join("\n")
    }

    /// Execute the graph until every node is terminal.
    async fn traverse(
        &self,
        graph: &Graph,
        engine: &GraphEngine,
        checkpoint: &mut CheckpointManager,
    ) -> TraversalEnd {
        let mut results: Vec<NodeResult> = Vec::new();
        let mut fidelity_overrides: HashMap<NodeId, ContextFidelity> = HashMap::new();

        loop {
            if checkpoint.all_terminal() {
                // Report every terminal node, including ones finished in a
                // previous run of the same graph.
                if results.is_empty() {
                    results = self.results_from_checkpoint(graph, checkpoint);
                }
                return TraversalEnd::Finished(results);
            }
            if self.shutdown.is_requested() {
                info!("graceful shutdown between node dispatches");
                return TraversalEnd::Shutdown;
            }

            let statuses = checkpoint.status_map();
            let outcomes = checkpoint.outcome_map();
            let ready = engine.ready_set(&statuses, &outcomes);

            if ready.is_empty() {
                // Nodes whose upstreams all finished but whose edge
                // conditions exclude them drain as skipped.
                let skippable = engine.skip_eligible(&statuses, &outcomes);
                if !skippable.is_empty() {
                    for id in skippable {
                        info!(node = %id, "upstream edge conditions exclude node; skipping");
                        let outcome =
                            NodeOutcome::skipped("upstream edge conditions not met");
                        if let Err(err) = checkpoint.record_node_completion(&id, &outcome) {
                            error!(node = %id, error = %err, "failed to persist skip");
                            return TraversalEnd::Deadlock;
                        }
                        results.push(NodeResult {
                            name: graph.node(&id).map(|n| n.name.clone()).unwrap_or_default(),
                            node_id: id,
                            outcome,
                        });
                    }
                    continue;
                }

                error!("pipeline is stuck: no ready nodes and work remains");
                for (node, unmet) in engine.blocked_report(&statuses) {
                    let waiting: Vec<String> = unmet
                        .iter()
                        .map(|(src, status)| format!("{} ({})", src, status))
                        .collect();
                    error!(node = %node, waiting_on = %waiting.join(", "), "blocked node");
                    println!("Blocked node '{}' waiting on: {}", node, waiting.join(", "));
                }
                return TraversalEnd::Deadlock;
            }

            for id in ready {
                if self.shutdown.is_requested() {
                    info!("graceful shutdown between node dispatches");
                    return TraversalEnd::Shutdown;
                }
                let Some(node) = graph.node(&id) else {
                    warn!(node = %id, "ready node missing from graph definition");
                    continue;
                };

                let mut model = self.resolver.resolve(&node.node_class);
                model.timeout = model.timeout.min(self.config.pl_timeout_secs);

                if let Err(err) = checkpoint.record_node_start(&id, &model.model) {
                    error!(node = %id, error = %err, "failed to persist node start");
                    return TraversalEnd::Deadlock;
                }

                let fidelity = fidelity_overrides
                    .get(&id)
                    .copied()
                    .unwrap_or(node.context_fidelity);
                let node_context =
                    ContextBuilder::new(&self.project, graph, engine, checkpoint)
                        .build(node, fidelity);

                info!(
                    node = %id,
                    handler = %node.handler,
                    model = %model.model,
                    fidelity = %fidelity,
                    "dispatching node"
                );
                let handler = dispatch(node.handler);
                let handler_ctx = HandlerContext {
                    project: &self.project,
                    model: &model,
                    node_context: &node_context,
                    runner: self.runner.as_ref(),
                };
                let outcome = handler.execute(node, &handler_ctx).await;

                if let Err(err) = checkpoint.record_node_completion(&id, &outcome) {
                    error!(node = %id, error = %err, "failed to persist node completion");
                    return TraversalEnd::Deadlock;
                }
                self.project.append_log(&format!(
                    "node {} finished: {}",
                    id, outcome.status
                ));

                // Observability: how each outgoing edge evaluates now.
                for edge in engine.edges_from(&id) {
                    let active = edge.condition.evaluate(&outcome);
                    info!(
                        edge = %format!("{} -> {}", edge.source, edge.target),
                        condition = %edge.condition,
                        active,
                        "edge condition evaluated"
                    );
                }

                info!("\n{}", render_status(engine, &checkpoint.status_map()));

                // Discovery success promotes minimal-fidelity planning
                // nodes downstream to partial for this cycle.
                if node.handler == HandlerKind::Discovery
                    && outcome.status == NodeStatus::Completed
                {
                    let statuses = checkpoint.status_map();
                    for downstream in engine.downstream_closure(&[id.clone()]) {
                        if downstream == id {
                            continue;
                        }
                        let terminal = statuses
                            .get(&downstream)
                            .map(|s| s.is_terminal())
                            .unwrap_or(false);
                        let eligible = graph
                            .node(&downstream)
                            .map(|n| {
                                n.node_class == "planning"
                                    && n.context_fidelity == ContextFidelity::Minimal
                            })
                            .unwrap_or(false);
                        if eligible && !terminal {
                            info!(
                                node = %downstream,
                                "promoting planning node to partial fidelity after discovery"
                            );
                            fidelity_overrides.insert(downstream, ContextFidelity::Partial);
                        }
                    }
                }

                results.push(NodeResult {
                    node_id: id.clone(),
                    name: node.name.clone(),
                    outcome,
                });
            }
        }
    }

    /// Rebuild results from the checkpoint when a resumed graph was
    /// already fully terminal.
    fn results_from_checkpoint(
        &self,
        graph: &Graph,
        checkpoint: &CheckpointManager,
    ) -> Vec<NodeResult> {
        graph
            .nodes
            .iter()
            .filter_map(|node| {
                checkpoint.node(&node.id).map(|entry| NodeResult {
                    node_id: node.id.clone(),
                    name: node.name.clone(),
                    outcome: entry.as_outcome(),
                })
            })
            .collect()
    }
}

/// Same name `STUCK_THRESHOLD` times in sequence at the end of history
pub fn detect_stuck_loop(name_history: &[String]) -> Option<String> {
    if name_history.len() < STUCK_THRESHOLD {
        return None;
    }
    let tail = &name_history[name_history.len() - STUCK_THRESHOLD..];
    if tail.iter().all(|name| name == &tail[0]) {
        Some(tail[0].clone())
    } else {
        None
    }
}

/// Render the graph status as one line per node
pub fn render_status(engine: &GraphEngine, statuses: &HashMap<NodeId, NodeStatus>) -> String {
    let mut lines = Vec::with_capacity(engine.node_count());
    for id in engine.node_ids() {
        let status = statuses.get(id).copied().unwrap_or(NodeStatus::Pending);
        let marker = match status {
            NodeStatus::Completed => "[x]",
            NodeStatus::Failed => "[!]",
            NodeStatus::Skipped => "[-]",
            NodeStatus::InProgress => "[>]",
            _ => "[ ]",
        };
        lines.push(format!("{} {} ({})", marker, id, status));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{signal_output, ScriptedRunner};
    use std::fs;
    use tempfile::TempDir;

    fn project() -> (TempDir, ProjectLayout) {
        let dir = TempDir::new().unwrap();
        let project = ProjectLayout::new(dir.path());
        fs::create_dir_all(project.tasks_dir()).unwrap();
        fs::write(project.outcomes_path(), "Research and document the platform choice.").unwrap();
        (dir, project)
    }

    fn orchestrator(project: ProjectLayout, runner: ScriptedRunner) -> Orchestrator {
        Orchestrator::new(
            project,
            OrchestratorConfig::default(),
            ModelResolver::builtin(),
            Box::new(runner),
            ShutdownFlag::new(),
        )
    }

    fn pm_graph_two_discovery_nodes() -> String {
        signal_output(
            "signal: next_graph\nsummary: investigate then plan\nnodes:\n  - id: disc\n    name: investigate platforms\n    handler: discovery\n    complexity_hint: simple\n  - id: plan\n    name: plan the rollout\n    handler: discovery\n    node_class: planning\n    complexity_hint: simple\n    context_fidelity: minimal\nedges:\n  - source: disc\n    target: plan\n",
        )
    }

    #[tokio::test]
    async fn test_complete_signal_exits_zero() {
        let (_dir, project) = project();
        let runner = ScriptedRunner::new(vec![signal_output(
            "signal: complete\nsummary: everything shipped\n",
        )]);
        let exit = orchestrator(project, runner).run().await;
        assert_eq!(exit, 0);
    }

    #[tokio::test]
    async fn test_blocked_signal_exits_one() {
        let (_dir, project) = project();
        let runner = ScriptedRunner::new(vec![signal_output(
            "signal: blocked\nreason: no production access\nwhat_is_needed: credentials\nrecommendation: ask ops\n",
        )]);
        let exit = orchestrator(project, runner).run().await;
        assert_eq!(exit, 1);
    }

    #[tokio::test]
    async fn test_planner_error_budget_exhausts() {
        let (_dir, project) = project();
        let runner = ScriptedRunner::new(vec![
            signal_output("signal: error\nerror_type: confused\ndetails: lost the plot\n"),
            signal_output("signal: error\nerror_type: confused\ndetails: still lost\n"),
        ]);
        let exit = orchestrator(project, runner).run().await;
        assert_eq!(exit, 1);
    }

    #[tokio::test]
    async fn test_full_cycle_with_fidelity_promotion() {
        let (_dir, project) = project();
        let runner = ScriptedRunner::new(vec![
            pm_graph_two_discovery_nodes(),
            signal_output("signal: done\nsummary: chose kubernetes\napproach: managed cluster\n"),
            signal_output("signal: done\nsummary: rollout planned\n"),
            signal_output("signal: complete\nsummary: discovery finished\n"),
        ]);
        let orchestrator = orchestrator(project.clone(), runner);
        let exit = orchestrator.run().await;
        assert_eq!(exit, 0);

        // Both nodes completed in the checkpoint.
        let tasks = project.tasks_dir();
        let run_dir = fs::read_dir(&tasks)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .find(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with("run-"))
                        .unwrap_or(false)
            })
            .expect("run directory exists");
        let state: gaffer_checkpoint::CheckpointState = serde_json::from_str(
            &fs::read_to_string(run_dir.join("checkpoint.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(state.nodes["disc"].status, NodeStatus::Completed);
        assert_eq!(state.nodes["plan"].status, NodeStatus::Completed);

        // The discovery document exists and fed the promoted (partial)
        // context of the downstream planning node.
        assert!(project.node_dir("disc").join("CONTEXT.md").exists());
    }

    #[tokio::test]
    async fn test_fidelity_promotion_feeds_discovery_context() {
        let (_dir, project) = project();
        let runner = std::sync::Arc::new(ScriptedRunner::new(vec![
            pm_graph_two_discovery_nodes(),
            signal_output("signal: done\nsummary: chose kubernetes\napproach: managed cluster\n"),
            signal_output("signal: done\nsummary: rollout planned\n"),
            signal_output("signal: complete\nsummary: done\n"),
        ]));
        let orchestrator = Orchestrator::new(
            project.clone(),
            OrchestratorConfig::default(),
            ModelResolver::builtin(),
            Box::new(runner.clone()),
            ShutdownFlag::new(),
        );
        orchestrator.run().await;

        let requests = runner.requests.lock().unwrap();
        // requests: pm, disc, plan, pm
        assert_eq!(requests.len(), 4);
        let plan_request = &requests[2];
        assert!(plan_request.context.contains("DISCOVERY CONTEXT: disc"));
        assert!(plan_request.context.contains("managed cluster"));
    }

    #[tokio::test]
    async fn test_failure_bypass_skips_always_branch_and_runs_recovery() {
        let (_dir, project) = project();
        let graph = signal_output(
            "signal: next_graph\nnodes:\n  - id: a\n    name: first attempt\n    handler: discovery\n    complexity_hint: simple\n  - id: b\n    name: happy path\n    handler: discovery\n    complexity_hint: simple\n  - id: c\n    name: recovery\n    handler: discovery\n    complexity_hint: simple\nedges:\n  - source: a\n    target: b\n  - source: a\n    target: c\n    condition: status == \"fail\"\n",
        );
        let runner = ScriptedRunner::new(vec![
            graph,
            signal_output("signal: error\nerror_type: research_failed\ndetails: no data\n"),
            signal_output("signal: done\nsummary: recovered\n"),
            signal_output("signal: complete\nsummary: wrapped up\n"),
        ]);
        let orchestrator = orchestrator(project.clone(), runner);
        let exit = orchestrator.run().await;
        assert_eq!(exit, 0);

        let run_dir = fs::read_dir(project.tasks_dir())
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("run-"))
                    .unwrap_or(false)
            })
            .unwrap();
        let state: gaffer_checkpoint::CheckpointState = serde_json::from_str(
            &fs::read_to_string(run_dir.join("checkpoint.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(state.nodes["a"].status, NodeStatus::Failed);
        assert_eq!(state.nodes["b"].status, NodeStatus::Skipped);
        assert_eq!(state.nodes["c"].status, NodeStatus::Completed);
    }

    #[tokio::test]
    async fn test_stuck_loop_detection_exits_one() {
        let (_dir, project) = project();
        let same_graph = || {
            signal_output(
                "signal: next_graph\nnodes:\n  - id: same\n    name: the same node\n    handler: discovery\n    complexity_hint: simple\n",
            )
        };
        let runner = ScriptedRunner::new(vec![
            same_graph(),
            signal_output("signal: done\nsummary: did it\n"),
            same_graph(),
            same_graph(),
        ]);
        let exit = orchestrator(project, runner).run().await;
        assert_eq!(exit, 1);
    }

    #[test]
    fn test_detect_stuck_loop() {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(detect_stuck_loop(&names(&["a", "a"])), None);
        assert_eq!(detect_stuck_loop(&names(&["b", "a", "a", "a"])), Some("a".to_string()));
        assert_eq!(detect_stuck_loop(&names(&["a", "a", "b"])), None);
    }

    #[test]
    fn test_render_status_markers() {
        let graph = Graph::new(
            vec![
                gaffer_graph::Node::new("a"),
                gaffer_graph::Node::new("b"),
                gaffer_graph::Node::new("c"),
            ],
            vec![],
        );
        let engine = GraphEngine::new(&graph);
        let mut statuses = HashMap::new();
        statuses.insert("a".to_string(), NodeStatus::Completed);
        statuses.insert("b".to_string(), NodeStatus::Failed);
        let rendered = render_status(&engine, &statuses);
        assert!(rendered.contains("[x] a (completed)"));
        assert!(rendered.contains("[!] b (failed)"));
        assert!(rendered.contains("[ ] c (pending)"));
    }
}
