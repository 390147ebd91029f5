//! Discovery handler: produces the CONTEXT.md decision document.
//!
//! Discovery nodes investigate an outcome before planning happens.
//! Complexity selection picks between a compact prompt and a full
//! investigation prompt; either way the handler itself writes
//! `tasks/<node-id>/CONTEXT.md` from the returned signal fields plus
//! fallbacks, so downstream nodes can always rely on the file existing
//! with the expected section headings.

use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use gaffer_graph::{ComplexityHint, Node, NodeOutcome};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::handlers::{outcome_from_signal, run_node_agent, HandlerContext, NodeHandler};

/// Agent invoked for discovery nodes
const DISCOVERY_AGENT: &str = "discovery";

/// Token budget stated in the compact prompt
const SIMPLE_PROMPT_TOKEN_BUDGET: usize = 2000;

/// Chosen investigation depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Complex,
}

const COMPLEX_KEYWORDS: &str =
    r"\b(?:build|implement|system|architecture|infrastructure)\b";
const CHOICE_KEYWORDS: &str = r"\b(?:or|vs|versus|choice|decide)\b";
const INTEGRATION_KEYWORDS: &str = r"\b(?:integrate|api|third-party|external)\b";
const UNCERTAINTY_KEYWORDS: &str = r"\b(?:not sure|maybe|could be|options)\b";
const SIMPLE_KEYWORDS: &str = r"\b(?:report|presentation|document|slides)\b";
const FORMAT_KEYWORDS: &str = r"\b(?:powerpoint|slide deck|format|template)\b";
const DIRECT_KEYWORDS: &str = r"\b(?:single|straightforward|obvious)\b";

fn count(pattern: &'static str, cell: &'static OnceLock<Regex>, text: &str) -> usize {
    cell.get_or_init(|| Regex::new(&format!("(?i){}", pattern)).expect("keyword pattern is valid"))
        .find_iter(text)
        .count()
}

/// Classify investigation depth from free text. Complex and simple
/// signals are tallied against each other; ties and silence default to
/// complex, since under-investigating costs more than over-investigating.
pub fn classify_text(text: &str) -> Complexity {
    static COMPLEX: OnceLock<Regex> = OnceLock::new();
    static CHOICE: OnceLock<Regex> = OnceLock::new();
    static INTEGRATION: OnceLock<Regex> = OnceLock::new();
    static UNCERTAINTY: OnceLock<Regex> = OnceLock::new();
    static SIMPLE: OnceLock<Regex> = OnceLock::new();
    static FORMAT: OnceLock<Regex> = OnceLock::new();
    static DIRECT: OnceLock<Regex> = OnceLock::new();

    let complex_score = count(COMPLEX_KEYWORDS, &COMPLEX, text)
        + count(CHOICE_KEYWORDS, &CHOICE, text)
        + count(INTEGRATION_KEYWORDS, &INTEGRATION, text)
        + count(UNCERTAINTY_KEYWORDS, &UNCERTAINTY, text);
    let simple_score = count(SIMPLE_KEYWORDS, &SIMPLE, text)
        + count(FORMAT_KEYWORDS, &FORMAT, text)
        + count(DIRECT_KEYWORDS, &DIRECT, text);

    debug!(complex_score, simple_score, "discovery complexity scores");
    if simple_score > complex_score {
        Complexity::Simple
    } else {
        Complexity::Complex
    }
}

pub struct DiscoveryHandler;

impl DiscoveryHandler {
    /// Hint override first, keyword heuristics otherwise
    pub fn classify(node: &Node) -> Complexity {
        match node.complexity_hint {
            Some(ComplexityHint::Simple) => return Complexity::Simple,
            Some(ComplexityHint::Complex) => return Complexity::Complex,
            None => {}
        }
        let mut text = format!("{} {}", node.name, node.criteria.join(" "));
        for value in node.inputs.values() {
            match value {
                Value::String(s) => {
                    text.push(' ');
                    text.push_str(s);
                }
                other => {
                    text.push(' ');
                    text.push_str(&other.to_string());
                }
            }
        }
        classify_text(&text)
    }

    fn prompt(node: &Node, complexity: Complexity, upstream: &str) -> String {
        let mut parts = vec![
            "TASK_KIND: discovery".to_string(),
            format!("TOPIC: {}", node.name),
        ];
        if !node.criteria.is_empty() {
            parts.push(format!("CRITERIA:\n- {}", node.criteria.join("\n- ")));
        }
        if !node.source_materials.is_empty() {
            parts.push(format!(
                "SOURCE_MATERIALS:\n- {}",
                node.source_materials.join("\n- ")
            ));
        }
        match complexity {
            Complexity::Simple => {
                parts.push(format!(
                    "Produce a concise decision (about {} tokens). Respond with a signal \
                     whose fields cover: approach, rationale, constraints.",
                    SIMPLE_PROMPT_TOKEN_BUDGET
                ));
            }
            Complexity::Complex => {
                parts.push(
                    "Investigate before deciding. Respond with a signal whose fields cover: \
                     approach, rationale, constraints, findings, alternatives."
                        .to_string(),
                );
                if node.discovery_tools.is_empty() {
                    parts.push(
                        "You may run investigation and debate sub-tools where they sharpen \
                         the decision."
                            .to_string(),
                    );
                } else {
                    parts.push(format!(
                        "Available investigation tools:\n- {}",
                        node.discovery_tools.join("\n- ")
                    ));
                }
            }
        }
        if !upstream.is_empty() {
            parts.push(format!("\n{}", upstream));
        }
        parts.join("\n")
    }

    fn section(payload: &Value, key: &str, fallback: &str) -> String {
        payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Render CONTEXT.md from the signal payload with fallbacks. Every
    /// required heading is present even when the agent reported nothing.
    fn render_context_doc(node: &Node, complexity: Complexity, payload: &Value) -> String {
        let summary = payload
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("No decision was produced.");
        let mut doc = format!(
            "# CONTEXT: {}\n\n## Approach\n{}\n\n## Rationale\n{}\n\n## Constraints\n{}\n",
            node.name,
            Self::section(payload, "approach", summary),
            Self::section(payload, "rationale", "Not provided."),
            Self::section(payload, "constraints", "None recorded."),
        );
        if complexity == Complexity::Complex {
            doc.push_str(&format!(
                "\n## Investigation Findings\n{}\n\n## Alternatives Considered\n{}\n",
                Self::section(payload, "findings", "Not provided."),
                Self::section(payload, "alternatives", "Not provided."),
            ));
        }
        doc
    }
}

#[async_trait]
impl NodeHandler for DiscoveryHandler {
    async fn execute(&self, node: &Node, ctx: &HandlerContext<'_>) -> NodeOutcome {
        let start = Instant::now();
        let node_dir = ctx.project.node_dir(&node.id);
        if let Err(err) = std::fs::create_dir_all(&node_dir) {
            return NodeOutcome::failed(
                "could not create node working directory".to_string(),
                err.to_string(),
            );
        }

        let complexity = Self::classify(node);
        info!(node = %node.id, complexity = ?complexity, "discovery complexity selected");

        let prompt = Self::prompt(node, complexity, ctx.node_context);
        let (signal, payload, model_used) = run_node_agent(
            DISCOVERY_AGENT,
            prompt,
            ctx.project.root().to_path_buf(),
            ctx.model,
            ctx.runner,
        )
        .await;

        // The document is written no matter what the agent did; downstream
        // planning assumes it exists with the section headings in place.
        let doc = Self::render_context_doc(node, complexity, &payload);
        let doc_path = node_dir.join("CONTEXT.md");
        let relative = format!("tasks/{}/CONTEXT.md", node.id);
        if let Err(err) = std::fs::write(&doc_path, doc) {
            return NodeOutcome::failed(
                "could not write CONTEXT.md".to_string(),
                err.to_string(),
            )
            .with_model(model_used)
            .with_duration(start.elapsed().as_secs_f64());
        }

        let mut outcome = outcome_from_signal(&signal, &model_used, start.elapsed());
        outcome.artifacts = vec![relative];
        outcome
    }
}
