//! Structured signal extraction from agent stdout.
//!
//! Agents end their output with a YAML payload between two
//! `---ORCHESTRATOR_SIGNAL---` markers. Agents may echo the marker in
//! examples earlier in their output, so only the content between the LAST
//! pair of markers is authoritative. Parse failures never panic: they
//! produce an error-shaped signal the driver treats like any other planner
//! or executor error.

use gaffer_graph::{linearize_sprints, Graph, Sprint};
use serde_json::{json, Value};
use tracing::warn;

/// Delimiter line around every structured signal
pub const SIGNAL_MARKER: &str = "---ORCHESTRATOR_SIGNAL---";

/// Characters of raw output preserved in diagnostics
const RAW_TAIL_CHARS: usize = 500;

/// Last `RAW_TAIL_CHARS` characters of a string
fn tail(text: &str) -> String {
    let count = text.chars().count();
    if count <= RAW_TAIL_CHARS {
        text.to_string()
    } else {
        text.chars().skip(count - RAW_TAIL_CHARS).collect()
    }
}

fn head(text: &str) -> String {
    text.chars().take(RAW_TAIL_CHARS).collect()
}

/// Extract and decode the signal payload from raw agent output.
///
/// Always returns a mapping with at least a `signal` key; malformed output
/// yields `{signal: error, error_type: no_signal | empty_signal |
/// parse_error, ...}` with diagnostic context.
pub fn parse_signal(output: &str) -> Value {
    let parts: Vec<&str> = output.split(SIGNAL_MARKER).collect();
    if parts.len() < 3 {
        return json!({
            "signal": "error",
            "error_type": "no_signal",
            "details": "No ORCHESTRATOR_SIGNAL markers found in agent output",
            "raw_tail": tail(output),
        });
    }

    let payload = parts[parts.len() - 2].trim();
    if payload.is_empty() {
        return json!({
            "signal": "error",
            "error_type": "empty_signal",
            "details": "Signal markers found but content between them is empty",
        });
    }

    match decode_payload(payload) {
        Ok(value) => value,
        Err(details) => json!({
            "signal": "error",
            "error_type": "parse_error",
            "details": details,
            "raw_signal": head(payload),
        }),
    }
}

/// Decode the YAML payload into a JSON value tree
fn decode_payload(payload: &str) -> std::result::Result<Value, String> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(payload).map_err(|e| format!("Failed to parse signal YAML: {}", e))?;
    let value = serde_json::to_value(&yaml)
        .map_err(|e| format!("Signal payload is not representable: {}", e))?;
    if !value.is_object() {
        return Err("Signal payload is not a mapping".to_string());
    }
    Ok(value)
}

fn str_field(value: &Value, key: &str, fallback: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

/// A planner emission, after tagged dispatch on the `signal` field
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerSignal {
    /// A graph to traverse this cycle (`next_graph`, or a legacy
    /// `next_task` sprint list linearized into one)
    NextGraph { graph: Graph, summary: String },
    /// Terminal success
    Complete {
        summary: String,
        outcomes_completed: Vec<String>,
    },
    /// Terminal failure needing human intervention
    Blocked {
        reason: String,
        what_is_needed: String,
        recommendation: String,
    },
    /// Planner-reported or parse-level error, retried within budget
    Error { error_type: String, details: String },
}

impl PlannerSignal {
    /// Dispatch a decoded signal value by its `signal` tag.
    pub fn from_value(value: &Value) -> Self {
        let kind = str_field(value, "signal", "unknown");
        match kind.as_str() {
            "next_graph" => Self::next_graph(value),
            "next_task" => Self::next_task(value),
            "complete" => Self::Complete {
                summary: str_field(value, "summary", "No summary provided"),
                outcomes_completed: value
                    .get("outcomes_completed")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            "blocked" => Self::Blocked {
                reason: str_field(value, "reason", "Unknown reason"),
                what_is_needed: str_field(value, "what_is_needed", "Unknown"),
                recommendation: str_field(value, "recommendation", "None"),
            },
            "error" => Self::Error {
                error_type: str_field(value, "error_type", "unknown"),
                details: str_field(value, "details", "No details"),
            },
            other => Self::Error {
                error_type: "unknown_signal".to_string(),
                details: format!("Unknown planner signal type '{}'", other),
            },
        }
    }

    /// Eagerly convert a `next_graph` payload into the typed graph
    fn next_graph(value: &Value) -> Self {
        match serde_json::from_value::<Graph>(value.clone()) {
            Ok(graph) if graph.is_empty() => Self::Error {
                error_type: "empty_plan".to_string(),
                details: "next_graph signal carried no nodes".to_string(),
            },
            Ok(graph) => Self::NextGraph {
                graph,
                summary: str_field(value, "summary", ""),
            },
            Err(err) => Self::Error {
                error_type: "invalid_graph".to_string(),
                details: format!("Failed to decode graph payload: {}", err),
            },
        }
    }

    /// Legacy flat-sprint form: linearize `sprints[]` into a graph
    fn next_task(value: &Value) -> Self {
        let entries = value
            .get("sprints")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut sprints: Vec<Sprint> = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<Sprint>(entry.clone()) {
                Ok(sprint) => sprints.push(sprint),
                Err(_) => warn!(entry = %entry, "skipping malformed sprint entry"),
            }
        }
        if sprints.is_empty() {
            return Self::Error {
                error_type: "empty_plan".to_string(),
                details: "next_task signal carried no usable sprints".to_string(),
            };
        }
        Self::NextGraph {
            graph: linearize_sprints(&sprints),
            summary: str_field(value, "summary", ""),
        }
    }
}

/// A per-node executor emission
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorSignal {
    /// Work finished; payload keeps every field the agent reported
    Done { summary: String, payload: Value },
    /// Needs human intervention
    Blocked { reason: String },
    /// Executor-reported or parse-level error
    Error { error_type: String, details: String },
    /// Executor decided the work was unnecessary
    Skipped { reason: String },
}

impl ExecutorSignal {
    pub fn from_value(value: &Value) -> Self {
        let kind = str_field(value, "signal", "unknown");
        match kind.as_str() {
            "done" => Self::Done {
                summary: str_field(value, "summary", "No summary provided"),
                payload: value.clone(),
            },
            "blocked" => Self::Blocked {
                reason: str_field(
                    value,
                    "blocker_description",
                    &str_field(value, "reason", "Unknown blocker"),
                ),
            },
            "error" => Self::Error {
                error_type: str_field(value, "error_type", "unknown"),
                details: str_field(value, "details", "No details"),
            },
            "skipped" => Self::Skipped {
                reason: str_field(value, "reason", "No reason provided"),
            },
            other => Self::Error {
                error_type: "unknown_signal".to_string(),
                details: format!("Unknown executor signal type '{}'", other),
            },
        }
    }
}
