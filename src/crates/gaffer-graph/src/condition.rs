//! Per-edge activation conditions evaluated against upstream outcomes.
//!
//! The grammar is deliberately small: `always`, the two status forms, and a
//! single comparison of one outcome attribute against a literal. Evaluation
//! never panics and never aborts traversal; anything the grammar cannot
//! decide deactivates the edge and logs a warning.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{NodeOutcome, NodeStatus};

/// Comparison operators in `output.<field> <op> <literal>` conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Ordering operators require numeric operands
    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Right-hand side of a comparison condition
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    Str(String),
}

impl Literal {
    /// Parse a literal the way the signal scalar rules do: int, float,
    /// bool, null, then bare or quoted string.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
        {
            return Self::Str(trimmed[1..trimmed.len() - 1].to_string());
        }
        match trimmed {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            "null" | "~" => return Self::Null,
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Self::Float(f);
        }
        Self::Str(trimmed.to_string())
    }

    /// Numeric view, if this literal is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Bool(b) => serde_json::Value::from(*b),
            Self::Null => serde_json::Value::Null,
            Self::Str(s) => serde_json::Value::from(s.clone()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Null => write!(f, "null"),
            Self::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// Activation condition attached to an edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeCondition {
    /// Active whenever the source completed
    Always,
    /// Active iff the source's normalized status is `completed`
    StatusPass,
    /// Active iff the source's normalized status is `failed`
    StatusFail,
    /// Compare one outcome attribute against a literal
    Output {
        field: String,
        op: CompareOp,
        literal: Literal,
    },
    /// Unparseable condition text, preserved verbatim; never activates
    Unknown(String),
}

impl Default for EdgeCondition {
    fn default() -> Self {
        Self::Always
    }
}

fn output_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^output\.([A-Za-z_][A-Za-z0-9_]*)\s*(==|!=|<=|>=|<|>)\s*(.+)$")
            .expect("output condition pattern is valid")
    })
}

fn status_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^status\s*==\s*["']?(pass|fail)["']?$"#)
            .expect("status condition pattern is valid")
    })
}

impl FromStr for EdgeCondition {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "always" {
            return Ok(Self::Always);
        }
        if let Some(caps) = status_pattern().captures(trimmed) {
            return Ok(match &caps[1] {
                "pass" => Self::StatusPass,
                _ => Self::StatusFail,
            });
        }
        if let Some(caps) = output_pattern().captures(trimmed) {
            let op = match &caps[2] {
                "==" => CompareOp::Eq,
                "!=" => CompareOp::Ne,
                "<" => CompareOp::Lt,
                "<=" => CompareOp::Le,
                ">" => CompareOp::Gt,
                _ => CompareOp::Ge,
            };
            return Ok(Self::Output {
                field: caps[1].to_string(),
                op,
                literal: Literal::parse(&caps[3]),
            });
        }
        Ok(Self::Unknown(trimmed.to_string()))
    }
}

impl From<String> for EdgeCondition {
    fn from(s: String) -> Self {
        s.parse().expect("edge condition parse is infallible")
    }
}

impl From<EdgeCondition> for String {
    fn from(condition: EdgeCondition) -> Self {
        condition.to_string()
    }
}

impl fmt::Display for EdgeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::StatusPass => write!(f, "status == \"pass\""),
            Self::StatusFail => write!(f, "status == \"fail\""),
            Self::Output { field, op, literal } => {
                write!(f, "output.{} {} {}", field, op, literal)
            }
            Self::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

impl EdgeCondition {
    /// Evaluate against a source outcome.
    ///
    /// Evaluation errors (unknown condition, missing attribute, non-numeric
    /// ordering comparison) deactivate the edge and log a warning; they
    /// never abort traversal.
    pub fn evaluate(&self, outcome: &NodeOutcome) -> bool {
        match self {
            Self::Always => true,
            Self::StatusPass => outcome.status == NodeStatus::Completed,
            Self::StatusFail => outcome.status == NodeStatus::Failed,
            Self::Output { field, op, literal } => {
                let Some(actual) = outcome.field(field) else {
                    warn!(
                        field = %field,
                        "edge condition references unknown outcome attribute; edge deactivated"
                    );
                    return false;
                };
                Self::compare(&actual, *op, literal, field)
            }
            Self::Unknown(raw) => {
                warn!(condition = %raw, "unknown edge condition; edge deactivated");
                false
            }
        }
    }

    fn compare(actual: &serde_json::Value, op: CompareOp, literal: &Literal, field: &str) -> bool {
        let actual_num = actual.as_f64();
        let literal_num = literal.as_f64();

        if op.is_ordering() {
            match (actual_num, literal_num) {
                (Some(a), Some(b)) => match op {
                    CompareOp::Lt => a < b,
                    CompareOp::Le => a <= b,
                    CompareOp::Gt => a > b,
                    CompareOp::Ge => a >= b,
                    _ => unreachable!(),
                },
                _ => {
                    warn!(
                        field = %field,
                        op = %op,
                        "non-numeric operands for ordering comparison; edge deactivated"
                    );
                    false
                }
            }
        } else {
            // Equality coerces numerically when both sides are numbers, so
            // output.score == 1 matches a stored 1.0.
            let equal = match (actual_num, literal_num) {
                (Some(a), Some(b)) => a == b,
                _ => *actual == literal.to_json(),
            };
            match op {
                CompareOp::Eq => equal,
                CompareOp::Ne => !equal,
                _ => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeOutcome;

    fn outcome_with(status: NodeStatus) -> NodeOutcome {
        NodeOutcome::new(status)
    }

    #[test]
    fn test_parse_always() {
        assert_eq!("always".parse::<EdgeCondition>().unwrap(), EdgeCondition::Always);
        assert_eq!("".parse::<EdgeCondition>().unwrap(), EdgeCondition::Always);
    }

    #[test]
    fn test_parse_status_forms() {
        assert_eq!(
            "status == \"pass\"".parse::<EdgeCondition>().unwrap(),
            EdgeCondition::StatusPass
        );
        assert_eq!(
            "status == 'fail'".parse::<EdgeCondition>().unwrap(),
            EdgeCondition::StatusFail
        );
        assert_eq!(
            "status==pass".parse::<EdgeCondition>().unwrap(),
            EdgeCondition::StatusPass
        );
    }

    #[test]
    fn test_parse_output_comparison() {
        let condition = "output.duration <= 30.5".parse::<EdgeCondition>().unwrap();
        assert_eq!(
            condition,
            EdgeCondition::Output {
                field: "duration".to_string(),
                op: CompareOp::Le,
                literal: Literal::Float(30.5),
            }
        );
    }

    #[test]
    fn test_unparseable_preserved_and_inactive() {
        let condition = "when the moon is full".parse::<EdgeCondition>().unwrap();
        assert_eq!(
            condition,
            EdgeCondition::Unknown("when the moon is full".to_string())
        );
        assert!(!condition.evaluate(&outcome_with(NodeStatus::Completed)));
        assert_eq!(condition.to_string(), "when the moon is full");
    }

    #[test]
    fn test_status_evaluation_uses_normalized_status() {
        let pass = EdgeCondition::StatusPass;
        let fail = EdgeCondition::StatusFail;
        assert!(pass.evaluate(&outcome_with(NodeStatus::Completed)));
        assert!(!pass.evaluate(&outcome_with(NodeStatus::Failed)));
        assert!(fail.evaluate(&outcome_with(NodeStatus::Failed)));
        assert!(!fail.evaluate(&outcome_with(NodeStatus::Skipped)));
    }

    #[test]
    fn test_numeric_coercion_in_equality() {
        let condition = "output.duration == 2".parse::<EdgeCondition>().unwrap();
        let outcome = NodeOutcome::completed("x").with_duration(2.0);
        assert!(condition.evaluate(&outcome));
    }

    #[test]
    fn test_ordering_on_non_numeric_deactivates() {
        let condition = "output.output_summary > 3".parse::<EdgeCondition>().unwrap();
        let outcome = NodeOutcome::completed("hello");
        assert!(!condition.evaluate(&outcome));
    }

    #[test]
    fn test_missing_field_deactivates() {
        let condition = "output.coverage >= 0.8".parse::<EdgeCondition>().unwrap();
        assert!(!condition.evaluate(&outcome_with(NodeStatus::Completed)));
    }

    #[test]
    fn test_string_equality() {
        let condition = "output.model_used != \"haiku\"".parse::<EdgeCondition>().unwrap();
        let outcome = NodeOutcome::completed("x").with_model("sonnet");
        assert!(condition.evaluate(&outcome));
    }

    #[test]
    fn test_display_round_trip() {
        for text in [
            "always",
            "status == \"pass\"",
            "status == \"fail\"",
            "output.duration <= 30.5",
            "output.model_used == \"sonnet\"",
        ] {
            let condition: EdgeCondition = text.parse().unwrap();
            let rendered = condition.to_string();
            let reparsed: EdgeCondition = rendered.parse().unwrap();
            assert_eq!(condition, reparsed);
            assert_eq!(rendered, text);
        }
    }
}
