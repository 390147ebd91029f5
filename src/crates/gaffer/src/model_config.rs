//! Model stylesheet: node class to provider/model/effort/timeout mapping.
//!
//! An optional `model-stylesheet.yaml` at the project root declares
//! `defaults` plus named `classes`; each class may carry a one-level
//! `fallback` list. Selection order is `classes[node_class]`, then
//! `classes["default"]`, then the built-in table. A missing or unreadable
//! stylesheet falls back to the built-in table with a warning, never an
//! error.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Reasoning effort assumed when a class does not set one; provider argv
/// omits the effort argument at this level
pub const DEFAULT_REASONING_EFFORT: &str = "medium";

const DEFAULT_PROVIDER: &str = "claude";
const DEFAULT_MODEL: &str = "claude-sonnet-4";
const DEFAULT_TOOL_PROFILE: &str = "claude";
const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Fully resolved model selection for one node class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub reasoning_effort: String,
    pub tool_profile: String,
    /// Per-invocation timeout in seconds
    pub timeout: u64,
    /// Depth-1 fallback chain; entries carry no fallbacks of their own
    #[serde(default)]
    pub fallback: Vec<ModelConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            reasoning_effort: DEFAULT_REASONING_EFFORT.to_string(),
            tool_profile: DEFAULT_TOOL_PROFILE.to_string(),
            timeout: DEFAULT_TIMEOUT_SECS,
            fallback: Vec::new(),
        }
    }
}

impl ModelConfig {
    /// Primary config followed by each fallback, every entry with its own
    /// fallback list cleared.
    pub fn chain(&self) -> Vec<ModelConfig> {
        let mut chain = Vec::with_capacity(1 + self.fallback.len());
        let mut primary = self.clone();
        primary.fallback = Vec::new();
        chain.push(primary);
        for entry in &self.fallback {
            let mut flat = entry.clone();
            flat.fallback = Vec::new();
            chain.push(flat);
        }
        chain
    }
}

/// One class entry in the stylesheet; unset fields inherit
#[derive(Debug, Clone, Default, Deserialize)]
struct ClassEntry {
    provider: Option<String>,
    model: Option<String>,
    reasoning_effort: Option<String>,
    tool_profile: Option<String>,
    timeout: Option<u64>,
    #[serde(default)]
    fallback: Vec<ClassEntry>,
}

impl ClassEntry {
    /// Resolve against a base config, taking set fields over the base
    fn over(&self, base: &ModelConfig) -> ModelConfig {
        ModelConfig {
            provider: self.provider.clone().unwrap_or_else(|| base.provider.clone()),
            model: self.model.clone().unwrap_or_else(|| base.model.clone()),
            reasoning_effort: self
                .reasoning_effort
                .clone()
                .unwrap_or_else(|| base.reasoning_effort.clone()),
            tool_profile: self
                .tool_profile
                .clone()
                .unwrap_or_else(|| base.tool_profile.clone()),
            timeout: self.timeout.unwrap_or(base.timeout),
            fallback: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Stylesheet {
    #[serde(default)]
    defaults: ClassEntry,
    #[serde(default)]
    classes: BTreeMap<String, ClassEntry>,
}

/// Maps node classes to resolved model configurations
#[derive(Debug, Clone)]
pub struct ModelResolver {
    classes: BTreeMap<String, ModelConfig>,
}

impl ModelResolver {
    /// Built-in class table, used when no stylesheet exists
    pub fn builtin() -> Self {
        let mut classes = BTreeMap::new();
        classes.insert("default".to_string(), ModelConfig::default());
        classes.insert(
            "planning".to_string(),
            ModelConfig {
                model: "claude-opus-4".to_string(),
                reasoning_effort: "high".to_string(),
                timeout: 600,
                ..ModelConfig::default()
            },
        );
        classes.insert(
            "implementation".to_string(),
            ModelConfig {
                timeout: 7200,
                ..ModelConfig::default()
            },
        );
        classes.insert(
            "review".to_string(),
            ModelConfig {
                timeout: 1800,
                ..ModelConfig::default()
            },
        );
        classes.insert(
            "discovery".to_string(),
            ModelConfig {
                reasoning_effort: "high".to_string(),
                timeout: 1800,
                ..ModelConfig::default()
            },
        );
        Self { classes }
    }

    /// Load a stylesheet file; any problem falls back to the built-in
    /// table with a warning.
    pub fn load(path: &Path) -> Self {
        if !path.is_file() {
            debug!(path = %path.display(), "no model stylesheet; using built-in classes");
            return Self::builtin();
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable model stylesheet; using built-in classes");
                return Self::builtin();
            }
        };
        match serde_yaml::from_str::<Stylesheet>(&content) {
            Ok(sheet) => Self::from_stylesheet(sheet),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "invalid model stylesheet; using built-in classes");
                Self::builtin()
            }
        }
    }

    fn from_stylesheet(sheet: Stylesheet) -> Self {
        let base = sheet.defaults.over(&ModelConfig::default());
        let mut classes = BTreeMap::new();
        classes.insert("default".to_string(), base.clone());
        for (name, entry) in &sheet.classes {
            let mut resolved = entry.over(&base);
            resolved.fallback = entry
                .fallback
                .iter()
                .map(|fallback| fallback.over(&resolved))
                .collect();
            classes.insert(name.clone(), resolved);
        }
        Self { classes }
    }

    /// Resolve a node class: exact class, then "default", then the
    /// hard-coded default config.
    pub fn resolve(&self, node_class: &str) -> ModelConfig {
        if let Some(config) = self.classes.get(node_class) {
            return config.clone();
        }
        if let Some(config) = self.classes.get("default") {
            debug!(node_class, "unknown node class; using default model config");
            return config.clone();
        }
        ModelConfig::default()
    }
}
