//! Project layout, pre-flight validation, and run bookkeeping.
//!
//! Everything the orchestrator consumes lives under the project root:
//! `tasks/OUTCOMES.md` (required), `tasks/ROADMAP.md` (optional),
//! per-node working directories, run directories holding checkpoints, the
//! `.worktrees/` area, and the optional `.ai/` memory files referenced in
//! node contexts.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{error, info};

use crate::error::{GafferError, Result};

/// Well-known memory files referenced in every node context
pub const MEMORY_FILES: [&str; 5] = [
    ".ai/ARCHITECTURE.json",
    ".ai/FILES.json",
    ".ai/PATTERNS.md",
    ".ai/QUICK.md",
    ".ai/BUSINESS.json",
];

/// Path helpers rooted at one project directory
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    pub fn outcomes_path(&self) -> PathBuf {
        self.tasks_dir().join("OUTCOMES.md")
    }

    pub fn roadmap_path(&self) -> PathBuf {
        self.tasks_dir().join("ROADMAP.md")
    }

    /// Working directory for content and discovery nodes
    pub fn node_dir(&self, node_id: &str) -> PathBuf {
        self.tasks_dir().join(node_id)
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.tasks_dir().join(run_id)
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.root.join(".worktrees")
    }

    pub fn worktree_path(&self, sanitized_node_id: &str) -> PathBuf {
        self.worktrees_dir().join(sanitized_node_id)
    }

    pub fn agent_log_dir(&self) -> PathBuf {
        self.tasks_dir().join("agent-logs")
    }

    pub fn orchestrator_log_path(&self) -> PathBuf {
        self.tasks_dir().join("orchestrator.log")
    }

    pub fn stylesheet_path(&self) -> PathBuf {
        self.root.join("model-stylesheet.yaml")
    }

    /// Validate that OUTCOMES.md exists and is non-empty.
    pub fn validate_outcomes(&self) -> Result<()> {
        let path = self.outcomes_path();
        if !path.is_file() {
            error!(path = %path.display(), "OUTCOMES.md not found; define project outcomes first");
            return Err(GafferError::Config(format!(
                "OUTCOMES.md not found at {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            error!(path = %path.display(), "OUTCOMES.md is empty");
            return Err(GafferError::Config(format!(
                "OUTCOMES.md is empty at {}",
                path.display()
            )));
        }
        info!(path = %path.display(), "OUTCOMES.md validated");
        Ok(())
    }

    pub fn read_outcomes(&self) -> Result<String> {
        Ok(fs::read_to_string(self.outcomes_path())?)
    }

    /// First `limit` characters of the outcomes text
    pub fn outcomes_summary(&self, limit: usize) -> String {
        self.read_outcomes()
            .map(|text| text.chars().take(limit).collect())
            .unwrap_or_default()
    }

    /// Read ROADMAP.md, logging a resume summary when sprint status
    /// markers are present. Returns None on first run.
    pub fn read_roadmap(&self) -> Option<String> {
        let path = self.roadmap_path();
        if !path.is_file() {
            info!("first run; planner will create ROADMAP.md");
            return None;
        }
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                error!(path = %path.display(), error = %err, "cannot read ROADMAP.md");
                return None;
            }
        };

        let done = content.matches("**Status:** done").count();
        let in_progress = content.matches("**Status:** in_progress").count();
        let blocked = content.matches("**Status:** blocked").count();
        let backlog = content.matches("**Status:** backlog").count();
        if done + in_progress + blocked + backlog > 0 {
            info!(
                done,
                in_progress, blocked, backlog, "resuming from existing roadmap"
            );
        }
        Some(content)
    }

    /// Listing of the well-known `.ai/` memory files, each marked present
    /// or missing. Missing files are noted, never an error.
    pub fn memory_file_listing(&self) -> String {
        let mut lines = Vec::with_capacity(MEMORY_FILES.len());
        for rel in MEMORY_FILES {
            let marker = if self.root.join(rel).is_file() {
                "present"
            } else {
                "missing"
            };
            lines.push(format!("{}: {}", rel, marker));
        }
        lines.join("\n")
    }

    /// Append one line to tasks/orchestrator.log. Best-effort: logging
    /// must never take the run down.
    pub fn append_log(&self, line: &str) {
        let path = self.orchestrator_log_path();
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(&path) {
            let _ = writeln!(file, "{} {}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"), line);
        }
    }
}
