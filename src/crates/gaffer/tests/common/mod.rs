//! Common test utilities: scripted agents and disposable git projects.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use gaffer::agent::{AgentRequest, AgentRunner, AgentTranscript};
use gaffer::error::Result;
use gaffer::git::GitRepo;
use gaffer::signal::SIGNAL_MARKER;
use gaffer::ProjectLayout;

/// Wrap a signal payload in marker lines plus some agent chatter
pub fn signal_output(payload: &str) -> String {
    format!("thinking out loud...\n{}\n{}\n{}\n", SIGNAL_MARKER, payload, SIGNAL_MARKER)
}

/// Agent runner that replays canned stdout and records every request
pub struct ScriptedRunner {
    outputs: Mutex<Vec<String>>,
    pub requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedRunner {
    pub fn new(outputs: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            outputs: Mutex::new(outputs),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.agent.clone())
            .collect()
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentTranscript> {
        self.requests.lock().unwrap().push(request.clone());
        let mut outputs = self.outputs.lock().unwrap();
        let stdout = if outputs.is_empty() {
            String::new()
        } else {
            outputs.remove(0)
        };
        Ok(AgentTranscript {
            stdout,
            stderr: String::new(),
            exit_code: 0,
            duration: Duration::from_millis(5),
        })
    }
}

/// A fresh project directory with tasks/OUTCOMES.md in place
pub fn plain_project(outcomes: &str) -> (TempDir, ProjectLayout) {
    let dir = TempDir::new().unwrap();
    let project = ProjectLayout::new(dir.path());
    std::fs::create_dir_all(project.tasks_dir()).unwrap();
    std::fs::write(project.outcomes_path(), outcomes).unwrap();
    (dir, project)
}

/// A project that is also a git repository with one commit on `main`
pub async fn git_project(outcomes: &str) -> (TempDir, ProjectLayout) {
    let (dir, project) = plain_project(outcomes);
    let repo = GitRepo::new(dir.path());
    repo.run(&["init"]).await.unwrap();
    repo.run(&["config", "user.email", "test@example.com"])
        .await
        .unwrap();
    repo.run(&["config", "user.name", "Test"]).await.unwrap();
    repo.run(&["config", "commit.gpgsign", "false"]).await.unwrap();
    repo.run(&["add", "."]).await.unwrap();
    repo.run(&["commit", "-m", "init"]).await.unwrap();
    repo.run(&["branch", "-M", "main"]).await.unwrap();
    (dir, project)
}

/// Newest run directory under tasks/
pub fn find_run_dir(tasks_dir: &Path) -> std::path::PathBuf {
    let mut dirs: Vec<_> = std::fs::read_dir(tasks_dir)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("run-"))
                    .unwrap_or(false)
        })
        .collect();
    dirs.sort();
    dirs.pop().expect("a run directory exists")
}
