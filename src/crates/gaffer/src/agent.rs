//! External agent CLI invocation.
//!
//! Agents are separate processes; the orchestrator's only contract with
//! them is argv in, stdout out. The tool profile on the resolved model
//! selects the argv shape. Each invocation runs with the host marker
//! variable stripped from the environment so a nested agent does not
//! refuse to start, is bounded by the node's configured timeout, and is
//! archived to the agent log directory for post-mortem.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{GafferError, Result};
use crate::model_config::{ModelConfig, DEFAULT_REASONING_EFFORT};

/// Environment variable marking "this process runs inside the agent
/// host"; stripped so nested invocations are allowed
pub const HOST_MARKER_ENV: &str = "CLAUDECODE";

/// One request to run an agent
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Agent name (`pm`, `pl`, `content`, `discovery`)
    pub agent: String,
    /// Full context string passed as the prompt
    pub context: String,
    /// Resolved model selection, including the timeout
    pub model: ModelConfig,
    /// Working directory for the subprocess
    pub cwd: PathBuf,
}

/// Captured result of one agent invocation
#[derive(Debug, Clone)]
pub struct AgentTranscript {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

/// Seam between the orchestrator and the external CLI, so handlers can be
/// exercised without spawning processes
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentTranscript>;
}

#[async_trait]
impl<T: AgentRunner + ?Sized> AgentRunner for std::sync::Arc<T> {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentTranscript> {
        self.as_ref().invoke(request).await
    }
}

/// Build the argv for a request according to its tool profile.
///
/// Unknown profiles warn and use the `claude` shape.
pub fn build_argv(model: &ModelConfig, agent: &str, context: &str) -> Vec<String> {
    match model.tool_profile.as_str() {
        "claude" => vec![
            "claude".to_string(),
            "--print".to_string(),
            "--agent".to_string(),
            agent.to_string(),
            "-p".to_string(),
            context.to_string(),
        ],
        "codex" | "gpt" => {
            let mut argv = vec![
                "codex".to_string(),
                "-m".to_string(),
                model.model.clone(),
            ];
            if model.reasoning_effort != DEFAULT_REASONING_EFFORT {
                argv.push("-c".to_string());
                argv.push(format!(
                    "model_reasoning_effort=\"{}\"",
                    model.reasoning_effort
                ));
            }
            argv.push("exec".to_string());
            argv.push("--full-auto".to_string());
            argv.push(context.to_string());
            argv
        }
        other => {
            warn!(profile = %other, "unknown tool profile; falling back to claude argv");
            vec![
                "claude".to_string(),
                "--print".to_string(),
                "--agent".to_string(),
                agent.to_string(),
                "-p".to_string(),
                context.to_string(),
            ]
        }
    }
}

/// Production runner that spawns the real CLI
pub struct CliAgentRunner {
    log_dir: PathBuf,
    sequence: AtomicU64,
}

impl CliAgentRunner {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            sequence: AtomicU64::new(1),
        }
    }

    /// Archive one invocation: context, output, stderr when non-empty,
    /// and an error file when the invocation failed. Best-effort.
    fn archive(
        &self,
        request: &AgentRequest,
        transcript: Option<&AgentTranscript>,
        error: Option<&GafferError>,
    ) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let dir = self.log_dir.join(format!("{:04}-{}", seq, request.agent));
        if std::fs::create_dir_all(&dir).is_err() {
            return;
        }
        let _ = std::fs::write(dir.join("context.txt"), &request.context);
        if let Some(transcript) = transcript {
            let _ = std::fs::write(dir.join("output.txt"), &transcript.stdout);
            if !transcript.stderr.is_empty() {
                let _ = std::fs::write(dir.join("stderr.txt"), &transcript.stderr);
            }
        }
        if let Some(error) = error {
            let _ = std::fs::write(dir.join("error.txt"), error.to_string());
        }
    }
}

#[async_trait]
impl AgentRunner for CliAgentRunner {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentTranscript> {
        let argv = build_argv(&request.model, &request.agent, &request.context);
        let timeout = Duration::from_secs(request.model.timeout);
        info!(
            agent = %request.agent,
            model = %request.model.model,
            timeout_secs = request.model.timeout,
            "invoking agent"
        );

        let start = Instant::now();
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(&request.cwd)
            .env_remove(HOST_MARKER_ENV)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                let error = GafferError::Invocation {
                    agent: request.agent.clone(),
                    details: format!(
                        "failed to spawn '{}': {} (is it on PATH?)",
                        argv[0], err
                    ),
                };
                self.archive(request, None, Some(&error));
                return Err(error);
            }
        };

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                let error = GafferError::Invocation {
                    agent: request.agent.clone(),
                    details: format!("failed to collect agent output: {}", err),
                };
                self.archive(request, None, Some(&error));
                return Err(error);
            }
            Err(_) => {
                // kill_on_drop reaps the child when the wait future drops
                let error = GafferError::Timeout {
                    agent: request.agent.clone(),
                    seconds: request.model.timeout,
                };
                self.archive(request, None, Some(&error));
                return Err(error);
            }
        };

        let transcript = AgentTranscript {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        };
        info!(
            agent = %request.agent,
            exit_code = transcript.exit_code,
            elapsed_secs = transcript.duration.as_secs(),
            "agent completed"
        );

        if transcript.exit_code != 0 && transcript.stdout.is_empty() {
            let error = GafferError::Invocation {
                agent: request.agent.clone(),
                details: format!(
                    "exit code {} with no stdout; stderr: {}",
                    transcript.exit_code,
                    transcript.stderr.chars().take(500).collect::<String>()
                ),
            };
            self.archive(request, Some(&transcript), Some(&error));
            return Err(error);
        }
        if transcript.exit_code != 0 {
            warn!(
                agent = %request.agent,
                exit_code = transcript.exit_code,
                "agent exited non-zero but produced stdout; continuing"
            );
        }

        self.archive(request, Some(&transcript), None);
        Ok(transcript)
    }
}

/// Invoke through the model's fallback chain.
///
/// Timeouts and invocation failures advance to the next chain entry;
/// whatever the agent printed is never retried here, that is the
/// planner's job. Returns the transcript together with the model that
/// actually produced it.
pub async fn invoke_with_fallback(
    runner: &dyn AgentRunner,
    request: &AgentRequest,
) -> Result<(AgentTranscript, ModelConfig)> {
    let chain = request.model.chain();
    let mut last_error: Option<GafferError> = None;
    for (attempt, model) in chain.into_iter().enumerate() {
        if attempt > 0 {
            warn!(
                agent = %request.agent,
                model = %model.model,
                "falling back to next model in chain"
            );
        }
        let attempt_request = AgentRequest {
            model: model.clone(),
            ..request.clone()
        };
        match runner.invoke(&attempt_request).await {
            Ok(transcript) => return Ok((transcript, model)),
            Err(err @ (GafferError::Timeout { .. } | GafferError::Invocation { .. })) => {
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_error.unwrap_or_else(|| GafferError::Other("empty model chain".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(profile: &str, effort: &str) -> ModelConfig {
        ModelConfig {
            tool_profile: profile.to_string(),
            reasoning_effort: effort.to_string(),
            model: "m1".to_string(),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_claude_argv_shape() {
        let argv = build_argv(&model("claude", "medium"), "pl", "do the thing");
        assert_eq!(
            argv,
            vec!["claude", "--print", "--agent", "pl", "-p", "do the thing"]
        );
    }

    #[test]
    fn test_codex_argv_omits_default_effort() {
        let argv = build_argv(&model("codex", DEFAULT_REASONING_EFFORT), "pl", "ctx");
        assert_eq!(argv, vec!["codex", "-m", "m1", "exec", "--full-auto", "ctx"]);
    }

    #[test]
    fn test_codex_argv_includes_non_default_effort() {
        let argv = build_argv(&model("gpt", "high"), "pl", "ctx");
        assert_eq!(
            argv,
            vec![
                "codex",
                "-m",
                "m1",
                "-c",
                "model_reasoning_effort=\"high\"",
                "exec",
                "--full-auto",
                "ctx"
            ]
        );
    }

    #[test]
    fn test_unknown_profile_uses_claude_shape() {
        let argv = build_argv(&model("mystery", "medium"), "pm", "ctx");
        assert_eq!(argv[0], "claude");
    }

    struct FlakyRunner {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl AgentRunner for FlakyRunner {
        async fn invoke(&self, request: &AgentRequest) -> Result<AgentTranscript> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Err(GafferError::Timeout {
                    agent: request.agent.clone(),
                    seconds: 1,
                })
            } else {
                Ok(AgentTranscript {
                    stdout: "ok".to_string(),
                    stderr: String::new(),
                    exit_code: 0,
                    duration: Duration::from_secs(1),
                })
            }
        }
    }

    #[tokio::test]
    async fn test_fallback_chain_advances_on_timeout() {
        let runner = FlakyRunner {
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let mut primary = model("claude", "medium");
        primary.fallback = vec![ModelConfig {
            model: "backup".to_string(),
            ..ModelConfig::default()
        }];
        let request = AgentRequest {
            agent: "pl".to_string(),
            context: "ctx".to_string(),
            model: primary,
            cwd: PathBuf::from("."),
        };
        let (transcript, used) = invoke_with_fallback(&runner, &request).await.unwrap();
        assert_eq!(transcript.stdout, "ok");
        assert_eq!(used.model, "backup");
    }

    #[tokio::test]
    async fn test_fallback_exhaustion_returns_last_error() {
        struct AlwaysTimeout;
        #[async_trait]
        impl AgentRunner for AlwaysTimeout {
            async fn invoke(&self, request: &AgentRequest) -> Result<AgentTranscript> {
                Err(GafferError::Timeout {
                    agent: request.agent.clone(),
                    seconds: 7,
                })
            }
        }
        let request = AgentRequest {
            agent: "pl".to_string(),
            context: "ctx".to_string(),
            model: model("claude", "medium"),
            cwd: PathBuf::from("."),
        };
        let err = invoke_with_fallback(&AlwaysTimeout, &request).await.unwrap_err();
        assert!(matches!(err, GafferError::Timeout { seconds: 7, .. }));
    }
}
