//! Git plumbing for the software handler.
//!
//! Thin wrapper over the git CLI: mainline sync with a stash dance,
//! worktree lifecycle, the two-phase conflict-aware merge, and branch
//! cleanup. Every command is capped by a safety timeout so a wedged git
//! call becomes a node failure instead of hanging the orchestrator.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{GafferError, Result};

/// Safety timeout applied to every git command
pub const GIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Stash message used when syncing a dirty mainline
const AUTOSTASH_MESSAGE: &str = "gaffer autostash before mainline sync";

/// Captured result of one git command
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }

    fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Result of the two-phase merge
#[derive(Debug, Clone)]
pub enum MergeReport {
    /// Phase B committed, or there was nothing to merge
    Merged,
    /// Phase A hit conflicts; the merge was aborted and the repo is clean
    Conflict { files: Vec<String>, details: String },
}

/// Handle on the project's git repository
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run one git command in the repository root
    pub async fn run(&self, args: &[&str]) -> Result<GitOutput> {
        debug!(args = ?args, "git");
        let child = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GafferError::Git(format!("failed to spawn git: {}", e)))?;

        let output = tokio::time::timeout(GIT_COMMAND_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                GafferError::Git(format!(
                    "git {} timed out after {}s",
                    args.join(" "),
                    GIT_COMMAND_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| GafferError::Git(format!("failed to collect git output: {}", e)))?;

        Ok(GitOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    pub async fn is_work_tree(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|out| out.ok())
            .unwrap_or(false)
    }

    pub async fn current_branch(&self) -> Result<String> {
        let out = self.run(&["branch", "--show-current"]).await?;
        Ok(out.stdout.trim().to_string())
    }

    async fn ref_exists(&self, name: &str) -> bool {
        self.run(&["rev-parse", "--verify", "--quiet", name])
            .await
            .map(|out| out.ok())
            .unwrap_or(false)
    }

    pub async fn branch_exists(&self, branch: &str) -> bool {
        self.ref_exists(&format!("refs/heads/{}", branch)).await
    }

    /// Checkout `main`, falling back to `master`. A dirty working tree is
    /// stashed with a distinguishing message before the checkout and
    /// restored after. Returns the mainline branch name.
    pub async fn checkout_mainline(&self) -> Result<String> {
        let dirty = !self
            .run(&["status", "--porcelain"])
            .await?
            .stdout
            .trim()
            .is_empty();
        if dirty {
            info!("working tree dirty; stashing before mainline checkout");
            self.run(&["stash", "push", "-m", AUTOSTASH_MESSAGE]).await?;
        }

        let mut mainline = None;
        for candidate in ["main", "master"] {
            if self.ref_exists(&format!("refs/heads/{}", candidate)).await {
                let checkout = self.run(&["checkout", candidate]).await?;
                if checkout.ok() {
                    mainline = Some(candidate.to_string());
                    break;
                }
                warn!(branch = candidate, stderr = %checkout.stderr, "mainline checkout failed");
            }
        }

        if dirty {
            let pop = self.run(&["stash", "pop"]).await?;
            if !pop.ok() {
                warn!(stderr = %pop.stderr, "failed to restore autostash");
            }
        }

        mainline.ok_or_else(|| {
            GafferError::Git("neither 'main' nor 'master' branch exists".to_string())
        })
    }

    /// Create a worktree at `path` checked out to `branch`, creating the
    /// branch when it does not exist yet. A stale path is force-removed
    /// and the add retried once.
    pub async fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        for attempt in 0..2 {
            let path_str = path.to_string_lossy();
            let out = if self.branch_exists(branch).await {
                self.run(&["worktree", "add", &path_str, branch]).await?
            } else {
                self.run(&["worktree", "add", "-b", branch, &path_str]).await?
            };
            if out.ok() {
                info!(path = %path.display(), branch, "worktree created");
                return Ok(());
            }
            if attempt == 0 {
                warn!(
                    path = %path.display(),
                    stderr = %out.stderr,
                    "worktree add failed; removing stale path and retrying"
                );
                self.remove_worktree(path).await;
            } else {
                return Err(GafferError::Git(format!(
                    "worktree add for branch '{}' failed: {}",
                    branch,
                    out.stderr.trim()
                )));
            }
        }
        unreachable!("worktree add loop always returns")
    }

    /// Remove a worktree on every exit path: force removal, a plain
    /// directory delete as fallback, then prune bookkeeping.
    pub async fn remove_worktree(&self, path: &Path) {
        let path_str = path.to_string_lossy();
        let removed = self
            .run(&["worktree", "remove", "--force", &path_str])
            .await
            .map(|out| out.ok())
            .unwrap_or(false);
        if !removed && path.exists() {
            if let Err(err) = std::fs::remove_dir_all(path) {
                warn!(path = %path.display(), error = %err, "failed to delete worktree directory");
            }
        }
        let _ = self.run(&["worktree", "prune"]).await;
    }

    /// Two-phase merge of `branch` into the current (mainline) checkout.
    ///
    /// Phase A merges without committing; any `CONFLICT` in the output
    /// aborts the merge and returns a conflict report carrying the
    /// conflicted file list and both sides' diffstats against the merge
    /// base. Phase B finalizes with a no-edit commit; nothing-to-commit
    /// counts as success.
    pub async fn merge_branch(&self, branch: &str) -> Result<MergeReport> {
        let merge = self
            .run(&["merge", "--no-commit", "--no-ff", branch])
            .await?;

        if merge.combined().contains("CONFLICT") {
            let report = self.conflict_report(branch).await;
            let abort = self.run(&["merge", "--abort"]).await?;
            if !abort.ok() {
                warn!(stderr = %abort.stderr, "merge abort failed; repository may need attention");
            }
            return Ok(report);
        }

        if !merge.ok() {
            // Non-conflict merge failure (unrelated histories, bad ref).
            let _ = self.run(&["merge", "--abort"]).await;
            return Err(GafferError::Git(format!(
                "merge of '{}' failed: {}",
                branch,
                merge.stderr.trim()
            )));
        }

        let commit = self
            .run(&[
                "commit",
                "--no-edit",
                "-m",
                &format!("Merge branch '{}' into main", branch),
            ])
            .await?;
        if commit.ok() || commit.combined().contains("nothing to commit") {
            info!(branch, "merge committed");
            Ok(MergeReport::Merged)
        } else {
            Err(GafferError::Git(format!(
                "merge commit for '{}' failed: {}",
                branch,
                commit.stderr.trim()
            )))
        }
    }

    /// Gather the conflict context while the conflicted merge is still in
    /// the working tree.
    async fn conflict_report(&self, branch: &str) -> MergeReport {
        let files: Vec<String> = self
            .run(&["diff", "--name-only", "--diff-filter=U"])
            .await
            .map(|out| {
                out.stdout
                    .lines()
                    .map(str::to_string)
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let base = self
            .run(&["merge-base", "HEAD", branch])
            .await
            .map(|out| out.stdout.trim().to_string())
            .unwrap_or_default();

        let mut details = format!(
            "Merge of '{}' hit conflicts in {} file(s):\n{}",
            branch,
            files.len(),
            files.join("\n")
        );
        if !base.is_empty() {
            if let Ok(stat) = self
                .run(&["diff", "--stat", &format!("{}..{}", base, branch)])
                .await
            {
                details.push_str(&format!("\n\nBranch changes since merge base:\n{}", stat.stdout));
            }
            if let Ok(stat) = self.run(&["diff", "--stat", &format!("{}..HEAD", base)]).await {
                details.push_str(&format!("\nMainline changes since merge base:\n{}", stat.stdout));
            }
        }

        MergeReport::Conflict { files, details }
    }

    /// Delete a merged branch. Non-fatal on failure.
    pub async fn delete_branch(&self, branch: &str) {
        match self.run(&["branch", "-d", branch]).await {
            Ok(out) if out.ok() => info!(branch, "merged branch deleted"),
            Ok(out) => warn!(branch, stderr = %out.stderr, "could not delete branch"),
            Err(err) => warn!(branch, error = %err, "could not delete branch"),
        }
    }

    /// Commits on `branch` that are not on `mainline`, newest first
    pub async fn branch_commits(&self, mainline: &str, branch: &str) -> Vec<String> {
        self.run(&["rev-list", &format!("{}..{}", mainline, branch)])
            .await
            .map(|out| {
                out.stdout
                    .lines()
                    .map(str::to_string)
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn init_repo() -> (TempDir, GitRepo) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepo::new(dir.path());
        repo.run(&["init"]).await.unwrap();
        repo.run(&["config", "user.email", "test@example.com"])
            .await
            .unwrap();
        repo.run(&["config", "user.name", "Test"]).await.unwrap();
        repo.run(&["config", "commit.gpgsign", "false"]).await.unwrap();
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        repo.run(&["add", "."]).await.unwrap();
        repo.run(&["commit", "-m", "init"]).await.unwrap();
        // Normalize the default branch name across git versions.
        repo.run(&["branch", "-M", "main"]).await.unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn test_is_work_tree() {
        let (dir, repo) = init_repo().await;
        assert!(repo.is_work_tree().await);
        drop(dir);

        let plain = TempDir::new().unwrap();
        assert!(!GitRepo::new(plain.path()).is_work_tree().await);
    }

    #[tokio::test]
    async fn test_checkout_mainline_finds_main() {
        let (_dir, repo) = init_repo().await;
        assert_eq!(repo.checkout_mainline().await.unwrap(), "main");
    }

    #[tokio::test]
    async fn test_checkout_mainline_restores_dirty_tree() {
        let (dir, repo) = init_repo().await;
        repo.run(&["checkout", "-b", "feature"]).await.unwrap();
        std::fs::write(dir.path().join("scratch.txt"), "uncommitted\n").unwrap();
        repo.run(&["add", "scratch.txt"]).await.unwrap();

        assert_eq!(repo.checkout_mainline().await.unwrap(), "main");
        assert!(dir.path().join("scratch.txt").exists());
    }

    #[tokio::test]
    async fn test_worktree_lifecycle() {
        let (dir, repo) = init_repo().await;
        let wt = dir.path().join(".worktrees").join("node-a");
        repo.add_worktree(&wt, "node/a").await.unwrap();
        assert!(wt.join("README.md").exists());
        assert!(repo.branch_exists("node/a").await);

        // A stale directory at the path gets cleared on retry.
        repo.remove_worktree(&wt).await;
        assert!(!wt.exists());
        std::fs::create_dir_all(&wt).unwrap();
        std::fs::write(wt.join("junk"), "stale").unwrap();
        repo.add_worktree(&wt, "node/a").await.unwrap();
        assert!(wt.join("README.md").exists());
        repo.remove_worktree(&wt).await;
    }

    #[tokio::test]
    async fn test_clean_merge_and_branch_delete() {
        let (dir, repo) = init_repo().await;
        repo.run(&["checkout", "-b", "work"]).await.unwrap();
        std::fs::write(dir.path().join("feature.txt"), "new\n").unwrap();
        repo.run(&["add", "."]).await.unwrap();
        repo.run(&["commit", "-m", "feature"]).await.unwrap();

        repo.checkout_mainline().await.unwrap();
        let commits = repo.branch_commits("main", "work").await;
        assert_eq!(commits.len(), 1);

        match repo.merge_branch("work").await.unwrap() {
            MergeReport::Merged => {}
            other => panic!("expected clean merge, got {:?}", other),
        }
        assert!(dir.path().join("feature.txt").exists());

        repo.delete_branch("work").await;
        assert!(!repo.branch_exists("work").await);
    }

    #[tokio::test]
    async fn test_merge_nothing_to_do_is_success() {
        let (_dir, repo) = init_repo().await;
        repo.run(&["checkout", "-b", "noop"]).await.unwrap();
        repo.checkout_mainline().await.unwrap();
        match repo.merge_branch("noop").await.unwrap() {
            MergeReport::Merged => {}
            other => panic!("expected no-op merge success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_conflicting_merge_reports_and_aborts() {
        let (dir, repo) = init_repo().await;
        repo.run(&["checkout", "-b", "clash"]).await.unwrap();
        std::fs::write(dir.path().join("README.md"), "branch version\n").unwrap();
        repo.run(&["commit", "-am", "branch edit"]).await.unwrap();

        repo.checkout_mainline().await.unwrap();
        std::fs::write(dir.path().join("README.md"), "mainline version\n").unwrap();
        repo.run(&["commit", "-am", "mainline edit"]).await.unwrap();

        match repo.merge_branch("clash").await.unwrap() {
            MergeReport::Conflict { files, details } => {
                assert_eq!(files, vec!["README.md".to_string()]);
                assert!(details.contains("README.md"));
                assert!(details.contains("merge base"));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        // Repository left clean: no merge in progress, mainline intact.
        let status = repo.run(&["status", "--porcelain"]).await.unwrap();
        assert!(status.stdout.trim().is_empty());
        let readme = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert_eq!(readme, "mainline version\n");
    }
}
