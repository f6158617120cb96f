use std::path::Path;

use taskforge_types::OrchestratorError;
use tokio::process::Command;

/// Runs `git {args}` with the working directory pinned via `-C`, never via
/// `std::env::set_current_dir` — agents share this process, so the current
/// directory is not a safe place to stash per-call state.
pub async fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String, OrchestratorError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_dir)
        .args(args)
        .output()
        .await
        .map_err(|e| OrchestratorError::WorktreeFailure(format!("failed to spawn git {args:?}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OrchestratorError::WorktreeFailure(format!(
            "git {args:?} failed: {}",
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Like [`run_git`] but treats a known-benign stderr pattern as success. Used
/// for "branch already exists" tolerance during worktree reuse.
pub async fn run_git_tolerating(
    repo_dir: &Path,
    args: &[&str],
    tolerate_if_stderr_contains: &str,
) -> Result<String, OrchestratorError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_dir)
        .args(args)
        .output()
        .await
        .map_err(|e| OrchestratorError::WorktreeFailure(format!("failed to spawn git {args:?}: {e}")))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() && !stderr.contains(tolerate_if_stderr_contains) {
        return Err(OrchestratorError::WorktreeFailure(format!(
            "git {args:?} failed: {}",
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
