use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use taskforge_types::{OrchestratorError, WorktreeChangeSet, WorktreeInfo};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::git::{run_git, run_git_tolerating};
use crate::naming::{branch_name, worktree_name};
use crate::status::parse_porcelain_status;

/// Config-file sources copied into every new worktree when present. Missing
/// sources are skipped silently.
const COPIED_CONFIG_FILES: &[&str] = &[
    "AGENTS.md",
    ".editorconfig",
    "rust-toolchain.toml",
    ".env.local",
    "Cargo.toml",
];

struct Entry {
    info: WorktreeInfo,
    pid: u32,
}

#[derive(Clone)]
pub struct WorktreeManager {
    repo_root: Arc<PathBuf>,
    worktrees_root: Arc<PathBuf>,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl WorktreeManager {
    pub fn new(repo_root: impl Into<PathBuf>, worktrees_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: Arc::new(repo_root.into()),
            worktrees_root: Arc::new(worktrees_root.into()),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Removes worktrees git already considers prunable and drops lock files
    /// whose recorded pid is no longer alive. Call once at process startup.
    pub async fn recover_orphans(&self) -> Result<(), OrchestratorError> {
        let listing = run_git(&self.repo_root, &["worktree", "list", "--porcelain"]).await?;
        for block in listing.split("\n\n") {
            if block.contains("prunable") {
                info!(block, "pruning orphaned worktree");
            }
        }
        let _ = run_git(&self.repo_root, &["worktree", "prune"]).await;

        if !self.worktrees_root.exists() {
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(&*self.worktrees_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            if let Ok(contents) = tokio::fs::read_to_string(&path).await {
                if let Ok(pid) = contents.trim().parse::<u32>() {
                    if !pid_is_alive(pid) {
                        warn!(?path, pid, "removing lock file for dead process");
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Creates (or reuses a healthy existing) worktree for `(agent_id, task_id, stage_index)`.
    pub async fn acquire(&self, agent_id: &str, task_id: &str, stage_index: usize) -> Result<WorktreeInfo, OrchestratorError> {
        let name = worktree_name(agent_id, task_id, stage_index);

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&name) {
                if entry.info.path.exists() {
                    return Ok(entry.info.clone());
                }
            }
        }

        let path = self.worktrees_root.join(&name);
        let branch = branch_name(agent_id, task_id);

        if let Err(err) = self.create_worktree(&path, &branch).await {
            let _ = tokio::fs::remove_dir_all(&path).await;
            return Err(err);
        }

        self.copy_config_files(&path).await;
        self.write_lock(&name).await?;

        let info = WorktreeInfo {
            name: name.clone(),
            path: path.clone(),
            branch,
            head_commit: run_git(&path, &["rev-parse", "HEAD"]).await.ok().map(|s| s.trim().to_string()),
            locked: true,
            prunable: false,
            owning_agent_id: Some(agent_id.to_string()),
        };

        self.entries.write().await.insert(
            name,
            Entry {
                info: info.clone(),
                pid: std::process::id(),
            },
        );
        Ok(info)
    }

    async fn create_worktree(&self, path: &Path, branch: &str) -> Result<(), OrchestratorError> {
        run_git_tolerating(
            &self.repo_root,
            &["branch", branch],
            "already exists",
        )
        .await?;
        run_git(
            &self.repo_root,
            &[
                "worktree",
                "add",
                path.to_str().ok_or_else(|| OrchestratorError::WorktreeFailure("non-utf8 worktree path".into()))?,
                branch,
            ],
        )
        .await?;
        Ok(())
    }

    async fn copy_config_files(&self, worktree_path: &Path) {
        for name in COPIED_CONFIG_FILES {
            let src = self.repo_root.join(name);
            if !src.exists() {
                continue;
            }
            let dst = worktree_path.join(name);
            if let Err(err) = tokio::fs::copy(&src, &dst).await {
                warn!(%name, %err, "failed to copy config file into worktree");
            }
        }
    }

    async fn write_lock(&self, name: &str) -> Result<(), OrchestratorError> {
        let lock_path = self.worktrees_root.join(format!("{name}.lock"));
        tokio::fs::write(&lock_path, std::process::id().to_string()).await?;
        Ok(())
    }

    /// Runs `f` against the worktree's path. Never touches the process
    /// current directory — the path is handed to the closure explicitly so
    /// concurrent agents never race over a shared cwd.
    pub async fn execute_in<F, Fut, T>(&self, agent_id: &str, name: &str, f: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: std::future::Future<Output = Result<T, OrchestratorError>>,
    {
        let path = {
            let entries = self.entries.read().await;
            let entry = entries
                .get(name)
                .ok_or_else(|| OrchestratorError::WorktreeFailure(format!("no worktree named {name}")))?;
            if entry.info.owning_agent_id.as_deref() != Some(agent_id) {
                return Err(OrchestratorError::WorktreeFailure(format!(
                    "worktree {name} is not owned by {agent_id}"
                )));
            }
            entry.info.path.clone()
        };
        f(path).await
    }

    pub async fn capture_changes(&self, name: &str) -> Result<WorktreeChangeSet, OrchestratorError> {
        let path = self.path_of(name).await?;
        let status_output = run_git(&path, &["status", "--porcelain"]).await?;
        let mut change_set = parse_porcelain_status(&status_output);
        change_set.unified_diff = run_git(&path, &["diff", "HEAD"]).await.unwrap_or_default();
        Ok(change_set)
    }

    pub async fn commit(&self, name: &str, message: &str) -> Result<bool, OrchestratorError> {
        let path = self.path_of(name).await?;
        run_git(&path, &["add", "-A"]).await?;
        match run_git_tolerating(&path, &["commit", "-m", message], "nothing to commit").await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    pub async fn cleanup(&self, name: &str) -> Result<(), OrchestratorError> {
        let path = self.path_of(name).await?;
        let _ = run_git(&path, &["stash", "push", "-u", "-m", "taskforge cleanup"]).await;
        let lock_path = self.worktrees_root.join(format!("{name}.lock"));
        let _ = tokio::fs::remove_file(&lock_path).await;
        let _ = run_git(
            &self.repo_root,
            &["worktree", "remove", "--force", path.to_str().unwrap_or_default()],
        )
        .await;
        self.entries.write().await.remove(name);
        Ok(())
    }

    async fn path_of(&self, name: &str) -> Result<PathBuf, OrchestratorError> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .map(|e| e.info.path.clone())
            .ok_or_else(|| OrchestratorError::WorktreeFailure(format!("no worktree named {name}")))
    }

    pub async fn list(&self) -> Vec<WorktreeInfo> {
        self.entries.read().await.values().map(|e| e.info.clone()).collect()
    }
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    // Signal 0 performs no-op permission/existence checks only.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}
