mod git;
mod manager;
mod naming;
mod status;

pub use manager::WorktreeManager;
pub use naming::{branch_name, worktree_name};
pub use status::parse_porcelain_status;

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    async fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            Command::new("git")
                .arg("-C")
                .arg(dir.path())
                .args(args)
                .output()
                .unwrap()
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "initial"]);
        dir
    }

    #[tokio::test]
    async fn acquire_creates_worktree_and_execute_in_reads_path() {
        let repo = init_repo().await;
        let worktrees_root = repo.path().join(".worktrees");
        let manager = WorktreeManager::new(repo.path().to_path_buf(), worktrees_root);

        let info = manager.acquire("implementer", "task-1", 0).await.unwrap();
        assert!(info.path.exists());

        let seen_path = manager
            .execute_in("implementer", &info.name, |path| async move { Ok(path) })
            .await
            .unwrap();
        assert_eq!(seen_path, info.path);

        manager.cleanup(&info.name).await.unwrap();
    }

    #[tokio::test]
    async fn acquire_reuses_existing_worktree_for_same_stage() {
        let repo = init_repo().await;
        let worktrees_root = repo.path().join(".worktrees");
        let manager = WorktreeManager::new(repo.path().to_path_buf(), worktrees_root);

        let first = manager.acquire("implementer", "task-1", 0).await.unwrap();
        let second = manager.acquire("implementer", "task-1", 0).await.unwrap();
        assert_eq!(first.name, second.name);
        assert_eq!(first.path, second.path);
    }

    #[tokio::test]
    async fn execute_in_rejects_wrong_owning_agent() {
        let repo = init_repo().await;
        let worktrees_root = repo.path().join(".worktrees");
        let manager = WorktreeManager::new(repo.path().to_path_buf(), worktrees_root);
        let info = manager.acquire("implementer", "task-1", 0).await.unwrap();

        let result = manager
            .execute_in("validator", &info.name, |path| async move { Ok(path) })
            .await;
        assert!(result.is_err());
    }
}
