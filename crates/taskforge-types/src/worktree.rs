use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
    pub head_commit: Option<String>,
    pub locked: bool,
    pub prunable: bool,
    pub owning_agent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub kind: FileChangeKind,
    pub path: String,
    #[serde(default)]
    pub previous_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorktreeChangeSet {
    pub changes: Vec<FileChange>,
    pub unified_diff: String,
    pub stash_ref: Option<String>,
    pub committed: bool,
}

impl WorktreeChangeSet {
    pub fn added(&self) -> Vec<&str> {
        self.by_kind(FileChangeKind::Added)
    }

    pub fn modified(&self) -> Vec<&str> {
        self.by_kind(FileChangeKind::Modified)
    }

    pub fn deleted(&self) -> Vec<&str> {
        self.by_kind(FileChangeKind::Deleted)
    }

    fn by_kind(&self, kind: FileChangeKind) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.path.as_str())
            .collect()
    }
}
