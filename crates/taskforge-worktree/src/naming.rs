use sha2::{Digest, Sha256};

/// `agent-{agentId}-{6-hex-chars}` where the hex digest is derived from
/// `(agentId, taskId, stageIndex)`. Keyed on the stage rather than the clock
/// so the same stage of the same task always maps to the same worktree and
/// `WorktreeManager::acquire`'s reuse-existing-worktree check can actually
/// hit.
pub fn worktree_name(agent_id: &str, task_id: &str, stage_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(task_id.as_bytes());
    hasher.update(b"\0");
    hasher.update((stage_index as u64).to_be_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(3).map(|b| format!("{b:02x}")).collect();
    format!("agent-{agent_id}-{hex}")
}

pub fn branch_name(agent_id: &str, task_id: &str) -> String {
    format!("agent/{agent_id}/{task_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_deterministic_for_same_inputs() {
        let a = worktree_name("agent-1", "task-1", 0);
        let b = worktree_name("agent-1", "task-1", 0);
        assert_eq!(a, b);
    }

    #[test]
    fn name_differs_when_stage_differs() {
        let a = worktree_name("agent-1", "task-1", 0);
        let b = worktree_name("agent-1", "task-1", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn name_has_expected_shape() {
        let name = worktree_name("implementer", "task-42", 3);
        assert!(name.starts_with("agent-implementer-"));
        assert_eq!(name.len(), "agent-implementer-".len() + 6);
    }
}
