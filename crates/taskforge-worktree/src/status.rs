use taskforge_types::{FileChange, FileChangeKind, WorktreeChangeSet};

/// Parses `git status --porcelain` two-column-prefix output into a change
/// set. Renames (`R  old -> new`) report the new path and retain the old one.
pub fn parse_porcelain_status(output: &str) -> WorktreeChangeSet {
    let mut changes = Vec::new();
    for line in output.lines() {
        if line.len() < 3 {
            continue;
        }
        let (prefix, rest) = line.split_at(2);
        let rest = rest.trim_start();
        let kind = classify(prefix);
        let (path, previous_path) = if let Some((old_path, new_path)) = rest.split_once(" -> ") {
            (new_path.to_string(), Some(old_path.to_string()))
        } else {
            (rest.to_string(), None)
        };
        changes.push(FileChange { kind, path, previous_path });
    }
    WorktreeChangeSet {
        changes,
        ..Default::default()
    }
}

fn classify(prefix: &str) -> FileChangeKind {
    if prefix.contains('R') {
        FileChangeKind::Renamed
    } else if prefix.contains('A') || prefix == "??" {
        FileChangeKind::Added
    } else if prefix.contains('D') {
        FileChangeKind::Deleted
    } else {
        FileChangeKind::Modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_added_modified_deleted_renamed() {
        let output = " M src/lib.rs\nA  src/new.rs\n D src/gone.rs\nR  src/old.rs -> src/moved.rs\n?? src/untracked.rs\n";
        let set = parse_porcelain_status(output);
        assert_eq!(set.added().len(), 2);
        assert_eq!(set.modified().len(), 1);
        assert_eq!(set.deleted().len(), 1);
        assert!(set.changes.iter().any(|c| c.path == "src/moved.rs" && c.kind == FileChangeKind::Renamed));
    }

    #[test]
    fn blank_lines_are_ignored() {
        let set = parse_porcelain_status("\n\n");
        assert!(set.changes.is_empty());
    }
}
