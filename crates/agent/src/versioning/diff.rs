//! Line-level diffing between blob contents.

use similar::{ChangeTag, TextDiff};

/// Added/removed line counts for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub additions: usize,
    pub deletions: usize,
}

/// Heuristic binary check: git treats content with a NUL byte as binary.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.contains(&0)
}

/// Unified diff plus line counts between two text contents.
pub fn unified_diff(old: &str, new: &str, path: &str) -> (String, DiffStats) {
    let diff = TextDiff::from_lines(old, new);

    let mut stats = DiffStats::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stats.additions += 1,
            ChangeTag::Delete => stats.deletions += 1,
            ChangeTag::Equal => {}
        }
    }

    let text = diff
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string();

    (text, stats)
}

/// Line counts only, without rendering the diff body.
pub fn diff_stats(old: &str, new: &str) -> DiffStats {
    let diff = TextDiff::from_lines(old, new);
    let mut stats = DiffStats::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stats.additions += 1,
            ChangeTag::Delete => stats.deletions += 1,
            ChangeTag::Equal => {}
        }
    }
    stats
}
