//! Workspace containment guard for file tools.

use std::path::{Component, Path, PathBuf};

use super::context::ToolError;
use crate::project::STATE_DIR;

/// Restricts file tools to the workspace, excluding the state directory.
///
/// Containment is checked lexically: `..` components are resolved without
/// touching the filesystem, so a path cannot escape the root by traversal.
#[derive(Debug, Clone)]
pub struct FileRestrictions {
    workspace_root: PathBuf,
}

impl FileRestrictions {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    /// Resolve a tool-supplied path into an absolute workspace path, or
    /// refuse it.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let raw = raw.replace('\\', "/");
        let candidate = Path::new(&raw);

        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.workspace_root.join(candidate)
        };

        let normalized = lexical_normalize(&joined);
        if !normalized.starts_with(&self.workspace_root) {
            return Err(ToolError::PermissionDenied(format!(
                "path escapes the workspace: {raw}"
            )));
        }

        let rel = normalized
            .strip_prefix(&self.workspace_root)
            .unwrap_or(&normalized);
        if rel.components().next() == Some(Component::Normal(STATE_DIR.as_ref())) {
            return Err(ToolError::PermissionDenied(format!(
                "the assistant state directory is off limits: {raw}"
            )));
        }

        Ok(normalized)
    }

    /// The workspace-relative, forward-slash form of a resolved path.
    pub fn relative(&self, resolved: &Path) -> String {
        resolved
            .strip_prefix(&self.workspace_root)
            .unwrap_or(resolved)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> FileRestrictions {
        FileRestrictions::new("/work/project")
    }

    #[test]
    fn relative_paths_resolve_inside_workspace() {
        let resolved = guard().resolve("src/main.rs").unwrap();
        assert_eq!(resolved, PathBuf::from("/work/project/src/main.rs"));
        assert_eq!(guard().relative(&resolved), "src/main.rs");
    }

    #[test]
    fn traversal_cannot_escape() {
        assert!(matches!(
            guard().resolve("../outside.txt"),
            Err(ToolError::PermissionDenied(_))
        ));
        assert!(matches!(
            guard().resolve("src/../../etc/passwd"),
            Err(ToolError::PermissionDenied(_))
        ));
    }

    #[test]
    fn absolute_paths_must_be_inside() {
        assert!(guard().resolve("/work/project/ok.txt").is_ok());
        assert!(guard().resolve("/etc/passwd").is_err());
    }

    #[test]
    fn state_directory_is_off_limits() {
        assert!(matches!(
            guard().resolve(".codeforge/status.json"),
            Err(ToolError::PermissionDenied(_))
        ));
    }

    #[test]
    fn windows_separators_are_normalized() {
        let resolved = guard().resolve("src\\nested\\file.rs").unwrap();
        assert_eq!(guard().relative(&resolved), "src/nested/file.rs");
    }
}
