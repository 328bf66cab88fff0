//! List files tool: gitignore-aware directory listing.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolError};

const DEFAULT_MAX_ENTRIES: usize = 500;

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories in the workspace, honoring .gitignore."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list; the project root when omitted."
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Recurse into subdirectories.",
                    "default": false
                },
                "max_entries": {
                    "type": "integer",
                    "description": "Upper bound on returned entries.",
                    "default": 500
                }
            },
            "required": []
        })
    }

    async fn run(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let path_arg = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let recursive = args
            .get("recursive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let max_entries = args
            .get("max_entries")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_ENTRIES);

        let (absolute, _relative) = context.resolve_path(path_arg)?;
        if !absolute.is_dir() {
            return Err(ToolError::InvalidRequest(format!(
                "{path_arg} is not a directory"
            )));
        }

        let restrictions = context.restrictions.clone();
        let entries = tokio::task::spawn_blocking(move || {
            let mut walker = ignore::WalkBuilder::new(&absolute);
            walker.hidden(false).git_ignore(true).git_global(false).git_exclude(false);
            if !recursive {
                walker.max_depth(Some(1));
            }

            let mut entries = Vec::new();
            let mut truncated = false;
            for entry in walker.build().flatten() {
                if entry.path() == absolute {
                    continue;
                }
                let rel = restrictions.relative(entry.path());
                // Hide dot-directories such as .git and the state directory.
                if rel.starts_with('.') || rel.contains("/.") {
                    continue;
                }
                if entries.len() >= max_entries {
                    truncated = true;
                    break;
                }
                let kind = if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
                    "dir"
                } else {
                    "file"
                };
                entries.push(json!({ "path": rel, "kind": kind }));
            }
            (entries, truncated)
        })
        .await
        .map_err(|e| ToolError::Other(anyhow::anyhow!("listing task failed: {e}")))?;

        let (entries, truncated) = entries;
        Ok(json!({
            "type": "list_files_result",
            "entries": entries,
            "truncated": truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tool_context;
    use std::fs;

    #[tokio::test]
    async fn lists_top_level_by_default() {
        let (context, workspace) = tool_context().await;
        fs::write(workspace.path().join("a.txt"), "").unwrap();
        fs::create_dir_all(workspace.path().join("src")).unwrap();
        fs::write(workspace.path().join("src/lib.rs"), "").unwrap();

        let result = ListFilesTool.run(json!({}), &context).await.unwrap();
        let entries = result["entries"].as_array().unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e["path"].as_str().unwrap()).collect();
        assert!(paths.contains(&"a.txt"));
        assert!(paths.contains(&"src"));
        assert!(!paths.contains(&"src/lib.rs"));
    }

    #[tokio::test]
    async fn recursive_listing_descends() {
        let (context, workspace) = tool_context().await;
        fs::create_dir_all(workspace.path().join("src")).unwrap();
        fs::write(workspace.path().join("src/lib.rs"), "").unwrap();

        let result = ListFilesTool
            .run(json!({"recursive": true}), &context)
            .await
            .unwrap();
        let entries = result["entries"].as_array().unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e["path"].as_str().unwrap()).collect();
        assert!(paths.contains(&"src/lib.rs"));
    }

    #[tokio::test]
    async fn respects_max_entries() {
        let (context, workspace) = tool_context().await;
        for i in 0..10 {
            fs::write(workspace.path().join(format!("f{i}.txt")), "").unwrap();
        }

        let result = ListFilesTool
            .run(json!({"max_entries": 3}), &context)
            .await
            .unwrap();
        assert_eq!(result["entries"].as_array().unwrap().len(), 3);
        assert_eq!(result["truncated"], true);
    }
}
