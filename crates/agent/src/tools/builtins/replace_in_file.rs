//! Targeted in-place edits: replace an exact substring in a file.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolError};
use crate::versioning::{TrackOp, unified_diff};

pub struct ReplaceInFileTool;

#[async_trait]
impl Tool for ReplaceInFileTool {
    fn name(&self) -> &str {
        "replace_in_file"
    }

    fn description(&self) -> &str {
        "Replace an exact text fragment inside a file. The fragment must occur in the file; by default only the first occurrence is replaced."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to edit."
                },
                "search": {
                    "type": "string",
                    "description": "Exact text to find."
                },
                "replace": {
                    "type": "string",
                    "description": "Replacement text."
                },
                "all": {
                    "type": "boolean",
                    "description": "Replace every occurrence instead of the first.",
                    "default": false
                }
            },
            "required": ["path", "search", "replace"]
        })
    }

    async fn run(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let path_arg = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidRequest("path is required".to_string()))?;
        let search = args
            .get("search")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidRequest("search is required".to_string()))?;
        let replace = args
            .get("replace")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidRequest("replace is required".to_string()))?;
        let all = args.get("all").and_then(Value::as_bool).unwrap_or(false);

        if search.is_empty() {
            return Err(ToolError::InvalidRequest(
                "search must not be empty".to_string(),
            ));
        }

        let (absolute, relative) = context.resolve_path(path_arg)?;
        let old = tokio::fs::read_to_string(&absolute)
            .await
            .map_err(|e| ToolError::InvalidRequest(format!("cannot read {relative}: {e}")))?;

        let occurrences = old.matches(search).count();
        if occurrences == 0 {
            return Err(ToolError::InvalidRequest(format!(
                "search text not found in {relative}"
            )));
        }

        let (new, replaced) = if all {
            (old.replace(search, replace), occurrences)
        } else {
            (old.replacen(search, replace, 1), 1)
        };

        context.versioning.start_edit(&[relative.clone()]).await?;
        if let Err(e) = tokio::fs::write(&absolute, &new).await {
            context.versioning.abort_edit().await?;
            return Err(ToolError::Io(e));
        }
        context
            .versioning
            .track_file_change(&relative, TrackOp::Write)?;
        context.versioning.finalize_edit().await?;

        let _ = context.rag.reindex(&relative).await;

        let (diff, _stats) = unified_diff(&old, &new, &relative);
        Ok(json!({
            "type": "replace_file_result",
            "path": relative,
            "replaced": replaced,
            "diff": diff,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tool_context;
    use std::fs;

    #[tokio::test]
    async fn replaces_first_occurrence() {
        let (context, workspace) = tool_context().await;
        fs::write(workspace.path().join("a.txt"), "x x x\n").unwrap();

        let result = ReplaceInFileTool
            .run(
                json!({"path": "a.txt", "search": "x", "replace": "y"}),
                &context,
            )
            .await
            .unwrap();

        assert_eq!(result["type"], "replace_file_result");
        assert_eq!(result["replaced"], 1);
        assert_eq!(
            fs::read_to_string(workspace.path().join("a.txt")).unwrap(),
            "y x x\n"
        );
    }

    #[tokio::test]
    async fn replaces_all_occurrences() {
        let (context, workspace) = tool_context().await;
        fs::write(workspace.path().join("a.txt"), "x x x\n").unwrap();

        let result = ReplaceInFileTool
            .run(
                json!({"path": "a.txt", "search": "x", "replace": "y", "all": true}),
                &context,
            )
            .await
            .unwrap();

        assert_eq!(result["replaced"], 3);
        assert_eq!(
            fs::read_to_string(workspace.path().join("a.txt")).unwrap(),
            "y y y\n"
        );
    }

    #[tokio::test]
    async fn missing_fragment_is_an_error() {
        let (context, workspace) = tool_context().await;
        fs::write(workspace.path().join("a.txt"), "content\n").unwrap();

        let err = ReplaceInFileTool
            .run(
                json!({"path": "a.txt", "search": "absent", "replace": "y"}),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidRequest(_)));
        // File untouched.
        assert_eq!(
            fs::read_to_string(workspace.path().join("a.txt")).unwrap(),
            "content\n"
        );
    }
}
