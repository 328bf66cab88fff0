//! Write file tool.
//!
//! Writes run inside a versioning transaction: the pre-image is captured
//! before the file changes, the new content is staged on success, and the
//! file is rolled back if anything fails mid-way.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolError};
use crate::versioning::{TrackOp, unified_diff};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories if needed."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path to write."
                },
                "content": {
                    "type": "string",
                    "description": "Content to write."
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn run(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let path_arg = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidRequest("path is required".to_string()))?;
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidRequest("content is required".to_string()))?;

        let (absolute, relative) = context.resolve_path(path_arg)?;
        let previous = tokio::fs::read_to_string(&absolute).await.ok();
        let created = previous.is_none();

        context.versioning.start_edit(&[relative.clone()]).await?;

        let write_result = async {
            if let Some(parent) = absolute.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&absolute, content).await
        }
        .await;

        if let Err(e) = write_result {
            context.versioning.abort_edit().await?;
            return Err(ToolError::Io(e));
        }

        context
            .versioning
            .track_file_change(&relative, TrackOp::Write)?;
        context.versioning.finalize_edit().await?;

        if created {
            let _ = context.rag.index(&relative).await;
        } else {
            let _ = context.rag.reindex(&relative).await;
        }

        let diff = previous.as_deref().map(|old| {
            let (text, _stats) = unified_diff(old, content, &relative);
            text
        });

        Ok(json!({
            "type": "write_file_result",
            "path": relative,
            "bytes": content.len(),
            "created": created,
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
    async fn writes_and_stages_new_file() {
        let (context, workspace) = tool_context().await;

        let result = WriteFileTool
            .run(
                json!({"path": "src/new.rs", "content": "fn main() {}\n"}),
                &context,
            )
            .await
            .unwrap();

        assert_eq!(result["type"], "write_file_result");
        assert_eq!(result["created"], true);
        assert!(result["diff"].is_null());
        assert_eq!(
            fs::read_to_string(workspace.path().join("src/new.rs")).unwrap(),
            "fn main() {}\n"
        );
        assert!(context.versioning.has_staged_changes().await.unwrap());
    }

    #[tokio::test]
    async fn overwrite_reports_diff() {
        let (context, workspace) = tool_context().await;
        fs::write(workspace.path().join("a.txt"), "old\n").unwrap();

        let result = WriteFileTool
            .run(json!({"path": "a.txt", "content": "new\n"}), &context)
            .await
            .unwrap();

        assert_eq!(result["created"], false);
        let diff = result["diff"].as_str().unwrap();
        assert!(diff.contains("-old"));
        assert!(diff.contains("+new"));
    }

    #[tokio::test]
    async fn state_directory_is_protected() {
        let (context, _workspace) = tool_context().await;
        let err = WriteFileTool
            .run(
                json!({"path": ".codeforge/index.json", "content": "{}"}),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
    }
}
