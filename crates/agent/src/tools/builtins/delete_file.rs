//! Delete file tool.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolError};
use crate::versioning::TrackOp;

pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the workspace."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path to delete."
                }
            },
            "required": ["path"]
        })
    }

    async fn run(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let path_arg = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidRequest("path is required".to_string()))?;
        let (absolute, relative) = context.resolve_path(path_arg)?;

        let existed = absolute.is_file();
        if existed {
            context.versioning.start_edit(&[relative.clone()]).await?;
            if let Err(e) = tokio::fs::remove_file(&absolute).await {
                context.versioning.abort_edit().await?;
                return Err(ToolError::Io(e));
            }
            context
                .versioning
                .track_file_change(&relative, TrackOp::Delete)?;
            context.versioning.finalize_edit().await?;
            let _ = context.rag.delete_by_source(&relative).await;
        }

        Ok(json!({
            "type": "delete_file_result",
            "path": relative,
            "existed": existed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tool_context;
    use std::fs;

    #[tokio::test]
    async fn deletes_existing_file() {
        let (context, workspace) = tool_context().await;
        fs::write(workspace.path().join("a.txt"), "bye").unwrap();

        let result = DeleteFileTool
            .run(json!({"path": "a.txt"}), &context)
            .await
            .unwrap();
        assert_eq!(result["type"], "delete_file_result");
        assert_eq!(result["existed"], true);
        assert!(!workspace.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn deleting_missing_file_reports_existed_false() {
        let (context, _workspace) = tool_context().await;
        let result = DeleteFileTool
            .run(json!({"path": "missing.txt"}), &context)
            .await
            .unwrap();
        assert_eq!(result["existed"], false);
    }
}
