//! Read file tool.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolError};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace, optionally limited to a line range."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the project root."
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to include (1-based)."
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to include (inclusive)."
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

        let content = tokio::fs::read_to_string(&absolute)
            .await
            .map_err(|e| ToolError::InvalidRequest(format!("cannot read {relative}: {e}")))?;

        let total_lines = content.lines().count();
        let start = args.get("start_line").and_then(Value::as_u64);
        let end = args.get("end_line").and_then(Value::as_u64);

        let body = match (start, end) {
            (None, None) => content,
            (start, end) => {
                let start = start.unwrap_or(1).max(1) as usize;
                let end = end.unwrap_or(total_lines as u64) as usize;
                if start > end {
                    return Err(ToolError::InvalidRequest(format!(
                        "start_line {start} is past end_line {end}"
                    )));
                }
                content
                    .lines()
                    .skip(start - 1)
                    .take(end - start + 1)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        Ok(json!({
            "type": "read_file_result",
            "path": relative,
            "content": body,
            "total_lines": total_lines,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tool_context;

    #[tokio::test]
    async fn reads_whole_file() {
        let (context, workspace) = tool_context().await;
        std::fs::write(workspace.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();

        let result = ReadFileTool
            .run(json!({"path": "a.txt"}), &context)
            .await
            .unwrap();
        assert_eq!(result["type"], "read_file_result");
        assert_eq!(result["content"], "one\ntwo\nthree\n");
        assert_eq!(result["total_lines"], 3);
    }

    #[tokio::test]
    async fn reads_line_range() {
        let (context, workspace) = tool_context().await;
        std::fs::write(workspace.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();

        let result = ReadFileTool
            .run(json!({"path": "a.txt", "start_line": 2, "end_line": 2}), &context)
            .await
            .unwrap();
        assert_eq!(result["content"], "two");
    }

    #[tokio::test]
    async fn missing_file_is_invalid_request() {
        let (context, _workspace) = tool_context().await;
        let err = ReadFileTool
            .run(json!({"path": "nope.txt"}), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn escaping_the_workspace_is_denied() {
        let (context, _workspace) = tool_context().await;
        let err = ReadFileTool
            .run(json!({"path": "../secrets.txt"}), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
    }
}
