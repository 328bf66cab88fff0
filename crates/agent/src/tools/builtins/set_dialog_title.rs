//! Ephemeral title setter.
//!
//! Offered to the model only while the dialog is untitled. The call is
//! redacted from persisted history and its result is never stored.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolError};

pub struct SetDialogTitleTool;

#[async_trait]
impl Tool for SetDialogTitleTool {
    fn name(&self) -> &str {
        "set_dialog_title"
    }

    fn description(&self) -> &str {
        "Set a short human-readable title for this conversation."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Concise dialog title (a few words)."
                }
            },
            "required": ["title"]
        })
    }

    fn ephemeral(&self) -> bool {
        true
    }

    async fn run(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let title = args
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ToolError::InvalidRequest("title is required".to_string()))?;

        let project = context.project.as_ref().ok_or_else(|| {
            ToolError::InvalidRequest("no project attached to this dialog".to_string())
        })?;
        project
            .update_dialog(&context.dialog_id, |meta| {
                meta.title = Some(title.to_string());
            })
            .map_err(|e| ToolError::Other(anyhow::anyhow!(e)))?;

        Ok(json!({
            "type": "set_dialog_title_result",
            "title": title,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;
    use crate::test_utils::tool_context;
    use std::sync::Arc;

    #[tokio::test]
    async fn sets_title_through_project() {
        let (mut context, workspace) = tool_context().await;
        let project = Arc::new(Project::open(workspace.path()).unwrap());
        let meta = project.create_dialog(None, true).unwrap();
        context.dialog_id = meta.id.clone();
        context.project = Some(project.clone());

        let result = SetDialogTitleTool
            .run(json!({"title": "Fix the parser"}), &context)
            .await
            .unwrap();
        assert_eq!(result["type"], "set_dialog_title_result");
        assert_eq!(
            project.get_dialog(&meta.id).unwrap().title.as_deref(),
            Some("Fix the parser")
        );
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let (context, _workspace) = tool_context().await;
        let err = SetDialogTitleTool
            .run(json!({"title": "  "}), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidRequest(_)));
    }
}
