//! Tool trait and per-turn execution context.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::events::AgentEvent;
use crate::project::Project;
use crate::rag::RAGIndex;
use crate::session::ToolResultStore;
use crate::versioning::VersioningEngine;

use super::restrictions::FileRestrictions;

/// Unified error type for all tools.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("versioning error: {0}")]
    Versioning(#[from] crate::versioning::VersioningError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    /// Stable machine-readable class name carried in error envelopes.
    pub fn error_type(&self) -> &'static str {
        match self {
            ToolError::InvalidRequest(_) => "invalid_request",
            ToolError::PermissionDenied(_) => "permission_denied",
            ToolError::Io(_) => "io",
            ToolError::Versioning(_) => "versioning",
            ToolError::Other(_) => "other",
        }
    }
}

/// Everything a tool invocation can reach, constructed once per turn by the
/// chat service and passed explicitly to every `run` call.
#[derive(Clone)]
pub struct ToolContext {
    pub dialog_id: String,
    pub workspace_root: PathBuf,
    pub restrictions: FileRestrictions,
    pub versioning: VersioningEngine,
    pub results: ToolResultStore,
    pub rag: Arc<dyn RAGIndex>,
    /// Live event sink for the current stream; tools rarely push directly,
    /// the executor emits `tool_call`/`file_edit` around them.
    pub events: mpsc::Sender<AgentEvent>,
    /// Project handle for tools that mutate dialog metadata.
    pub project: Option<Arc<Project>>,
}

impl ToolContext {
    /// Resolve a tool-supplied path against the workspace, enforcing the
    /// containment rules. Returns the absolute path and its normalized
    /// workspace-relative form.
    pub fn resolve_path(&self, raw: &str) -> Result<(PathBuf, String), ToolError> {
        let absolute = self.restrictions.resolve(raw)?;
        let relative = self.restrictions.relative(&absolute);
        Ok((absolute, relative))
    }
}

/// A unit of capability bound to the LLM.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the argument object; used both for LLM binding and for
    /// registry-side validation.
    fn args_schema(&self) -> Value;

    /// Ephemeral tools leave no trace: their results are never persisted to
    /// the result store, and their calls are redacted from history.
    fn ephemeral(&self) -> bool {
        false
    }

    /// Execute with validated arguments. The returned value's `type` field
    /// must begin with the tool family (e.g. `read_file_result`).
    async fn run(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError>;

    /// The LLM-facing definition derived from name/description/schema.
    fn definition(&self) -> codeforge::chat::Tool {
        codeforge::chat::Tool {
            tool_type: "function".to_string(),
            function: codeforge::chat::FunctionTool {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.args_schema(),
            },
        }
    }
}
