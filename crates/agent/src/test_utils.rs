//! Shared helpers for unit tests.

use async_trait::async_trait;
use codeforge::chat::{ChatMessage, ChunkStream, LLMClient, StreamChunk, Tool};
use codeforge::error::LLMError;
use futures::stream;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::events::AgentEvent;
use crate::rag::NoopRagIndex;
use crate::session::{DialogJournal, ToolResultStore};
use crate::tools::{FileRestrictions, ToolContext};
use crate::versioning::VersioningEngine;

/// A tool context over a throwaway workspace with an in-memory journal.
/// The returned `TempDir` owns the workspace; keep it alive for the test.
pub async fn tool_context() -> (ToolContext, TempDir) {
    let workspace = TempDir::new().unwrap();
    let (context, _rx) = tool_context_with_events(&workspace).await;
    (context, workspace)
}

/// Like [`tool_context`], but hands back the event receiver too.
pub async fn tool_context_with_events(
    workspace: &TempDir,
) -> (ToolContext, mpsc::Receiver<AgentEvent>) {
    let journal = DialogJournal::connect_in_memory().await.unwrap();
    let versioning = VersioningEngine::new(
        "test-dialog",
        workspace.path().join(".codeforge-test-repo"),
        workspace.path().to_path_buf(),
        journal.clone(),
    );
    let results = ToolResultStore::new(journal, "test-dialog", 4096);
    let (tx, rx) = mpsc::channel(64);
    let context = ToolContext {
        dialog_id: "test-dialog".to_string(),
        workspace_root: workspace.path().to_path_buf(),
        restrictions: FileRestrictions::new(workspace.path()),
        versioning,
        results,
        rag: Arc::new(NoopRagIndex),
        events: tx,
        project: None,
    };
    (context, rx)
}

/// An LLM client that replays scripted chunk sequences, one script per
/// `chat_stream` call.
pub struct ScriptedClient {
    model: String,
    scripts: Mutex<VecDeque<Vec<Result<StreamChunk, LLMError>>>>,
}

impl ScriptedClient {
    pub fn new(scripts: Vec<Vec<Result<StreamChunk, LLMError>>>) -> Self {
        Self {
            model: "scripted-model".to_string(),
            scripts: Mutex::new(scripts.into()),
        }
    }

    /// Remaining scripts not yet consumed.
    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMClient for ScriptedClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat_stream(
        &self,
        _messages: &[ChatMessage],
        _tools: Option<&[Tool]>,
    ) -> Result<ChunkStream, LLMError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LLMError::ProviderError("script exhausted".to_string()))?;
        Ok(Box::pin(stream::iter(script)))
    }
}

/// Convenience constructors for scripted chunks.
pub mod chunks {
    use codeforge::Usage;
    use codeforge::chat::{FinishReason, StreamChunk};
    use codeforge::error::LLMError;

    pub fn text(content: &str) -> Result<StreamChunk, LLMError> {
        Ok(StreamChunk::Text(content.to_string()))
    }

    pub fn reasoning(content: &str) -> Result<StreamChunk, LLMError> {
        Ok(StreamChunk::Reasoning(content.to_string()))
    }

    pub fn tool_delta(
        index: Option<usize>,
        id: Option<&str>,
        name: Option<&str>,
        args: Option<&str>,
    ) -> Result<StreamChunk, LLMError> {
        Ok(StreamChunk::ToolCallDelta {
            index,
            id: id.map(Into::into),
            name: name.map(Into::into),
            args: args.map(Into::into),
        })
    }

    pub fn usage(input: u32, output: u32) -> Result<StreamChunk, LLMError> {
        Ok(StreamChunk::Usage(Usage {
            input_tokens: input,
            output_tokens: output,
        }))
    }

    pub fn done() -> Result<StreamChunk, LLMError> {
        Ok(StreamChunk::Done {
            stop_reason: FinishReason::Stop,
        })
    }

    pub fn transport_error(message: &str) -> Result<StreamChunk, LLMError> {
        Err(LLMError::Network(message.to_string()))
    }
}
