//! Shared fixtures for end-to-end tests: a scripted LLM client and a fully
//! assembled chat service over a throwaway project.

use async_trait::async_trait;
use codeforge::chat::{ChatMessage, ChunkStream, FinishReason, LLMClient, StreamChunk, Tool};
use codeforge::error::LLMError;
use futures::stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use codeforge_agent::chat::ChatService;
use codeforge_agent::config::AgentConfig;
use codeforge_agent::events::AgentEvent;
use codeforge_agent::project::Project;
use codeforge_agent::rag::NoopRagIndex;

pub type Script = Vec<Result<StreamChunk, LLMError>>;

/// Replays one scripted chunk sequence per `chat_stream` call.
pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
}

impl ScriptedClient {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
        }
    }
}

#[async_trait]
impl LLMClient for ScriptedClient {
    fn model_name(&self) -> &str {
        "scripted-model"
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

pub fn text(content: &str) -> Result<StreamChunk, LLMError> {
    Ok(StreamChunk::Text(content.to_string()))
}

pub fn reasoning(content: &str) -> Result<StreamChunk, LLMError> {
    Ok(StreamChunk::Reasoning(content.to_string()))
}

pub fn tool_call(id: &str, name: &str, args: &str) -> Result<StreamChunk, LLMError> {
    Ok(StreamChunk::ToolCallDelta {
        index: Some(0),
        id: Some(id.to_string()),
        name: Some(name.to_string()),
        args: Some(args.to_string()),
    })
}

pub fn done() -> Result<StreamChunk, LLMError> {
    Ok(StreamChunk::Done {
        stop_reason: FinishReason::Stop,
    })
}

/// A project + chat service wired to a scripted model.
pub struct Fixture {
    pub workspace: TempDir,
    pub project: Arc<Project>,
    pub service: Arc<ChatService>,
    pub dialog_id: String,
}

pub async fn fixture_with(scripts: Vec<Script>, title: Option<&str>) -> Fixture {
    let workspace = TempDir::new().unwrap();
    let project = Arc::new(Project::open(workspace.path()).unwrap());
    let dialog = project
        .create_dialog(title.map(|t| t.to_string()), true)
        .unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let service = Arc::new(ChatService::new(
        project.clone(),
        AgentConfig::default(),
        Arc::new(ScriptedClient::new(scripts)),
        Arc::new(NoopRagIndex),
        shutdown_rx,
    ));
    Fixture {
        workspace,
        project,
        service,
        dialog_id: dialog.id,
    }
}

/// Collect a turn's events until `done` (inclusive).
pub async fn run_turn(fixture: &Fixture, query: &str) -> Vec<AgentEvent> {
    let rx = fixture
        .service
        .stream_chat(query.to_string(), serde_json::Value::Null, fixture.dialog_id.clone());
    collect(rx).await
}

pub async fn collect(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

pub fn names(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_name()).collect()
}

/// Assert the stream invariants every turn must satisfy: `user` first,
/// exactly one `done` last, matched boundary pairs, `error` (if any)
/// immediately before `done`.
pub fn assert_stream_invariants(events: &[AgentEvent]) {
    let names = names(events);
    assert_eq!(names.first().copied(), Some("user"), "first event: {names:?}");
    assert_eq!(names.last().copied(), Some("done"), "last event: {names:?}");
    assert_eq!(
        names.iter().filter(|n| **n == "done").count(),
        1,
        "exactly one done: {names:?}"
    );

    for (open, close) in [("chat_start", "chat_end"), ("reasoning_start", "reasoning_end")] {
        let mut depth: i32 = 0;
        for name in &names {
            if *name == open {
                depth += 1;
                assert!(depth <= 1, "nested {open} in {names:?}");
            } else if *name == close {
                depth -= 1;
                assert!(depth >= 0, "unmatched {close} in {names:?}");
            }
        }
        assert_eq!(depth, 0, "unclosed {open} in {names:?}");
    }

    if let Some(pos) = names.iter().position(|n| *n == "error") {
        assert_eq!(
            names.get(pos + 1).copied(),
            Some("done"),
            "error must immediately precede done: {names:?}"
        );
    }
}
