//! The per-turn chat pipeline.
//!
//! Each turn: pre-turn checkpoint → persist the user message → best-effort
//! retrieval sync → context assembly → drive the executor while buffering
//! reasoning and forwarding events → persist the terminal answer → maybe
//! summarize → terminate the stream. Turns are serialized per dialog.

use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as TokioMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::instrument;

use codeforge::chat::LLMClient;

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::events::{AgentEvent, AgentEventKind};
use crate::executor::ToolExecutor;
use crate::project::{INSPECTOR_DIALOG, Project};
use crate::rag::RAGIndex;
use crate::session::{DialogJournal, Message, ToolResultStore};
use crate::summarize::{self, Summarizer};
use crate::tools::builtins::register_builtins;
use crate::tools::{FileRestrictions, ToolContext, ToolRegistry};
use crate::versioning::VersioningEngine;

/// What a finished turn reports back to non-streaming callers.
#[derive(Debug, Clone, Default)]
pub struct TurnSummary {
    pub content: String,
    pub checkpoint: Option<String>,
    pub session: Option<String>,
}

/// Orchestrates turns for every dialog of one project.
pub struct ChatService {
    project: Arc<Project>,
    config: AgentConfig,
    llm: Arc<dyn LLMClient>,
    rag: Arc<dyn RAGIndex>,
    journals: TokioMutex<HashMap<String, DialogJournal>>,
    turn_locks: TokioMutex<HashMap<String, Arc<TokioMutex<()>>>>,
    shutdown: watch::Receiver<bool>,
}

impl ChatService {
    pub fn new(
        project: Arc<Project>,
        config: AgentConfig,
        llm: Arc<dyn LLMClient>,
        rag: Arc<dyn RAGIndex>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            project,
            config,
            llm,
            rag,
            journals: TokioMutex::new(HashMap::new()),
            turn_locks: TokioMutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    /// Journal handle for a dialog, opened lazily and cached.
    pub async fn journal_for(&self, dialog_id: &str) -> AgentResult<DialogJournal> {
        let mut journals = self.journals.lock().await;
        if let Some(journal) = journals.get(dialog_id) {
            return Ok(journal.clone());
        }
        let journal = DialogJournal::connect(self.project.journal_path(dialog_id)).await?;
        journals.insert(dialog_id.to_string(), journal.clone());
        Ok(journal)
    }

    /// Versioning engine for a dialog, sharing its journal handle.
    pub async fn versioning_for(&self, dialog_id: &str) -> AgentResult<VersioningEngine> {
        let journal = self.journal_for(dialog_id).await?;
        Ok(VersioningEngine::new(
            dialog_id,
            self.project.repo_dir(dialog_id),
            self.project.root().to_path_buf(),
            journal,
        ))
    }

    /// Drop cached handles for a dialog (called on dialog deletion).
    pub async fn forget_dialog(&self, dialog_id: &str) {
        self.journals.lock().await.remove(dialog_id);
        self.turn_locks.lock().await.remove(dialog_id);
    }

    async fn turn_lock(&self, dialog_id: &str) -> Arc<TokioMutex<()>> {
        let mut locks = self.turn_locks.lock().await;
        locks
            .entry(dialog_id.to_string())
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone()
    }

    /// Start a turn. Returns the event stream and a handle resolving to the
    /// turn summary once the driver finishes.
    pub fn start_turn(
        self: &Arc<Self>,
        query: String,
        extra_context: Value,
        dialog_id: String,
    ) -> (mpsc::Receiver<AgentEvent>, JoinHandle<AgentResult<TurnSummary>>) {
        let (out_tx, out_rx) = mpsc::channel(256);
        let service = self.clone();

        let handle = tokio::spawn(async move {
            let result = service
                .run_turn(&query, extra_context, &dialog_id, out_tx.clone())
                .await;
            if let Err(ref e) = result {
                warn!("turn failed for dialog {}: {}", dialog_id, e);
                let _ = out_tx
                    .send(AgentEvent::new(
                        dialog_id.clone(),
                        AgentEventKind::Error {
                            error: e.to_string(),
                        },
                    ))
                    .await;
                let _ = out_tx
                    .send(AgentEvent::new(dialog_id.clone(), AgentEventKind::Done))
                    .await;
            }
            result
        });

        (out_rx, handle)
    }

    /// Streaming entry point: the caller frames the returned channel as SSE.
    pub fn stream_chat(
        self: &Arc<Self>,
        query: String,
        extra_context: Value,
        dialog_id: String,
    ) -> mpsc::Receiver<AgentEvent> {
        let (rx, handle) = self.start_turn(query, extra_context, dialog_id);
        // The stream is the product; the summary only needs error logging.
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                warn!("turn driver panicked: {}", e);
            }
        });
        rx
    }

    /// Non-streaming entry point: drain events, return the final answer.
    pub async fn chat(
        self: &Arc<Self>,
        query: String,
        extra_context: Value,
        dialog_id: String,
    ) -> AgentResult<TurnSummary> {
        let (mut rx, handle) = self.start_turn(query, extra_context, dialog_id);
        let mut stream_error: Option<String> = None;
        while let Some(event) = rx.recv().await {
            if let AgentEventKind::Error { error } = event.kind {
                stream_error = Some(error);
            }
        }
        let summary = handle
            .await
            .map_err(|e| AgentError::Internal(format!("turn driver panicked: {e}")))??;
        if let Some(error) = stream_error {
            return Err(AgentError::Internal(error));
        }
        Ok(summary)
    }

    #[instrument(name = "chat.run_turn", skip(self, query, extra_context, out_tx), fields(dialog_id = %dialog_id))]
    async fn run_turn(
        self: &Arc<Self>,
        query: &str,
        extra_context: Value,
        dialog_id: &str,
        out_tx: mpsc::Sender<AgentEvent>,
    ) -> AgentResult<TurnSummary> {
        let lock = self.turn_lock(dialog_id).await;
        let _turn_guard = lock.lock().await;

        if !self.project.dialog_exists(dialog_id) {
            return Err(AgentError::DialogNotFound {
                dialog_id: dialog_id.to_string(),
            });
        }

        let journal = self.journal_for(dialog_id).await?;
        let versioning = self.versioning_for(dialog_id).await?;
        let results = ToolResultStore::new(
            journal.clone(),
            dialog_id,
            self.config.results.preview_bytes,
        );

        // 1. Pre-turn checkpoint. A failure here degrades the turn (no
        // restore anchor) but never blocks it.
        let session = versioning.ensure_active_session().await?;
        let checkpoint_message = format!("Before user message: {}", truncate_label(query, 72));
        let checkpoint = match versioning.create_checkpoint(&checkpoint_message).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("pre-turn checkpoint failed for {}: {}", dialog_id, e);
                None
            }
        };

        // 2. Persist the user message with its turn metadata.
        journal
            .append(
                dialog_id,
                &Message::User {
                    content: query.to_string(),
                    checkpoint: checkpoint.clone(),
                    session: Some(session.name.clone()),
                },
            )
            .await?;
        if dialog_id != INSPECTOR_DIALOG {
            let session_name = session.name.clone();
            let _ = self.project.update_dialog(dialog_id, |meta| {
                meta.active_session = Some(session_name);
            });
        }

        // 3. Retrieval reconciliation; never fail the turn over it.
        match self.rag.sync().await {
            Ok(stats) => debug!(
                "rag sync for {}: checked={} reindexed={} removed={}",
                dialog_id, stats.checked, stats.reindexed, stats.removed
            ),
            Err(e) => warn!("rag sync failed for {}: {}", dialog_id, e),
        }

        // 4. Context assembly: persisted summary + tail, or full history.
        let meta = (dialog_id != INSPECTOR_DIALOG)
            .then(|| self.project.get_dialog(dialog_id).ok())
            .flatten();
        let summary = journal.latest_summary(dialog_id).await?;

        let mut conversation = vec![Message::System {
            content: build_system_prompt(
                self.project.root().display().to_string(),
                meta.as_ref().and_then(|m| m.title.as_deref()),
                &extra_context,
            ),
        }];
        let history = match &summary {
            Some(record) => {
                conversation.push(Message::System {
                    content: format!(
                        "Summary of the conversation so far:\n{}",
                        record.summary_text
                    ),
                });
                journal
                    .messages_after(dialog_id, record.cutoff_message_index)
                    .await?
            }
            None => journal.all_messages(dialog_id).await?,
        };
        conversation.extend(history.into_iter().map(|item| item.message));

        // 5. Streaming: announce the turn, then drive the executor.
        if out_tx
            .send(AgentEvent::new(
                dialog_id.to_string(),
                AgentEventKind::User {
                    content: query.to_string(),
                    checkpoint: checkpoint.clone(),
                    session: Some(session.name.clone()),
                },
            ))
            .await
            .is_err()
        {
            return Ok(TurnSummary::default());
        }

        let include_title_tool = meta.as_ref().map(|m| m.title.is_none()).unwrap_or(false);
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry, include_title_tool);

        let (exec_tx, mut exec_rx) = mpsc::channel(64);
        let tool_context = ToolContext {
            dialog_id: dialog_id.to_string(),
            workspace_root: self.project.root().to_path_buf(),
            restrictions: FileRestrictions::new(self.project.root()),
            versioning: versioning.clone(),
            results,
            rag: self.rag.clone(),
            events: exec_tx,
            project: Some(self.project.clone()),
        };
        let executor = ToolExecutor::new(
            self.llm.clone(),
            Arc::new(registry),
            journal.clone(),
            self.config.llm.max_consecutive_errors,
        );

        let exec_task =
            tokio::spawn(async move { executor.run_turn(conversation, &tool_context).await });

        let mut reasoning_buffer = String::new();
        let mut client_gone = false;
        let mut shutdown = self.shutdown.clone();
        // A dropped shutdown sender means no shutdown can ever arrive; stop
        // polling that branch instead of spinning on its error.
        let mut shutdown_live = true;

        loop {
            tokio::select! {
                maybe_event = exec_rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    match &event.kind {
                        AgentEventKind::Reasoning { content } => {
                            reasoning_buffer.push_str(content);
                        }
                        AgentEventKind::ReasoningEnd => {
                            self.flush_reasoning(&journal, dialog_id, &mut reasoning_buffer, None)
                                .await;
                        }
                        AgentEventKind::FileEdit { file, diff } => {
                            let anchor = journal
                                .last_assistant_index(dialog_id)
                                .await
                                .ok()
                                .flatten()
                                .unwrap_or(-1);
                            if let Err(e) = journal
                                .add_file_edit(
                                    dialog_id,
                                    file,
                                    diff.as_deref(),
                                    checkpoint.as_deref(),
                                    anchor,
                                )
                                .await
                            {
                                warn!("failed to record file edit: {}", e);
                            }
                        }
                        _ => {}
                    }
                    if !client_gone && out_tx.send(event).await.is_err() {
                        // Client hung up; keep draining so the executor can
                        // observe the closed sink and wind down.
                        client_gone = true;
                    }
                }
                changed = shutdown.changed(), if shutdown_live => {
                    if changed.is_err() {
                        shutdown_live = false;
                        continue;
                    }
                    if *shutdown.borrow() {
                        exec_task.abort();
                        self.flush_reasoning(&journal, dialog_id, &mut reasoning_buffer, Some(-1))
                            .await;
                        let _ = out_tx
                            .send(AgentEvent::new(
                                dialog_id.to_string(),
                                AgentEventKind::Error {
                                    error: "server is shutting down".to_string(),
                                },
                            ))
                            .await;
                        let _ = out_tx
                            .send(AgentEvent::new(dialog_id.to_string(), AgentEventKind::Done))
                            .await;
                        return Ok(TurnSummary {
                            content: String::new(),
                            checkpoint,
                            session: Some(session.name),
                        });
                    }
                }
            }
        }

        let outcome = exec_task
            .await
            .map_err(|e| AgentError::Internal(format!("executor task failed: {e}")))??;

        // Reasoning left open by an aborted stream stays unattached.
        self.flush_reasoning(&journal, dialog_id, &mut reasoning_buffer, Some(-1))
            .await;

        // 6. Persist the terminal answer. Intermediate tool-call messages
        // were already written by the executor. This happens on every path,
        // a client disconnect included: the answer is persisted, only its
        // delivery is suppressed.
        if !outcome.content.is_empty() {
            journal
                .append(dialog_id, &Message::assistant(outcome.content.clone()))
                .await?;
            self.project.touch_dialog(dialog_id);
        }

        if outcome.disconnected || client_gone {
            debug!("client disconnected mid-turn for dialog {}", dialog_id);
            return Ok(TurnSummary {
                content: outcome.content,
                checkpoint,
                session: Some(session.name),
            });
        }

        // 7. Summarization check.
        if outcome.terminal_error.is_none() {
            self.maybe_summarize(&journal, dialog_id, &out_tx).await;
        }

        if let Some(error) = &outcome.terminal_error {
            let _ = out_tx
                .send(AgentEvent::new(
                    dialog_id.to_string(),
                    AgentEventKind::Error {
                        error: error.clone(),
                    },
                ))
                .await;
        }
        let _ = out_tx
            .send(AgentEvent::new(dialog_id.to_string(), AgentEventKind::Done))
            .await;

        Ok(TurnSummary {
            content: outcome.content,
            checkpoint,
            session: Some(session.name),
        })
    }

    async fn flush_reasoning(
        &self,
        journal: &DialogJournal,
        dialog_id: &str,
        buffer: &mut String,
        forced_index: Option<i64>,
    ) {
        if buffer.is_empty() {
            return;
        }
        let message_index = match forced_index {
            Some(index) => index,
            None => journal.message_count(dialog_id).await.unwrap_or(0),
        };
        if let Err(e) = journal
            .add_reasoning(
                dialog_id,
                buffer,
                Some(self.llm.model_name()),
                message_index,
            )
            .await
        {
            warn!("failed to persist reasoning: {}", e);
        }
        buffer.clear();
    }

    async fn maybe_summarize(
        &self,
        journal: &DialogJournal,
        dialog_id: &str,
        out_tx: &mpsc::Sender<AgentEvent>,
    ) {
        let prompt_tokens = journal.last_prompt_tokens(dialog_id).await.ok().flatten();
        let decision = summarize::should_summarize(
            prompt_tokens,
            self.config.llm.summary_trigger_token_budget,
        );
        if !decision.should_summarize {
            return;
        }

        let _ = out_tx
            .send(AgentEvent::new(
                dialog_id.to_string(),
                AgentEventKind::SummaryStart,
            ))
            .await;
        let summarizer = Summarizer::new(self.llm.clone(), journal.clone());
        match summarizer
            .summarize(dialog_id, decision.keep_last)
            .await
        {
            Ok(record) => info!(
                "dialog {} summarized: {} messages folded, keep_last={}",
                dialog_id, record.summarized_count, record.keep_last
            ),
            Err(e) => warn!("summarization failed for {}: {}", dialog_id, e),
        }
        let _ = out_tx
            .send(AgentEvent::new(
                dialog_id.to_string(),
                AgentEventKind::SummaryEnd,
            ))
            .await;
    }
}

fn truncate_label(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}

fn build_system_prompt(root: String, title: Option<&str>, extra: &Value) -> String {
    let mut prompt = format!(
        "You are a coding assistant working on the project at {root}. \
         Use the available tools to inspect and modify files; keep answers grounded in the workspace."
    );
    if let Some(title) = title {
        prompt.push_str(&format!("\nThis conversation is titled: {title}."));
    } else {
        prompt.push_str(
            "\nThis conversation has no title yet; call set_dialog_title once you understand the task.",
        );
    }
    if extra.is_object() && !extra.as_object().map(|o| o.is_empty()).unwrap_or(true) {
        prompt.push_str(&format!("\nAdditional client context:\n{extra}"));
    }
    prompt
}
