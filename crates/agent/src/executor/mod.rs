//! The streaming agent loop.
//!
//! Drives the LLM until it produces a terminal text answer: accumulate one
//! iteration's chunks, execute the tool calls it declared, feed results back
//! into the conversation, repeat. Recoverable tool failures stay inside the
//! conversation; transport failures and the consecutive-error cap end the
//! turn.

mod accumulator;

pub use accumulator::{IterationAccumulator, PendingToolCall};

use codeforge::chat::{ChatMessage, LLMClient};
use log::{debug, warn};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::error::AgentResult;
use crate::events::{AgentEvent, AgentEventKind};
use crate::session::{DialogJournal, Message, ToolCallRecord, ToolResultStatus};
use crate::tools::{ToolContext, ToolRegistry};

/// Result classification for one tool invocation.
enum ToolRun {
    Ok(Value),
    /// The error envelope is fed back to the model; the stream stays silent.
    RecoverableError(Value),
}

/// How a turn ended.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Text content of the final iteration (the terminal answer).
    pub content: String,
    /// Set when the turn must end with `error` + `done`.
    pub terminal_error: Option<String>,
    /// The event sink went away (client disconnect); stop quietly.
    pub disconnected: bool,
}

/// The agent loop bound to one dialog.
pub struct ToolExecutor {
    llm: Arc<dyn LLMClient>,
    registry: Arc<ToolRegistry>,
    journal: DialogJournal,
    max_consecutive_errors: u32,
}

impl ToolExecutor {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        registry: Arc<ToolRegistry>,
        journal: DialogJournal,
        max_consecutive_errors: u32,
    ) -> Self {
        Self {
            llm,
            registry,
            journal,
            max_consecutive_errors,
        }
    }

    /// Run the loop to completion over `conversation`.
    ///
    /// Intermediate assistant messages that declare tool calls are persisted
    /// here (redacted of ephemeral calls); the terminal answer is returned to
    /// the caller for persistence.
    #[instrument(name = "executor.run_turn", skip_all, fields(dialog_id = %context.dialog_id))]
    pub async fn run_turn(
        &self,
        mut conversation: Vec<Message>,
        context: &ToolContext,
    ) -> AgentResult<TurnOutcome> {
        let tools = self.registry.definitions();
        let mut consecutive_errors: u32 = 0;

        loop {
            let chat_messages = render_conversation(&conversation);
            let mut stream = match self.llm.chat_stream(&chat_messages, Some(&tools)).await {
                Ok(stream) => stream,
                Err(e) => {
                    return Ok(TurnOutcome {
                        terminal_error: Some(e.to_string()),
                        ..Default::default()
                    });
                }
            };

            let mut acc = IterationAccumulator::new();
            let mut stream_error: Option<String> = None;
            {
                use futures::StreamExt;
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(chunk) => {
                            for kind in acc.feed(chunk) {
                                if !self.emit(context, kind).await {
                                    return Ok(TurnOutcome {
                                        disconnected: true,
                                        ..Default::default()
                                    });
                                }
                            }
                        }
                        Err(e) => {
                            stream_error = Some(e.to_string());
                            break;
                        }
                    }
                }
            }

            for kind in acc.closing_events() {
                if !self.emit(context, kind).await {
                    return Ok(TurnOutcome {
                        disconnected: true,
                        ..Default::default()
                    });
                }
            }

            if let Some(usage) = acc.usage {
                if let Err(e) = self
                    .journal
                    .record_usage(
                        &context.dialog_id,
                        self.llm.model_name(),
                        usage.input_tokens as u64,
                        usage.output_tokens as u64,
                    )
                    .await
                {
                    // Accounting must never destabilize the turn.
                    warn!("failed to record usage: {}", e);
                }
            }

            if let Some(message) = stream_error {
                return Ok(TurnOutcome {
                    content: acc.content,
                    terminal_error: Some(message),
                    disconnected: false,
                });
            }

            let (content, tool_calls, _usage) = acc.into_tool_calls();

            if tool_calls.is_empty() {
                // Terminal answer; the caller persists it.
                return Ok(TurnOutcome {
                    content,
                    terminal_error: None,
                    disconnected: false,
                });
            }

            // Build the assistant message declaring the calls. Args that fail
            // to parse are carried as raw strings so the record is complete.
            let records: Vec<(ToolCallRecord, Option<Value>)> = tool_calls
                .iter()
                .map(|call| {
                    let parsed = serde_json::from_str::<Value>(&call.args).ok();
                    let args_value = parsed
                        .clone()
                        .unwrap_or_else(|| Value::String(call.args.clone()));
                    // Providers occasionally stream a call without an id;
                    // history requires every call id to be non-empty.
                    let id = if call.id.is_empty() {
                        format!("call_{}", Uuid::new_v4())
                    } else {
                        call.id.clone()
                    };
                    (
                        ToolCallRecord {
                            id,
                            name: call.name.clone(),
                            args: args_value,
                        },
                        parsed,
                    )
                })
                .collect();

            let assistant = Message::Assistant {
                content: content.clone(),
                tool_calls: records.iter().map(|(r, _)| r.clone()).collect(),
            };
            conversation.push(assistant);

            // Persist a redacted copy: ephemeral calls never reach history.
            let persisted_calls: Vec<ToolCallRecord> = records
                .iter()
                .filter(|(r, _)| !self.registry.is_ephemeral(&r.name))
                .map(|(r, _)| r.clone())
                .collect();
            if !content.is_empty() || !persisted_calls.is_empty() {
                self.journal
                    .append(
                        &context.dialog_id,
                        &Message::Assistant {
                            content: content.clone(),
                            tool_calls: persisted_calls,
                        },
                    )
                    .await?;
            }

            // Execute in arrival order.
            for (record, parsed_args) in records {
                if !self
                    .emit(
                        context,
                        AgentEventKind::ToolCall {
                            name: record.name.clone(),
                            args: record.args.clone(),
                        },
                    )
                    .await
                {
                    return Ok(TurnOutcome {
                        disconnected: true,
                        ..Default::default()
                    });
                }

                let run = match parsed_args {
                    Some(args) => {
                        let result = self
                            .registry
                            .run_tool(&record.name, args, context)
                            .await;
                        if result.get("type").and_then(Value::as_str) == Some("tool_error") {
                            ToolRun::RecoverableError(result)
                        } else {
                            ToolRun::Ok(result)
                        }
                    }
                    None => ToolRun::RecoverableError(json!({
                        "type": "tool_error",
                        "code": "args_parse",
                        "error": format!(
                            "arguments for '{}' are not valid JSON",
                            record.name
                        ),
                    })),
                };

                let (result_value, is_error) = match &run {
                    ToolRun::Ok(value) => (value.clone(), false),
                    ToolRun::RecoverableError(value) => (value.clone(), true),
                };

                if !is_error
                    && let Some(event) = file_edit_event(&result_value)
                    && !self.emit(context, event).await
                {
                    return Ok(TurnOutcome {
                        disconnected: true,
                        ..Default::default()
                    });
                }

                let status = if is_error {
                    ToolResultStatus::Error
                } else {
                    ToolResultStatus::Success
                };
                let ephemeral = self.registry.is_ephemeral(&record.name);

                let envelope = if ephemeral {
                    context.results.inline_envelope(
                        &record.id,
                        &record.name,
                        status,
                        &result_value,
                    )
                } else {
                    let error_text = is_error
                        .then(|| {
                            result_value
                                .get("error")
                                .and_then(Value::as_str)
                                .unwrap_or("tool failed")
                                .to_string()
                        });
                    let result_ref = context
                        .results
                        .store_result(
                            &record.id,
                            &record.name,
                            &record.args,
                            &result_value,
                            error_text.as_deref(),
                        )
                        .await?;
                    context.results.referenced_envelope(
                        &record.id,
                        &record.name,
                        status,
                        &result_value,
                        result_ref,
                    )
                };

                // The conversation keeps the inline copy for the model's
                // next turn; history only ever sees the slim form.
                conversation.push(Message::ToolResult {
                    tool_call_id: record.id.clone(),
                    envelope: envelope.clone(),
                });
                if !ephemeral {
                    self.journal
                        .append(
                            &context.dialog_id,
                            &Message::ToolResult {
                                tool_call_id: record.id.clone(),
                                envelope: envelope.slim(),
                            },
                        )
                        .await?;
                }

                if is_error {
                    consecutive_errors += 1;
                    debug!(
                        "recoverable tool error ({} consecutive): {}",
                        consecutive_errors, record.name
                    );
                    if consecutive_errors >= self.max_consecutive_errors {
                        return Ok(TurnOutcome {
                            content: String::new(),
                            terminal_error: Some(format!(
                                "maximum consecutive errors reached ({})",
                                self.max_consecutive_errors
                            )),
                            disconnected: false,
                        });
                    }
                } else {
                    consecutive_errors = 0;
                }
            }
        }
    }

    async fn emit(&self, context: &ToolContext, kind: AgentEventKind) -> bool {
        context
            .events
            .send(AgentEvent::new(context.dialog_id.clone(), kind))
            .await
            .is_ok()
    }
}

/// `file_edit` event for results of file-mutating tool families.
fn file_edit_event(result: &Value) -> Option<AgentEventKind> {
    let result_type = result.get("type").and_then(Value::as_str)?;
    if !matches!(
        result_type,
        "write_file_result" | "delete_file_result" | "replace_file_result"
    ) {
        return None;
    }
    let file = result
        .get("path")
        .or_else(|| result.get("file"))
        .and_then(Value::as_str)?;
    Some(AgentEventKind::FileEdit {
        file: file.to_string(),
        diff: result
            .get("diff")
            .and_then(Value::as_str)
            .map(|d| d.to_string()),
    })
}

/// Render the domain conversation into LLM chat messages.
pub fn render_conversation(conversation: &[Message]) -> Vec<ChatMessage> {
    use codeforge::{FunctionCall, ToolCall};

    conversation
        .iter()
        .map(|message| match message {
            Message::User { content, .. } => ChatMessage::user(content.clone()),
            Message::System { content } => ChatMessage::system(content.clone()),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                if tool_calls.is_empty() {
                    ChatMessage::assistant(content.clone())
                } else {
                    let calls = tool_calls
                        .iter()
                        .map(|record| ToolCall {
                            id: record.id.clone(),
                            call_type: "function".to_string(),
                            function: FunctionCall {
                                name: record.name.clone(),
                                arguments: record.args.to_string(),
                            },
                        })
                        .collect();
                    ChatMessage::assistant_tool_use(content.clone(), calls)
                }
            }
            Message::ToolResult {
                tool_call_id,
                envelope,
            } => {
                // Inline content when present; the slim reference shape
                // otherwise (replayed history).
                let payload = envelope
                    .inline_result
                    .clone()
                    .unwrap_or_else(|| {
                        json!({
                            "result_ref": envelope.result_ref,
                            "metadata": envelope.metadata,
                        })
                    });
                ChatMessage::tool_result(vec![ToolCall {
                    id: tool_call_id.clone(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: envelope.tool_name.clone(),
                        arguments: payload.to_string(),
                    },
                }])
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::chunks::*;
    use crate::test_utils::{ScriptedClient, tool_context_with_events};
    use crate::tools::builtins::register_builtins;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    async fn setup(
        scripts: Vec<Vec<Result<codeforge::chat::StreamChunk, codeforge::LLMError>>>,
        max_errors: u32,
    ) -> (
        ToolExecutor,
        ToolContext,
        mpsc::Receiver<AgentEvent>,
        TempDir,
    ) {
        let workspace = TempDir::new().unwrap();
        let (context, rx) = tool_context_with_events(&workspace).await;
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry, false);
        let journal = DialogJournal::connect_in_memory().await.unwrap();
        // Reuse the context's journal-backed result store but give the
        // executor its own journal for history rows.
        let executor = ToolExecutor::new(
            Arc::new(ScriptedClient::new(scripts)),
            Arc::new(registry),
            journal,
            max_errors,
        );
        (executor, context, rx, workspace)
    }

    fn drain(rx: &mut mpsc::Receiver<AgentEvent>) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.event_name().to_string());
        }
        names
    }

    #[tokio::test]
    async fn text_only_turn_ends_after_one_iteration() {
        let (executor, context, mut rx, _ws) = setup(
            vec![vec![text("Hello"), text(" world"), usage(12, 3), done()]],
            10,
        )
        .await;

        let outcome = executor
            .run_turn(vec![Message::user("hi")], &context)
            .await
            .unwrap();

        assert_eq!(outcome.content, "Hello world");
        assert!(outcome.terminal_error.is_none());
        assert_eq!(drain(&mut rx), vec!["chat_start", "chat", "chat", "chat_end"]);
    }

    #[tokio::test]
    async fn reasoning_events_are_paired() {
        let (executor, context, mut rx, _ws) = setup(
            vec![vec![reasoning("hmm"), text("answer"), done()]],
            10,
        )
        .await;

        executor
            .run_turn(vec![Message::user("q")], &context)
            .await
            .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                "reasoning_start",
                "reasoning",
                "chat_start",
                "chat",
                "reasoning_end",
                "chat_end"
            ]
        );
    }

    #[tokio::test]
    async fn tool_call_turn_executes_and_loops() {
        let (executor, context, mut rx, workspace) = setup(
            vec![
                vec![
                    tool_delta(Some(0), Some("c1"), Some("write_file"), None),
                    tool_delta(
                        Some(0),
                        None,
                        None,
                        Some(r#"{"path":"out.txt","content":"made it"}"#),
                    ),
                    done(),
                ],
                vec![text("File written."), done()],
            ],
            10,
        )
        .await;

        let outcome = executor
            .run_turn(vec![Message::user("write a file")], &context)
            .await
            .unwrap();

        assert_eq!(outcome.content, "File written.");
        assert_eq!(
            std::fs::read_to_string(workspace.path().join("out.txt")).unwrap(),
            "made it"
        );
        let events = drain(&mut rx);
        assert!(events.contains(&"tool_call".to_string()));
        assert!(events.contains(&"file_edit".to_string()));
        // No error events for a clean run.
        assert!(!events.contains(&"error".to_string()));

        // The stored result is retrievable by call id.
        let stored = context.results.get("c1").await.unwrap();
        assert_eq!(stored.tool_name, "write_file");
    }

    #[tokio::test]
    async fn transport_error_is_terminal() {
        let (executor, context, mut rx, _ws) = setup(
            vec![vec![text("partial"), transport_error("connection reset")]],
            10,
        )
        .await;

        let outcome = executor
            .run_turn(vec![Message::user("q")], &context)
            .await
            .unwrap();

        assert_eq!(outcome.terminal_error.as_deref(), Some("network error: connection reset"));
        // Open boundaries are closed before the turn ends.
        let events = drain(&mut rx);
        assert_eq!(events.last().map(String::as_str), Some("chat_end"));
    }

    #[tokio::test]
    async fn malformed_args_hit_consecutive_error_cap() {
        // S3: the model keeps emitting unparseable tool arguments.
        let bad_iteration = || {
            vec![
                tool_delta(Some(0), Some("c"), Some("write_file"), Some("{not json")),
                done(),
            ]
        };
        let (executor, context, mut rx, _ws) = setup(
            vec![bad_iteration(), bad_iteration(), bad_iteration(), bad_iteration()],
            3,
        )
        .await;

        let outcome = executor
            .run_turn(vec![Message::user("loop")], &context)
            .await
            .unwrap();

        let error = outcome.terminal_error.unwrap();
        assert!(error.contains("maximum consecutive errors"));

        let events = drain(&mut rx);
        assert_eq!(
            events.iter().filter(|e| *e == "tool_call").count(),
            3,
            "each failing iteration still announces its tool call"
        );
        assert!(!events.contains(&"error".to_string()),
            "recoverable failures stay silent on the stream");
    }

    #[tokio::test]
    async fn successful_call_resets_error_counter() {
        let bad = || {
            vec![
                tool_delta(Some(0), Some("cb"), Some("write_file"), Some("{nope")),
                done(),
            ]
        };
        let good = vec![
            tool_delta(
                Some(0),
                Some("cg"),
                Some("write_file"),
                Some(r#"{"path":"ok.txt","content":"fine"}"#),
            ),
            done(),
        ];
        // bad, bad, good, bad, bad, final: never three bad in a row.
        let (executor, context, _rx, _ws) = setup(
            vec![bad(), bad(), good, bad(), bad(), vec![text("done"), done()]],
            3,
        )
        .await;

        let outcome = executor
            .run_turn(vec![Message::user("q")], &context)
            .await
            .unwrap();
        assert!(outcome.terminal_error.is_none());
        assert_eq!(outcome.content, "done");
    }

    #[tokio::test]
    async fn usage_is_recorded_per_iteration() {
        let (executor, context, _rx, _ws) = setup(
            vec![vec![text("hi"), usage(200, 10), done()]],
            10,
        )
        .await;

        executor
            .run_turn(vec![Message::user("q")], &context)
            .await
            .unwrap();

        let totals = executor
            .journal
            .usage_totals(&context.dialog_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(totals.prompt_tokens, 200);
        assert_eq!(totals.completion_tokens, 10);
        assert_eq!(totals.model, "scripted-model");
    }

    #[tokio::test]
    async fn assistant_tool_message_is_persisted_before_execution() {
        let (executor, context, _rx, _ws) = setup(
            vec![
                vec![
                    text("let me check"),
                    tool_delta(
                        Some(0),
                        Some("c1"),
                        Some("read_file"),
                        Some(r#"{"path":"missing.txt"}"#),
                    ),
                    done(),
                ],
                vec![text("it is missing"), done()],
            ],
            10,
        )
        .await;

        executor
            .run_turn(vec![Message::user("check a file")], &context)
            .await
            .unwrap();

        let messages = executor
            .journal
            .all_messages(&context.dialog_id)
            .await
            .unwrap();
        // Assistant declaration + slim tool result.
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0].message,
            Message::Assistant { content, tool_calls } if content == "let me check" && tool_calls.len() == 1
        ));
        match &messages[1].message {
            Message::ToolResult { envelope, .. } => {
                assert!(!envelope.has_inline_result);
                assert!(envelope.inline_result.is_none());
                assert!(envelope.result_ref.is_some());
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[test]
    fn render_conversation_shapes() {
        let conversation = vec![
            Message::System {
                content: "be helpful".into(),
            },
            Message::user("hello"),
            Message::Assistant {
                content: "calling".into(),
                tool_calls: vec![ToolCallRecord {
                    id: "c1".into(),
                    name: "read_file".into(),
                    args: json!({"path": "a.rs"}),
                }],
            },
        ];
        let rendered = render_conversation(&conversation);
        assert_eq!(rendered.len(), 3);
        assert!(matches!(
            rendered[2].message_type,
            codeforge::chat::MessageType::ToolUse(ref calls) if calls[0].function.name == "read_file"
        ));
    }
}
