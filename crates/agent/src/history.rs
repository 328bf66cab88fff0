//! History reconstruction: a paginated, chronological event stream rebuilt
//! from the message log plus the reasoning and file-edit side tables.
//!
//! Events attached to one message render in a fixed priority order:
//! reasoning first, then the message itself, then its tool calls, then its
//! file edits. Pagination runs over the *visible* cursor, because that is
//! what clients count.

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::AgentResult;
use crate::session::{DialogJournal, Message};

/// One reconstructed event. `idx` is present only on `user`/`chat` events.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idx: Option<usize>,
    #[serde(flatten)]
    pub data: Value,
}

/// One page of reconstructed history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub events: Vec<HistoryEvent>,
    pub total_events: usize,
    pub has_more: bool,
    pub first_idx: usize,
    pub last_idx: usize,
}

/// Priority classes within one message index.
const PRIORITY_REASONING: u8 = 0;
const PRIORITY_MESSAGE: u8 = 1;
const PRIORITY_TOOL_CALL: u8 = 2;
const PRIORITY_FILE_EDIT: u8 = 3;

/// Rebuild a page of the dialog's event stream.
///
/// `before` is a visible-message cursor: when set, the page covers visible
/// messages with `idx < before`, capped at `limit`; otherwise the tail
/// `limit` messages. `has_more` holds exactly when the page does not start
/// at the beginning.
pub async fn get_history(
    journal: &DialogJournal,
    dialog_id: &str,
    limit: usize,
    before: Option<usize>,
) -> AgentResult<HistoryPage> {
    let total_visible = journal.count_visible(dialog_id).await?;

    let (start, end) = match before {
        Some(before) => {
            let bounded = before.min(total_visible);
            (bounded.saturating_sub(limit), Some(bounded))
        }
        None => (total_visible.saturating_sub(limit), None),
    };

    let slice = journal.slice(dialog_id, start, end).await?;
    let indices: Vec<i64> = slice.iter().map(|item| item.index).collect();

    let reasoning = journal.reasoning_for_indices(dialog_id, &indices).await?;
    let edits = journal.edits_for_indices(dialog_id, &indices).await?;
    let orphan_reasoning = if before.is_none() {
        journal.orphan_reasoning(dialog_id).await?
    } else {
        Vec::new()
    };

    // (message_index, priority, sub_index, event)
    let mut keyed: Vec<(i64, u8, usize, HistoryEvent)> = Vec::new();
    let mut visible_cursor = start;
    let mut visible_in_slice = 0usize;

    for item in &slice {
        let message_index = item.index;

        for (sub, block) in reasoning
            .iter()
            .filter(|r| r.message_index == message_index)
            .enumerate()
        {
            keyed.push((
                message_index,
                PRIORITY_REASONING,
                sub,
                HistoryEvent {
                    event_type: "reasoning".to_string(),
                    idx: None,
                    data: json!({ "content": block.content }),
                },
            ));
        }

        if item.message.is_visible() {
            let idx = visible_cursor;
            visible_cursor += 1;
            visible_in_slice += 1;
            if let Some(event) = message_event(&item.message, idx) {
                keyed.push((message_index, PRIORITY_MESSAGE, 0, event));
            }
        }

        for (sub, call) in item.message.tool_calls().iter().enumerate() {
            keyed.push((
                message_index,
                PRIORITY_TOOL_CALL,
                sub,
                HistoryEvent {
                    event_type: "tool_call".to_string(),
                    idx: None,
                    data: json!({ "name": call.name, "args": call.args }),
                },
            ));
        }

        for (sub, edit) in edits
            .iter()
            .filter(|e| e.message_index == message_index)
            .enumerate()
        {
            keyed.push((
                message_index,
                PRIORITY_FILE_EDIT,
                sub,
                HistoryEvent {
                    event_type: "file_edit".to_string(),
                    idx: None,
                    data: json!({ "file": edit.file, "diff": edit.diff }),
                },
            ));
        }
    }

    // Orphan reasoning renders past everything in the slice.
    let synthetic_index = slice.iter().map(|i| i.index).max().unwrap_or(-1) + 1;
    for (sub, block) in orphan_reasoning.iter().enumerate() {
        keyed.push((
            synthetic_index,
            PRIORITY_REASONING,
            sub,
            HistoryEvent {
                event_type: "reasoning".to_string(),
                idx: None,
                data: json!({ "content": block.content }),
            },
        ));
    }

    keyed.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
    let events: Vec<HistoryEvent> = keyed.into_iter().map(|(_, _, _, e)| e).collect();

    let stats = journal.message_stats(dialog_id).await?;
    let total_events = stats.visible
        + stats.tool_calls
        + journal.count_reasoning(dialog_id).await?
        + journal.count_file_edits(dialog_id).await?;

    let last_idx = if visible_in_slice > 0 {
        start + visible_in_slice - 1
    } else {
        start
    };

    Ok(HistoryPage {
        events,
        total_events,
        has_more: start > 0,
        first_idx: start,
        last_idx,
    })
}

fn message_event(message: &Message, idx: usize) -> Option<HistoryEvent> {
    match message {
        Message::User {
            content,
            checkpoint,
            session,
        } => Some(HistoryEvent {
            event_type: "user".to_string(),
            idx: Some(idx),
            data: json!({
                "content": content,
                "checkpoint": checkpoint,
                "session": session,
            }),
        }),
        Message::Assistant { content, .. } if !content.is_empty() => Some(HistoryEvent {
            event_type: "chat".to_string(),
            idx: Some(idx),
            data: json!({ "content": content }),
        }),
        Message::System { content } => Some(HistoryEvent {
            event_type: "system".to_string(),
            idx: None,
            data: json!({ "content": content }),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{
        EnvelopeMetadata, ToolCallRecord, ToolResultEnvelope, ToolResultStatus,
    };
    use serde_json::json;

    async fn journal() -> DialogJournal {
        DialogJournal::connect_in_memory().await.unwrap()
    }

    fn assistant_with_call(content: &str, call_id: &str) -> Message {
        Message::Assistant {
            content: content.to_string(),
            tool_calls: vec![ToolCallRecord {
                id: call_id.into(),
                name: "read_file".into(),
                args: json!({"path": "a.rs"}),
            }],
        }
    }

    fn tool_result(call_id: &str) -> Message {
        Message::ToolResult {
            tool_call_id: call_id.into(),
            envelope: ToolResultEnvelope {
                tool_call_id: call_id.into(),
                tool_name: "read_file".into(),
                status: ToolResultStatus::Success,
                metadata: EnvelopeMetadata::default(),
                result_ref: None,
                inline_result: None,
                has_inline_result: false,
            },
        }
    }

    /// The S4 shape: five visible messages, reasoning on index 1, a tool
    /// call on index 1.
    async fn seeded() -> (DialogJournal, String) {
        let journal = journal().await;
        let d = "d".to_string();
        journal.append(&d, &Message::user("q0")).await.unwrap(); // ord 0, idx 0
        journal
            .append(&d, &assistant_with_call("a1", "c1"))
            .await
            .unwrap(); // ord 1, idx 1
        journal.append(&d, &Message::user("q2")).await.unwrap(); // ord 2, idx 2
        journal.append(&d, &Message::assistant("a3")).await.unwrap(); // ord 3, idx 3
        journal.append(&d, &Message::user("q4")).await.unwrap(); // ord 4, idx 4
        journal
            .add_reasoning(&d, "thinking about a1", None, 1)
            .await
            .unwrap();
        (journal, d)
    }

    #[tokio::test]
    async fn tail_page_renders_in_priority_order() {
        let (journal, d) = seeded().await;
        let page = get_history(&journal, &d, 10, None).await.unwrap();

        let shapes: Vec<(String, Option<usize>)> = page
            .events
            .iter()
            .map(|e| (e.event_type.clone(), e.idx))
            .collect();
        assert_eq!(
            shapes,
            vec![
                ("user".to_string(), Some(0)),
                ("reasoning".to_string(), None),
                ("chat".to_string(), Some(1)),
                ("tool_call".to_string(), None),
                ("user".to_string(), Some(2)),
                ("chat".to_string(), Some(3)),
                ("user".to_string(), Some(4)),
            ]
        );
        // 5 visible + 1 tool call + 1 reasoning.
        assert_eq!(page.total_events, 7);
        assert!(!page.has_more);
        assert_eq!(page.first_idx, 0);
        assert_eq!(page.last_idx, 4);
    }

    #[tokio::test]
    async fn before_cursor_pages_backwards() {
        let (journal, d) = seeded().await;
        let page = get_history(&journal, &d, 10, Some(2)).await.unwrap();

        // Only events attached to visible messages with idx < 2, including
        // the reasoning and tool call that ride on idx 1.
        let types: Vec<&str> = page.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["user", "reasoning", "chat", "tool_call"]);
        assert!(page.events.iter().all(|e| e.idx.is_none_or(|i| i < 2)));
        assert!(!page.has_more);
        assert_eq!(page.first_idx, 0);
        assert_eq!(page.last_idx, 1);
    }

    #[tokio::test]
    async fn limited_page_reports_has_more() {
        let (journal, d) = seeded().await;
        let page = get_history(&journal, &d, 2, None).await.unwrap();

        assert!(page.has_more);
        assert_eq!(page.first_idx, 3);
        assert_eq!(page.last_idx, 4);
        let types: Vec<&str> = page.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["chat", "user"]);
    }

    #[tokio::test]
    async fn pagination_round_trip_covers_all_visible_messages() {
        let (journal, d) = seeded().await;
        let tail = get_history(&journal, &d, 2, None).await.unwrap();
        let middle = get_history(&journal, &d, 2, Some(tail.first_idx)).await.unwrap();
        let first = get_history(&journal, &d, 2, Some(middle.first_idx)).await.unwrap();

        let mut indices: Vec<usize> = Vec::new();
        for page in [&first, &middle, &tail] {
            indices.extend(page.events.iter().filter_map(|e| e.idx));
        }
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(!first.has_more);
    }

    #[tokio::test]
    async fn carriers_contribute_tool_calls_without_idx() {
        let journal = journal().await;
        let d = "d";
        journal.append(d, &Message::user("q")).await.unwrap();
        journal
            .append(d, &assistant_with_call("", "c1"))
            .await
            .unwrap(); // carrier
        journal.append(d, &tool_result("c1")).await.unwrap();
        journal.append(d, &Message::assistant("done")).await.unwrap();

        let page = get_history(&journal, d, 10, None).await.unwrap();
        let types: Vec<&str> = page.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["user", "tool_call", "chat"]);
        // Visible messages get 0 and 1; the carrier consumes no idx.
        assert_eq!(page.events[2].idx, Some(1));
        // 2 visible + 1 tool call.
        assert_eq!(page.total_events, 3);
    }

    #[tokio::test]
    async fn orphan_reasoning_appends_on_tail_loads_only() {
        let (journal, d) = seeded().await;
        journal.add_reasoning(&d, "unattached", None, -1).await.unwrap();

        let tail = get_history(&journal, &d, 10, None).await.unwrap();
        assert_eq!(
            tail.events.last().map(|e| e.event_type.as_str()),
            Some("reasoning")
        );

        let paged = get_history(&journal, &d, 10, Some(2)).await.unwrap();
        assert!(
            paged.events.iter().all(|e| e.data["content"] != "unattached"),
            "orphans only belong to tail loads"
        );
    }

    #[tokio::test]
    async fn file_edits_attach_after_tool_calls() {
        let (journal, d) = seeded().await;
        journal
            .add_file_edit(&d, "src/main.rs", Some("-a\n+b"), None, 1)
            .await
            .unwrap();

        let page = get_history(&journal, &d, 10, None).await.unwrap();
        let types: Vec<&str> = page.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["user", "reasoning", "chat", "tool_call", "file_edit", "user", "chat", "user"]
        );
        assert_eq!(page.total_events, 8);
    }

    #[tokio::test]
    async fn empty_dialog_yields_empty_page() {
        let journal = journal().await;
        let page = get_history(&journal, "empty", 20, None).await.unwrap();
        assert!(page.events.is_empty());
        assert_eq!(page.total_events, 0);
        assert!(!page.has_more);
    }
}
