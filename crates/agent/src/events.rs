//! The closed set of stream events the assistant emits.
//!
//! These shapes are part of the external contract: adding a variant is a
//! compatible change, renaming one is not. Pairing and ordering rules
//! (`chat_start`/`chat_end`, `error` immediately before `done`) are enforced
//! by the executor and the chat service, not here.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One event on a dialog's stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialog_id: Option<String>,
    #[serde(flatten)]
    pub kind: AgentEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEventKind {
    /// Echo of the user turn, carrying the pre-turn checkpoint and session.
    User {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        checkpoint: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    ChatStart,
    Chat {
        content: String,
    },
    ChatEnd,
    ReasoningStart,
    Reasoning {
        content: String,
    },
    ReasoningEnd,
    SummaryStart,
    SummaryEnd,
    ToolCall {
        name: String,
        args: Value,
    },
    FileEdit {
        file: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
    },
    Error {
        error: String,
    },
    Done,
}

impl AgentEvent {
    pub fn new(dialog_id: impl Into<String>, kind: AgentEventKind) -> Self {
        Self {
            dialog_id: Some(dialog_id.into()),
            kind,
        }
    }

    /// The wire name of this event, used as the SSE `event:` field.
    pub fn event_name(&self) -> &'static str {
        match self.kind {
            AgentEventKind::User { .. } => "user",
            AgentEventKind::ChatStart => "chat_start",
            AgentEventKind::Chat { .. } => "chat",
            AgentEventKind::ChatEnd => "chat_end",
            AgentEventKind::ReasoningStart => "reasoning_start",
            AgentEventKind::Reasoning { .. } => "reasoning",
            AgentEventKind::ReasoningEnd => "reasoning_end",
            AgentEventKind::SummaryStart => "summary_start",
            AgentEventKind::SummaryEnd => "summary_end",
            AgentEventKind::ToolCall { .. } => "tool_call",
            AgentEventKind::FileEdit { .. } => "file_edit",
            AgentEventKind::Error { .. } => "error",
            AgentEventKind::Done => "done",
        }
    }

    /// Serialize into the `{event, data}` frame the SSE layer writes out.
    pub fn to_sse(&self) -> SseFrame {
        let mut data = match serde_json::to_value(&self.kind) {
            Ok(Value::Object(mut map)) => {
                map.remove("type");
                Value::Object(map)
            }
            Ok(other) => other,
            Err(_) => json!({}),
        };
        if let AgentEventKind::Done = self.kind {
            data = json!({ "done": true });
        }
        if let Some(ref dialog_id) = self.dialog_id
            && let Value::Object(ref mut map) = data
        {
            map.insert("dialog_id".to_string(), json!(dialog_id));
        }
        SseFrame {
            event: self.event_name().to_string(),
            data,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, AgentEventKind::Done)
    }
}

/// A rendered SSE frame: `event:` name plus JSON `data:` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_event_carries_checkpoint_and_session() {
        let event = AgentEvent::new(
            "d-1",
            AgentEventKind::User {
                content: "hello".into(),
                checkpoint: Some("abc".into()),
                session: Some("session_1".into()),
            },
        );
        let frame = event.to_sse();
        assert_eq!(frame.event, "user");
        assert_eq!(frame.data["content"], "hello");
        assert_eq!(frame.data["checkpoint"], "abc");
        assert_eq!(frame.data["session"], "session_1");
        assert_eq!(frame.data["dialog_id"], "d-1");
    }

    #[test]
    fn done_event_renders_done_true() {
        let frame = AgentEvent::new("d-1", AgentEventKind::Done).to_sse();
        assert_eq!(frame.event, "done");
        assert_eq!(frame.data["done"], true);
    }

    #[test]
    fn boundary_events_have_empty_payload() {
        let frame = AgentEvent::new("d-1", AgentEventKind::ChatStart).to_sse();
        assert_eq!(frame.event, "chat_start");
        // Only the dialog id rides along.
        assert_eq!(frame.data.as_object().unwrap().len(), 1);
    }

    #[test]
    fn file_edit_omits_null_diff() {
        let frame = AgentEvent::new(
            "d-1",
            AgentEventKind::FileEdit {
                file: "src/main.rs".into(),
                diff: None,
            },
        )
        .to_sse();
        assert_eq!(frame.event, "file_edit");
        assert!(!frame.data.as_object().unwrap().contains_key("diff"));
    }

    #[test]
    fn event_round_trips_through_serde() {
        let event = AgentEvent::new(
            "d-2",
            AgentEventKind::ToolCall {
                name: "read_file".into(),
                args: json!({"path": "a.rs"}),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: AgentEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
