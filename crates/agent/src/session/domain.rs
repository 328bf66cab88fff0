//! Domain types stored in the dialog journal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of the append-only dialog log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checkpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRecord>,
    },
    ToolResult {
        tool_call_id: String,
        envelope: ToolResultEnvelope,
    },
    System {
        content: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
            checkpoint: None,
            session: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// An assistant message whose only purpose is to carry tool calls.
    pub fn is_empty_assistant(&self) -> bool {
        matches!(self, Message::Assistant { content, .. } if content.is_empty())
    }

    /// Whether clients display this message. Tool results and empty-assistant
    /// carriers are structural, not visible.
    pub fn is_visible(&self) -> bool {
        match self {
            Message::ToolResult { .. } => false,
            Message::Assistant { content, .. } => !content.is_empty(),
            _ => true,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// A tool invocation recorded on an assistant message. `id` is unique within
/// a dialog; `args` is the parsed argument object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    Success,
    Error,
}

/// Size and preview metadata riding on a tool-result envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeMetadata {
    pub size_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_present: Option<bool>,
}

/// Reference to a result persisted in the tool-result store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRef {
    /// Always `"stored"` for journal-backed results.
    pub kind: String,
    /// Storage key; equals the tool call id.
    pub id: String,
    pub size: usize,
}

impl ResultRef {
    pub fn stored(id: impl Into<String>, size: usize) -> Self {
        Self {
            kind: "stored".to_string(),
            id: id.into(),
            size,
        }
    }
}

/// The content that stands in for a tool output in dialog history.
///
/// Invariant: when `has_inline_result` is false the `result_ref` must resolve
/// in the tool-result store; when true, `inline_result` is populated. The
/// persisted (slim) form never carries `inline_result` or a preview.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultEnvelope {
    pub tool_call_id: String,
    pub tool_name: String,
    pub status: ToolResultStatus,
    pub metadata: EnvelopeMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<ResultRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_result: Option<Value>,
    pub has_inline_result: bool,
}

impl ToolResultEnvelope {
    /// Strip inline content for history persistence, keeping only metadata
    /// and the storage reference.
    pub fn slim(&self) -> Self {
        let mut slim = self.clone();
        slim.inline_result = None;
        slim.metadata.truncated_preview = None;
        if slim.result_ref.is_some() {
            slim.has_inline_result = false;
        }
        slim
    }
}

/// A record in the out-of-band tool-result store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredToolResult {
    pub tool_call_id: String,
    pub dialog_id: String,
    pub tool_name: String,
    pub args: Value,
    pub result: Value,
    pub timestamp: i64,
    pub size_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reasoning text captured ahead of an assistant message.
///
/// `message_index` is the 0-based log position of the assistant message this
/// reasoning precedes, or -1 while unattached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningBlock {
    pub id: i64,
    pub dialog_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub message_index: i64,
    pub created_at: i64,
}

/// A file-level change reported by the tool executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEditRecord {
    pub id: i64,
    pub dialog_id: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    pub message_index: i64,
    pub created_at: i64,
}

/// Per-dialog running token totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub model: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Merged,
    Abandoned,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Merged => "merged",
            SessionState::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionState::Active),
            "merged" => Some(SessionState::Merged),
            "abandoned" => Some(SessionState::Abandoned),
            _ => None,
        }
    }
}

/// One approval cycle: a named branch of checkpoints. At most one session per
/// dialog is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub name: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub status: SessionState,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_commit: Option<String>,
    pub checkpoints_count: u32,
    pub branch_exists: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BranchType {
    Main,
    Session,
}

impl BranchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchType::Main => "main",
            BranchType::Session => "session",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "main" => Some(BranchType::Main),
            "session" => Some(BranchType::Session),
            _ => None,
        }
    }
}

/// One row of each type per dialog, mirroring the repo's refs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchPointer {
    #[serde(rename = "type")]
    pub branch_type: BranchType,
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_commit: Option<String>,
    pub valid: bool,
}

/// A persisted dialog summary: messages before `cutoff_message_index` are
/// replaced by `summary_text` when assembling context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryRecord {
    pub cutoff_message_index: i64,
    pub summary_text: String,
    pub keep_last: u32,
    pub summarized_count: u32,
    pub created_at: i64,
}
