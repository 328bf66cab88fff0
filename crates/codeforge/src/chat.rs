//! Chat messages, tool definitions and the streaming client capability.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

use crate::error::LLMError;
use crate::{ToolCall, Usage};

/// Role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    /// The user/human participant in the conversation
    User,
    /// The AI assistant participant in the conversation
    Assistant,
    /// Out-of-band instructions (system prompt, injected summaries)
    System,
}

/// The type of a message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageType {
    /// A text message
    #[default]
    Text,
    /// Tool invocations requested by the assistant
    ToolUse(Vec<ToolCall>),
    /// Results fed back for earlier tool invocations. Each entry reuses the
    /// `ToolCall` shape with `function.arguments` carrying the result payload.
    ToolResult(Vec<ToolCall>),
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of who sent this message
    pub role: ChatRole,
    /// The type of the message
    pub message_type: MessageType,
    /// The text content of the message
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            message_type: MessageType::Text,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            message_type: MessageType::Text,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            message_type: MessageType::Text,
            content: content.into(),
        }
    }

    pub fn assistant_tool_use(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            message_type: MessageType::ToolUse(calls),
            content: content.into(),
        }
    }

    pub fn tool_result(results: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::User,
            message_type: MessageType::ToolResult(results),
            content: String::new(),
        }
    }
}

/// Represents a function definition for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionTool {
    /// The name of the function
    pub name: String,
    /// Description of what the function does
    pub description: String,
    /// The JSON schema of the function parameters
    pub parameters: Value,
}

/// Represents a tool that can be bound to a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// The type of tool (e.g. "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// The function definition if this is a function tool
    pub function: FunctionTool,
}

/// Why the model stopped emitting output.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Unknown,
}

/// A normalized streaming content block.
///
/// Concrete clients translate their provider's wire chunks into this closed
/// set; the agent loop never sees provider-specific shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunk {
    /// Assistant text delta
    Text(String),

    /// Reasoning/thinking summary delta
    Reasoning(String),

    /// Partial tool-call fragment.
    ///
    /// `index` identifies the content block when the provider supplies one;
    /// `id`, `name` and `args` are each optional fragments to be appended to
    /// the call under assembly.
    ToolCallDelta {
        index: Option<usize>,
        id: Option<String>,
        name: Option<String>,
        args: Option<String>,
    },

    /// Usage metadata containing token counts
    Usage(Usage),

    /// Stream ended with a stop reason
    Done { stop_reason: FinishReason },
}

/// A pinned, boxed stream of chunk results from a streaming chat request.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LLMError>> + Send>>;

/// The LLM capability the agent core consumes.
///
/// Implementations wrap a concrete provider client. `model_name` is reported
/// in usage records; `chat_stream` must yield chunks in provider order and
/// terminate with either `Done` or an `Err`.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Model identifier recorded against usage rows.
    fn model_name(&self) -> &str;

    /// Streaming chat interaction with an optional bound tool-set.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
    ) -> Result<ChunkStream, LLMError>;

    /// One-shot completion used for auxiliary generations (e.g. summaries).
    ///
    /// The default drains `chat_stream` and concatenates the text deltas.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LLMError> {
        use futures::StreamExt;
        let mut stream = self.chat_stream(messages, None).await?;
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Text(delta) => out.push_str(&delta),
                StreamChunk::Done { .. } => break,
                _ => {}
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_chunk_serializes_snake_case() {
        let chunk = StreamChunk::ToolCallDelta {
            index: Some(0),
            id: Some("call_1".into()),
            name: Some("read_file".into()),
            args: None,
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("tool_call_delta"));
    }

    #[test]
    fn tool_result_message_uses_user_role() {
        let msg = ChatMessage::tool_result(vec![ToolCall::function("c1", "read_file", "{}")]);
        assert_eq!(msg.role, ChatRole::User);
        assert!(matches!(msg.message_type, MessageType::ToolResult(ref v) if v.len() == 1));
    }
}
