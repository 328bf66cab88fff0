//! LLM-boundary types for the codeforge assistant.
//!
//! The agent core never speaks a provider wire protocol. It consumes an
//! [`chat::LLMClient`] capability that yields normalized [`chat::StreamChunk`]
//! values; concrete clients (OpenAI-compatible, Anthropic, local runtimes)
//! live outside this workspace and implement the trait.

pub mod chat;
pub mod error;

use serde::{Deserialize, Serialize};

pub use chat::{ChatMessage, ChatRole, LLMClient, MessageType, StreamChunk, Tool};
pub use error::LLMError;

/// A tool invocation requested by the model.
#[derive(Debug, Deserialize, Serialize, Clone, Eq, PartialEq)]
pub struct ToolCall {
    /// The ID of the tool call.
    pub id: String,
    /// The type of the tool call (usually "function").
    #[serde(rename = "type")]
    pub call_type: String,
    /// The function to call.
    pub function: FunctionCall,
}

/// FunctionCall contains details about which function to call and with what arguments.
#[derive(Debug, Deserialize, Serialize, Clone, Eq, PartialEq)]
pub struct FunctionCall {
    /// The name of the function to call.
    pub name: String,
    /// The arguments to pass to the function, serialized as a JSON string.
    pub arguments: String,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Token usage reported by a provider for one request.
///
/// Providers disagree on field names; the aliases cover the common wire
/// spellings so a raw provider payload deserializes into this struct.
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, Eq, PartialEq)]
pub struct Usage {
    /// Number of input (prompt) tokens.
    #[serde(alias = "prompt_tokens", alias = "input_tokens")]
    pub input_tokens: u32,
    /// Number of output (completion) tokens.
    #[serde(alias = "completion_tokens", alias = "output_tokens")]
    pub output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accepts_provider_aliases() {
        let openai: Usage =
            serde_json::from_str(r#"{"prompt_tokens": 12, "completion_tokens": 3}"#).unwrap();
        assert_eq!(openai.input_tokens, 12);
        assert_eq!(openai.output_tokens, 3);

        let anthropic: Usage =
            serde_json::from_str(r#"{"input_tokens": 7, "output_tokens": 1}"#).unwrap();
        assert_eq!(anthropic.input_tokens, 7);
        assert_eq!(anthropic.total_tokens(), 8);
    }

    #[test]
    fn tool_call_round_trips() {
        let call = ToolCall::function("call_1", "write_file", r#"{"path":"a.rs"}"#);
        let json = serde_json::to_string(&call).unwrap();
        let back: ToolCall = serde_json::from_str(&json).unwrap();
        assert_eq!(call, back);
        assert!(json.contains(r#""type":"function""#));
    }
}
