//! Per-iteration accumulation of LLM stream chunks.
//!
//! The accumulator turns normalized chunks into boundary-correct events
//! (`chat_start` before the first `chat`, and so on) and assembles partial
//! tool-call fragments into complete calls.

use codeforge::Usage;
use codeforge::chat::StreamChunk;

use crate::events::AgentEventKind;

/// A tool call assembled from streamed fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingToolCall {
    pub index: Option<usize>,
    pub id: String,
    pub name: String,
    pub args: String,
}

impl PendingToolCall {
    fn merge(&mut self, id: Option<String>, name: Option<String>, args: Option<String>) {
        if self.id.is_empty()
            && let Some(id) = id
        {
            self.id = id;
        }
        if let Some(name) = name {
            self.name.push_str(&name);
        }
        if let Some(args) = args {
            self.args.push_str(&args);
        }
    }
}

/// State accumulated over one LLM iteration.
#[derive(Debug, Default)]
pub struct IterationAccumulator {
    pub content: String,
    pub chat_started: bool,
    pub reasoning_started: bool,
    pub usage: Option<Usage>,
    completed_calls: Vec<PendingToolCall>,
    current_call: Option<PendingToolCall>,
}

impl IterationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk, returning the events it produces in order.
    pub fn feed(&mut self, chunk: StreamChunk) -> Vec<AgentEventKind> {
        let mut events = Vec::new();
        match chunk {
            StreamChunk::Text(delta) => {
                if delta.is_empty() {
                    return events;
                }
                if !self.chat_started {
                    self.chat_started = true;
                    events.push(AgentEventKind::ChatStart);
                }
                self.content.push_str(&delta);
                events.push(AgentEventKind::Chat { content: delta });
            }
            StreamChunk::Reasoning(delta) => {
                if delta.is_empty() {
                    return events;
                }
                if !self.reasoning_started {
                    self.reasoning_started = true;
                    events.push(AgentEventKind::ReasoningStart);
                }
                events.push(AgentEventKind::Reasoning { content: delta });
            }
            StreamChunk::ToolCallDelta {
                index,
                id,
                name,
                args,
            } => {
                self.feed_tool_delta(index, id, name, args);
            }
            StreamChunk::Usage(usage) => {
                // The latest non-empty snapshot wins.
                self.usage = Some(usage);
            }
            StreamChunk::Done { .. } => {}
        }
        events
    }

    fn feed_tool_delta(
        &mut self,
        index: Option<usize>,
        id: Option<String>,
        name: Option<String>,
        args: Option<String>,
    ) {
        match index {
            Some(index) => {
                let same_block = self
                    .current_call
                    .as_ref()
                    .is_some_and(|call| call.index == Some(index));
                if !same_block {
                    self.flush_current();
                    self.current_call = Some(PendingToolCall {
                        index: Some(index),
                        ..Default::default()
                    });
                }
                if let Some(call) = self.current_call.as_mut() {
                    call.merge(id, name, args);
                }
            }
            None => {
                // Index-less fragments extend the call under assembly;
                // without one they have nowhere to go and are dropped.
                if let Some(call) = self.current_call.as_mut() {
                    call.merge(id, name, args);
                }
            }
        }
    }

    fn flush_current(&mut self) {
        if let Some(call) = self.current_call.take()
            && !call.name.is_empty()
        {
            self.completed_calls.push(call);
        }
    }

    /// Close open boundaries; returns the closing events in order.
    pub fn closing_events(&self) -> Vec<AgentEventKind> {
        let mut events = Vec::new();
        if self.reasoning_started {
            events.push(AgentEventKind::ReasoningEnd);
        }
        if self.chat_started {
            events.push(AgentEventKind::ChatEnd);
        }
        events
    }

    /// Finish the iteration and hand back the assembled tool calls.
    pub fn into_tool_calls(mut self) -> (String, Vec<PendingToolCall>, Option<Usage>) {
        self.flush_current();
        (self.content, self.completed_calls, self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(
        index: Option<usize>,
        id: Option<&str>,
        name: Option<&str>,
        args: Option<&str>,
    ) -> StreamChunk {
        StreamChunk::ToolCallDelta {
            index,
            id: id.map(Into::into),
            name: name.map(Into::into),
            args: args.map(Into::into),
        }
    }

    #[test]
    fn chat_start_precedes_first_chat() {
        let mut acc = IterationAccumulator::new();
        let events = acc.feed(StreamChunk::Text("hi".into()));
        assert!(matches!(events[0], AgentEventKind::ChatStart));
        assert!(matches!(events[1], AgentEventKind::Chat { .. }));

        let events = acc.feed(StreamChunk::Text(" there".into()));
        assert_eq!(events.len(), 1);
        assert_eq!(acc.content, "hi there");
    }

    #[test]
    fn reasoning_and_chat_boundaries_are_independent() {
        let mut acc = IterationAccumulator::new();
        acc.feed(StreamChunk::Reasoning("think".into()));
        acc.feed(StreamChunk::Text("answer".into()));

        let closes = acc.closing_events();
        assert!(matches!(closes[0], AgentEventKind::ReasoningEnd));
        assert!(matches!(closes[1], AgentEventKind::ChatEnd));
    }

    #[test]
    fn no_boundaries_without_content() {
        let acc = IterationAccumulator::new();
        assert!(acc.closing_events().is_empty());
    }

    #[test]
    fn fragments_with_same_index_merge() {
        let mut acc = IterationAccumulator::new();
        acc.feed(delta(Some(0), Some("call_1"), Some("read_"), None));
        acc.feed(delta(Some(0), None, Some("file"), Some(r#"{"path":"#)));
        acc.feed(delta(Some(0), None, None, Some(r#""a.rs"}"#)));

        let (_, calls, _) = acc.into_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].args, r#"{"path":"a.rs"}"#);
    }

    #[test]
    fn new_index_flushes_previous_call() {
        let mut acc = IterationAccumulator::new();
        acc.feed(delta(Some(0), Some("c1"), Some("read_file"), Some("{}")));
        acc.feed(delta(Some(1), Some("c2"), Some("write_file"), Some("{}")));

        let (_, calls, _) = acc.into_tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[1].name, "write_file");
    }

    #[test]
    fn indexless_fragment_extends_current_call() {
        let mut acc = IterationAccumulator::new();
        acc.feed(delta(Some(0), Some("c1"), Some("search"), Some("{")));
        acc.feed(delta(None, None, None, Some("}")));

        let (_, calls, _) = acc.into_tool_calls();
        assert_eq!(calls[0].args, "{}");
    }

    #[test]
    fn indexless_fragment_without_current_is_dropped() {
        let mut acc = IterationAccumulator::new();
        acc.feed(delta(None, Some("c1"), Some("ghost"), Some("{}")));
        let (_, calls, _) = acc.into_tool_calls();
        assert!(calls.is_empty());
    }

    #[test]
    fn nameless_call_is_discarded_on_flush() {
        let mut acc = IterationAccumulator::new();
        acc.feed(delta(Some(0), Some("c1"), None, Some("{}")));
        let (_, calls, _) = acc.into_tool_calls();
        assert!(calls.is_empty());
    }

    #[test]
    fn latest_usage_snapshot_wins() {
        let mut acc = IterationAccumulator::new();
        acc.feed(StreamChunk::Usage(Usage {
            input_tokens: 1,
            output_tokens: 1,
        }));
        acc.feed(StreamChunk::Usage(Usage {
            input_tokens: 100,
            output_tokens: 20,
        }));
        assert_eq!(acc.usage.unwrap().input_tokens, 100);
    }
}
