//! Summarization trigger and generation.
//!
//! When a dialog's last recorded prompt-token usage crosses the budget, the
//! history before a cutoff is folded into a summary row; context assembly
//! then sends the summary plus the retained tail instead of the full log.

use codeforge::chat::{ChatMessage, LLMClient};
use log::debug;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::config::KEEP_LAST_MESSAGES;
use crate::error::{AgentError, AgentResult};
use crate::session::{DialogJournal, Message, SummaryRecord};

/// Outcome of the trigger policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryDecision {
    pub should_summarize: bool,
    pub keep_last: usize,
}

/// Trigger when the last recorded prompt-token usage meets the budget.
pub fn should_summarize(prompt_tokens: Option<u64>, budget: u32) -> SummaryDecision {
    match prompt_tokens {
        Some(tokens) if tokens >= budget as u64 => SummaryDecision {
            should_summarize: true,
            keep_last: KEEP_LAST_MESSAGES,
        },
        _ => SummaryDecision {
            should_summarize: false,
            keep_last: 0,
        },
    }
}

/// Generates and persists dialog summaries through the LLM capability.
pub struct Summarizer {
    llm: Arc<dyn LLMClient>,
    journal: DialogJournal,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LLMClient>, journal: DialogJournal) -> Self {
        Self { llm, journal }
    }

    /// Fold everything before the tail-`keep_last` visible messages into a
    /// summary row.
    pub async fn summarize(
        &self,
        dialog_id: &str,
        keep_last: usize,
    ) -> AgentResult<SummaryRecord> {
        let messages = self.journal.all_messages(dialog_id).await?;

        let visible_ords: Vec<i64> = messages
            .iter()
            .filter(|item| item.message.is_visible())
            .map(|item| item.index)
            .collect();
        if visible_ords.len() <= keep_last {
            return Err(AgentError::InvalidRequest(
                "not enough history to summarize".to_string(),
            ));
        }
        let cutoff_message_index = visible_ords[visible_ords.len() - keep_last];

        let mut transcript = String::new();
        let mut summarized_count = 0u32;
        for item in &messages {
            if item.index >= cutoff_message_index {
                break;
            }
            summarized_count += 1;
            match &item.message {
                Message::User { content, .. } => {
                    transcript.push_str(&format!("User: {content}\n"));
                }
                Message::Assistant {
                    content,
                    tool_calls,
                } => {
                    if !content.is_empty() {
                        transcript.push_str(&format!("Assistant: {content}\n"));
                    }
                    for call in tool_calls {
                        transcript.push_str(&format!("Assistant used tool {}.\n", call.name));
                    }
                }
                Message::System { .. } | Message::ToolResult { .. } => {}
            }
        }

        debug!(
            "summarizing dialog {}: {} messages before cutoff {}",
            dialog_id, summarized_count, cutoff_message_index
        );

        let prompt = vec![
            ChatMessage::system(
                "Condense the following conversation into a factual summary. \
                 Keep decisions, file names, and unresolved questions; drop pleasantries.",
            ),
            ChatMessage::user(transcript),
        ];
        let summary_text = self.llm.complete(&prompt).await?;

        let record = SummaryRecord {
            cutoff_message_index,
            summary_text,
            keep_last: keep_last as u32,
            summarized_count,
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
        };
        self.journal.save_summary(dialog_id, &record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedClient;
    use crate::test_utils::chunks::{done, text};

    #[test]
    fn trigger_respects_budget() {
        assert!(!should_summarize(None, 20_000).should_summarize);
        assert!(!should_summarize(Some(19_999), 20_000).should_summarize);

        let decision = should_summarize(Some(20_000), 20_000);
        assert!(decision.should_summarize);
        assert_eq!(decision.keep_last, KEEP_LAST_MESSAGES);
    }

    #[tokio::test]
    async fn summarize_persists_record_with_cutoff() {
        let journal = DialogJournal::connect_in_memory().await.unwrap();
        for i in 0..6 {
            journal
                .append("d", &Message::user(format!("question {i}")))
                .await
                .unwrap();
            journal
                .append("d", &Message::assistant(format!("answer {i}")))
                .await
                .unwrap();
        }

        let llm = Arc::new(ScriptedClient::new(vec![vec![
            text("They discussed six questions."),
            done(),
        ]]));
        let summarizer = Summarizer::new(llm, journal.clone());
        let record = summarizer.summarize("d", 4).await.unwrap();

        // 12 visible messages, keep 4 → cutoff at ord 8.
        assert_eq!(record.cutoff_message_index, 8);
        assert_eq!(record.summarized_count, 8);
        assert_eq!(record.summary_text, "They discussed six questions.");

        let loaded = journal.latest_summary("d").await.unwrap().unwrap();
        assert_eq!(loaded.cutoff_message_index, 8);

        // The retained tail starts at the cutoff.
        let tail = journal.messages_after("d", record.cutoff_message_index).await.unwrap();
        assert_eq!(tail.len(), 4);
    }

    #[tokio::test]
    async fn short_history_refuses_to_summarize() {
        let journal = DialogJournal::connect_in_memory().await.unwrap();
        journal.append("d", &Message::user("only one")).await.unwrap();

        let llm = Arc::new(ScriptedClient::new(vec![]));
        let summarizer = Summarizer::new(llm, journal);
        assert!(summarizer.summarize("d", 24).await.is_err());
    }
}
