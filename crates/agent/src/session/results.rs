//! Out-of-band storage for oversized tool results.
//!
//! Full results go into the journal's `tool_results` table (compressed);
//! dialog history only ever carries the slim envelope with metadata and a
//! reference. The executor asks this store to build both forms.

use log::debug;
use serde_json::Value;
use time::OffsetDateTime;

use super::domain::{
    EnvelopeMetadata, ResultRef, StoredToolResult, ToolResultEnvelope, ToolResultStatus,
};
use super::error::{SessionError, SessionResult};
use super::sqlite::DialogJournal;

/// Content-addressed store for tool outputs, keyed by tool call id.
#[derive(Clone)]
pub struct ToolResultStore {
    journal: DialogJournal,
    dialog_id: String,
    preview_bytes: usize,
}

impl ToolResultStore {
    pub fn new(journal: DialogJournal, dialog_id: impl Into<String>, preview_bytes: usize) -> Self {
        Self {
            journal,
            dialog_id: dialog_id.into(),
            preview_bytes,
        }
    }

    /// Persist a result and return the reference that goes into envelopes.
    pub async fn store_result(
        &self,
        tool_call_id: &str,
        tool_name: &str,
        args: &Value,
        result: &Value,
        error: Option<&str>,
    ) -> SessionResult<ResultRef> {
        let size_bytes = serialized_size(result);
        let record = StoredToolResult {
            tool_call_id: tool_call_id.to_string(),
            dialog_id: self.dialog_id.clone(),
            tool_name: tool_name.to_string(),
            args: args.clone(),
            result: result.clone(),
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
            size_bytes,
            summary: summarize_result(tool_name, result),
            error: error.map(|e| e.to_string()),
        };
        self.journal.insert_tool_result(&record).await?;
        debug!(
            "stored tool result: call={}, tool={}, {} bytes",
            tool_call_id, tool_name, size_bytes
        );
        Ok(ResultRef::stored(tool_call_id, size_bytes))
    }

    /// Fetch a stored record; `ResultNotFound` when the id was never stored.
    pub async fn get(&self, tool_call_id: &str) -> SessionResult<StoredToolResult> {
        self.journal
            .get_tool_result(tool_call_id)
            .await?
            .ok_or_else(|| SessionError::ResultNotFound(tool_call_id.to_string()))
    }

    pub async fn contains(&self, tool_call_id: &str) -> SessionResult<bool> {
        Ok(self.journal.get_tool_result(tool_call_id).await?.is_some())
    }

    /// Build the full envelope for a result persisted via [`store_result`].
    /// The inline copy rides along for the model's next turn; history gets
    /// the `slim()` form.
    pub fn referenced_envelope(
        &self,
        tool_call_id: &str,
        tool_name: &str,
        status: ToolResultStatus,
        result: &Value,
        result_ref: ResultRef,
    ) -> ToolResultEnvelope {
        ToolResultEnvelope {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            status,
            metadata: EnvelopeMetadata {
                size_bytes: result_ref.size,
                summary: summarize_result(tool_name, result),
                truncated_preview: Some(self.truncated_preview(result)),
                result_present: Some(true),
            },
            result_ref: Some(result_ref),
            inline_result: Some(result.clone()),
            has_inline_result: true,
        }
    }

    /// Build an inline-only envelope for ephemeral tools (nothing stored).
    pub fn inline_envelope(
        &self,
        tool_call_id: &str,
        tool_name: &str,
        status: ToolResultStatus,
        result: &Value,
    ) -> ToolResultEnvelope {
        ToolResultEnvelope {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            status,
            metadata: EnvelopeMetadata {
                size_bytes: serialized_size(result),
                summary: summarize_result(tool_name, result),
                truncated_preview: None,
                result_present: Some(true),
            },
            result_ref: None,
            inline_result: Some(result.clone()),
            has_inline_result: true,
        }
    }

    /// Bounded head+tail preview of a serialized result.
    pub fn truncated_preview(&self, result: &Value) -> String {
        let text = result.to_string();
        truncate_middle(&text, self.preview_bytes)
    }

    /// Release underlying resources. The journal handle is shared, so this
    /// only severs this store's reference.
    pub fn dispose(self) {}
}

fn serialized_size(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

/// Keep the head and tail of `text`, eliding the middle beyond `max_bytes`.
fn truncate_middle(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let half = max_bytes / 2;
    let head_end = floor_char_boundary(text, half);
    let tail_start = ceil_char_boundary(text, text.len() - half);
    format!(
        "{}\n… [{} bytes elided] …\n{}",
        &text[..head_end],
        text.len() - head_end - (text.len() - tail_start),
        &text[tail_start..]
    )
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Short human-readable summary attached to envelope metadata, derived per
/// tool family from well-known result fields.
fn summarize_result(tool_name: &str, result: &Value) -> Option<String> {
    match tool_name {
        "read_file" => {
            let bytes = result.get("content").and_then(Value::as_str)?.len();
            Some(format!("read {bytes} bytes"))
        }
        "write_file" | "replace_in_file" => {
            let path = result.get("path").and_then(Value::as_str)?;
            Some(format!("wrote {path}"))
        }
        "search_files" => {
            let count = result.get("matches").and_then(Value::as_array)?.len();
            Some(format!("{count} matches"))
        }
        "list_files" => {
            let count = result.get("entries").and_then(Value::as_array)?.len();
            Some(format!("{count} entries"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> ToolResultStore {
        let journal = DialogJournal::connect_in_memory().await.unwrap();
        ToolResultStore::new(journal, "d", 64)
    }

    #[tokio::test]
    async fn store_and_get_round_trip() {
        let store = store().await;
        let args = json!({"path": "a.rs"});
        let result = json!({"type": "read_file_result", "content": "fn main() {}"});

        let result_ref = store
            .store_result("c1", "read_file", &args, &result, None)
            .await
            .unwrap();
        assert_eq!(result_ref.kind, "stored");
        assert_eq!(result_ref.id, "c1");
        assert_eq!(result_ref.size, result.to_string().len());

        let record = store.get("c1").await.unwrap();
        assert_eq!(record.tool_name, "read_file");
        assert_eq!(record.args, args);
        assert_eq!(record.result, result);
    }

    #[tokio::test]
    async fn missing_result_is_not_found() {
        let store = store().await;
        assert!(matches!(
            store.get("nope").await,
            Err(SessionError::ResultNotFound(_))
        ));
        assert!(!store.contains("nope").await.unwrap());
    }

    #[tokio::test]
    async fn referenced_envelope_satisfies_invariant() {
        let store = store().await;
        let result = json!({"ok": true});
        let result_ref = store
            .store_result("c2", "write_file", &json!({}), &result, None)
            .await
            .unwrap();
        let envelope = store.referenced_envelope(
            "c2",
            "write_file",
            ToolResultStatus::Success,
            &result,
            result_ref,
        );
        assert!(envelope.has_inline_result);
        assert!(envelope.inline_result.is_some());

        let slim = envelope.slim();
        assert!(!slim.has_inline_result);
        // The slim form's reference must resolve.
        assert!(store.contains(&slim.result_ref.unwrap().id).await.unwrap());
    }

    #[test]
    fn preview_keeps_head_and_tail() {
        let text: String = "abcdefghij".repeat(20);
        let preview = truncate_middle(&text, 40);
        assert!(preview.starts_with("abcdefghij"));
        assert!(preview.ends_with("abcdefghij"));
        assert!(preview.contains("elided"));
        assert!(preview.len() < text.len());
    }

    #[test]
    fn preview_of_short_text_is_verbatim() {
        assert_eq!(truncate_middle("short", 100), "short");
    }

    #[test]
    fn summaries_follow_tool_family() {
        assert_eq!(
            summarize_result("search_files", &json!({"matches": [1, 2, 3]})),
            Some("3 matches".to_string())
        );
        assert_eq!(summarize_result("web_fetch", &json!({})), None);
    }
}
