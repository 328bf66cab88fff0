//! SQLite-backed dialog journal.
//!
//! All queries run on the blocking pool behind an `Arc<Mutex<Connection>>`;
//! writes happen inside short transactions. Message payloads are stored as
//! gzip-compressed JSON keyed by `(dialog_id, ord)`.

use rusqlite::{Connection, OptionalExtension, params};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

use super::compress::{compress_json, compress_str, decompress_json, decompress_str};
use super::domain::{
    BranchPointer, BranchType, FileEditRecord, Message, ReasoningBlock, SessionRecord,
    SessionState, StoredToolResult, SummaryRecord, UsageTotals,
};
use super::error::{SessionError, SessionResult};
use super::schema::init_schema;

/// One element of a journal slice: the decoded message, its 0-based position
/// in the full log, and the backing row id.
#[derive(Debug, Clone)]
pub struct SliceItem {
    pub message: Message,
    pub index: i64,
    pub storage_id: i64,
}

/// Counts derived from a full scan of a dialog's message log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStats {
    /// Messages clients display (excludes tool results and carriers)
    pub visible: usize,
    /// Total tool-call entries across all assistant messages
    pub tool_calls: usize,
}

/// Handle to one journal file.
#[derive(Clone)]
pub struct DialogJournal {
    conn: Arc<Mutex<Connection>>,
}

impl DialogJournal {
    pub async fn connect(path: PathBuf) -> SessionResult<Self> {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, rusqlite::Error> {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let mut conn = Connection::open(&path)?;
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
            init_schema(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| SessionError::TaskJoin(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory journal for tests.
    pub async fn connect_in_memory() -> SessionResult<Self> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection, rusqlite::Error> {
            let mut conn = Connection::open_in_memory()?;
            init_schema(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| SessionError::TaskJoin(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run_blocking<F, R>(&self, f: F) -> SessionResult<R>
    where
        F: FnOnce(&mut Connection) -> SessionResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn_arc = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn_arc.lock().expect("journal mutex poisoned");
            f(&mut conn)
        })
        .await
        .map_err(|e| SessionError::TaskJoin(e.to_string()))?
    }

    // ── Messages ───────────────────────────────────────────────────────────

    /// Append a message, returning its 0-based log position.
    pub async fn append(&self, dialog_id: &str, message: &Message) -> SessionResult<i64> {
        let dialog_id = dialog_id.to_string();
        let payload = compress_json(message)?;
        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;
            let ord: i64 = tx.query_row(
                "SELECT COALESCE(MAX(ord) + 1, 0) FROM messages WHERE dialog_id = ?",
                params![dialog_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO messages (dialog_id, ord, payload, created_at) VALUES (?, ?, ?, ?)",
                params![
                    dialog_id,
                    ord,
                    payload,
                    OffsetDateTime::now_utc().unix_timestamp()
                ],
            )?;
            tx.commit()?;
            Ok(ord)
        })
        .await
    }

    /// Number of messages in the log (all kinds).
    pub async fn message_count(&self, dialog_id: &str) -> SessionResult<i64> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE dialog_id = ?",
                params![dialog_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    /// All messages in log order with positions and row ids.
    pub async fn all_messages(&self, dialog_id: &str) -> SessionResult<Vec<SliceItem>> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| load_messages(conn, &dialog_id)).await
    }

    /// Messages with log position >= `from_ord`, in order.
    pub async fn messages_after(
        &self,
        dialog_id: &str,
        from_ord: i64,
    ) -> SessionResult<Vec<SliceItem>> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let items = load_messages(conn, &dialog_id)?;
            Ok(items.into_iter().filter(|i| i.index >= from_ord).collect())
        })
        .await
    }

    /// Count of visible messages (type != tool_result, excluding
    /// empty-assistant carriers).
    pub async fn count_visible(&self, dialog_id: &str) -> SessionResult<usize> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let items = load_messages(conn, &dialog_id)?;
            Ok(items.iter().filter(|i| i.message.is_visible()).count())
        })
        .await
    }

    /// Visible messages with visible index in `[start, end)`, in order, plus
    /// the empty-assistant carriers adjacent to the selected range so their
    /// `tool_calls` travel with the page. A tail load (`end = None`) includes
    /// every trailing carrier.
    pub async fn slice(
        &self,
        dialog_id: &str,
        start: usize,
        end: Option<usize>,
    ) -> SessionResult<Vec<SliceItem>> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let items = load_messages(conn, &dialog_id)?;
            let mut out = Vec::new();
            let mut visible_seen = 0usize;
            for item in items {
                if item.message.is_visible() {
                    let v = visible_seen;
                    visible_seen += 1;
                    if v >= start && end.is_none_or(|e| v < e) {
                        out.push(item);
                    }
                } else if item.message.is_empty_assistant() {
                    // A carrier attaches to the visible message just before it.
                    let preceding = visible_seen;
                    if preceding > start && end.is_none_or(|e| preceding <= e) {
                        out.push(item);
                    }
                }
            }
            Ok(out)
        })
        .await
    }

    /// Visible + tool-call counts over the whole log.
    pub async fn message_stats(&self, dialog_id: &str) -> SessionResult<MessageStats> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let items = load_messages(conn, &dialog_id)?;
            let mut stats = MessageStats::default();
            for item in &items {
                if item.message.is_visible() {
                    stats.visible += 1;
                }
                stats.tool_calls += item.message.tool_calls().len();
            }
            Ok(stats)
        })
        .await
    }

    /// Log position of the most recent assistant message, if any. Used to
    /// anchor file-edit rows to the message that declared the tool calls.
    pub async fn last_assistant_index(&self, dialog_id: &str) -> SessionResult<Option<i64>> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let items = load_messages(conn, &dialog_id)?;
            Ok(items
                .iter()
                .rev()
                .find(|item| matches!(item.message, Message::Assistant { .. }))
                .map(|item| item.index))
        })
        .await
    }

    /// Remove every row belonging to the dialog, across all tables.
    pub async fn clear(&self, dialog_id: &str) -> SessionResult<()> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;
            for table in [
                "messages",
                "reasoning",
                "file_edits",
                "usage_events",
                "usage_totals",
                "summaries",
                "sessions",
                "dialog_branches",
                "tool_results",
            ] {
                tx.execute(
                    &format!("DELETE FROM {table} WHERE dialog_id = ?"),
                    params![dialog_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    // ── Reasoning ──────────────────────────────────────────────────────────

    pub async fn add_reasoning(
        &self,
        dialog_id: &str,
        content: &str,
        model_name: Option<&str>,
        message_index: i64,
    ) -> SessionResult<i64> {
        let dialog_id = dialog_id.to_string();
        let blob = compress_str(content)?;
        let model_name = model_name.map(|s| s.to_string());
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO reasoning (dialog_id, content, model_name, message_index, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    dialog_id,
                    blob,
                    model_name,
                    message_index,
                    OffsetDateTime::now_utc().unix_timestamp()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Reasoning rows whose `message_index` is in `indices`, insertion order.
    pub async fn reasoning_for_indices(
        &self,
        dialog_id: &str,
        indices: &[i64],
    ) -> SessionResult<Vec<ReasoningBlock>> {
        let dialog_id = dialog_id.to_string();
        let indices = indices.to_vec();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content, model_name, message_index, created_at
                 FROM reasoning WHERE dialog_id = ? ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![dialog_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut blocks = Vec::new();
            for (id, blob, model_name, message_index, created_at) in rows {
                if !indices.contains(&message_index) {
                    continue;
                }
                blocks.push(ReasoningBlock {
                    id,
                    dialog_id: dialog_id.clone(),
                    content: decompress_str(&blob)?,
                    model_name,
                    message_index,
                    created_at,
                });
            }
            Ok(blocks)
        })
        .await
    }

    /// Reasoning never attached to a message (`message_index = -1`).
    pub async fn orphan_reasoning(&self, dialog_id: &str) -> SessionResult<Vec<ReasoningBlock>> {
        self.reasoning_for_indices(dialog_id, &[-1]).await
    }

    pub async fn count_reasoning(&self, dialog_id: &str) -> SessionResult<usize> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM reasoning WHERE dialog_id = ?",
                params![dialog_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    // ── File edits ─────────────────────────────────────────────────────────

    pub async fn add_file_edit(
        &self,
        dialog_id: &str,
        file: &str,
        diff: Option<&str>,
        checkpoint: Option<&str>,
        message_index: i64,
    ) -> SessionResult<i64> {
        let dialog_id = dialog_id.to_string();
        let file = file.to_string();
        let diff = diff.map(|s| s.to_string());
        let checkpoint = checkpoint.map(|s| s.to_string());
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO file_edits (dialog_id, file, diff, checkpoint, message_index, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    dialog_id,
                    file,
                    diff,
                    checkpoint,
                    message_index,
                    OffsetDateTime::now_utc().unix_timestamp()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn edits_for_indices(
        &self,
        dialog_id: &str,
        indices: &[i64],
    ) -> SessionResult<Vec<FileEditRecord>> {
        let dialog_id = dialog_id.to_string();
        let indices = indices.to_vec();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, file, diff, checkpoint, message_index, created_at
                 FROM file_edits WHERE dialog_id = ? ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![dialog_id], |row| {
                    Ok(FileEditRecord {
                        id: row.get(0)?,
                        dialog_id: dialog_id.clone(),
                        file: row.get(1)?,
                        diff: row.get(2)?,
                        checkpoint: row.get(3)?,
                        message_index: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .filter(|edit| indices.contains(&edit.message_index))
                .collect())
        })
        .await
    }

    pub async fn count_file_edits(&self, dialog_id: &str) -> SessionResult<usize> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM file_edits WHERE dialog_id = ?",
                params![dialog_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    // ── Usage ──────────────────────────────────────────────────────────────

    /// Record one LLM request's usage and fold it into the running totals.
    pub async fn record_usage(
        &self,
        dialog_id: &str,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> SessionResult<()> {
        let dialog_id = dialog_id.to_string();
        let model = model.to_string();
        self.run_blocking(move |conn| {
            let total = prompt_tokens + completion_tokens;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO usage_events (dialog_id, model, prompt_tokens, completion_tokens, total_tokens, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    dialog_id,
                    model,
                    prompt_tokens as i64,
                    completion_tokens as i64,
                    total as i64,
                    OffsetDateTime::now_utc().unix_timestamp()
                ],
            )?;
            tx.execute(
                "INSERT INTO usage_totals (dialog_id, model, prompt_tokens, completion_tokens, total_tokens)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(dialog_id) DO UPDATE SET
                     model = excluded.model,
                     prompt_tokens = usage_totals.prompt_tokens + excluded.prompt_tokens,
                     completion_tokens = usage_totals.completion_tokens + excluded.completion_tokens,
                     total_tokens = usage_totals.total_tokens + excluded.total_tokens",
                params![
                    dialog_id,
                    model,
                    prompt_tokens as i64,
                    completion_tokens as i64,
                    total as i64
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn usage_totals(&self, dialog_id: &str) -> SessionResult<Option<UsageTotals>> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let totals = conn
                .query_row(
                    "SELECT model, prompt_tokens, completion_tokens, total_tokens
                     FROM usage_totals WHERE dialog_id = ?",
                    params![dialog_id],
                    |row| {
                        Ok(UsageTotals {
                            model: row.get(0)?,
                            prompt_tokens: row.get::<_, i64>(1)? as u64,
                            completion_tokens: row.get::<_, i64>(2)? as u64,
                            total_tokens: row.get::<_, i64>(3)? as u64,
                        })
                    },
                )
                .optional()?;
            Ok(totals)
        })
        .await
    }

    /// Prompt-token count of the most recent request, if any.
    pub async fn last_prompt_tokens(&self, dialog_id: &str) -> SessionResult<Option<u64>> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let tokens = conn
                .query_row(
                    "SELECT prompt_tokens FROM usage_events WHERE dialog_id = ?
                     ORDER BY id DESC LIMIT 1",
                    params![dialog_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(tokens.map(|t| t as u64))
        })
        .await
    }

    // ── Summaries ──────────────────────────────────────────────────────────

    pub async fn save_summary(
        &self,
        dialog_id: &str,
        record: &SummaryRecord,
    ) -> SessionResult<()> {
        let dialog_id = dialog_id.to_string();
        let blob = compress_str(&record.summary_text)?;
        let record = record.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO summaries (dialog_id, cutoff_message_index, summary, keep_last, summarized_count, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    dialog_id,
                    record.cutoff_message_index,
                    blob,
                    record.keep_last,
                    record.summarized_count,
                    record.created_at
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn latest_summary(&self, dialog_id: &str) -> SessionResult<Option<SummaryRecord>> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT cutoff_message_index, summary, keep_last, summarized_count, created_at
                     FROM summaries WHERE dialog_id = ? ORDER BY id DESC LIMIT 1",
                    params![dialog_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Vec<u8>>(1)?,
                            row.get::<_, u32>(2)?,
                            row.get::<_, u32>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()?;
            match row {
                Some((cutoff, blob, keep_last, summarized_count, created_at)) => {
                    Ok(Some(SummaryRecord {
                        cutoff_message_index: cutoff,
                        summary_text: decompress_str(&blob)?,
                        keep_last,
                        summarized_count,
                        created_at,
                    }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    // ── Sessions ───────────────────────────────────────────────────────────

    pub async fn insert_session(
        &self,
        dialog_id: &str,
        record: &SessionRecord,
    ) -> SessionResult<()> {
        let dialog_id = dialog_id.to_string();
        let record = record.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO sessions (dialog_id, name, ref, status, created_at, closed_at, approved_commit, checkpoints_count)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    dialog_id,
                    record.name,
                    record.ref_name,
                    record.status.as_str(),
                    record.created_at,
                    record.closed_at,
                    record.approved_commit,
                    record.checkpoints_count
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(
        &self,
        dialog_id: &str,
        name: &str,
    ) -> SessionResult<Option<SessionRecord>> {
        let dialog_id = dialog_id.to_string();
        let name = name.to_string();
        self.run_blocking(move |conn| {
            query_session(
                conn,
                "SELECT name, ref, status, created_at, closed_at, approved_commit, checkpoints_count
                 FROM sessions WHERE dialog_id = ? AND name = ?",
                params![dialog_id, name],
            )
        })
        .await
    }

    /// The single active session for a dialog, if any.
    pub async fn active_session(&self, dialog_id: &str) -> SessionResult<Option<SessionRecord>> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            query_session(
                conn,
                "SELECT name, ref, status, created_at, closed_at, approved_commit, checkpoints_count
                 FROM sessions WHERE dialog_id = ? AND status = 'active'
                 ORDER BY id DESC LIMIT 1",
                params![dialog_id],
            )
        })
        .await
    }

    pub async fn list_sessions(&self, dialog_id: &str) -> SessionResult<Vec<SessionRecord>> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT name, ref, status, created_at, closed_at, approved_commit, checkpoints_count
                 FROM sessions WHERE dialog_id = ? ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![dialog_id], map_session_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn set_session_status(
        &self,
        dialog_id: &str,
        name: &str,
        status: SessionState,
        closed_at: Option<i64>,
        approved_commit: Option<&str>,
    ) -> SessionResult<()> {
        let dialog_id = dialog_id.to_string();
        let name = name.to_string();
        let approved_commit = approved_commit.map(|s| s.to_string());
        self.run_blocking(move |conn| {
            let affected = conn.execute(
                "UPDATE sessions SET status = ?, closed_at = ?, approved_commit = COALESCE(?, approved_commit)
                 WHERE dialog_id = ? AND name = ?",
                params![status.as_str(), closed_at, approved_commit, dialog_id, name],
            )?;
            if affected == 0 {
                return Err(SessionError::SessionNotFound(name));
            }
            Ok(())
        })
        .await
    }

    pub async fn increment_checkpoints(&self, dialog_id: &str, name: &str) -> SessionResult<()> {
        let dialog_id = dialog_id.to_string();
        let name = name.to_string();
        self.run_blocking(move |conn| {
            conn.execute(
                "UPDATE sessions SET checkpoints_count = checkpoints_count + 1
                 WHERE dialog_id = ? AND name = ?",
                params![dialog_id, name],
            )?;
            Ok(())
        })
        .await
    }

    // ── Branch pointers ────────────────────────────────────────────────────

    pub async fn set_branch(
        &self,
        dialog_id: &str,
        pointer: &BranchPointer,
    ) -> SessionResult<()> {
        let dialog_id = dialog_id.to_string();
        let pointer = pointer.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO dialog_branches (dialog_id, type, ref, head_commit, valid)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(dialog_id, type) DO UPDATE SET
                     ref = excluded.ref,
                     head_commit = excluded.head_commit,
                     valid = excluded.valid",
                params![
                    dialog_id,
                    pointer.branch_type.as_str(),
                    pointer.ref_name,
                    pointer.head_commit,
                    pointer.valid as i64
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_branch(
        &self,
        dialog_id: &str,
        branch_type: BranchType,
    ) -> SessionResult<Option<BranchPointer>> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT type, ref, head_commit, valid FROM dialog_branches
                     WHERE dialog_id = ? AND type = ?",
                    params![dialog_id, branch_type.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row.map(|(type_str, ref_name, head_commit, valid)| BranchPointer {
                branch_type: BranchType::parse(&type_str).unwrap_or(BranchType::Session),
                ref_name,
                head_commit,
                valid: valid != 0,
            }))
        })
        .await
    }

    // ── Tool results ───────────────────────────────────────────────────────

    /// Insert a stored tool result. Keyed on the tool call id, so a replayed
    /// write of the same id is idempotent.
    pub async fn insert_tool_result(&self, record: &StoredToolResult) -> SessionResult<()> {
        let args = compress_json(&record.args)?;
        let result = compress_json(&record.result)?;
        let record = record.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO tool_results
                 (tool_call_id, dialog_id, tool_name, args, result, created_at, size_bytes, summary, error)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.tool_call_id,
                    record.dialog_id,
                    record.tool_name,
                    args,
                    result,
                    record.timestamp,
                    record.size_bytes as i64,
                    record.summary,
                    record.error
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_tool_result(
        &self,
        tool_call_id: &str,
    ) -> SessionResult<Option<StoredToolResult>> {
        let tool_call_id = tool_call_id.to_string();
        self.run_blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT dialog_id, tool_name, args, result, created_at, size_bytes, summary, error
                     FROM tool_results WHERE tool_call_id = ?",
                    params![tool_call_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            row.get::<_, Vec<u8>>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, Option<String>>(6)?,
                            row.get::<_, Option<String>>(7)?,
                        ))
                    },
                )
                .optional()?;
            match row {
                Some((dialog_id, tool_name, args, result, created_at, size_bytes, summary, error)) => {
                    Ok(Some(StoredToolResult {
                        tool_call_id,
                        dialog_id,
                        tool_name,
                        args: decompress_json(&args)?,
                        result: decompress_json(&result)?,
                        timestamp: created_at,
                        size_bytes: size_bytes as usize,
                        summary,
                        error,
                    }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn count_tool_results(&self, dialog_id: &str) -> SessionResult<usize> {
        let dialog_id = dialog_id.to_string();
        self.run_blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tool_results WHERE dialog_id = ?",
                params![dialog_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}

fn load_messages(conn: &Connection, dialog_id: &str) -> SessionResult<Vec<SliceItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, ord, payload FROM messages WHERE dialog_id = ? ORDER BY ord ASC",
    )?;
    let rows = stmt
        .query_map(params![dialog_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut items = Vec::with_capacity(rows.len());
    for (storage_id, ord, payload) in rows {
        let message: Message = decompress_json(&payload)?;
        items.push(SliceItem {
            message,
            index: ord,
            storage_id,
        });
    }
    Ok(items)
}

fn query_session(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> SessionResult<Option<SessionRecord>> {
    let record = conn.query_row(sql, params, map_session_row).optional()?;
    Ok(record)
}

fn map_session_row(row: &rusqlite::Row<'_>) -> Result<SessionRecord, rusqlite::Error> {
    let status_str: String = row.get(2)?;
    Ok(SessionRecord {
        name: row.get(0)?,
        ref_name: row.get(1)?,
        status: SessionState::parse(&status_str).unwrap_or(SessionState::Abandoned),
        created_at: row.get(3)?,
        closed_at: row.get(4)?,
        approved_commit: row.get(5)?,
        checkpoints_count: row.get(6)?,
        branch_exists: true,
    })
}
