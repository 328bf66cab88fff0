//! Journal schema initialization.
//!
//! One journal file per dialog (plus a shared one for the inspector), so
//! every table still carries `dialog_id`: the inspector journal holds rows
//! for that one reserved dialog, and tooling can attach any journal and run
//! the same queries.

use rusqlite::Connection;

pub fn init_schema(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        -- Append-only message log. `ord` is the 0-based log position.
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY,
            dialog_id TEXT NOT NULL,
            ord INTEGER NOT NULL,
            payload BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(dialog_id, ord)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_dialog ON messages(dialog_id, ord);

        -- Reasoning blocks. message_index = -1 while unattached.
        CREATE TABLE IF NOT EXISTS reasoning (
            id INTEGER PRIMARY KEY,
            dialog_id TEXT NOT NULL,
            content BLOB NOT NULL,
            model_name TEXT,
            message_index INTEGER NOT NULL DEFAULT -1,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reasoning_dialog ON reasoning(dialog_id, message_index);

        CREATE TABLE IF NOT EXISTS file_edits (
            id INTEGER PRIMARY KEY,
            dialog_id TEXT NOT NULL,
            file TEXT NOT NULL,
            diff TEXT,
            checkpoint TEXT,
            message_index INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_file_edits_dialog ON file_edits(dialog_id, message_index);

        -- Per-request usage audit trail.
        CREATE TABLE IF NOT EXISTS usage_events (
            id INTEGER PRIMARY KEY,
            dialog_id TEXT NOT NULL,
            model TEXT NOT NULL,
            prompt_tokens INTEGER NOT NULL,
            completion_tokens INTEGER NOT NULL,
            total_tokens INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_usage_events_dialog ON usage_events(dialog_id);

        -- Running totals, one row per dialog.
        CREATE TABLE IF NOT EXISTS usage_totals (
            dialog_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            prompt_tokens INTEGER NOT NULL DEFAULT 0,
            completion_tokens INTEGER NOT NULL DEFAULT 0,
            total_tokens INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS summaries (
            id INTEGER PRIMARY KEY,
            dialog_id TEXT NOT NULL,
            cutoff_message_index INTEGER NOT NULL,
            summary BLOB NOT NULL,
            keep_last INTEGER NOT NULL,
            summarized_count INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_summaries_dialog ON summaries(dialog_id, id);

        -- Approval cycles. At most one row per dialog is 'active'.
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            dialog_id TEXT NOT NULL,
            name TEXT NOT NULL,
            ref TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            closed_at INTEGER,
            approved_commit TEXT,
            checkpoints_count INTEGER NOT NULL DEFAULT 0,
            UNIQUE(dialog_id, name)
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_dialog ON sessions(dialog_id, status);

        -- Mirror of the repo's refs: one 'main' and one 'session' row per dialog.
        CREATE TABLE IF NOT EXISTS dialog_branches (
            dialog_id TEXT NOT NULL,
            type TEXT NOT NULL,
            ref TEXT NOT NULL,
            head_commit TEXT,
            valid INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY(dialog_id, type)
        );

        -- Out-of-band storage for oversized tool results.
        CREATE TABLE IF NOT EXISTS tool_results (
            tool_call_id TEXT PRIMARY KEY,
            dialog_id TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            args BLOB NOT NULL,
            result BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL,
            summary TEXT,
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_tool_results_dialog ON tool_results(dialog_id);
        "#,
    )?;

    Ok(())
}
