//! End-to-end scenarios over the chat service, the versioning engine and the
//! history reconstructor, driven by a scripted model.

mod common;

use common::*;

use codeforge_agent::events::AgentEventKind;
use codeforge_agent::history;
use codeforge_agent::session::Message;
use std::fs;

/// Approve cycle: write v1, approve, write v2, reset. The file returns to
/// the approved content and sessions advance 1 → 2 → 3.
#[tokio::test]
async fn approve_cycle_restores_approved_state() {
    let fixture = fixture_with(
        vec![
            vec![
                tool_call("c1", "write_file", r#"{"path":"a.py","content":"v1"}"#),
                done(),
            ],
            vec![text("wrote v1"), done()],
            vec![
                tool_call("c2", "write_file", r#"{"path":"a.py","content":"v2"}"#),
                done(),
            ],
            vec![text("wrote v2"), done()],
        ],
        Some("Versioning"),
    )
    .await;

    let events = run_turn(&fixture, "write a.py with v1").await;
    assert_stream_invariants(&events);
    assert_eq!(
        fs::read_to_string(fixture.workspace.path().join("a.py")).unwrap(),
        "v1"
    );

    let versioning = fixture
        .service
        .versioning_for(&fixture.dialog_id)
        .await
        .unwrap();
    let approve = versioning.approve_all(None).await.unwrap();
    assert_eq!(approve.new_session, "session_2");
    assert!(approve.commits_approved >= 1);

    let events = run_turn(&fixture, "now write v2").await;
    assert_stream_invariants(&events);
    assert_eq!(
        fs::read_to_string(fixture.workspace.path().join("a.py")).unwrap(),
        "v2"
    );

    let reset = versioning.reset_to_approved().await.unwrap();
    assert_eq!(reset.new_session, "session_3");
    versioning.restore_checkpoint(&reset.reset_to).await.unwrap();

    assert_eq!(
        fs::read_to_string(fixture.workspace.path().join("a.py")).unwrap(),
        "v1"
    );
    assert!(!versioning.has_unapproved().await.unwrap());
}

/// Restore deletes agent-created files but preserves files the user wrote
/// outside the tools.
#[tokio::test]
async fn restore_preserves_user_files() {
    let fixture = fixture_with(
        vec![
            vec![
                tool_call("c1", "write_file", r#"{"path":"agent.py","content":"one"}"#),
                done(),
            ],
            vec![text("ok"), done()],
            vec![
                tool_call("c2", "write_file", r#"{"path":"agent2.py","content":"two"}"#),
                done(),
            ],
            vec![text("ok"), done()],
        ],
        Some("Restore"),
    )
    .await;

    let versioning = fixture
        .service
        .versioning_for(&fixture.dialog_id)
        .await
        .unwrap();
    let cp1 = versioning.create_checkpoint("before any work").await.unwrap();

    run_turn(&fixture, "write agent.py").await;
    // The user edits out-of-band, bypassing the tools.
    fs::write(fixture.workspace.path().join("user.txt"), "my notes").unwrap();
    run_turn(&fixture, "write agent2.py").await;
    versioning.create_checkpoint("after agent work").await.unwrap();

    versioning.restore_checkpoint(&cp1).await.unwrap();

    assert!(!fixture.workspace.path().join("agent.py").exists());
    assert!(!fixture.workspace.path().join("agent2.py").exists());
    assert_eq!(
        fs::read_to_string(fixture.workspace.path().join("user.txt")).unwrap(),
        "my notes"
    );
}

/// A model that only ever produces malformed tool arguments: the stream
/// stays silent about each recoverable failure, then terminates with one
/// error naming the consecutive-error cap.
#[tokio::test]
async fn error_loop_cap_terminates_stream() {
    let bad_iteration = || {
        vec![
            tool_call("cx", "write_file", r#"{"path": broken"#),
            done(),
        ]
    };
    // Default cap is 10; supply exactly that many iterations.
    let fixture = fixture_with((0..10).map(|_| bad_iteration()).collect(), Some("S3")).await;

    let events = run_turn(&fixture, "loop forever").await;
    assert_stream_invariants(&events);

    let names = names(&events);
    assert_eq!(
        names.iter().filter(|n| **n == "tool_call").count(),
        10,
        "every iteration announces its tool call: {names:?}"
    );

    let error = events
        .iter()
        .find_map(|e| match &e.kind {
            AgentEventKind::Error { error } => Some(error.clone()),
            _ => None,
        })
        .expect("terminal error expected");
    assert!(error.contains("maximum consecutive errors"), "{error}");

    // Exactly one error event, immediately before done.
    assert_eq!(names.iter().filter(|n| **n == "error").count(), 1);
}

/// History pagination: pages concatenate to the full stream with unique,
/// ordered idx values, and attached events ride with their message.
#[tokio::test]
async fn history_pages_round_trip() {
    let fixture = fixture_with(
        vec![
            vec![text("answer one"), done()],
            vec![reasoning("let me think"), text("answer two"), done()],
            vec![
                tool_call("c1", "write_file", r#"{"path":"x.txt","content":"x"}"#),
                done(),
            ],
            vec![text("answer three"), done()],
        ],
        Some("Paging"),
    )
    .await;

    for query in ["one", "two", "three"] {
        let events = run_turn(&fixture, query).await;
        assert_stream_invariants(&events);
    }

    let journal = fixture.service.journal_for(&fixture.dialog_id).await.unwrap();

    let tail = history::get_history(&journal, &fixture.dialog_id, 20, None)
        .await
        .unwrap();
    assert!(!tail.has_more);

    // user/chat pairs for three turns → visible idx 0..=5.
    let all_idx: Vec<usize> = tail.events.iter().filter_map(|e| e.idx).collect();
    assert_eq!(all_idx, (0..=5).collect::<Vec<_>>());

    // The tool call renders between its declaring message and the next turn.
    let types: Vec<&str> = tail.events.iter().map(|e| e.event_type.as_str()).collect();
    assert!(types.contains(&"tool_call"));
    assert!(types.contains(&"reasoning"));
    assert!(types.contains(&"file_edit"));

    // Page backwards two visible messages at a time and re-assemble.
    let mut collected: Vec<usize> = Vec::new();
    let mut cursor: Option<usize> = None;
    loop {
        let page = history::get_history(&journal, &fixture.dialog_id, 2, cursor)
            .await
            .unwrap();
        let mut page_idx: Vec<usize> = page.events.iter().filter_map(|e| e.idx).collect();
        assert!(
            cursor.is_none_or(|c| page_idx.iter().all(|i| *i < c)),
            "page must stay below the cursor"
        );
        page_idx.extend(collected.iter().copied());
        collected = page_idx;
        if !page.has_more {
            break;
        }
        cursor = Some(page.first_idx);
    }
    assert_eq!(collected, (0..=5).collect::<Vec<_>>());
}

/// Session status for staged-but-uncommitted changes reports a real diff.
#[tokio::test]
async fn session_status_reports_staged_diff() {
    let fixture = fixture_with(vec![], Some("S5")).await;
    let versioning = fixture
        .service
        .versioning_for(&fixture.dialog_id)
        .await
        .unwrap();

    fs::write(fixture.workspace.path().join("x.txt"), "a\n").unwrap();
    versioning.stage_file("x.txt").await.unwrap();
    versioning.create_checkpoint("base").await.unwrap();
    versioning.approve_all(None).await.unwrap();

    fs::write(fixture.workspace.path().join("x.txt"), "b\n").unwrap();
    versioning.stage_file("x.txt").await.unwrap();

    assert!(versioning.has_unapproved().await.unwrap());
    let changes = versioning.session_changed_files(true).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].path, "x.txt");
    assert_eq!(changes[0].additions, 1);
    assert_eq!(changes[0].deletions, 1);
    let diff = changes[0].diff.as_deref().expect("modified files carry a diff");
    assert!(diff.contains("-a"));
    assert!(diff.contains("+b"));
}

/// Ephemeral tools reach the client stream but never persist: no history
/// entry, no stored result.
#[tokio::test]
async fn ephemeral_tool_leaves_no_trace() {
    // Untitled dialog, so set_dialog_title is registered.
    let fixture = fixture_with(
        vec![
            vec![
                tool_call("t1", "set_dialog_title", r#"{"title":"Rename me"}"#),
                done(),
            ],
            vec![text("Named the conversation."), done()],
        ],
        None,
    )
    .await;

    let events = run_turn(&fixture, "hello").await;
    assert_stream_invariants(&events);

    // The client still sees the call happen live.
    assert!(
        events.iter().any(|e| matches!(
            &e.kind,
            AgentEventKind::ToolCall { name, .. } if name == "set_dialog_title"
        )),
        "tool_call event must reach the stream"
    );

    // The title took effect.
    assert_eq!(
        fixture
            .project
            .get_dialog(&fixture.dialog_id)
            .unwrap()
            .title
            .as_deref(),
        Some("Rename me")
    );

    let journal = fixture.service.journal_for(&fixture.dialog_id).await.unwrap();

    // No persisted assistant message references the ephemeral call, and no
    // tool result row exists for it.
    for item in journal.all_messages(&fixture.dialog_id).await.unwrap() {
        for call in item.message.tool_calls() {
            assert_ne!(call.name, "set_dialog_title");
            assert_ne!(call.id, "t1");
        }
        if let Message::ToolResult { tool_call_id, .. } = &item.message {
            assert_ne!(tool_call_id, "t1");
        }
    }
    assert!(journal.get_tool_result("t1").await.unwrap().is_none());
}

/// Every persisted tool-result envelope upholds the reference invariant:
/// slim envelopes resolve in the result store.
#[tokio::test]
async fn persisted_envelopes_resolve_in_result_store() {
    let fixture = fixture_with(
        vec![
            vec![
                tool_call("c1", "write_file", r#"{"path":"f.txt","content":"data"}"#),
                done(),
            ],
            vec![text("stored"), done()],
        ],
        Some("Envelopes"),
    )
    .await;

    run_turn(&fixture, "write f.txt").await;

    let journal = fixture.service.journal_for(&fixture.dialog_id).await.unwrap();
    let mut saw_result = false;
    for item in journal.all_messages(&fixture.dialog_id).await.unwrap() {
        if let Message::ToolResult { envelope, .. } = &item.message {
            saw_result = true;
            assert!(!envelope.has_inline_result);
            let result_ref = envelope.result_ref.as_ref().expect("slim envelope needs a ref");
            let stored = journal
                .get_tool_result(&result_ref.id)
                .await
                .unwrap()
                .expect("reference must resolve");
            assert_eq!(stored.tool_name, envelope.tool_name);
        }
    }
    assert!(saw_result, "turn should have persisted a tool result");
}
