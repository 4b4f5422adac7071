//! Suspend on a tool call, "restart", and resume from the SQLite checkpoint.

use gatehouse_engine::{AgentError, ApprovalDecision, NonEmptyString, Provider, RunOutcome, ThreadId};
use gatehouse_types::{Message, REFUSAL_TEXT};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{CLAUDE_KEY, build_agent, claude_text, claude_tool_use};

async fn mount_write_then_finish(server: &MockServer, final_text: &str) {
    // Mounted first so it wins once the history carries a tool result.
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string_contains("tool_result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(claude_text(final_text)))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", CLAUDE_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(claude_tool_use(
            "I'll save the report.",
            &[(
                "toolu_1",
                "write_file",
                json!({"filename": "summary.md", "content": "# Findings\nRust is fast."}),
            )],
        )))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn approval_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("checkpoints.db");
    let report_dir = dir.path().join("report");
    let server = MockServer::start().await;
    mount_write_then_finish(&server, "Report saved.").await;

    let thread = ThreadId::new("thread-restart").unwrap();
    {
        let agent = build_agent(Provider::Claude, &server, &db, &report_dir);
        let outcome = agent
            .start(&thread, NonEmptyString::new("Research Rust and write a summary").unwrap())
            .await
            .unwrap();
        let RunOutcome::AwaitingApproval(request) = outcome else {
            panic!("expected a pending approval, got {outcome:?}");
        };
        assert_eq!(request.tool_call_id, "toolu_1");
        assert_eq!(request.tool_name, "write_file");
        let text = request.render_text();
        assert!(text.contains("* File name\n  - summary.md"));
        assert!(text.contains("Rust is fast."));
    }
    assert!(!report_dir.join("summary.md").exists());

    let agent = build_agent(Provider::Claude, &server, &db, &report_dir);
    let suspended = agent.list_suspended().unwrap();
    assert_eq!(suspended.len(), 1);
    assert_eq!(suspended[0].thread_id, thread);
    assert_eq!(suspended[0].pending_tool.as_deref(), Some("write_file"));
    assert!(agent.pending_request(&thread).unwrap().is_some());

    let outcome = agent.resume(&thread, ApprovalDecision::Approve).await.unwrap();
    let RunOutcome::Completed(reply) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(reply.content(), "Report saved.");

    let written = std::fs::read_to_string(report_dir.join("summary.md")).unwrap();
    assert_eq!(written, "# Findings\nRust is fast.");

    let state = agent.load(&thread).unwrap().unwrap();
    assert!(state.pending.is_none());
    let results: Vec<_> = state
        .messages
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult(result) => Some(result),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_call_id, "toolu_1");
    assert!(!results[0].is_error);
    assert!(agent.list_suspended().unwrap().is_empty());
}

#[tokio::test]
async fn denial_sends_a_refusal_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("checkpoints.db");
    let report_dir = dir.path().join("report");
    let server = MockServer::start().await;
    mount_write_then_finish(&server, "Understood, I won't save it.").await;

    let thread = ThreadId::new("thread-deny").unwrap();
    let agent = build_agent(Provider::Claude, &server, &db, &report_dir);
    let outcome = agent
        .start(&thread, NonEmptyString::new("Write a summary").unwrap())
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::AwaitingApproval(_)));

    let outcome = agent.resume(&thread, ApprovalDecision::Deny).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert!(!report_dir.join("summary.md").exists());

    let requests = server.received_requests().await.unwrap();
    let second: serde_json::Value = serde_json::from_slice(&requests.last().unwrap().body).unwrap();
    let body = second.to_string();
    assert!(body.contains("toolu_1"));
    assert!(body.contains(REFUSAL_TEXT));
}

#[tokio::test]
async fn resume_without_a_pending_call_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let agent = build_agent(
        Provider::Claude,
        &server,
        &dir.path().join("checkpoints.db"),
        &dir.path().join("report"),
    );

    let thread = ThreadId::new("never-started").unwrap();
    let err = agent.resume(&thread, ApprovalDecision::Approve).await.unwrap_err();
    assert!(matches!(err, AgentError::NoPendingApproval(id) if id == thread));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn transport_failure_is_reported_without_a_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("checkpoints.db");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .expect(1)
        .mount(&server)
        .await;

    let thread = ThreadId::new("thread-500").unwrap();
    let agent = build_agent(Provider::Claude, &server, &db, &dir.path().join("report"));
    let err = agent
        .start(&thread, NonEmptyString::new("hello").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Transport(_)), "{err:?}");
    assert!(err.to_string().contains("500"), "{err}");

    // Nothing reached a checkpoint, so the thread is not left half-suspended.
    assert!(agent.load(&thread).unwrap().is_none());
    assert!(agent.list_suspended().unwrap().is_empty());
}
