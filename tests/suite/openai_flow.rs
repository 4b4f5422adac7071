//! A mixed batch through the OpenAI Responses API: one call approved, one denied.

use gatehouse_engine::{AgentEvent, ApprovalDecision, NonEmptyString, Provider, RunOutcome, ThreadId};
use gatehouse_types::{Message, REFUSAL_TEXT};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{OPENAI_KEY, build_agent, openai_function_calls, openai_text};

async fn mount_mixed_batch(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(body_string_contains("function_call_output"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_text("2 + 3 = 5.")))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(header("authorization", format!("Bearer {OPENAI_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_function_calls(&[
            ("call_add", "add", json!({"a": 2, "b": 3})),
            ("call_write", "write_file", json!({"filename": "sum.txt", "content": "5"})),
        ])))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn approved_and_denied_calls_both_answer_before_the_next_model_call() {
    let dir = tempfile::tempdir().unwrap();
    let report_dir = dir.path().join("report");
    let server = MockServer::start().await;
    mount_mixed_batch(&server).await;

    let (tx, mut rx) = mpsc::channel(64);
    let agent = build_agent(Provider::OpenAI, &server, &dir.path().join("cp.db"), &report_dir).with_events(tx);
    let thread = ThreadId::new("openai-mixed").unwrap();

    let first = agent
        .start(&thread, NonEmptyString::new("Add 2 and 3, then save it").unwrap())
        .await
        .unwrap();
    let RunOutcome::AwaitingApproval(request) = first else {
        panic!("expected approval for add, got {first:?}");
    };
    assert_eq!(request.tool_name, "add");

    let second = agent.resume(&thread, ApprovalDecision::Approve).await.unwrap();
    let RunOutcome::AwaitingApproval(request) = second else {
        panic!("expected approval for write_file, got {second:?}");
    };
    assert_eq!(request.tool_call_id, "call_write");

    let done = agent.resume(&thread, ApprovalDecision::Deny).await.unwrap();
    let RunOutcome::Completed(reply) = done else {
        panic!("expected completion, got {done:?}");
    };
    assert_eq!(reply.content(), "2 + 3 = 5.");
    assert!(!report_dir.join("sum.txt").exists());

    // Both outputs, in call order, went back with the second request.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let outputs: Vec<&Value> = body["input"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|item| item["type"] == "function_call_output")
        .collect();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0]["call_id"], "call_add");
    assert_eq!(outputs[0]["output"], "5");
    assert_eq!(outputs[1]["call_id"], "call_write");
    assert_eq!(outputs[1]["output"], REFUSAL_TEXT);

    let state = agent.load(&thread).unwrap().unwrap();
    let result_count = state
        .messages
        .iter()
        .filter(|m| matches!(m, Message::ToolResult(_)))
        .count();
    assert_eq!(result_count, 2);

    let mut started = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::ToolStarted { call, .. } = event {
            started.push(call.name);
        }
    }
    assert_eq!(started, vec!["add".to_string()]);
}
