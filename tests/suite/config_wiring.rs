//! From a config file to a finished run, wired the way the binary does it.

use std::sync::Arc;

use gatehouse_engine::gatehouse_tools::builtins::register_builtins;
use gatehouse_engine::{
    Agent, AgentSettings, GatehouseConfig, HttpModelClient, NonEmptyString, Provider, RunOutcome,
    SqliteCheckpointStore, ThreadId, ToolRegistry,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::claude_text;

#[tokio::test]
async fn config_file_drives_a_complete_run() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-from-config"))
        .and(body_partial_json(serde_json::json!({
            "system": "Answer in one line.",
            "max_tokens": 512
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(claude_text("Hello there.")))
        .expect(1)
        .mount(&server)
        .await;

    let checkpoint = dir.path().join("state").join("checkpoints.db");
    let report_dir = dir.path().join("report");
    let config_path = dir.path().join("config.toml");
    std::fs::create_dir_all(checkpoint.parent().unwrap()).unwrap();
    std::fs::write(
        &config_path,
        format!(
            r#"
[app]
provider = "claude"
system_prompt = "Answer in one line."
ascii_only = true

[api_keys]
anthropic = "sk-ant-from-config"

[agent]
max_output_tokens = 512
endpoint = "{endpoint}/v1/messages"

[storage]
checkpoint_path = "{checkpoint}"

[tools]
report_dir = "{report}"

[tools.web_search]
enabled = false

[tools.holidays]
enabled = false
"#,
            endpoint = server.uri(),
            checkpoint = checkpoint.display(),
            report = report_dir.display(),
        ),
    )
    .unwrap();

    let config = GatehouseConfig::load_from(config_path).unwrap();
    assert!(config.app.as_ref().is_some_and(|app| app.ascii_only));
    let runtime = config.resolve().unwrap();
    assert_eq!(runtime.api.provider(), Provider::Claude);
    assert_eq!(runtime.checkpoint_path, checkpoint);

    let mut registry = ToolRegistry::default();
    register_builtins(&mut registry, &runtime.tools).unwrap();
    let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
    assert!(names.contains(&"write_file".to_string()));
    assert!(!names.contains(&"web_search".to_string()));

    let settings = AgentSettings::from_runtime(&runtime).unwrap();
    assert!(report_dir.is_dir());
    let agent = Agent::new(
        Arc::new(HttpModelClient::new(runtime.api.clone(), runtime.retry.clone())),
        Arc::new(registry),
        Arc::new(SqliteCheckpointStore::open(&runtime.checkpoint_path).unwrap()),
        settings,
    );

    let thread = ThreadId::generate();
    let outcome = agent
        .start(&thread, NonEmptyString::new("Say hello").unwrap())
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(ref reply) if reply.content() == "Hello there."));
    assert!(checkpoint.exists());
    assert_eq!(agent.load(&thread).unwrap().unwrap().messages.len(), 2);
}
