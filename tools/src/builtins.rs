//! Built-in file tool and the registration entry point for every built-in.

use gatehouse_utils::{AtomicWriteOptions, atomic_write_with_options};
use serde::Deserialize;

use super::config::ToolsConfig;
use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, ToolRegistry, parse_args};
use crate::calculator::{AddTool, MultiplyTool};
use crate::holidays::HolidaysTool;
use crate::publish::PublishTool;
use crate::search::WebSearchTool;

pub const WRITE_FILE_TOOL_NAME: &str = "write_file";

/// Writes a file under the report directory.
#[derive(Debug, Default)]
pub struct WriteFileTool;

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    filename: String,
    content: String,
}

impl ToolExecutor for WriteFileTool {
    fn name(&self) -> &str {
        WRITE_FILE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Write a file to the report directory, creating directories as needed and replacing any existing file"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filename": { "type": "string", "description": "File path relative to the report directory." },
                "content": { "type": "string", "description": "Full file content to write." }
            },
            "required": ["filename", "content"],
            "additionalProperties": false
        })
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: WriteFileArgs = parse_args(&args)?;

            let resolved = ctx.sandbox.resolve_path_for_create(&typed.filename)?;
            if let Some(parent) = resolved.parent()
                && !parent.exists()
            {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ToolError::ExecutionFailed {
                        tool: WRITE_FILE_TOOL_NAME.to_string(),
                        message: format!(
                            "failed to create parent directories for {}: {e}",
                            resolved.display()
                        ),
                    }
                })?;
                ctx.sandbox.validate_created_parent(&resolved)?;
            }

            let bytes = typed.content.into_bytes();
            let byte_len = bytes.len();
            let write_path = resolved.clone();
            let write_result = tokio::task::spawn_blocking(move || {
                atomic_write_with_options(&write_path, &bytes, AtomicWriteOptions::default())
            })
            .await;

            match write_result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    return Err(ToolError::ExecutionFailed {
                        tool: WRITE_FILE_TOOL_NAME.to_string(),
                        message: format!("failed to write {}: {err}", resolved.display()),
                    });
                }
                Err(err) => {
                    return Err(ToolError::ExecutionFailed {
                        tool: WRITE_FILE_TOOL_NAME.to_string(),
                        message: format!("write task failed: {err}"),
                    });
                }
            }

            let shown = resolved
                .strip_prefix(ctx.sandbox.root())
                .unwrap_or(&resolved)
                .display()
                .to_string();
            tracing::info!(path = %resolved.display(), bytes = byte_len, "Wrote report file");
            Ok(format!("Wrote {byte_len} bytes to {shown}"))
        })
    }
}

/// Register every built-in enabled by `config`.
///
/// Fails with [`ToolError::ExecutionFailed`] only for a tool that is enabled
/// but cannot be constructed; missing credentials are reported by the
/// engine's config validation before this runs.
pub fn register_builtins(registry: &mut ToolRegistry, config: &ToolsConfig) -> Result<(), ToolError> {
    registry.register(Box::new(WriteFileTool))?;

    if config.web_search.enabled {
        let api_key = config.web_search.resolved_api_key().unwrap_or_default();
        registry.register(Box::new(WebSearchTool::new(
            config.web_search.clone(),
            api_key,
        )))?;
    }
    if config.publish.enabled {
        let tool = PublishTool::from_config(&config.publish).map_err(|e| {
            ToolError::ExecutionFailed {
                tool: crate::publish::PUBLISH_TOOL_NAME.to_string(),
                message: e.to_string(),
            }
        })?;
        registry.register(Box::new(tool))?;
    }
    if config.holidays.enabled {
        registry.register(Box::new(HolidaysTool::new(config.holidays.clone())))?;
    }
    if config.calculator.enabled {
        registry.register(Box::new(AddTool))?;
        registry.register(Box::new(MultiplyTool))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Sandbox;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn ctx(sandbox: Sandbox) -> ToolCtx {
        ToolCtx {
            sandbox,
            default_timeout: Duration::from_secs(5),
            max_output_bytes: 4096,
            tool_call_id: "call_1".to_string(),
        }
    }

    #[tokio::test]
    async fn writes_nested_file_and_replaces_existing() {
        let temp = tempdir().unwrap();
        let sandbox = Sandbox::new(temp.path().join("report"), vec![]).unwrap();
        let root = sandbox.root().to_path_buf();
        let mut ctx = ctx(sandbox);

        let out = WriteFileTool
            .execute(json!({"filename": "2026/r.html", "content": "<p>one</p>"}), &mut ctx)
            .await
            .unwrap();
        assert!(out.contains("10 bytes"));
        assert_eq!(
            std::fs::read_to_string(root.join("2026/r.html")).unwrap(),
            "<p>one</p>"
        );

        WriteFileTool
            .execute(json!({"filename": "2026/r.html", "content": "two"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(root.join("2026/r.html")).unwrap(), "two");
    }

    #[tokio::test]
    async fn escape_attempt_writes_nothing() {
        let temp = tempdir().unwrap();
        let sandbox = Sandbox::new(temp.path().join("report"), vec![]).unwrap();
        let mut ctx = ctx(sandbox);

        let err = WriteFileTool
            .execute(json!({"filename": "../oops.txt", "content": "x"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));
        assert!(!temp.path().join("oops.txt").exists());
    }

    #[tokio::test]
    async fn missing_content_is_bad_args() {
        let temp = tempdir().unwrap();
        let sandbox = Sandbox::new(temp.path(), vec![]).unwrap();
        let mut ctx = ctx(sandbox);
        let err = WriteFileTool
            .execute(json!({"filename": "a.txt"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }

    #[test]
    fn defaults_register_file_holiday_and_calculator_tools() {
        let mut config = ToolsConfig::default();
        config.web_search.enabled = false;
        let mut registry = ToolRegistry::default();
        register_builtins(&mut registry, &config).unwrap();

        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["add", "get_jp_holidays", "multiply", "write_file"]);
    }
}
