//! Japanese public holiday lookup.

use std::collections::BTreeMap;

use gatehouse_providers::{http_client, read_capped_error_body};
use serde::Deserialize;
use serde_json::json;

use super::config::HolidaysConfig;
use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args, sanitize_output};

pub const HOLIDAYS_TOOL_NAME: &str = "get_jp_holidays";

#[derive(Debug)]
pub struct HolidaysTool {
    config: HolidaysConfig,
}

impl HolidaysTool {
    #[must_use]
    pub fn new(config: HolidaysConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Deserialize)]
struct HolidaysArgs {
    year: u32,
}

/// `date -> name` entries for `year`, in date order.
fn filter_year(calendar: &BTreeMap<String, String>, year: u32) -> Vec<(&str, &str)> {
    let prefix = format!("{year}-");
    calendar
        .iter()
        .filter(|(date, _)| date.starts_with(&prefix))
        .map(|(date, name)| (date.as_str(), name.as_str()))
        .collect()
}

impl ToolExecutor for HolidaysTool {
    fn name(&self) -> &str {
        HOLIDAYS_TOOL_NAME
    }

    fn description(&self) -> &str {
        "List the public holidays in Japan for a given year."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "year": { "type": "integer", "minimum": 1955, "maximum": 9999 }
            },
            "required": ["year"],
            "additionalProperties": false
        })
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: HolidaysArgs = parse_args(&args)?;
            let failed = |message: String| ToolError::ExecutionFailed {
                tool: HOLIDAYS_TOOL_NAME.to_string(),
                message,
            };

            let response = http_client()
                .get(&self.config.endpoint)
                .timeout(ctx.default_timeout)
                .send()
                .await
                .map_err(|e| failed(format!("request failed: {e}")))?;
            let status = response.status();
            if !status.is_success() {
                let body = read_capped_error_body(response).await;
                return Err(failed(format!("HTTP {}: {body}", status.as_u16())));
            }
            let calendar: BTreeMap<String, String> = response
                .json()
                .await
                .map_err(|e| failed(format!("invalid calendar: {e}")))?;

            let entries = filter_year(&calendar, typed.year);
            if entries.is_empty() {
                return Ok(format!("No holidays found for {}.", typed.year));
            }
            let body = entries
                .iter()
                .map(|(date, name)| format!("{date} {name}"))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(sanitize_output(&body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Sandbox;
    use std::time::Duration;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn filters_by_year_prefix_in_date_order() {
        let calendar: BTreeMap<String, String> = [
            ("2026-01-12", "成人の日"),
            ("2025-01-01", "元日"),
            ("2026-01-01", "元日"),
            ("20260-01-01", "bogus"),
        ]
        .into_iter()
        .map(|(d, n)| (d.to_string(), n.to_string()))
        .collect();

        assert_eq!(
            filter_year(&calendar, 2026),
            [("2026-01-01", "元日"), ("2026-01-12", "成人の日")]
        );
    }

    #[tokio::test]
    async fn fetches_and_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/date.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "2025-12-31": "x",
                "2026-02-11": "建国記念の日",
                "2026-01-01": "元日"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let tool = HolidaysTool::new(HolidaysConfig {
            enabled: true,
            endpoint: format!("{}/api/v1/date.json", server.uri()),
        });
        let temp = tempdir().unwrap();
        let mut ctx = ToolCtx {
            sandbox: Sandbox::new(temp.path(), vec![]).unwrap(),
            default_timeout: Duration::from_secs(5),
            max_output_bytes: 4096,
            tool_call_id: "c".into(),
        };
        let out = tool.execute(json!({"year": 2026}), &mut ctx).await.unwrap();
        assert_eq!(out, "2026-01-01 元日\n2026-02-11 建国記念の日");

        let none = tool.execute(json!({"year": 1999}), &mut ctx).await.unwrap();
        assert_eq!(none, "No holidays found for 1999.");
    }
}
