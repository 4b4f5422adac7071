//! SNS notification publishing.
//!
//! Calls the SNS query API (`Action=Publish`) directly with a SigV4 signed
//! POST. Credentials are read from the standard `AWS_*` environment
//! variables; nothing else in the AWS credential chain is consulted.

use chrono::{DateTime, Utc};
use gatehouse_providers::{http_client, read_capped_error_body};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use super::config::PublishConfig;
use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args};

pub const PUBLISH_TOOL_NAME: &str = "publish_notification";

pub const TOPIC_ARN_ENV: &str = "AWS_SNS_TOPIC_ARN";

const SNS_API_VERSION: &str = "2010-03-31";
const SERVICE: &str = "sns";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
/// SNS rejects subjects longer than this.
const MAX_SUBJECT_CHARS: usize = 100;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum PublishConfigError {
    #[error("AWS_SNS_TOPIC_ARN is not set and [tools.publish] has no topic_arn")]
    MissingTopicArn,
    #[error("{0} is not set")]
    MissingCredential(&'static str),
    #[error("cannot determine AWS region: set AWS_REGION or [tools.publish] region")]
    MissingRegion,
    #[error("invalid SNS endpoint {url}: {message}")]
    InvalidEndpoint { url: String, message: String },
}

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AwsCredentials {
    pub fn from_env() -> Result<Self, PublishConfigError> {
        Ok(Self {
            access_key_id: env_nonempty("AWS_ACCESS_KEY_ID")
                .ok_or(PublishConfigError::MissingCredential("AWS_ACCESS_KEY_ID"))?,
            secret_access_key: env_nonempty("AWS_SECRET_ACCESS_KEY")
                .ok_or(PublishConfigError::MissingCredential("AWS_SECRET_ACCESS_KEY"))?,
            session_token: env_nonempty("AWS_SESSION_TOKEN"),
        })
    }
}

/// `arn:aws:sns:<region>:<account>:<topic>`
fn region_from_arn(arn: &str) -> Option<&str> {
    let mut parts = arn.split(':');
    let (Some("arn"), Some(_partition), Some("sns"), Some(region)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    (!region.is_empty()).then_some(region)
}

/// Resolve the topic ARN without touching credentials.
pub fn resolve_topic_arn(config: &PublishConfig) -> Result<String, PublishConfigError> {
    config
        .topic_arn
        .clone()
        .map(|arn| arn.trim().to_string())
        .filter(|arn| !arn.is_empty())
        .or_else(|| env_nonempty(TOPIC_ARN_ENV))
        .ok_or(PublishConfigError::MissingTopicArn)
}

#[derive(Debug)]
pub struct PublishTool {
    topic_arn: String,
    region: String,
    endpoint: Url,
    credentials: AwsCredentials,
}

impl PublishTool {
    pub fn new(
        topic_arn: String,
        region: String,
        endpoint: &str,
        credentials: AwsCredentials,
    ) -> Result<Self, PublishConfigError> {
        let endpoint = Url::parse(endpoint).map_err(|e| PublishConfigError::InvalidEndpoint {
            url: endpoint.to_string(),
            message: e.to_string(),
        })?;
        if endpoint.host_str().is_none() {
            return Err(PublishConfigError::InvalidEndpoint {
                url: endpoint.to_string(),
                message: "missing host".to_string(),
            });
        }
        Ok(Self {
            topic_arn,
            region,
            endpoint,
            credentials,
        })
    }

    /// Resolve everything from config and the environment.
    pub fn from_config(config: &PublishConfig) -> Result<Self, PublishConfigError> {
        let topic_arn = resolve_topic_arn(config)?;
        let region = config
            .region
            .clone()
            .or_else(|| env_nonempty("AWS_REGION"))
            .or_else(|| env_nonempty("AWS_DEFAULT_REGION"))
            .or_else(|| region_from_arn(&topic_arn).map(str::to_string))
            .ok_or(PublishConfigError::MissingRegion)?;
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://sns.{region}.amazonaws.com/"));
        let credentials = AwsCredentials::from_env()?;
        Self::new(topic_arn, region, &endpoint, credentials)
    }

    fn host_header(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PublishArgs {
    message: String,
    #[serde(default)]
    subject: Option<String>,
}

fn form_body(topic_arn: &str, args: &PublishArgs) -> String {
    let mut form = url::form_urlencoded::Serializer::new(String::new());
    form.append_pair("Action", "Publish")
        .append_pair("Version", SNS_API_VERSION)
        .append_pair("TopicArn", topic_arn)
        .append_pair("Message", &args.message);
    if let Some(subject) = args.subject.as_deref().filter(|s| !s.trim().is_empty()) {
        let subject: String = subject.chars().take(MAX_SUBJECT_CHARS).collect();
        form.append_pair("Subject", &subject);
    }
    form.finish()
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>, ToolError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| ToolError::ExecutionFailed {
        tool: PUBLISH_TOOL_NAME.to_string(),
        message: format!("signing key rejected: {e}"),
    })?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>, ToolError> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date)?;
    let k_region = hmac_sha256(&k_date, region)?;
    let k_service = hmac_sha256(&k_region, service)?;
    hmac_sha256(&k_service, "aws4_request")
}

/// Headers for a SigV4 signed `POST /` with a form body.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SignedHeaders {
    amz_date: String,
    authorization: String,
}

fn sign_post(
    credentials: &AwsCredentials,
    region: &str,
    host: &str,
    path: &str,
    body: &str,
    now: DateTime<Utc>,
) -> Result<SignedHeaders, ToolError> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let mut canonical_headers = format!(
        "content-type:{FORM_CONTENT_TYPE}\nhost:{host}\nx-amz-date:{amz_date}\n"
    );
    let mut signed_headers = String::from("content-type;host;x-amz-date");
    if let Some(token) = &credentials.session_token {
        canonical_headers.push_str(&format!("x-amz-security-token:{token}\n"));
        signed_headers.push_str(";x-amz-security-token");
    }

    let canonical_path = if path.is_empty() { "/" } else { path };
    let canonical_request = format!(
        "POST\n{canonical_path}\n\n{canonical_headers}\n{signed_headers}\n{}",
        sha256_hex(body.as_bytes())
    );

    let scope = format!("{date}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(&credentials.secret_access_key, &date, region, SERVICE)?;
    let signature = hex::encode(hmac_sha256(&key, &string_to_sign)?);

    Ok(SignedHeaders {
        amz_date,
        authorization: format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        ),
    })
}

/// Pull `<Tag>value</Tag>` out of an SNS XML reply.
fn xml_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim())
}

impl ToolExecutor for PublishTool {
    fn name(&self) -> &str {
        PUBLISH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Publish a notification message to the configured SNS topic."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "minLength": 1, "description": "Notification body." },
                "subject": { "type": "string", "description": "Optional subject line (email subscribers)." }
            },
            "required": ["message"],
            "additionalProperties": false
        })
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PublishArgs = parse_args(&args)?;
            let failed = |message: String| ToolError::ExecutionFailed {
                tool: PUBLISH_TOOL_NAME.to_string(),
                message,
            };

            let body = form_body(&self.topic_arn, &typed);
            let signed = sign_post(
                &self.credentials,
                &self.region,
                &self.host_header(),
                self.endpoint.path(),
                &body,
                Utc::now(),
            )?;

            let mut request = http_client()
                .post(self.endpoint.clone())
                .timeout(ctx.default_timeout)
                .header("content-type", FORM_CONTENT_TYPE)
                .header("x-amz-date", &signed.amz_date)
                .header("authorization", &signed.authorization);
            if let Some(token) = &self.credentials.session_token {
                request = request.header("x-amz-security-token", token);
            }

            let response = request
                .body(body)
                .send()
                .await
                .map_err(|e| failed(format!("request failed: {e}")))?;
            let status = response.status();
            if !status.is_success() {
                let text = read_capped_error_body(response).await;
                let detail = xml_text(&text, "Message").unwrap_or(&text);
                return Err(failed(format!("HTTP {}: {detail}", status.as_u16())));
            }

            let text = response
                .text()
                .await
                .map_err(|e| failed(format!("invalid response: {e}")))?;
            let message_id = xml_text(&text, "MessageId").unwrap_or("unknown");
            tracing::info!(message_id, "Published SNS notification");
            Ok(format!("Published notification (MessageId: {message_id})"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Sandbox;
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::tempdir;
    use wiremock::matchers::{body_string_contains, header, header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds(token: Option<&str>) -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: token.map(str::to_string),
        }
    }

    #[test]
    fn derives_documented_signing_key() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn authorization_header_shape() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let signed = sign_post(
            &creds(None),
            "ap-northeast-1",
            "sns.ap-northeast-1.amazonaws.com",
            "/",
            "Action=Publish",
            now,
        )
        .unwrap();

        assert_eq!(signed.amz_date, "20260102T030405Z");
        let prefix = "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260102/ap-northeast-1/sns/aws4_request, SignedHeaders=content-type;host;x-amz-date, Signature=";
        assert!(signed.authorization.starts_with(prefix));
        let signature = &signed.authorization[prefix.len()..];
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        let again = sign_post(
            &creds(None),
            "ap-northeast-1",
            "sns.ap-northeast-1.amazonaws.com",
            "/",
            "Action=Publish",
            now,
        )
        .unwrap();
        assert_eq!(signed, again);
    }

    #[test]
    fn signature_matches_known_answer() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let body = "Action=Publish&Version=2010-03-31\
                    &TopicArn=arn%3Aaws%3Asns%3Aap-northeast-1%3A123456789012%3Aalerts&Message=hello";
        let host = "sns.ap-northeast-1.amazonaws.com";

        let signed = sign_post(&creds(None), "ap-northeast-1", host, "/", body, now).unwrap();
        assert_eq!(
            signed.authorization,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260102/ap-northeast-1/sns/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date, \
             Signature=79373e34503bf15546a8a532a5dc04cd5ed840d707e162ecd6f816b831a04b8a"
        );

        let with_token = sign_post(&creds(Some("tok")), "ap-northeast-1", host, "/", body, now).unwrap();
        assert!(
            with_token
                .authorization
                .ends_with("Signature=cea039ced74fd9df07eb3880b9e1077a19311d702c424ebaa832d845f38e4e15")
        );
    }

    #[test]
    fn session_token_is_signed() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let signed = sign_post(&creds(Some("tok")), "us-east-1", "h", "/", "", now).unwrap();
        assert!(
            signed
                .authorization
                .contains("SignedHeaders=content-type;host;x-amz-date;x-amz-security-token")
        );
    }

    #[test]
    fn region_comes_from_arn() {
        assert_eq!(
            region_from_arn("arn:aws:sns:ap-northeast-1:123456789012:alerts"),
            Some("ap-northeast-1")
        );
        assert_eq!(region_from_arn("arn:aws:sqs:us-east-1:1:q"), None);
        assert_eq!(region_from_arn("not-an-arn"), None);
    }

    #[test]
    fn explicit_topic_arn_wins() {
        let config = PublishConfig {
            enabled: true,
            topic_arn: Some(" arn:aws:sns:us-east-1:1:t ".into()),
            ..PublishConfig::default()
        };
        assert_eq!(resolve_topic_arn(&config).unwrap(), "arn:aws:sns:us-east-1:1:t");
    }

    #[test]
    fn form_body_encodes_fields_and_caps_subject() {
        let args = PublishArgs {
            message: "done & dusted".into(),
            subject: Some("s".repeat(150)),
        };
        let body = form_body("arn:aws:sns:us-east-1:1:t", &args);
        assert!(body.starts_with("Action=Publish&Version=2010-03-31&TopicArn=arn%3Aaws%3Asns"));
        assert!(body.contains("Message=done+%26+dusted"));
        assert!(body.contains(&format!("Subject={}", "s".repeat(100))));
        assert!(!body.contains(&"s".repeat(101)));
    }

    #[test]
    fn debug_redacts_secrets() {
        let shown = format!("{:?}", creds(Some("tok")));
        assert!(!shown.contains("EXAMPLEKEY"));
        assert!(!shown.contains("tok\""));
    }

    #[tokio::test]
    async fn publishes_to_mock_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", FORM_CONTENT_TYPE))
            .and(header_exists("x-amz-date"))
            .and(header_exists("authorization"))
            .and(body_string_contains("Action=Publish"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<PublishResponse><PublishResult><MessageId>abc-123</MessageId></PublishResult></PublishResponse>",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let tool = PublishTool::new(
            "arn:aws:sns:us-east-1:1:t".into(),
            "us-east-1".into(),
            &format!("{}/", server.uri()),
            creds(None),
        )
        .unwrap();
        let temp = tempdir().unwrap();
        let mut ctx = ToolCtx {
            sandbox: Sandbox::new(temp.path(), vec![]).unwrap(),
            default_timeout: Duration::from_secs(5),
            max_output_bytes: 4096,
            tool_call_id: "c".into(),
        };
        let out = tool
            .execute(json!({"message": "report ready"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out, "Published notification (MessageId: abc-123)");
    }

    #[tokio::test]
    async fn sns_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "<ErrorResponse><Error><Code>AuthorizationError</Code><Message>not allowed</Message></Error></ErrorResponse>",
            ))
            .mount(&server)
            .await;

        let tool = PublishTool::new(
            "arn:aws:sns:us-east-1:1:t".into(),
            "us-east-1".into(),
            &server.uri(),
            creds(None),
        )
        .unwrap();
        let temp = tempdir().unwrap();
        let mut ctx = ToolCtx {
            sandbox: Sandbox::new(temp.path(), vec![]).unwrap(),
            default_timeout: Duration::from_secs(5),
            max_output_bytes: 4096,
            tool_call_id: "c".into(),
        };
        let err = tool
            .execute(json!({"message": "x"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::ExecutionFailed { message, .. } if message == "HTTP 403: not allowed"
        ));
    }
}
