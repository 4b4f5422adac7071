//! Secret redaction for display and log text.
//!
//! Two layers run on every string passed to [`redact`]:
//!
//! - pattern redaction for well-known credential shapes (Anthropic, OpenAI,
//!   Tavily, AWS)
//! - value redaction for whatever secrets are actually present in the
//!   environment (`*_KEY`, `*_TOKEN`, `*_SECRET`, ...), matched with a single
//!   Aho-Corasick automaton
//!
//! Terminal escape sequences are stripped first, so a secret cannot be split
//! by control characters and reassembled on screen.

use std::borrow::Cow;
use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use gatehouse_types::sanitize_terminal_text;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;

/// Env var names whose values are treated as secrets.
const CREDENTIAL_VAR_PATTERNS: &[&str] = &[
    "*_KEY",
    "*_API_KEY",
    "*_TOKEN",
    "*_SECRET",
    "*_SECRET_*",
    "*_PASSWORD",
    "*_CREDENTIALS",
];

/// Shorter values ("true", "1", region names) are not worth redacting.
const MIN_SECRET_LENGTH: usize = 16;

const REDACTED: &str = "[REDACTED]";

/// Redactor built from the secrets present in the environment.
pub struct SecretRedactor {
    secrets: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl std::fmt::Debug for SecretRedactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRedactor")
            .field("secret_count", &self.secrets.len())
            .finish_non_exhaustive()
    }
}

impl SecretRedactor {
    #[must_use]
    pub fn from_env() -> Self {
        let matcher = var_name_matcher();
        let values = std::env::vars()
            .filter(|(name, _)| matcher.as_ref().is_some_and(|m| m.is_match(name)))
            .map(|(_, value)| value);
        Self::from_values(values)
    }

    /// Build from explicit secret values.
    #[must_use]
    pub fn from_values(values: impl IntoIterator<Item = String>) -> Self {
        let mut secrets: Vec<String> = values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| v.len() >= MIN_SECRET_LENGTH)
            .filter(|v| !looks_like_url(v))
            .collect();

        // Longest first so the fallback path never leaves a suffix behind.
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();

        let automaton = if secrets.is_empty() {
            None
        } else {
            match AhoCorasickBuilder::new()
                .match_kind(MatchKind::LeftmostLongest)
                .build(&secrets)
            {
                Ok(ac) => Some(ac),
                Err(e) => {
                    tracing::warn!("SecretRedactor automaton build failed; using fallback ({e})");
                    None
                }
            }
        };

        tracing::debug!(secret_count = secrets.len(), "SecretRedactor initialized");
        Self { secrets, automaton }
    }

    #[must_use]
    pub fn redact<'a>(&self, input: &'a str) -> Cow<'a, str> {
        if self.secrets.is_empty() {
            return Cow::Borrowed(input);
        }

        if let Some(ac) = &self.automaton {
            if !ac.is_match(input) {
                return Cow::Borrowed(input);
            }
            return Cow::Owned(ac.replace_all(input, &vec![REDACTED; self.secrets.len()]));
        }

        let mut output = Cow::Borrowed(input);
        for secret in &self.secrets {
            if output.contains(secret.as_str()) {
                output = Cow::Owned(output.replace(secret.as_str(), REDACTED));
            }
        }
        output
    }
}

fn var_name_matcher() -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in CREDENTIAL_VAR_PATTERNS {
        if let Ok(glob) = GlobBuilder::new(pattern).case_insensitive(true).build() {
            builder.add(glob);
        }
    }
    builder.build().ok()
}

/// Plain endpoints such as `AWS_SNS_TOPIC_ARN`-adjacent URLs are not secrets,
/// unless they carry userinfo.
fn looks_like_url(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let authority = rest.split('/').next().unwrap_or(rest);
            !authority.contains('@') && !lower.contains("key=") && !lower.contains("token=")
        }
        None => false,
    }
}

static SECRET_REDACTOR: OnceLock<SecretRedactor> = OnceLock::new();

/// Process-wide redactor, built on first use.
pub fn secret_redactor() -> &'static SecretRedactor {
    SECRET_REDACTOR.get_or_init(SecretRedactor::from_env)
}

/// Make untrusted text safe to show: strip terminal controls, then redact
/// credential patterns and environment secrets.
#[must_use]
pub fn redact(input: &str) -> String {
    let clean = sanitize_terminal_text(input);
    let patterned = redact_api_keys(clean.as_ref());
    match secret_redactor().redact(&patterned) {
        Cow::Borrowed(_) => patterned,
        Cow::Owned(v) => v,
    }
}

/// Redact well-known credential formats.
///
/// - Anthropic `sk-ant-...` → `sk-ant-***`
/// - OpenAI `sk-...` → `sk-***`
/// - Tavily `tvly-...` → `tvly-***`
/// - AWS access key ids `AKIA...`/`ASIA...` → `<prefix>***`
/// - `aws_secret_access_key = ...` assignments
/// - `Bearer <token>` headers
#[must_use]
pub fn redact_api_keys(raw: &str) -> String {
    let Some(patterns) = patterns() else {
        return raw.to_string();
    };
    let mut output = raw.to_string();
    for (re, replacement) in patterns {
        if re.is_match(&output) {
            output = re.replace_all(&output, *replacement).into_owned();
        }
    }
    output
}

static PATTERNS: OnceLock<Option<Vec<(Regex, &'static str)>>> = OnceLock::new();

fn patterns() -> Option<&'static [(Regex, &'static str)]> {
    PATTERNS
        .get_or_init(|| {
            // Order matters: `sk-ant-` before `sk-`, secret assignment before key id.
            let table: [(&str, &'static str); 6] = [
                (r"sk-ant-[A-Za-z0-9_-]+", "sk-ant-***"),
                (r"sk-(?:proj-)?[A-Za-z0-9_-]{20,}", "sk-***"),
                (r"tvly-[A-Za-z0-9_-]{8,}", "tvly-***"),
                (
                    r"(?i)\b(aws_secret_access_key)(\s*[:=]\s*)[A-Za-z0-9/+=]{40}\b",
                    "$1$2[REDACTED]",
                ),
                (r"\b(AKIA|ASIA)[A-Z0-9]{16}\b", "$1***"),
                (r"(?i)\b(Bearer)(\s+)[A-Za-z0-9._~+/=-]{16,}", "$1$2[REDACTED]"),
            ];
            table
                .into_iter()
                .map(|(pattern, replacement)| Regex::new(pattern).map(|re| (re, replacement)))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| tracing::warn!("credential pattern failed to compile: {e}"))
                .ok()
        })
        .as_deref()
}
