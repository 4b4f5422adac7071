//! Report-directory sandbox for file-writing tools.
//!
//! Every path a tool receives is resolved against one root. Relative paths
//! are joined to it, absolute paths are accepted only when they already point
//! inside it, and `..` components are rejected outright. The final check runs
//! on the canonicalized path, so symlinks cannot lead outside the root.

use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

use super::{DenialReason, ToolError};

/// Default deny patterns for files a report tool has no business creating.
pub const DEFAULT_SANDBOX_DENY_PATTERNS: &[&str] = &[
    "**/.git/**",
    "**/.env",
    "**/.env.*",
    "**/*.pem",
    "**/*.key",
    "**/id_rsa*",
    "**/id_ed25519*",
];

#[must_use]
pub fn default_sandbox_deny_patterns() -> Vec<String> {
    DEFAULT_SANDBOX_DENY_PATTERNS
        .iter()
        .map(std::string::ToString::to_string)
        .collect()
}

#[derive(Debug, Clone)]
struct DenyPattern {
    pattern: String,
    matcher: globset::GlobMatcher,
}

/// Filesystem sandbox rooted at the report directory.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    deny_patterns: Vec<DenyPattern>,
}

impl Sandbox {
    /// Create the root if needed and canonicalize it.
    pub fn new(root: impl AsRef<Path>, denied_patterns: Vec<String>) -> Result<Self, ToolError> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| ToolError::ExecutionFailed {
            tool: "sandbox".to_string(),
            message: format!("cannot create report directory {}: {e}", root.display()),
        })?;
        let canonical = fs::canonicalize(root).map_err(|_e| {
            ToolError::SandboxViolation(DenialReason::PathOutsideSandbox {
                attempted: root.to_path_buf(),
                resolved: root.to_path_buf(),
            })
        })?;

        let mut deny_patterns = Vec::new();
        for pat in denied_patterns {
            let mut builder = globset::GlobBuilder::new(&pat);
            // "Secret.PEM" must not slip past "*.pem".
            builder.case_insensitive(true);
            let glob = builder.build().map_err(|e| ToolError::BadArgs {
                message: format!("Invalid denied pattern '{pat}': {e}"),
            })?;
            deny_patterns.push(DenyPattern {
                pattern: pat,
                matcher: glob.compile_matcher(),
            });
        }

        Ok(Self {
            root: canonical,
            deny_patterns,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path for file creation, allowing missing parent directories.
    pub fn resolve_path_for_create(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.validate_and_resolve(path)?;
        let canonical = canonicalize_for_create(&resolved)?;
        self.check_allowed(&resolved, canonical)
    }

    fn validate_and_resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::BadArgs {
                message: "path must not be empty".to_string(),
            });
        }
        if contains_unsafe_path_chars(path) {
            return Err(ToolError::BadArgs {
                message: "path contains invalid control characters".to_string(),
            });
        }
        let input = PathBuf::from(path);
        if input.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideSandbox {
                    attempted: input.clone(),
                    resolved: input,
                },
            ));
        }
        if input.is_absolute() {
            input
                .strip_prefix(&self.root)
                .map(|rel| self.root.join(rel))
                .map_err(|_| {
                    ToolError::SandboxViolation(DenialReason::PathOutsideSandbox {
                        attempted: input.clone(),
                        resolved: input.clone(),
                    })
                })
        } else {
            Ok(self.root.join(input))
        }
    }

    fn check_allowed(&self, resolved: &Path, canonical: PathBuf) -> Result<PathBuf, ToolError> {
        if !canonical.starts_with(&self.root) || canonical == self.root {
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideSandbox {
                    attempted: resolved.to_path_buf(),
                    resolved: canonical,
                },
            ));
        }
        if let Some(pat) = self.matches_denied_pattern(&canonical) {
            return Err(ToolError::SandboxViolation(
                DenialReason::DeniedPatternMatched {
                    attempted: canonical,
                    pattern: pat,
                },
            ));
        }
        Ok(canonical)
    }

    /// Re-check the parent after `create_dir_all`.
    ///
    /// A directory swapped for a symlink between resolution and the write
    /// would otherwise redirect the write outside the root.
    pub fn validate_created_parent(&self, path: &Path) -> Result<(), ToolError> {
        let parent = path.parent().ok_or_else(|| ToolError::BadArgs {
            message: "path has no parent directory".to_string(),
        })?;

        let mut current = parent.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            if let Ok(meta) = fs::symlink_metadata(&current)
                && meta.file_type().is_symlink()
            {
                return Err(ToolError::SandboxViolation(
                    DenialReason::PathOutsideSandbox {
                        attempted: path.to_path_buf(),
                        resolved: current,
                    },
                ));
            }
            if !current.pop() {
                break;
            }
        }

        let canonical = fs::canonicalize(parent).map_err(|_| {
            ToolError::SandboxViolation(DenialReason::PathOutsideSandbox {
                attempted: path.to_path_buf(),
                resolved: parent.to_path_buf(),
            })
        })?;
        if !canonical.starts_with(&self.root) {
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideSandbox {
                    attempted: path.to_path_buf(),
                    resolved: canonical,
                },
            ));
        }
        Ok(())
    }

    fn matches_denied_pattern(&self, path: &Path) -> Option<String> {
        let normalized = path.to_string_lossy().replace('\\', "/");
        self.deny_patterns
            .iter()
            .find(|pat| pat.matcher.is_match(&normalized))
            .map(|pat| pat.pattern.clone())
    }
}

/// Canonicalize for creation: walk up to the nearest existing ancestor.
fn canonicalize_for_create(resolved: &Path) -> Result<PathBuf, ToolError> {
    let outside = || {
        ToolError::SandboxViolation(DenialReason::PathOutsideSandbox {
            attempted: resolved.to_path_buf(),
            resolved: resolved.to_path_buf(),
        })
    };

    if resolved.exists() {
        return fs::canonicalize(resolved).map_err(|_| outside());
    }

    let mut existing_ancestor = resolved.parent();
    let mut non_existent_parts: Vec<&OsStr> = Vec::new();
    if let Some(file_name) = resolved.file_name() {
        non_existent_parts.push(file_name);
    }
    while let Some(ancestor) = existing_ancestor {
        if ancestor.exists() {
            break;
        }
        if let Some(dir_name) = ancestor.file_name() {
            non_existent_parts.push(dir_name);
        }
        existing_ancestor = ancestor.parent();
    }

    let existing = existing_ancestor.ok_or_else(outside)?;
    let mut result = fs::canonicalize(existing).map_err(|_| outside())?;
    // Collected bottom-up.
    for part in non_existent_parts.into_iter().rev() {
        result.push(part);
    }
    Ok(result)
}

fn contains_unsafe_path_chars(input: &str) -> bool {
    input
        .chars()
        .any(|c| matches!(c, '\u{0000}'..='\u{001f}' | '\u{007f}' | '\u{0080}'..='\u{009f}'))
}
