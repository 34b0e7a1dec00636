use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

/// A repository identifier in `owner/name` form.
///
/// # Examples
///
/// ```
/// use prwarden_core::RepoId;
///
/// let repo: RepoId = "rust-lang/rust".parse().unwrap();
/// assert_eq!(repo.owner, "rust-lang");
/// assert_eq!(repo.name, "rust");
/// assert_eq!(repo.to_string(), "rust-lang/rust");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    /// Account or organization that owns the repository.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl FromStr for RepoId {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ReviewError::Configuration(format!(
                "invalid repository '{s}', expected owner/name"
            ))
        };
        let (owner, name) = s.trim().split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Read-only snapshot of a pull request, fetched once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequestSummary {
    pub title: String,
    /// Pull request body; empty when the author left none.
    pub description: String,
    /// Changed file paths in host order.
    pub files: Vec<String>,
    pub base_ref: String,
    pub head_ref: String,
    /// Commit at the tip of the head ref; file content is read here.
    pub head_sha: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A file touched by the pull request.
///
/// # Examples
///
/// ```
/// use prwarden_core::ChangedFile;
///
/// let file = ChangedFile::new("src/lib.rs", "@@ -1 +1 @@\n-a\n+b\n");
/// assert_eq!(file.changed_lines(), 2);
/// assert!(file.content.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Path relative to the repository root.
    pub path: String,
    /// Unified diff for this file; empty for binary or oversized changes.
    pub patch: String,
    /// Full content at the head ref, once fetched.
    pub content: Option<String>,
}

impl ChangedFile {
    pub fn new(path: impl Into<String>, patch: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            patch: patch.into(),
            content: None,
        }
    }

    /// Count of added and removed lines in the patch.
    ///
    /// `---`/`+++` file headers are only recognized before the first `@@`
    /// hunk; inside a hunk they are ordinary edits such as a removed `-- x`
    /// SQL comment.
    pub fn changed_lines(&self) -> usize {
        let mut in_hunk = false;
        self.patch
            .lines()
            .filter(|l| {
                if l.starts_with("@@") {
                    in_hunk = true;
                    return false;
                }
                let is_header = l.starts_with("+++") || l.starts_with("---");
                (l.starts_with('+') || l.starts_with('-')) && (in_hunk || !is_header)
            })
            .count()
    }
}

/// Whether a finding carries model output or an error description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    Reviewed,
    Failed,
}

/// The per-file analysis result. One exists for every attempted file.
///
/// # Examples
///
/// ```
/// use prwarden_core::{FileFinding, FindingStatus};
///
/// let finding = FileFinding::failed("src/main.rs", "timed out");
/// assert_eq!(finding.status, FindingStatus::Failed);
/// assert!(finding.analysis.contains("timed out"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFinding {
    pub path: String,
    /// Model commentary, or a human-readable error description.
    pub analysis: String,
    pub status: FindingStatus,
    pub timestamp: DateTime<Utc>,
}

impl FileFinding {
    pub fn reviewed(path: impl Into<String>, analysis: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            analysis: analysis.into(),
            status: FindingStatus::Reviewed,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            analysis: format!("Error analyzing file: {reason}"),
            status: FindingStatus::Failed,
            timestamp: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == FindingStatus::Failed
    }
}
