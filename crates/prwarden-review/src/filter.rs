//! Optional pre-review filtering of changed files.
//!
//! The pipeline reviews every listed file unless a [`FileFilter`] is
//! attached. When one is, files matching an ignore pattern or carrying
//! more changed lines than allowed are dropped before truncation.

use prwarden_core::{ChangedFile, ReviewConfig};

/// Why a file was left out of the review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Path matched a configured glob.
    PatternMatch(String),
    /// Patch exceeds `max_changes_per_file`.
    TooManyChanges { changed: usize, limit: usize },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PatternMatch(p) => write!(f, "matches ignore pattern '{p}'"),
            Self::TooManyChanges { changed, limit } => {
                write!(f, "{changed} changed lines exceeds limit of {limit}")
            }
        }
    }
}

/// A file removed by the filter.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

/// Result of filtering: files to review plus what was dropped.
#[derive(Debug, Default)]
pub struct FilterResult {
    pub kept: Vec<ChangedFile>,
    pub skipped: Vec<SkippedFile>,
}

/// Ignore-pattern and size filter built from review configuration.
///
/// # Examples
///
/// ```
/// use prwarden_core::ReviewConfig;
/// use prwarden_review::filter::FileFilter;
///
/// let filter = FileFilter::from_config(&ReviewConfig::default());
/// assert!(filter.should_skip("Cargo.lock"));
/// assert!(filter.should_skip("docs/README.md"));
/// assert!(!filter.should_skip("src/main.rs"));
/// ```
pub struct FileFilter {
    patterns: Vec<glob::Pattern>,
    max_changes: usize,
}

impl FileFilter {
    /// Build a filter; invalid glob patterns are logged and ignored.
    pub fn from_config(config: &ReviewConfig) -> Self {
        let mut patterns = Vec::new();
        for pat in &config.ignore_patterns {
            match glob::Pattern::new(pat) {
                Ok(p) => patterns.push(p),
                Err(e) => tracing::warn!(pattern = %pat, error = %e, "ignoring invalid glob"),
            }
        }
        Self {
            patterns,
            max_changes: config.max_changes_per_file,
        }
    }

    /// Check a path against the ignore patterns only.
    pub fn should_skip(&self, path: &str) -> bool {
        self.matching_pattern(path).is_some()
    }

    fn matching_pattern(&self, path: &str) -> Option<&glob::Pattern> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        self.patterns
            .iter()
            .find(|p| p.matches(path) || p.matches(file_name))
    }

    /// Split files into reviewable and skipped, preserving order.
    pub fn filter(&self, files: Vec<ChangedFile>) -> FilterResult {
        let mut result = FilterResult::default();
        for file in files {
            let reason = if let Some(pat) = self.matching_pattern(&file.path) {
                Some(SkipReason::PatternMatch(pat.to_string()))
            } else {
                let changed = file.changed_lines();
                (changed > self.max_changes).then_some(SkipReason::TooManyChanges {
                    changed,
                    limit: self.max_changes,
                })
            };
            match reason {
                Some(reason) => result.skipped.push(SkippedFile {
                    path: file.path,
                    reason,
                }),
                None => result.kept.push(file),
            }
        }
        result
    }
}
