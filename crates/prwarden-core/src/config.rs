use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

/// Top-level configuration loaded from `.prwarden.toml`.
///
/// Every section falls back to its defaults, so an empty file is valid.
///
/// # Examples
///
/// ```
/// use prwarden_core::WardenConfig;
///
/// let config = WardenConfig::default();
/// assert_eq!(config.review.batch_size, 5);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Review behavior settings.
    #[serde(default)]
    pub review: ReviewConfig,
    /// Completion endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Repository host settings.
    #[serde(default)]
    pub github: GitHubConfig,
}

impl WardenConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::Io`] if the file cannot be read,
    /// [`ReviewError::Toml`] if the content is not valid TOML, or
    /// [`ReviewError::Configuration`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use prwarden_core::WardenConfig;
    /// use std::path::Path;
    ///
    /// let config = WardenConfig::from_file(Path::new(".prwarden.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, ReviewError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::Toml`] if parsing fails, or
    /// [`ReviewError::Configuration`] if validation fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use prwarden_core::WardenConfig;
    ///
    /// let toml = r#"
    /// [review]
    /// batch_size = 3
    /// "#;
    /// let config = WardenConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.review.batch_size, 3);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, ReviewError> {
        let config: Self = toml::from_str(content)?;
        config.review.validate()?;
        if config.github.max_concurrent_requests == 0 {
            return Err(ReviewError::Configuration(
                "github.max_concurrent_requests must be at least 1".into(),
            ));
        }
        Ok(config)
    }
}

/// Immutable review settings shared read-only by every file task.
///
/// # Examples
///
/// ```
/// use prwarden_core::ReviewConfig;
///
/// let config = ReviewConfig::default();
/// assert_eq!(config.max_files_to_review, 50);
/// assert_eq!(config.max_changes_per_file, 500);
/// assert_eq!(config.model, "gpt-4");
/// assert_eq!(config.batch_size, 5);
/// assert!(config.ignore_patterns.contains("*.lock"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Files beyond this count are not reviewed (default: 50).
    #[serde(default = "default_max_files")]
    pub max_files_to_review: usize,
    /// Upper bound on changed lines for the optional upstream filter (default: 500).
    #[serde(default = "default_max_changes")]
    pub max_changes_per_file: usize,
    /// Completion model identifier (default: `"gpt-4"`).
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature (default: 0.3).
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Files analyzed concurrently per batch (default: 5).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Focus areas requested from the model, in prompt order.
    #[serde(default = "default_categories")]
    pub review_categories: Vec<String>,
    /// Extra rules per file extension (`"py"`, `"rs"`, ...).
    #[serde(default = "default_language_rules")]
    pub language_rules: HashMap<String, Vec<String>>,
    /// Glob patterns for the optional upstream filter.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: BTreeSet<String>,
    /// Per-file deadline in seconds; elapsed files get an error finding.
    #[serde(default)]
    pub file_timeout_secs: Option<u64>,
    /// Append the head-ref file content to each prompt.
    #[serde(default)]
    pub include_file_content: bool,
}

fn default_max_files() -> usize {
    50
}

fn default_max_changes() -> usize {
    500
}

fn default_model() -> String {
    "gpt-4".into()
}

fn default_temperature() -> f64 {
    0.3
}

fn default_batch_size() -> usize {
    5
}

fn default_categories() -> Vec<String> {
    [
        "code_quality",
        "security",
        "performance",
        "maintainability",
        "testing",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_language_rules() -> HashMap<String, Vec<String>> {
    let rules: [(&str, &[&str]); 4] = [
        (
            "py",
            &[
                "PEP 8 compliance",
                "Type hints",
                "Docstrings",
                "Error handling",
                "Code complexity",
            ],
        ),
        (
            "js",
            &[
                "ESLint rules",
                "Modern ES6+ features",
                "Error handling",
                "Code organization",
            ],
        ),
        (
            "ts",
            &[
                "Strict typing without `any`",
                "Error handling",
                "Code organization",
            ],
        ),
        (
            "rs",
            &[
                "No unwrap or expect outside tests",
                "Error propagation with ?",
                "Ownership and borrowing clarity",
            ],
        ),
    ];
    rules
        .into_iter()
        .map(|(ext, list)| {
            (
                ext.to_string(),
                list.iter().map(|r| r.to_string()).collect(),
            )
        })
        .collect()
}

fn default_ignore_patterns() -> BTreeSet<String> {
    ["*.lock", "*.md", "*.txt"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_files_to_review: default_max_files(),
            max_changes_per_file: default_max_changes(),
            model: default_model(),
            temperature: default_temperature(),
            batch_size: default_batch_size(),
            review_categories: default_categories(),
            language_rules: default_language_rules(),
            ignore_patterns: default_ignore_patterns(),
            file_timeout_secs: None,
            include_file_content: false,
        }
    }
}

impl ReviewConfig {
    /// Check the invariants every run relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::Configuration`] if `batch_size` is zero or
    /// `temperature` is outside `0.0..=2.0`.
    ///
    /// # Examples
    ///
    /// ```
    /// use prwarden_core::ReviewConfig;
    ///
    /// let config = ReviewConfig { batch_size: 0, ..ReviewConfig::default() };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ReviewError> {
        if self.batch_size == 0 {
            return Err(ReviewError::Configuration(
                "review.batch_size must be at least 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ReviewError::Configuration(format!(
                "review.temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    /// Rules registered for a language key, or an empty slice.
    pub fn rules_for(&self, language: &str) -> &[String] {
        self.language_rules
            .get(language)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Completion endpoint configuration.
///
/// # Examples
///
/// ```
/// use prwarden_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert!(config.base_url.is_none());
/// assert_eq!(config.request_timeout_secs, 120);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Custom base URL for an OpenAI-compatible API.
    pub base_url: Option<String>,
    /// Timeout for a single completion request (default: 120).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Repository host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL, for GitHub Enterprise installs.
    pub api_base: Option<String>,
    /// Ceiling on in-flight GitHub requests (default: 8).
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_max_concurrent_requests() -> usize {
    8
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

/// The two secrets a review session needs.
///
/// Both values are required; construction fails rather than producing a
/// half-usable session.
///
/// # Examples
///
/// ```
/// use prwarden_core::Credentials;
///
/// let creds = Credentials::new(Some("ghp_x".into()), Some("sk-x".into())).unwrap();
/// assert_eq!(creds.github_token(), "ghp_x");
/// assert!(Credentials::new(None, Some("sk-x".into())).is_err());
/// ```
#[derive(Clone)]
pub struct Credentials {
    github_token: String,
    completion_api_key: String,
}

impl Credentials {
    /// Build credentials, rejecting missing or blank values.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::Configuration`] naming the missing value.
    pub fn new(
        github_token: Option<String>,
        completion_api_key: Option<String>,
    ) -> Result<Self, ReviewError> {
        let github_token = require(github_token, "GITHUB_TOKEN")?;
        let completion_api_key = require(completion_api_key, "OPENAI_API_KEY")?;
        Ok(Self {
            github_token,
            completion_api_key,
        })
    }

    pub fn github_token(&self) -> &str {
        &self.github_token
    }

    pub fn completion_api_key(&self) -> &str {
        &self.completion_api_key
    }
}

fn require(value: Option<String>, name: &str) -> Result<String, ReviewError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ReviewError::Configuration(format!(
            "{name} is required but was not provided"
        ))),
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("github_token", &"<redacted>")
            .field("completion_api_key", &"<redacted>")
            .finish()
    }
}
