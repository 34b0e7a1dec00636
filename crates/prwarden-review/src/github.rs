use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use prwarden_core::{ChangeRequestSummary, ChangedFile, GitHubConfig, RepoId, ReviewError};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::session::SessionHandle;

/// GitHub returns at most this many files per page.
const FILES_PER_PAGE: u8 = 100;

/// The slice of a repository host the review engine consumes.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Fetch pull request metadata.
    ///
    /// The returned summary's `files` is left empty; the pipeline fills it
    /// from [`RepositoryHost::list_changed_files`].
    ///
    /// # Errors
    ///
    /// [`ReviewError::NotFound`] if the repository or pull request does not
    /// exist, [`ReviewError::Auth`] if credentials are rejected,
    /// [`ReviewError::Transient`] on network or 5xx failures.
    async fn get_change_request(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<ChangeRequestSummary, ReviewError>;

    /// List every changed file with its patch, in host order.
    async fn list_changed_files(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<Vec<ChangedFile>, ReviewError>;

    /// Fetch a file's content at `git_ref`.
    ///
    /// Binary or undecodable content is returned as an empty string.
    ///
    /// # Errors
    ///
    /// [`ReviewError::NotFound`] if `path` does not exist at `git_ref`.
    async fn get_file_content(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: &str,
    ) -> Result<String, ReviewError>;

    /// Post `body` as a single comment-type review.
    async fn publish_review(
        &self,
        repo: &RepoId,
        number: u64,
        body: &str,
    ) -> Result<(), ReviewError>;
}

/// GitHub REST client backed by octocrab.
///
/// Every request passes through a semaphore so no more than
/// `max_concurrent_requests` calls are in flight at once.
///
/// # Examples
///
/// ```no_run
/// use prwarden_core::GitHubConfig;
/// use prwarden_review::github::GitHubClient;
///
/// # async fn demo() {
/// let client = GitHubClient::new("ghp_xxxx", &GitHubConfig::default()).unwrap();
/// # }
/// ```
pub struct GitHubClient {
    octocrab: octocrab::Octocrab,
    limiter: Semaphore,
    closed: AtomicBool,
}

impl GitHubClient {
    /// Create an authenticated client.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::Configuration`] if the API base is not a valid
    /// URI or the client cannot be built.
    pub fn new(token: &str, config: &GitHubConfig) -> Result<Self, ReviewError> {
        let mut builder = octocrab::Octocrab::builder().personal_token(token.to_string());
        if let Some(api_base) = &config.api_base {
            builder = builder.base_uri(api_base.as_str()).map_err(|e| {
                ReviewError::Configuration(format!("invalid GitHub API base '{api_base}': {e}"))
            })?;
        }
        let octocrab = builder
            .build()
            .map_err(|e| ReviewError::Configuration(format!("failed to create GitHub client: {e}")))?;

        Ok(Self {
            octocrab,
            limiter: Semaphore::new(config.max_concurrent_requests.max(1)),
            closed: AtomicBool::new(false),
        })
    }

    async fn get_json<R, P>(
        &self,
        operation: &str,
        route: String,
        params: Option<&P>,
    ) -> Result<R, ReviewError>
    where
        R: serde::de::DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let _permit = self.permit().await?;
        tracing::debug!(%route, "GitHub GET");
        self.octocrab
            .get(route, params)
            .await
            .map_err(|e| map_octocrab_error(operation, &e))
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, ReviewError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ReviewError::SessionClosed("github"));
        }
        self.limiter
            .acquire()
            .await
            .map_err(|_| ReviewError::SessionClosed("github"))
    }
}

#[derive(Deserialize)]
struct RepositoryPayload {
    full_name: String,
}

#[derive(Deserialize)]
struct PullPayload {
    title: Option<String>,
    body: Option<String>,
    base: RefPayload,
    head: RefPayload,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RefPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
}

#[derive(Deserialize)]
struct FilePayload {
    filename: String,
    #[serde(default)]
    patch: Option<String>,
}

#[derive(Serialize)]
struct PageQuery {
    per_page: u8,
    page: u32,
}

#[derive(Serialize)]
struct RefQuery<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn get_change_request(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<ChangeRequestSummary, ReviewError> {
        let repository: RepositoryPayload = self
            .get_json(
                &format!("repository {repo}"),
                format!("/repos/{}/{}", repo.owner, repo.name),
                None::<&()>,
            )
            .await?;
        tracing::debug!(repository = %repository.full_name, "resolved repository");

        let pull: PullPayload = self
            .get_json(
                &format!("pull request #{number} in {repo}"),
                format!("/repos/{}/{}/pulls/{number}", repo.owner, repo.name),
                None::<&()>,
            )
            .await?;

        Ok(ChangeRequestSummary {
            title: pull.title.unwrap_or_default(),
            description: pull.body.unwrap_or_default(),
            files: Vec::new(),
            base_ref: pull.base.git_ref,
            head_ref: pull.head.git_ref,
            head_sha: pull.head.sha,
            created_at: pull.created_at,
            updated_at: pull.updated_at,
        })
    }

    async fn list_changed_files(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<Vec<ChangedFile>, ReviewError> {
        let mut files = Vec::new();
        let mut page = 1;
        loop {
            let batch: Vec<FilePayload> = self
                .get_json(
                    &format!("files of pull request #{number} in {repo}"),
                    format!("/repos/{}/{}/pulls/{number}/files", repo.owner, repo.name),
                    Some(&PageQuery {
                        per_page: FILES_PER_PAGE,
                        page,
                    }),
                )
                .await?;
            let last = batch.len() < usize::from(FILES_PER_PAGE);
            files.extend(
                batch
                    .into_iter()
                    .map(|f| ChangedFile::new(f.filename, f.patch.unwrap_or_default())),
            );
            if last {
                break;
            }
            page += 1;
        }
        Ok(files)
    }

    async fn get_file_content(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: &str,
    ) -> Result<String, ReviewError> {
        let operation = format!("{path} at {git_ref}");
        let payload: serde_json::Value = self
            .get_json(
                &operation,
                format!(
                    "/repos/{}/{}/contents/{}",
                    repo.owner,
                    repo.name,
                    encode_path(path)
                ),
                Some(&RefQuery { git_ref }),
            )
            .await?;

        if payload.is_array() {
            return Err(ReviewError::NotFound(format!("{operation} is a directory")));
        }
        let encoding = payload.get("encoding").and_then(|e| e.as_str());
        let content = payload.get("content").and_then(|c| c.as_str());
        Ok(match (encoding, content) {
            (Some("base64"), Some(encoded)) => decode_content(encoded),
            _ => String::new(),
        })
    }

    async fn publish_review(
        &self,
        repo: &RepoId,
        number: u64,
        body: &str,
    ) -> Result<(), ReviewError> {
        let _permit = self.permit().await?;
        let route = format!("/repos/{}/{}/pulls/{number}/reviews", repo.owner, repo.name);
        let payload = serde_json::json!({
            "body": body,
            "event": "COMMENT",
        });

        let _response: serde_json::Value = self
            .octocrab
            .post(route, Some(&payload))
            .await
            .map_err(|e| map_octocrab_error(&format!("review on #{number} in {repo}"), &e))?;

        Ok(())
    }
}

impl SessionHandle for GitHubClient {
    fn name(&self) -> &'static str {
        "github"
    }

    /// Refuse further requests and close the limiter. The octocrab pool
    /// lives until the client drops.
    fn close(&self) -> Result<(), ReviewError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ReviewError::SessionClosed("github"));
        }
        self.limiter.close();
        Ok(())
    }
}

/// Decode base64 file content; binary or non-UTF-8 data becomes empty.
fn decode_content(encoded: &str) -> String {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(compact) else {
        return String::new();
    };
    if bytes.contains(&0) {
        return String::new();
    }
    String::from_utf8(bytes).unwrap_or_default()
}

/// Characters escaped inside one path segment: controls, space, and the
/// URI delimiters that may legally appear in a git filename.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encode each `/`-separated segment of a repository path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_rate_limit_message(message: &str, documentation_url: Option<&str>) -> bool {
    message.to_lowercase().contains("rate limit")
        || documentation_url.is_some_and(|url| url.contains("rate-limit"))
}

fn map_octocrab_error(operation: &str, error: &octocrab::Error) -> ReviewError {
    if let octocrab::Error::GitHub { source, .. } = error {
        let status = source.status_code.as_u16();
        let message = format!(
            "{operation}: GitHub returned {} {}",
            source.status_code, source.message
        );
        if matches!(status, 403 | 429)
            && is_rate_limit_message(&source.message, source.documentation_url.as_deref())
        {
            return ReviewError::RateLimit(message);
        }
        return ReviewError::from_status(status, message);
    }
    ReviewError::Transient(format!("{operation}: {error}"))
}
