//! Scoped ownership of the two remote-service handles.
//!
//! A [`ReviewSession`] opens the GitHub and completion clients together and
//! guarantees both are closed exactly once when the session ends, whether
//! the work succeeded, failed, or unwound.

use std::future::Future;
use std::sync::Arc;

use prwarden_core::{Credentials, ReviewError, WardenConfig};

use crate::github::GitHubClient;
use crate::llm::LlmClient;

/// A network handle owned by a review session.
pub trait SessionHandle: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Mark the handle closed so further calls are refused. Calls after the
    /// first fail.
    ///
    /// Connection pools are not torn down here; their sockets are freed when
    /// the last `Arc` to the client drops.
    fn close(&self) -> Result<(), ReviewError>;
}

/// The lifetime during which both remote-service handles are open.
///
/// # Examples
///
/// ```no_run
/// use prwarden_core::{Credentials, RepoId, WardenConfig};
/// use prwarden_review::pipeline::ReviewPipeline;
/// use prwarden_review::session::ReviewSession;
///
/// # async fn demo() -> prwarden_core::Result<()> {
/// let config = WardenConfig::default();
/// let credentials = Credentials::new(Some("ghp_x".into()), Some("sk-x".into()))?;
/// let repo: RepoId = "org/repo".parse()?;
///
/// let session = ReviewSession::open(&credentials, &config)?;
/// let review = config.review.clone();
/// session
///     .run(|github, llm| async move {
///         ReviewPipeline::new(github, llm, review)
///             .review_change_request(&repo, 42)
///             .await
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ReviewSession<R: SessionHandle = GitHubClient, C: SessionHandle = LlmClient> {
    repository: Arc<R>,
    completion: Arc<C>,
    released: bool,
}

impl ReviewSession<GitHubClient, LlmClient> {
    /// Open both clients from explicit credentials and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::Configuration`] if either client cannot be
    /// built. If the second fails, the first is closed before returning.
    pub fn open(credentials: &Credentials, config: &WardenConfig) -> Result<Self, ReviewError> {
        config.review.validate()?;
        let github = GitHubClient::new(credentials.github_token(), &config.github)?;
        let llm = match LlmClient::new(credentials.completion_api_key(), &config.llm) {
            Ok(llm) => llm,
            Err(e) => {
                if let Err(close_err) = github.close() {
                    tracing::warn!(error = %close_err, "failed to close github client");
                }
                return Err(e);
            }
        };
        tracing::debug!(completion_base = llm.base_url(), "review session opened");
        Ok(Self::from_handles(github, llm))
    }
}

impl<R, C> ReviewSession<R, C>
where
    R: SessionHandle,
    C: SessionHandle,
{
    /// Wrap already-built handles.
    pub fn from_handles(repository: R, completion: C) -> Self {
        Self {
            repository: Arc::new(repository),
            completion: Arc::new(completion),
            released: false,
        }
    }

    /// Run `work` with both handles, then close them.
    ///
    /// The result of `work` is returned unchanged; close failures are
    /// logged and never replace it.
    pub async fn run<T, F, Fut>(mut self, work: F) -> Result<T, ReviewError>
    where
        F: FnOnce(Arc<R>, Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, ReviewError>>,
    {
        let result = work(Arc::clone(&self.repository), Arc::clone(&self.completion)).await;
        self.release();
        result
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        close_logged(self.repository.as_ref());
        close_logged(self.completion.as_ref());
    }
}

fn close_logged(handle: &dyn SessionHandle) {
    match handle.close() {
        Ok(()) => tracing::debug!(handle = handle.name(), "closed"),
        Err(e) => tracing::warn!(handle = handle.name(), error = %e, "failed to close handle"),
    }
}

impl<R, C> Drop for ReviewSession<R, C>
where
    R: SessionHandle,
    C: SessionHandle,
{
    fn drop(&mut self) {
        self.release();
    }
}
