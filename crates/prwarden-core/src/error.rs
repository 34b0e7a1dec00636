/// Errors that can occur while reviewing a pull request.
///
/// The first five variants form the failure taxonomy shared by the
/// repository host and the completion service. Library crates use this
/// type directly; the binary converts to a `miette` diagnostic at the
/// boundary.
///
/// # Examples
///
/// ```
/// use prwarden_core::ReviewError;
///
/// let err = ReviewError::Configuration("missing GITHUB_TOKEN".into());
/// assert!(err.to_string().contains("missing GITHUB_TOKEN"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    /// Invalid or missing configuration, including absent credentials.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A repository, pull request, or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A remote service rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A remote service signalled throttling.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Network failure or server-side (5xx) error.
    #[error("transient error: {0}")]
    Transient(String),

    /// A client handle was used after its session released it.
    #[error("{0} client used after the review session was closed")]
    SessionClosed(&'static str),

    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ReviewError {
    /// Whether a retry could plausibly succeed without operator action.
    ///
    /// # Examples
    ///
    /// ```
    /// use prwarden_core::ReviewError;
    ///
    /// assert!(ReviewError::RateLimit("slow down".into()).is_retryable());
    /// assert!(!ReviewError::Auth("bad token".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit(_) | Self::Transient(_))
    }

    /// Map an HTTP status code from either remote service onto the taxonomy.
    ///
    /// `detail` becomes the error message. Callers handle service-specific
    /// nuances (such as GitHub's rate-limit 403) before falling back here.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 | 403 => Self::Auth(detail),
            404 => Self::NotFound(detail),
            429 => Self::RateLimit(detail),
            _ => Self::Transient(detail),
        }
    }
}
