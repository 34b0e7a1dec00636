use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use prwarden_core::{ChangeRequestSummary, ChangedFile, FileFinding, RepoId, ReviewConfig, ReviewError};
use serde::Serialize;

use crate::filter::{FileFilter, SkippedFile};
use crate::github::RepositoryHost;
use crate::llm::{CompletionRequest, CompletionService};
use crate::prompt::PromptBuilder;

/// Heading that opens every published review.
pub const REVIEW_HEADER: &str = "## AI Code Review Summary\n\n";

/// Outcome of analyzing one pull request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReport {
    /// Pull request snapshot, with `files` filled from the listing.
    pub summary: ChangeRequestSummary,
    /// One finding per attempted file, in listing order.
    pub findings: Vec<FileFinding>,
    /// Statistics about the run.
    pub stats: ReviewStats,
}

/// Statistics about a review run.
///
/// # Examples
///
/// ```
/// use prwarden_review::pipeline::ReviewStats;
///
/// let stats = ReviewStats {
///     files_listed: 7,
///     files_skipped: 0,
///     files_reviewed: 5,
///     files_failed: 1,
///     batches: 2,
///     model_used: "gpt-4".into(),
/// };
/// assert_eq!(stats.files_reviewed - stats.files_failed, 4);
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    /// Files the host reported as changed.
    pub files_listed: usize,
    /// Files removed by the optional filter.
    pub files_skipped: usize,
    /// Files sent through analysis (successful or not).
    pub files_reviewed: usize,
    /// Findings that carry an error description.
    pub files_failed: usize,
    /// Number of sequential batches run.
    pub batches: usize,
    /// Model identifier used for the review.
    pub model_used: String,
}

/// Batch orchestrator for a single pull request.
///
/// Files are analyzed in consecutive batches of `batch_size`. Members of a
/// batch run concurrently on the calling task; the next batch starts only
/// after every member of the previous one has settled. A failure while
/// analyzing one file becomes that file's finding and never aborts the run.
pub struct ReviewPipeline {
    host: Arc<dyn RepositoryHost>,
    llm: Arc<dyn CompletionService>,
    config: ReviewConfig,
    filter: Option<FileFilter>,
}

impl ReviewPipeline {
    /// Create a pipeline over a repository host and a completion service.
    pub fn new(
        host: Arc<dyn RepositoryHost>,
        llm: Arc<dyn CompletionService>,
        config: ReviewConfig,
    ) -> Self {
        Self {
            host,
            llm,
            config,
            filter: None,
        }
    }

    /// Drop ignored or oversized files before truncation.
    pub fn with_filter(mut self, filter: FileFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Analyze a pull request and publish the aggregated review.
    ///
    /// # Errors
    ///
    /// Propagates failures from fetching metadata, listing files, or
    /// publishing. Per-file failures are reported inside the review.
    pub async fn review_change_request(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<ReviewReport, ReviewError> {
        let report = self.analyze_change_request(repo, number).await?;
        let body = render_review_body(&report.findings);
        self.host.publish_review(repo, number, &body).await?;
        tracing::info!(%repo, number, findings = report.findings.len(), "review published");
        Ok(report)
    }

    /// Run every step except publication.
    ///
    /// # Errors
    ///
    /// Propagates failures from fetching metadata or listing files.
    pub async fn analyze_change_request(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<ReviewReport, ReviewError> {
        let mut summary = self.host.get_change_request(repo, number).await?;
        tracing::info!(%repo, number, title = %summary.title, "fetched pull request");

        let listed = self.host.list_changed_files(repo, number).await?;
        summary.files = listed.iter().map(|f| f.path.clone()).collect();
        let files_listed = listed.len();

        let (mut files, skipped) = match &self.filter {
            Some(filter) => {
                let result = filter.filter(listed);
                (result.kept, result.skipped)
            }
            None => (listed, Vec::new()),
        };
        log_skipped(&skipped);
        files.truncate(self.config.max_files_to_review);

        let git_ref = if summary.head_sha.is_empty() {
            summary.head_ref.clone()
        } else {
            summary.head_sha.clone()
        };

        let batches = partition(files, self.config.batch_size);
        let batch_count = batches.len();
        let mut findings = Vec::new();
        for (index, batch) in batches.into_iter().enumerate() {
            tracing::info!(batch = index + 1, of = batch_count, size = batch.len(), "analyzing batch");
            let settled = join_all(
                batch
                    .into_iter()
                    .map(|file| self.review_file(repo, &git_ref, file)),
            )
            .await;
            findings.extend(settled);
        }

        let files_failed = findings.iter().filter(|f| f.is_failure()).count();
        tracing::info!(analyzed = findings.len(), failed = files_failed, "analysis complete");

        let stats = ReviewStats {
            files_listed,
            files_skipped: skipped.len(),
            files_reviewed: findings.len(),
            files_failed,
            batches: batch_count,
            model_used: self.config.model.clone(),
        };
        Ok(ReviewReport {
            summary,
            findings,
            stats,
        })
    }

    /// Produce a finding for one file. Never fails.
    async fn review_file(&self, repo: &RepoId, git_ref: &str, file: ChangedFile) -> FileFinding {
        let path = file.path.clone();
        let work = self.analyze_file(repo, git_ref, file);
        let outcome = match self.config.file_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), work)
                .await
                .unwrap_or_else(|_| {
                    Err(ReviewError::Transient(format!("analysis timed out after {secs}s")))
                }),
            None => work.await,
        };

        match outcome {
            Ok(analysis) => FileFinding::reviewed(path, analysis),
            Err(e) => {
                tracing::warn!(file = %path, error = %e, retryable = e.is_retryable(), "file analysis failed");
                FileFinding::failed(path, e)
            }
        }
    }

    async fn analyze_file(
        &self,
        repo: &RepoId,
        git_ref: &str,
        mut file: ChangedFile,
    ) -> Result<String, ReviewError> {
        let content = self.host.get_file_content(repo, &file.path, git_ref).await?;
        file.content = Some(content);
        let prompt = PromptBuilder::new(&self.config).build(&file);
        let request = CompletionRequest::new(prompt, &self.config.model, self.config.temperature);
        self.llm.complete(&request).await
    }
}

fn log_skipped(skipped: &[SkippedFile]) {
    for file in skipped {
        tracing::info!(file = %file.path, reason = %file.reason, "skipping file");
    }
}

/// Split `items` into consecutive batches of `batch_size`; the last may be shorter.
///
/// A `batch_size` of zero is treated as one.
///
/// # Examples
///
/// ```
/// use prwarden_review::pipeline::partition;
///
/// let batches = partition(vec![1, 2, 3, 4, 5], 2);
/// assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
/// ```
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut remaining = items.into_iter().peekable();
    while remaining.peek().is_some() {
        batches.push(remaining.by_ref().take(batch_size).collect());
    }
    batches
}

/// Render findings as the Markdown review body.
///
/// # Examples
///
/// ```
/// use prwarden_core::FileFinding;
/// use prwarden_review::pipeline::render_review_body;
///
/// let body = render_review_body(&[FileFinding::reviewed("a.rs", "Fine.")]);
/// assert_eq!(body, "## AI Code Review Summary\n\n### a.rs\nFine.\n\n");
/// ```
pub fn render_review_body(findings: &[FileFinding]) -> String {
    let mut body = String::from(REVIEW_HEADER);
    for finding in findings {
        body.push_str(&format!("### {}\n{}\n\n", finding.path, finding.analysis));
    }
    body
}

impl fmt::Display for ReviewReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Review Results")?;
        writeln!(f, "==============")?;
        writeln!(f, "{} ({} -> {})", self.summary.title, self.summary.head_ref, self.summary.base_ref)?;
        writeln!(
            f,
            "Model: {} | Listed: {} | Skipped: {} | Reviewed: {} | Failed: {} | Batches: {}\n",
            self.stats.model_used,
            self.stats.files_listed,
            self.stats.files_skipped,
            self.stats.files_reviewed,
            self.stats.files_failed,
            self.stats.batches,
        )?;
        for finding in &self.findings {
            let label = if finding.is_failure() { "FAILED" } else { "OK" };
            writeln!(f, "[{label}] {}", finding.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    #[derive(Default)]
    struct FakeHost {
        files: Vec<ChangedFile>,
        fail_metadata: bool,
        fail_listing: bool,
        fail_publish: bool,
        missing: HashSet<String>,
        calls: Mutex<Vec<String>>,
        published: Mutex<Option<String>>,
    }

    impl FakeHost {
        fn with_files(paths: &[&str]) -> Self {
            Self {
                files: paths
                    .iter()
                    .map(|p| ChangedFile::new(*p, format!("+change in {p}\n")))
                    .collect(),
                ..Self::default()
            }
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn content_calls(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| c.strip_prefix("content ").map(String::from))
                .collect()
        }
    }

    #[async_trait]
    impl RepositoryHost for FakeHost {
        async fn get_change_request(
            &self,
            _repo: &RepoId,
            number: u64,
        ) -> Result<ChangeRequestSummary, ReviewError> {
            self.record("metadata".into());
            if self.fail_metadata {
                return Err(ReviewError::NotFound(format!("pull request #{number}")));
            }
            Ok(ChangeRequestSummary {
                title: "Add feature".into(),
                description: String::new(),
                files: Vec::new(),
                base_ref: "main".into(),
                head_ref: "feature".into(),
                head_sha: "abc123".into(),
                created_at: None,
                updated_at: None,
            })
        }

        async fn list_changed_files(
            &self,
            _repo: &RepoId,
            _number: u64,
        ) -> Result<Vec<ChangedFile>, ReviewError> {
            self.record("list".into());
            if self.fail_listing {
                return Err(ReviewError::Transient("connection reset".into()));
            }
            Ok(self.files.clone())
        }

        async fn get_file_content(
            &self,
            _repo: &RepoId,
            path: &str,
            git_ref: &str,
        ) -> Result<String, ReviewError> {
            self.record(format!("content {path}"));
            assert_eq!(git_ref, "abc123");
            if self.missing.contains(path) {
                return Err(ReviewError::NotFound(format!("{path} at {git_ref}")));
            }
            Ok(format!("contents of {path}"))
        }

        async fn publish_review(
            &self,
            _repo: &RepoId,
            _number: u64,
            body: &str,
        ) -> Result<(), ReviewError> {
            self.record("publish".into());
            if self.fail_publish {
                return Err(ReviewError::Auth("token lacks pull_requests:write".into()));
            }
            *self.published.lock().unwrap() = Some(body.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLlm {
        rate_limited: bool,
        stall: bool,
        delays: HashMap<String, u64>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        requests: AtomicUsize,
        finished: Mutex<Vec<String>>,
    }

    fn prompt_path(request: &CompletionRequest) -> String {
        request
            .user_prompt
            .lines()
            .find_map(|l| l.strip_prefix("File: "))
            .unwrap_or_default()
            .to_string()
    }

    #[async_trait]
    impl CompletionService for FakeLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ReviewError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let path = prompt_path(request);
            if let Some(secs) = self.delays.get(&path) {
                tokio::time::sleep(Duration::from_secs(*secs)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.lock().unwrap().push(path.clone());

            if self.rate_limited {
                return Err(ReviewError::RateLimit("429 Too Many Requests".into()));
            }
            Ok(format!("analysis of {path}"))
        }
    }

    fn repo() -> RepoId {
        "org/repo".parse().unwrap()
    }

    fn config(max_files: usize, batch_size: usize) -> ReviewConfig {
        ReviewConfig {
            max_files_to_review: max_files,
            batch_size,
            ..ReviewConfig::default()
        }
    }

    fn paths(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("src/file{i}.rs")).collect()
    }

    fn pipeline(host: &Arc<FakeHost>, llm: &Arc<FakeLlm>, config: ReviewConfig) -> ReviewPipeline {
        ReviewPipeline::new(host.clone(), llm.clone(), config)
    }

    #[test]
    fn partition_covers_items_in_order() {
        for n in 0..12usize {
            for b in 1..6usize {
                let items: Vec<usize> = (0..n).collect();
                let batches = partition(items, b);
                assert_eq!(batches.len(), n.div_ceil(b));
                for (i, batch) in batches.iter().enumerate() {
                    let expected: Vec<usize> = (i * b..((i + 1) * b).min(n)).collect();
                    assert_eq!(batch, &expected);
                }
            }
        }
    }

    #[test]
    fn partition_treats_zero_as_one() {
        assert_eq!(partition(vec!['a', 'b'], 0), vec![vec!['a'], vec!['b']]);
    }

    #[test]
    fn render_matches_published_format() {
        let body = render_review_body(&[
            FileFinding::reviewed("a.rs", "Looks fine."),
            FileFinding::failed("b.py", "boom"),
        ]);
        assert_eq!(
            body,
            "## AI Code Review Summary\n\n### a.rs\nLooks fine.\n\n### b.py\nError analyzing file: boom\n\n"
        );
    }

    #[test]
    fn render_with_no_findings_is_header_only() {
        assert_eq!(render_review_body(&[]), REVIEW_HEADER);
    }

    #[tokio::test]
    async fn seven_files_max_five_batch_three() {
        let names = paths(7);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let host = Arc::new(FakeHost::with_files(&refs));
        let llm = Arc::new(FakeLlm::default());

        let report = pipeline(&host, &llm, config(5, 3))
            .review_change_request(&repo(), 42)
            .await
            .unwrap();

        assert_eq!(report.stats.files_listed, 7);
        assert_eq!(report.stats.files_reviewed, 5);
        assert_eq!(report.stats.batches, 2);
        assert_eq!(report.summary.files.len(), 7);
        assert_eq!(host.content_calls(), names[..5].to_vec());
        assert_eq!(llm.requests.load(Ordering::SeqCst), 5);
        assert_eq!(llm.peak.load(Ordering::SeqCst), 3);

        let body = host.published.lock().unwrap().clone().unwrap();
        assert_eq!(body.matches("### ").count(), 5);
        let mut last = 0;
        for name in &names[..5] {
            let at = body.find(&format!("### {name}\n")).unwrap();
            assert!(at > last);
            last = at;
            assert!(body.contains(&format!("analysis of {name}")));
        }
        assert!(!body.contains("file5.rs"));
    }

    #[tokio::test]
    async fn launched_tasks_equal_min_of_listed_and_limit() {
        for (listed, limit) in [(0, 50), (3, 50), (60, 50), (10, 0), (4, 4)] {
            let names = paths(listed);
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let host = Arc::new(FakeHost::with_files(&refs));
            let llm = Arc::new(FakeLlm::default());

            let report = pipeline(&host, &llm, config(limit, 5))
                .analyze_change_request(&repo(), 1)
                .await
                .unwrap();

            let expected = listed.min(limit);
            assert_eq!(host.content_calls().len(), expected);
            assert_eq!(llm.requests.load(Ordering::SeqCst), expected);
            assert_eq!(report.findings.len(), expected);
            assert_eq!(report.stats.batches, expected.div_ceil(5));
        }
    }

    #[tokio::test]
    async fn missing_file_becomes_error_finding() {
        let mut host = FakeHost::with_files(&["a.rs", "b.rs", "c.rs"]);
        host.missing.insert("b.rs".into());
        let host = Arc::new(host);
        let llm = Arc::new(FakeLlm::default());

        let report = pipeline(&host, &llm, config(50, 2))
            .review_change_request(&repo(), 3)
            .await
            .unwrap();

        assert_eq!(report.findings.len(), 3);
        assert_eq!(report.stats.files_failed, 1);
        assert_eq!(report.findings[0].analysis, "analysis of a.rs");
        assert!(report.findings[1].is_failure());
        assert!(report.findings[1].analysis.contains("not found: b.rs at abc123"));
        assert_eq!(report.findings[2].analysis, "analysis of c.rs");
        assert_eq!(llm.requests.load(Ordering::SeqCst), 2);
        assert!(host.calls().contains(&"publish".to_string()));
    }

    #[tokio::test]
    async fn every_completion_failing_still_yields_full_findings() {
        let names = paths(6);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let host = Arc::new(FakeHost::with_files(&refs));
        let llm = Arc::new(FakeLlm {
            rate_limited: true,
            ..FakeLlm::default()
        });

        let report = pipeline(&host, &llm, config(50, 4))
            .review_change_request(&repo(), 5)
            .await
            .unwrap();

        assert_eq!(report.findings.len(), 6);
        assert!(report.findings.iter().all(|f| f.is_failure()));
        assert!(report.findings[0].analysis.contains("rate limited"));
        let body = host.published.lock().unwrap().clone().unwrap();
        assert_eq!(body.matches("### ").count(), 6);
    }

    #[tokio::test]
    async fn metadata_failure_aborts_before_publish() {
        let host = Arc::new(FakeHost {
            fail_metadata: true,
            ..FakeHost::with_files(&["a.rs"])
        });
        let llm = Arc::new(FakeLlm::default());

        let err = pipeline(&host, &llm, ReviewConfig::default())
            .review_change_request(&repo(), 404)
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::NotFound(_)));
        assert_eq!(host.calls(), vec!["metadata".to_string()]);
        assert!(host.published.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_failure_propagates() {
        let host = Arc::new(FakeHost {
            fail_listing: true,
            ..FakeHost::with_files(&["a.rs"])
        });
        let llm = Arc::new(FakeLlm::default());

        let err = pipeline(&host, &llm, ReviewConfig::default())
            .review_change_request(&repo(), 1)
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::Transient(_)));
        assert!(!host.calls().contains(&"publish".to_string()));
    }

    #[tokio::test]
    async fn publish_failure_propagates() {
        let host = Arc::new(FakeHost {
            fail_publish: true,
            ..FakeHost::with_files(&["a.rs"])
        });
        let llm = Arc::new(FakeLlm::default());

        let err = pipeline(&host, &llm, ReviewConfig::default())
            .review_change_request(&repo(), 1)
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::Auth(_)));
        assert_eq!(llm.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ignored_files_pass_through_without_filter() {
        let host = Arc::new(FakeHost::with_files(&["README.md", "src/lib.rs"]));
        let llm = Arc::new(FakeLlm::default());

        let report = pipeline(&host, &llm, ReviewConfig::default())
            .analyze_change_request(&repo(), 1)
            .await
            .unwrap();

        assert_eq!(report.findings[0].path, "README.md");
        assert_eq!(report.findings[0].analysis, "analysis of README.md");
        assert_eq!(report.stats.files_skipped, 0);
    }

    #[tokio::test]
    async fn attached_filter_drops_files_before_truncation() {
        let host = Arc::new(FakeHost::with_files(&[
            "README.md",
            "Cargo.lock",
            "src/a.rs",
            "src/b.rs",
        ]));
        let llm = Arc::new(FakeLlm::default());
        let config = config(1, 5);
        let filter = FileFilter::from_config(&config);

        let report = pipeline(&host, &llm, config)
            .with_filter(filter)
            .analyze_change_request(&repo(), 1)
            .await
            .unwrap();

        assert_eq!(report.stats.files_listed, 4);
        assert_eq!(report.stats.files_skipped, 2);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].path, "src/a.rs");
    }

    #[tokio::test(start_paused = true)]
    async fn findings_keep_listing_order_when_batch_finishes_reversed() {
        let host = Arc::new(FakeHost::with_files(&["a.rs", "b.rs", "c.rs", "d.rs"]));
        let llm = Arc::new(FakeLlm {
            delays: HashMap::from([
                ("a.rs".to_string(), 30),
                ("b.rs".to_string(), 20),
                ("c.rs".to_string(), 10),
            ]),
            ..FakeLlm::default()
        });

        let report = pipeline(&host, &llm, config(50, 3))
            .review_change_request(&repo(), 1)
            .await
            .unwrap();

        assert_eq!(
            *llm.finished.lock().unwrap(),
            vec!["c.rs", "b.rs", "a.rs", "d.rs"]
        );
        let order: Vec<&str> = report.findings.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(order, vec!["a.rs", "b.rs", "c.rs", "d.rs"]);

        let body = host.published.lock().unwrap().clone().unwrap();
        let positions: Vec<usize> = ["a.rs", "b.rs", "c.rs", "d.rs"]
            .iter()
            .map(|p| body.find(&format!("### {p}\n")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_into_error_finding() {
        let host = Arc::new(FakeHost::with_files(&["slow.rs", "also_slow.rs"]));
        let llm = Arc::new(FakeLlm {
            stall: true,
            ..FakeLlm::default()
        });
        let config = ReviewConfig {
            file_timeout_secs: Some(30),
            ..ReviewConfig::default()
        };

        let report = pipeline(&host, &llm, config)
            .review_change_request(&repo(), 1)
            .await
            .unwrap();

        assert_eq!(report.findings.len(), 2);
        for finding in &report.findings {
            assert!(finding.analysis.contains("timed out after 30s"));
        }
        assert!(host.published.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn report_display_lists_files() {
        let host = Arc::new(FakeHost::with_files(&["a.rs"]));
        let llm = Arc::new(FakeLlm::default());
        let report = pipeline(&host, &llm, ReviewConfig::default())
            .analyze_change_request(&repo(), 1)
            .await
            .unwrap();

        let text = report.to_string();
        assert!(text.contains("Add feature (feature -> main)"));
        assert!(text.contains("[OK] a.rs"));
    }
}
