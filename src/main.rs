use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, WrapErr};
use tracing_subscriber::EnvFilter;

use prwarden_core::{Credentials, RepoId, WardenConfig};
use prwarden_review::filter::FileFilter;
use prwarden_review::pipeline::{render_review_body, ReviewPipeline};
use prwarden_review::session::ReviewSession;

const CONFIG_FILE: &str = ".prwarden.toml";

#[derive(Parser)]
#[command(
    name = "prwarden",
    version,
    about = "Automated AI review for GitHub pull requests",
    long_about = "prwarden reviews every changed file of a GitHub pull request with a\n\
                   chat-completion model and posts the results as one review comment.\n\n\
                   Examples:\n  \
                     prwarden review --repo owner/name --pr 42            Review and publish\n  \
                     prwarden review --repo owner/name --pr 42 --dry-run  Print without publishing\n  \
                     prwarden init                                        Create a .prwarden.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .prwarden.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Review a pull request and post the results
    #[command(long_about = "Review a pull request and post the results.\n\n\
        Changed files are analyzed in sequential batches of review.batch_size.\n\
        A file that fails to analyze gets an error entry in the review; the\n\
        review is still posted.\n\n\
        Examples:\n  prwarden review --repo owner/name --pr 42\n  \
        prwarden review --repo owner/name --pr 42 --apply-filters --dry-run")]
    Review {
        /// Repository in owner/name form
        #[arg(long)]
        repo: String,

        /// Pull request number
        #[arg(long)]
        pr: u64,

        /// Print the review body instead of publishing it
        #[arg(long)]
        dry_run: bool,

        /// Skip files matching ignore_patterns or exceeding max_changes_per_file
        #[arg(long)]
        apply_filters: bool,

        /// GitHub token
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_token: Option<String>,

        /// API key for the completion service
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_api_key: Option<String>,
    },
    /// Create a default .prwarden.toml configuration file
    #[command(long_about = "Create a default .prwarden.toml configuration file.\n\n\
        Writes a commented configuration with every default spelled out.\n\
        Fails if .prwarden.toml already exists.")]
    Init,
}

const DEFAULT_CONFIG: &str = r#"# prwarden configuration

[review]
# max_files_to_review = 50
# max_changes_per_file = 500
# model = "gpt-4"
# temperature = 0.3
# batch_size = 5
# review_categories = ["code_quality", "security", "performance", "maintainability", "testing"]
# ignore_patterns = ["*.lock", "*.md", "*.txt"]
# file_timeout_secs = 120
# include_file_content = false

# Extra rules per file extension
# [review.language_rules]
# rs = ["Avoid unwrap() outside tests"]

[llm]
# base_url = "https://api.openai.com"
# request_timeout_secs = 120

[github]
# api_base = "https://github.example.com/api/v3"
# max_concurrent_requests = 8
"#;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(explicit: Option<&Path>) -> Result<WardenConfig> {
    let path = match explicit {
        Some(path) => path,
        None => {
            let default_path = Path::new(CONFIG_FILE);
            if !default_path.exists() {
                return Ok(WardenConfig::default());
            }
            default_path
        }
    };
    WardenConfig::from_file(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to load {}", path.display()))
}

async fn run_review(
    config: WardenConfig,
    repo: RepoId,
    number: u64,
    dry_run: bool,
    apply_filters: bool,
    credentials: Credentials,
) -> Result<()> {
    let session = ReviewSession::open(&credentials, &config).into_diagnostic()?;
    let review = config.review;
    let target = repo.clone();

    let report = session
        .run(|github, llm| async move {
            let mut pipeline = ReviewPipeline::new(github, llm, review.clone());
            if apply_filters {
                pipeline = pipeline.with_filter(FileFilter::from_config(&review));
            }
            if dry_run {
                pipeline.analyze_change_request(&target, number).await
            } else {
                pipeline.review_change_request(&target, number).await
            }
        })
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("review of {repo}#{number} failed"))?;

    if dry_run {
        print!("{}", render_review_body(&report.findings));
    } else {
        println!("{report}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .expect("miette handler");
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Review {
            repo,
            pr,
            dry_run,
            apply_filters,
            github_token,
            openai_api_key,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let repo: RepoId = repo.parse().into_diagnostic()?;
            let credentials = Credentials::new(github_token, openai_api_key).map_err(|e| {
                miette::miette!(
                    help = "Export GITHUB_TOKEN and OPENAI_API_KEY, or pass --github-token and --openai-api-key",
                    "{e}"
                )
            })?;
            tracing::debug!(%repo, pr, dry_run, apply_filters, "starting review");
            run_review(config, repo, pr, dry_run, apply_filters, credentials).await?;
        }
        Command::Init => {
            let path = Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
    }

    Ok(())
}
