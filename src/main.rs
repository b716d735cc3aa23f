use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use issue_scout::config::{AppConfig, LoggingConfig};
use issue_scout::pipeline::{Pipeline, RunReport};
use issue_scout::platform::github::GitHubPlatform;
use issue_scout::shutdown::{cancel_on_shutdown, CancelSignal};
use issue_scout::transport::TransportClient;

#[derive(Parser)]
#[command(
    name = "issue-scout",
    about = "Find closed GitHub issues resolved by exactly one pull request"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Also print non-passing candidates with their rejection reasons
    #[arg(long)]
    include_rejected: bool,

    /// Stop after this many accepted repositories
    #[arg(long)]
    max_repos: Option<usize>,

    /// Primary repository language to search for
    #[arg(long)]
    language: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the report
    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_report(report: &RunReport) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, report)?;
    writeln!(stdout)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.include_rejected {
        config.pipeline.include_rejected = true;
    }
    if let Some(max_repos) = cli.max_repos {
        config.search.max_repos = max_repos;
    }
    if let Some(language) = cli.language {
        config.search.language = language;
    }
    config.validate()?;

    init_tracing(&config.logging);

    tracing::info!(
        language = %config.search.language,
        min_stars = config.search.min_stars,
        max_repos = config.search.max_repos,
        "Starting issue-scout"
    );

    let cancel = CancelSignal::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    let transport = Arc::new(TransportClient::from_config(&config, cancel.clone())?);
    let platform = Arc::new(GitHubPlatform::new(&config.github, transport));
    let pipeline =
        Pipeline::new(platform.clone(), &config, cancel)?.with_authenticator(platform);

    match pipeline.run().await {
        Ok(report) => {
            if report.cancelled {
                tracing::warn!("Run cancelled, printing partial results");
            }
            print_report(&report)
        }
        Err(e) => {
            tracing::error!(produced = e.produced, error = %e.source, "Run aborted");
            print_report(&e.report)?;
            Err(e.into())
        }
    }
}
