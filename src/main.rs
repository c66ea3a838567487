use std::{env, io::Write, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use crate::cleanup::{Cleaner, LogSink, ProjectOutcome};
use crate::config::Settings;
use crate::gitlab::{Endpoints, ReqwestTransport, RequestClient, RetryPolicy};

mod cleanup;
mod config;
mod gitlab;

/// Delete expired tags from GitLab container registries.
#[derive(Parser)]
#[clap(version)]
struct Args {
    /// GitLab access token, sent as PRIVATE-TOKEN
    #[clap(long, short, env = "GITLAB_TOKEN", hide_env_values = true)]
    token: String,

    /// GitLab base URL
    #[clap(long, short, env = "GITLAB_URL")]
    url: String,

    /// Path to the JSON file mapping project names to id and retention
    #[clap(long, short, env = "REPOSITORY_CONFIG_PATH")]
    config: PathBuf,

    /// Don't delete but only print what would be deleted
    #[clap(long, short)]
    dry_run: bool,

    /// Path to a PEM certificate to trust in addition to the system roots
    #[clap(long, env = "SSL_PATH")]
    ssl_path: Option<PathBuf>,

    /// Accept invalid TLS certificates
    #[clap(long, env = "GITLAB_INSECURE")]
    insecure: bool,

    /// HTTP request timeout in seconds
    #[clap(long, env = "TIMEOUT", default_value = "20")]
    timeout: u64,

    /// Seconds to wait after a failed request attempt
    #[clap(long, env = "RETRY_DELAY", default_value = "5")]
    retry_delay: u64,

    /// Attempts per request before giving up
    #[clap(
        long,
        env = "MAX_RETRIES",
        default_value = "5",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    max_retries: u32,

    /// Make logging more verbose.
    /// You can also specify the log level via the RUST_LOG env variable.
    #[clap(long, short)]
    verbose: bool,

    /// Log line format
    #[clap(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        let registry_url = Url::parse(args.url.trim_end_matches('/'))
            .context(format!("Invalid GitLab URL {}", args.url))?;

        Ok(Self {
            registry_url,
            token: args.token,
            config_path: args.config,
            dry_run: args.dry_run,
            trust_store: args.ssl_path,
            insecure: args.insecure,
            timeout: Duration::from_secs(args.timeout),
            max_retries: args.max_retries,
            retry_delay: Duration::from_secs(args.retry_delay),
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.log_format);

    log::info!(
        "Starting {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    );

    match run(args).await {
        Ok(0) => {}
        // Each failed project has already been logged where it failed.
        Ok(_) => std::process::exit(1),
        Err(error) => {
            log::error!("{:?}", error);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    if env::var("RUST_LOG").is_err() {
        let level = match verbose {
            true => "debug",
            false => "info",
        };
        env::set_var("RUST_LOG", format!("{}={}", env!("CARGO_PKG_NAME"), level));
    }

    let mut builder = env_logger::Builder::from_default_env();
    if format == LogFormat::Json {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "module": record.target(),
                "asctime": chrono::Utc::now().to_rfc3339(),
                "levelname": record.level().to_string(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{}", line)
        });
    }
    builder.init();
}

/// Returns the number of projects that could not be cleaned.
async fn run(args: Args) -> Result<usize> {
    let settings = Settings::try_from(args)?;

    let projects = config::load_projects(&settings.config_path).await?;
    if projects.is_empty() {
        log::warn!("No projects configured in {}", settings.config_path.display());
        return Ok(0);
    }

    if settings.dry_run {
        log::warn!("Dry run mode enabled, no tag will be deleted");
    }

    let transport = ReqwestTransport::new(settings.trust_store.as_deref(), settings.insecure)
        .context("Failed to create http client")?;
    let endpoints = Endpoints::new(settings.registry_url.clone())?;
    let cleaner = Cleaner::new(
        RequestClient::new(transport)
            .with_retry_policy(RetryPolicy::fixed(settings.retry_delay)),
        endpoints,
        settings.request_options(),
        LogSink,
    )
    .dry_run(settings.dry_run);

    let outcomes = cleaner.run(&projects).await;
    Ok(report(&outcomes))
}

/// Logs the summary of every cleaned project and counts the failed ones.
///
/// Failures are not logged again here; the orchestrator already reported
/// each of them with its cause.
fn report(outcomes: &[ProjectOutcome]) -> usize {
    let mut failed = 0;
    for outcome in outcomes {
        match &outcome.result {
            Ok(summary) => log::info!("Finished project {}: {}", outcome.project, summary),
            Err(_) => failed += 1,
        }
    }

    if failed > 0 {
        log::warn!("{} of {} projects failed", failed, outcomes.len());
    }
    failed
}
