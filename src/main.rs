use clap::{ArgAction, Parser};
use miette::miette;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use trawl_config::{Config, Overrides};
use trawl_remote::{HttpSource, SourceHandle};
use trawl_storage::{S3Store, StoreHandle};
use trawl_sync::SyncOptions;

/// Mirror an HTTP directory index into an S3-compatible bucket.
///
/// Unchanged files (same size, and the same Last-Modified/ETag where the
/// server reports them) are skipped, so repeated runs only move what changed.
///
/// S3 credentials must be configured explicitly, as `s3.key_id` and
/// `s3.key_secret` in the configuration file or as `TRAWL_S3__KEY_ID` and
/// `TRAWL_S3__KEY_SECRET` in the environment. The AWS credential chain
/// (profiles, instance roles, `AWS_*` variables) is not consulted.
#[derive(Debug, Parser)]
#[command(name = "trawl", version)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON, chosen by extension).
    #[arg(short, long, env = "TRAWL_CONFIG")]
    config: Option<PathBuf>,
    /// Destination bucket.
    #[arg(short, long)]
    bucket: Option<String>,
    /// Key prefix inside the bucket.
    #[arg(short, long)]
    prefix: Option<String>,
    /// URL of the remote index page.
    #[arg(long)]
    base_url: Option<String>,
    /// User-Agent sent with every remote request.
    #[arg(long)]
    user_agent: Option<String>,
    /// Seconds to wait after each index fetch or metadata probe.
    #[arg(long, value_name = "SECONDS")]
    rate_limit: Option<f64>,
    /// Delete mirrored objects that are no longer listed remotely.
    #[arg(long)]
    delete_missing: bool,
    /// Report what would change without writing or deleting anything.
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// More logging (repeatable).
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,
    /// Less logging (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    quiet: u8,
}
impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            base_url: self.base_url.clone(),
            user_agent: self.user_agent.clone(),
            request_delay: self.rate_limit,
            delete_missing: self.delete_missing,
            dry_run: self.dry_run,
        }
    }

    fn log_level(&self) -> &'static str {
        match i16::from(self.verbose) - i16::from(self.quiet) {
            ..=-2 => "error",
            -1 => "warn",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Render an error tree (with locations) as a diagnostic.
fn report<E>(err: exn::Exn<E>) -> miette::Report
where
    E: std::error::Error + Send + Sync + 'static,
{
    miette!("{err:?}")
}

fn init_tracing(level: &str) {
    // RUST_LOG, when set, wins over the command-line verbosity.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn remote(config: &Config) -> miette::Result<SourceHandle> {
    let source = HttpSource::builder(config.base_url.as_str())
        .user_agent(config.user_agent.as_str())
        .delay(config.request_delay())
        .build()
        .map_err(report)?;
    Ok(Arc::new(source))
}

fn store(config: &Config) -> StoreHandle {
    let s3 = &config.s3;
    // Both keys are present once the configuration has been validated.
    Arc::new(S3Store::new(
        "s3",
        config.bucket.as_str(),
        s3.region.as_str(),
        s3.endpoint.as_deref(),
        s3.key_id.clone().unwrap_or_default(),
        s3.key_secret.clone().unwrap_or_default(),
        s3.session_token.clone(),
    ))
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level());

    let config = Config::load(cli.config.as_deref(), &cli.overrides()).map_err(report)?;
    tracing::debug!(?config, "Configuration loaded");
    let options = SyncOptions {
        prefix: config.prefix.clone(),
        delete_missing: config.delete_missing,
        dry_run: config.dry_run,
    };
    let (remote, store) = (remote(&config)?, store(&config));

    let summary = trawl_sync::run(&remote, &store, &options).await.map_err(report)?;
    if config.dry_run {
        tracing::warn!("Dry run: nothing was written or deleted");
    }
    println!("{summary}");
    Ok(())
}
