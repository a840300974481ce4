//! artifact-cli entry point.

mod config;
mod report;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use artifact_connector::{Download, RepositoryConnector, Upload};
use artifact_transfer::ChecksumPolicy;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::report::LogReporter;

#[derive(Debug, Parser)]
#[command(
    name = "artifact-cli",
    version,
    about = "Fetch and publish artifacts in an HTTP repository"
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a resource and verify it against its checksum siblings.
    Get {
        /// Repository base URL.
        repository: String,
        /// Repository-relative resource path.
        path: String,
        /// Local destination file.
        dest: PathBuf,
        /// fail, warn or ignore.
        #[arg(long)]
        policy: Option<ChecksumPolicy>,
    },
    /// Upload a local file to the repository.
    Put {
        repository: String,
        path: String,
        src: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli.command, config))
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    let reporter = Arc::new(LogReporter::new(Duration::from_millis(
        config.progress_interval_ms,
    )));

    match command {
        Command::Get {
            repository,
            path,
            dest,
            policy,
        } => {
            let connector = RepositoryConnector::http(repository, config.connector)?;
            connector.subscribe(reporter);
            let policy = policy.unwrap_or(config.checksum_policy);
            let mut batch = [Download::new(path, dest).with_checksum_policy(policy)];
            connector.get(&mut batch).await?;
            connector.close();

            let [download] = batch;
            if let Some(error) = download.error {
                return Err(error).with_context(|| format!("failed to download {}", download.path));
            }
            tracing::info!(file = %download.file.display(), "download complete");
        }
        Command::Put {
            repository,
            path,
            src,
        } => {
            let connector = RepositoryConnector::http(repository, config.connector)?;
            connector.subscribe(reporter);
            let mut batch = [Upload::new(path, src)];
            connector.put(&mut batch).await?;
            connector.close();

            let [upload] = batch;
            if let Some(error) = upload.error {
                return Err(error).with_context(|| format!("failed to upload {}", upload.path));
            }
            tracing::info!(resource = %upload.path, "upload complete");
        }
    }
    Ok(())
}
