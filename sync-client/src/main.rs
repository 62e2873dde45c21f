//! Sync client - command line entry point.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use sync_client::transfer::progress::Progress;
use sync_client::version::VersionFile;
use sync_client::{config::Config, utils, Session, SessionOptions, UpdateStatus, Updater};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Local sync root (overrides config)
    #[arg(short, long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare the local version with the server's latest
    Check,
    /// Show what an update would delete and download
    Verify {
        /// Manifest version (default: latest)
        #[arg(long)]
        version: Option<String>,
    },
    /// Bring the local tree in line with a manifest
    Update {
        /// Manifest version (default: latest)
        #[arg(long)]
        version: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(root) = args.root {
        config.sync.root = root;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting sync-client v{} (server: {}, root: {})",
        env!("CARGO_PKG_VERSION"),
        config.server_addr(),
        config.sync.root.display()
    );

    let session = Session::new(SessionOptions::from_config(&config));
    session.connect().await?;

    let updater = Updater::new(
        session.clone(),
        config.sync.root.clone(),
        VersionFile::new(config.version_path()),
    );

    let result = run(args.command, updater, &session).await;
    session.disconnect();
    result
}

async fn run(command: Command, updater: Updater, session: &Session) -> Result<()> {
    match command {
        Command::Check => match updater.check().await? {
            UpdateStatus::UpToDate { version } => println!("Up to date ({version})"),
            UpdateStatus::Outdated { local, latest } => println!(
                "Update available: {} -> {latest}",
                local.as_deref().unwrap_or("none")
            ),
            UpdateStatus::NoManifest => println!("The server has no manifest"),
        },
        Command::Verify { version } => {
            let (manifest, report) = updater.plan(version.as_deref()).await?;
            println!("Manifest {} ({})", manifest.version, manifest.time);
            for path in &report.to_delete {
                println!("  delete   {path}");
            }
            for entry in &report.to_download {
                println!("  download {}", entry.target_path);
            }
            if report.is_empty() {
                println!("  local files match");
            }
        }
        Command::Update { version } => {
            let progress = session.progress();
            let mut pass = updater.spawn(version);

            let outcome = loop {
                tokio::select! {
                    joined = &mut pass => break joined??,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => log_progress(&progress),
                    _ = tokio::signal::ctrl_c() => {
                        pass.abort();
                        bail!("Update interrupted");
                    }
                }
            };

            println!(
                "Version {}: {} deleted, {} downloaded, {} failed",
                outcome.version, outcome.deleted, outcome.downloaded, outcome.failures
            );
            if !outcome.advanced {
                bail!("{} downloads failed", outcome.failures);
            }
        }
    }
    Ok(())
}

fn log_progress(progress: &Progress) {
    if let Some(snapshot) = progress.snapshot() {
        tracing::info!(
            "Progress {}/{} ({:.0}%), {} failed",
            snapshot.completed,
            snapshot.total,
            snapshot.percent_complete(),
            snapshot.failures
        );
    }
}
