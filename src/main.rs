//! # swarmcast
//!
//! Runs one peer of a configured swarm and shows an interactive status
//! console until every peer has the file or the operator exits.
//!
//! ## Usage
//!
//! ```bash
//! swarmcast <peer_id> [download_kib] [upload_kib]
//! swarmcast 1002 500 100 --common Common.cfg --peer-info PeerInfo.cfg
//! swarmcast 1002 --config swarm.toml --log-format console
//! ```
//!
//! Logs go to `log_peer_<id>.log` in the working directory unless the
//! console log format is selected.

mod console;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use console::Console;
use swarmcast::constants::UNLIMITED;
use swarmcast::{Config, LoggingConfig, PeerId, Swarm};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Runs one peer of a small file sharing swarm."
)]
struct Args {
    /// ID of this peer, as listed in the peer list
    peer_id: u32,

    /// Download limit per neighbor in KiB/s (unlimited if omitted)
    download_kib: Option<u64>,

    /// Upload limit per neighbor in KiB/s (unlimited if omitted)
    upload_kib: Option<u64>,

    /// Legacy common settings file
    #[arg(long, default_value = "Common.cfg")]
    common: PathBuf,

    /// Legacy peer list file
    #[arg(long, default_value = "PeerInfo.cfg")]
    peer_info: PathBuf,

    /// TOML configuration, used instead of the legacy files
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the peer_<id> folders and log files
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Log output: "file" or "console"
    #[arg(long)]
    log_format: Option<String>,
}

fn kib_to_bytes(kib: Option<u64>) -> i64 {
    match kib {
        Some(kib) => i64::try_from(kib.saturating_mul(1024)).unwrap_or(i64::MAX),
        None => UNLIMITED,
    }
}

fn init_tracing(config: &LoggingConfig, host: PeerId, dir: &Path) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.format == "console" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
            .context("failed to install log subscriber")?;
    } else {
        let path = dir.join(format!("log_peer_{host}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file '{}'", path.display()))?;

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            )
            .try_init()
            .context("failed to install log subscriber")?;
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_toml_file(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        None => Config::from_legacy_files(&args.common, &args.peer_info).with_context(|| {
            format!(
                "failed to load configuration from '{}' and '{}'",
                args.common.display(),
                args.peer_info.display()
            )
        })?,
    };

    if let Some(format) = &args.log_format {
        config.logging.format = format.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let host = PeerId::new(args.peer_id)
        .with_context(|| format!("peer ID {} is out of range", args.peer_id))?;
    let config = load_config(&args)?;

    std::fs::create_dir_all(&args.dir)
        .with_context(|| format!("failed to create '{}'", args.dir.display()))?;
    init_tracing(&config.logging, host, &args.dir)?;

    let download_limit = kib_to_bytes(args.download_kib);
    let upload_limit = kib_to_bytes(args.upload_kib);
    info!(
        %host,
        peers = config.peers.len(),
        file = %config.common.file_name,
        file_size = config.common.file_size,
        piece_size = config.common.piece_size,
        download_limit,
        upload_limit,
        "peer starting"
    );

    let swarm = Swarm::new(&config, host, download_limit, upload_limit, &args.dir)
        .await
        .context("failed to initialize host")?;
    swarm.start().await.context("failed to start listener")?;

    let mut console = Console::new(swarm.clone());
    tokio::select! {
        _ = console.run() => {}
        _ = interrupted() => {
            info!(%host, "received Ctrl+C");
        }
    }

    swarm.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kib_to_bytes() {
        assert_eq!(kib_to_bytes(None), -1);
        assert_eq!(kib_to_bytes(Some(0)), 0);
        assert_eq!(kib_to_bytes(Some(100)), 102_400);
        assert_eq!(kib_to_bytes(Some(u64::MAX)), i64::MAX);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["swarmcast", "1002", "500"]).unwrap();
        assert_eq!(args.peer_id, 1002);
        assert_eq!(args.download_kib, Some(500));
        assert_eq!(args.upload_kib, None);
        assert_eq!(args.common, PathBuf::from("Common.cfg"));
        assert!(args.config.is_none());

        let args = Args::try_parse_from([
            "swarmcast",
            "1001",
            "--config",
            "swarm.toml",
            "--log-format",
            "console",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("swarm.toml")));
        assert_eq!(args.log_format.as_deref(), Some("console"));

        assert!(Args::try_parse_from(["swarmcast"]).is_err());
        assert!(Args::try_parse_from(["swarmcast", "-5"]).is_err());
    }
}
