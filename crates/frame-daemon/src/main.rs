mod compose;
mod core;
mod replace;
mod tv;

use anyhow::Context;
use clap::{Parser, Subcommand};
use frame_proto::config::{Config, LoggingConfig};
use frame_proto::cover::LastFmResolver;
use frame_proto::protocol::ImageFormat;
use frame_proto::track::NowPlayingClient;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::compose::ImageComposer;
use crate::core::SyncLoop;
use crate::replace::{replace_artwork, ReplaceOptions};
use crate::tv::{SamsungConnector, TvConnector};

const DEFAULT_FILTER: &str = "info,frame_daemon=debug,frame_proto=debug";

#[derive(Parser, Debug)]
#[command(name = "frame-daemon", about = "Keep a Samsung Frame's artwork in sync with the radio")]
struct Cli {
    /// Config file (default: ~/.config/frame-sync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the station and update the television (default)
    Run,
    /// Push a local image through one replacement sequence
    Upload {
        /// JPEG or PNG file
        image: PathBuf,
    },
    /// Print whether the television is in art mode
    ArtMode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    init_logging(&config.logging)?;
    match &cli.config {
        Some(path) => info!("Config loaded from: {:?}", path),
        None => info!("Config loaded from: {:?}", Config::config_path()),
    }
    for rejected in config.apply_env_overrides(|key| std::env::var(key).ok()) {
        warn!("Ignoring environment override {}", rejected);
    }
    config.validate()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Upload { image } => upload(&config, image).await,
        Command::ArtMode => art_mode(&config).await,
    }
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let file_layer = match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(log_file)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    if let Some(path) = &logging.file {
        info!("Log file: {:?}", path);
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let source = NowPlayingClient::new(&config.source)?;
    let covers = LastFmResolver::new(&config.cover)?;
    if config.cover.api_key.is_none() {
        warn!("No Last.fm API key configured (cover.api_key / LASTFM_API_KEY); covers will not resolve");
    }
    let composer = ImageComposer::new(config.compose.clone())?;
    let tv = SamsungConnector::new(config.tv.clone())?;

    let mut sync = SyncLoop::new(
        &config,
        Box::new(source),
        Box::new(covers),
        Box::new(composer),
        Box::new(tv),
    );

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        stopper.cancel();
    });

    info!("Daemon initialised, tv={}:{}", config.tv.host, config.tv.port);
    sync.run(cancel).await;
    info!("Shutdown complete");
    Ok(())
}

async fn upload(config: &Config, image: PathBuf) -> anyhow::Result<()> {
    let format = ImageFormat::from_path(&image)
        .with_context(|| format!("{} is not a .jpg/.jpeg/.png file", image.display()))?;
    let bytes = tokio::fs::read(&image)
        .await
        .with_context(|| format!("cannot read {}", image.display()))?;

    let tv = SamsungConnector::new(config.tv.clone())?;
    let done = replace_artwork(&tv, &bytes, format, &ReplaceOptions::from_config(&config.tv)).await?;

    println!("selected {}", done.handle);
    if let Some(previous) = &done.previous {
        let status = if done.previous_deleted { "deleted" } else { "kept" };
        println!("previous {} {}", previous, status);
    }
    Ok(())
}

async fn art_mode(config: &Config) -> anyhow::Result<()> {
    let tv = SamsungConnector::new(config.tv.clone())?;
    let session = tv.open().await?;
    let status = session.art_mode().await;
    session.close().await;
    println!("art mode: {}", if status? { "on" } else { "off" });
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("cannot install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
