use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

mod api;
mod cache_bridge;
mod config;
mod repl;
mod sse;

use jobtrail_session::SessionActor;
use jobtrail_transport::{RandomJitter, TransportHandlers, TransportManager};

use crate::api::HttpChatApi;
use crate::cache_bridge::RecentChanges;
use crate::config::{ClientConfig, FileConfig, JobtrailDirs, load_config};
use crate::sse::SseConnector;

/// Notices kept for `/changes`.
const RECENT_CHANGES: usize = 32;

#[derive(Parser, Debug)]
#[command(name = "jobtrail")]
#[command(about = "Chat with the job-search assistant from a terminal")]
struct Cli {
    /// Data directory holding config.toml (default: ~/.jobtrail)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Server origin, overriding server.origin
    #[arg(long)]
    origin: Option<String>,

    /// Start with an empty conversation instead of loading history
    #[arg(long)]
    no_history: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the conversation.
    let default_directive = if cli.debug {
        "jobtrail=debug,jobtrail_transport=debug,jobtrail_session=debug,warn"
    } else {
        "jobtrail=info,jobtrail_transport=info,jobtrail_session=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let dirs = JobtrailDirs::new(cli.data_dir)?;
    let mut file_config: FileConfig = load_config(&dirs.data_dir)
        .extract()
        .with_context(|| format!("Failed to load {:?}", dirs.config_toml_path()))?;
    if let Some(origin) = cli.origin {
        file_config.server.origin = origin;
    }
    let config = ClientConfig::from_file(&file_config)?;

    info!(origin = %config.origin, stream = %config.transport.endpoint, "Starting jobtrail");

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let api = HttpChatApi::new(client.clone(), &config.origin, &config.messages_path)
        .context("Invalid messages path")?;
    let session = SessionActor::spawn(Arc::new(api), config.session.clone());

    let (changes_tx, changes_rx) = mpsc::channel(config.session.event_capacity);
    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(16);
    let handlers = TransportHandlers {
        chat: None,
        data_changed: Some(changes_tx),
        lifecycle: Some(lifecycle_tx),
    };
    // Leave headroom so oversized payloads reach the transport and are counted.
    let connector = SseConnector::new(
        client,
        config.origin.clone(),
        config.transport.max_payload_bytes.saturating_mul(4),
    );
    let transport = TransportManager::spawn(config.transport.clone(), handlers, connector, RandomJitter)
        .context("Failed to start transport")?;

    let changes = Arc::new(RecentChanges::new(RECENT_CHANGES));
    tokio::spawn(cache_bridge::run(changes_rx, changes.clone()));

    session.attach(&transport).await?;
    if !cli.no_history {
        match session.refresh_history().await {
            Ok(n) => info!(messages = n, "Loaded conversation history"),
            Err(e) => warn!(code = e.error_code(), "Could not load history: {e}"),
        }
    }
    transport.connect().await;

    let result = repl::run(session.clone(), transport.clone(), lifecycle_rx, changes).await;

    if let Err(e) = session.detach(&transport).await {
        warn!("Session already gone at shutdown: {e}");
    }
    transport.destroy().await;
    let _ = session.shutdown().await;
    info!("Bye");

    result
}
