mod config;
mod console;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use scan_core::{HttpDirectoryClient, ScanHistory, ScanSessionController};
use shared::domain::Mode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "QR scan station for event check-in and passport delivery")]
struct Args {
    /// Base URL of the participant directory, e.g. http://127.0.0.1:8000/api
    #[arg(long)]
    directory_url: Option<String>,
    /// Mode to start in (entrada | entrega)
    #[arg(long)]
    mode: Option<Mode>,
    #[arg(long, default_value = "scanner.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so the operator dialog on stdout stays readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config)?;
    if let Some(url) = args.directory_url {
        settings.directory_url = config::normalize_directory_url(&url)?;
    }
    if let Some(mode) = args.mode {
        settings.default_mode = Some(mode);
    }

    let directory = HttpDirectoryClient::with_connect_timeout(
        settings.directory_url.clone(),
        Duration::from_secs(settings.connect_timeout_secs),
    )
    .context("failed to build directory client")?;
    info!(
        directory_url = %directory.base_url(),
        mode = ?settings.default_mode,
        "scan station ready"
    );
    let controller = Arc::new(ScanSessionController::new(
        Arc::new(directory),
        Arc::new(ScanHistory::new()),
        settings.default_mode,
    ));
    console::spawn_event_logger(controller.subscribe());

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    console::run(controller, stdin, tokio::io::stdout()).await
}
