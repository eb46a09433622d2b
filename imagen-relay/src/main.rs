//! imagen-relay
//!
//! Reads JSON-RPC requests from stdin, writes responses to stdout and serves
//! generated images over HTTP until stdin closes or a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use imagen_relay::{ImageService, ImagenClient, resources, rpc};
use imagen_relay_common::config::{DATA_DIR_ENV, DEFAULT_LOG_LEVEL};
use imagen_relay_common::tracing::try_init_tracing;
use imagen_relay_common::{Config, shutdown_channel, wait_for_shutdown_signal};
use tokio::io::BufReader;

/// Command-line arguments for the relay.
#[derive(Parser, Debug)]
#[command(name = "imagen-relay")]
#[command(about = "JSON-RPC image generation relay with a local HTTP image server")]
#[command(version)]
struct Args {
    /// Root data directory (defaults to the platform application-data directory)
    #[arg(long, env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Log level or filter directive, overriding LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            // Startup may fail before the file logger exists
            let _ = try_init_tracing(DEFAULT_LOG_LEVEL, None);
            tracing::error!(error = %format!("{:#}", e), "imagen-relay exited with an error");
            1
        }
    };

    // A blocking stdin read cannot be cancelled and would stall runtime shutdown
    std::process::exit(code);
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_env(args.data_dir).context("Failed to load configuration")?;
    config.ensure_dirs()?;

    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    try_init_tracing(level, Some(&config.log_dir))?;

    tracing::info!(
        data_dir = %config.data_dir.display(),
        model = %config.model,
        base_url = %config.public_base_url(),
        "imagen-relay starting"
    );

    let generator = Arc::new(ImagenClient::new(&config));
    let service = ImageService::from_config(&config, generator);

    let listener = resources::bind(&config.listen_addr, config.port).await?;
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let http = tokio::spawn(resources::serve(listener, service.store().clone(), shutdown_rx));

    let stdin = BufReader::new(tokio::io::stdin());
    let rpc_result = rpc::run_until(service, stdin, tokio::io::stdout(), wait_for_shutdown_signal())
        .await
        .context("RPC loop failed");

    tracing::info!("Shutting down resource server");
    let _ = shutdown_tx.send(());
    http.await.context("Resource server task failed")??;

    rpc_result?;
    tracing::info!("imagen-relay stopped");
    Ok(())
}
