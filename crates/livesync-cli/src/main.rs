//! LiveSync chat CLI entry point

use clap::Parser;
use tracing::{error, info};

use livesync_cli::{
    cli::Cli,
    commands::CommandDispatcher,
    config::ChatConfig,
    error::Result,
};
use livesync_runtime::SyncEngineBuilder;
use livesync_ws::WebSocketTransport;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut config = load_configuration(&cli)?;
    config.apply_cli(&cli)?;
    let username = config.resolve_username();

    let mut engine = SyncEngineBuilder::new(config.endpoint())
        .with_config(config.sync.clone())
        .with_transport(WebSocketTransport::new(config.transport_config()))
        .start()?;
    let client = engine.client();

    info!(url = %config.url, username = %username, "Connecting to backend");
    if let Err(e) = client.connect().await {
        error!("Failed to connect: {}", e);
        let _ = engine.shutdown().await;
        std::process::exit(1);
    }

    let outcome = CommandDispatcher::execute(cli.command, client, username).await;
    if let Err(e) = engine.shutdown().await {
        error!("Engine shutdown failed: {}", e);
    }
    if let Err(e) = outcome {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    info!("LiveSync chat exited");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<ChatConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        ChatConfig::load_from_file(config_path)
    } else {
        info!("Using default configuration");
        Ok(ChatConfig::default())
    }
}
