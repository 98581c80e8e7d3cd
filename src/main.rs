use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use relayhub::bindings::RandomIdentity;
use relayhub::broker::Broker;
use relayhub::config::{BindingSettings, load_config};
use relayhub::hub::Hub;
use relayhub::transport::{WsConnector, start_websocket_server};
use relayhub::utils::{Result, logging};

#[derive(Debug, Parser)]
#[command(name = "relayhub", version, about = "Broker-to-target integration hub")]
struct Cli {
    /// Overrides the configured log level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the in-process broker over WebSocket.
    Broker,
    /// Run the configured bindings until Ctrl-C.
    Run,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(cli.log_level.as_deref().unwrap_or(&settings.log_level));

    let result = match cli.command {
        Command::Broker => {
            let addr = settings.broker_address();
            start_websocket_server(&addr, Broker::shared(), settings.broker.auth_token.clone())
                .await
        }
        Command::Run => run(&settings.bindings).await,
    };
    if let Err(e) = result {
        error!("relayhub exited: {}", e);
        std::process::exit(1);
    }
}

async fn run(bindings: &[BindingSettings]) -> Result<()> {
    let mut hub = Hub::init(bindings, &WsConnector, Arc::new(RandomIdentity)).await?;
    let token = CancellationToken::new();
    hub.start(&token).await?;
    info!(bindings = hub.len(), "relayhub running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {}", e);
    }
    info!("shutting down");
    token.cancel();
    hub.stop().await
}
