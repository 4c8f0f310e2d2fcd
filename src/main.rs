//! CLI for PopMQTT
//!
//! Subcommands:
//! - `server`: run the MQTT listeners
//! - `config`: print the effective configuration

use std::path::PathBuf;

use clap::Parser;
use popmqtt::broker::Broker;
use popmqtt::config::{Settings, load_config_from};
use popmqtt::transport::{start_tcp_server, start_websocket_server};
use popmqtt::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "popmqtt")]
enum Command {
    /// Start the broker
    Server {
        /// Extra configuration file layered over config/default
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration and exit
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cmd = Command::parse();

    match cmd {
        Command::Server { config } => match load_config_from(config.as_deref()) {
            Ok(settings) => {
                logging::init(&settings.logging.level);
                if let Err(e) = run_server(settings).await {
                    error!("Server failed: {}", e);
                }
            }
            Err(e) => eprintln!("Failed to load configuration: {e}"),
        },
        Command::Config { config } => match load_config_from(config.as_deref()) {
            Ok(settings) => println!("{settings:#?}"),
            Err(e) => eprintln!("Failed to load configuration: {e}"),
        },
    }
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let broker = Broker::new(settings.broker.clone());
    let tcp_addr = format!("{}:{}", settings.server.host, settings.server.port);

    let websocket = async {
        match settings.server.websocket_port {
            Some(port) => {
                let addr = format!("{}:{}", settings.server.host, port);
                start_websocket_server(&addr, broker.clone()).await
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = start_tcp_server(&tcp_addr, broker.clone()) => {
            error!("TCP listener exited unexpectedly.");
            result?;
        }
        result = websocket => {
            error!("WebSocket listener exited unexpectedly.");
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            broker.shutdown();
        }
    }

    Ok(())
}
