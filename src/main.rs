mod client;
mod config;
mod constants;
mod data_structures;
mod downloader;
mod endpoint;
mod error;
mod fs;
mod macros;
mod peer_connection;
mod protocol;
mod scheduler;
mod seeder;
mod shutdown;
mod tracker;
mod transfer;

use crate::client::Client;
use crate::config::{Command, Config};
use crate::tracker::{spawn_tracker_server, TrackerRegistry};
use anyhow::{anyhow, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::new();
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    match config.command {
        Command::Tracker { port } => {
            let listener = TcpListener::bind(("0.0.0.0", port)).await?;

            spawn_tracker_server(listener, TrackerRegistry::new(), shutdown_rx);
        }
        Command::Seed {
            file,
            trackers,
            name,
            data_port,
        } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("cannot derive a swarm name from {:?}", file))?,
            };

            let client = Client::new(shutdown_rx);
            client.seed(&name, &file, trackers, data_port).await?;
        }
        Command::Download {
            name,
            output,
            trackers,
            data_port,
        } => {
            let client = Client::new(shutdown_rx);
            let transfer = client.download(&name, &output, trackers, data_port).await?;

            // keep seeding after the download lands, until ctrl-c
            tokio::spawn(async move {
                transfer.completed().await;
                info!("download complete: {}", transfer);
            });
        }
    }

    signal::ctrl_c().await?;
    info!("shutting down");

    shutdown_tx.shutdown().await;

    Ok(())
}
