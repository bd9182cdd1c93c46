use clap::Parser;
use log::{error, info};
use server::coordinator::{CoordinatorConfig, SyncCoordinator};
use server::network::{UdpTransport, UdpTransportConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Capacity of the transport-to-coordinator event queue
const EVENT_QUEUE_CAPACITY: usize = 1024;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Milliseconds between state broadcasts
    #[arg(short, long, default_value = "5")]
    broadcast_interval_ms: u64,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(short = 't', long, default_value = "5")]
    client_timeout_secs: u64,

    /// Forget a client's state when it disconnects instead of broadcasting it forever
    #[arg(long)]
    remove_on_disconnect: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let transport = Arc::new(
        UdpTransport::bind(
            &address,
            UdpTransportConfig {
                max_clients: args.max_clients,
                client_timeout: Duration::from_secs(args.client_timeout_secs),
            },
        )
        .await?,
    );

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let transport_handles = transport.start(event_tx);

    let coordinator = Arc::new(SyncCoordinator::new(
        Arc::clone(&transport),
        CoordinatorConfig {
            broadcast_interval: Duration::from_millis(args.broadcast_interval_ms),
            remove_on_disconnect: args.remove_on_disconnect,
        },
    ));

    // Console input: commands start with '/'
    let console_handle = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        coordinator.on_console_input(&line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read console input: {}", e);
                        break;
                    }
                }
            }
        })
    };

    let coordinator_handle = tokio::spawn(Arc::clone(&coordinator).run(event_rx));

    info!("Server started successfully");

    tokio::select! {
        result = coordinator_handle => {
            if let Err(e) = result {
                error!("Coordinator task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    console_handle.abort();
    for handle in transport_handles {
        handle.abort();
    }

    Ok(())
}
