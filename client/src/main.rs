use clap::Parser;
use client::input::{InputPattern, ScriptedInput};
use client::network::{Client, ClientConfig};
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulation ticks per second
    #[arg(short = 't', long, default_value = "60")]
    tick_rate: u32,

    /// Movement pattern standing in for keyboard input
    #[arg(short = 'i', long, value_enum, default_value = "circle")]
    input: InputPattern,

    /// Seconds to wait for the server before giving up
    #[arg(short = 'c', long, default_value = "5")]
    connect_timeout_secs: u64,

    /// Stop after this many seconds (0 runs until Ctrl+C)
    #[arg(short = 'd', long, default_value = "0")]
    duration_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = ClientConfig::new(&args.server)?;
    config.tick_rate = args.tick_rate;
    config.connect_timeout = Duration::from_secs(args.connect_timeout_secs);
    config.run_for = (args.duration_secs > 0).then(|| Duration::from_secs(args.duration_secs));

    info!("Starting client...");
    info!("Input pattern: {:?} at {} ticks/s", args.input, args.tick_rate);

    let mut client = Client::new(config, ScriptedInput::new(args.input)).await?;
    client.run().await?;

    info!("Final status: {:?}", client.status());

    Ok(())
}
