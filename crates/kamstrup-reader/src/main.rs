//! Kamstrup meter reader
//!
//! Reads registers from one or more Kamstrup heat meters through their optical
//! heads, serves them over HTTP and optionally publishes them to MQTT.

mod logging;
mod mqtt;
mod server;

use anyhow::Context;
use clap::Parser;
use kamstrup_core::config::{ReaderConfig, CONFIG_FILE_NAME};
use kamstrup_core::protocol::list_ports;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (relative paths are next to the executable)
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    if args.list_ports {
        for port in list_ports() {
            match (port.vid, port.pid) {
                (Some(vid), Some(pid)) => println!(
                    "{} [{:04x}:{:04x}] {}",
                    port.name,
                    vid,
                    pid,
                    port.product.unwrap_or_default()
                ),
                _ => println!("{}", port.name),
            }
        }
        return Ok(());
    }

    let path = ReaderConfig::resolve_path(&args.config);
    let config = ReaderConfig::load(&path)
        .with_context(|| format!("Unable to load config from {}", path.display()))?;
    info!(
        "loaded {} device(s) from {}",
        config.devices.len(),
        path.display()
    );

    let clients = Arc::new(config.clients());

    if let Some(mqtt_config) = config.mqtt.clone() {
        mqtt::start_publisher(mqtt_config, clients.clone())
            .await
            .context("Unable to start MQTT publisher")?;
    }

    let state = server::AppState::new(clients, config.notifications().to_vec());
    server::serve(&config.http.bind, state)
        .await
        .context("Unable to run web server")
}
