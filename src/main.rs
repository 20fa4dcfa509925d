use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use log::{LevelFilter, error, info};

mod bus;
mod commands;
mod config;
mod controller;
mod devices;
mod executor;
mod link;

/// Sweeps a distance sensor and points a fan at anything that comes close.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (defaults to ./fan-follow.toml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial port of the controller board, overrides the config file
    #[arg(short, long)]
    port: Option<String>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Enable debug messages
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    pretty_env_logger::formatted_builder()
        .filter_level(default_level)
        .parse_env("RUST_LOG")
        .init();

    if args.list_ports {
        return link::list_ports();
    }

    let config = config::AppConfig::load(args.config.as_deref())?;
    let serial = config.serial();

    let port_name = args
        .port
        .or_else(|| serial.port.clone())
        .or_else(link::find_duelink_port)
        .context("no DUELink board found; use --list-ports and pass --port")?;

    let mut link = link::SerialLink::open(&port_name, &serial)
        .with_context(|| format!("opening {}", port_name))?;
    link.synchronize().context("waiting for board prompt")?;
    info!("Connected to {}", port_name);

    let devices = devices::Devices::new(bus::DeviceBus::new(link));
    let mut controller = controller::ScanController::new(devices);
    controller.setup().await?;

    info!("Scanning");
    controller
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", err);
                std::future::pending::<()>().await;
            }
        })
        .await
}
