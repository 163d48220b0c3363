use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

use uplinkd::clock::WallClock;
use uplinkd::supervisor::{LinkSupervisor, ServiceExit};
use uplinkd::ws::Endpoint;

/// Poll timeout on the serial port itself; overall command deadlines are
/// enforced by the transport.
const SERIAL_POLL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(
        short = 'm',
        long = "modem",
        default_value = "/dev/ttyUSB2",
        help = "Path to the modem AT port"
    )]
    modem: String,

    #[arg(
        short = 'b',
        long = "baud",
        default_value_t = 115_200,
        help = "Serial baud rate"
    )]
    baud: u32,

    #[arg(
        long = "host",
        env = "UPLINK_HOST",
        help = "WebSocket server host. Can also be set via UPLINK_HOST"
    )]
    host: String,

    #[arg(
        long = "port",
        env = "UPLINK_PORT",
        default_value_t = 8765,
        help = "WebSocket server port"
    )]
    port: u16,

    #[arg(
        long = "publish-interval-ms",
        default_value_t = 1000,
        help = "Milliseconds between telemetry batches"
    )]
    publish_interval_ms: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    info!("opening modem on {}", cli.modem);
    let port = serialport::new(&cli.modem, cli.baud)
        .timeout(SERIAL_POLL)
        .open()?;

    let endpoint = Endpoint {
        host: cli.host,
        port: cli.port,
    };
    let mut link = LinkSupervisor::new(port, WallClock, ServiceExit, endpoint);
    link.boot()?;

    // Synthetic 16-channel source; a real producer plugs in here through
    // the same publish surface.
    let mut tick = 0u64;
    link.run(Duration::from_millis(cli.publish_interval_ms), move || {
        tick += 1;
        (0..16)
            .map(|i| (format!("X{i}"), i as f64 + (tick % 10) as f64 / 10.0))
            .collect()
    })?;

    Ok(())
}
