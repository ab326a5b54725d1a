//! Binary entrypoint. CLI args, logger setup, and the connector's tick loop
//! (SPEC_FULL.md §10.3), grounded on `app/core/src/main.rs`'s
//! `#[derive(Parser)] struct Args` + `#[tokio::main]` shape, trimmed of the
//! winit/window/GPU code this domain has no use for.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use log::LevelFilter;

use common::logging;
use connector::Connector;

/// Runtime parameters for the Shelly Gen1 connector (SPEC_FULL.md §10.3).
#[derive(Parser, Debug)]
#[command(name = "shelly-connector", about = "Shelly Gen1 LAN connector")]
struct ConnectorArgs {
    /// Address the CoAP multicast socket binds to.
    #[arg(long, env = "SHELLY_BIND_ADDR", default_value = "0.0.0.0:5683")]
    bind_addr: SocketAddr,

    /// Seconds of silence before a device's STATE attribute becomes LOST.
    #[arg(long, env = "SHELLY_LOST_TIMEOUT_SECS", default_value_t = 120)]
    lost_timeout_secs: u64,

    /// Seconds between discovery broadcasts.
    #[arg(long, env = "SHELLY_DISCOVERY_INTERVAL_SECS", default_value_t = 60)]
    discovery_interval_secs: u64,

    /// Sleep between tick iterations, in milliseconds (spec §5).
    #[arg(long, env = "SHELLY_TICK_INTERVAL_MS", default_value_t = 50)]
    tick_interval_ms: u64,

    #[arg(long, env = "SHELLY_LOG_LEVEL", default_value = "info")]
    log_level: LevelFilter,

    #[arg(long, env = "SHELLY_LOG_DIR")]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = ConnectorArgs::parse();

    if let Err(err) = logging::init_logger(args.log_level, args.log_dir.as_deref()) {
        eprintln!("failed to initialize logger: {err}");
        std::process::exit(1);
    }
    logging::install_panic_hook();

    log::info!("starting shelly connector, bind={}", args.bind_addr);

    let connector = Connector::with_logging_persistence_and_discovery_interval(
        args.bind_addr,
        Duration::from_secs(args.lost_timeout_secs),
        Duration::from_secs(args.discovery_interval_secs),
    );

    connector.initialize(&[]);

    if let Err(err) = connector.start().await {
        log::error!("failed to start connector: {err}");
        std::process::exit(1);
    }

    let mut signal = Box::pin(tokio::signal::ctrl_c());
    let tick_interval = Duration::from_millis(args.tick_interval_ms);

    loop {
        tokio::select! {
            _ = &mut signal => {
                log::info!("received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(tick_interval) => {
                connector.handle(common::time::now());
            }
        }
    }

    connector.stop();
}
