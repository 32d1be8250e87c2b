//! MicroPush bridge
//!
//! Drives a MicroPush controller from a simulated clip-launching session.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use micropush_bridge::bridge::{BridgeHandle, BridgeOptions};
use micropush_bridge::config::{BridgeConfig, ConfigWatcher};
use micropush_bridge::controller::{discovery, Controller};
use micropush_bridge::session::MemorySession;
use micropush_bridge::sniffer;
use micropush_bridge::transport::{ConsoleTransport, Transport};

/// MicroPush bridge - session sync for the MicroPush controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "MICROPUSH_CONFIG", default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Print decoded traffic from the controller input port
    #[arg(long)]
    sniffer: bool,

    /// Log outbound frames instead of opening the controller
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting MicroPush bridge...");
    info!("Configuration file: {}", args.config);

    if args.list_ports {
        let config = BridgeConfig::load(&args.config).await.ok();
        discovery::print_ports(config.as_ref().map(|c| &c.midi));
        return Ok(());
    }

    if args.sniffer {
        let config = BridgeConfig::load(&args.config).await?;
        sniffer::run_cli_sniffer(&config.midi.input_port, config.controls.clone()).await?;
        return Ok(());
    }

    let (watcher, initial_config) = ConfigWatcher::new(args.config.clone()).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    run_app(&initial_config, watcher, args.dry_run).await?;

    info!("MicroPush bridge shutdown complete");
    Ok(())
}

async fn run_app(config: &BridgeConfig, mut watcher: ConfigWatcher, dry_run: bool) -> Result<()> {
    let session = Arc::new(MemorySession::from_config(&config.session));
    let options = BridgeOptions::from_config(config);

    let (handle, controller) = if dry_run {
        info!("Dry run: frames are logged, no MIDI port is opened");
        let transport: Arc<dyn Transport> = Arc::new(ConsoleTransport::new("console"));
        (BridgeHandle::spawn(session, transport, options), None)
    } else {
        let controller = Arc::new(Controller::open(&config.midi).context("Failed to open controller")?);
        let handle = BridgeHandle::spawn(session, controller.clone(), options);
        controller
            .listen(handle.clone())
            .context("Failed to open controller input")?;
        (handle, Some(controller))
    };

    info!("Bridge running, press Ctrl+C to stop");

    let mut reload = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            update = watcher.next_update(), if reload => {
                let Some(update) = update else {
                    warn!("Config watcher closed, hot reload disabled");
                    reload = false;
                    continue;
                };
                if update.ports_changed {
                    warn!("MIDI port changes take effect after restart");
                }
                handle.update_options(update.options);
            }
        }
    }

    if let Some(released) = handle.shutdown().await {
        info!("Released {} session subscriptions", released);
    }
    if let Some(controller) = controller {
        controller.disconnect();
    }
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
