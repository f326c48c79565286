use anyhow::Context;
use tracing::Level;

use wxbridge::bridge::Dispatcher;
use wxbridge::config::Config;
use wxbridge::engine::Engine;
use wxbridge::net::{HostNetwork, Network};
use wxbridge::registry::Registry;
use wxbridge::serial::device::{open_command_channel, open_debug_channel};
use wxbridge::serial::writer::DEFAULT_CHANNEL_CAPACITY;
use wxbridge::serial::{SerialReader, spawn_writer};
use wxbridge::{server, settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    // The controller channel may be stdout, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(cfg.log_level.parse::<Level>().unwrap_or(Level::INFO))
        .with_writer(std::io::stderr)
        .init();

    let (serial_in, serial_out) = open_command_channel(&cfg.serial.device).await?;
    let debug = open_debug_channel(cfg.serial.debug_device.as_deref()).await?;

    let (serial, writer_task) = spawn_writer(serial_out, DEFAULT_CHANNEL_CAPACITY);
    let network = HostNetwork::new();
    let mut initial = cfg.settings.clone();
    if initial.station_ipaddr.is_unspecified() {
        if let Some(ip) = network.local_ipv4() {
            initial.station_ipaddr = ip;
        }
    }
    let settings = settings::shared(initial);
    let registry = Registry::new(settings.clone(), serial.clone());

    let dispatcher = Dispatcher::new(
        network,
        registry.clone(),
        settings,
        serial,
        debug,
        &cfg.bridge,
    );
    let engine = Engine::new(
        SerialReader::with_chunk_size(serial_in, cfg.serial.read_chunk),
        dispatcher,
    );

    tracing::info!(device = %cfg.serial.device, listen = %cfg.server.listen_addr, "Bridge starting");

    tokio::select! {
        res = server::listener::bind_and_run(&cfg.server.listen_addr, registry) => {
            res.with_context(|| format!("HTTP listener on {} failed", cfg.server.listen_addr))?;
        }

        res = engine.run() => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    writer_task.abort();
    Ok(())
}
