//! loralinkd: loralink node/gateway daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use loralink_core::config::{ConfigError, LoralinkConfig, Role};
use loralink_core::DeviceId;
use loralink_services::radio::inbound_channel;
use loralink_services::{
    Delivery, DiskStore, FileReceiver, FileSender, FileStore, GatewayPairing, MessageDispatcher,
    NodePairing, PeerRegistry, RadioLink, ReceiverOptions, ResponseSignal, RetryPolicy,
    TelemetryLogger,
};

mod tasks;
mod udp_radio;

use udp_radio::UdpRadio;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = LoralinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = match LoralinkConfig::load() {
        Ok(config) => config,
        // values we cannot run with are fatal, an unreadable file is not
        Err(e @ ConfigError::Invalid(_)) => return Err(e).context("refusing to start"),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            LoralinkConfig::default()
        }
    };

    // `loralinkd gateway` / `loralinkd node` overrides the configured role
    if let Some(arg) = std::env::args().nth(1) {
        config.radio.role = arg.parse().map_err(anyhow::Error::msg)?;
    }

    let local = config.identity.device_id.unwrap_or_else(|| {
        let id = DeviceId::random();
        tracing::warn!(device = %id, "no device_id configured, using a random one");
        id
    });
    tracing::info!(device = %local, role = ?config.radio.role, name = %config.identity.device_name, "loralinkd starting");

    // Radio
    let (inbound_tx, inbound_rx) = inbound_channel();
    let radio = UdpRadio::open(&config.radio, inbound_tx)?;
    let link = RadioLink::new(radio);
    link.listen().context("failed to enter receive mode")?;
    let delivery = Delivery::new(link.clone(), Arc::new(ResponseSignal::new()));

    // Shared state
    let peers = match &config.peers.persist_path {
        Some(path) => PeerRegistry::with_persistence(path.clone()),
        None => PeerRegistry::new(),
    };
    tracing::info!(count = peers.len(), "peer registry ready");

    let storage = &config.transfer.storage_path;
    std::fs::create_dir_all(storage)
        .with_context(|| format!("failed to create storage dir {}", storage.display()))?;
    tracing::info!(path = %storage.display(), "storage path");
    let store: Arc<dyn FileStore> = Arc::new(DiskStore::new(storage));

    let mut dispatcher = MessageDispatcher::new(local, &delivery);
    dispatcher.register(Arc::new(TelemetryLogger));

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Role wiring ──────────────────────────────────────────────────────────
    let mut background = Vec::new();

    match config.radio.role {
        Role::Gateway => {
            dispatcher.register(Arc::new(GatewayPairing::new(local, config.pairing.key, peers.clone())));
            dispatcher.register(Arc::new(FileReceiver::new(
                store.clone(),
                peers.clone(),
                ReceiverOptions {
                    require_pairing: config.transfer.require_pairing,
                    session_idle_timeout: config.transfer.session_idle_timeout(),
                },
            )));
            tracing::info!(require_pairing = config.transfer.require_pairing, "gateway ready");
        }
        Role::Node => {
            let pairing = Arc::new(
                NodePairing::new(
                    local,
                    &config.identity.device_name,
                    config.pairing.key,
                    config.pairing.response_timeout(),
                    peers.clone(),
                )
                .context("invalid pairing identity")?,
            );
            dispatcher.register(pairing.clone());

            let sender = Arc::new(FileSender::new(
                local,
                delivery.clone(),
                store.clone(),
                RetryPolicy::from(&config.transfer),
            ));

            background.push(tokio::spawn(tasks::pairing_loop(
                pairing.clone(),
                link.clone(),
                config.pairing.interval(),
                shutdown_tx.subscribe(),
            )));
            background.push(tokio::spawn(tasks::sync_loop(
                sender,
                config.transfer.sync_files.clone(),
                config.transfer.sync_interval(),
                pairing.subscribe(),
                shutdown_tx.subscribe(),
            )));
        }
    }

    let dispatch_task = tokio::spawn(dispatcher.run(inbound_rx));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = dispatch_task      => tracing::error!("dispatcher exited: {:?}", r),
    }

    for task in background {
        task.abort();
    }

    Ok(())
}
