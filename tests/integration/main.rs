//! loralink integration tests.
//!
//! Whole devices (dispatcher, pairing, sender or receiver) wired together
//! over an in-memory [`AirChannel`]. Every test runs with paused time, so
//! ack and session timeouts elapse instantly.
//!
//!   cargo test --test integration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;

use loralink_core::DeviceId;
use loralink_services::testing::AirChannel;
use loralink_services::{
    Delivery, DiskStore, FileReceiver, FileSender, FileStore, GatewayPairing, MessageDispatcher,
    NodePairing, PeerRegistry, RadioLink, ReceiverOptions, ResponseSignal, RetryPolicy,
};

mod pairing;
mod resume;
mod retry;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const PAIRING_KEY: u32 = 0x4c4f_5241;
pub const GATEWAY_MAC: DeviceId = DeviceId::new([0x02, 0x4c, 0x52, 0x00, 0x00, 0x01]);
pub const ALPHA_MAC: DeviceId = DeviceId::new([0x02, 0x4c, 0x52, 0x00, 0x00, 0x0a]);
pub const BETA_MAC: DeviceId = DeviceId::new([0x02, 0x4c, 0x52, 0x00, 0x00, 0x0b]);

/// Scratch directory removed on drop.
pub struct TempRoot(PathBuf);

impl TempRoot {
    pub fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("loralink-it-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempRoot {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

pub struct Gateway {
    pub peers: PeerRegistry,
    pub receiver: Arc<FileReceiver>,
    pub store: Arc<DiskStore>,
}

impl Gateway {
    /// Contents of a received file, empty if it does not exist.
    pub fn received(&self, path: &str) -> Vec<u8> {
        self.store
            .resolve(path)
            .ok()
            .and_then(|p| std::fs::read(p).ok())
            .unwrap_or_default()
    }
}

/// Start a gateway listening on `air` with its store under `root/gateway`.
pub fn spawn_gateway(air: &AirChannel, root: &Path, key: u32) -> Gateway {
    let (radio, inbound) = air.attach("gateway");
    let link = RadioLink::new(radio);
    link.listen().unwrap();
    let delivery = Delivery::new(link, Arc::new(ResponseSignal::new()));

    let peers = PeerRegistry::new();
    let store = Arc::new(DiskStore::new(root.join("gateway")));
    let receiver = Arc::new(FileReceiver::new(
        store.clone(),
        peers.clone(),
        ReceiverOptions::default(),
    ));

    let mut dispatcher = MessageDispatcher::new(GATEWAY_MAC, &delivery);
    dispatcher.register(Arc::new(GatewayPairing::new(GATEWAY_MAC, key, peers.clone())));
    dispatcher.register(receiver.clone());
    tokio::spawn(dispatcher.run(inbound));

    Gateway { peers, receiver, store }
}

pub struct Node {
    pub pairing: Arc<NodePairing>,
    pub sender: FileSender,
    pub store: Arc<DiskStore>,
    pub peers: PeerRegistry,
    link: RadioLink,
}

/// Start a node named `name` on `air`; its radio is labelled `name` too.
pub fn spawn_node(air: &AirChannel, root: &Path, name: &str, mac: DeviceId, key: u32) -> Node {
    let (radio, inbound) = air.attach(name);
    let link = RadioLink::new(radio);
    link.listen().unwrap();
    let delivery = Delivery::new(link.clone(), Arc::new(ResponseSignal::new()));

    let peers = PeerRegistry::new();
    let store = Arc::new(DiskStore::new(root.join(name)));
    let pairing = Arc::new(
        NodePairing::new(mac, name, key, Duration::from_secs(5), peers.clone()).unwrap(),
    );

    let mut dispatcher = MessageDispatcher::new(mac, &delivery);
    dispatcher.register(pairing.clone());
    tokio::spawn(dispatcher.run(inbound));

    let sender = FileSender::new(mac, delivery, store.clone(), RetryPolicy::default());
    Node {
        pairing,
        sender,
        store,
        peers,
        link,
    }
}

impl Node {
    /// Broadcast one pairing request and wait for the answer.
    pub async fn pair(&self) -> Result<DeviceId> {
        let mut paired = self.pairing.subscribe();
        let request = self
            .pairing
            .poll(Instant::now())
            .context("no pairing request due")?;
        self.link.send(&request)?;

        let gateway = *tokio::time::timeout(Duration::from_secs(1), paired.wait_for(Option::is_some))
            .await
            .context("no pairing response")?
            .context("pairing watch closed")?;
        gateway.context("paired without a gateway")
    }

    pub fn write_file(&self, path: &str, contents: &[u8]) {
        let full = self.store.resolve(path).unwrap();
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, contents).unwrap();
    }

    pub fn append_file(&self, path: &str, contents: &[u8]) {
        self.store.ensure_append(path).unwrap();
        self.store.append(path, contents).unwrap();
    }
}

/// Deterministic file contents that make misplaced chunks visible.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
