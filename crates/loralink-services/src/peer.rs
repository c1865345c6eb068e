//! Peer registry: devices admitted by pairing.
//!
//! Shared between the pairing handlers, the file receiver and the daemon.
//! When constructed with a `persist_path`, the table is written to disk on
//! every mutation and reloaded on startup, so a gateway restart does not
//! force every node to pair again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use loralink_core::DeviceId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub device: DeviceId,
    /// Name announced in the pairing request. May be empty.
    pub name: String,
    /// Seconds since the Unix epoch.
    pub paired_at: u64,
}

#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<DeviceId, PeerRecord>>,
    persist_path: Arc<Option<PathBuf>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry mirrored to `path`. Existing records are loaded.
    pub fn with_persistence(path: PathBuf) -> Self {
        let registry = Self {
            peers: Arc::new(DashMap::new()),
            persist_path: Arc::new(Some(path)),
        };
        registry.load_from_disk();
        registry
    }

    /// Insert or overwrite the record for `device`.
    pub fn upsert(&self, device: DeviceId, name: &str) -> PeerRecord {
        let record = PeerRecord {
            device,
            name: name.to_string(),
            paired_at: unix_now(),
        };
        let previous = self.peers.insert(device, record.clone());
        self.save_to_disk();

        if previous.is_some() {
            tracing::info!(peer = %device, name, "peer re-paired");
        } else {
            tracing::info!(peer = %device, name, "peer added");
        }
        record
    }

    pub fn get(&self, device: &DeviceId) -> Option<PeerRecord> {
        self.peers.get(device).map(|r| r.value().clone())
    }

    pub fn contains(&self, device: &DeviceId) -> bool {
        self.peers.contains_key(device)
    }

    /// The announced name, if the peer is known and gave one.
    pub fn name_of(&self, device: &DeviceId) -> Option<String> {
        self.peers
            .get(device)
            .map(|r| r.value().name.clone())
            .filter(|name| !name.is_empty())
    }

    /// All records, ordered by device id.
    pub fn list(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.peers.iter().map(|e| e.value().clone()).collect();
        records.sort_by_key(|r| r.device);
        records
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl PeerRegistry {
    /// Serialize all records to disk as JSON. Best-effort, logs on failure.
    fn save_to_disk(&self) {
        let path = match self.persist_path.as_ref() {
            Some(p) => p,
            None => return,
        };
        let snapshot = self.list();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(path, json) {
                    tracing::warn!(error = %e, path = %path.display(), "failed to persist peers");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize peers");
            }
        }
    }

    /// Load records from disk. Called once during construction.
    fn load_from_disk(&self) {
        let path = match self.persist_path.as_ref() {
            Some(p) => p,
            None => return,
        };
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to read peers");
                return;
            }
        };
        let records: Vec<PeerRecord> = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to parse peers");
                return;
            }
        };
        let loaded = records.len();
        for record in records {
            self.peers.insert(record.device, record);
        }
        if loaded > 0 {
            tracing::info!(count = loaded, path = %path.display(), "loaded persisted peers");
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
