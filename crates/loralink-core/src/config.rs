//! Configuration system for loralink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $LORALINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/loralink/config.toml
//!   3. ~/.config/loralink/config.toml

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::identity::DeviceId;
use crate::wire::MAX_DEVICE_NAME_LEN;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoralinkConfig {
    pub identity: IdentityConfig,
    pub radio: RadioConfig,
    pub pairing: PairingConfig,
    pub transfer: TransferConfig,
    pub peers: PeersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Hardware address of this device. Unset = random per run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    /// Name announced in pairing requests. At most 10 bytes.
    pub device_name: String,
}

/// Which end of the link this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sensor node: pairs with a gateway and pushes files to it.
    Node,
    /// Gateway: answers pairing and receives files.
    Gateway,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "node" => Ok(Role::Node),
            "gateway" => Ok(Role::Gateway),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub role: Role,
    /// Multicast group standing in for the shared radio channel.
    pub multicast_group: Ipv4Addr,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Network-wide shared key. Equality is the admission test.
    pub key: u32,
    /// How often an unpaired node re-evaluates its pairing state.
    pub interval_ms: u64,
    /// How long a broadcast request may go unanswered before it is resent.
    pub response_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Transmissions per frame before giving up.
    pub max_attempts: u32,
    /// Per-attempt wait for Ack or Reject.
    pub ack_timeout_ms: u64,
    /// Root directory for protocol paths (`/data/...`, `node/...`).
    pub storage_path: PathBuf,
    /// Receiver abandons a session with no traffic for this long.
    pub session_idle_timeout_secs: u64,
    /// Drop file frames from devices that never paired.
    pub require_pairing: bool,
    /// Protocol paths a node re-syncs on every pass.
    pub sync_files: Vec<String>,
    pub sync_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    /// JSON file the peer table is mirrored to. Unset = memory only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            device_name: "node".into(),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            role: Role::Node,
            multicast_group: Ipv4Addr::new(239, 77, 77, 77),
            port: 4777,
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            key: 0x4c4f_5241,
            interval_ms: 5_000,
            response_timeout_ms: 5_000,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            ack_timeout_ms: 5_000,
            storage_path: data_dir().join("storage"),
            session_idle_timeout_secs: 60,
            require_pairing: true,
            sync_files: vec!["/data/log.txt".into()],
            sync_interval_secs: 300,
        }
    }
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            persist_path: Some(data_dir().join("peers.json")),
        }
    }
}

impl PairingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl TransferConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("loralink")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("loralink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LoralinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, still applying env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            LoralinkConfig::default()
        };
        config.apply_env_overrides();

        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }
        Ok(config)
    }

    /// Check values the runtime cannot work with. Returns one message per
    /// problem; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.identity.device_name.len() > MAX_DEVICE_NAME_LEN {
            errors.push(format!(
                "identity.device_name {:?} is longer than {} bytes",
                self.identity.device_name, MAX_DEVICE_NAME_LEN
            ));
        }
        for (field, value) in [
            ("pairing.interval_ms", self.pairing.interval_ms),
            ("pairing.response_timeout_ms", self.pairing.response_timeout_ms),
            ("transfer.max_attempts", u64::from(self.transfer.max_attempts)),
            ("transfer.ack_timeout_ms", self.transfer.ack_timeout_ms),
            ("transfer.session_idle_timeout_secs", self.transfer.session_idle_timeout_secs),
            ("transfer.sync_interval_secs", self.transfer.sync_interval_secs),
        ] {
            if value == 0 {
                errors.push(format!("{field} must be greater than 0"));
            }
        }

        errors
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LORALINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&LoralinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply LORALINK_* env var overrides. Unparsable values are ignored.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("LORALINK_IDENTITY__DEVICE_ID") {
            if let Ok(id) = v.parse() {
                self.identity.device_id = Some(id);
            }
        }
        if let Some(v) = var("LORALINK_IDENTITY__DEVICE_NAME") {
            self.identity.device_name = v;
        }
        if let Some(v) = var("LORALINK_RADIO__ROLE") {
            if let Ok(role) = v.parse() {
                self.radio.role = role;
            }
        }
        if let Some(v) = var("LORALINK_RADIO__PORT") {
            if let Ok(p) = v.parse() {
                self.radio.port = p;
            }
        }
        if let Some(v) = var("LORALINK_PAIRING__KEY") {
            if let Some(key) = parse_key(&v) {
                self.pairing.key = key;
            }
        }
        if let Some(v) = var("LORALINK_TRANSFER__MAX_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.transfer.max_attempts = n;
            }
        }
        if let Some(v) = var("LORALINK_TRANSFER__ACK_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.transfer.ack_timeout_ms = ms;
            }
        }
        if let Some(v) = var("LORALINK_TRANSFER__STORAGE_PATH") {
            self.transfer.storage_path = PathBuf::from(v);
        }
        if let Some(v) = var("LORALINK_TRANSFER__REQUIRE_PAIRING") {
            self.transfer.require_pairing = v == "true" || v == "1";
        }
    }
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_key(v: &str) -> Option<u32> {
    match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => v.parse().ok(),
    }
}
