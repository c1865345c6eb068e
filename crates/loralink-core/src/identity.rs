//! Device identity: the 6-byte hardware address carried in every frame.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Length of a device hardware address in bytes.
pub const MAC_LEN: usize = 6;

/// A node's hardware address.
///
/// Used as the sender/recipient discriminator in every message. Not
/// authenticated beyond the pairing key check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(pub [u8; MAC_LEN]);

impl DeviceId {
    /// The all-ones address. Pairing requests carry it as `mac_master`.
    pub const BROADCAST: DeviceId = DeviceId([0xff; MAC_LEN]);

    pub const fn new(bytes: [u8; MAC_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a random locally-administered unicast address.
    pub fn random() -> Self {
        let mut bytes: [u8; MAC_LEN] = rand::random();
        // clear multicast bit, set locally-administered bit
        bytes[0] = (bytes[0] & 0xfc) | 0x02;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MAC_LEN] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device id {0:?}: expected six hex octets separated by ':'")]
pub struct ParseDeviceIdError(pub String);

impl FromStr for DeviceId {
    type Err = ParseDeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDeviceIdError(s.to_string());
        let mut bytes = [0u8; MAC_LEN];
        let mut parts = s.trim().split([':', '-']);
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(err)?;
            if part.len() != 2 {
                return Err(err());
            }
            let decoded = hex::decode(part).map_err(|_| err())?;
            *byte = decoded[0];
        }
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ParseDeviceIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> String {
        id.to_string()
    }
}
