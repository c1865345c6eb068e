//! loralink-core: wire format, device identity and configuration.
//! All other loralink crates depend on this one.

pub mod config;
pub mod identity;
pub mod wire;

pub use identity::DeviceId;
pub use wire::{Message, MessageType, WireError};
