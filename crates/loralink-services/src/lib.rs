//! loralink-services: the reliable-delivery protocol on top of a
//! half-duplex radio: acknowledged delivery, pairing, and resumable file
//! transfer.

pub mod delivery;
pub mod dispatch;
pub mod pairing;
pub mod peer;
pub mod radio;
pub mod receiver;
pub mod resume;
pub mod sender;
pub mod service;
pub mod signal;
pub mod store;
pub mod telemetry;
pub mod testing;

pub use delivery::{Delivered, Delivery, DeliveryError, RetryPolicy};
pub use dispatch::MessageDispatcher;
pub use pairing::{GatewayPairing, NodePairing, PairingState};
pub use peer::{PeerRecord, PeerRegistry};
pub use radio::{Radio, RadioError, RadioLink};
pub use receiver::{FileReceiver, ReceiverOptions, ReceiverState};
pub use resume::ResumeTracker;
pub use sender::{FileSender, TransferError, TransferMode, TransferReport};
pub use service::MessageHandler;
pub use signal::{Response, ResponseSignal};
pub use store::{DiskStore, FileStore};
pub use telemetry::TelemetryLogger;
