//! Handler trait for inbound messages.
//!
//! Every protocol role processes messages. This trait is the contract
//! between the dispatcher (which receives frames and transmits replies)
//! and the protocol logic (which interprets them).

use loralink_core::wire::{Message, MessageType};

/// Something that reacts to inbound messages of a fixed set of types.
///
/// Intentionally minimal: a handler sees one decoded message and may
/// return one immediate reply. Anything needing an acknowledged exchange
/// goes through `Delivery` from its own task instead.
pub trait MessageHandler: Send + Sync {
    /// Message types this handler is registered for.
    fn message_types(&self) -> &'static [MessageType];

    /// Handle one message. The returned reply, if any, is transmitted
    /// unacknowledged.
    fn handle(&self, msg: &Message) -> Option<Message>;
}
