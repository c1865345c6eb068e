//! Routes inbound frames: responses to the waiting sender, everything else
//! to the handler registered for its message type.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use loralink_core::wire::{Message, MessageType};
use loralink_core::DeviceId;
use tokio::sync::mpsc;

use crate::delivery::Delivery;
use crate::radio::RadioLink;
use crate::service::MessageHandler;
use crate::signal::{Response, ResponseSignal};

/// Maps message types to handlers and dispatches received frames.
pub struct MessageDispatcher {
    local: DeviceId,
    link: RadioLink,
    signal: Arc<ResponseSignal>,
    handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl MessageDispatcher {
    /// Replies go out over the delivery's radio link; Ack and Reject feed
    /// its response signal.
    pub fn new(local: DeviceId, delivery: &Delivery) -> Self {
        Self {
            local,
            link: delivery.link().clone(),
            signal: delivery.signal().clone(),
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for every type it declares. A later registration
    /// for the same type replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        for msg_type in handler.message_types() {
            self.handlers.insert(*msg_type, handler.clone());
        }
    }

    /// Dispatch one received frame. Returns false if it was dropped
    /// (undecodable, not for us, or no handler).
    pub fn dispatch(&self, frame: &[u8]) -> bool {
        let msg = match Message::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::trace!(
                    error = %e,
                    len = frame.len(),
                    frame = %hex::encode(&frame[..frame.len().min(16)]),
                    "undecodable frame dropped"
                );
                return false;
            }
        };

        match msg {
            Message::Ack { mac } | Message::Reject { mac } if mac != self.local => {
                // another node's conversation
                tracing::trace!(peer = %mac, "response for another device ignored");
                false
            }
            Message::Ack { .. } => {
                self.signal.raise(Response::Ack);
                true
            }
            Message::Reject { .. } => {
                self.signal.raise(Response::Reject);
                true
            }
            msg => self.dispatch_to_handler(&msg),
        }
    }

    fn dispatch_to_handler(&self, msg: &Message) -> bool {
        let msg_type = msg.message_type();
        let Some(handler) = self.handlers.get(&msg_type) else {
            tracing::debug!(?msg_type, "no handler registered, frame dropped");
            return false;
        };

        if let Some(reply) = handler.handle(msg) {
            if let Err(e) = self.link.send(&reply) {
                tracing::warn!(
                    ?msg_type,
                    reply = ?reply.message_type(),
                    error = %e,
                    "failed to transmit reply"
                );
            }
        }
        true
    }

    /// Drain the radio's inbound channel until every sender is gone.
    pub async fn run(self, mut inbound: mpsc::Receiver<Bytes>) {
        while let Some(frame) = inbound.recv().await {
            self.dispatch(&frame);
        }
        tracing::debug!(device = %self.local, "inbound channel closed, dispatcher stopping");
    }
}
