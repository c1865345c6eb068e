//! In-memory radio channel for exercising whole devices without hardware.
//!
//! Every [`AirRadio`] attached to one [`AirChannel`] hears what the others
//! transmit, provided it is in receive mode at that moment. A loss filter
//! can drop chosen frames to reproduce the failures a real link has.
//!
//! # Usage
//!
//! ```rust,ignore
//! let air = AirChannel::new();
//! let (gateway_radio, gateway_rx) = air.attach("gateway");
//! let (node_radio, node_rx) = air.attach("node");
//! air.set_loss(|frame| frame.from == "node" && frame.message_type() == Some(MessageType::FileBody));
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use loralink_core::wire::{Message, MessageType};
use tokio::sync::mpsc;

use crate::radio::{inbound_channel, Radio, RadioError};

/// One transmission as seen on the air.
#[derive(Debug, Clone)]
pub struct AirFrame {
    /// Label of the transmitting radio.
    pub from: String,
    pub bytes: Bytes,
    /// False if the loss filter dropped it.
    pub delivered: bool,
}

impl AirFrame {
    pub fn message(&self) -> Option<Message> {
        Message::decode(&self.bytes).ok()
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.message().map(|m| m.message_type())
    }
}

type LossFilter = Box<dyn FnMut(&AirFrame) -> bool + Send>;

struct Endpoint {
    label: String,
    inbound: mpsc::Sender<Bytes>,
    listening: bool,
}

#[derive(Default)]
struct AirInner {
    endpoints: Vec<Endpoint>,
    log: Vec<AirFrame>,
    loss: Option<LossFilter>,
}

/// The shared medium. Cloning gives another handle to the same channel.
#[derive(Clone, Default)]
pub struct AirChannel {
    inner: Arc<Mutex<AirInner>>,
}

impl AirChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a radio. Frames it hears arrive on the returned receiver.
    pub fn attach(&self, label: &str) -> (Arc<AirRadio>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = inbound_channel();
        let mut inner = self.lock();
        inner.endpoints.push(Endpoint {
            label: label.to_string(),
            inbound: tx,
            listening: false,
        });
        let radio = AirRadio {
            channel: self.clone(),
            index: inner.endpoints.len() - 1,
        };
        (Arc::new(radio), rx)
    }

    /// Drop every frame for which `filter` returns true. Replaces any
    /// previous filter.
    pub fn set_loss(&self, filter: impl FnMut(&AirFrame) -> bool + Send + 'static) {
        self.lock().loss = Some(Box::new(filter));
    }

    pub fn clear_loss(&self) {
        self.lock().loss = None;
    }

    /// Every transmission so far, dropped ones included.
    pub fn log(&self) -> Vec<AirFrame> {
        self.lock().log.clone()
    }

    /// Message types transmitted by `label`, in order, dropped ones included.
    pub fn sent_by(&self, label: &str) -> Vec<MessageType> {
        self.lock()
            .log
            .iter()
            .filter(|f| f.from == label)
            .filter_map(AirFrame::message_type)
            .collect()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    fn lock(&self) -> MutexGuard<'_, AirInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transmit_from(&self, index: usize, frame: &[u8]) {
        let mut inner = self.lock();
        let mut air = AirFrame {
            from: inner.endpoints[index].label.clone(),
            bytes: Bytes::copy_from_slice(frame),
            delivered: true,
        };
        if let Some(loss) = inner.loss.as_mut() {
            air.delivered = !loss(&air);
        }

        if air.delivered {
            for (i, endpoint) in inner.endpoints.iter().enumerate() {
                if i == index || !endpoint.listening {
                    continue;
                }
                if endpoint.inbound.try_send(air.bytes.clone()).is_err() {
                    tracing::warn!(to = %endpoint.label, "receiver queue full, frame lost");
                }
            }
        } else {
            tracing::debug!(from = %air.from, msg_type = ?air.message_type(), "frame lost on air");
        }
        inner.log.push(air);
    }

    fn set_listening(&self, index: usize, listening: bool) {
        self.lock().endpoints[index].listening = listening;
    }
}

/// A radio attached to an [`AirChannel`].
pub struct AirRadio {
    channel: AirChannel,
    index: usize,
}

impl Radio for AirRadio {
    fn transmit(&self, frame: &[u8]) -> Result<(), RadioError> {
        self.channel.transmit_from(self.index, frame);
        Ok(())
    }

    fn set_receive_mode(&self) -> Result<(), RadioError> {
        self.channel.set_listening(self.index, true);
        Ok(())
    }

    fn set_idle_mode(&self) -> Result<(), RadioError> {
        self.channel.set_listening(self.index, false);
        Ok(())
    }
}
