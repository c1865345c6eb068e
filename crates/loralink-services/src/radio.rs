//! Radio link: the half-duplex transmitter shared by every sender.
//!
//! The hardware (or its emulation) sits behind [`Radio`]. Received frames
//! never come back through this trait: the implementation pushes them into
//! the inbound channel created by [`inbound_channel`], which the dispatcher
//! drains.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use loralink_core::wire::Message;
use tokio::sync::mpsc;

/// Frames buffered between the radio and the dispatcher before the radio
/// starts dropping them.
pub const INBOUND_QUEUE: usize = 64;

/// A half-duplex packet radio.
///
/// Implementations must be callable from any thread. They are never called
/// concurrently by [`RadioLink`].
pub trait Radio: Send + Sync {
    /// Put one frame on the air. Returns once the frame has left.
    fn transmit(&self, frame: &[u8]) -> Result<(), RadioError>;

    /// Resume listening. Frames heard from now on go to the inbound channel.
    fn set_receive_mode(&self) -> Result<(), RadioError>;

    /// Stop listening, ahead of a transmit.
    fn set_idle_mode(&self) -> Result<(), RadioError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("radio i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("radio unavailable: {0}")]
    Unavailable(String),
}

/// Create the channel a [`Radio`] delivers received frames into.
pub fn inbound_channel() -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    mpsc::channel(INBOUND_QUEUE)
}

/// Shared handle that serializes access to the radio.
///
/// Every transmit is bracketed idle → transmit → receive under one lock so
/// a second sender can never interleave with the first.
#[derive(Clone)]
pub struct RadioLink {
    radio: Arc<dyn Radio>,
    tx_lock: Arc<Mutex<()>>,
}

impl RadioLink {
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        Self {
            radio,
            tx_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Encode and transmit a message without waiting for any response.
    pub fn send(&self, msg: &Message) -> Result<(), RadioError> {
        self.send_frame(&msg.encode())
    }

    /// Transmit an already-encoded frame.
    pub fn send_frame(&self, frame: &[u8]) -> Result<(), RadioError> {
        // a poisoned lock only means another transmit panicked; the radio
        // is put back into receive mode below regardless
        let _guard = self.tx_lock.lock().unwrap_or_else(|e| e.into_inner());

        self.radio.set_idle_mode()?;
        let sent = self.radio.transmit(frame);
        let listening = self.radio.set_receive_mode();

        tracing::trace!(
            len = frame.len(),
            frame = %hex::encode(&frame[..frame.len().min(16)]),
            "frame transmitted"
        );

        sent?;
        listening
    }

    /// Put the radio into receive mode. Called once at startup.
    pub fn listen(&self) -> Result<(), RadioError> {
        let _guard = self.tx_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.radio.set_receive_mode()
    }
}
