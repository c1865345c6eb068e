//! Acknowledged delivery: transmit, wait for Ack or Reject, retransmit on
//! silence, up to a fixed number of attempts.

use std::sync::Arc;
use std::time::Duration;

use loralink_core::config::TransferConfig;
use loralink_core::wire::Message;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::radio::{RadioError, RadioLink};
use crate::signal::{Response, ResponseSignal};

/// Per-attempt wait for a response.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Transmissions per frame before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub ack_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            ack_timeout: ACK_TIMEOUT,
        }
    }
}

impl From<&TransferConfig> for RetryPolicy {
    fn from(config: &TransferConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            ack_timeout: config.ack_timeout(),
        }
    }
}

/// A frame the peer acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    /// Transmissions it took, including the successful one.
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The peer answered Reject. Never retried.
    #[error("rejected by peer after {attempts} attempt(s)")]
    Rejected { attempts: u32 },

    /// Every attempt went unanswered.
    #[error("no response after {attempts} attempt(s)")]
    Exhausted { attempts: u32 },

    #[error(transparent)]
    Radio(#[from] RadioError),
}

impl DeliveryError {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryError::Rejected { attempts } | DeliveryError::Exhausted { attempts } => *attempts,
            DeliveryError::Radio(_) => 0,
        }
    }
}

/// Sends frames that need an answer.
///
/// Cloning shares the radio, the response signal and the exchange lock, so
/// every clone still has at most one exchange in flight.
#[derive(Clone)]
pub struct Delivery {
    link: RadioLink,
    signal: Arc<ResponseSignal>,
    exchange: Arc<Mutex<()>>,
}

impl Delivery {
    pub fn new(link: RadioLink, signal: Arc<ResponseSignal>) -> Self {
        Self {
            link,
            signal,
            exchange: Arc::new(Mutex::new(())),
        }
    }

    pub fn link(&self) -> &RadioLink {
        &self.link
    }

    /// The signal the dispatcher raises when an Ack or Reject arrives.
    pub fn signal(&self) -> &Arc<ResponseSignal> {
        &self.signal
    }

    /// Transmit `msg` and wait for the peer's answer.
    ///
    /// Responses left over from a previous exchange are discarded before
    /// the first transmit. A late Ack for an earlier attempt of this same
    /// frame counts as delivery.
    pub async fn send_with_ack(
        &self,
        msg: &Message,
        policy: RetryPolicy,
    ) -> Result<Delivered, DeliveryError> {
        let _exchange = self.exchange.lock().await;
        let frame = msg.encode();
        let msg_type = msg.message_type();

        self.signal.clear();

        for attempt in 1..=policy.max_attempts {
            self.link.send_frame(&frame)?;

            let deadline = Instant::now() + policy.ack_timeout;
            match self.signal.wait_until(deadline).await {
                Some(Response::Ack) => {
                    tracing::trace!(?msg_type, attempt, "acknowledged");
                    return Ok(Delivered { attempts: attempt });
                }
                Some(Response::Reject) => {
                    tracing::warn!(?msg_type, attempt, "rejected by peer");
                    return Err(DeliveryError::Rejected { attempts: attempt });
                }
                None => {
                    tracing::debug!(
                        ?msg_type,
                        attempt,
                        max_attempts = policy.max_attempts,
                        "no response within ack timeout"
                    );
                }
            }
        }

        tracing::warn!(?msg_type, attempts = policy.max_attempts, "delivery failed, retries exhausted");
        Err(DeliveryError::Exhausted {
            attempts: policy.max_attempts,
        })
    }
}
