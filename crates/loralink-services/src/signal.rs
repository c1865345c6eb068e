//! Response signal: the hand-off between the receive path and a sender
//! waiting for Ack or Reject.
//!
//! Each outcome is a single boolean slot: raising an already raised slot
//! is a no-op, and [`ResponseSignal::take`] consumes it exactly once.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::time::Instant;

/// What the peer answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ack,
    Reject,
}

#[derive(Debug, Default)]
pub struct ResponseSignal {
    ack: AtomicBool,
    reject: AtomicBool,
    notify: Notify,
}

impl ResponseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response and wake any waiter. Safe to call from the
    /// receive path at any time.
    pub fn raise(&self, response: Response) {
        match response {
            Response::Ack => self.ack.store(true, Ordering::Release),
            Response::Reject => self.reject.store(true, Ordering::Release),
        }
        self.notify.notify_waiters();
    }

    /// Drop any response left over from an earlier exchange.
    pub fn clear(&self) {
        self.ack.store(false, Ordering::Release);
        self.reject.store(false, Ordering::Release);
    }

    /// Consume a raised response. Ack wins if both are up.
    pub fn take(&self) -> Option<Response> {
        if self.ack.swap(false, Ordering::AcqRel) {
            Some(Response::Ack)
        } else if self.reject.swap(false, Ordering::AcqRel) {
            Some(Response::Reject)
        } else {
            None
        }
    }

    /// Wait for a response until `deadline`. Returns `None` on timeout.
    pub async fn wait_until(&self, deadline: Instant) -> Option<Response> {
        loop {
            // register before checking, so a raise between the check and
            // the await is not lost
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(response) = self.take() {
                return Some(response);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.take();
            }
        }
    }
}
