//! Pairing: the broadcast handshake that admits a node to a gateway.
//!
//! A node broadcasts a request carrying its own address, the network key
//! and its name, with `mac_master` left as broadcast. A gateway holding the
//! same key echoes the request back with `mac_master` set to itself and
//! records the node as a peer. The node treats that echo as the end of
//! pairing.
//!
//! The key is a shared constant, not a secret exchange: anyone who hears a
//! request learns it.

use std::sync::Mutex;
use std::time::Duration;

use loralink_core::wire::{Message, MessageType, Pairing, WireError};
use loralink_core::DeviceId;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::peer::PeerRegistry;
use crate::service::MessageHandler;

/// How long a request may go unanswered before the node asks again.
pub const PAIRING_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

// ── Node ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Unpaired,
    RequestPending { since: Instant },
    Paired { gateway: DeviceId },
}

/// Node side of pairing. Driven by `poll` from a timer task and by
/// `on_response` from the dispatcher.
pub struct NodePairing {
    request: Pairing,
    response_timeout: Duration,
    state: Mutex<PairingState>,
    peers: PeerRegistry,
    paired_tx: watch::Sender<Option<DeviceId>>,
}

impl NodePairing {
    pub fn new(
        local: DeviceId,
        device_name: &str,
        key: u32,
        response_timeout: Duration,
        peers: PeerRegistry,
    ) -> Result<Self, WireError> {
        let (paired_tx, _) = watch::channel(None);
        Ok(Self {
            request: Pairing::request(local, key, device_name)?,
            response_timeout,
            state: Mutex::new(PairingState::Unpaired),
            peers,
            paired_tx,
        })
    }

    pub fn state(&self) -> PairingState {
        *self.lock_state()
    }

    /// The gateway this node paired with, once paired.
    pub fn gateway(&self) -> Option<DeviceId> {
        match self.state() {
            PairingState::Paired { gateway } => Some(gateway),
            _ => None,
        }
    }

    /// Watch for the transition to paired. Yields the gateway address.
    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceId>> {
        self.paired_tx.subscribe()
    }

    /// Advance the state machine. Returns a request to broadcast when one
    /// is due.
    ///
    /// An unanswered request is sent again by the first poll that finds it
    /// older than the response timeout. There is no cap on attempts.
    pub fn poll(&self, now: Instant) -> Option<Message> {
        let mut state = self.lock_state();
        match *state {
            PairingState::Unpaired => {
                *state = PairingState::RequestPending { since: now };
                tracing::info!(node = %self.request.mac_origin, "pairing request sent");
                Some(Message::Pairing(self.request.clone()))
            }
            PairingState::RequestPending { since } => {
                if now.saturating_duration_since(since) <= self.response_timeout {
                    return None;
                }
                *state = PairingState::RequestPending { since: now };
                tracing::debug!("no pairing response, requesting again");
                Some(Message::Pairing(self.request.clone()))
            }
            PairingState::Paired { .. } => None,
        }
    }

    /// Handle a Pairing frame heard on the air. Returns true if it completed
    /// pairing.
    pub fn on_response(&self, response: &Pairing) -> bool {
        if response.mac_origin != self.request.mac_origin
            || response.pairing_key != self.request.pairing_key
            || response.is_request()
        {
            return false;
        }

        let mut state = self.lock_state();
        if let PairingState::Paired { .. } = *state {
            return false;
        }
        let gateway = response.mac_master;
        *state = PairingState::Paired { gateway };
        drop(state);

        self.peers.upsert(gateway, "gateway");
        self.paired_tx.send_replace(Some(gateway));
        tracing::info!(gateway = %gateway, "pairing complete");
        true
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PairingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MessageHandler for NodePairing {
    fn message_types(&self) -> &'static [MessageType] {
        &[MessageType::Pairing]
    }

    fn handle(&self, msg: &Message) -> Option<Message> {
        if let Message::Pairing(p) = msg {
            self.on_response(p);
        }
        None
    }
}

// ── Gateway ───────────────────────────────────────────────────────────────────

/// Gateway side of pairing. Stateless per request; admitted nodes go into
/// the peer registry.
pub struct GatewayPairing {
    local: DeviceId,
    key: u32,
    peers: PeerRegistry,
}

impl GatewayPairing {
    pub fn new(local: DeviceId, key: u32, peers: PeerRegistry) -> Self {
        Self { local, key, peers }
    }

    /// Answer a pairing request, or `None` if it must be ignored.
    ///
    /// A wrong key gets no reply at all, so probing nodes learn nothing.
    pub fn on_request(&self, request: &Pairing) -> Option<Pairing> {
        if request.mac_origin == self.local {
            return None;
        }
        // a response from another gateway, or a request aimed elsewhere
        if !request.is_request() && request.mac_master != self.local {
            return None;
        }
        if request.pairing_key != self.key {
            tracing::warn!(node = %request.mac_origin, "pairing request with wrong key");
            return None;
        }

        self.peers.upsert(request.mac_origin, request.device_name());
        Some(request.response(self.local))
    }
}

impl MessageHandler for GatewayPairing {
    fn message_types(&self) -> &'static [MessageType] {
        &[MessageType::Pairing]
    }

    fn handle(&self, msg: &Message) -> Option<Message> {
        match msg {
            Message::Pairing(p) => self.on_request(p).map(Message::Pairing),
            _ => None,
        }
    }
}
