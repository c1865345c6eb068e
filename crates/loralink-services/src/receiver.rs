//! File receiver: rebuilds files pushed by paired nodes.
//!
//! At most one transfer is active at a time. A FileMeta opens the session,
//! FileBody frames from the session owner are appended in arrival order,
//! and FileEnd closes it. Every frame that changes state is answered with
//! Ack or Reject addressed to the sender; the sender's Delivery waits on
//! exactly that answer.
//!
//! A session that ends any other way (idle timeout, failed write) is rolled
//! back: the destination is cut to the length it had when the session
//! opened, so the sender's next sync pass appends onto committed data only.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use loralink_core::wire::{FileBody, FileMeta, Message, MessageType};
use loralink_core::DeviceId;
use tokio::time::Instant;

use crate::peer::PeerRegistry;
use crate::service::MessageHandler;
use crate::store::FileStore;

/// A session with no traffic for this long is abandoned.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Directory received files are placed under, one subdirectory per node.
pub const RECEIVE_ROOT: &str = "node";

#[derive(Debug, Clone, Copy)]
pub struct ReceiverOptions {
    /// Drop file frames from devices that are not in the peer registry.
    pub require_pairing: bool,
    pub session_idle_timeout: Duration,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            require_pairing: true,
            session_idle_timeout: SESSION_IDLE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Store path being appended to.
    pub path: String,
    pub owner: DeviceId,
    /// Size announced in FileMeta. Informational; FileEnd closes the session.
    pub declared_size: u32,
    /// Destination length when the session opened; rollback point.
    pub base_len: u64,
    pub bytes_received: u64,
    pub started_at: Instant,
    pub last_activity: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Active(Session),
}

pub struct FileReceiver {
    store: Arc<dyn FileStore>,
    peers: PeerRegistry,
    options: ReceiverOptions,
    state: Mutex<ReceiverState>,
}

impl FileReceiver {
    pub fn new(store: Arc<dyn FileStore>, peers: PeerRegistry, options: ReceiverOptions) -> Self {
        Self {
            store,
            peers,
            options,
            state: Mutex::new(ReceiverState::Idle),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.lock_state().clone()
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.lock_state(), ReceiverState::Active(_))
    }

    /// Where a file from `sender` lands: `node/<peer name or mac>/<name>`,
    /// with the node's `/data/` directory dropped.
    pub fn destination(&self, sender: &DeviceId, filename: &str) -> String {
        let dir = self.peers.name_of(sender).unwrap_or_else(|| sender.to_string());
        let name = filename.strip_prefix("/data/").unwrap_or(filename);
        let name = name.trim_start_matches('/');
        format!("{RECEIVE_ROOT}/{dir}/{name}")
    }

    /// Process one file-transfer frame. Returns the reply to transmit.
    pub fn on_message(&self, msg: &Message, now: Instant) -> Option<Message> {
        let sender = msg.device()?;

        if self.options.require_pairing && !self.peers.contains(&sender) {
            tracing::debug!(peer = %sender, msg_type = ?msg.message_type(), "file frame from unpaired device dropped");
            return None;
        }

        let mut state = self.lock_state();
        self.expire_idle(&mut state, now);

        match msg {
            Message::FileMeta(meta) => self.on_meta(&mut state, meta, now),
            Message::FileBody(body) => self.on_body(&mut state, body, now),
            Message::FileEnd { mac } => Some(self.on_end(&mut state, *mac)),
            _ => None,
        }
    }

    fn on_meta(&self, state: &mut ReceiverState, meta: &FileMeta, now: Instant) -> Option<Message> {
        if let ReceiverState::Active(session) = state {
            tracing::warn!(
                peer = %meta.mac,
                active_peer = %session.owner,
                active_path = %session.path,
                "transfer already in progress, rejecting"
            );
            return Some(Message::Reject { mac: meta.mac });
        }

        let path = self.destination(&meta.mac, meta.filename());
        let opened = self
            .store
            .ensure_append(&path)
            .and_then(|()| self.store.size(&path));
        let base_len = match opened {
            Ok(len) => len,
            Err(e) => {
                // no reply: the sender times out and may try again later
                tracing::error!(peer = %meta.mac, path = %path, error = %e, "cannot open destination file");
                return None;
            }
        };

        tracing::info!(
            peer = %meta.mac,
            filename = %meta.filename(),
            size = meta.filesize,
            path = %path,
            "file transfer started"
        );
        *state = ReceiverState::Active(Session {
            path,
            owner: meta.mac,
            declared_size: meta.filesize,
            base_len,
            bytes_received: 0,
            started_at: now,
            last_activity: now,
        });
        Some(Message::Ack { mac: meta.mac })
    }

    fn on_body(&self, state: &mut ReceiverState, body: &FileBody, now: Instant) -> Option<Message> {
        let session = match &mut *state {
            ReceiverState::Active(session) if session.owner == body.mac => session,
            ReceiverState::Active(session) => {
                tracing::warn!(peer = %body.mac, active_peer = %session.owner, "body from non-owner, rejecting");
                return Some(Message::Reject { mac: body.mac });
            }
            ReceiverState::Idle => {
                tracing::warn!(peer = %body.mac, "body with no active transfer, rejecting");
                return Some(Message::Reject { mac: body.mac });
            }
        };

        if let Err(e) = self.store.append(&session.path, body.data()) {
            tracing::error!(peer = %body.mac, path = %session.path, error = %e, "write failed, abandoning transfer");
            self.abandon(state);
            return Some(Message::Reject { mac: body.mac });
        }

        session.bytes_received += body.len() as u64;
        session.last_activity = now;
        tracing::trace!(peer = %body.mac, bytes = body.len(), total = session.bytes_received, "chunk appended");
        Some(Message::Ack { mac: body.mac })
    }

    fn on_end(&self, state: &mut ReceiverState, mac: DeviceId) -> Message {
        match state {
            ReceiverState::Active(session) if session.owner == mac => {
                // sync passes announce the whole file but carry only the tail
                if session.bytes_received != u64::from(session.declared_size) {
                    tracing::debug!(
                        peer = %mac,
                        path = %session.path,
                        declared = session.declared_size,
                        received = session.bytes_received,
                        "received size differs from announced size"
                    );
                }
                tracing::info!(
                    peer = %mac,
                    path = %session.path,
                    bytes = session.bytes_received,
                    elapsed_ms = session.last_activity.saturating_duration_since(session.started_at).as_millis() as u64,
                    "file transfer complete"
                );
                *state = ReceiverState::Idle;
            }
            // a retransmitted FileEnd whose first Ack was lost
            _ => tracing::debug!(peer = %mac, "FileEnd outside a session, acknowledging"),
        }
        Message::Ack { mac }
    }

    fn expire_idle(&self, state: &mut ReceiverState, now: Instant) {
        if let ReceiverState::Active(session) = state {
            let idle = now.saturating_duration_since(session.last_activity);
            if idle > self.options.session_idle_timeout {
                tracing::warn!(
                    peer = %session.owner,
                    path = %session.path,
                    bytes = session.bytes_received,
                    idle_secs = idle.as_secs(),
                    "abandoning stale transfer"
                );
                self.abandon(state);
            }
        }
    }

    /// Drop the active session and undo its writes.
    fn abandon(&self, state: &mut ReceiverState) {
        let ReceiverState::Active(session) = std::mem::replace(state, ReceiverState::Idle) else {
            return;
        };
        match self.store.truncate(&session.path, session.base_len) {
            Ok(()) => tracing::debug!(path = %session.path, len = session.base_len, "partial transfer rolled back"),
            Err(e) => tracing::warn!(path = %session.path, error = %e, "failed to roll back partial transfer"),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ReceiverState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MessageHandler for FileReceiver {
    fn message_types(&self) -> &'static [MessageType] {
        &[MessageType::FileMeta, MessageType::FileBody, MessageType::FileEnd]
    }

    fn handle(&self, msg: &Message) -> Option<Message> {
        self.on_message(msg, Instant::now())
    }
}
