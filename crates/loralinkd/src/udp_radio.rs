//! Radio emulation over IPv4 multicast.
//!
//! Every daemon on the link joins one multicast group; a datagram sent to
//! the group stands in for a packet on the air. Loopback is left on so
//! several daemons on one host can talk to each other.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use loralink_core::config::RadioConfig;
use loralink_core::wire::MAX_FRAME_LEN;
use loralink_services::{Radio, RadioError};

pub struct UdpRadio {
    socket: StdUdpSocket,
    group: SocketAddrV4,
    listening: Arc<AtomicBool>,
}

impl UdpRadio {
    /// Open the send and receive sockets and start the receive task.
    /// Received frames go to `inbound`.
    pub fn open(config: &RadioConfig, inbound: mpsc::Sender<Bytes>) -> Result<Arc<Self>> {
        let group = SocketAddrV4::new(config.multicast_group, config.port);

        let socket = make_send_socket().context("failed to create radio send socket")?;
        let own_port = socket.local_addr().context("send socket address")?.port();

        let listener = make_listener_socket(group).context("failed to create radio listen socket")?;
        let listener = UdpSocket::from_std(listener).context("failed to convert to tokio UdpSocket")?;

        let own = Origin {
            port: own_port,
            ip: local_ipv4(),
        };
        let listening = Arc::new(AtomicBool::new(false));
        tokio::spawn(receive_loop(listener, own, listening.clone(), inbound));

        tracing::info!(group = %group, send_port = own_port, "udp radio ready");
        Ok(Arc::new(Self {
            socket,
            group,
            listening,
        }))
    }
}

impl Radio for UdpRadio {
    fn transmit(&self, frame: &[u8]) -> Result<(), RadioError> {
        self.socket.send_to(frame, self.group)?;
        Ok(())
    }

    fn set_receive_mode(&self) -> Result<(), RadioError> {
        self.listening.store(true, Ordering::Release);
        Ok(())
    }

    fn set_idle_mode(&self) -> Result<(), RadioError> {
        self.listening.store(false, Ordering::Release);
        Ok(())
    }
}

/// Source of our own transmissions as they loop back.
#[derive(Debug, Clone, Copy)]
struct Origin {
    port: u16,
    ip: Option<Ipv4Addr>,
}

impl Origin {
    fn matches(&self, from: &SocketAddr) -> bool {
        match from {
            SocketAddr::V4(v4) if v4.port() == self.port => {
                v4.ip().is_loopback() || self.ip == Some(*v4.ip())
            }
            _ => false,
        }
    }
}

/// Forward datagrams heard on the group while the radio is listening.
/// Our own transmissions loop back and are skipped.
async fn receive_loop(
    socket: UdpSocket,
    own: Origin,
    listening: Arc<AtomicBool>,
    inbound: mpsc::Sender<Bytes>,
) {
    let mut buf = vec![0u8; MAX_FRAME_LEN * 2];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "radio recv_from failed");
                continue;
            }
        };

        if own.matches(&from) {
            continue;
        }
        if !listening.load(Ordering::Acquire) {
            tracing::trace!(len, from = %from, "frame missed while transmitting");
            continue;
        }

        match inbound.try_send(Bytes::copy_from_slice(&buf[..len])) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(len, "inbound queue full, frame dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("dispatcher gone, radio receive loop stopping");
                return;
            }
        }
    }
}

/// The address this host routes multicast from. Connecting a UDP socket
/// sends nothing.
fn local_ipv4() -> Option<Ipv4Addr> {
    let probe = StdUdpSocket::bind("0.0.0.0:0").ok()?;
    probe.connect("239.0.0.1:9").ok()?;
    match probe.local_addr().ok()? {
        SocketAddr::V4(v4) => Some(*v4.ip()),
        SocketAddr::V6(_) => None,
    }
}

/// Create a UDP socket for sending to the group.
fn make_send_socket() -> Result<StdUdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    // TTL 1: stay on this link
    socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;
    socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
    socket
        .bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())
        .context("bind send socket")?;

    Ok(socket.into())
}

/// Create a UDP socket joined to the group, non-blocking for tokio.
fn make_listener_socket(group: SocketAddrV4) -> Result<StdUdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    // several daemons on one host share the port
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket
        .bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port())).into())
        .with_context(|| format!("bind port {}", group.port()))?;
    socket
        .join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)
        .context("IP_ADD_MEMBERSHIP")?;
    socket.set_nonblocking(true).context("O_NONBLOCK")?;

    Ok(socket.into())
}
