//! The connection facade: owns the socket, the peer table and the two
//! background tasks, and exposes the public send/receive/connect API.

mod command;
mod event;
mod receiver;
mod sender;
mod shared;

pub use event::ConnectionEvent;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    config::ConnectionConfig,
    connection::{command::ConnectionCommand, receiver::RecvLoop, sender::SendLoop, shared::Shared},
    constants::{
        BASE_HEADER_SIZE, CHANNEL_COUNT, PEER_ID_INEXISTENT, PEER_ID_SERVER,
        RELIABLE_HEADER_SIZE, SPLIT_HEADER_SIZE,
    },
    error::ConnectionError,
    net_packet::NetworkPacket,
    peer::{Peer, RateStats, RttStats},
    types::PeerId,
};

/// One end of a reliable multi-channel UDP transport session.
///
/// Created with [`Connection::listen`] (server role) or
/// [`Connection::connect`] (client role). Dropping the connection shuts the
/// background tasks down; [`Connection::shutdown`] does so gracefully,
/// notifying peers first.
pub struct Connection {
    shared: Arc<Shared>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    send_task: Option<JoinHandle<()>>,
    recv_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Bind `bind_addr` and serve incoming connections. Peers are created
    /// on first contact and assigned ids via the control sub-protocol.
    pub async fn listen(
        bind_addr: SocketAddr,
        config: ConnectionConfig,
    ) -> Result<Self, ConnectionError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        debug!("serving at {}", socket.local_addr()?);
        Ok(Self::spawn(socket, config, true))
    }

    /// Bind an ephemeral port and open a session towards `server_addr`.
    ///
    /// The initial empty reliable packet solicits a `SetPeerId` assignment;
    /// [`Connection::is_connected`] turns true once it arrives.
    pub async fn connect(
        server_addr: SocketAddr,
        config: ConnectionConfig,
    ) -> Result<Self, ConnectionError> {
        let bind_addr = if server_addr.is_ipv6() {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        debug!("connecting to {}", server_addr);

        let window_size = config.window_size;
        let connection = Self::spawn(socket, config, false);
        {
            let mut peers = connection
                .shared
                .peers
                .lock()
                .expect("peer table lock poisoned");
            peers.insert(Peer::new(PEER_ID_SERVER, server_addr, window_size));
        }
        connection.shared.push_event(ConnectionEvent::PeerAdded {
            peer_id: PEER_ID_SERVER,
            address: server_addr,
        });

        // A dummy packet whose arrival makes the server create our peer
        // entry and reply with SetPeerId.
        let hello = NetworkPacket::new(0);
        connection.send(PEER_ID_SERVER, 0, &hello, true)?;
        Ok(connection)
    }

    fn spawn(socket: UdpSocket, config: ConnectionConfig, is_server: bool) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(socket, config, is_server, command_tx, event_tx));

        let send_task = tokio::spawn(SendLoop::new(Arc::clone(&shared), command_rx).run());
        let recv_task = tokio::spawn(RecvLoop::new(Arc::clone(&shared)).run());

        Self {
            shared,
            event_rx,
            send_task: Some(send_task),
            recv_task: Some(recv_task),
        }
    }

    /// Wait up to `timeout` for the next event: received data, or a peer
    /// entering/leaving the table.
    pub async fn receive(&mut self, timeout: Duration) -> Result<ConnectionEvent, ConnectionError> {
        match tokio::time::timeout(timeout, self.event_rx.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(ConnectionError::Closed),
            Err(_) => Err(ConnectionError::ReceiveTimeout),
        }
    }

    /// Non-blocking receive.
    pub fn try_receive(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Queue an application message to one peer. `reliable` requests acked,
    /// ordered, retransmitted delivery on the given channel.
    ///
    /// Sends to a peer that has meanwhile disappeared are dropped silently;
    /// the disappearance itself is reported as a
    /// [`ConnectionEvent::PeerRemoved`].
    pub fn send(
        &self,
        peer_id: PeerId,
        channel: u8,
        packet: &NetworkPacket,
        reliable: bool,
    ) -> Result<(), ConnectionError> {
        let data = self.validate_send(channel, packet)?;
        self.shared.queue_command(ConnectionCommand::Send {
            peer_id,
            channel,
            data,
            reliable,
        });
        Ok(())
    }

    /// Queue an application message to every connected peer.
    pub fn send_to_all(
        &self,
        channel: u8,
        packet: &NetworkPacket,
        reliable: bool,
    ) -> Result<(), ConnectionError> {
        let data = self.validate_send(channel, packet)?;
        self.shared.queue_command(ConnectionCommand::SendToAll {
            channel,
            data,
            reliable,
        });
        Ok(())
    }

    fn validate_send(
        &self,
        channel: u8,
        packet: &NetworkPacket,
    ) -> Result<Vec<u8>, ConnectionError> {
        if channel as usize >= CHANNEL_COUNT {
            return Err(ConnectionError::InvalidChannel(channel));
        }
        let data = packet.to_wire();
        let chunk_payload = self.shared.config.max_packet_size
            - BASE_HEADER_SIZE
            - RELIABLE_HEADER_SIZE
            - SPLIT_HEADER_SIZE;
        let max = chunk_payload * u16::MAX as usize;
        if data.len() > max {
            return Err(ConnectionError::PayloadTooLarge {
                size: data.len(),
                max,
            });
        }
        Ok(data)
    }

    /// Notify every peer and stop initiating traffic.
    pub fn disconnect(&self) {
        self.shared.queue_command(ConnectionCommand::Disconnect);
    }

    /// Disconnect one peer: best-effort Disco first, purged once its
    /// backlog drains.
    pub fn disconnect_peer(&self, peer_id: PeerId) -> Result<(), ConnectionError> {
        let exists = {
            let peers = self.shared.peers.lock().expect("peer table lock poisoned");
            peers.contains(peer_id)
        };
        if !exists {
            return Err(ConnectionError::PeerNotFound(peer_id));
        }
        self.shared
            .queue_command(ConnectionCommand::DisconnectPeer { peer_id });
        Ok(())
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.shared.peer_ids()
    }

    pub fn peer_address(&self, peer_id: PeerId) -> Option<SocketAddr> {
        self.shared.with_peer(peer_id, |peer| peer.address)
    }

    /// This end's own peer id: [`PEER_ID_SERVER`] when listening,
    /// [`PEER_ID_INEXISTENT`] on a client until the server assigns one.
    pub fn own_peer_id(&self) -> PeerId {
        self.shared.own_peer_id()
    }

    /// For a client, whether the server has assigned a peer id yet; a
    /// listening connection is trivially connected.
    pub fn is_connected(&self) -> bool {
        if self.shared.is_server {
            return true;
        }
        self.own_peer_id() != PEER_ID_INEXISTENT
            && self
                .shared
                .with_peer(PEER_ID_SERVER, |_| ())
                .is_some()
    }

    /// Round-trip-time statistics of one peer; `None` until the first
    /// sample (or for an unknown peer).
    pub fn peer_rtt(&self, peer_id: PeerId) -> Option<RttStats> {
        self.shared
            .with_peer(peer_id, |peer| peer.rtt_stats())
            .flatten()
    }

    /// Throughput statistics of one peer, summed over its channels.
    pub fn peer_rates(&self, peer_id: PeerId) -> Option<RateStats> {
        self.shared.with_peer(peer_id, |peer| peer.rate_stats())
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ConnectionError> {
        Ok(self.shared.socket.local_addr()?)
    }

    /// Graceful teardown: Disco to every peer, drain the queues, stop the
    /// tasks.
    pub async fn shutdown(mut self) {
        self.shared.queue_command(ConnectionCommand::Disconnect);
        self.shared.begin_shutdown();
        if let Some(task) = self.send_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.recv_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Make sure the background tasks wind down even when the caller
        // never awaited shutdown().
        self.shared.begin_shutdown();
    }
}
