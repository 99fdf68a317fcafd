use std::net::SocketAddr;

use crate::{net_packet::NetworkPacket, types::PeerId};

/// What a [`crate::Connection`] hands to the upper layer.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A fully reassembled, in-order application message. The packet
    /// carries the id of the peer it came from.
    DataReceived(NetworkPacket),
    /// A new peer entered the table (incoming connection, or the server
    /// peer after `connect`).
    PeerAdded { peer_id: PeerId, address: SocketAddr },
    /// A peer left: gracefully, by inactivity timeout, or by retry
    /// exhaustion. Connectivity events like this are never process errors.
    PeerRemoved {
        peer_id: PeerId,
        timeout: bool,
        address: SocketAddr,
    },
}
