use crate::types::PeerId;

/// High-level requests queued by the public API (and by the receiver task)
/// for the sender task to turn into wire packets.
#[derive(Debug)]
pub(crate) enum ConnectionCommand {
    /// Send a Disco to every peer and stop initiating traffic.
    Disconnect,
    /// Send a Disco to one peer and purge it once its backlog drains.
    DisconnectPeer { peer_id: PeerId },
    /// Application payload for one peer.
    Send {
        peer_id: PeerId,
        channel: u8,
        data: Vec<u8>,
        reliable: bool,
    },
    /// Application payload for every connected peer.
    SendToAll {
        channel: u8,
        data: Vec<u8>,
        reliable: bool,
    },
    /// A finished control ACK body; bypasses the packet quota.
    Ack {
        peer_id: PeerId,
        channel: u8,
        data: Vec<u8>,
    },
    /// A finished SetPeerId control body for a freshly created peer, sent
    /// reliably and without Original wrapping.
    CreatePeer { peer_id: PeerId, data: Vec<u8> },
}
