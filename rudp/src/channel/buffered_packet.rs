use std::net::SocketAddr;
use std::time::Instant;

use crate::{
    constants::BASE_HEADER_SIZE,
    types::{PeerId, SeqNum},
};

/// A snapshot of an outgoing (or buffered incoming) reliable datagram,
/// owned by exactly one buffer at a time: it moves from "queued" into a
/// channel's window and is dropped on ACK or retry exhaustion.
#[derive(Debug)]
pub(crate) struct BufferedPacket {
    /// The full datagram, base header included.
    pub data: Vec<u8>,
    /// Destination (or sender) address.
    pub address: SocketAddr,
    /// Seconds since the packet was buffered or last resent.
    pub time: f32,
    /// Seconds since the packet was first buffered.
    pub totaltime: f32,
    /// Absolute first-send time; `None` until actually transmitted.
    pub sent_at: Option<Instant>,
    pub resend_count: u32,
}

impl BufferedPacket {
    pub fn new(data: Vec<u8>, address: SocketAddr) -> Self {
        debug_assert!(data.len() >= BASE_HEADER_SIZE + crate::constants::RELIABLE_HEADER_SIZE);
        Self {
            data,
            address,
            time: 0.0,
            totaltime: 0.0,
            sent_at: None,
            resend_count: 0,
        }
    }

    /// Sequence number of the Reliable header following the base header.
    pub fn seqnum(&self) -> SeqNum {
        u16::from_be_bytes([
            self.data[BASE_HEADER_SIZE + 1],
            self.data[BASE_HEADER_SIZE + 2],
        ])
    }

    /// Sender peer id from the base header.
    pub fn peer_id(&self) -> PeerId {
        u16::from_be_bytes([self.data[4], self.data[5]])
    }

    /// Channel number from the base header.
    pub fn channel(&self) -> u8 {
        self.data[6]
    }

    /// Packet body with the base and Reliable headers stripped.
    pub fn inner_payload(&self) -> &[u8] {
        &self.data[BASE_HEADER_SIZE + crate::constants::RELIABLE_HEADER_SIZE..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PROTOCOL_ID;
    use crate::packet::{make_datagram, make_reliable};

    #[test]
    fn header_accessors() {
        let body = make_reliable(&[1, 2, 3], 65501);
        let datagram = make_datagram(PROTOCOL_ID, 42, 1, &body);
        let packet = BufferedPacket::new(datagram, "127.0.0.1:30000".parse().unwrap());
        assert_eq!(packet.seqnum(), 65501);
        assert_eq!(packet.peer_id(), 42);
        assert_eq!(packet.channel(), 1);
        assert_eq!(packet.inner_payload(), &[1, 2, 3]);
    }
}
