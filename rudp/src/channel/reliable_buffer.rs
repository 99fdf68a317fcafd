use std::collections::VecDeque;

use log::warn;

use crate::{
    channel::buffered_packet::BufferedPacket,
    error::ProtocolViolation,
    types::SeqNum,
    wrapping_number::sequence_in_window,
};

/// A buffer of reliable packets kept sorted by wrapping sequence number.
///
/// Used on the send side as the window of in-flight packets awaiting
/// acknowledgement, and on the receive side as the stash of packets that
/// arrived ahead of the next expected sequence number.
#[derive(Debug, Default)]
pub(crate) struct ReliablePacketBuffer {
    list: VecDeque<BufferedPacket>,
}

impl ReliablePacketBuffer {
    pub fn new() -> Self {
        Self {
            list: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Sequence number of the oldest buffered packet.
    pub fn first_seqnum(&self) -> Option<SeqNum> {
        self.list.front().map(BufferedPacket::seqnum)
    }

    pub fn pop_first(&mut self) -> Option<BufferedPacket> {
        self.list.pop_front()
    }

    pub fn pop_seqnum(&mut self, seqnum: SeqNum) -> Option<BufferedPacket> {
        let index = self.list.iter().position(|p| p.seqnum() == seqnum)?;
        self.list.remove(index)
    }

    /// Insert sorted relative to `next_expected`, the lower edge of the
    /// window the buffer serves.
    ///
    /// Out-of-window packets and packets for the very next sequence number
    /// are dropped (the caller delivers the latter directly); an exact
    /// duplicate is dropped silently, but a duplicate whose bytes differ
    /// from the buffered original is data corruption.
    pub fn insert(
        &mut self,
        packet: BufferedPacket,
        next_expected: SeqNum,
    ) -> Result<(), ProtocolViolation> {
        let seqnum = packet.seqnum();
        if !sequence_in_window(seqnum, next_expected, crate::constants::MAX_RELIABLE_WINDOW_SIZE) {
            warn!(
                "dropping insert of seqnum {} outside window starting at {}",
                seqnum, next_expected
            );
            return Ok(());
        }
        if seqnum == next_expected {
            warn!("dropping insert of seqnum {} == next expected", seqnum);
            return Ok(());
        }

        let key = seqnum.wrapping_sub(next_expected);
        let mut index = self.list.len();
        for (i, existing) in self.list.iter().enumerate() {
            let existing_key = existing.seqnum().wrapping_sub(next_expected);
            if existing_key == key {
                // Resent packet; for paranoia the data should be compared.
                if existing.data != packet.data {
                    return Err(ProtocolViolation::ReliableDuplicateMismatch { seqnum });
                }
                return Ok(());
            }
            if existing_key > key {
                index = i;
                break;
            }
        }
        self.list.insert(index, packet);
        Ok(())
    }

    /// Age every buffered packet by `dtime` seconds.
    pub fn increment_timeouts(&mut self, dtime: f32) {
        for packet in &mut self.list {
            packet.time += dtime;
            packet.totaltime += dtime;
        }
    }

    /// Packets whose age since the last (re)send reached `timeout`, capped
    /// at `max_packets`. The caller resets their age and bumps the resend
    /// counter as it retransmits.
    pub fn timed_outs_mut(&mut self, timeout: f32, max_packets: usize) -> Vec<&mut BufferedPacket> {
        self.list
            .iter_mut()
            .filter(|p| p.time >= timeout)
            .take(max_packets)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PROTOCOL_ID;
    use crate::packet::{make_datagram, make_reliable};
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:30000".parse().unwrap()
    }

    fn packet(seqnum: SeqNum, payload: &[u8]) -> BufferedPacket {
        let body = make_reliable(payload, seqnum);
        BufferedPacket::new(make_datagram(PROTOCOL_ID, 2, 0, &body), addr())
    }

    #[test]
    fn keeps_wrapping_order() {
        let mut buffer = ReliablePacketBuffer::new();
        // Window starts just before the wrap point.
        buffer.insert(packet(2, b"c"), 65500).unwrap();
        buffer.insert(packet(65510, b"a"), 65500).unwrap();
        buffer.insert(packet(0, b"b"), 65500).unwrap();

        assert_eq!(buffer.first_seqnum(), Some(65510));
        assert_eq!(buffer.pop_first().unwrap().seqnum(), 65510);
        assert_eq!(buffer.pop_first().unwrap().seqnum(), 0);
        assert_eq!(buffer.pop_first().unwrap().seqnum(), 2);
        assert!(buffer.pop_first().is_none());
    }

    #[test]
    fn pop_seqnum_removes_the_right_packet() {
        let mut buffer = ReliablePacketBuffer::new();
        buffer.insert(packet(11, b"a"), 10).unwrap();
        buffer.insert(packet(12, b"b"), 10).unwrap();
        assert_eq!(buffer.pop_seqnum(12).unwrap().inner_payload(), b"b");
        assert!(buffer.pop_seqnum(12).is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn identical_duplicate_is_ignored() {
        let mut buffer = ReliablePacketBuffer::new();
        buffer.insert(packet(11, b"a"), 10).unwrap();
        buffer.insert(packet(11, b"a"), 10).unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn conflicting_duplicate_is_a_violation() {
        let mut buffer = ReliablePacketBuffer::new();
        buffer.insert(packet(11, b"a"), 10).unwrap();
        assert_eq!(
            buffer.insert(packet(11, b"X"), 10),
            Err(ProtocolViolation::ReliableDuplicateMismatch { seqnum: 11 })
        );
    }

    #[test]
    fn out_of_window_insert_is_dropped() {
        let mut buffer = ReliablePacketBuffer::new();
        // Far behind the window start -> treated as ancient, dropped.
        buffer.insert(packet(9, b"a"), 10).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn timed_out_packets_respect_cap() {
        let mut buffer = ReliablePacketBuffer::new();
        for seqnum in 11..15 {
            buffer.insert(packet(seqnum, b"x"), 10).unwrap();
        }
        buffer.increment_timeouts(1.0);
        let timed_out = buffer.timed_outs_mut(0.5, 2);
        assert_eq!(timed_out.len(), 2);
    }
}
