//! Per-(peer, channel) sequencing state: the outgoing reliability window,
//! the out-of-order receive buffer, the split reassembly table and the
//! backlog queues feeding them.

mod buffered_packet;
mod reliable_buffer;
mod split_buffer;

pub(crate) use buffered_packet::BufferedPacket;
pub(crate) use reliable_buffer::ReliablePacketBuffer;
pub(crate) use split_buffer::IncomingSplitBuffer;

use std::collections::VecDeque;

use crate::{constants::SEQNUM_INITIAL, peer::RateStats, types::SeqNum};

/// Interval over which throughput counters are folded into rates.
const RATE_WINDOW: f32 = 10.0;
/// Samples kept in the running average of the rate statistics.
const RATE_AVG_SAMPLES: u32 = 10;

/// A reliable send request waiting in a channel's command queue until window
/// slots and sequence numbers free up.
#[derive(Debug)]
pub(crate) struct QueuedReliable {
    pub data: Vec<u8>,
    /// Raw payloads already carry a packet-type header and are wrapped in
    /// Reliable as-is instead of going through Original/Split packing.
    pub raw: bool,
}

/// One independent sequencing context of a peer.
#[derive(Debug)]
pub(crate) struct Channel {
    window_size: u16,
    next_incoming_seqnum: SeqNum,
    next_outgoing_seqnum: SeqNum,
    next_outgoing_split_seqnum: SeqNum,

    /// Sent reliable packets awaiting acknowledgement.
    pub outgoing_reliables: ReliablePacketBuffer,
    /// Received reliable packets that arrived out of order.
    pub incoming_reliables: ReliablePacketBuffer,
    /// Reliable packets built but waiting for a window slot.
    pub queued_reliables: VecDeque<BufferedPacket>,
    /// Send commands waiting to be packetized.
    pub queued_commands: VecDeque<QueuedReliable>,
    /// In-progress split reassemblies.
    pub incoming_splits: IncomingSplitBuffer,

    bytes_sent: u64,
    bytes_received: u64,
    bytes_lost: u64,
    rate_counter: f32,
    rate_samples: u32,
    rates: RateStats,
}

impl Channel {
    pub fn new(window_size: u16) -> Self {
        Self {
            window_size,
            next_incoming_seqnum: SEQNUM_INITIAL,
            next_outgoing_seqnum: SEQNUM_INITIAL,
            next_outgoing_split_seqnum: SEQNUM_INITIAL,
            outgoing_reliables: ReliablePacketBuffer::new(),
            incoming_reliables: ReliablePacketBuffer::new(),
            queued_reliables: VecDeque::new(),
            queued_commands: VecDeque::new(),
            incoming_splits: IncomingSplitBuffer::new(),
            bytes_sent: 0,
            bytes_received: 0,
            bytes_lost: 0,
            rate_counter: 0.0,
            rate_samples: 0,
            rates: RateStats::default(),
        }
    }

    pub fn window_size(&self) -> u16 {
        self.window_size
    }

    pub fn next_incoming_seqnum(&self) -> SeqNum {
        self.next_incoming_seqnum
    }

    /// Advance the receive side, returning the sequence number it expected
    /// before the increment.
    pub fn inc_next_incoming_seqnum(&mut self) -> SeqNum {
        let current = self.next_incoming_seqnum;
        self.next_incoming_seqnum = self.next_incoming_seqnum.wrapping_add(1);
        current
    }

    /// Allocate the next outgoing sequence number.
    ///
    /// Allocation fails once the number would land at the far edge of the
    /// remote's acceptance window relative to the lowest unacknowledged
    /// packet; a number handed out past that point would be mistaken for
    /// ancient traffic. Transmission pacing against `window_size` happens
    /// separately, when packets move into the in-flight window.
    pub fn alloc_outgoing_seqnum(&mut self) -> Option<SeqNum> {
        if let Some(lowest_unacked) = self.outgoing_reliables.first_seqnum() {
            let distance = self.next_outgoing_seqnum.wrapping_sub(lowest_unacked);
            if distance >= crate::constants::MAX_RELIABLE_WINDOW_SIZE {
                return None;
            }
        }
        let seqnum = self.next_outgoing_seqnum;
        self.next_outgoing_seqnum = self.next_outgoing_seqnum.wrapping_add(1);
        Some(seqnum)
    }

    /// Return the most recently allocated sequence number, used when a
    /// multi-fragment send ran out of numbers partway and unwinds.
    pub fn put_back_seqnum(&mut self, seqnum: SeqNum) -> bool {
        if seqnum.wrapping_add(1) == self.next_outgoing_seqnum {
            self.next_outgoing_seqnum = seqnum;
            return true;
        }
        false
    }

    pub fn next_outgoing_seqnum(&self) -> SeqNum {
        self.next_outgoing_seqnum
    }

    pub fn next_split_seqnum(&self) -> SeqNum {
        self.next_outgoing_split_seqnum
    }

    pub fn set_next_split_seqnum(&mut self, seqnum: SeqNum) {
        self.next_outgoing_split_seqnum = seqnum;
    }

    pub fn update_bytes_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
    }

    pub fn update_bytes_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }

    pub fn update_bytes_lost(&mut self, bytes: usize) {
        self.bytes_lost += bytes as u64;
    }

    /// Fold the raw byte counters into kB/s rates once per rate window.
    pub fn update_timers(&mut self, dtime: f32) {
        self.rate_counter += dtime;
        if self.rate_counter < RATE_WINDOW {
            return;
        }

        let window = self.rate_counter;
        self.rates.cur_kbps = (self.bytes_sent as f32 / window) / 1024.0;
        self.rates.cur_incoming_kbps = (self.bytes_received as f32 / window) / 1024.0;
        self.rates.cur_loss_kbps = (self.bytes_lost as f32 / window) / 1024.0;
        self.bytes_sent = 0;
        self.bytes_received = 0;
        self.bytes_lost = 0;
        self.rate_counter = 0.0;

        self.rates.max_kbps = self.rates.max_kbps.max(self.rates.cur_kbps);
        self.rates.max_incoming_kbps = self
            .rates
            .max_incoming_kbps
            .max(self.rates.cur_incoming_kbps);
        self.rates.max_loss_kbps = self.rates.max_loss_kbps.max(self.rates.cur_loss_kbps);

        self.rate_samples = (self.rate_samples + 1).min(RATE_AVG_SAMPLES);
        let old_fraction = (self.rate_samples - 1) as f32 / self.rate_samples as f32;
        let new_fraction = 1.0 - old_fraction;
        self.rates.avg_kbps = self.rates.avg_kbps * old_fraction + self.rates.cur_kbps * new_fraction;
        self.rates.avg_incoming_kbps =
            self.rates.avg_incoming_kbps * old_fraction + self.rates.cur_incoming_kbps * new_fraction;
        self.rates.avg_loss_kbps =
            self.rates.avg_loss_kbps * old_fraction + self.rates.cur_loss_kbps * new_fraction;
    }

    pub fn rates(&self) -> RateStats {
        self.rates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seqnums_start_near_the_wrap_point() {
        let channel = Channel::new(5);
        assert_eq!(channel.next_incoming_seqnum(), SEQNUM_INITIAL);
        assert_eq!(channel.next_split_seqnum(), SEQNUM_INITIAL);
    }

    #[test]
    fn incoming_seqnum_wraps() {
        let mut channel = Channel::new(5);
        for _ in 0..40 {
            channel.inc_next_incoming_seqnum();
        }
        assert_eq!(channel.next_incoming_seqnum(), SEQNUM_INITIAL.wrapping_add(40));
    }

    #[test]
    fn seqnum_allocation_is_sequential_when_window_is_clear() {
        let mut channel = Channel::new(5);
        assert_eq!(channel.alloc_outgoing_seqnum(), Some(SEQNUM_INITIAL));
        assert_eq!(
            channel.alloc_outgoing_seqnum(),
            Some(SEQNUM_INITIAL.wrapping_add(1))
        );
    }

    #[test]
    fn put_back_only_accepts_the_latest_number() {
        let mut channel = Channel::new(5);
        let first = channel.alloc_outgoing_seqnum().unwrap();
        let second = channel.alloc_outgoing_seqnum().unwrap();
        assert!(!channel.put_back_seqnum(first));
        assert!(channel.put_back_seqnum(second));
        assert_eq!(channel.alloc_outgoing_seqnum(), Some(second));
    }

    #[test]
    fn allocation_stops_at_the_acceptance_window_edge() {
        use crate::channel::BufferedPacket;
        use crate::constants::{MAX_RELIABLE_WINDOW_SIZE, PROTOCOL_ID};
        use crate::packet::{make_datagram, make_reliable};

        let mut channel = Channel::new(5);
        // One forever-unacked packet pins the window base.
        let first = channel.alloc_outgoing_seqnum().unwrap();
        let body = make_reliable(&[0], first);
        let packet = BufferedPacket::new(
            make_datagram(PROTOCOL_ID, 1, 0, &body),
            "127.0.0.1:30000".parse().unwrap(),
        );
        channel
            .outgoing_reliables
            .insert(packet, first.wrapping_sub(1))
            .unwrap();

        for _ in 0..MAX_RELIABLE_WINDOW_SIZE - 1 {
            assert!(channel.alloc_outgoing_seqnum().is_some());
        }
        assert_eq!(channel.alloc_outgoing_seqnum(), None);

        // Rolling the last number back frees exactly one slot again.
        let last = first.wrapping_add(MAX_RELIABLE_WINDOW_SIZE - 1);
        assert!(channel.put_back_seqnum(last));
        assert_eq!(channel.alloc_outgoing_seqnum(), Some(last));
        assert_eq!(channel.alloc_outgoing_seqnum(), None);
    }
}
