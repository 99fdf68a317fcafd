use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::{
    channel::{BufferedPacket, Channel, QueuedReliable},
    constants::{
        BASE_HEADER_SIZE, CHANNEL_COUNT, PING_INTERVAL, RELIABLE_HEADER_SIZE,
        RESEND_TIMEOUT_FACTOR, RESEND_TIMEOUT_INITIAL, RESEND_TIMEOUT_MAX, RESEND_TIMEOUT_MIN,
    },
    packet::{make_auto_split, make_datagram, make_reliable},
    types::PeerId,
};

/// Weight of a new sample in the smoothed RTT and jitter estimates.
const RTT_ALPHA: f32 = 0.1;

/// Round-trip-time statistics of one peer, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttStats {
    pub min_rtt: f32,
    pub max_rtt: f32,
    pub avg_rtt: f32,
    pub jitter_min: f32,
    pub jitter_max: f32,
    pub jitter_avg: f32,
}

/// Throughput statistics of one channel (or the sum over a peer's
/// channels), in kB/s.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateStats {
    pub cur_kbps: f32,
    pub avg_kbps: f32,
    pub max_kbps: f32,
    pub cur_incoming_kbps: f32,
    pub avg_incoming_kbps: f32,
    pub max_incoming_kbps: f32,
    pub cur_loss_kbps: f32,
    pub avg_loss_kbps: f32,
    pub max_loss_kbps: f32,
}

impl RateStats {
    pub(crate) fn accumulate(&mut self, other: &RateStats) {
        self.cur_kbps += other.cur_kbps;
        self.avg_kbps += other.avg_kbps;
        self.max_kbps += other.max_kbps;
        self.cur_incoming_kbps += other.cur_incoming_kbps;
        self.avg_incoming_kbps += other.avg_incoming_kbps;
        self.max_incoming_kbps += other.max_incoming_kbps;
        self.cur_loss_kbps += other.cur_loss_kbps;
        self.avg_loss_kbps += other.avg_loss_kbps;
        self.max_loss_kbps += other.max_loss_kbps;
    }
}

#[derive(Debug, Default)]
struct RttTracker {
    stats: Option<RttStats>,
    last_rtt: Option<f32>,
}

impl RttTracker {
    fn report(&mut self, rtt: f32) {
        if let Some(last) = self.last_rtt {
            let jitter = (rtt - last).abs();
            let stats = self.stats.get_or_insert(RttStats {
                min_rtt: rtt,
                max_rtt: rtt,
                avg_rtt: rtt,
                jitter_min: jitter,
                jitter_max: jitter,
                jitter_avg: jitter,
            });
            stats.min_rtt = stats.min_rtt.min(rtt);
            stats.max_rtt = stats.max_rtt.max(rtt);
            stats.avg_rtt = stats.avg_rtt * (1.0 - RTT_ALPHA) + rtt * RTT_ALPHA;
            stats.jitter_min = stats.jitter_min.min(jitter);
            stats.jitter_max = stats.jitter_max.max(jitter);
            stats.jitter_avg = stats.jitter_avg * (1.0 - RTT_ALPHA) + jitter * RTT_ALPHA;
        }
        self.last_rtt = Some(rtt);
    }
}

/// Everything the sender and receiver tasks need to know to talk to the
/// packetization machinery on behalf of the local end.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PacketizeCtx {
    pub protocol_id: u32,
    pub own_peer_id: PeerId,
    pub max_packet_size: usize,
}

impl PacketizeCtx {
    /// Largest payload that fits one reliable datagram's headers.
    pub fn reliable_chunksize_max(&self) -> usize {
        self.max_packet_size - BASE_HEADER_SIZE - RELIABLE_HEADER_SIZE
    }

    /// Largest body that fits one unreliable datagram.
    pub fn unreliable_chunksize_max(&self) -> usize {
        self.max_packet_size - BASE_HEADER_SIZE
    }
}

/// One remote endpoint: identity, address, per-channel state and liveness
/// tracking. Owned exclusively by the connection's peer table.
#[derive(Debug)]
pub(crate) struct Peer {
    pub id: PeerId,
    pub address: SocketAddr,
    channels: [Channel; CHANNEL_COUNT],
    last_seen: Instant,
    ping_timer: f32,
    resend_timeout: f32,
    rtt: RttTracker,
    /// Set once a Disco was queued for this peer; it is purged when the
    /// unreliable backlog drains.
    pub pending_disconnect: bool,
}

impl Peer {
    pub fn new(id: PeerId, address: SocketAddr, window_size: u16) -> Self {
        Self {
            id,
            address,
            channels: std::array::from_fn(|_| Channel::new(window_size)),
            last_seen: Instant::now(),
            ping_timer: 0.0,
            resend_timeout: RESEND_TIMEOUT_INITIAL,
            rtt: RttTracker::default(),
            pending_disconnect: false,
        }
    }

    pub fn channel(&self, channel: u8) -> &Channel {
        &self.channels[channel as usize]
    }

    pub fn channel_mut(&mut self, channel: u8) -> &mut Channel {
        &mut self.channels[channel as usize]
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Any datagram from the peer counts as activity.
    pub fn reset_timeout(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Advance the keep-alive clock; true when a ping is due.
    pub fn needs_ping(&mut self, dtime: f32) -> bool {
        self.ping_timer += dtime;
        if self.ping_timer >= PING_INTERVAL {
            self.ping_timer = 0.0;
            return true;
        }
        false
    }

    /// A ping could not be sent (no sequence number left); retry soon
    /// instead of waiting a whole interval.
    pub fn retry_ping_soon(&mut self) {
        self.ping_timer = PING_INTERVAL - 1.0;
    }

    /// Feed one RTT sample (from an un-retransmitted packet only, to avoid
    /// skew) into the smoothed estimate, and derive the resend timeout from
    /// it. The clamp guarantees the timeout can never degenerate to zero.
    pub fn report_rtt(&mut self, rtt: f32) {
        if rtt < 0.0 {
            return;
        }
        self.rtt.report(rtt);
        if let Some(stats) = &self.rtt.stats {
            self.resend_timeout =
                (stats.avg_rtt * RESEND_TIMEOUT_FACTOR).clamp(RESEND_TIMEOUT_MIN, RESEND_TIMEOUT_MAX);
        }
    }

    pub fn resend_timeout(&self) -> f32 {
        self.resend_timeout
    }

    pub fn rtt_stats(&self) -> Option<RttStats> {
        self.rtt.stats
    }

    /// Throughput statistics summed over the peer's channels.
    pub fn rate_stats(&self) -> RateStats {
        let mut total = RateStats::default();
        for channel in &self.channels {
            total.accumulate(&channel.rates());
        }
        total
    }

    /// Accept a reliable send request: packetize right away when the
    /// channel's queues are shallow, otherwise park it in the command queue.
    pub fn put_reliable_send(&mut self, channel: u8, data: Vec<u8>, raw: bool, ctx: &PacketizeCtx) {
        if self.pending_disconnect {
            return;
        }
        let chan = self.channel(channel);
        let queue_shallow = chan.queued_commands.is_empty()
            && chan.queued_reliables.len() < (chan.window_size() / 2) as usize;

        if queue_shallow {
            debug!(
                "peer {}: processing reliable command, data size: {}",
                self.id,
                data.len()
            );
            if !self.process_reliable_send(channel, &data, raw, ctx) {
                self.channel_mut(channel)
                    .queued_commands
                    .push_back(QueuedReliable { data, raw });
            }
        } else {
            debug!(
                "peer {}: queueing reliable command, data size: {}",
                self.id,
                data.len()
            );
            let window_size = chan.window_size();
            let id = self.id;
            let chan = self.channel_mut(channel);
            chan.queued_commands.push_back(QueuedReliable { data, raw });
            if chan.queued_commands.len() >= (window_size / 2) as usize {
                warn!(
                    "possible packet stall to peer {}: queued_commands={}",
                    id,
                    chan.queued_commands.len()
                );
            }
        }
    }

    /// Turn one send request into reliable wire packets on the channel's
    /// queue. Returns false (and unwinds the sequence numbers it took) when
    /// the window has no room for the whole run.
    fn process_reliable_send(
        &mut self,
        channel: u8,
        data: &[u8],
        raw: bool,
        ctx: &PacketizeCtx,
    ) -> bool {
        if self.pending_disconnect {
            return true;
        }
        let id = self.id;
        let address = self.address;
        let chan = self.channel_mut(channel);

        let originals: Vec<Vec<u8>> = if raw {
            vec![data.to_vec()]
        } else {
            let mut split_seqnum = chan.next_split_seqnum();
            let originals =
                make_auto_split(data, ctx.reliable_chunksize_max(), &mut split_seqnum);
            chan.set_next_split_seqnum(split_seqnum);
            originals
        };

        let mut allocated = Vec::with_capacity(originals.len());
        let mut packets = Vec::with_capacity(originals.len());
        for original in &originals {
            let Some(seqnum) = chan.alloc_outgoing_seqnum() else {
                // Not enough sequence numbers for the whole run; give the
                // allocated ones back and let the command wait its turn.
                for seqnum in allocated.into_iter().rev() {
                    let put_back = chan.put_back_seqnum(seqnum);
                    debug_assert!(put_back, "seqnum rollback out of order");
                }
                debug!(
                    "peer {}: window exhausted on reliable send of {} bytes",
                    id,
                    data.len()
                );
                return false;
            };
            allocated.push(seqnum);
            let body = make_reliable(original, seqnum);
            let datagram = make_datagram(ctx.protocol_id, ctx.own_peer_id, channel, &body);
            packets.push(BufferedPacket::new(datagram, address));
        }

        chan.queued_reliables.extend(packets);
        true
    }

    /// Packetize at most one queued command per channel, provided the
    /// reliable queue has room.
    pub fn run_command_queues(&mut self, ctx: &PacketizeCtx, maxtransfer: usize) {
        for channel in 0..CHANNEL_COUNT as u8 {
            let chan = self.channel(channel);
            if chan.queued_commands.is_empty() || chan.queued_reliables.len() >= maxtransfer {
                continue;
            }
            let Some(command) = self.channel_mut(channel).queued_commands.pop_front() else {
                continue;
            };
            if !self.process_reliable_send(channel, &command.data, command.raw, ctx) {
                self.channel_mut(channel)
                    .queued_commands
                    .push_front(command);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PROTOCOL_ID, SEQNUM_INITIAL};

    fn ctx() -> PacketizeCtx {
        PacketizeCtx {
            protocol_id: PROTOCOL_ID,
            own_peer_id: 1,
            max_packet_size: 512,
        }
    }

    fn peer() -> Peer {
        Peer::new(2, "127.0.0.1:30000".parse().unwrap(), 5)
    }

    #[test]
    fn small_reliable_send_packetizes_immediately() {
        let mut peer = peer();
        peer.put_reliable_send(0, vec![0xAB; 10], false, &ctx());
        assert_eq!(peer.channel(0).queued_reliables.len(), 1);
        assert_eq!(peer.channel(0).queued_reliables[0].seqnum(), SEQNUM_INITIAL);
    }

    #[test]
    fn oversized_send_becomes_a_fragment_run() {
        let mut peer = peer();
        peer.put_reliable_send(0, vec![0xAB; 1200], false, &ctx());
        let queued = &peer.channel(0).queued_reliables;
        assert_eq!(queued.len(), 3);
        for (i, packet) in queued.iter().enumerate() {
            assert_eq!(packet.seqnum(), SEQNUM_INITIAL.wrapping_add(i as u16));
        }
    }

    /// Pretend the sender task transmitted everything queued on channel 0,
    /// moving it into the in-flight window.
    fn drain_to_window(peer: &mut Peer) {
        let base = SEQNUM_INITIAL.wrapping_sub(1);
        let chan = peer.channel_mut(0);
        while let Some(packet) = chan.queued_reliables.pop_front() {
            chan.outgoing_reliables.insert(packet, base).unwrap();
        }
    }

    #[test]
    fn fragment_run_packetizes_past_a_full_in_flight_window() {
        let mut peer = peer();
        // Fill the in-flight window completely.
        for _ in 0..2 {
            peer.put_reliable_send(0, vec![1; 8], false, &ctx());
            drain_to_window(&mut peer);
        }
        peer.put_reliable_send(0, vec![1; 8], false, &ctx());
        peer.put_reliable_send(0, vec![1; 8], false, &ctx());
        drain_to_window(&mut peer);
        peer.put_reliable_send(0, vec![1; 8], false, &ctx());
        drain_to_window(&mut peer);
        assert_eq!(peer.channel(0).outgoing_reliables.len(), 5);

        // A three-fragment run still gets sequence numbers; the packets
        // wait in the reliable queue for window slots, in order.
        peer.put_reliable_send(0, vec![2; 1200], false, &ctx());
        let seqnums: Vec<_> = peer
            .channel(0)
            .queued_reliables
            .iter()
            .map(|p| p.seqnum())
            .collect();
        assert_eq!(
            seqnums,
            vec![
                SEQNUM_INITIAL.wrapping_add(5),
                SEQNUM_INITIAL.wrapping_add(6),
                SEQNUM_INITIAL.wrapping_add(7)
            ]
        );
    }

    #[test]
    fn rtt_reports_drive_the_resend_timeout() {
        let mut peer = peer();
        assert!((peer.resend_timeout() - RESEND_TIMEOUT_INITIAL).abs() < f32::EPSILON);
        peer.report_rtt(0.2);
        peer.report_rtt(0.2);
        let timeout = peer.resend_timeout();
        assert!((timeout - 0.8).abs() < 0.01, "timeout was {timeout}");
        // Tiny RTTs clamp at the lower bound instead of going to zero.
        for _ in 0..200 {
            peer.report_rtt(0.0001);
        }
        assert!((peer.resend_timeout() - RESEND_TIMEOUT_MIN).abs() < f32::EPSILON);
    }

    #[test]
    fn ping_cadence() {
        let mut peer = peer();
        assert!(!peer.needs_ping(1.0));
        assert!(peer.needs_ping(PING_INTERVAL));
        assert!(!peer.needs_ping(1.0));
        peer.retry_ping_soon();
        assert!(peer.needs_ping(1.5));
    }
}
