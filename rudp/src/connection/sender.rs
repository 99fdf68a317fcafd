use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, trace, warn};
use tokio::sync::mpsc;

use crate::{
    channel::{BufferedPacket, Channel},
    connection::{command::ConnectionCommand, shared::Shared},
    constants::{
        MAX_DTIME, MAX_PACKETS_REQUEUED, MAX_RELIABLE_WINDOW_SIZE, SEND_LOOP_TICK,
    },
    packet::{make_auto_split, make_control_disco, make_control_ping, make_datagram},
    peer::{PacketizeCtx, Peer},
    types::PeerId,
};

/// A datagram ready for the socket.
type Datagram = (SocketAddr, Vec<u8>);

/// A queued non-reliable send request awaiting its turn under the
/// per-iteration packet quota. `data` is a finished packet body (Original,
/// Split or Control); only the base header is still missing.
#[derive(Debug)]
struct OutgoingPacket {
    peer_id: PeerId,
    channel: u8,
    data: Vec<u8>,
    /// ACKs are transmitted even when the quota is exhausted; starving them
    /// would stall the remote sender's window.
    ack: bool,
}

/// Outcome of trying to hand one reliable packet to a channel.
enum RawSendResult {
    /// Entered the window; the returned datagram goes out now.
    Sent(Datagram),
    /// Window full; parked in the channel's reliable queue.
    Queued,
    /// No sequence number available.
    NoSeqnum,
}

/// What one peer's timeout pass produced.
#[derive(Default)]
struct PeerTimeoutPass {
    datagrams: Vec<Datagram>,
    resent: usize,
    /// Peer has to go: inactivity or retry exhaustion.
    expired: bool,
    address: Option<SocketAddr>,
}

/// The periodic loop that retransmits timed-out reliable packets, converts
/// queued commands into wire packets and paces outgoing traffic.
pub(crate) struct SendLoop {
    shared: Arc<Shared>,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    outgoing_queue: VecDeque<OutgoingPacket>,
    pub(crate) iteration_packets_available: usize,
}

impl SendLoop {
    pub fn new(shared: Arc<Shared>, command_rx: mpsc::UnboundedReceiver<ConnectionCommand>) -> Self {
        let iteration_packets_available = shared.config.max_packets_per_iteration as usize;
        Self {
            shared,
            command_rx,
            outgoing_queue: VecDeque::new(),
            iteration_packets_available,
        }
    }

    pub async fn run(mut self) {
        debug!("sender task started");
        let mut last_iteration = Instant::now();

        loop {
            // Wait for a trigger, but never sleep past the tick so timers
            // keep advancing.
            tokio::select! {
                _ = self.shared.send_trigger.notified() => {}
                _ = tokio::time::sleep(SEND_LOOP_TICK) => {}
            }

            let dtime = last_iteration.elapsed().as_secs_f32().clamp(0.0, MAX_DTIME);
            last_iteration = Instant::now();
            self.iteration_packets_available =
                self.shared.config.max_packets_per_iteration as usize;

            // First resend timed-out reliables.
            let datagrams = self.run_timeouts(dtime);
            self.transmit(datagrams).await;
            if self.iteration_packets_available == 0 {
                warn!("packet quota used up after re-sending reliables");
            }

            // Translate commands to packets.
            while let Ok(command) = self.command_rx.try_recv() {
                let datagrams = self.handle_command(command);
                self.transmit(datagrams).await;
            }

            // Send queued packets.
            let datagrams = self.send_packets();
            self.transmit(datagrams).await;

            // On shutdown, keep going until the queues have drained.
            if self.shared.is_shutting_down() && !self.packets_queued() {
                break;
            }
        }
        debug!("sender task stopped");
    }

    pub(crate) fn packets_queued(&self) -> bool {
        if !self.outgoing_queue.is_empty() && self.shared.peer_count() > 0 {
            return true;
        }
        for peer_id in self.shared.peer_ids() {
            let queued = self.shared.with_peer(peer_id, |peer| {
                peer.channels()
                    .any(|c| !c.queued_commands.is_empty() || !c.queued_reliables.is_empty())
            });
            if queued == Some(true) {
                return true;
            }
        }
        false
    }

    /// Timeout pass: evict inactive peers, age and retransmit reliable
    /// windows, expire stale split reassemblies, emit keep-alives and
    /// packetize backlogged commands.
    pub(crate) fn run_timeouts(&mut self, dtime: f32) -> Vec<Datagram> {
        let mut out = Vec::new();
        let peer_ids = self.shared.peer_ids();
        let npeers = peer_ids.len().max(1);
        let ctx = self.shared.packetize_ctx();
        let max_retries = self.shared.config.max_retries;
        let resend_quota = (self.iteration_packets_available / npeers).max(1);

        // The destructor path shortens the timeout so a shutdown does not
        // hang on peers that will never ack again.
        let peer_timeout = if self.shared.is_shutting_down() {
            self.shared.config.peer_timeout.min(std::time::Duration::from_millis(500))
        } else {
            self.shared.config.peer_timeout
        };
        let split_timeout = peer_timeout.as_secs_f32();

        let mut expired_peers: Vec<(PeerId, SocketAddr)> = Vec::new();

        for peer_id in peer_ids {
            let pass = self.shared.with_peer(peer_id, |peer| {
                let mut pass = PeerTimeoutPass {
                    address: Some(peer.address),
                    ..Default::default()
                };

                if peer.is_timed_out(peer_timeout) {
                    debug!("peer {} has timed out", peer_id);
                    pass.expired = true;
                    return pass;
                }

                let resend_timeout = peer.resend_timeout();
                let mut retry_exceeded = false;
                for (channel_index, channel) in peer.channels_mut().enumerate() {
                    // Remove timed-out incomplete split reassemblies.
                    channel.incoming_splits.remove_timed_outs(dtime, split_timeout);
                    channel.outgoing_reliables.increment_timeouts(dtime);

                    let mut resends: Vec<Datagram> = Vec::new();
                    let mut lost_bytes = 0;
                    for packet in channel
                        .outgoing_reliables
                        .timed_outs_mut(resend_timeout, resend_quota)
                    {
                        packet.resend_count += 1;
                        packet.time = 0.0;
                        if packet.resend_count > max_retries {
                            // Exceeding the retry budget is a connectivity
                            // failure, not a protocol error.
                            retry_exceeded = true;
                            break;
                        }
                        warn!(
                            "re-sending timed-out reliable to {} (t/o={}): channel={}, seqnum={}",
                            packet.address,
                            resend_timeout,
                            channel_index,
                            packet.seqnum()
                        );
                        lost_bytes += packet.data.len();
                        // RTT is not sampled here: a retransmitted packet
                        // cannot tell loss from latency.
                        resends.push((packet.address, packet.data.clone()));
                    }
                    channel.update_bytes_lost(lost_bytes);
                    pass.resent += resends.len();
                    pass.datagrams.append(&mut resends);

                    if retry_exceeded {
                        break;
                    }
                    channel.update_timers(dtime);
                }

                if retry_exceeded {
                    debug!("peer {} exceeded the retry budget", peer_id);
                    pass.expired = true;
                    return pass;
                }

                // Keep-alive.
                if peer.needs_ping(dtime) {
                    trace!("sending ping to peer {}", peer_id);
                    match raw_send_reliable(peer, 0, &make_control_ping(), &ctx) {
                        RawSendResult::Sent(datagram) => pass.datagrams.push(datagram),
                        RawSendResult::Queued => {}
                        RawSendResult::NoSeqnum => peer.retry_ping_soon(),
                    }
                }

                peer.run_command_queues(&ctx, MAX_PACKETS_REQUEUED);
                pass
            });

            let Some(pass) = pass else {
                continue;
            };
            self.iteration_packets_available =
                self.iteration_packets_available.saturating_sub(pass.resent);
            out.extend(pass.datagrams);
            if pass.expired {
                if let Some(address) = pass.address {
                    expired_peers.push((peer_id, address));
                }
            }
        }

        // Cooperative removal: a best-effort Disco first, then the purge.
        for (peer_id, address) in expired_peers {
            let ctx = self.shared.packetize_ctx();
            out.push((
                address,
                make_datagram(ctx.protocol_id, ctx.own_peer_id, 0, &make_control_disco()),
            ));
            self.shared.delete_peer(peer_id, true);
        }

        out
    }

    pub(crate) fn handle_command(&mut self, command: ConnectionCommand) -> Vec<Datagram> {
        let ctx = self.shared.packetize_ctx();
        match command {
            ConnectionCommand::Disconnect => {
                debug!("disconnecting");
                for peer_id in self.shared.peer_ids() {
                    self.queue_unreliable(peer_id, 0, make_control_disco(), false);
                }
                Vec::new()
            }
            ConnectionCommand::DisconnectPeer { peer_id } => {
                debug!("disconnecting peer {}", peer_id);
                self.queue_unreliable(peer_id, 0, make_control_disco(), false);
                let _ = self
                    .shared
                    .with_peer(peer_id, |peer| peer.pending_disconnect = true);
                Vec::new()
            }
            ConnectionCommand::Send {
                peer_id,
                channel,
                data,
                reliable,
            } => {
                if reliable {
                    self.send_reliable(peer_id, channel, data, &ctx);
                } else {
                    self.send_unreliable(peer_id, channel, &data, &ctx);
                }
                Vec::new()
            }
            ConnectionCommand::SendToAll {
                channel,
                data,
                reliable,
            } => {
                for peer_id in self.shared.peer_ids() {
                    if reliable {
                        self.send_reliable(peer_id, channel, data.clone(), &ctx);
                    } else {
                        self.send_unreliable(peer_id, channel, &data, &ctx);
                    }
                }
                Vec::new()
            }
            ConnectionCommand::Ack {
                peer_id,
                channel,
                data,
            } => {
                self.queue_unreliable(peer_id, channel, data, true);
                Vec::new()
            }
            ConnectionCommand::CreatePeer { peer_id, data } => {
                // The SetPeerId reply must arrive before anything else makes
                // sense to the remote, so it goes out reliably right away if
                // the window allows.
                let result = self.shared.with_peer(peer_id, |peer| {
                    match raw_send_reliable(peer, 0, &data, &ctx) {
                        RawSendResult::Sent(datagram) => Some(datagram),
                        RawSendResult::Queued => None,
                        RawSendResult::NoSeqnum => {
                            peer.put_reliable_send(0, data.clone(), true, &ctx);
                            None
                        }
                    }
                });
                match result {
                    Some(Some(datagram)) => vec![datagram],
                    Some(None) => Vec::new(),
                    None => {
                        debug!("dropped create-peer for unknown peer {}", peer_id);
                        Vec::new()
                    }
                }
            }
        }
    }

    fn send_reliable(&mut self, peer_id: PeerId, channel: u8, data: Vec<u8>, ctx: &PacketizeCtx) {
        let found = self
            .shared
            .with_peer(peer_id, |peer| peer.put_reliable_send(channel, data, false, ctx));
        if found.is_none() {
            debug!("dropped reliable packet for non-existent peer {}", peer_id);
        }
    }

    /// Split (if needed) and queue an unreliable application payload.
    fn send_unreliable(&mut self, peer_id: PeerId, channel: u8, data: &[u8], ctx: &PacketizeCtx) {
        let packets = self.shared.with_peer(peer_id, |peer| {
            let chan = peer.channel_mut(channel);
            let mut split_seqnum = chan.next_split_seqnum();
            let packets = make_auto_split(data, ctx.unreliable_chunksize_max(), &mut split_seqnum);
            chan.set_next_split_seqnum(split_seqnum);
            packets
        });
        let Some(packets) = packets else {
            debug!("dropped packet for non-existent peer {}", peer_id);
            return;
        };
        for data in packets {
            self.queue_unreliable(peer_id, channel, data, false);
        }
    }

    fn queue_unreliable(&mut self, peer_id: PeerId, channel: u8, data: Vec<u8>, ack: bool) {
        self.outgoing_queue.push_back(OutgoingPacket {
            peer_id,
            channel,
            data,
            ack,
        });
    }

    /// Flush queued reliable packets into open window slots, then drain the
    /// non-reliable queue under the per-peer quota. Pending disconnects
    /// whose unreliable backlog drained are completed here.
    pub(crate) fn send_packets(&mut self) -> Vec<Datagram> {
        let mut out = Vec::new();
        let peer_ids = self.shared.peer_ids();
        let npeers = peer_ids.len().max(1);
        let peer_quota = self.iteration_packets_available / npeers;
        let mut budgets: HashMap<PeerId, usize> = HashMap::new();
        let mut pending_disconnects: Vec<PeerId> = Vec::new();

        // Queued reliable packets first, as long as the window allows.
        for &peer_id in &peer_ids {
            let result = self.shared.with_peer(peer_id, |peer| {
                let mut budget = peer_quota;
                let pending = peer.pending_disconnect;
                for channel in peer.channels_mut() {
                    while budget > 0
                        && !channel.queued_reliables.is_empty()
                        && channel.outgoing_reliables.len() < channel.window_size() as usize
                    {
                        let Some(packet) = channel.queued_reliables.pop_front() else {
                            break;
                        };
                        trace!("sending queued reliable seqnum {}", packet.seqnum());
                        out.push(commit_to_window(channel, packet));
                        budget -= 1;
                    }
                }
                (budget, pending)
            });
            let Some((budget, pending)) = result else {
                continue;
            };
            budgets.insert(peer_id, budget);
            if pending {
                pending_disconnects.push(peer_id);
            }
        }

        // Non-reliable queue under the remaining budget; ACKs always go.
        let mut pending_unreliable: HashSet<PeerId> = HashSet::new();
        let shutting_down = self.shared.is_shutting_down();
        let ctx = self.shared.packetize_ctx();
        for _ in 0..self.outgoing_queue.len() {
            let Some(packet) = self.outgoing_queue.pop_front() else {
                break;
            };
            let budget = budgets.entry(packet.peer_id).or_insert(peer_quota);
            if packet.ack || *budget > 0 || shutting_down {
                let address = self
                    .shared
                    .with_peer(packet.peer_id, |peer| peer.address);
                let Some(address) = address else {
                    debug!(
                        "outgoing queue: peer {} not found, dropping packet",
                        packet.peer_id
                    );
                    continue;
                };
                out.push((
                    address,
                    make_datagram(ctx.protocol_id, ctx.own_peer_id, packet.channel, &packet.data),
                ));
                *budget = budget.saturating_sub(1);
            } else {
                pending_unreliable.insert(packet.peer_id);
                self.outgoing_queue.push_back(packet);
            }
        }

        for peer_id in pending_disconnects {
            if !pending_unreliable.contains(&peer_id) {
                self.shared.delete_peer(peer_id, false);
            }
        }

        self.iteration_packets_available = budgets.values().sum();
        out
    }

    async fn transmit(&self, datagrams: Vec<Datagram>) {
        for (address, data) in datagrams {
            match self.shared.socket.send_to(&data, address).await {
                Ok(sent) => trace!("raw send: {} bytes to {}", sent, address),
                // The datagram is gone; retransmission recovers reliable
                // traffic, unreliable traffic stays lost.
                Err(err) => error!("send to {} failed: {}", address, err),
            }
        }
    }
}

/// Move a built reliable packet into the channel's in-flight window,
/// stamping its send time. Returns the bytes to put on the wire.
fn commit_to_window(channel: &mut Channel, mut packet: BufferedPacket) -> Datagram {
    packet.sent_at = Some(Instant::now());
    packet.time = 0.0;
    let datagram = (packet.address, packet.data.clone());
    let window_base = channel
        .next_outgoing_seqnum()
        .wrapping_sub(MAX_RELIABLE_WINDOW_SIZE);
    if let Err(err) = channel.outgoing_reliables.insert(packet, window_base) {
        warn!("reliable packet already in outgoing buffer: {}", err);
    }
    datagram
}

/// Wrap `body` reliably and either window it for immediate transmission or
/// park it, mirroring what the queued-reliable path does one step later.
fn raw_send_reliable(peer: &mut Peer, channel_num: u8, body: &[u8], ctx: &PacketizeCtx) -> RawSendResult {
    use crate::packet::make_reliable;

    let address = peer.address;
    let channel = peer.channel_mut(channel_num);
    let Some(seqnum) = channel.alloc_outgoing_seqnum() else {
        return RawSendResult::NoSeqnum;
    };
    let body = make_reliable(body, seqnum);
    let datagram = make_datagram(ctx.protocol_id, ctx.own_peer_id, channel_num, &body);
    let packet = BufferedPacket::new(datagram, address);

    if channel.outgoing_reliables.len() < channel.window_size() as usize {
        RawSendResult::Sent(commit_to_window(channel, packet))
    } else {
        channel.queued_reliables.push_back(packet);
        RawSendResult::Queued
    }
}
