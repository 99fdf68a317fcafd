use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, trace, warn};

use crate::{
    channel::BufferedPacket,
    connection::{command::ConnectionCommand, event::ConnectionEvent, shared::Shared},
    constants::{CHANNEL_COUNT, MAX_RELIABLE_WINDOW_SIZE, PEER_ID_INEXISTENT, RECEIVE_BUFFER_SIZE},
    error::{ProcessError, ProtocolViolation},
    net_packet::NetworkPacket,
    packet::{make_control_set_peer_id, make_datagram, BaseHeader, ControlMessage, InboundPacket},
    peer::Peer,
    types::{PeerId, SeqNum},
    wrapping_number::{sequence_greater_than, sequence_in_window},
};

/// What the reliable window decided to do with an incoming packet.
enum ReliableAction {
    /// Future packet: drop without acking, the sender will retransmit.
    DropSilent,
    /// Duplicate of an already-delivered packet: the ACK may have been
    /// lost, so ack again and drop.
    AckAndDrop,
    /// In-window but ahead of the next expected number: acked and buffered.
    Buffered,
    /// Exactly the next expected number: ack, unwrap and deliver.
    Deliver,
}

/// The blocking receive loop: demultiplexes datagrams to peer/channel
/// state machines and emits reassembled in-order payloads upward.
pub(crate) struct RecvLoop {
    shared: Arc<Shared>,
}

impl RecvLoop {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub async fn run(self) {
        debug!("receiver task started");
        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        let mut packet_queued = true;

        loop {
            // A processed packet may have made previously buffered packets
            // deliverable; never leave them stranded.
            if packet_queued {
                self.drain_buffered();
                packet_queued = false;
            }

            tokio::select! {
                _ = self.shared.shutdown_notify.notified() => break,
                result = self.shared.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((size, sender)) => {
                            if self.handle_datagram(&buf[..size], sender) {
                                packet_queued = true;
                            }
                        }
                        Err(err) => error!("datagram receive failed: {}", err),
                    }
                }
            }
        }
        debug!("receiver task stopped");
    }

    /// Validate, demultiplex and process one datagram. Returns true when
    /// the packet made it into a peer's state machine.
    pub(crate) fn handle_datagram(&self, data: &[u8], sender: SocketAddr) -> bool {
        let (header, body) = match BaseHeader::parse(data, self.shared.config.protocol_id) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("invalid incoming datagram from {}: {}", sender, err);
                return false;
            }
        };

        // Identify the peer by the embedded id, falling back to the sender
        // address (which is how a client's first packets arrive).
        let mut peer_id = header.peer_id;
        if peer_id == PEER_ID_INEXISTENT {
            let peers = self.shared.peers.lock().expect("peer table lock poisoned");
            peer_id = peers.lookup_by_address(sender).unwrap_or(PEER_ID_INEXISTENT);
        }
        if peer_id == PEER_ID_INEXISTENT {
            if !self.shared.is_server {
                debug!("datagram from unknown address {}; ignoring", sender);
                return false;
            }
            let Some(new_id) = self.create_peer(sender) else {
                return false;
            };
            peer_id = new_id;
        }

        // A known id talking from the wrong address is spoofing or a stale
        // mapping; either way it is not this peer's traffic.
        let known = self.shared.with_peer(peer_id, |peer| {
            if peer.address != sender {
                return false;
            }
            peer.reset_timeout();
            peer.channel_mut(header.channel).update_bytes_received(data.len());
            true
        });
        match known {
            None => {
                debug!("datagram for unknown peer {}; ignoring", peer_id);
                return false;
            }
            Some(false) => {
                warn!("peer {} sending from different address; ignoring", peer_id);
                return false;
            }
            Some(true) => {}
        }

        match self.process_packet(peer_id, header.channel, body, false) {
            Ok(Some(payload)) => self.deliver(peer_id, &payload),
            Ok(None) => {}
            Err(ProcessError::Invalid(err)) => {
                warn!("invalid packet from peer {}: {}", peer_id, err);
            }
            Err(ProcessError::Violation(violation)) => self.punish(peer_id, violation),
        }
        true
    }

    /// Register a brand-new peer for a first-contact address and queue the
    /// reliable SetPeerId reply telling it who it is.
    fn create_peer(&self, sender: SocketAddr) -> Option<PeerId> {
        let peer_id = {
            let mut peers = self.shared.peers.lock().expect("peer table lock poisoned");
            let Some(peer_id) = peers.alloc_peer_id() else {
                error!("out of peer ids; rejecting {}", sender);
                return None;
            };
            peers.insert(Peer::new(peer_id, sender, self.shared.config.window_size));
            peer_id
        };
        debug!("created peer {} for {}", peer_id, sender);

        self.shared.queue_command(ConnectionCommand::CreatePeer {
            peer_id,
            data: make_control_set_peer_id(peer_id),
        });
        self.shared.push_event(ConnectionEvent::PeerAdded {
            peer_id,
            address: sender,
        });
        Some(peer_id)
    }

    /// The packet-type state machine. `reliable` is true when recursing
    /// into the body of a Reliable packet. Returns the application payload
    /// to deliver, or `None` when the packet was consumed by the protocol.
    fn process_packet(
        &self,
        peer_id: PeerId,
        channel: u8,
        data: &[u8],
        reliable: bool,
    ) -> Result<Option<Vec<u8>>, ProcessError> {
        match InboundPacket::parse(data)? {
            InboundPacket::Control(message) => {
                self.handle_control(peer_id, channel, message);
                Ok(None)
            }
            InboundPacket::Original(payload) => {
                trace!("returning original payload to user");
                Ok(Some(payload.to_vec()))
            }
            InboundPacket::Split(chunk) => {
                let result = self.shared.with_peer(peer_id, |peer| {
                    peer.channel_mut(channel)
                        .incoming_splits
                        .insert(&chunk, reliable)
                });
                match result {
                    None => Ok(None),
                    Some(Ok(None)) => {
                        trace!("buffered split chunk {}/{}", chunk.chunk_num, chunk.chunk_count);
                        Ok(None)
                    }
                    Some(Ok(Some(payload))) => {
                        debug!("reassembled full split payload, size={}", payload.len());
                        Ok(Some(payload))
                    }
                    Some(Err(violation)) => Err(violation.into()),
                }
            }
            InboundPacket::Reliable { seqnum, inner } => {
                if reliable {
                    return Err(ProtocolViolation::NestedReliable.into());
                }
                self.process_reliable(peer_id, channel, seqnum, data, inner)
            }
        }
    }

    /// The per-channel receive window algorithm for one reliable packet.
    /// `raw` is the complete Reliable packet (for buffering), `inner` its
    /// nested body.
    fn process_reliable(
        &self,
        peer_id: PeerId,
        channel: u8,
        seqnum: SeqNum,
        raw: &[u8],
        inner: &[u8],
    ) -> Result<Option<Vec<u8>>, ProcessError> {
        let ctx = self.shared.packetize_ctx();
        let action = self.shared.with_peer(peer_id, |peer| -> Result<ReliableAction, ProcessError> {
            let address = peer.address;
            let chan = peer.channel_mut(channel);
            let next = chan.next_incoming_seqnum();

            if !sequence_in_window(seqnum, next, MAX_RELIABLE_WINDOW_SIZE) {
                return if sequence_greater_than(seqnum, next) {
                    // Newer than the window: if it was valid it will be
                    // retransmitted once the sender's window reaches it.
                    Ok(ReliableAction::DropSilent)
                } else {
                    debug!(
                        "re-sending ACK for old packet: peer {}, channel {}, seqnum {}",
                        peer_id, channel, seqnum
                    );
                    Ok(ReliableAction::AckAndDrop)
                };
            }

            if seqnum != next {
                // This one comes later; buffer it as a full datagram so the
                // drain pass can re-process it uniformly.
                let datagram = make_datagram(ctx.protocol_id, peer_id, channel, raw);
                let packet = BufferedPacket::new(datagram, address);
                chan.incoming_reliables.insert(packet, next)?;
                debug!(
                    "buffering reliable: peer {}, channel {}, seqnum {} (expected {})",
                    peer_id, channel, seqnum, next
                );
                return Ok(ReliableAction::Buffered);
            }

            // A buffered copy of this same packet may exist if it was
            // retransmitted; the live one wins.
            if chan.incoming_reliables.first_seqnum() == Some(seqnum) {
                let _ = chan.incoming_reliables.pop_first();
            }
            chan.inc_next_incoming_seqnum();
            Ok(ReliableAction::Deliver)
        });

        let action = match action {
            None => return Ok(None),
            Some(result) => result?,
        };

        match action {
            ReliableAction::DropSilent => Ok(None),
            ReliableAction::AckAndDrop | ReliableAction::Buffered => {
                self.shared.send_ack(peer_id, channel, seqnum);
                Ok(None)
            }
            ReliableAction::Deliver => {
                self.shared.send_ack(peer_id, channel, seqnum);
                trace!(
                    "processing reliable: peer {}, channel {}, seqnum {}",
                    peer_id,
                    channel,
                    seqnum
                );
                self.process_packet(peer_id, channel, inner, true)
            }
        }
    }

    fn handle_control(&self, peer_id: PeerId, channel: u8, message: ControlMessage) {
        match message {
            ControlMessage::Ack { seqnum } => {
                let drained = self.shared.with_peer(peer_id, |peer| {
                    let chan = peer.channel_mut(channel);
                    let Some(packet) = chan.outgoing_reliables.pop_seqnum(seqnum) else {
                        debug!("ACKed packet not in outgoing queue, seqnum {}", seqnum);
                        return false;
                    };
                    trace!(
                        "ACK: peer {}, channel {}, seqnum {}",
                        peer_id,
                        channel,
                        seqnum
                    );
                    // Only un-retransmitted packets yield an unbiased RTT
                    // sample.
                    let rtt = if packet.resend_count == 0 {
                        packet
                            .sent_at
                            .map(|sent_at| sent_at.elapsed().as_secs_f32())
                            .or((packet.totaltime > 0.0).then_some(packet.totaltime))
                    } else {
                        None
                    };
                    chan.update_bytes_sent(packet.data.len());
                    let drained = chan.outgoing_reliables.is_empty();
                    if let Some(rtt) = rtt {
                        peer.report_rtt(rtt);
                    }
                    drained
                });
                // A drained window unblocks queued reliables immediately.
                if drained == Some(true) {
                    self.shared.trigger_send();
                }
            }
            ControlMessage::SetPeerId { peer_id: new_id } => {
                if self.shared.own_peer_id() == PEER_ID_INEXISTENT {
                    debug!("got own peer id: {}", new_id);
                    self.shared.set_own_peer_id(new_id);
                } else {
                    warn!("not changing existing peer id");
                }
            }
            ControlMessage::Ping => {
                // The incoming datagram already reset the timeout counter.
                trace!("ping from peer {}", peer_id);
            }
            ControlMessage::Disco => {
                debug!("DISCO: removing peer {}", peer_id);
                if !self.shared.delete_peer(peer_id, false) {
                    debug!("DISCO: peer {} not found", peer_id);
                }
            }
        }
    }

    /// Deliver every buffered reliable packet that has become contiguous
    /// with its channel's expected sequence number.
    pub(crate) fn drain_buffered(&self) {
        loop {
            let mut delivered_any = false;
            for peer_id in self.shared.peer_ids() {
                for channel in 0..CHANNEL_COUNT as u8 {
                    let popped = self
                        .shared
                        .with_peer(peer_id, |peer| {
                            let chan = peer.channel_mut(channel);
                            if chan.incoming_reliables.first_seqnum()
                                == Some(chan.next_incoming_seqnum())
                            {
                                let packet = chan.incoming_reliables.pop_first();
                                chan.inc_next_incoming_seqnum();
                                packet
                            } else {
                                None
                            }
                        })
                        .flatten();
                    let Some(packet) = popped else {
                        continue;
                    };
                    debug!(
                        "unbuffering reliable: peer {}, channel {}, seqnum {}",
                        peer_id,
                        channel,
                        packet.seqnum()
                    );
                    match self.process_packet(peer_id, channel, packet.inner_payload(), true) {
                        Ok(Some(payload)) => self.deliver(peer_id, &payload),
                        Ok(None) => {}
                        Err(ProcessError::Invalid(err)) => {
                            warn!("invalid buffered packet from peer {}: {}", peer_id, err);
                        }
                        Err(ProcessError::Violation(violation)) => self.punish(peer_id, violation),
                    }
                    delivered_any = true;
                }
            }
            if !delivered_any {
                return;
            }
        }
    }

    /// Hand a finished payload to the upper layer's event queue.
    fn deliver(&self, peer_id: PeerId, payload: &[u8]) {
        match NetworkPacket::from_wire(peer_id, payload) {
            Ok(packet) => self.shared.push_event(ConnectionEvent::DataReceived(packet)),
            Err(err) => debug!("dropping runt payload from peer {}: {}", peer_id, err),
        }
    }

    /// Protocol violations indicate a bug or a malicious peer; force the
    /// offender out.
    fn punish(&self, peer_id: PeerId, violation: ProtocolViolation) {
        error!(
            "protocol violation from peer {}: {}; disconnecting it",
            peer_id, violation
        );
        self.shared
            .queue_command(ConnectionCommand::DisconnectPeer { peer_id });
    }
}
