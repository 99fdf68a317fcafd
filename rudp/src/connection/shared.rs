use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Mutex;

use log::{debug, error, warn};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};

use crate::{
    config::ConnectionConfig,
    connection::{command::ConnectionCommand, event::ConnectionEvent},
    constants::{PEER_ID_INEXISTENT, PEER_ID_SERVER},
    packet::make_control_ack,
    peer::{PacketizeCtx, Peer},
    types::{PeerId, SeqNum},
};

/// The peer table: the only resource shared between the two tasks and the
/// API. Guarded as a whole by one lock in [`Shared`]; each channel's
/// internal collections are only touched by whoever holds that lock.
#[derive(Debug, Default)]
pub(crate) struct PeerTable {
    map: HashMap<PeerId, Peer>,
    next_remote_peer_id: PeerId,
}

impl PeerTable {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            next_remote_peer_id: PEER_ID_SERVER + 1,
        }
    }

    pub fn get_mut(&mut self, peer_id: PeerId) -> Option<&mut Peer> {
        self.map.get_mut(&peer_id)
    }

    pub fn insert(&mut self, peer: Peer) {
        self.map.insert(peer.id, peer);
    }

    pub fn remove(&mut self, peer_id: PeerId) -> Option<Peer> {
        self.map.remove(&peer_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.map.contains_key(&peer_id)
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.map.keys().copied().collect()
    }

    /// Find the peer a datagram came from when it carries no usable id.
    pub fn lookup_by_address(&self, address: SocketAddr) -> Option<PeerId> {
        self.map
            .values()
            .find(|peer| !peer.pending_disconnect && peer.address == address)
            .map(|peer| peer.id)
    }

    /// Next unused id of 2 or higher, or `None` when the id space is full.
    pub fn alloc_peer_id(&mut self) -> Option<PeerId> {
        let start = self.next_remote_peer_id.max(PEER_ID_SERVER + 1);
        let mut candidate = start;
        loop {
            if !self.map.contains_key(&candidate) {
                self.next_remote_peer_id = candidate.wrapping_add(1).max(PEER_ID_SERVER + 1);
                return Some(candidate);
            }
            candidate = candidate.wrapping_add(1).max(PEER_ID_SERVER + 1);
            if candidate == start {
                return None;
            }
        }
    }
}

/// State shared between the facade and the two background tasks.
pub(crate) struct Shared {
    pub socket: UdpSocket,
    pub config: ConnectionConfig,
    pub peers: Mutex<PeerTable>,
    own_peer_id: AtomicU16,
    /// True when this end plays the server role (listens and creates peers
    /// on first contact).
    pub is_server: bool,
    pub command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    pub event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    /// Wakes the sender task as soon as new work is queued.
    pub send_trigger: Notify,
    shutting_down: AtomicBool,
    /// Wakes the receiver task out of its blocking receive on shutdown.
    pub shutdown_notify: Notify,
}

impl Shared {
    pub fn new(
        socket: UdpSocket,
        config: ConnectionConfig,
        is_server: bool,
        command_tx: mpsc::UnboundedSender<ConnectionCommand>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let own_peer_id = if is_server {
            PEER_ID_SERVER
        } else {
            PEER_ID_INEXISTENT
        };
        Self {
            socket,
            config,
            peers: Mutex::new(PeerTable::new()),
            own_peer_id: AtomicU16::new(own_peer_id),
            is_server,
            command_tx,
            event_tx,
            send_trigger: Notify::new(),
            shutting_down: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        }
    }

    pub fn own_peer_id(&self) -> PeerId {
        self.own_peer_id.load(Ordering::Relaxed)
    }

    pub fn set_own_peer_id(&self, peer_id: PeerId) {
        self.own_peer_id.store(peer_id, Ordering::Relaxed);
    }

    pub fn packetize_ctx(&self) -> PacketizeCtx {
        PacketizeCtx {
            protocol_id: self.config.protocol_id,
            own_peer_id: self.own_peer_id(),
            max_packet_size: self.config.max_packet_size,
        }
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        self.send_trigger.notify_one();
        // notify_one stores a permit, so the receiver task sees the
        // shutdown even if it is mid-datagram right now.
        self.shutdown_notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Run `f` against one peer under the table lock. The closure must not
    /// block; datagrams it wants sent are returned to the caller instead of
    /// being transmitted inline.
    pub fn with_peer<T>(&self, peer_id: PeerId, f: impl FnOnce(&mut Peer) -> T) -> Option<T> {
        let mut peers = self.peers.lock().expect("peer table lock poisoned");
        peers.get_mut(peer_id).map(f)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.lock().expect("peer table lock poisoned").ids()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().expect("peer table lock poisoned").len()
    }

    /// Remove a peer and report it to the upper layer. `timeout` records
    /// whether the removal was due to inactivity/retry exhaustion rather
    /// than an explicit disconnect.
    pub fn delete_peer(&self, peer_id: PeerId, timeout: bool) -> bool {
        let removed = {
            let mut peers = self.peers.lock().expect("peer table lock poisoned");
            peers.remove(peer_id)
        };
        let Some(peer) = removed else {
            return false;
        };
        debug!("removing peer {} (timeout={})", peer_id, timeout);
        self.push_event(ConnectionEvent::PeerRemoved {
            peer_id,
            timeout,
            address: peer.address,
        });
        true
    }

    /// Queue a command for the sender task and wake it.
    pub fn queue_command(&self, command: ConnectionCommand) {
        if self.is_shutting_down() {
            return;
        }
        if self.command_tx.send(command).is_err() {
            error!("command queue closed; dropping command");
            return;
        }
        self.send_trigger.notify_one();
    }

    /// Queue an ACK for `seqnum` on the given peer/channel. ACKs ride the
    /// non-reliable path but are exempt from the packet quota.
    pub fn send_ack(&self, peer_id: PeerId, channel: u8, seqnum: SeqNum) {
        debug!(
            "queueing ACK to peer {} channel {} seqnum {}",
            peer_id, channel, seqnum
        );
        self.queue_command(ConnectionCommand::Ack {
            peer_id,
            channel,
            data: make_control_ack(seqnum),
        });
    }

    pub fn push_event(&self, event: ConnectionEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("event queue closed; dropping event");
        }
    }

    pub fn trigger_send(&self) {
        self.send_trigger.notify_one();
    }
}
