use std::time::Duration;

/// Tunables of a [`crate::Connection`]. Everything here can be changed
/// without affecting the wire format.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Magic constant expected in every datagram's base header. Both ends
    /// must agree on it.
    pub protocol_id: u32,
    /// Maximum datagram size in bytes, including all protocol headers.
    /// Payloads that do not fit are split into fragments.
    pub max_packet_size: usize,
    /// Global packet budget of one sender-task iteration. Pending ACKs are
    /// exempt from it.
    pub max_packets_per_iteration: u16,
    /// Maximum number of sent-but-unacknowledged reliable packets per
    /// channel.
    pub window_size: u16,
    /// A peer that stays silent for this long is removed.
    pub peer_timeout: Duration,
    /// A reliable packet resent more than this many times forces the
    /// disconnection of its peer.
    pub max_retries: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol_id: crate::constants::PROTOCOL_ID,
            max_packet_size: 512,
            max_packets_per_iteration: 1024,
            window_size: 5,
            peer_timeout: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}
