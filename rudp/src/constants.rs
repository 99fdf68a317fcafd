use std::time::Duration;

use crate::types::{PeerId, SeqNum};

/// Constant that differentiates the protocol from random data and other
/// protocols on the same port.
pub const PROTOCOL_ID: u32 = 0x4f457403;

/// Base header: `u32 protocol_id | u16 sender_peer_id | u8 channel`.
pub const BASE_HEADER_SIZE: usize = 7;
/// Original packet header: `u8 type`.
pub const ORIGINAL_HEADER_SIZE: usize = 1;
/// Split packet header: `u8 type | u16 split_id | u16 chunk_count | u16 chunk_num`.
pub const SPLIT_HEADER_SIZE: usize = 7;
/// Reliable packet header: `u8 type | u16 seqnum`.
pub const RELIABLE_HEADER_SIZE: usize = 3;

/// Channel numbers have no intrinsic meaning; only `0..CHANNEL_COUNT` exist.
pub const CHANNEL_COUNT: usize = 3;

/// Reserved id meaning "no peer yet"; used by clients before the server has
/// assigned them an id.
pub const PEER_ID_INEXISTENT: PeerId = 0;
/// Reserved id of the server end of a connection.
pub const PEER_ID_SERVER: PeerId = 1;

/// Sequence numbers start close to the wrap point so that wraparound bugs
/// surface early rather than hours into a session.
pub const SEQNUM_INITIAL: SeqNum = 65500;

/// Receive-side acceptance window. A reliable packet whose seqnum falls
/// within this distance of the next expected one is acked and (if needed)
/// buffered; anything further out is treated as future or duplicate traffic.
pub const MAX_RELIABLE_WINDOW_SIZE: u16 = 0x8000;

/// Bounds for the dynamic resend timeout derived from the smoothed RTT.
/// The lower clamp also guards against a degenerate zero/negative timeout
/// ever being used to schedule retransmission.
pub const RESEND_TIMEOUT_MIN: f32 = 0.1;
pub const RESEND_TIMEOUT_MAX: f32 = 3.0;
pub const RESEND_TIMEOUT_FACTOR: f32 = 4.0;
/// Resend timeout used before the first RTT sample arrives.
pub const RESEND_TIMEOUT_INITIAL: f32 = 0.5;

/// Keep-alive cadence per peer.
pub const PING_INTERVAL: f32 = 5.0;

/// The sender task wakes at least this often even without a trigger.
pub const SEND_LOOP_TICK: Duration = Duration::from_millis(50);
/// Iteration deltas are clamped to this many seconds so a stalled loop does
/// not mass-expire timers on resume.
pub const MAX_DTIME: f32 = 0.1;

/// Upper bound on reliable packets re-queued from command processing per
/// channel per iteration.
pub const MAX_PACKETS_REQUEUED: usize = 256;

/// Receive buffer size; the IPv6 minimum MTU is the reliable upper boundary
/// of a UDP datagram across all conforming infrastructure.
pub const RECEIVE_BUFFER_SIZE: usize = 1500;
