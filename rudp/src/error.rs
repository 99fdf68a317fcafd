use thiserror::Error;

use crate::types::{PeerId, SeqNum};
use rudp_serde::SerdeError;

/// Reasons an incoming datagram (or a nested packet inside one) is rejected
/// as invalid. The offending datagram is logged and discarded without
/// affecting other peers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidIncomingData {
    /// Datagram shorter than the base header
    #[error("datagram of {size} bytes is shorter than the base header")]
    TooShort { size: usize },

    /// Base header carried the wrong protocol magic
    #[error("bad protocol id {found:#010x}")]
    BadProtocolId { found: u32 },

    /// Channel number outside the valid range
    #[error("channel {channel} out of range (only {count} channels exist)")]
    ChannelOutOfRange { channel: u8, count: usize },

    /// Unknown packet type tag
    #[error("unknown packet type tag {tag}")]
    UnknownPacketType { tag: u8 },

    /// Unknown control sub-type
    #[error("unknown control type {tag}")]
    UnknownControlType { tag: u8 },

    /// A packet body ended before its fixed fields did
    #[error("truncated {what} packet")]
    Truncated { what: &'static str },

    /// Split chunk index at or beyond the advertised chunk count
    #[error("split chunk {chunk_num} out of range ({chunk_count} chunks)")]
    ChunkOutOfRange { chunk_num: u16, chunk_count: u16 },

    /// Field-level decode failure
    #[error("codec error: {0}")]
    Serde(#[from] SerdeError),
}

/// Conditions that indicate a buggy or malicious peer and force its
/// disconnection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A reliable packet nested inside another reliable packet
    #[error("nested reliable packet")]
    NestedReliable,

    /// A retransmitted reliable packet whose bytes differ from the buffered
    /// original
    #[error("conflicting duplicate for reliable seqnum {seqnum}")]
    ReliableDuplicateMismatch { seqnum: SeqNum },

    /// A split chunk re-delivered with different bytes than first received
    #[error("conflicting data for split {split_id} chunk {chunk_num}")]
    SplitChunkMismatch { split_id: u16, chunk_num: u16 },

    /// Two chunks of the same split message advertised different totals
    #[error("split {split_id} chunk count changed from {expected} to {found}")]
    SplitCountMismatch {
        split_id: u16,
        expected: u16,
        found: u16,
    },
}

/// Internal result of running one packet through the inbound state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum ProcessError {
    #[error(transparent)]
    Invalid(#[from] InvalidIncomingData),
    #[error(transparent)]
    Violation(#[from] ProtocolViolation),
}

impl From<SerdeError> for ProcessError {
    fn from(err: SerdeError) -> Self {
        Self::Invalid(InvalidIncomingData::Serde(err))
    }
}

/// Errors surfaced while building or parsing a [`crate::NetworkPacket`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Received payload too small to carry an opcode
    #[error("payload of {size} bytes is too short for an opcode")]
    TooShort { size: usize },

    /// Field-level codec failure (typically a read past the end)
    #[error("codec error: {0}")]
    Serde(#[from] SerdeError),
}

/// Errors returned by the public [`crate::Connection`] API.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No event arrived within the requested timeout
    #[error("no incoming event within the timeout")]
    ReceiveTimeout,

    /// The connection's background tasks have shut down
    #[error("connection is closed")]
    Closed,

    /// Channel index outside `0..CHANNEL_COUNT`
    #[error("channel {0} out of range")]
    InvalidChannel(u8),

    /// Payload too large to be split into `u16`-indexed fragments
    #[error("payload of {size} bytes exceeds the maximum splittable size {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Referenced peer does not exist (or was already removed)
    #[error("peer {0} not found")]
    PeerNotFound(PeerId),

    /// Packet construction/parse failure
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// Socket-level failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
