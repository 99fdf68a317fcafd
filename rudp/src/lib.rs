//! # Rudp
//! A reliable, multi-channel, connection-oriented transport protocol layered
//! over UDP datagrams.
//!
//! The [`Connection`] facade owns a peer table and two background tasks: a
//! sender that drains command queues, retransmits timed-out reliable packets
//! and paces outgoing traffic under a per-iteration quota, and a receiver
//! that demultiplexes incoming datagrams into per-peer, per-channel state
//! machines and emits fully reassembled, in-order application messages.
//!
//! Reliable traffic is delivered strictly in order per channel; there is no
//! ordering guarantee across channels or for unreliable traffic. Messages
//! that must never be reordered relative to one another belong on the same
//! channel.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod channel;
mod config;
mod connection;
mod constants;
mod error;
mod net_packet;
mod packet;
mod peer;
mod types;
mod wrapping_number;

pub use rudp_serde::{ByteReader, ByteWriter, Serde, SerdeError, V2F32, V2I16, V3F32, V3I16, V3I32};

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionEvent};
pub use constants::{CHANNEL_COUNT, PEER_ID_INEXISTENT, PEER_ID_SERVER, PROTOCOL_ID};
pub use error::{ConnectionError, InvalidIncomingData, PacketError, ProtocolViolation};
pub use net_packet::NetworkPacket;
pub use peer::{RateStats, RttStats};
pub use types::{PeerId, SeqNum};
pub use wrapping_number::{sequence_greater_than, sequence_in_window, sequence_less_than};
