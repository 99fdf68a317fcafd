//! Packet framing: the base header, the four packet kinds and the control
//! sub-protocol.
//!
//! Incoming data is parsed one layer at a time into the borrowed
//! [`InboundPacket`] tagged union and dispatched with `match`; outgoing data
//! is assembled by the builder functions in [`outbound`].

mod inbound;
mod outbound;
mod packet_type;

pub(crate) use inbound::{BaseHeader, ControlMessage, InboundPacket, SplitChunk};
pub(crate) use outbound::{
    make_auto_split, make_control_ack, make_control_disco, make_control_ping,
    make_control_set_peer_id, make_datagram, make_reliable,
};
#[cfg(test)]
pub(crate) use outbound::{make_original, make_split_packets};
pub(crate) use packet_type::{ControlType, PacketType};
