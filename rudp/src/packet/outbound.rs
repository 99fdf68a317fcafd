use rudp_serde::ByteWriter;

use crate::{
    constants::{ORIGINAL_HEADER_SIZE, SPLIT_HEADER_SIZE},
    packet::packet_type::{ControlType, PacketType},
    types::{PeerId, SeqNum},
};

/// Prepend the base header to a finished packet body, producing the bytes
/// that go on the wire.
pub(crate) fn make_datagram(
    protocol_id: u32,
    sender_peer_id: PeerId,
    channel: u8,
    body: &[u8],
) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(crate::constants::BASE_HEADER_SIZE + body.len());
    writer.write_u32(protocol_id);
    writer.write_u16(sender_peer_id);
    writer.write_u8(channel);
    writer.write_bytes(body);
    writer.into_vec()
}

/// Wrap an application payload in an Original header.
pub(crate) fn make_original(payload: &[u8]) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(ORIGINAL_HEADER_SIZE + payload.len());
    writer.write_u8(PacketType::Original as u8);
    writer.write_bytes(payload);
    writer.into_vec()
}

/// Split a payload into Split-headed fragments of at most `chunksize_max`
/// bytes each (header included), all sharing `split_id`.
pub(crate) fn make_split_packets(payload: &[u8], chunksize_max: usize, split_id: u16) -> Vec<Vec<u8>> {
    let max_data_size = chunksize_max - SPLIT_HEADER_SIZE;
    let chunk_count = payload.len().div_ceil(max_data_size);
    debug_assert!(chunk_count <= u16::MAX as usize);

    let mut chunks = Vec::with_capacity(chunk_count);
    for (chunk_num, data) in payload.chunks(max_data_size).enumerate() {
        let mut writer = ByteWriter::with_capacity(SPLIT_HEADER_SIZE + data.len());
        writer.write_u8(PacketType::Split as u8);
        writer.write_u16(split_id);
        writer.write_u16(chunk_count as u16);
        writer.write_u16(chunk_num as u16);
        writer.write_bytes(data);
        chunks.push(writer.into_vec());
    }
    chunks
}

/// Depending on size, wrap the payload as one Original packet or split it
/// into fragments. Consumes one split id when a split is made.
pub(crate) fn make_auto_split(
    payload: &[u8],
    chunksize_max: usize,
    split_seqnum: &mut u16,
) -> Vec<Vec<u8>> {
    if payload.len() + ORIGINAL_HEADER_SIZE > chunksize_max {
        let chunks = make_split_packets(payload, chunksize_max, *split_seqnum);
        *split_seqnum = split_seqnum.wrapping_add(1);
        return chunks;
    }
    vec![make_original(payload)]
}

/// Wrap a packet body in a Reliable header carrying `seqnum`.
pub(crate) fn make_reliable(body: &[u8], seqnum: SeqNum) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(crate::constants::RELIABLE_HEADER_SIZE + body.len());
    writer.write_u8(PacketType::Reliable as u8);
    writer.write_u16(seqnum);
    writer.write_bytes(body);
    writer.into_vec()
}

pub(crate) fn make_control_ack(seqnum: SeqNum) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(4);
    writer.write_u8(PacketType::Control as u8);
    writer.write_u8(ControlType::Ack as u8);
    writer.write_u16(seqnum);
    writer.into_vec()
}

pub(crate) fn make_control_set_peer_id(peer_id: PeerId) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(4);
    writer.write_u8(PacketType::Control as u8);
    writer.write_u8(ControlType::SetPeerId as u8);
    writer.write_u16(peer_id);
    writer.into_vec()
}

pub(crate) fn make_control_ping() -> Vec<u8> {
    vec![PacketType::Control as u8, ControlType::Ping as u8]
}

pub(crate) fn make_control_disco() -> Vec<u8> {
    vec![PacketType::Control as u8, ControlType::Disco as u8]
}
