use rudp_serde::ByteReader;

use crate::{
    constants::{BASE_HEADER_SIZE, CHANNEL_COUNT},
    error::InvalidIncomingData,
    packet::packet_type::{ControlType, PacketType},
    types::{PeerId, SeqNum},
};

/// The 7-byte header at the start of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BaseHeader {
    pub protocol_id: u32,
    pub peer_id: PeerId,
    pub channel: u8,
}

impl BaseHeader {
    /// Validates the header against the expected protocol id and channel
    /// range, returning it together with the remaining packet body.
    pub fn parse(
        data: &[u8],
        expected_protocol_id: u32,
    ) -> Result<(Self, &[u8]), InvalidIncomingData> {
        if data.len() < BASE_HEADER_SIZE {
            return Err(InvalidIncomingData::TooShort { size: data.len() });
        }
        let mut reader = ByteReader::new(data);
        let protocol_id = reader.read_u32()?;
        if protocol_id != expected_protocol_id {
            return Err(InvalidIncomingData::BadProtocolId { found: protocol_id });
        }
        let peer_id = reader.read_u16()?;
        let channel = reader.read_u8()?;
        if channel as usize >= CHANNEL_COUNT {
            return Err(InvalidIncomingData::ChannelOutOfRange {
                channel,
                count: CHANNEL_COUNT,
            });
        }
        let header = Self {
            protocol_id,
            peer_id,
            channel,
        };
        Ok((header, reader.read_remaining()))
    }
}

/// A decoded control packet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlMessage {
    Ack { seqnum: SeqNum },
    SetPeerId { peer_id: PeerId },
    Ping,
    Disco,
}

/// One fragment of a split payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SplitChunk<'a> {
    pub split_id: u16,
    pub chunk_count: u16,
    pub chunk_num: u16,
    pub data: &'a [u8],
}

/// One parsed layer of an incoming packet. Payload slices borrow the
/// datagram; nested layers (the body of a Reliable, or a reassembled split
/// payload) are fed back through [`InboundPacket::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InboundPacket<'a> {
    Control(ControlMessage),
    Original(&'a [u8]),
    Split(SplitChunk<'a>),
    Reliable { seqnum: SeqNum, inner: &'a [u8] },
}

impl<'a> InboundPacket<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, InvalidIncomingData> {
        let mut reader = ByteReader::new(data);
        let tag = reader
            .read_u8()
            .map_err(|_| InvalidIncomingData::TooShort { size: data.len() })?;
        let packet_type =
            PacketType::from_u8(tag).ok_or(InvalidIncomingData::UnknownPacketType { tag })?;

        match packet_type {
            PacketType::Control => {
                let tag = reader
                    .read_u8()
                    .map_err(|_| InvalidIncomingData::Truncated { what: "control" })?;
                let control_type = ControlType::from_u8(tag)
                    .ok_or(InvalidIncomingData::UnknownControlType { tag })?;
                let message = match control_type {
                    ControlType::Ack => ControlMessage::Ack {
                        seqnum: reader
                            .read_u16()
                            .map_err(|_| InvalidIncomingData::Truncated { what: "ack" })?,
                    },
                    ControlType::SetPeerId => ControlMessage::SetPeerId {
                        peer_id: reader
                            .read_u16()
                            .map_err(|_| InvalidIncomingData::Truncated { what: "set_peer_id" })?,
                    },
                    ControlType::Ping => ControlMessage::Ping,
                    ControlType::Disco => ControlMessage::Disco,
                };
                Ok(Self::Control(message))
            }
            PacketType::Original => {
                // An empty payload carries nothing the upper layer could
                // parse; the original sender never produces one.
                if !reader.has_remaining() {
                    return Err(InvalidIncomingData::Truncated { what: "original" });
                }
                Ok(Self::Original(reader.read_remaining()))
            }
            PacketType::Split => {
                let truncated = InvalidIncomingData::Truncated { what: "split" };
                let split_id = reader.read_u16().map_err(|_| truncated.clone())?;
                let chunk_count = reader.read_u16().map_err(|_| truncated.clone())?;
                let chunk_num = reader.read_u16().map_err(|_| truncated)?;
                if chunk_num >= chunk_count {
                    return Err(InvalidIncomingData::ChunkOutOfRange {
                        chunk_num,
                        chunk_count,
                    });
                }
                Ok(Self::Split(SplitChunk {
                    split_id,
                    chunk_count,
                    chunk_num,
                    data: reader.read_remaining(),
                }))
            }
            PacketType::Reliable => {
                let seqnum = reader
                    .read_u16()
                    .map_err(|_| InvalidIncomingData::Truncated { what: "reliable" })?;
                Ok(Self::Reliable {
                    seqnum,
                    inner: reader.read_remaining(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PROTOCOL_ID;
    use crate::packet::outbound::{make_control_ack, make_datagram, make_original, make_reliable};

    #[test]
    fn base_header_rejects_short_and_foreign_datagrams() {
        assert!(matches!(
            BaseHeader::parse(&[1, 2, 3], PROTOCOL_ID),
            Err(InvalidIncomingData::TooShort { size: 3 })
        ));

        let datagram = make_datagram(0xDEADBEEF, 7, 0, &[1]);
        assert!(matches!(
            BaseHeader::parse(&datagram, PROTOCOL_ID),
            Err(InvalidIncomingData::BadProtocolId { found: 0xDEADBEEF })
        ));
    }

    #[test]
    fn base_header_rejects_out_of_range_channel() {
        let datagram = make_datagram(PROTOCOL_ID, 7, 9, &[1]);
        assert!(matches!(
            BaseHeader::parse(&datagram, PROTOCOL_ID),
            Err(InvalidIncomingData::ChannelOutOfRange { channel: 9, .. })
        ));
    }

    #[test]
    fn base_header_parses_and_strips() {
        let datagram = make_datagram(PROTOCOL_ID, 42, 2, &[9, 9]);
        let (header, body) = BaseHeader::parse(&datagram, PROTOCOL_ID).unwrap();
        assert_eq!(header.peer_id, 42);
        assert_eq!(header.channel, 2);
        assert_eq!(body, &[9, 9]);
    }

    #[test]
    fn parses_each_layer() {
        let ack = make_control_ack(513);
        assert_eq!(
            InboundPacket::parse(&ack).unwrap(),
            InboundPacket::Control(ControlMessage::Ack { seqnum: 513 })
        );

        let original = make_original(b"payload");
        assert_eq!(
            InboundPacket::parse(&original).unwrap(),
            InboundPacket::Original(b"payload")
        );

        let reliable = make_reliable(&original, 65500);
        match InboundPacket::parse(&reliable).unwrap() {
            InboundPacket::Reliable { seqnum, inner } => {
                assert_eq!(seqnum, 65500);
                assert_eq!(
                    InboundPacket::parse(inner).unwrap(),
                    InboundPacket::Original(b"payload")
                );
            }
            other => panic!("expected reliable, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_and_truncated() {
        assert!(matches!(
            InboundPacket::parse(&[77]),
            Err(InvalidIncomingData::UnknownPacketType { tag: 77 })
        ));
        assert!(matches!(
            InboundPacket::parse(&[PacketType::Reliable as u8, 0x01]),
            Err(InvalidIncomingData::Truncated { what: "reliable" })
        ));
        assert!(matches!(
            InboundPacket::parse(&[PacketType::Control as u8, 9]),
            Err(InvalidIncomingData::UnknownControlType { tag: 9 })
        ));
        assert!(matches!(
            InboundPacket::parse(&[PacketType::Original as u8]),
            Err(InvalidIncomingData::Truncated { what: "original" })
        ));
    }

    #[test]
    fn rejects_chunk_index_beyond_count() {
        let bad = [PacketType::Split as u8, 0, 1, 0, 2, 0, 5, 0xAA];
        assert!(matches!(
            InboundPacket::parse(&bad),
            Err(InvalidIncomingData::ChunkOutOfRange {
                chunk_num: 5,
                chunk_count: 2
            })
        ));
    }
}
