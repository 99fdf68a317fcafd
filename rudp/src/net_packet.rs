use rudp_serde::{ByteReader, ByteWriter, Serde};

use crate::{constants::PEER_ID_INEXISTENT, error::PacketError, types::PeerId};

/// A growable application message with a read cursor.
///
/// The upper layer builds outgoing messages by writing codec primitives in
/// sequence and parses incoming ones by reading them back in the same order.
/// A 16-bit opcode identifies the message type; received packets also carry
/// the id of the peer they came from. Reading past the end of the buffer is
/// a reported error, never undefined behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkPacket {
    opcode: u16,
    peer_id: PeerId,
    data: Vec<u8>,
    read_pos: usize,
}

impl NetworkPacket {
    pub fn new(opcode: u16) -> Self {
        Self {
            opcode,
            peer_id: PEER_ID_INEXISTENT,
            data: Vec::new(),
            read_pos: 0,
        }
    }

    pub fn with_capacity(opcode: u16, capacity: usize) -> Self {
        Self {
            opcode,
            peer_id: PEER_ID_INEXISTENT,
            data: Vec::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Parse a received payload: a `u16` opcode followed by the message
    /// body.
    pub fn from_wire(peer_id: PeerId, payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < 2 {
            return Err(PacketError::TooShort {
                size: payload.len(),
            });
        }
        let mut reader = ByteReader::new(payload);
        let opcode = reader.read_u16()?;
        Ok(Self {
            opcode,
            peer_id,
            data: reader.read_remaining().to_vec(),
            read_pos: 0,
        })
    }

    /// Serialize for transmission: opcode followed by the body.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(2 + self.data.len());
        writer.write_u16(self.opcode);
        writer.write_bytes(&self.data);
        writer.into_vec()
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn set_opcode(&mut self, opcode: u16) {
        self.opcode = opcode;
    }

    /// Originating peer of a received packet.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Message body without the opcode.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Append any codec primitive.
    pub fn write<T: Serde>(&mut self, value: &T) {
        let mut writer = ByteWriter::from_vec(std::mem::take(&mut self.data));
        value.ser(&mut writer);
        self.data = writer.into_vec();
    }

    /// Read the next codec primitive at the cursor.
    pub fn read<T: Serde>(&mut self) -> Result<T, PacketError> {
        let mut reader = ByteReader::new(&self.data[self.read_pos..]);
        let value = T::de(&mut reader)?;
        self.read_pos += reader.position();
        Ok(value)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&[u8], PacketError> {
        let mut reader = ByteReader::new(&self.data[self.read_pos..]);
        let bytes = reader.read_bytes(count)?;
        self.read_pos += reader.position();
        Ok(bytes)
    }

    /// Append a short string (`u16` length prefix).
    pub fn write_string(&mut self, value: &str) -> Result<(), PacketError> {
        self.with_writer(|writer| writer.write_string16(value))
    }

    pub fn read_string(&mut self) -> Result<String, PacketError> {
        self.with_reader(|reader| reader.read_string16())
    }

    /// Append a long string (`u32` length prefix).
    pub fn write_long_string(&mut self, value: &str) -> Result<(), PacketError> {
        self.with_writer(|writer| writer.write_string32(value))
    }

    pub fn read_long_string(&mut self) -> Result<String, PacketError> {
        self.with_reader(|reader| reader.read_string32())
    }

    /// Append a wide string (UTF-16 code units, surrogate pairs for code
    /// points above U+FFFF).
    pub fn write_wide_string(&mut self, value: &str) -> Result<(), PacketError> {
        self.with_writer(|writer| writer.write_wide_string(value))
    }

    pub fn read_wide_string(&mut self) -> Result<String, PacketError> {
        self.with_reader(|reader| reader.read_wide_string())
    }

    fn with_writer<T>(
        &mut self,
        write: impl FnOnce(&mut ByteWriter) -> Result<T, rudp_serde::SerdeError>,
    ) -> Result<T, PacketError> {
        let mut writer = ByteWriter::from_vec(std::mem::take(&mut self.data));
        let result = write(&mut writer);
        self.data = writer.into_vec();
        Ok(result?)
    }

    fn with_reader<T>(
        &mut self,
        read: impl FnOnce(&mut ByteReader) -> Result<T, rudp_serde::SerdeError>,
    ) -> Result<T, PacketError> {
        let mut reader = ByteReader::new(&self.data[self.read_pos..]);
        let value = read(&mut reader)?;
        self.read_pos += reader.position();
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudp_serde::{V3F32, V3I16};

    #[test]
    fn sequential_write_read_round_trip() {
        let mut pkt = NetworkPacket::new(0x0042);
        pkt.write(&7u8);
        pkt.write(&1234u16);
        pkt.write(&-77i32);
        pkt.write(&V3F32::new(1.0, 2.0, 3.0));
        pkt.write(&V3I16::new(-1, 0, 1));
        pkt.write_string("name").unwrap();
        pkt.write_wide_string("wide \u{1F600}").unwrap();

        let wire = pkt.to_wire();
        let mut parsed = NetworkPacket::from_wire(9, &wire).unwrap();
        assert_eq!(parsed.opcode(), 0x0042);
        assert_eq!(parsed.peer_id(), 9);
        assert_eq!(parsed.read::<u8>().unwrap(), 7);
        assert_eq!(parsed.read::<u16>().unwrap(), 1234);
        assert_eq!(parsed.read::<i32>().unwrap(), -77);
        assert_eq!(parsed.read::<V3F32>().unwrap(), V3F32::new(1.0, 2.0, 3.0));
        assert_eq!(parsed.read::<V3I16>().unwrap(), V3I16::new(-1, 0, 1));
        assert_eq!(parsed.read_string().unwrap(), "name");
        assert_eq!(parsed.read_wide_string().unwrap(), "wide \u{1F600}");
        assert_eq!(parsed.remaining(), 0);
    }

    #[test]
    fn reading_past_the_end_is_an_error() {
        let mut pkt = NetworkPacket::new(1);
        pkt.write(&1u8);
        let wire = pkt.to_wire();
        let mut parsed = NetworkPacket::from_wire(2, &wire).unwrap();
        assert_eq!(parsed.read::<u8>().unwrap(), 1);
        assert!(matches!(
            parsed.read::<u32>(),
            Err(PacketError::Serde(_))
        ));
    }

    #[test]
    fn runt_payload_is_rejected() {
        assert!(matches!(
            NetworkPacket::from_wire(2, &[0x01]),
            Err(PacketError::TooShort { size: 1 })
        ));
    }

    #[test]
    fn empty_packet_wire_form_is_just_the_opcode() {
        let pkt = NetworkPacket::new(0);
        assert_eq!(pkt.to_wire(), vec![0, 0]);
    }
}
