use crate::error::SerdeError;

/// A cursor over received wire data with bounds-checked big-endian reads.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn has_remaining(&self) -> bool {
        self.pos < self.data.len()
    }

    /// Take the next `count` bytes, or fail without touching the cursor.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], SerdeError> {
        if self.remaining() < count {
            return Err(SerdeError::UnexpectedEnd {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Take everything that is left.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], SerdeError> {
        let slice = self.read_bytes(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8, SerdeError> {
        Ok(u8::from_be_bytes(self.read_array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16, SerdeError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, SerdeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, SerdeError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_i8(&mut self) -> Result<i8, SerdeError> {
        Ok(i8::from_be_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, SerdeError> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, SerdeError> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, SerdeError> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, SerdeError> {
        Ok(f32::from_be_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, SerdeError> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    /// Read a short string: `u16` length prefix followed by raw bytes.
    pub fn read_string16(&mut self) -> Result<String, SerdeError> {
        let length = self.read_u16()? as usize;
        let bytes = self.read_bytes(length)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SerdeError::InvalidUtf8)
    }

    /// Read a long string: `u32` length prefix followed by raw bytes.
    pub fn read_string32(&mut self) -> Result<String, SerdeError> {
        let length = self.read_u32()? as usize;
        let bytes = self.read_bytes(length)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SerdeError::InvalidUtf8)
    }

    /// Read a wide string: `u16` count of UTF-16 code units followed by the
    /// units. Surrogate pairs are decoded back into single code points.
    pub fn read_wide_string(&mut self) -> Result<String, SerdeError> {
        let count = self.read_u16()? as usize;
        let mut units = Vec::with_capacity(count);
        for _ in 0..count {
            units.push(self.read_u16()?);
        }
        String::from_utf16(&units).map_err(|_| SerdeError::InvalidUtf16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ByteWriter;

    #[test]
    fn read_past_end_is_an_error() {
        let mut reader = ByteReader::new(&[0x01, 0x02]);
        assert_eq!(
            reader.read_u32(),
            Err(SerdeError::UnexpectedEnd {
                needed: 4,
                remaining: 2
            })
        );
        // The cursor is untouched by the failed read.
        assert_eq!(reader.read_u16(), Ok(0x0102));
    }

    #[test]
    fn truncated_string_is_an_error() {
        // Claims 10 bytes of payload, provides 2.
        let mut reader = ByteReader::new(&[0x00, 0x0A, b'h', b'i']);
        assert!(matches!(
            reader.read_string16(),
            Err(SerdeError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn wide_string_round_trip_with_surrogates() {
        let original = "grin \u{1F600} and \u{10348} beyond";
        let mut writer = ByteWriter::new();
        writer.write_wide_string(original).unwrap();
        let bytes = writer.into_vec();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_wide_string().unwrap(), original);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn unpaired_surrogate_is_rejected() {
        // One lone high surrogate.
        let mut reader = ByteReader::new(&[0x00, 0x01, 0xD8, 0x00]);
        assert_eq!(reader.read_wide_string(), Err(SerdeError::InvalidUtf16));
    }
}
