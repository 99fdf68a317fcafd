use crate::{error::SerdeError, reader::ByteReader, writer::ByteWriter};

/// A type that can be written to and read from the wire.
pub trait Serde: Sized {
    fn ser(&self, writer: &mut ByteWriter);
    fn de(reader: &mut ByteReader) -> Result<Self, SerdeError>;
}

macro_rules! impl_serde_number {
    ($type:ty, $write:ident, $read:ident) => {
        impl Serde for $type {
            fn ser(&self, writer: &mut ByteWriter) {
                writer.$write(*self);
            }

            fn de(reader: &mut ByteReader) -> Result<Self, SerdeError> {
                reader.$read()
            }
        }
    };
}

impl_serde_number!(u8, write_u8, read_u8);
impl_serde_number!(u16, write_u16, read_u16);
impl_serde_number!(u32, write_u32, read_u32);
impl_serde_number!(u64, write_u64, read_u64);
impl_serde_number!(i8, write_i8, read_i8);
impl_serde_number!(i16, write_i16, read_i16);
impl_serde_number!(i32, write_i32, read_i32);
impl_serde_number!(i64, write_i64, read_i64);
impl_serde_number!(f32, write_f32, read_f32);
impl_serde_number!(f64, write_f64, read_f64);

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Serde + PartialEq + std::fmt::Debug>(value: T) {
        let mut writer = ByteWriter::new();
        value.ser(&mut writer);
        let bytes = writer.into_vec();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(T::de(&mut reader).unwrap(), value);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn numbers_round_trip() {
        round_trip(0xABu8);
        round_trip(0xBEEFu16);
        round_trip(0xDEADBEEFu32);
        round_trip(0xDEADBEEFCAFEBABEu64);
        round_trip(-5i8);
        round_trip(-1234i16);
        round_trip(-123456i32);
        round_trip(-1234567890123i64);
        round_trip(3.5f32);
        round_trip(-0.125f64);
    }
}
