use crate::{error::SerdeError, reader::ByteReader, serde::Serde, writer::ByteWriter};

macro_rules! vector_type {
    ($(#[$doc:meta])* $name:ident, $component:ty, [$($field:ident),+] $(, $extra_derive:ident)*) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq $(, $extra_derive)*)]
        pub struct $name {
            $(pub $field: $component,)+
        }

        impl $name {
            pub fn new($($field: $component),+) -> Self {
                Self { $($field,)+ }
            }
        }

        impl Serde for $name {
            fn ser(&self, writer: &mut ByteWriter) {
                $(self.$field.ser(writer);)+
            }

            fn de(reader: &mut ByteReader) -> Result<Self, SerdeError> {
                Ok(Self {
                    $($field: <$component>::de(reader)?,)+
                })
            }
        }
    };
}

vector_type!(
    /// 2-D vector of IEEE-754 floats
    V2F32, f32, [x, y]
);
vector_type!(
    /// 3-D vector of IEEE-754 floats
    V3F32, f32, [x, y, z]
);
vector_type!(
    /// 2-D vector of 16-bit integers
    V2I16, i16, [x, y], Eq, Hash
);
vector_type!(
    /// 3-D vector of 16-bit integers
    V3I16, i16, [x, y, z], Eq, Hash
);
vector_type!(
    /// 3-D vector of 32-bit integers
    V3I32, i32, [x, y, z], Eq, Hash
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_wire_layout() {
        let mut writer = ByteWriter::new();
        V2I16::new(0x0102, 0x0304).ser(&mut writer);
        assert_eq!(writer.as_slice(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn vector_round_trip() {
        let value = V3F32::new(1.5, -2.25, 1000.0);
        let mut writer = ByteWriter::new();
        value.ser(&mut writer);
        let bytes = writer.into_vec();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(V3F32::de(&mut reader).unwrap(), value);
    }
}
