// The wire tags of the four packet kinds and the control sub-types.

/// Tag byte following the base header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum PacketType {
    // A packet used by the protocol itself; never handed to the user.
    Control = 0,
    // A plain application payload, delivered as-is.
    Original = 1,
    // One fragment of a larger payload.
    Split = 2,
    // Wraps any other kind with a sequence number for acked delivery.
    Reliable = 3,
}

impl PacketType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Control),
            1 => Some(Self::Original),
            2 => Some(Self::Split),
            3 => Some(Self::Reliable),
            _ => None,
        }
    }
}

/// Control sub-type byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ControlType {
    Ack = 0,
    SetPeerId = 1,
    Ping = 2,
    Disco = 3,
}

impl ControlType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Ack),
            1 => Some(Self::SetPeerId),
            2 => Some(Self::Ping),
            3 => Some(Self::Disco),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for tag in 0..4u8 {
            assert_eq!(PacketType::from_u8(tag).unwrap() as u8, tag);
            assert_eq!(ControlType::from_u8(tag).unwrap() as u8, tag);
        }
        assert_eq!(PacketType::from_u8(4), None);
        assert_eq!(ControlType::from_u8(4), None);
    }
}
