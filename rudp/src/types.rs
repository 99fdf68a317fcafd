/// Identifies one remote endpoint of a connection. Ids 0 and 1 are the
/// reserved sentinels [`crate::PEER_ID_INEXISTENT`] and
/// [`crate::PEER_ID_SERVER`]; remote peers are assigned ids from 2 upward.
pub type PeerId = u16;

/// A wrapping per-channel sequence number.
pub type SeqNum = u16;
