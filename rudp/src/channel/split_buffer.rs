use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};

use crate::{error::ProtocolViolation, packet::SplitChunk};

/// One in-progress reassembly.
#[derive(Debug)]
struct IncomingSplitPacket {
    chunk_count: u16,
    /// Reliable reassemblies are refreshed by retransmission, so they are
    /// evicted on staleness rather than on total age.
    reliable: bool,
    /// Seconds since the entry was created.
    age: f32,
    /// Seconds since a chunk was last accepted.
    stale: f32,
    chunks: BTreeMap<u16, Vec<u8>>,
}

impl IncomingSplitPacket {
    fn new(chunk_count: u16, reliable: bool) -> Self {
        Self {
            chunk_count,
            reliable,
            age: 0.0,
            stale: 0.0,
            chunks: BTreeMap::new(),
        }
    }

    fn all_received(&self) -> bool {
        self.chunks.len() == self.chunk_count as usize
    }

    fn reassemble(self) -> Vec<u8> {
        debug_assert!(self.all_received());
        let total: usize = self.chunks.values().map(Vec::len).sum();
        let mut data = Vec::with_capacity(total);
        for chunk in self.chunks.into_values() {
            data.extend_from_slice(&chunk);
        }
        data
    }
}

/// Reassembly table of one channel: split id → partially filled buffer.
#[derive(Debug, Default)]
pub(crate) struct IncomingSplitBuffer {
    map: HashMap<u16, IncomingSplitPacket>,
}

impl IncomingSplitBuffer {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Store one fragment. Returns the reassembled payload once every chunk
    /// for the split id has arrived.
    ///
    /// Identical re-delivery of a chunk is ignored (lag makes duplicates
    /// normal); conflicting data for an already-received chunk, or a chunk
    /// count that disagrees between fragments, is a protocol violation.
    pub fn insert(
        &mut self,
        chunk: &SplitChunk<'_>,
        reliable: bool,
    ) -> Result<Option<Vec<u8>>, ProtocolViolation> {
        if let Some(entry) = self.map.get(&chunk.split_id) {
            if entry.chunk_count != chunk.chunk_count {
                let expected = entry.chunk_count;
                self.map.remove(&chunk.split_id);
                return Err(ProtocolViolation::SplitCountMismatch {
                    split_id: chunk.split_id,
                    expected,
                    found: chunk.chunk_count,
                });
            }
            if entry.reliable != reliable {
                warn!(
                    "split {} reliable flag changed from {} to {}",
                    chunk.split_id, entry.reliable, reliable
                );
            }
            match entry.chunks.get(&chunk.chunk_num) {
                Some(existing) if existing.as_slice() == chunk.data => {
                    debug!(
                        "ignoring duplicate chunk {} of split {}",
                        chunk.chunk_num, chunk.split_id
                    );
                    return Ok(None);
                }
                Some(_) => {
                    self.map.remove(&chunk.split_id);
                    return Err(ProtocolViolation::SplitChunkMismatch {
                        split_id: chunk.split_id,
                        chunk_num: chunk.chunk_num,
                    });
                }
                None => {}
            }
        }

        let entry = self
            .map
            .entry(chunk.split_id)
            .or_insert_with(|| IncomingSplitPacket::new(chunk.chunk_count, reliable));
        entry.chunks.insert(chunk.chunk_num, chunk.data.to_vec());
        entry.stale = 0.0;

        if !entry.all_received() {
            return Ok(None);
        }
        let complete = self
            .map
            .remove(&chunk.split_id)
            .map(IncomingSplitPacket::reassemble);
        Ok(complete)
    }

    /// Evict reassemblies whose fragments stopped arriving: unreliable ones
    /// once older than `timeout`, reliable ones once no chunk has arrived
    /// for `timeout` (retransmission keeps a live one fresh).
    pub fn remove_timed_outs(&mut self, dtime: f32, timeout: f32) {
        self.map.retain(|split_id, entry| {
            entry.age += dtime;
            entry.stale += dtime;
            let expired = if entry.reliable {
                entry.stale >= timeout
            } else {
                entry.age >= timeout
            };
            if expired {
                warn!(
                    "removing timed-out incomplete split {} ({}/{} chunks, reliable={})",
                    split_id,
                    entry.chunks.len(),
                    entry.chunk_count,
                    entry.reliable
                );
            }
            !expired
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunk(split_id: u16, chunk_count: u16, chunk_num: u16, data: &'static [u8]) -> SplitChunk<'static> {
        SplitChunk {
            split_id,
            chunk_count,
            chunk_num,
            data,
        }
    }

    #[test]
    fn reassembles_in_any_arrival_order() {
        let mut buffer = IncomingSplitBuffer::new();
        assert_eq!(buffer.insert(&chunk(7, 3, 2, b"cc"), false).unwrap(), None);
        assert_eq!(buffer.insert(&chunk(7, 3, 0, b"aa"), false).unwrap(), None);
        let complete = buffer.insert(&chunk(7, 3, 1, b"bb"), false).unwrap();
        assert_eq!(complete.as_deref(), Some(&b"aabbcc"[..]));
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn duplicate_identical_chunk_is_ignored() {
        let mut buffer = IncomingSplitBuffer::new();
        assert_eq!(buffer.insert(&chunk(7, 2, 0, b"aa"), true).unwrap(), None);
        assert_eq!(buffer.insert(&chunk(7, 2, 0, b"aa"), true).unwrap(), None);
        let complete = buffer.insert(&chunk(7, 2, 1, b"bb"), true).unwrap();
        assert_eq!(complete.as_deref(), Some(&b"aabb"[..]));
    }

    #[test]
    fn conflicting_chunk_is_a_violation() {
        let mut buffer = IncomingSplitBuffer::new();
        buffer.insert(&chunk(7, 2, 0, b"aa"), true).unwrap();
        assert_eq!(
            buffer.insert(&chunk(7, 2, 0, b"XX"), true),
            Err(ProtocolViolation::SplitChunkMismatch {
                split_id: 7,
                chunk_num: 0
            })
        );
    }

    #[test]
    fn chunk_count_disagreement_is_a_violation() {
        let mut buffer = IncomingSplitBuffer::new();
        buffer.insert(&chunk(7, 2, 0, b"aa"), true).unwrap();
        assert_eq!(
            buffer.insert(&chunk(7, 3, 1, b"bb"), true),
            Err(ProtocolViolation::SplitCountMismatch {
                split_id: 7,
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn unreliable_entries_expire_by_age() {
        let mut buffer = IncomingSplitBuffer::new();
        buffer.insert(&chunk(1, 2, 0, b"aa"), false).unwrap();
        buffer.remove_timed_outs(5.0, 10.0);
        assert_eq!(buffer.len(), 1);
        buffer.remove_timed_outs(5.0, 10.0);
        assert_eq!(buffer.len(), 0);
    }

    proptest! {
        // A fixed set of chunks must reassemble to the same bytes exactly
        // once, whatever order they arrive in.
        #[test]
        fn reassembly_is_arrival_order_independent(
            order in Just((0..10u16).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let chunks: Vec<Vec<u8>> = (0..10u16).map(|i| vec![i as u8; 3]).collect();
            let mut buffer = IncomingSplitBuffer::new();
            let mut complete = None;
            for &i in &order {
                let chunk = SplitChunk {
                    split_id: 1,
                    chunk_count: 10,
                    chunk_num: i,
                    data: &chunks[i as usize],
                };
                if let Some(payload) = buffer.insert(&chunk, true).unwrap() {
                    prop_assert!(complete.is_none(), "reassembled twice");
                    complete = Some(payload);
                }
            }
            prop_assert_eq!(complete.unwrap(), chunks.concat());
            prop_assert_eq!(buffer.len(), 0);
        }
    }

    #[test]
    fn reliable_entries_survive_while_chunks_keep_arriving() {
        let mut buffer = IncomingSplitBuffer::new();
        buffer.insert(&chunk(1, 3, 0, b"aa"), true).unwrap();
        buffer.remove_timed_outs(8.0, 10.0);
        // A fresh chunk resets the staleness clock.
        buffer.insert(&chunk(1, 3, 1, b"bb"), true).unwrap();
        buffer.remove_timed_outs(8.0, 10.0);
        assert_eq!(buffer.len(), 1);
        // No chunk for a full timeout: evicted even though reliable.
        buffer.remove_timed_outs(8.0, 10.0);
        assert_eq!(buffer.len(), 0);
    }
}
