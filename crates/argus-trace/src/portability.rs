//! Trailing index of portability-relevant packets.
//!
//! Replay on a different device needs to revisit the calls that bind memory,
//! so the writer records the file offset of every packet whose type is in an
//! allow-list and appends them as one packet at the end of the file. The body
//! is `offsets(u64 LE)… count(u64 LE)`: readers that already know where the
//! packet ends take the count from the last word and walk backwards.

use std::collections::BTreeSet;

use argus_packet::PacketTypeId;

use crate::error::{Result, TraceError};

/// Well-known call ids assigned by the interception layer. Only the ones the
/// container itself cares about are named here.
pub mod call_ids {
    use argus_packet::PacketTypeId;

    pub const CREATE_DEVICE: PacketTypeId = PacketTypeId(16);
    pub const PRESENT: PacketTypeId = PacketTypeId(17);
    pub const ALLOCATE_MEMORY: PacketTypeId = PacketTypeId(18);
    pub const BIND_BUFFER_MEMORY: PacketTypeId = PacketTypeId(19);
    pub const BIND_IMAGE_MEMORY: PacketTypeId = PacketTypeId(20);
    pub const MAP_MEMORY: PacketTypeId = PacketTypeId(21);
    pub const UNMAP_MEMORY: PacketTypeId = PacketTypeId(22);
    pub const CREATE_BUFFER: PacketTypeId = PacketTypeId(23);
    pub const CREATE_IMAGE: PacketTypeId = PacketTypeId(24);
}

/// Packet types whose file offsets go into the trailing portability table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortabilitySet {
    ids: BTreeSet<PacketTypeId>,
}

impl PortabilitySet {
    pub fn new<I: IntoIterator<Item = PacketTypeId>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            ids: BTreeSet::new(),
        }
    }

    pub fn contains(&self, id: PacketTypeId) -> bool {
        self.ids.contains(&id)
    }
}

impl Default for PortabilitySet {
    /// The memory allocation and binding calls.
    fn default() -> Self {
        use call_ids::*;
        Self::new([
            ALLOCATE_MEMORY,
            BIND_BUFFER_MEMORY,
            BIND_IMAGE_MEMORY,
            MAP_MEMORY,
            UNMAP_MEMORY,
            CREATE_BUFFER,
            CREATE_IMAGE,
        ])
    }
}

pub fn encode_table(offsets: &[u64]) -> Vec<u8> {
    let mut body = Vec::with_capacity((offsets.len() + 1) * 8);
    for off in offsets {
        body.extend_from_slice(&off.to_le_bytes());
    }
    body.extend_from_slice(&(offsets.len() as u64).to_le_bytes());
    body
}

pub fn decode_table(body: &[u8]) -> Result<Vec<u64>> {
    if body.len() < 8 || body.len() % 8 != 0 {
        return Err(TraceError::Corrupt("portability table body misaligned"));
    }
    let count = u64::from_le_bytes(body[body.len() - 8..].try_into().unwrap());
    if count != (body.len() / 8 - 1) as u64 {
        return Err(TraceError::Corrupt("portability table count mismatch"));
    }
    Ok(body[..body.len() - 8]
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_roundtrip() {
        let offsets = [72u64, 1031, 99_999];
        let body = encode_table(&offsets);
        assert_eq!(decode_table(&body).unwrap(), offsets);
    }

    #[test]
    fn empty_table_roundtrip() {
        let body = encode_table(&[]);
        assert_eq!(body.len(), 8);
        assert!(decode_table(&body).unwrap().is_empty());
    }

    #[test]
    fn count_mismatch_rejected() {
        let mut body = encode_table(&[1, 2, 3]);
        let at = body.len() - 8;
        body[at..].copy_from_slice(&9u64.to_le_bytes());
        assert!(decode_table(&body).is_err());
    }

    #[test]
    fn default_set_tracks_memory_calls_only() {
        let set = PortabilitySet::default();
        assert!(set.contains(call_ids::ALLOCATE_MEMORY));
        assert!(set.contains(call_ids::BIND_IMAGE_MEMORY));
        assert!(!set.contains(call_ids::PRESENT));
        assert!(!set.contains(PacketTypeId::MESSAGE));
    }
}
