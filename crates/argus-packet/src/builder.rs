//! Two-phase packet construction.
//!
//! A builder reserves the entire packet up front (the buffer never grows), so
//! callers must have summed the exact size of every fixed field, every
//! variable-length array, and every linked extension struct before calling
//! [`PacketBuilder::new`]. Pointer-valued fields go through `embed` (copy the
//! bytes, record a descriptor) and a mirrored `finalize_field` (convert the
//! descriptor into a self-relative offset). No memory word is ever used as
//! both a pointer and an offset; descriptors live outside the buffer until
//! finalize writes the offset.

use crate::error::{PacketError, Result};
use crate::format::{
    Packet, PacketHeader, PacketTags, PacketTimes, PacketTypeId, CHAIN_NODE_HEADER_SIZE,
    MAX_PACKET_BYTES, PACKET_HEADER_SIZE,
};

/// Byte offset of an 8-byte pointer field within the packet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot(pub u64);

/// One link of an optional extension-struct chain, embedded via
/// [`PacketBuilder::embed_chain`]. On the wire each node is
/// `[tag u32][payload_len u32][next u64][payload…]`.
#[derive(Debug, Clone)]
pub struct ChainNode {
    pub tag: u32,
    pub payload: Vec<u8>,
}

impl ChainNode {
    /// On-wire size of this node; sum these (plus the fixed region) when
    /// computing the size passed to [`PacketBuilder::new`].
    pub fn wire_len(&self) -> u64 {
        CHAIN_NODE_HEADER_SIZE + self.payload.len() as u64
    }
}

#[derive(Debug)]
struct Pending {
    slot: u64,
    /// Body-relative offset of the embedded bytes; 0 is the null sentinel
    /// (embedded data always lands after the fixed region, so a real offset
    /// is never 0).
    data_offset: u64,
    finalized: bool,
}

/// Builder for one packet: `new` → fixed-field writes → `embed`* →
/// `finalize_field`* (mirrored order) → `finish`.
#[derive(Debug)]
pub struct PacketBuilder {
    bytes: Vec<u8>,
    fixed_len: u64,
    /// Next free body offset for embedded data.
    cursor: u64,
    pending: Vec<Pending>,
    packet_type: PacketTypeId,
    thread_id: u32,
}

impl PacketBuilder {
    /// Reserves `PACKET_HEADER_SIZE + fixed_len + extra_len` contiguous
    /// bytes. `fixed_len` covers the call's fixed argument region (including
    /// its pointer slots); `extra_len` covers every byte that will later be
    /// embedded.
    pub fn new(
        packet_type: PacketTypeId,
        thread_id: u32,
        fixed_len: u64,
        extra_len: u64,
    ) -> Result<Self> {
        let total = PACKET_HEADER_SIZE
            .checked_add(fixed_len)
            .and_then(|v| v.checked_add(extra_len))
            .ok_or(PacketError::Oversized(u64::MAX))?;
        if total > MAX_PACKET_BYTES {
            return Err(PacketError::Oversized(total));
        }
        Ok(Self {
            bytes: vec![0u8; total as usize],
            fixed_len,
            cursor: fixed_len,
            pending: Vec::new(),
            packet_type,
            thread_id,
        })
    }

    fn body_len(&self) -> u64 {
        self.bytes.len() as u64 - PACKET_HEADER_SIZE
    }

    fn body_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[PACKET_HEADER_SIZE as usize..]
    }

    /// Writes raw bytes into the fixed argument region.
    pub fn put_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len() as u64)
            .ok_or(PacketError::FixedRegionOverrun {
                offset,
                len: bytes.len() as u64,
                fixed_len: self.fixed_len,
            })?;
        if end > self.fixed_len {
            return Err(PacketError::FixedRegionOverrun {
                offset,
                len: bytes.len() as u64,
                fixed_len: self.fixed_len,
            });
        }
        self.body_mut()[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    pub fn put_u32(&mut self, offset: u64, v: u32) -> Result<()> {
        self.put_bytes(offset, &v.to_le_bytes())
    }

    pub fn put_u64(&mut self, offset: u64, v: u64) -> Result<()> {
        self.put_bytes(offset, &v.to_le_bytes())
    }

    /// Copies `src` into the next free region of the body and records a
    /// descriptor tying it to `slot`. `None` records the null sentinel and
    /// copies nothing. Must be mirrored one-to-one by
    /// [`Self::finalize_field`] in the same order.
    pub fn embed(&mut self, slot: FieldSlot, src: Option<&[u8]>) -> Result<()> {
        self.check_slot(slot)?;
        let data_offset = match src {
            None => 0,
            Some(bytes) => self.embed_raw(bytes)?,
        };
        self.pending.push(Pending {
            slot: slot.0,
            data_offset,
            finalized: false,
        });
        Ok(())
    }

    /// Copies bytes at the bump cursor without tying them to a slot yet.
    fn embed_raw(&mut self, bytes: &[u8]) -> Result<u64> {
        let len = bytes.len() as u64;
        let end = self
            .cursor
            .checked_add(len)
            .ok_or(PacketError::EmbedOverflow {
                requested: len,
                available: 0,
            })?;
        if end > self.body_len() {
            return Err(PacketError::EmbedOverflow {
                requested: len,
                available: self.body_len() - self.cursor,
            });
        }
        let at = self.cursor;
        let at_usize = at as usize;
        self.body_mut()[at_usize..at_usize + bytes.len()].copy_from_slice(bytes);
        self.cursor = end;
        Ok(at)
    }

    /// Embeds a linked chain of extension structs depth-first, parent before
    /// children. Inner `next` links are finalized here (deepest first);
    /// `slot` itself is left pending for the caller's mirrored
    /// [`Self::finalize_field`].
    pub fn embed_chain(&mut self, slot: FieldSlot, nodes: &[ChainNode]) -> Result<()> {
        if nodes.is_empty() {
            return self.embed(slot, None);
        }
        self.check_slot(slot)?;

        let mut offsets = Vec::with_capacity(nodes.len());
        for node in nodes {
            let mut buf = vec![0u8; node.wire_len() as usize];
            buf[0..4].copy_from_slice(&node.tag.to_le_bytes());
            buf[4..8].copy_from_slice(&(node.payload.len() as u32).to_le_bytes());
            // next link is written during finalize below
            buf[CHAIN_NODE_HEADER_SIZE as usize..].copy_from_slice(&node.payload);
            offsets.push(self.embed_raw(&buf)?);
        }

        // Record the pending descriptors: the caller's slot points at the
        // head, each node's `next` slot points at its successor.
        self.pending.push(Pending {
            slot: slot.0,
            data_offset: offsets[0],
            finalized: false,
        });
        for i in 1..offsets.len() {
            self.pending.push(Pending {
                slot: offsets[i - 1] + 8,
                data_offset: offsets[i],
                finalized: false,
            });
        }
        // Fix each link before its parent.
        for i in (1..offsets.len()).rev() {
            self.finalize_field(FieldSlot(offsets[i - 1] + 8))?;
        }
        Ok(())
    }

    /// Converts the pending descriptor for `slot` into a self-relative offset
    /// stored in the slot. Exactly one finalize per embed; anything else is a
    /// caller protocol violation reported as an error (the packet may already
    /// be on its way out, so there is no recovery beyond dropping it).
    pub fn finalize_field(&mut self, slot: FieldSlot) -> Result<()> {
        let idx = match self
            .pending
            .iter()
            .position(|p| p.slot == slot.0 && !p.finalized)
        {
            Some(idx) => idx,
            None => {
                if self.pending.iter().any(|p| p.slot == slot.0) {
                    return Err(PacketError::AlreadyFinalized(slot.0));
                }
                return Err(PacketError::NotEmbedded(slot.0));
            }
        };
        let offset = self.pending[idx].data_offset;
        self.pending[idx].finalized = true;
        let at = slot.0 as usize;
        self.body_mut()[at..at + 8].copy_from_slice(&offset.to_le_bytes());
        Ok(())
    }

    fn check_slot(&self, slot: FieldSlot) -> Result<()> {
        if slot.0 + 8 > self.body_len() {
            return Err(PacketError::SlotOutOfBounds(slot.0));
        }
        Ok(())
    }

    /// Seals the packet. Fails if any embedded field was never finalized; the
    /// resulting bytes would otherwise leak a dangling descriptor.
    pub fn finish(self, times: PacketTimes) -> Result<Packet> {
        let unfinalized = self.pending.iter().filter(|p| !p.finalized).count();
        if unfinalized > 0 {
            return Err(PacketError::Unfinalized(unfinalized));
        }
        let mut bytes = self.bytes;
        let header = PacketHeader {
            size: bytes.len() as u64,
            sequence: 0,
            packet_type: self.packet_type,
            tags: PacketTags::empty(),
            thread_id: self.thread_id,
            times,
            next_data_offset: self.cursor,
        };
        header.encode_into(&mut bytes);
        Ok(Packet::from_raw_unchecked(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_fit_embed_succeeds_oversized_rejected() {
        // Buffer sized for exactly 10 extra bytes.
        let mut b = PacketBuilder::new(PacketTypeId(20), 1, 8, 10).unwrap();
        b.embed(FieldSlot(0), Some(&[7u8; 10])).unwrap();
        b.finalize_field(FieldSlot(0)).unwrap();
        let pkt = b.finish(PacketTimes::default()).unwrap();
        assert_eq!(pkt.header().next_data_offset, 18);

        let mut b = PacketBuilder::new(PacketTypeId(20), 1, 8, 10).unwrap();
        let err = b.embed(FieldSlot(0), Some(&[7u8; 11])).unwrap_err();
        assert!(matches!(
            err,
            PacketError::EmbedOverflow {
                requested: 11,
                available: 10
            }
        ));
        // The failed embed must not have advanced the cursor.
        b.embed(FieldSlot(0), Some(&[7u8; 10])).unwrap();
        b.finalize_field(FieldSlot(0)).unwrap();
        b.finish(PacketTimes::default()).unwrap();
    }

    #[test]
    fn finalize_without_embed_is_rejected() {
        let mut b = PacketBuilder::new(PacketTypeId(20), 1, 16, 0).unwrap();
        assert!(matches!(
            b.finalize_field(FieldSlot(0)),
            Err(PacketError::NotEmbedded(0))
        ));
    }

    #[test]
    fn double_finalize_is_rejected() {
        let mut b = PacketBuilder::new(PacketTypeId(20), 1, 8, 4).unwrap();
        b.embed(FieldSlot(0), Some(&[1, 2, 3, 4])).unwrap();
        b.finalize_field(FieldSlot(0)).unwrap();
        assert!(matches!(
            b.finalize_field(FieldSlot(0)),
            Err(PacketError::AlreadyFinalized(0))
        ));
    }

    #[test]
    fn unfinalized_embed_fails_finish() {
        let mut b = PacketBuilder::new(PacketTypeId(20), 1, 8, 4).unwrap();
        b.embed(FieldSlot(0), Some(&[1, 2, 3, 4])).unwrap();
        assert!(matches!(
            b.finish(PacketTimes::default()),
            Err(PacketError::Unfinalized(1))
        ));
    }

    #[test]
    fn null_embed_records_sentinel() {
        let mut b = PacketBuilder::new(PacketTypeId(20), 1, 8, 0).unwrap();
        b.embed(FieldSlot(0), None).unwrap();
        b.finalize_field(FieldSlot(0)).unwrap();
        let pkt = b.finish(PacketTimes::default()).unwrap();
        assert_eq!(&pkt.body()[0..8], &0u64.to_le_bytes());
    }
}
