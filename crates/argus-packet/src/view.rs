//! Interpretation of finalized packets.
//!
//! A view resolves the offsets stored in finalized fields against the
//! packet's own bytes; no producer-side address survives into this layer, so
//! views work on packets read back from a socket or a file.

use crate::builder::FieldSlot;
use crate::error::{PacketError, Result};
use crate::format::{
    MessageLevel, Packet, PacketHeader, CHAIN_NODE_HEADER_SIZE, PACKET_HEADER_SIZE,
};

#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    header: PacketHeader,
    bytes: &'a [u8],
}

impl<'a> PacketView<'a> {
    pub fn new(packet: &'a Packet) -> Self {
        Self {
            header: packet.header(),
            bytes: packet.as_bytes(),
        }
    }

    /// Interprets raw bytes (e.g. straight from a trace file) as a packet.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        let header = PacketHeader::decode(bytes)?;
        if header.size != bytes.len() as u64 {
            return Err(PacketError::Truncated {
                expected: header.size,
                got: bytes.len() as u64,
            });
        }
        Ok(Self { header, bytes })
    }

    pub fn header(&self) -> PacketHeader {
        self.header
    }

    pub fn body(&self) -> &'a [u8] {
        &self.bytes[PACKET_HEADER_SIZE as usize..]
    }

    pub fn body_u64(&self, offset: u64) -> Result<u64> {
        let body = self.body();
        let end = offset
            .checked_add(8)
            .ok_or(PacketError::SlotOutOfBounds(offset))?;
        if end > body.len() as u64 {
            return Err(PacketError::SlotOutOfBounds(offset));
        }
        Ok(u64::from_le_bytes(
            body[offset as usize..end as usize].try_into().unwrap(),
        ))
    }

    pub fn body_u32(&self, offset: u64) -> Result<u32> {
        let body = self.body();
        let end = offset
            .checked_add(4)
            .ok_or(PacketError::SlotOutOfBounds(offset))?;
        if end > body.len() as u64 {
            return Err(PacketError::SlotOutOfBounds(offset));
        }
        Ok(u32::from_le_bytes(
            body[offset as usize..end as usize].try_into().unwrap(),
        ))
    }

    /// Resolves a finalized field to the embedded bytes. The length is the
    /// caller's (it knows the field's element type and count); only the
    /// offset lives in the packet. `None` for the null sentinel.
    pub fn embedded(&self, slot: FieldSlot, len: u64) -> Result<Option<&'a [u8]>> {
        let offset = self.body_u64(slot.0)?;
        if offset == 0 {
            return Ok(None);
        }
        let body = self.body();
        let end = offset
            .checked_add(len)
            .ok_or(PacketError::BadEmbeddedOffset { offset, len })?;
        if end > body.len() as u64 {
            return Err(PacketError::BadEmbeddedOffset { offset, len });
        }
        Ok(Some(&body[offset as usize..end as usize]))
    }

    /// Walks an embedded extension chain starting at a finalized head slot.
    pub fn chain(&self, slot: FieldSlot) -> Result<Vec<ChainNodeView<'a>>> {
        let mut nodes = Vec::new();
        let mut offset = self.body_u64(slot.0)?;
        let body = self.body();
        while offset != 0 {
            let header_end =
                offset
                    .checked_add(CHAIN_NODE_HEADER_SIZE)
                    .ok_or(PacketError::BadEmbeddedOffset {
                        offset,
                        len: CHAIN_NODE_HEADER_SIZE,
                    })?;
            if header_end > body.len() as u64 {
                return Err(PacketError::BadEmbeddedOffset {
                    offset,
                    len: CHAIN_NODE_HEADER_SIZE,
                });
            }
            let at = offset as usize;
            let tag = u32::from_le_bytes(body[at..at + 4].try_into().unwrap());
            let payload_len = u32::from_le_bytes(body[at + 4..at + 8].try_into().unwrap()) as u64;
            let next = u64::from_le_bytes(body[at + 8..at + 16].try_into().unwrap());
            let payload_end =
                header_end
                    .checked_add(payload_len)
                    .ok_or(PacketError::BadEmbeddedOffset {
                        offset,
                        len: payload_len,
                    })?;
            if payload_end > body.len() as u64 {
                return Err(PacketError::BadEmbeddedOffset {
                    offset,
                    len: payload_len,
                });
            }
            nodes.push(ChainNodeView {
                tag,
                payload: &body[header_end as usize..payload_end as usize],
            });
            // A cycle would loop forever; offsets must strictly advance.
            if next != 0 && next <= offset {
                return Err(PacketError::BadEmbeddedOffset {
                    offset: next,
                    len: CHAIN_NODE_HEADER_SIZE,
                });
            }
            offset = next;
        }
        Ok(nodes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainNodeView<'a> {
    pub tag: u32,
    pub payload: &'a [u8],
}

/// Decoded [`crate::PacketTypeId::MESSAGE`] body.
///
/// Fixed region (16 bytes): `[level u32][text_len u32][text slot u64]`,
/// followed by the embedded UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView<'a> {
    pub level: MessageLevel,
    pub text: &'a str,
}

pub const MESSAGE_FIXED_LEN: u64 = 16;
pub const MESSAGE_TEXT_SLOT: FieldSlot = FieldSlot(8);

impl<'a> MessageView<'a> {
    pub fn parse(view: &PacketView<'a>) -> Result<Self> {
        let level = MessageLevel::from_u8(view.body_u32(0)? as u8)
            .ok_or(PacketError::BadMessage("unknown message level"))?;
        let text_len = view.body_u32(4)? as u64;
        let text = match view.embedded(MESSAGE_TEXT_SLOT, text_len)? {
            Some(bytes) => std::str::from_utf8(bytes)
                .map_err(|_| PacketError::BadMessage("message text is not UTF-8"))?,
            None => "",
        };
        Ok(Self { level, text })
    }
}

/// Builds a message packet (leveled diagnostic carried in the stream).
pub fn build_message(level: MessageLevel, thread_id: u32, text: &str) -> Result<Packet> {
    use crate::builder::PacketBuilder;
    use crate::format::{now_ns, PacketTimes, PacketTypeId};

    let mut b = PacketBuilder::new(
        PacketTypeId::MESSAGE,
        thread_id,
        MESSAGE_FIXED_LEN,
        text.len() as u64,
    )?;
    b.put_u32(0, level as u32)?;
    b.put_u32(4, text.len() as u32)?;
    let src = if text.is_empty() {
        None
    } else {
        Some(text.as_bytes())
    };
    b.embed(MESSAGE_TEXT_SLOT, src)?;
    b.finalize_field(MESSAGE_TEXT_SLOT)?;
    let now = now_ns();
    b.finish(PacketTimes {
        enqueue_ns: now,
        call_begin_ns: now,
        call_end_ns: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ChainNode, PacketBuilder};
    use crate::format::{PacketTimes, PacketTypeId};

    #[test]
    fn message_roundtrip() {
        let pkt = build_message(MessageLevel::Warning, 3, "watch out").unwrap();
        let view = PacketView::new(&pkt);
        let msg = MessageView::parse(&view).unwrap();
        assert_eq!(msg.level, MessageLevel::Warning);
        assert_eq!(msg.text, "watch out");
    }

    #[test]
    fn chain_walk_preserves_order_and_payloads() {
        let nodes = vec![
            ChainNode {
                tag: 0x10,
                payload: vec![1, 2, 3],
            },
            ChainNode {
                tag: 0x20,
                payload: vec![],
            },
            ChainNode {
                tag: 0x30,
                payload: vec![9; 16],
            },
        ];
        let extra: u64 = nodes.iter().map(ChainNode::wire_len).sum();
        let mut b = PacketBuilder::new(PacketTypeId(21), 1, 8, extra).unwrap();
        b.embed_chain(FieldSlot(0), &nodes).unwrap();
        b.finalize_field(FieldSlot(0)).unwrap();
        let pkt = b.finish(PacketTimes::default()).unwrap();

        let view = PacketView::new(&pkt);
        let walked = view.chain(FieldSlot(0)).unwrap();
        assert_eq!(walked.len(), 3);
        assert_eq!(walked[0].tag, 0x10);
        assert_eq!(walked[0].payload, &[1, 2, 3]);
        assert_eq!(walked[1].tag, 0x20);
        assert!(walked[1].payload.is_empty());
        assert_eq!(walked[2].tag, 0x30);
        assert_eq!(walked[2].payload, &[9; 16]);
    }

    #[test]
    fn embedded_length_is_bounds_checked() {
        let mut b = PacketBuilder::new(PacketTypeId(22), 1, 8, 4).unwrap();
        b.embed(FieldSlot(0), Some(&[1, 2, 3, 4])).unwrap();
        b.finalize_field(FieldSlot(0)).unwrap();
        let pkt = b.finish(PacketTimes::default()).unwrap();
        let view = PacketView::new(&pkt);
        assert!(view.embedded(FieldSlot(0), 4).unwrap().is_some());
        assert!(view.embedded(FieldSlot(0), 5).is_err());
    }
}
