use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;

use crate::error::{PacketError, Result};

/// Fixed packet header size in bytes. The body starts immediately after.
pub const PACKET_HEADER_SIZE: u64 = 56;

/// Defensive maximum for a single packet (header + body). Large resource
/// uploads are legitimate, so this is generous; anything beyond it indicates a
/// desynchronized stream rather than real data.
pub const MAX_PACKET_BYTES: u64 = 1 << 30;

/// Size of the per-node header used by [`crate::PacketBuilder::embed_chain`]:
/// `[tag u32][payload_len u32][next u64]`.
pub const CHAIN_NODE_HEADER_SIZE: u64 = 16;

/// Packet type tag: a small set of control types plus the per-call ids
/// assigned by the interception layer (starting at [`Self::FIRST_API_CALL`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketTypeId(pub u16);

impl PacketTypeId {
    /// Human-readable diagnostic carried in the stream (UTF-8 body).
    pub const MESSAGE: PacketTypeId = PacketTypeId(1);
    /// Graceful end-of-channel marker (empty body).
    pub const MARKER_TERMINATE: PacketTypeId = PacketTypeId(2);
    /// Trailing index of portability-relevant packet offsets.
    pub const PORTABILITY_TABLE: PacketTypeId = PacketTypeId(3);
    /// Trailing JSON metadata document.
    pub const META_DATA: PacketTypeId = PacketTypeId(4);
    /// File-header exchange during the transport handshake.
    pub const FILE_HEADER: PacketTypeId = PacketTypeId(5);

    /// First id available to API-call packets.
    pub const FIRST_API_CALL: PacketTypeId = PacketTypeId(16);

    pub fn is_control(self) -> bool {
        self.0 < Self::FIRST_API_CALL.0
    }

    pub fn name(self) -> Option<&'static str> {
        match self {
            PacketTypeId::MESSAGE => Some("MESSAGE"),
            PacketTypeId::MARKER_TERMINATE => Some("MARKER_TERMINATE"),
            PacketTypeId::PORTABILITY_TABLE => Some("PORTABILITY_TABLE"),
            PacketTypeId::META_DATA => Some("META_DATA"),
            PacketTypeId::FILE_HEADER => Some("FILE_HEADER"),
            _ => None,
        }
    }
}

impl core::fmt::Display for PacketTypeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(name) = self.name() {
            write!(f, "{name}({})", self.0)
        } else {
            write!(f, "PacketTypeId({})", self.0)
        }
    }
}

bitflags! {
    /// Per-packet tag bits carried in the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketTags: u16 {
        /// Synthesized by the capture layer rather than observed from the
        /// traced application (trim baseline packets).
        const INJECTED = 1 << 0;
        /// The body was rewritten as `[u64 uncompressed_len][compressed]`.
        const COMPRESSED = 1 << 1;
    }
}

/// Severity carried by [`PacketTypeId::MESSAGE`] packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
}

impl MessageLevel {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => MessageLevel::Error,
            1 => MessageLevel::Warning,
            2 => MessageLevel::Info,
            3 => MessageLevel::Debug,
            _ => return None,
        })
    }
}

/// The three wall-clock timestamps recorded per packet, nanoseconds since the
/// Unix epoch. `call_begin`/`call_end` bracket the underlying API call so
/// recorded traces preserve call latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketTimes {
    pub enqueue_ns: u64,
    pub call_begin_ns: u64,
    pub call_end_ns: u64,
}

/// Wall clock in nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Decoded packet header. The on-disk layout is little-endian, 56 bytes:
///
/// | off | field              |
/// |-----|--------------------|
/// | 0   | size (u64)         |
/// | 8   | sequence (u64)     |
/// | 16  | packet_type (u16)  |
/// | 18  | tags (u16)         |
/// | 20  | thread_id (u32)    |
/// | 24  | enqueue_time (u64) |
/// | 32  | call_begin (u64)   |
/// | 40  | call_end (u64)     |
/// | 48  | next_data (u64)    |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total on-disk bytes: `PACKET_HEADER_SIZE + body length`.
    pub size: u64,
    /// Global monotonically increasing sequence index.
    pub sequence: u64,
    pub packet_type: PacketTypeId,
    pub tags: PacketTags,
    pub thread_id: u32,
    pub times: PacketTimes,
    /// Bump cursor at finalize time: the first body offset with no embedded
    /// data behind it.
    pub next_data_offset: u64,
}

impl PacketHeader {
    pub fn body_len(&self) -> u64 {
        self.size - PACKET_HEADER_SIZE
    }

    pub(crate) fn encode_into(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= PACKET_HEADER_SIZE as usize);
        out[0..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..16].copy_from_slice(&self.sequence.to_le_bytes());
        out[16..18].copy_from_slice(&self.packet_type.0.to_le_bytes());
        out[18..20].copy_from_slice(&self.tags.bits().to_le_bytes());
        out[20..24].copy_from_slice(&self.thread_id.to_le_bytes());
        out[24..32].copy_from_slice(&self.times.enqueue_ns.to_le_bytes());
        out[32..40].copy_from_slice(&self.times.call_begin_ns.to_le_bytes());
        out[40..48].copy_from_slice(&self.times.call_end_ns.to_le_bytes());
        out[48..56].copy_from_slice(&self.next_data_offset.to_le_bytes());
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PACKET_HEADER_SIZE as usize {
            return Err(PacketError::Truncated {
                expected: PACKET_HEADER_SIZE,
                got: bytes.len() as u64,
            });
        }
        let u64_at = |off: usize| u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
        let size = u64_at(0);
        if size < PACKET_HEADER_SIZE {
            return Err(PacketError::Undersized(size));
        }
        if size > MAX_PACKET_BYTES {
            return Err(PacketError::Oversized(size));
        }
        Ok(Self {
            size,
            sequence: u64_at(8),
            packet_type: PacketTypeId(u16::from_le_bytes(bytes[16..18].try_into().unwrap())),
            tags: PacketTags::from_bits_truncate(u16::from_le_bytes(
                bytes[18..20].try_into().unwrap(),
            )),
            thread_id: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
            times: PacketTimes {
                enqueue_ns: u64_at(24),
                call_begin_ns: u64_at(32),
                call_end_ns: u64_at(40),
            },
            next_data_offset: u64_at(48),
        })
    }
}

/// A finalized packet: one contiguous allocation, immutable body.
///
/// Only header metadata (sequence, tags, timestamps) may still be rewritten,
/// which is how the capture layer assigns the global index at submit time and
/// how the recorder marks compressed bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

impl Packet {
    /// Wraps raw bytes, validating the header's length claim.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let header = PacketHeader::decode(&bytes)?;
        if header.size != bytes.len() as u64 {
            return Err(PacketError::Truncated {
                expected: header.size,
                got: bytes.len() as u64,
            });
        }
        Ok(Self { bytes })
    }

    /// Builds a bodyless control packet (e.g. the termination marker).
    pub fn control(packet_type: PacketTypeId, thread_id: u32, times: PacketTimes) -> Self {
        Self::with_body(packet_type, thread_id, times, &[])
    }

    /// Builds a packet from an already-serialized body. Used for the trailing
    /// portability/metadata structures whose bodies contain no pointer fields.
    pub fn with_body(
        packet_type: PacketTypeId,
        thread_id: u32,
        times: PacketTimes,
        body: &[u8],
    ) -> Self {
        let size = PACKET_HEADER_SIZE + body.len() as u64;
        let header = PacketHeader {
            size,
            sequence: 0,
            packet_type,
            tags: PacketTags::empty(),
            thread_id,
            times,
            next_data_offset: body.len() as u64,
        };
        let mut bytes = vec![0u8; size as usize];
        header.encode_into(&mut bytes);
        bytes[PACKET_HEADER_SIZE as usize..].copy_from_slice(body);
        Self { bytes }
    }

    pub(crate) fn from_raw_unchecked(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn header(&self) -> PacketHeader {
        PacketHeader::decode(&self.bytes).expect("packet invariant: valid header")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn body(&self) -> &[u8] {
        &self.bytes[PACKET_HEADER_SIZE as usize..]
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.bytes[8..16].copy_from_slice(&sequence.to_le_bytes());
    }

    pub fn set_times(&mut self, times: PacketTimes) {
        self.bytes[24..32].copy_from_slice(&times.enqueue_ns.to_le_bytes());
        self.bytes[32..40].copy_from_slice(&times.call_begin_ns.to_le_bytes());
        self.bytes[40..48].copy_from_slice(&times.call_end_ns.to_le_bytes());
    }

    pub fn add_tags(&mut self, tags: PacketTags) {
        let current = self.header().tags;
        let merged = (current | tags).bits();
        self.bytes[18..20].copy_from_slice(&merged.to_le_bytes());
    }

    pub fn remove_tags(&mut self, tags: PacketTags) {
        let current = self.header().tags;
        let remaining = (current - tags).bits();
        self.bytes[18..20].copy_from_slice(&remaining.to_le_bytes());
    }

    /// Replaces the body wholesale, fixing up the header's size field. Used by
    /// the recorder when compressing a packet in place.
    pub fn replace_body(&mut self, body: Vec<u8>) {
        self.bytes.truncate(PACKET_HEADER_SIZE as usize);
        self.bytes.extend_from_slice(&body);
        let size = self.bytes.len() as u64;
        self.bytes[0..8].copy_from_slice(&size.to_le_bytes());
    }
}
