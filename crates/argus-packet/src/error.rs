use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PacketError>;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("truncated packet: expected {expected} bytes, got {got}")]
    Truncated { expected: u64, got: u64 },

    #[error("packet size {0} exceeds the defensive maximum")]
    Oversized(u64),

    #[error("packet size {0} is smaller than the packet header")]
    Undersized(u64),

    #[error("embed of {requested} bytes overflows the {available} bytes reserved for extra data")]
    EmbedOverflow { requested: u64, available: u64 },

    #[error("field slot {0} lies outside the packet body")]
    SlotOutOfBounds(u64),

    #[error("write of {len} bytes at offset {offset} overruns the fixed region ({fixed_len} bytes)")]
    FixedRegionOverrun { offset: u64, len: u64, fixed_len: u64 },

    #[error("finalize for slot {0} without a matching embed")]
    NotEmbedded(u64),

    #[error("slot {0} was already finalized")]
    AlreadyFinalized(u64),

    #[error("{0} embedded field(s) left unfinalized")]
    Unfinalized(usize),

    #[error("embedded offset {offset} (+{len}) points outside the packet body")]
    BadEmbeddedOffset { offset: u64, len: u64 },

    #[error("invalid message body: {0}")]
    BadMessage(&'static str),
}
