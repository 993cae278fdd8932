use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TraceError>;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("out of memory allocating {len} bytes")]
    OutOfMemory { len: usize },

    #[error("invalid trace magic")]
    InvalidMagic,

    #[error("unsupported trace version {0}")]
    UnsupportedVersion(u32),

    #[error("invalid endianness tag {0}")]
    InvalidEndianness(u8),

    #[error("unknown compression codec id {0}")]
    UnknownCompression(u8),

    #[error("declared channel header size {declared} does not match {expected}")]
    DeclaredSizeMismatch { declared: u64, expected: u64 },

    #[error("corrupt trace: {0}")]
    Corrupt(&'static str),

    #[error("packet error: {0}")]
    Packet(#[from] argus_packet::PacketError),

    #[error("lz4 decompression failed: {0}")]
    Lz4Decompress(#[from] lz4_flex::block::DecompressError),

    #[error("snappy codec failed: {0}")]
    Snappy(#[from] snap::Error),

    #[error("metadata json invalid: {0}")]
    Json(#[from] serde_json::Error),
}
