//! Trace file container.
//!
//! A trace file is a channel header (size word, 64-byte file header, gpu-info
//! array) followed by the packet stream and two trailing packets: the
//! portability table and a JSON metadata document. The file is append-only
//! apart from three header fields patched when the channel ends, so a capture
//! that dies mid-stream still leaves an openable file.

mod calls;
mod compress;
mod error;
mod format;
mod io;
mod meta;
mod portability;
mod reader;
mod writer;

pub use crate::calls::DeviceCreateInfo;
pub use crate::compress::{compress_body, decompress_body};
pub use crate::error::{Result, TraceError};
pub use crate::format::{
    current_arch, current_os, expected_channel_header_size, Compression, FileHeader, GpuInfo,
    TraceFlags, DEFAULT_COMPRESSION_THRESHOLD, FILE_HEADER_SIZE, GPU_INFO_SIZE, TRACE_MAGIC,
    TRACE_VERSION,
};
pub use crate::meta::TraceMetadata;
pub use crate::portability::{call_ids, decode_table, encode_table, PortabilitySet};
pub use crate::reader::{TraceFile, TraceReader};
pub use crate::writer::{validate_declared_size, TraceWriter, WriterOptions};
