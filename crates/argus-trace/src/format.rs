//! On-disk container format: file header and gpu-info records.

use std::io::{Read, Write};
use std::str::FromStr;

use crate::error::{Result, TraceError};
use crate::io::{ReadLeExt, WriteLeExt};

pub const TRACE_MAGIC: [u8; 8] = *b"ARGTRACE";
pub const TRACE_VERSION: u32 = 1;
pub const TRACE_ENDIANNESS_LITTLE: u8 = 1;

/// Fixed header length, excluding the leading `u64` size word.
pub const FILE_HEADER_SIZE: u64 = 64;
pub const GPU_INFO_SIZE: u64 = 16;

/// Default body-length threshold below which packets are stored uncompressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: u64 = 1024;

/// Packet-body compression codec, selected once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    #[default]
    Lz4 = 1,
    Snappy = 2,
}

impl Compression {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Snappy),
            other => Err(TraceError::UnknownCompression(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
            Compression::Snappy => "snappy",
        }
    }
}

impl FromStr for Compression {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "snappy" => Ok(Compression::Snappy),
            _ => Err(TraceError::Corrupt("unknown compression codec name")),
        }
    }
}

impl core::fmt::Display for Compression {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// Feature bits recorded in the file header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TraceFlags: u32 {
        /// The file holds a trimmed range, opened by an injected baseline.
        const TRIMMED = 1 << 0;
    }
}

/// Decoded 64-byte trace file header.
///
/// Three fields are rewritten in place when the file is finalized:
/// `compression`, `decompressed_size` and `portability_table_valid`. The
/// remainder is append-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub flags: TraceFlags,
    pub ptr_size: u8,
    pub arch: u8,
    pub os: u8,
    pub compression: Compression,
    /// Sum of pre-compression packet sizes, patched at finish.
    pub decompressed_size: u64,
    /// 0 until the trailing portability table has been appended.
    pub portability_table_valid: u64,
    pub gpu_count: u64,
    /// Absolute file offset of the first packet.
    pub first_packet_offset: u64,
}

// Field offsets within the 64-byte header (excluding the size word).
pub(crate) const HDR_OFF_COMPRESSION: u64 = 20;
pub(crate) const HDR_OFF_DECOMPRESSED_SIZE: u64 = 24;
pub(crate) const HDR_OFF_PORTABILITY_VALID: u64 = 32;

impl FileHeader {
    /// Header for a fresh capture on the current host.
    pub fn for_capture(gpu_count: u64) -> Self {
        Self {
            version: TRACE_VERSION,
            flags: TraceFlags::empty(),
            ptr_size: (usize::BITS / 8) as u8,
            arch: current_arch(),
            os: current_os(),
            compression: Compression::None,
            decompressed_size: 0,
            portability_table_valid: 0,
            gpu_count,
            first_packet_offset: 8 + FILE_HEADER_SIZE + gpu_count * GPU_INFO_SIZE,
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_bytes(&TRACE_MAGIC)?;
        w.write_u32_le(self.version)?;
        w.write_u32_le(self.flags.bits())?;
        w.write_u8(TRACE_ENDIANNESS_LITTLE)?;
        w.write_u8(self.ptr_size)?;
        w.write_u8(self.arch)?;
        w.write_u8(self.os)?;
        w.write_u8(self.compression as u8)?;
        w.write_bytes(&[0u8; 3])?;
        w.write_u64_le(self.decompressed_size)?;
        w.write_u64_le(self.portability_table_valid)?;
        w.write_u64_le(self.gpu_count)?;
        w.write_u64_le(self.first_packet_offset)?;
        w.write_u64_le(0)?;
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if magic != TRACE_MAGIC {
            return Err(TraceError::InvalidMagic);
        }
        let version = r.read_u32_le()?;
        if version != TRACE_VERSION {
            return Err(TraceError::UnsupportedVersion(version));
        }
        let flags = TraceFlags::from_bits_truncate(r.read_u32_le()?);
        let endianness = r.read_u8()?;
        if endianness != TRACE_ENDIANNESS_LITTLE {
            return Err(TraceError::InvalidEndianness(endianness));
        }
        let ptr_size = r.read_u8()?;
        let arch = r.read_u8()?;
        let os = r.read_u8()?;
        let compression = Compression::from_u8(r.read_u8()?)?;
        let mut reserved = [0u8; 3];
        r.read_exact(&mut reserved)?;
        let decompressed_size = r.read_u64_le()?;
        let portability_table_valid = r.read_u64_le()?;
        let gpu_count = r.read_u64_le()?;
        let first_packet_offset = r.read_u64_le()?;
        let _reserved2 = r.read_u64_le()?;
        Ok(Self {
            version,
            flags,
            ptr_size,
            arch,
            os,
            compression,
            decompressed_size,
            portability_table_valid,
            gpu_count,
            first_packet_offset,
        })
    }
}

/// One physical device visible to the traced process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuInfo {
    pub vendor_id: u32,
    pub device_id: u32,
    pub driver_version: u64,
}

impl GpuInfo {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32_le(self.vendor_id)?;
        w.write_u32_le(self.device_id)?;
        w.write_u64_le(self.driver_version)?;
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            vendor_id: r.read_u32_le()?,
            device_id: r.read_u32_le()?,
            driver_version: r.read_u64_le()?,
        })
    }
}

pub fn current_arch() -> u8 {
    match std::env::consts::ARCH {
        "x86" => 1,
        "x86_64" => 2,
        "arm" => 3,
        "aarch64" => 4,
        _ => 0,
    }
}

pub fn current_os() -> u8 {
    match std::env::consts::OS {
        "linux" => 1,
        "windows" => 2,
        "macos" => 3,
        "android" => 4,
        _ => 0,
    }
}

/// The byte count a channel handshake must declare:
/// `size word + file header + gpu infos`.
pub fn expected_channel_header_size(gpu_count: u64) -> u64 {
    8 + FILE_HEADER_SIZE + gpu_count * GPU_INFO_SIZE
}
