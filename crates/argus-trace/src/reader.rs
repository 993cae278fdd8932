//! Trace file reading, for tools and tests.

use std::io::Read;

use argus_packet::{read_packet, Packet, PacketError, PacketTags, PacketTypeId};
use tracing::warn;

use crate::compress::decompress_body;
use crate::error::{Result, TraceError};
use crate::format::{expected_channel_header_size, FileHeader, GpuInfo};
use crate::io::ReadLeExt;
use crate::meta::TraceMetadata;
use crate::portability::decode_table;

/// Streaming reader: header and gpu infos up front, then one packet at a
/// time with transparent decompression.
pub struct TraceReader<R: Read> {
    r: R,
    header: FileHeader,
    gpus: Vec<GpuInfo>,
}

impl<R: Read> TraceReader<R> {
    pub fn open(mut r: R) -> Result<Self> {
        let declared = r.read_u64_le()?;
        let header = FileHeader::decode(&mut r)?;
        let expected = expected_channel_header_size(header.gpu_count);
        if declared != expected {
            return Err(TraceError::DeclaredSizeMismatch { declared, expected });
        }
        let mut gpus = Vec::with_capacity(header.gpu_count.min(1024) as usize);
        for _ in 0..header.gpu_count {
            gpus.push(GpuInfo::decode(&mut r)?);
        }
        Ok(Self { r, header, gpus })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn gpus(&self) -> &[GpuInfo] {
        &self.gpus
    }

    /// Next packet with its body decompressed, or `None` at a clean end.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        let Some(mut packet) = read_packet(&mut self.r)? else {
            return Ok(None);
        };
        if packet.header().tags.contains(PacketTags::COMPRESSED) {
            let body = decompress_body(self.header.compression, packet.body())?;
            packet.replace_body(body);
            packet.remove_tags(PacketTags::COMPRESSED);
        }
        Ok(Some(packet))
    }
}

/// A fully-loaded trace file with the trailers split out.
#[derive(Debug)]
pub struct TraceFile {
    pub header: FileHeader,
    pub gpus: Vec<GpuInfo>,
    /// Call and message packets, in stream order, trailers excluded.
    pub packets: Vec<Packet>,
    pub portability: Option<Vec<u64>>,
    pub metadata: Option<TraceMetadata>,
    /// The stream ended mid-packet; everything before the cut is kept.
    pub truncated: bool,
}

impl TraceFile {
    pub fn read<R: Read>(r: R) -> Result<Self> {
        let mut reader = TraceReader::open(r)?;
        let mut packets = Vec::new();
        let mut portability = None;
        let mut metadata = None;
        let mut truncated = false;
        loop {
            match reader.next_packet() {
                Ok(Some(pkt)) => match pkt.header().packet_type {
                    PacketTypeId::PORTABILITY_TABLE => {
                        portability = Some(decode_table(pkt.body())?)
                    }
                    PacketTypeId::META_DATA => {
                        metadata = Some(TraceMetadata::from_json(pkt.body())?)
                    }
                    _ => packets.push(pkt),
                },
                Ok(None) => break,
                Err(TraceError::Packet(PacketError::Truncated { .. })) => {
                    warn!(packets = packets.len(), "trace cut off mid-packet");
                    truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Self {
            header: reader.header,
            gpus: reader.gpus,
            packets,
            portability,
            metadata,
            truncated,
        })
    }
}
