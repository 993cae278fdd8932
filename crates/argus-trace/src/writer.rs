//! Per-channel trace file writer.
//!
//! The file is append-only while packets flow; `finish` appends the two
//! trailing packets and then rewrites exactly three header fields in place
//! (`compression`, `decompressed_size`, `portability_table_valid`). One
//! writer owns one file for the channel's whole lifetime.

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom, Write};

use argus_packet::{now_ns, Packet, PacketTags, PacketTimes, PacketTypeId};
use tracing::{debug, warn};

use crate::compress::compress_body;
use crate::error::{Result, TraceError};
use crate::format::{
    expected_channel_header_size, Compression, FileHeader, GpuInfo,
    DEFAULT_COMPRESSION_THRESHOLD, HDR_OFF_COMPRESSION, HDR_OFF_DECOMPRESSED_SIZE,
    HDR_OFF_PORTABILITY_VALID,
};
use crate::io::WriteLeExt;
use crate::meta::TraceMetadata;
use crate::portability::{encode_table, PortabilitySet};

#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub compression: Compression,
    /// Bodies at or below this length are stored uncompressed.
    pub compression_threshold: u64,
    pub portability: PortabilitySet,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            portability: PortabilitySet::default(),
        }
    }
}

/// Checks the handshake-declared channel header size. A mismatch means the
/// producer and recorder disagree about the wire layout, which is fatal for
/// the channel.
pub fn validate_declared_size(declared: u64, gpu_count: u64) -> Result<()> {
    let expected = expected_channel_header_size(gpu_count);
    if declared != expected {
        return Err(TraceError::DeclaredSizeMismatch { declared, expected });
    }
    Ok(())
}

pub struct TraceWriter<W: Write + Seek> {
    w: W,
    options: WriterOptions,
    /// Absolute file offset of the next byte to be written.
    offset: u64,
    portability_offsets: Vec<u64>,
    injected_sequences: Vec<u64>,
    device_features: BTreeMap<String, Vec<String>>,
    decompressed_size: u64,
    compression_used: bool,
    trailers_written: bool,
}

impl<W: Write + Seek> TraceWriter<W> {
    /// Writes the channel header (size word, file header, gpu infos) and
    /// leaves the writer positioned for the first packet.
    pub fn create(
        mut w: W,
        header: &FileHeader,
        gpus: &[GpuInfo],
        options: WriterOptions,
    ) -> Result<Self> {
        if header.gpu_count != gpus.len() as u64 {
            return Err(TraceError::Corrupt("gpu_count does not match gpu infos"));
        }
        let size = expected_channel_header_size(header.gpu_count);
        w.write_u64_le(size)?;
        header.encode(&mut w)?;
        for gpu in gpus {
            gpu.encode(&mut w)?;
        }
        Ok(Self {
            w,
            options,
            offset: size,
            portability_offsets: Vec::new(),
            injected_sequences: Vec::new(),
            device_features: BTreeMap::new(),
            decompressed_size: 0,
            compression_used: false,
            trailers_written: false,
        })
    }

    /// Appends one packet, compressing the body when the configured codec
    /// shrinks it past the threshold. A failed write loses that packet only.
    pub fn write_packet(&mut self, mut packet: Packet) -> Result<()> {
        let header = packet.header();
        let pre_size = header.size;

        if self.options.compression != Compression::None
            && !header.tags.contains(PacketTags::COMPRESSED)
            && header.body_len() > self.options.compression_threshold
        {
            if let Some(body) = compress_body(self.options.compression, packet.body()) {
                packet.replace_body(body);
                packet.add_tags(PacketTags::COMPRESSED);
                self.compression_used = true;
            }
        }

        if let Err(e) = self.w.write_all(packet.as_bytes()) {
            warn!(
                sequence = header.sequence,
                packet_type = %header.packet_type,
                error = %e,
                "short write, dropping packet"
            );
            // Rewind so the file stays a valid packet sequence.
            self.w.seek(SeekFrom::Start(self.offset))?;
            return Ok(());
        }

        if self.options.portability.contains(header.packet_type) {
            self.portability_offsets.push(self.offset);
        }
        if header.tags.contains(PacketTags::INJECTED) {
            self.injected_sequences.push(header.sequence);
        }
        self.decompressed_size += pre_size;
        self.offset += packet.header().size;
        Ok(())
    }

    /// Records feature names from a capability-bearing create call for the
    /// metadata document.
    pub fn set_device_features(&mut self, device_handle: u64, features: Vec<String>) {
        self.device_features
            .insert(TraceMetadata::device_key(device_handle), features);
    }

    /// Appends the portability and metadata trailers, then patches the three
    /// deferred header fields. Safe to call again after a success: the
    /// trailers are not duplicated and re-patching writes the same values.
    pub fn finish(&mut self, clean: bool) -> Result<()> {
        if !clean {
            warn!("finalizing trace after unclean channel end");
        }
        if !self.trailers_written {
            let times = PacketTimes {
                enqueue_ns: now_ns(),
                ..PacketTimes::default()
            };
            let table = Packet::with_body(
                PacketTypeId::PORTABILITY_TABLE,
                0,
                times,
                &encode_table(&self.portability_offsets),
            );
            self.w.write_all(table.as_bytes())?;
            self.offset += table.header().size;

            let meta = TraceMetadata {
                injected_calls: std::mem::take(&mut self.injected_sequences),
                device_features: if self.device_features.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut self.device_features))
                },
            };
            let meta_pkt =
                Packet::with_body(PacketTypeId::META_DATA, 0, times, &meta.to_json()?);
            self.w.write_all(meta_pkt.as_bytes())?;
            self.offset += meta_pkt.header().size;
            self.trailers_written = true;
        }

        let codec = if self.compression_used {
            self.options.compression
        } else {
            Compression::None
        };
        self.patch_u8(HDR_OFF_COMPRESSION, codec as u8)?;
        self.patch_u64(HDR_OFF_DECOMPRESSED_SIZE, self.decompressed_size)?;
        self.patch_u64(HDR_OFF_PORTABILITY_VALID, 1)?;
        self.w.seek(SeekFrom::Start(self.offset))?;
        self.w.flush()?;
        debug!(
            decompressed_size = self.decompressed_size,
            codec = %codec,
            portability_entries = self.portability_offsets.len(),
            "trace finalized"
        );
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.w
    }

    // Header field offsets are relative to the 64-byte header, which sits
    // after the leading size word.
    fn patch_u8(&mut self, header_off: u64, v: u8) -> Result<()> {
        self.w.seek(SeekFrom::Start(8 + header_off))?;
        self.w.write_u8(v)
    }

    fn patch_u64(&mut self, header_off: u64, v: u64) -> Result<()> {
        self.w.seek(SeekFrom::Start(8 + header_off))?;
        self.w.write_u64_le(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portability::call_ids;
    use crate::reader::TraceFile;
    use std::io::Cursor;

    fn write_simple(options: WriterOptions, bodies: &[(PacketTypeId, Vec<u8>)]) -> Vec<u8> {
        let header = FileHeader::for_capture(1);
        let gpus = [GpuInfo {
            vendor_id: 0x10de,
            device_id: 0x2204,
            driver_version: 1,
        }];
        let mut writer =
            TraceWriter::create(Cursor::new(Vec::new()), &header, &gpus, options).unwrap();
        for (i, (ty, body)) in bodies.iter().enumerate() {
            let mut pkt = Packet::with_body(*ty, 1, PacketTimes::default(), body);
            pkt.set_sequence(i as u64);
            writer.write_packet(pkt).unwrap();
        }
        writer.finish(true).unwrap();
        writer.into_inner().into_inner()
    }

    #[test]
    fn finish_is_idempotent_on_bytes() {
        let header = FileHeader::for_capture(0);
        let mut writer = TraceWriter::create(
            Cursor::new(Vec::new()),
            &header,
            &[],
            WriterOptions::default(),
        )
        .unwrap();
        writer
            .write_packet(Packet::with_body(
                call_ids::ALLOCATE_MEMORY,
                1,
                PacketTimes::default(),
                &[7u8; 32],
            ))
            .unwrap();
        writer.finish(true).unwrap();
        let first = writer.w.get_ref().clone();
        writer.finish(true).unwrap();
        assert_eq!(writer.w.get_ref(), &first);
    }

    #[test]
    fn codec_patched_to_none_when_never_used() {
        let options = WriterOptions {
            compression: Compression::Lz4,
            compression_threshold: 1024,
            portability: PortabilitySet::default(),
        };
        // Every body is below the threshold.
        let bytes = write_simple(options, &[(call_ids::PRESENT, vec![0u8; 16])]);
        let file = TraceFile::read(Cursor::new(bytes)).unwrap();
        assert_eq!(file.header.compression, Compression::None);
    }

    #[test]
    fn portability_offsets_point_at_allow_listed_packets() {
        let bytes = write_simple(
            WriterOptions {
                compression: Compression::None,
                ..WriterOptions::default()
            },
            &[
                (call_ids::PRESENT, vec![1u8; 8]),
                (call_ids::ALLOCATE_MEMORY, vec![2u8; 8]),
                (call_ids::BIND_BUFFER_MEMORY, vec![3u8; 8]),
            ],
        );
        let file = TraceFile::read(Cursor::new(bytes.clone())).unwrap();
        let offsets = file.portability.unwrap();
        assert_eq!(offsets.len(), 2);
        for off in offsets {
            // Each offset lands on a packet boundary inside the file.
            let at = off as usize;
            let size = u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap());
            assert!(at as u64 + size <= bytes.len() as u64);
        }
    }

    #[test]
    fn declared_size_mismatch_is_fatal() {
        assert!(validate_declared_size(expected_channel_header_size(2), 2).is_ok());
        assert!(matches!(
            validate_declared_size(100, 2),
            Err(TraceError::DeclaredSizeMismatch { .. })
        ));
    }
}
