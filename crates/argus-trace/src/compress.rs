//! Packet-body compression.
//!
//! A compressed body is `[u64 uncompressed_len][codec output]`; the header's
//! `COMPRESSED` tag marks it. The uncompressed length claim is validated
//! before any allocation, so a corrupt file cannot ask for an absurd buffer.

use argus_packet::{MAX_PACKET_BYTES, PACKET_HEADER_SIZE};

use crate::error::{Result, TraceError};
use crate::format::Compression;

const LEN_PREFIX: usize = 8;

const MAX_BODY_BYTES: u64 = MAX_PACKET_BYTES - PACKET_HEADER_SIZE;

/// Compresses a packet body. `None` if the codec did not shrink it (the
/// caller then keeps the original body and leaves the tag clear).
pub fn compress_body(codec: Compression, body: &[u8]) -> Option<Vec<u8>> {
    let compressed = match codec {
        Compression::None => return None,
        Compression::Lz4 => lz4_flex::block::compress(body),
        Compression::Snappy => snap::raw::Encoder::new().compress_vec(body).ok()?,
    };
    if LEN_PREFIX + compressed.len() >= body.len() {
        return None;
    }
    let mut out = Vec::with_capacity(LEN_PREFIX + compressed.len());
    out.extend_from_slice(&(body.len() as u64).to_le_bytes());
    out.extend_from_slice(&compressed);
    Some(out)
}

pub fn decompress_body(codec: Compression, body: &[u8]) -> Result<Vec<u8>> {
    if body.len() < LEN_PREFIX {
        return Err(TraceError::Corrupt("compressed body shorter than prefix"));
    }
    let uncompressed_len = u64::from_le_bytes(body[..LEN_PREFIX].try_into().unwrap());
    if uncompressed_len > MAX_BODY_BYTES {
        return Err(TraceError::Corrupt("uncompressed length claim too large"));
    }
    let compressed = &body[LEN_PREFIX..];
    let out = match codec {
        Compression::None => {
            return Err(TraceError::Corrupt(
                "compressed packet in a file declaring no codec",
            ))
        }
        Compression::Lz4 => lz4_flex::block::decompress(compressed, uncompressed_len as usize)?,
        Compression::Snappy => {
            let claimed = snap::raw::decompress_len(compressed)?;
            if claimed as u64 != uncompressed_len {
                return Err(TraceError::Corrupt("snappy length claim mismatch"));
            }
            snap::raw::Decoder::new().decompress_vec(compressed)?
        }
    };
    if out.len() as u64 != uncompressed_len {
        return Err(TraceError::Corrupt("uncompressed length mismatch"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> Vec<u8> {
        // Compressible content.
        let mut body = Vec::new();
        for i in 0..512u32 {
            body.extend_from_slice(&(i / 7).to_le_bytes());
        }
        body
    }

    #[test]
    fn lz4_roundtrip() {
        let body = sample_body();
        let compressed = compress_body(Compression::Lz4, &body).unwrap();
        assert!(compressed.len() < body.len());
        assert_eq!(decompress_body(Compression::Lz4, &compressed).unwrap(), body);
    }

    #[test]
    fn snappy_roundtrip() {
        let body = sample_body();
        let compressed = compress_body(Compression::Snappy, &body).unwrap();
        assert!(compressed.len() < body.len());
        assert_eq!(
            decompress_body(Compression::Snappy, &compressed).unwrap(),
            body
        );
    }

    #[test]
    fn incompressible_body_is_skipped() {
        // Too short to ever beat the 8-byte prefix.
        assert!(compress_body(Compression::Lz4, &[1, 2, 3]).is_none());
        assert!(compress_body(Compression::None, &sample_body()).is_none());
    }

    #[test]
    fn absurd_length_claim_rejected() {
        let mut bogus = Vec::new();
        bogus.extend_from_slice(&u64::MAX.to_le_bytes());
        bogus.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            decompress_body(Compression::Lz4, &bogus),
            Err(TraceError::Corrupt(_))
        ));
    }

    #[test]
    fn tampered_length_claim_rejected() {
        let body = sample_body();
        let mut compressed = compress_body(Compression::Snappy, &body).unwrap();
        compressed[0] ^= 1;
        assert!(decompress_body(Compression::Snappy, &compressed).is_err());
    }
}
