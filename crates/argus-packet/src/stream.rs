//! Blocking packet framing over any `Read`/`Write`.
//!
//! Packets are self-delimiting: the first 8 bytes of the header are the total
//! on-wire size, so the reader never needs out-of-band framing. A clean EOF
//! before the first size byte is `Ok(None)`; an EOF anywhere else is a
//! truncation error.

use std::io::{self, Read, Write};

use crate::error::{PacketError, Result};
use crate::format::{Packet, PacketHeader, MAX_PACKET_BYTES, PACKET_HEADER_SIZE};

pub fn write_packet<W: Write>(w: &mut W, packet: &Packet) -> Result<()> {
    w.write_all(packet.as_bytes())?;
    Ok(())
}

/// Reads the next packet, or `None` on a clean end of stream.
pub fn read_packet<R: Read>(r: &mut R) -> Result<Option<Packet>> {
    let mut size_bytes = [0u8; 8];
    // Distinguish "no more packets" from "cut off mid-packet": only a zero
    // read on the first byte counts as a clean end.
    match r.read(&mut size_bytes)? {
        0 => return Ok(None),
        n => r
            .read_exact(&mut size_bytes[n..])
            .map_err(|e| truncated(e, 8))?,
    }
    let size = u64::from_le_bytes(size_bytes);
    if size < PACKET_HEADER_SIZE {
        return Err(PacketError::Undersized(size));
    }
    if size > MAX_PACKET_BYTES {
        return Err(PacketError::Oversized(size));
    }
    let mut bytes = vec![0u8; size as usize];
    bytes[0..8].copy_from_slice(&size_bytes);
    r.read_exact(&mut bytes[8..])
        .map_err(|e| truncated(e, size))?;
    // Revalidates the rest of the header, not just the size word.
    let _ = PacketHeader::decode(&bytes)?;
    Ok(Some(Packet::from_raw_unchecked(bytes)))
}

fn truncated(e: io::Error, expected: u64) -> PacketError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        PacketError::Truncated { expected, got: 0 }
    } else {
        PacketError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{PacketTimes, PacketTypeId};

    #[test]
    fn roundtrip_two_packets_then_clean_eof() {
        let a = Packet::with_body(PacketTypeId(17), 1, PacketTimes::default(), b"aaaa");
        let b = Packet::control(PacketTypeId::MARKER_TERMINATE, 1, PacketTimes::default());
        let mut buf = Vec::new();
        write_packet(&mut buf, &a).unwrap();
        write_packet(&mut buf, &b).unwrap();

        let mut cursor = &buf[..];
        assert_eq!(read_packet(&mut cursor).unwrap().unwrap(), a);
        assert_eq!(read_packet(&mut cursor).unwrap().unwrap(), b);
        assert!(read_packet(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn truncated_mid_packet_is_an_error() {
        let a = Packet::with_body(PacketTypeId(17), 1, PacketTimes::default(), b"payload");
        let mut buf = Vec::new();
        write_packet(&mut buf, &a).unwrap();
        buf.truncate(buf.len() - 3);

        let mut cursor = &buf[..];
        assert!(matches!(
            read_packet(&mut cursor),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn absurd_size_word_rejected_without_allocation() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf.extend_from_slice(&[0u8; 64]);
        let mut cursor = &buf[..];
        assert!(matches!(
            read_packet(&mut cursor),
            Err(PacketError::Oversized(_))
        ));
    }
}
