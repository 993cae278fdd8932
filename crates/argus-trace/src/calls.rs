//! Bodies of the call packets the container itself understands.
//!
//! Only the device-create call is interpreted: its feature names feed the
//! metadata trailer. Everything else is opaque payload.

use argus_packet::{FieldSlot, PacketBuilder, PacketTimes, PacketView};

use crate::error::{Result, TraceError};
use crate::portability::call_ids;

/// Decoded `CREATE_DEVICE` body.
///
/// Fixed region (24 bytes): `[handle u64][blob_len u32][reserved u32]
/// [blob slot u64]`; the blob is the newline-joined feature names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCreateInfo {
    pub handle: u64,
    pub features: Vec<String>,
}

const FIXED_LEN: u64 = 24;
const BLOB_SLOT: FieldSlot = FieldSlot(16);

impl DeviceCreateInfo {
    pub fn to_packet(
        &self,
        thread_id: u32,
        times: PacketTimes,
    ) -> Result<argus_packet::Packet> {
        let blob = self.features.join("\n");
        let mut b = PacketBuilder::new(
            call_ids::CREATE_DEVICE,
            thread_id,
            FIXED_LEN,
            blob.len() as u64,
        )?;
        b.put_u64(0, self.handle)?;
        b.put_u32(8, blob.len() as u32)?;
        let src = if blob.is_empty() {
            None
        } else {
            Some(blob.as_bytes())
        };
        b.embed(BLOB_SLOT, src)?;
        b.finalize_field(BLOB_SLOT)?;
        Ok(b.finish(times)?)
    }

    pub fn parse(view: &PacketView<'_>) -> Result<Self> {
        if view.header().packet_type != call_ids::CREATE_DEVICE {
            return Err(TraceError::Corrupt("not a device-create packet"));
        }
        let handle = view.body_u64(0)?;
        let blob_len = u64::from(view.body_u32(8)?);
        let features = match view.embedded(BLOB_SLOT, blob_len)? {
            Some(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| TraceError::Corrupt("feature names are not UTF-8"))?;
                text.split('\n').map(str::to_owned).collect()
            }
            None => Vec::new(),
        };
        Ok(Self { handle, features })
    }
}
