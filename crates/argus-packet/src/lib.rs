//! Self-contained capture packets.
//!
//! A packet is one serialized record of an intercepted API call (or a control
//! event) in a single contiguous allocation: a fixed header followed by a
//! variable-length body. Pointer-valued fields in the body are replaced by
//! offsets relative to the body's own base, so a finalized packet is valid in
//! any address space; see `docs/trace-format.md` for the on-disk layout.

mod builder;
mod error;
mod format;
mod stream;
mod view;

pub use builder::{ChainNode, FieldSlot, PacketBuilder};
pub use error::{PacketError, Result};
pub use format::{
    now_ns, MessageLevel, Packet, PacketHeader, PacketTags, PacketTimes, PacketTypeId,
    CHAIN_NODE_HEADER_SIZE, MAX_PACKET_BYTES, PACKET_HEADER_SIZE,
};
pub use stream::{read_packet, write_packet};
pub use view::{build_message, ChainNodeView, MessageView, PacketView, MESSAGE_TEXT_SLOT};
