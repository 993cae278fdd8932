use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("packet error: {0}")]
    Packet(#[from] argus_packet::PacketError),

    #[error("trace error: {0}")]
    Trace(#[from] argus_trace::TraceError),

    #[error("invalid {var}: {reason}")]
    InvalidOption { var: &'static str, reason: String },

    #[error("object {0:#x} is not in the live table")]
    UnknownObject(u64),
}
