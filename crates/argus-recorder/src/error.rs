use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecorderError>;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("packet error: {0}")]
    Packet(#[from] argus_packet::PacketError),

    #[error("trace error: {0}")]
    Trace(#[from] argus_trace::TraceError),

    #[error("recorder pool exhausted ({limit} threads)")]
    PoolExhausted { limit: usize },

    #[error("recorder is shutting down")]
    ShuttingDown,
}
