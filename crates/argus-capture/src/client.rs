//! Socket transport to the recorder.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};

use argus_packet::{now_ns, write_packet, Packet, PacketTimes, PacketTypeId};
use argus_trace::{expected_channel_header_size, FileHeader, GpuInfo};
use tracing::info;

use crate::error::Result;
use crate::state::PacketSink;

/// One capture channel to the recorder. The handshake pushes the channel
/// header; no acknowledgement comes back. Every packet after that is framed
/// by its own size word.
pub struct RecorderClient {
    stream: TcpStream,
}

impl RecorderClient {
    /// Connects and performs the handshake.
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        header: &FileHeader,
        gpus: &[GpuInfo],
    ) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;

        let declared = expected_channel_header_size(gpus.len() as u64);
        stream.write_all(&declared.to_le_bytes())?;
        header.encode(&mut stream)?;
        for gpu in gpus {
            gpu.encode(&mut stream)?;
        }
        info!(peer = %stream.peer_addr()?, gpus = gpus.len(), "capture channel open");
        Ok(Self { stream })
    }

    /// Sends the termination marker and closes the channel. Skipping this
    /// (crash, kill) is tolerated: the recorder finalizes on disconnect.
    pub fn finish(mut self) -> Result<()> {
        let now = now_ns();
        let marker = Packet::control(
            PacketTypeId::MARKER_TERMINATE,
            0,
            PacketTimes {
                enqueue_ns: now,
                call_begin_ns: now,
                call_end_ns: now,
            },
        );
        write_packet(&mut self.stream, &marker)?;
        Ok(())
    }
}

impl PacketSink for RecorderClient {
    fn send(&mut self, packet: &Packet) -> Result<()> {
        write_packet(&mut self.stream, packet)?;
        Ok(())
    }
}
