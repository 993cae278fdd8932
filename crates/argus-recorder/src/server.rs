//! Listening endpoint, bounded recorder-thread pool and the per-channel
//! packet loop.
//!
//! One thread sits in `accept` at a time. On a new connection a worker
//! immediately asks the supervisor for a successor, then owns its channel
//! end-to-end: handshake, trace-file creation, blocking packet loop,
//! finalization. When the pool is at its ceiling the acceptor's place is
//! taken by a refuser outside the pool, which accepts and immediately closes
//! connections (logging each refusal) until a channel closes and frees a
//! slot. Reads carry a short timeout so the shutdown flag is observed; no
//! two threads ever write the same trace file.

use std::fs::OpenOptions;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use argus_packet::{MessageLevel, MessageView, PacketError, PacketTypeId, PacketView};
use argus_trace::{
    call_ids, validate_declared_size, DeviceCreateInfo, FileHeader, GpuInfo, TraceWriter,
};
use tracing::{debug, error, info, warn};

use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};

const READ_TIMEOUT: Duration = Duration::from_millis(100);

pub struct Supervisor {
    shared: Arc<Shared>,
}

struct Shared {
    listener: TcpListener,
    config: RecorderConfig,
    shutdown: Arc<AtomicBool>,
    active: AtomicUsize,
    next_channel: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Binds the listening socket. Port 0 picks a free port (tests).
    pub fn bind(config: RecorderConfig, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", config.listen_port))?;
        info!(addr = %listener.local_addr()?, "recorder listening");
        Ok(Self {
            shared: Arc::new(Shared {
                listener,
                config,
                shutdown,
                active: AtomicUsize::new(0),
                next_channel: AtomicUsize::new(0),
                handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.listener.local_addr()?)
    }

    /// Spawns the first recorder thread.
    pub fn start(&self) -> Result<()> {
        self.shared.spawn_worker()
    }

    /// Raises the shutdown flag and joins every recorder thread. Workers
    /// parked in `accept` are woken with a local connection.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Ok(addr) = self.shared.listener.local_addr() {
            // Wake the idle acceptor; the connection is discarded on arrival.
            let _ = TcpStream::connect(addr);
        }
        let handles: Vec<_> = {
            let mut guard = self.shared.handles.lock().unwrap();
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Shared {
    fn reserve_slot(&self) -> Result<usize> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(RecorderError::ShuttingDown);
        }
        let limit = self.config.max_workers;
        let slot = self.active.fetch_add(1, Ordering::SeqCst);
        if slot >= limit {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(RecorderError::PoolExhausted { limit });
        }
        Ok(slot)
    }

    fn spawn_worker(self: &Arc<Self>) -> Result<()> {
        let slot = self.reserve_slot()?;
        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("argus-recorder-{slot}"))
            .spawn(move || {
                shared.worker_loop();
                shared.active.fetch_sub(1, Ordering::SeqCst);
            })
            .map_err(RecorderError::Io)?;
        self.handles.lock().unwrap().push(handle);
        Ok(())
    }

    /// Keeps exactly one thread in `accept`: a successor worker while a pool
    /// slot is free, otherwise a refuser outside the pool.
    fn keep_accepting(self: &Arc<Self>) {
        match self.spawn_worker() {
            Ok(()) => {}
            Err(RecorderError::ShuttingDown) => {}
            Err(e) => {
                warn!(error = %e, "pool full; refusing producers until a channel closes");
                self.spawn_refuser();
            }
        }
    }

    fn spawn_refuser(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        match thread::Builder::new()
            .name("argus-refuser".to_owned())
            .spawn(move || shared.refuse_loop())
        {
            Ok(handle) => self.handles.lock().unwrap().push(handle),
            Err(e) => error!(error = %e, "cannot spawn refusing acceptor"),
        }
    }

    fn worker_loop(self: &Arc<Self>) {
        let stream = match self.listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "producer connected");
                stream
            }
            Err(e) => {
                if !self.shutdown.load(Ordering::SeqCst) {
                    error!(error = %e, "accept failed");
                }
                return;
            }
        };
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }

        // Keep one thread accepting while this one serves its channel.
        self.keep_accepting();

        let channel = self.next_channel.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.serve_channel(stream, channel) {
            // Fatal for this channel only.
            error!(channel, error = %e, "channel failed");
        }
    }

    /// Runs while the pool is at its ceiling. Connections are accepted and
    /// immediately closed so producers see a refusal instead of sitting in
    /// the OS listen backlog. Once a slot frees, the incoming producer is
    /// served here and the acceptor chain resumes.
    fn refuse_loop(self: &Arc<Self>) {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(conn) => conn,
                Err(e) => {
                    if !self.shutdown.load(Ordering::SeqCst) {
                        error!(error = %e, "accept failed");
                    }
                    return;
                }
            };
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            match self.reserve_slot() {
                Ok(_slot) => {
                    debug!(%peer, "pool slot freed; producer connected");
                    self.keep_accepting();
                    let channel = self.next_channel.fetch_add(1, Ordering::SeqCst);
                    if let Err(e) = self.serve_channel(stream, channel) {
                        error!(channel, error = %e, "channel failed");
                    }
                    self.active.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
                Err(RecorderError::ShuttingDown) => return,
                Err(e) => {
                    warn!(%peer, error = %e, "producer connection refused");
                }
            }
        }
    }

    fn serve_channel(&self, stream: TcpStream, channel: usize) -> Result<()> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let mut reader = ShutdownReader {
            inner: stream,
            shutdown: &self.shutdown,
        };

        let (header, gpus) = read_handshake(&mut reader)?;
        let path = self.config.channel_path(channel);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer =
            TraceWriter::create(file, &header, &gpus, self.config.writer_options())?;
        info!(channel, path = %path.display(), gpus = gpus.len(), "trace file open");

        let mut clean = false;
        loop {
            let packet = match argus_packet::read_packet(&mut reader) {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(PacketError::Truncated { .. }) => {
                    warn!(channel, "producer vanished mid-packet");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            let packet_type = packet.header().packet_type;
            match packet_type {
                PacketTypeId::MARKER_TERMINATE => {
                    clean = true;
                    break;
                }
                PacketTypeId::MESSAGE => {
                    if self.config.print_messages {
                        echo_message(&packet);
                    }
                    writer.write_packet(packet)?;
                }
                call_ids::CREATE_DEVICE => {
                    let view = PacketView::new(&packet);
                    match DeviceCreateInfo::parse(&view) {
                        Ok(info) if !info.features.is_empty() => {
                            writer.set_device_features(info.handle, info.features);
                        }
                        Ok(_) => {}
                        Err(e) => warn!(channel, error = %e, "unreadable device-create body"),
                    }
                    writer.write_packet(packet)?;
                }
                _ => writer.write_packet(packet)?,
            }
        }
        writer.finish(clean)?;
        info!(channel, clean, "channel closed");
        Ok(())
    }
}

fn read_handshake<R: Read>(r: &mut R) -> Result<(FileHeader, Vec<GpuInfo>)> {
    let mut size_bytes = [0u8; 8];
    r.read_exact(&mut size_bytes)?;
    let declared = u64::from_le_bytes(size_bytes);
    let header = FileHeader::decode(r)?;
    validate_declared_size(declared, header.gpu_count)?;
    // The count was cross-checked against the declared size, but cap the
    // pre-allocation anyway.
    let mut gpus = Vec::with_capacity(header.gpu_count.min(64) as usize);
    for _ in 0..header.gpu_count {
        gpus.push(GpuInfo::decode(r)?);
    }
    Ok((header, gpus))
}

fn echo_message(packet: &argus_packet::Packet) {
    let view = PacketView::new(packet);
    match MessageView::parse(&view) {
        Ok(msg) => match msg.level {
            MessageLevel::Error => error!(producer = packet.header().thread_id, "{}", msg.text),
            MessageLevel::Warning => warn!(producer = packet.header().thread_id, "{}", msg.text),
            MessageLevel::Info => info!(producer = packet.header().thread_id, "{}", msg.text),
            MessageLevel::Debug => debug!(producer = packet.header().thread_id, "{}", msg.text),
        },
        Err(e) => warn!(error = %e, "malformed message packet"),
    }
}

/// Blocking reads with the shutdown flag folded in: a timeout checks the
/// flag and retries, and a raised flag reads as end-of-stream.
struct ShutdownReader<'a> {
    inner: TcpStream,
    shutdown: &'a AtomicBool,
}

impl Read for ShutdownReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return Ok(0);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}
