use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use argus_capture::{PacketSink, RecorderClient};
use argus_packet::{Packet, PacketTimes, PacketTypeId};
use argus_recorder::{RecorderConfig, Supervisor};
use argus_trace::{
    expected_channel_header_size, Compression, DeviceCreateInfo, FileHeader, GpuInfo, TraceFile,
};

const CALL: PacketTypeId = PacketTypeId(17);

fn start_recorder(dir: &std::path::Path, compression: Compression) -> (Supervisor, u16) {
    let config = RecorderConfig {
        output: dir.join("app.argt"),
        listen_port: 0,
        max_workers: 4,
        compression,
        compression_threshold: 64,
        print_messages: false,
    };
    let shutdown = Arc::new(AtomicBool::new(false));
    let supervisor = Supervisor::bind(config, shutdown).unwrap();
    let port = supervisor.local_addr().unwrap().port();
    supervisor.start().unwrap();
    (supervisor, port)
}

fn gpu() -> GpuInfo {
    GpuInfo {
        vendor_id: 0x8086,
        device_id: 0x9A49,
        driver_version: 7,
    }
}

fn call_packet(thread_id: u32, seq: u64, fill: u8) -> Packet {
    let mut pkt = Packet::with_body(CALL, thread_id, PacketTimes::default(), &[fill; 200]);
    pkt.set_sequence(seq);
    pkt
}

#[test]
fn two_producers_land_in_separate_files() {
    let dir = tempfile::tempdir().unwrap();
    let (supervisor, port) = start_recorder(dir.path(), Compression::Lz4);

    let header = FileHeader::for_capture(1);
    let mut a = RecorderClient::connect(("127.0.0.1", port), &header, &[gpu()]).unwrap();
    // Give the first worker time to hand off accept duty.
    std::thread::sleep(Duration::from_millis(50));
    let mut b = RecorderClient::connect(("127.0.0.1", port), &header, &[gpu()]).unwrap();

    for seq in 0..10u64 {
        a.send(&call_packet(1, seq, 0xAA)).unwrap();
        b.send(&call_packet(2, seq, 0xBB)).unwrap();
    }
    a.finish().unwrap();
    b.finish().unwrap();
    supervisor.shutdown();

    let first = TraceFile::read(File::open(dir.path().join("app.argt")).unwrap()).unwrap();
    let second = TraceFile::read(File::open(dir.path().join("app-1.argt")).unwrap()).unwrap();
    for file in [&first, &second] {
        assert_eq!(file.packets.len(), 10);
        assert_eq!(file.header.portability_table_valid, 1);
        let tid = file.packets[0].header().thread_id;
        let fill = if tid == 1 { 0xAA } else { 0xBB };
        for (seq, pkt) in file.packets.iter().enumerate() {
            assert_eq!(pkt.header().thread_id, tid, "streams must not interleave");
            assert_eq!(pkt.header().sequence, seq as u64);
            assert_eq!(pkt.body(), &[fill; 200]);
        }
    }
    assert_ne!(
        first.packets[0].header().thread_id,
        second.packets[0].header().thread_id
    );
}

#[test]
fn device_features_reach_the_metadata_trailer() {
    let dir = tempfile::tempdir().unwrap();
    let (supervisor, port) = start_recorder(dir.path(), Compression::None);

    let header = FileHeader::for_capture(1);
    let mut client = RecorderClient::connect(("127.0.0.1", port), &header, &[gpu()]).unwrap();
    let create = DeviceCreateInfo {
        handle: 0xD00D,
        features: vec!["wideLines".to_owned()],
    };
    client
        .send(&create.to_packet(1, PacketTimes::default()).unwrap())
        .unwrap();
    client.finish().unwrap();
    supervisor.shutdown();

    let file = TraceFile::read(File::open(dir.path().join("app.argt")).unwrap()).unwrap();
    let meta = file.metadata.unwrap();
    assert_eq!(
        meta.device_features.unwrap()["0xd00d"],
        vec!["wideLines".to_owned()]
    );
}

#[test]
fn over_ceiling_producers_are_refused_not_parked() {
    let dir = tempfile::tempdir().unwrap();
    let config = RecorderConfig {
        output: dir.path().join("app.argt"),
        listen_port: 0,
        max_workers: 1,
        compression: Compression::None,
        compression_threshold: 64,
        print_messages: false,
    };
    let shutdown = Arc::new(AtomicBool::new(false));
    let supervisor = Supervisor::bind(config, shutdown).unwrap();
    let port = supervisor.local_addr().unwrap().port();
    supervisor.start().unwrap();

    let header = FileHeader::for_capture(1);
    let mut first = RecorderClient::connect(("127.0.0.1", port), &header, &[gpu()]).unwrap();
    first.send(&call_packet(1, 0, 0xAA)).unwrap();
    // Give the lone worker time to hand accept duty to the refuser.
    std::thread::sleep(Duration::from_millis(100));

    // The pool is full; this connection must be closed promptly rather than
    // left in the listen backlog.
    let mut refused = TcpStream::connect(("127.0.0.1", port)).unwrap();
    refused
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut buf = [0u8; 8];
    match refused.read(&mut buf) {
        Ok(0) => {}
        Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
        other => panic!("connection was parked instead of refused: {other:?}"),
    }

    // Closing the open channel frees the slot; the next producer is served.
    first.finish().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    let mut second = RecorderClient::connect(("127.0.0.1", port), &header, &[gpu()]).unwrap();
    second.send(&call_packet(2, 0, 0xBB)).unwrap();
    second.finish().unwrap();
    supervisor.shutdown();

    let file = TraceFile::read(File::open(dir.path().join("app-1.argt")).unwrap()).unwrap();
    assert_eq!(file.packets.len(), 1);
    assert_eq!(file.packets[0].body(), &[0xBB; 200]);
}

#[test]
fn killed_producer_still_leaves_an_openable_file() {
    let dir = tempfile::tempdir().unwrap();
    let (supervisor, port) = start_recorder(dir.path(), Compression::None);

    // Raw socket so the cut can land mid-packet.
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .write_all(&expected_channel_header_size(0).to_le_bytes())
        .unwrap();
    let header = FileHeader::for_capture(0);
    let mut handshake = Vec::new();
    header.encode(&mut handshake).unwrap();
    stream.write_all(&handshake).unwrap();

    let complete = call_packet(1, 0, 0x11);
    stream.write_all(complete.as_bytes()).unwrap();
    let partial = call_packet(1, 1, 0x22);
    stream.write_all(&partial.as_bytes()[..30]).unwrap();
    drop(stream);

    supervisor.shutdown();

    let file = TraceFile::read(File::open(dir.path().join("app.argt")).unwrap()).unwrap();
    assert!(!file.truncated, "the recorder finalized around the cut");
    assert_eq!(file.packets.len(), 1);
    assert_eq!(file.packets[0].body(), &[0x11; 200]);
    assert_eq!(file.header.portability_table_valid, 1);
    assert!(file.metadata.is_some());
}
