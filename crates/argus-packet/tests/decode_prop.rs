use argus_packet::{
    read_packet, write_packet, Packet, PacketTimes, PacketTypeId, PacketView,
    MAX_PACKET_BYTES, PACKET_HEADER_SIZE,
};
use proptest::prelude::*;

fn packet_shaped_bytes() -> impl Strategy<Value = Vec<u8>> {
    // Arbitrary garbage plus inputs that start with a plausible size word, so
    // the reader's body path gets exercised too.
    prop_oneof![
        3 => proptest::collection::vec(any::<u8>(), 0..=4096),
        2 => (PACKET_HEADER_SIZE..=512u64, proptest::collection::vec(any::<u8>(), 0..=512))
            .prop_map(|(size, tail)| {
                let mut bytes = size.to_le_bytes().to_vec();
                bytes.extend_from_slice(&tail);
                bytes
            }),
    ]
}

proptest! {
    #[test]
    fn read_packet_never_panics(bytes in packet_shaped_bytes()) {
        let mut cursor = &bytes[..];
        let res = std::panic::catch_unwind(move || {
            let mut out = Vec::new();
            while let Ok(Some(pkt)) = read_packet(&mut cursor) {
                out.push(pkt);
            }
            out
        });
        prop_assert!(res.is_ok(), "read_packet panicked (len={})", bytes.len());
    }

    #[test]
    fn view_from_bytes_never_panics(bytes in packet_shaped_bytes()) {
        let res = std::panic::catch_unwind(|| PacketView::from_bytes(&bytes).is_ok());
        prop_assert!(res.is_ok(), "PacketView::from_bytes panicked (len={})", bytes.len());
    }

    #[test]
    fn stream_roundtrip(
        bodies in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..=256), 0..=8),
        thread_id in any::<u32>(),
    ) {
        let packets: Vec<Packet> = bodies
            .iter()
            .map(|body| {
                Packet::with_body(PacketTypeId::FIRST_API_CALL, thread_id, PacketTimes::default(), body)
            })
            .collect();

        let mut buf = Vec::new();
        for pkt in &packets {
            write_packet(&mut buf, pkt).unwrap();
        }

        let mut cursor = &buf[..];
        for pkt in &packets {
            let read = read_packet(&mut cursor).unwrap().expect("packet missing");
            prop_assert_eq!(&read, pkt);
        }
        prop_assert!(read_packet(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn size_word_is_always_bounded(body_len in 0usize..=1024) {
        let pkt = Packet::with_body(
            PacketTypeId::FIRST_API_CALL,
            0,
            PacketTimes::default(),
            &vec![0u8; body_len],
        );
        let size = pkt.header().size;
        prop_assert!(size >= PACKET_HEADER_SIZE);
        prop_assert!(size <= MAX_PACKET_BYTES);
        prop_assert_eq!(size, pkt.as_bytes().len() as u64);
    }
}
