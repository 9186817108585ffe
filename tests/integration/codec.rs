//! TCP header codec against realistic segments

use bytes::BytesMut;

use ya_proxy::codec::options::kind;
use ya_proxy::codec::{decode, encode, DecodeError, TcpFlags, TcpHeader, TcpOption};

/// SYN as sent by a Linux client: mss, sackOK, ts, nop, wscale
const LINUX_SYN: [u8; 40] = [
    0xC3, 0x50, 0x01, 0xBB, // 50000 -> 443
    0x1A, 0x2B, 0x3C, 0x4D, // seq
    0x00, 0x00, 0x00, 0x00, // ack
    0xA0, 0x02, 0xFA, 0xF0, // off=10, SYN, win=64240
    0xFE, 0x30, 0x00, 0x00, // csum, urg
    0x02, 0x04, 0x05, 0xB4, // mss 1460
    0x04, 0x02, // sackOK
    0x08, 0x0A, 0x00, 0x01, 0xE2, 0x40, 0x00, 0x00, 0x00, 0x00, // ts
    0x01, // nop
    0x03, 0x03, 0x07, // wscale 7
];

#[test]
fn test_decode_linux_syn() {
    let header = decode(&LINUX_SYN).unwrap();

    assert_eq!(header.source_port, 50000);
    assert_eq!(header.destination_port, 443);
    assert_eq!(header.sequence, 0x1A2B_3C4D);
    assert_eq!(header.acknowledgement, 0);
    assert_eq!(header.data_offset, 10);
    assert_eq!(header.flags, TcpFlags::from_bits(TcpFlags::SYN));
    assert_eq!(header.window, 64240);
    assert_eq!(header.checksum, 0xFE30);
    assert_eq!(header.payload_offset(), 40);

    let kinds: Vec<u8> = header.options.iter().map(|o| o.kind).collect();
    assert_eq!(
        kinds,
        vec![kind::MSS, kind::SACK_PERMITTED, kind::TIMESTAMPS, kind::NOP, kind::WINDOW_SCALE]
    );
    assert_eq!(header.option(kind::MSS).and_then(TcpOption::as_mss), Some(1460));
    assert_eq!(header.option(kind::WINDOW_SCALE).unwrap().data, vec![7]);
    assert!(header.padding.is_empty());

    assert_eq!(&encode(&header)[..], &LINUX_SYN[..]);
}

#[test]
fn test_decode_ignores_payload() {
    let mut segment = LINUX_SYN.to_vec();
    segment.extend_from_slice(b"GET / HTTP/1.1\r\n");

    let header = decode(&segment).unwrap();
    assert_eq!(header.options.len(), 5);
    assert_eq!(&segment[header.payload_offset()..], b"GET / HTTP/1.1\r\n");
    assert_eq!(encode(&header).len(), 40);
}

#[test]
fn test_built_header_matches_wire() {
    let mut header = TcpHeader::new(50000, 443);
    header.sequence = 0x1A2B_3C4D;
    header.flags.syn = true;
    header.window = 64240;
    header.checksum = 0xFE30;
    header.options = vec![
        TcpOption::mss(1460),
        TcpOption::sack_permitted(),
        TcpOption::timestamps(123_456, 0),
        TcpOption::nop(),
        TcpOption::window_scale(7),
    ];
    assert!(header.sync_data_offset());
    assert_eq!(header.data_offset, 10);

    assert_eq!(&header.encode()[..], &LINUX_SYN[..]);
}

#[test]
fn test_encode_into_appends_to_existing_buffer() {
    let header = decode(&LINUX_SYN).unwrap();

    let mut buf = BytesMut::from(&b"prefix"[..]);
    header.encode_into(&mut buf);
    assert_eq!(&buf[..6], b"prefix");
    assert_eq!(&buf[6..], &LINUX_SYN[..]);
}

#[test]
fn test_every_flag_combination_survives() {
    let mut wire = LINUX_SYN;
    for bits in 0..=0x3F_u8 {
        wire[13] = bits;
        let header = decode(&wire).unwrap();
        assert_eq!(header.flags.bits(), bits);
        assert_eq!(encode(&header)[13], bits);
    }
}

#[test]
fn test_end_of_list_and_trailing_bytes_kept() {
    let mut wire = LINUX_SYN[..20].to_vec();
    wire[12] = 0x70; // off=7
    wire.extend_from_slice(&[0x02, 0x04, 0x05, 0xB4, 0x00, 0xAA, 0xBB, 0xCC]);

    let header = decode(&wire).unwrap();
    assert_eq!(header.options, vec![TcpOption::mss(1460), TcpOption::end_of_list()]);
    assert_eq!(header.padding, vec![0xAA, 0xBB, 0xCC]);
    assert_eq!(&encode(&header)[..], &wire[..]);
}

#[test]
fn test_rejects_truncated_and_malformed_input() {
    for len in 0..20 {
        assert!(matches!(
            decode(&LINUX_SYN[..len]),
            Err(DecodeError::Short { needed: 20, actual }) if actual == len
        ));
    }

    // Declares 40 bytes, only 30 present
    assert_eq!(
        decode(&LINUX_SYN[..30]),
        Err(DecodeError::Short { needed: 40, actual: 30 })
    );

    let mut bad_offset = LINUX_SYN;
    bad_offset[12] = 0x40;
    assert_eq!(decode(&bad_offset), Err(DecodeError::InvalidOffset(4)));

    // wscale length runs past the end of the header
    let mut overrun = LINUX_SYN;
    overrun[38] = 0x05;
    assert!(matches!(
        decode(&overrun),
        Err(DecodeError::MalformedOption { kind: 3, length: 5, .. })
    ));
}

#[test]
fn test_display_is_one_line() {
    let header = decode(&LINUX_SYN).unwrap();
    let line = header.to_string();

    assert!(line.starts_with("src=50000 dst=443 "));
    assert!(line.contains("flags=[S]"));
    assert!(line.contains("mss 1460"));
    assert!(!line.contains('\n'));
}
