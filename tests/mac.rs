//! MAC-side vectors: address generation, the IEEE FCS, and the RC4 stream
//! cipher used by shared-key authentication.

use dot11::mac::frame::{
    self, bits_from_octets, build_header, build_psdu_bits, octets_from_bits, Direction,
    FrameControl, FrameKind,
};
use dot11::MacAddr;
use rc4::consts::{U3, U4, U6};
use rc4::{KeyInit, Rc4, StreamCipher};

#[test]
fn generated_addresses_are_locally_administered_unicast() {
    for _ in 0..1000 {
        let address = MacAddr::generate();
        assert_eq!(address.as_bytes().len(), 6);
        assert_eq!(address.as_bytes()[0] & 0x03, 0x02);
        assert!(!address.is_broadcast());
    }
}

/// The CRC-32 check value: crc("123456789") = 0xCBF43926, emitted
/// little-endian.
#[test]
fn fcs_check_value() {
    assert_eq!(frame::fcs(b"123456789"), [0x26, 0x94, 0xF4, 0xCB]);
}

#[test]
fn fcs_roundtrip_and_bit_flip_detection() {
    let data: Vec<u8> = (0..50).map(|i| (i * 37) as u8).collect();
    let mut framed = data.clone();
    framed.extend_from_slice(&frame::fcs(&data));
    assert!(frame::verify_fcs(&framed));

    for index in [0, 13, framed.len() - 1] {
        for bit in 0..8 {
            let mut corrupted = framed.clone();
            corrupted[index] ^= 1 << bit;
            assert!(!frame::verify_fcs(&corrupted), "octet {index} bit {bit}");
        }
    }
}

/// Published RC4 vectors.
#[test]
fn rc4_reference_vectors() {
    let mut text = b"Plaintext".to_vec();
    Rc4::<U3>::new(b"Key".into()).apply_keystream(&mut text);
    assert_eq!(text, hex::decode("BBF316E8D940AF0AD3").unwrap());

    let mut text = b"pedia".to_vec();
    Rc4::<U4>::new(b"Wiki".into()).apply_keystream(&mut text);
    assert_eq!(text, hex::decode("1021BF0420").unwrap());

    let mut text = b"Attack at dawn".to_vec();
    Rc4::<U6>::new(b"Secret".into()).apply_keystream(&mut text);
    assert_eq!(text, hex::decode("45A01F645FC35B383552544B9BF5").unwrap());
}

#[test]
fn psdu_is_header_payload_fcs_bits() {
    let destination = MacAddr([0x02, 1, 2, 3, 4, 5]);
    let source = MacAddr([0x02, 9, 8, 7, 6, 5]);
    let header = build_header(
        FrameControl {
            kind: FrameKind::Data,
            direction: Some(Direction::Uplink),
            retry: false,
        },
        destination,
        source,
    );
    let payload = b"some payload";
    let bits = build_psdu_bits(&header, payload);
    assert_eq!(bits.len(), (24 + payload.len() + 4) * 8);

    let octets = octets_from_bits(&bits);
    assert!(frame::verify_fcs(&octets));
    assert_eq!(&octets[..24], &header);
    assert_eq!(&octets[24..24 + payload.len()], payload);
}

#[test]
fn bits_octets_roundtrip() {
    let octets: Vec<u8> = (0..=255).collect();
    assert_eq!(octets_from_bits(&bits_from_octets(&octets)), octets);
    // MSB first: 0x80 leads with a one.
    assert_eq!(bits_from_octets(&[0x80])[0], 1);
    assert_eq!(bits_from_octets(&[0x01])[7], 1);
}

#[test]
fn retry_bit_survives_header_roundtrip() {
    let header = build_header(
        FrameControl {
            kind: FrameKind::Authentication,
            direction: None,
            retry: true,
        },
        MacAddr::BROADCAST,
        MacAddr([0x02, 0, 0, 0, 0, 1]),
    );
    let parsed = frame::parse_header(&header).unwrap();
    assert!(parsed.control.retry);
    assert_eq!(parsed.control.kind, FrameKind::Authentication);
}
