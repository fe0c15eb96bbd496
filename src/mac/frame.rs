//! MAC frame construction and parsing: Frame Control subfields, the 24-octet
//! header and the CRC-32 FCS suffix.
//!
//! A PSDU crosses the MAC/PHY boundary as a flat bit list, eight bits per
//! octet with the most significant bit first.

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::MacAddr;

pub const HEADER_LEN: usize = 24;
pub const FCS_LEN: usize = 4;

/// IEEE 802.11 FCS: polynomial 0xEDB88320 (reflected), init and final XOR
/// 0xFFFFFFFF, emitted little-endian.
const FCS: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Management,
    Control,
    Data,
    Extension,
}

/// Frame function: the (type, subtype) pairs the stack exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    AssociationRequest,
    AssociationResponse,
    ProbeRequest,
    ProbeResponse,
    Beacon,
    Authentication,
    Rts,
    Cts,
    Ack,
    Data,
}

impl FrameKind {
    pub const fn frame_type(&self) -> FrameType {
        match *self {
            FrameKind::AssociationRequest
            | FrameKind::AssociationResponse
            | FrameKind::ProbeRequest
            | FrameKind::ProbeResponse
            | FrameKind::Beacon
            | FrameKind::Authentication => FrameType::Management,
            FrameKind::Rts | FrameKind::Cts | FrameKind::Ack => FrameType::Control,
            FrameKind::Data => FrameType::Data,
        }
    }

    const fn type_bits(&self) -> [u8; 2] {
        match self.frame_type() {
            FrameType::Management => [0, 0],
            FrameType::Control => [0, 1],
            FrameType::Data => [1, 0],
            FrameType::Extension => [1, 1],
        }
    }

    const fn subtype_bits(&self) -> [u8; 4] {
        match *self {
            FrameKind::AssociationRequest => [0, 0, 0, 0],
            FrameKind::AssociationResponse => [0, 0, 0, 1],
            FrameKind::ProbeRequest => [0, 1, 0, 0],
            FrameKind::ProbeResponse => [0, 1, 0, 1],
            FrameKind::Beacon => [1, 0, 0, 0],
            FrameKind::Authentication => [1, 0, 1, 1],
            FrameKind::Rts => [1, 0, 1, 1],
            FrameKind::Cts => [1, 1, 0, 0],
            FrameKind::Ack => [1, 1, 0, 1],
            FrameKind::Data => [0, 0, 0, 0],
        }
    }

    fn from_bits(type_bits: [u8; 2], subtype_bits: [u8; 4]) -> Option<FrameKind> {
        Some(match (type_bits, subtype_bits) {
            ([0, 0], [0, 0, 0, 0]) => FrameKind::AssociationRequest,
            ([0, 0], [0, 0, 0, 1]) => FrameKind::AssociationResponse,
            ([0, 0], [0, 1, 0, 0]) => FrameKind::ProbeRequest,
            ([0, 0], [0, 1, 0, 1]) => FrameKind::ProbeResponse,
            ([0, 0], [1, 0, 0, 0]) => FrameKind::Beacon,
            ([0, 0], [1, 0, 1, 1]) => FrameKind::Authentication,
            ([0, 1], [1, 0, 1, 1]) => FrameKind::Rts,
            ([0, 1], [1, 1, 0, 0]) => FrameKind::Cts,
            ([0, 1], [1, 1, 0, 1]) => FrameKind::Ack,
            ([1, 0], [0, 0, 0, 0]) => FrameKind::Data,
            _ => return None,
        })
    }
}

/// To-DS/From-DS direction of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// STA toward AP: To DS set.
    Uplink,
    /// AP toward STA: From DS set.
    Downlink,
}

/// The Frame Control subfields this stack reads and writes. Remaining
/// subfields transmit as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl {
    pub kind: FrameKind,
    pub direction: Option<Direction>,
    pub retry: bool,
}

impl FrameControl {
    /// Pack into the two header octets. Subfield values enter the 16-bit
    /// field least significant bit first; octets serialize most significant
    /// field bit first.
    pub fn to_bytes(&self) -> [u8; 2] {
        let mut field = [0u8; 16];
        let type_bits = self.kind.type_bits();
        let subtype_bits = self.kind.subtype_bits();
        field[2] = type_bits[1];
        field[3] = type_bits[0];
        for (offset, &bit) in subtype_bits.iter().rev().enumerate() {
            field[4 + offset] = bit;
        }
        match self.direction {
            Some(Direction::Uplink) => field[8] = 1,
            Some(Direction::Downlink) => field[9] = 1,
            None => {}
        }
        field[11] = u8::from(self.retry);
        [pack_octet(&field[..8]), pack_octet(&field[8..])]
    }

    /// Parse the two header octets; `None` for unknown type/subtype pairs.
    pub fn parse(bytes: [u8; 2]) -> Option<FrameControl> {
        let mut field = [0u8; 16];
        for (index, bit) in field.iter_mut().enumerate() {
            *bit = (bytes[index / 8] >> (7 - index % 8)) & 1;
        }
        let type_bits = [field[3], field[2]];
        let subtype_bits = [field[7], field[6], field[5], field[4]];
        let kind = FrameKind::from_bits(type_bits, subtype_bits)?;
        let direction = match (field[8], field[9]) {
            (1, 0) => Some(Direction::Uplink),
            (0, 1) => Some(Direction::Downlink),
            _ => None,
        };
        Some(FrameControl {
            kind,
            direction,
            retry: field[11] == 1,
        })
    }
}

fn pack_octet(bits: &[u8]) -> u8 {
    bits.iter().fold(0, |acc, &bit| (acc << 1) | bit)
}

/// Header fields the receive path dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeader {
    pub control: FrameControl,
    pub destination: MacAddr,
    pub source: MacAddr,
}

/// Build the common 24-octet header: Frame Control, Duration/ID zero,
/// Address 1 = destination, Address 2 = source.
pub fn build_header(control: FrameControl, destination: MacAddr, source: MacAddr) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..2].copy_from_slice(&control.to_bytes());
    header[4..10].copy_from_slice(destination.as_bytes());
    header[10..16].copy_from_slice(source.as_bytes());
    header
}

pub fn parse_header(octets: &[u8]) -> Option<ParsedHeader> {
    if octets.len() < HEADER_LEN {
        return None;
    }
    let control = FrameControl::parse([octets[0], octets[1]])?;
    Some(ParsedHeader {
        control,
        destination: MacAddr(octets[4..10].try_into().expect("six octets")),
        source: MacAddr(octets[10..16].try_into().expect("six octets")),
    })
}

/// CRC-32 of `data`, serialized little-endian.
pub fn fcs(data: &[u8]) -> [u8; FCS_LEN] {
    FCS.checksum(data).to_le_bytes()
}

/// Check the trailing four octets against the CRC of the rest.
pub fn verify_fcs(octets: &[u8]) -> bool {
    octets.len() > FCS_LEN && fcs(&octets[..octets.len() - FCS_LEN]) == octets[octets.len() - FCS_LEN..]
}

/// header ∥ payload ∥ FCS, expanded to the PSDU bit list.
pub fn build_psdu_bits(header: &[u8; HEADER_LEN], payload: &[u8]) -> Vec<u8> {
    let mut octets = Vec::with_capacity(HEADER_LEN + payload.len() + FCS_LEN);
    octets.extend_from_slice(header);
    octets.extend_from_slice(payload);
    let checksum = fcs(&octets);
    octets.extend_from_slice(&checksum);
    bits_from_octets(&octets)
}

/// Expand octets to bits, most significant first.
pub fn bits_from_octets(octets: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(octets.len() * 8);
    for &octet in octets {
        for shift in (0..8).rev() {
            bits.push((octet >> shift) & 1);
        }
    }
    bits
}

/// Collapse bits back to octets; a trailing partial group fills the most
/// significant bits.
pub fn octets_from_bits(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| chunk.iter().fold(0, |acc, &bit| (acc << 1) | bit))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_control_roundtrips() {
        for kind in [
            FrameKind::AssociationRequest,
            FrameKind::AssociationResponse,
            FrameKind::ProbeRequest,
            FrameKind::ProbeResponse,
            FrameKind::Beacon,
            FrameKind::Authentication,
            FrameKind::Rts,
            FrameKind::Cts,
            FrameKind::Ack,
            FrameKind::Data,
        ] {
            for direction in [None, Some(Direction::Uplink), Some(Direction::Downlink)] {
                for retry in [false, true] {
                    let control = FrameControl {
                        kind,
                        direction,
                        retry,
                    };
                    assert_eq!(FrameControl::parse(control.to_bytes()), Some(control));
                }
            }
        }
    }

    #[test]
    fn header_carries_addresses_at_fixed_offsets() {
        let destination = MacAddr([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let source = MacAddr([0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
        let control = FrameControl {
            kind: FrameKind::Beacon,
            direction: None,
            retry: false,
        };
        let header = build_header(control, destination, source);
        assert_eq!(&header[4..10], destination.as_bytes());
        assert_eq!(&header[10..16], source.as_bytes());
        let parsed = parse_header(&header).unwrap();
        assert_eq!(parsed.destination, destination);
        assert_eq!(parsed.source, source);
        assert_eq!(parsed.control, control);
    }

    #[test]
    fn psdu_bits_verify_and_break_on_bit_flips() {
        let header = build_header(
            FrameControl {
                kind: FrameKind::Data,
                direction: Some(Direction::Downlink),
                retry: false,
            },
            MacAddr([2, 0, 0, 0, 0, 1]),
            MacAddr([2, 0, 0, 0, 0, 2]),
        );
        let bits = build_psdu_bits(&header, b"hello");
        let octets = octets_from_bits(&bits);
        assert!(verify_fcs(&octets));
        for flip in [0, 17, bits.len() - 1] {
            let mut corrupted = bits.clone();
            corrupted[flip] ^= 1;
            assert!(!verify_fcs(&octets_from_bits(&corrupted)), "flip {flip}");
        }
    }
}
