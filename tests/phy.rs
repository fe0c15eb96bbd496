//! PHY pipeline tests: reference vectors from IEEE Std 802.11-2020 and full
//! transmit/receive loopbacks over a clean medium.

use dot11::mac::frame::{bits_from_octets, octets_from_bits};
use dot11::message::TxVector;
use dot11::phy::{self, ofdm, scrambler, signal_field_bits, FrameParams, Transmitter};
use dot11::PhyRate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 17.3.5.5: the scrambler sequence for the 1011101 initial state. Seed 93
/// over 254 bits must produce this 127-bit cycle twice.
#[rustfmt::skip]
const LFSR_SEQUENCE_SEED_1011101: [u8; 127] = [
    0, 1, 1, 0, 1, 1, 0, 0, 0, 0, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 1, 0, 0, 1, 1, 1, 0, 0, 1, 1, 1, 1,
    0, 1, 1, 0, 1, 0, 0, 0, 0, 1, 0, 1, 0, 1, 0, 1, 1, 1, 1, 1, 0, 1, 0, 0, 1, 0, 1, 0, 0, 0, 1, 1,
    0, 1, 1, 1, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 1, 1, 1, 0, 1, 1, 1, 1, 0, 0, 1, 0, 1, 1,
    0, 0, 1, 0, 0, 1, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 1, 1, 0, 0, 0, 1, 0, 1, 1, 1, 0, 1,
];

#[test]
fn lfsr_sequence_seed_93_reference() {
    let sequence = scrambler::lfsr_sequence(254, 93);
    assert_eq!(sequence[..127], LFSR_SEQUENCE_SEED_1011101);
    assert_eq!(sequence[127..], LFSR_SEQUENCE_SEED_1011101);
}

#[test]
fn signal_field_layout() {
    // 36 Mb/s, LENGTH = 100 (17.3.4).
    let params = FrameParams::derive(TxVector {
        rate: PhyRate::R36,
        length: 100,
    })
    .unwrap();
    let bits = signal_field_bits(&params);

    assert_eq!(&bits[..4], &[1, 0, 1, 1], "RATE");
    assert_eq!(bits[4], 0, "reserved");
    // LENGTH transmitted LSB first: 100 = 0b000001100100.
    let mut expected_length = [0u8; 12];
    for (i, slot) in expected_length.iter_mut().enumerate() {
        *slot = ((100 >> i) & 1) as u8;
    }
    assert_eq!(&bits[5..17], &expected_length, "LENGTH");
    let ones: u32 = bits[..17].iter().map(|&b| u32::from(b)).sum();
    assert_eq!(u32::from(bits[17]), ones % 2, "even parity");
    assert_eq!(&bits[18..], &[0; 6], "SIGNAL TAIL");
}

#[test]
fn signal_field_parses_back() {
    for rate in PhyRate::LADDER {
        for length in [1usize, 77, 2047, 4095] {
            let params = FrameParams::derive(TxVector { rate, length }).unwrap();
            let bits = signal_field_bits(&params);
            let recovered = phy::parse_signal_field(&bits).unwrap();
            assert_eq!(recovered, TxVector { rate, length });
        }
    }
}

#[test]
fn signal_field_parity_flip_is_a_format_violation() {
    let params = FrameParams::derive(TxVector {
        rate: PhyRate::R12,
        length: 300,
    })
    .unwrap();
    let mut bits = signal_field_bits(&params);
    bits[17] ^= 1;
    assert!(phy::parse_signal_field(&bits).is_err());
}

#[test]
fn signal_field_unknown_rate_is_a_format_violation() {
    let params = FrameParams::derive(TxVector {
        rate: PhyRate::R6,
        length: 300,
    })
    .unwrap();
    let mut bits = signal_field_bits(&params);
    // 1101 → 1110 keeps the ones count, so parity stays valid, but the
    // pattern names no MCS.
    bits[..4].copy_from_slice(&[1, 1, 1, 0]);
    assert!(phy::parse_signal_field(&bits).is_err());
}

#[test]
fn frame_params_reject_out_of_range_lengths() {
    for length in [0usize, 4096] {
        assert!(FrameParams::derive(TxVector {
            rate: PhyRate::R6,
            length,
        })
        .is_err());
    }
}

fn transmit(rate: PhyRate, psdu: &[u8], seed: u8) -> Vec<num_complex::Complex64> {
    let mut tx = Transmitter::new(
        TxVector {
            rate,
            length: psdu.len(),
        },
        seed,
    )
    .unwrap();
    for octet in psdu {
        let bits = bits_from_octets(&[*octet]);
        tx.push_octet(&bits);
    }
    assert!(tx.is_complete());
    tx.ppdu()
}

/// Encode then decode over the identity channel: the PSDU must come back
/// bit-exact at every MCS.
#[test]
fn loopback_every_rate() {
    let mut rng = StdRng::seed_from_u64(7);
    for rate in PhyRate::LADDER {
        let length = rng.gen_range(1..=80);
        let psdu: Vec<u8> = (0..length).map(|_| rng.gen()).collect();
        let seed = rng.gen_range(1..=127);

        let ppdu = transmit(rate, &psdu, seed);
        let start = ofdm::detect_frame(&ppdu).expect("frame detected");
        assert_eq!(start, 0);
        let received = phy::receive(&ppdu, start).expect("decodes");
        assert_eq!(
            received.rx_vector,
            TxVector {
                rate,
                length: psdu.len(),
            }
        );
        assert_eq!(octets_from_bits(&received.bits), psdu, "{rate:?}");
    }
}

#[test]
fn loopback_single_octet() {
    let ppdu = transmit(PhyRate::R6, &[0xA5], 55);
    let received = phy::receive(&ppdu, ofdm::detect_frame(&ppdu).unwrap()).unwrap();
    assert_eq!(octets_from_bits(&received.bits), vec![0xA5]);
}

#[test]
fn loopback_maximum_length() {
    let mut rng = StdRng::seed_from_u64(11);
    let psdu: Vec<u8> = (0..4095).map(|_| rng.gen()).collect();
    let ppdu = transmit(PhyRate::R54, &psdu, 101);
    let received = phy::receive(&ppdu, ofdm::detect_frame(&ppdu).unwrap()).unwrap();
    assert_eq!(received.rx_vector.length, 4095);
    assert_eq!(octets_from_bits(&received.bits), psdu);
}

/// A PSDU whose data bits land exactly on a symbol boundary still closes the
/// frame with a full TAIL+PAD symbol.
#[test]
fn loopback_symbol_aligned_psdu() {
    // 24 Mb/s: n_dbps = 96; 16 + 8·58 = 480 = 5 symbols exactly.
    let mut rng = StdRng::seed_from_u64(13);
    let psdu: Vec<u8> = (0..58).map(|_| rng.gen()).collect();
    let ppdu = transmit(PhyRate::R24, &psdu, 33);
    let received = phy::receive(&ppdu, ofdm::detect_frame(&ppdu).unwrap()).unwrap();
    assert_eq!(octets_from_bits(&received.bits), psdu);
}

/// The decoder searches all 127 seeds; every one must round-trip.
#[test]
fn loopback_every_scramble_seed() {
    let psdu = [0x13u8, 0x57, 0x9B, 0xDF];
    for seed in 1..=127 {
        let ppdu = transmit(PhyRate::R12, &psdu, seed);
        let received = phy::receive(&ppdu, ofdm::detect_frame(&ppdu).unwrap()).unwrap();
        assert_eq!(octets_from_bits(&received.bits), psdu, "seed {seed}");
    }
}

/// PPDU length accounting: preamble, SIGNAL and the DATA symbols overlap by
/// one sample at every seam.
#[test]
fn ppdu_sample_count() {
    for (rate, length) in [(PhyRate::R6, 1usize), (PhyRate::R54, 200)] {
        let params = FrameParams::derive(TxVector { rate, length }).unwrap();
        let psdu: Vec<u8> = (0..length).map(|i| i as u8).collect();
        let ppdu = transmit(rate, &psdu, 42);
        assert_eq!(ppdu.len(), 401 + 80 * params.n_symbols);
    }
}
