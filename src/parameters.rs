//! Reference constants of the OFDM PHY and the MAC procedures, vendored from
//! IEEE Std 802.11-2020 Clause 17, plus the simulation timing parameters.

use core::time::Duration;

use num_complex::Complex64;
use std::sync::LazyLock;

use crate::PhyRate;

/// Sub-carrier modulation of one MCS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Bpsk,
    Qpsk,
    Qam16,
    Qam64,
}

impl Modulation {
    /// Coded bits carried per sub-carrier.
    pub const fn bits_per_subcarrier(&self) -> usize {
        match *self {
            Modulation::Bpsk => 1,
            Modulation::Qpsk => 2,
            Modulation::Qam16 => 4,
            Modulation::Qam64 => 6,
        }
    }
}

/// Convolutional coding rate; higher rates are punctured from the base
/// R = 1/2 code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingRate {
    Half,
    TwoThirds,
    ThreeQuarters,
}

impl CodingRate {
    /// Puncturing pattern over the rate-1/2 output stream
    /// (17.3.5.6, Figure 17-9).
    pub const fn puncturing_pattern(&self) -> &'static [u8] {
        match *self {
            CodingRate::Half => &[1, 1],
            CodingRate::TwoThirds => &[1, 1, 1, 0],
            CodingRate::ThreeQuarters => &[1, 1, 1, 0, 0, 1],
        }
    }
}

/// One row of the modulation-and-coding table (Table 17-4).
#[derive(Debug, Clone, Copy)]
pub struct Mcs {
    pub modulation: Modulation,
    pub coding_rate: CodingRate,
    /// Coded bits per sub-carrier.
    pub n_bpsc: usize,
    /// Coded bits per OFDM symbol.
    pub n_cbps: usize,
    /// Data bits per OFDM symbol.
    pub n_dbps: usize,
    /// RATE bits of the SIGNAL field, transmit order (Table 17-6).
    pub signal_field_coding: [u8; 4],
}

impl PhyRate {
    pub const fn mcs(&self) -> &'static Mcs {
        match *self {
            PhyRate::R6 => &Mcs {
                modulation: Modulation::Bpsk,
                coding_rate: CodingRate::Half,
                n_bpsc: 1,
                n_cbps: 48,
                n_dbps: 24,
                signal_field_coding: [1, 1, 0, 1],
            },
            PhyRate::R9 => &Mcs {
                modulation: Modulation::Bpsk,
                coding_rate: CodingRate::ThreeQuarters,
                n_bpsc: 1,
                n_cbps: 48,
                n_dbps: 36,
                signal_field_coding: [1, 1, 1, 1],
            },
            PhyRate::R12 => &Mcs {
                modulation: Modulation::Qpsk,
                coding_rate: CodingRate::Half,
                n_bpsc: 2,
                n_cbps: 96,
                n_dbps: 48,
                signal_field_coding: [0, 1, 0, 1],
            },
            PhyRate::R18 => &Mcs {
                modulation: Modulation::Qpsk,
                coding_rate: CodingRate::ThreeQuarters,
                n_bpsc: 2,
                n_cbps: 96,
                n_dbps: 72,
                signal_field_coding: [0, 1, 1, 1],
            },
            PhyRate::R24 => &Mcs {
                modulation: Modulation::Qam16,
                coding_rate: CodingRate::Half,
                n_bpsc: 4,
                n_cbps: 192,
                n_dbps: 96,
                signal_field_coding: [1, 0, 0, 1],
            },
            PhyRate::R36 => &Mcs {
                modulation: Modulation::Qam16,
                coding_rate: CodingRate::ThreeQuarters,
                n_bpsc: 4,
                n_cbps: 192,
                n_dbps: 144,
                signal_field_coding: [1, 0, 1, 1],
            },
            PhyRate::R48 => &Mcs {
                modulation: Modulation::Qam64,
                coding_rate: CodingRate::TwoThirds,
                n_bpsc: 6,
                n_cbps: 288,
                n_dbps: 192,
                signal_field_coding: [0, 0, 0, 1],
            },
            PhyRate::R54 => &Mcs {
                modulation: Modulation::Qam64,
                coding_rate: CodingRate::ThreeQuarters,
                n_bpsc: 6,
                n_cbps: 288,
                n_dbps: 216,
                signal_field_coding: [0, 0, 1, 1],
            },
        }
    }

    /// Recover the rate from decoded SIGNAL RATE bits.
    pub fn from_signal_field_coding(bits: &[u8]) -> Option<PhyRate> {
        PhyRate::LADDER
            .into_iter()
            .find(|rate| bits.len() >= 4 && rate.mcs().signal_field_coding == bits[..4])
    }
}

/// Convolutional encoder generators, K = 7 (17.3.5.6). Tap masks apply to the
/// shift register with the newest bit in the most significant position.
pub const G1: u8 = 0o133;
pub const G2: u8 = 0o171;

/// Positions of the four pilot tones within the 52-tone arrangement
/// (sub-carriers −21, −7, +7 and +21).
pub const PILOT_INDICES: [usize; 4] = [5, 19, 32, 46];

/// Empirical STF correlation magnitude above which a frame is declared
/// present, for unit-scale samples. A clean preamble correlates at ≈ 2.03.
pub const FRAME_DETECTION_THRESHOLD: f64 = 1.5;

const P: Complex64 = Complex64::new(1.0, 1.0);
const M: Complex64 = Complex64::new(-1.0, -1.0);
const Z: Complex64 = Complex64::new(0.0, 0.0);

/// Short training sequence, frequency domain, tones −26..+26 without DC
/// (17.3.3, Equation 17-7). Energy on every fourth tone, scaled by √(13/6)
/// so the total power matches the 52-tone fields.
pub static FREQUENCY_DOMAIN_STF: LazyLock<[Complex64; 52]> = LazyLock::new(|| {
    let pattern = [
        // −26..−1
        Z, Z, P, Z, Z, Z, M, Z, Z, Z, P, Z, Z, Z, M, Z, Z, Z, M, Z, Z, Z, P, Z, Z, Z,
        // +1..+26
        Z, Z, Z, M, Z, Z, Z, M, Z, Z, Z, P, Z, Z, Z, P, Z, Z, Z, P, Z, Z, Z, P, Z, Z,
    ];
    let scale = (13.0f64 / 6.0).sqrt();
    pattern.map(|tone| tone * scale)
});

/// Long training sequence, frequency domain, tones −26..+26 without DC
/// (17.3.3, Equation 17-11).
pub static FREQUENCY_DOMAIN_LTF: LazyLock<[Complex64; 52]> = LazyLock::new(|| {
    let pattern: [f64; 52] = [
        // −26..−1
        1.0, 1.0, -1.0, -1.0, 1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, -1.0,
        -1.0, 1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 1.0, 1.0, 1.0,
        // +1..+26
        1.0, -1.0, -1.0, 1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0, -1.0, -1.0, -1.0, -1.0, 1.0, 1.0,
        -1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 1.0, 1.0, 1.0,
    ];
    pattern.map(|tone| Complex64::new(tone, 0.0))
});

/// WEP-40 key table for the shared-key authentication simulation. Never a
/// security mechanism: both ends of a healthy link hold identical copies and
/// a frame carries the index of the key in use.
pub const WEP_KEYS: [[u8; 5]; 4] = [
    [0x4B, 0x65, 0x79, 0x30, 0x31],
    [0xA7, 0x12, 0x3F, 0x08, 0xD5],
    [0x5C, 0xE2, 0x91, 0x6A, 0x0B],
    [0x33, 0xC8, 0x47, 0xFE, 0x19],
];

/// Defaults for the MAC timing and threshold parameters.
pub mod recommended {
    use core::time::Duration;

    /// Well-known port of the shared channel server.
    pub const CHANNEL_PORT: u16 = 65535;
    pub const SHORT_RETRY_LIMIT: u32 = 7;
    pub const AUTHENTICATION_ATTEMPTS: u32 = 3;
    /// dot11RTSThreshold default: payloads of this many octets or more are
    /// preceded by an RTS/CTS exchange.
    pub const RTS_CTS_THRESHOLD: usize = 2347;
    pub const BEACON_BROADCAST_INTERVAL: Duration = Duration::from_secs(2);
    pub const PASSIVE_SCANNING_TIME: Duration = Duration::from_secs(3);
    pub const PROBE_REQUEST_BROADCAST_INTERVAL: Duration = Duration::from_secs(3);
    /// Fixed sleep before each non-ACK transmission, standing in for the
    /// CSMA/CA contention window.
    pub const CONTENTION_WAIT: Duration = Duration::from_millis(500);
    /// Wait per ACK polling attempt.
    pub const ACK_RESPONSE_WAIT: Duration = Duration::from_millis(750);
    pub const TX_PUMP_POLL: Duration = Duration::from_millis(25);
}

/// MAC timing and threshold parameters.
///
/// The defaults are scaled for simulation wall-clock so that a full
/// scan/authenticate/associate exchange completes within seconds.
#[derive(Debug, Clone, Copy)]
pub struct Parameters {
    /// ACK polling attempts before a frame is dropped.
    pub short_retry_limit: u32,
    /// Consecutive authentication failures before an AP is blacklisted.
    pub authentication_attempts: u32,
    /// Data payload size, in octets, from which RTS/CTS gating engages.
    pub rts_cts_threshold: usize,
    pub beacon_broadcast_interval: Duration,
    pub passive_scanning_time: Duration,
    pub probe_request_broadcast_interval: Duration,
    pub contention_wait: Duration,
    pub ack_response_wait: Duration,
    pub tx_pump_poll: Duration,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            short_retry_limit: recommended::SHORT_RETRY_LIMIT,
            authentication_attempts: recommended::AUTHENTICATION_ATTEMPTS,
            rts_cts_threshold: recommended::RTS_CTS_THRESHOLD,
            beacon_broadcast_interval: recommended::BEACON_BROADCAST_INTERVAL,
            passive_scanning_time: recommended::PASSIVE_SCANNING_TIME,
            probe_request_broadcast_interval: recommended::PROBE_REQUEST_BROADCAST_INTERVAL,
            contention_wait: recommended::CONTENTION_WAIT,
            ack_response_wait: recommended::ACK_RESPONSE_WAIT,
            tx_pump_poll: recommended::TX_PUMP_POLL,
        }
    }
}
