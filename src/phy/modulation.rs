//! Gray-coded sub-carrier modulation mapping and hard-decision demapping
//! (17.3.5.8).

use num_complex::Complex64;

use crate::parameters::Modulation;

// Constellation axis levels indexed by the Gray-coded bit group value.
const QAM16_LEVELS: [f64; 4] = [-3.0, -1.0, 3.0, 1.0];
const QAM64_LEVELS: [f64; 8] = [-7.0, -5.0, -1.0, -3.0, 7.0, 5.0, 1.0, 3.0];

// Ascending axis levels and the Gray code of each, for nearest-level
// demapping.
const QAM16_AXIS: [f64; 4] = [-3.0, -1.0, 1.0, 3.0];
const QAM16_GRAY: [[u8; 2]; 4] = [[0, 0], [0, 1], [1, 1], [1, 0]];
const QAM64_AXIS: [f64; 8] = [-7.0, -5.0, -3.0, -1.0, 1.0, 3.0, 5.0, 7.0];
const QAM64_GRAY: [[u8; 3]; 8] = [
    [0, 0, 0],
    [0, 0, 1],
    [0, 1, 1],
    [0, 1, 0],
    [1, 1, 0],
    [1, 1, 1],
    [1, 0, 1],
    [1, 0, 0],
];

const QPSK_NORM: f64 = std::f64::consts::FRAC_1_SQRT_2;

fn qam16_norm() -> f64 {
    1.0 / 10.0f64.sqrt()
}

fn qam64_norm() -> f64 {
    1.0 / 42.0f64.sqrt()
}

/// Map interleaved coded bits onto constellation points, `n_bpsc` bits per
/// sub-carrier.
pub fn map_bits(bits: &[u8], modulation: Modulation) -> Vec<Complex64> {
    match modulation {
        Modulation::Bpsk => bits
            .iter()
            .map(|&b| Complex64::new(f64::from(b) * 2.0 - 1.0, 0.0))
            .collect(),
        Modulation::Qpsk => bits
            .chunks_exact(2)
            .map(|b| {
                Complex64::new(f64::from(b[0]) * 2.0 - 1.0, f64::from(b[1]) * 2.0 - 1.0)
                    * QPSK_NORM
            })
            .collect(),
        Modulation::Qam16 => {
            let norm = qam16_norm();
            bits.chunks_exact(4)
                .map(|b| {
                    Complex64::new(
                        QAM16_LEVELS[usize::from(2 * b[0] + b[1])],
                        QAM16_LEVELS[usize::from(2 * b[2] + b[3])],
                    ) * norm
                })
                .collect()
        }
        Modulation::Qam64 => {
            let norm = qam64_norm();
            bits.chunks_exact(6)
                .map(|b| {
                    Complex64::new(
                        QAM64_LEVELS[usize::from(4 * b[0] + 2 * b[1] + b[2])],
                        QAM64_LEVELS[usize::from(4 * b[3] + 2 * b[4] + b[5])],
                    ) * norm
                })
                .collect()
        }
    }
}

fn nearest(value: f64, axis: &[f64], norm: f64) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (index, level) in axis.iter().enumerate() {
        let distance = (value - level * norm).abs();
        if distance < best_distance {
            best_distance = distance;
            best = index;
        }
    }
    best
}

/// Hard-decision demap equalized sub-carriers back to interleaved bits.
pub fn demap(symbols: &[Complex64], modulation: Modulation) -> Vec<u8> {
    let mut bits = Vec::with_capacity(symbols.len() * modulation.bits_per_subcarrier());
    match modulation {
        Modulation::Bpsk => {
            for symbol in symbols {
                bits.push(u8::from(symbol.re >= 0.0));
            }
        }
        Modulation::Qpsk => {
            for symbol in symbols {
                bits.push(u8::from(symbol.re >= 0.0));
                bits.push(u8::from(symbol.im >= 0.0));
            }
        }
        Modulation::Qam16 => {
            let norm = qam16_norm();
            for symbol in symbols {
                bits.extend_from_slice(&QAM16_GRAY[nearest(symbol.re, &QAM16_AXIS, norm)]);
                bits.extend_from_slice(&QAM16_GRAY[nearest(symbol.im, &QAM16_AXIS, norm)]);
            }
        }
        Modulation::Qam64 => {
            let norm = qam64_norm();
            for symbol in symbols {
                bits.extend_from_slice(&QAM64_GRAY[nearest(symbol.re, &QAM64_AXIS, norm)]);
                bits.extend_from_slice(&QAM64_GRAY[nearest(symbol.im, &QAM64_AXIS, norm)]);
            }
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_then_demap_is_identity() {
        for modulation in [
            Modulation::Bpsk,
            Modulation::Qpsk,
            Modulation::Qam16,
            Modulation::Qam64,
        ] {
            let n = modulation.bits_per_subcarrier() * 48;
            let bits: Vec<u8> = (0..n).map(|i| ((i * 13) % 11 < 5) as u8).collect();
            let symbols = map_bits(&bits, modulation);
            assert_eq!(symbols.len(), 48);
            assert_eq!(demap(&symbols, modulation), bits, "{modulation:?}");
        }
    }

    #[test]
    fn constellations_are_unit_average_power() {
        for modulation in [Modulation::Qpsk, Modulation::Qam16, Modulation::Qam64] {
            let n = modulation.bits_per_subcarrier() * 256;
            let bits: Vec<u8> = (0..n).map(|_| rand::random::<bool>() as u8).collect();
            let symbols = map_bits(&bits, modulation);
            let power: f64 =
                symbols.iter().map(|s| s.norm_sqr()).sum::<f64>() / symbols.len() as f64;
            assert!((power - 1.0).abs() < 0.2, "{modulation:?} power {power}");
        }
    }
}
