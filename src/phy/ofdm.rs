//! OFDM symbol shaping: tone placement, 64-point IFFT/FFT, cyclic
//! extension, windowing, the training fields, frame detection and channel
//! estimation (17.3.3, 17.3.5.9, 17.3.5.10).

use std::sync::{Arc, LazyLock};

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use crate::parameters::{
    FRAME_DETECTION_THRESHOLD, FREQUENCY_DOMAIN_LTF, FREQUENCY_DOMAIN_STF, PILOT_INDICES,
};

const FFT_SIZE: usize = 64;
/// Guard-interval length of SIGNAL and DATA symbols.
pub const GI: usize = 16;
/// Samples per SIGNAL/DATA symbol on the air, overlap sample excluded.
pub const SYMBOL_LEN: usize = 80;
/// Samples of the full preamble (STF ∥ LTF), trailing overlap included.
pub const PREAMBLE_LEN: usize = 321;

static FFT_FORWARD: LazyLock<Arc<dyn Fft<f64>>> =
    LazyLock::new(|| FftPlanner::<f64>::new().plan_fft_forward(FFT_SIZE));
static FFT_INVERSE: LazyLock<Arc<dyn Fft<f64>>> =
    LazyLock::new(|| FftPlanner::<f64>::new().plan_fft_inverse(FFT_SIZE));

/// Quantize to three decimal places per component, the resolution every
/// sample keeps on the air.
pub fn round3(sample: Complex64) -> Complex64 {
    Complex64::new(
        (sample.re * 1000.0).round() / 1000.0,
        (sample.im * 1000.0).round() / 1000.0,
    )
}

/// Kind of field being shaped; selects the cyclic extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Ten short symbols: two full repetitions plus a third of half length
    /// and the overlap sample.
    Stf,
    /// Double guard interval, two long symbols, overlap sample.
    Ltf,
    /// Single guard interval plus overlap sample.
    Signal,
    Data,
}

/// Place the 52 tones (−26..+26 without DC) into the 64 IFFT bins, transform,
/// cyclically extend per `kind`, and apply the 0.5 edge window weights.
pub fn to_time_domain(tones: &[Complex64], kind: FieldKind) -> Vec<Complex64> {
    debug_assert_eq!(tones.len(), 52);
    let mut bins = [Complex64::default(); FFT_SIZE];
    // Positive tones +1..+26 into bins 1..27, negative −26..−1 into 38..64.
    bins[1..27].copy_from_slice(&tones[26..]);
    bins[38..].copy_from_slice(&tones[..26]);

    FFT_INVERSE.process(&mut bins);
    let base: Vec<Complex64> = bins
        .iter()
        .map(|&v| round3(v / FFT_SIZE as f64))
        .collect();

    let mut samples = match kind {
        FieldKind::Stf => {
            let mut s = Vec::with_capacity(161);
            s.extend_from_slice(&base);
            s.extend_from_slice(&base);
            s.extend_from_slice(&base[..33]);
            s
        }
        FieldKind::Ltf => {
            let mut s = Vec::with_capacity(161);
            s.extend_from_slice(&base[FFT_SIZE - 32..]);
            s.extend_from_slice(&base);
            s.extend_from_slice(&base);
            s.push(base[0]);
            s
        }
        FieldKind::Signal | FieldKind::Data => {
            let mut s = Vec::with_capacity(SYMBOL_LEN + 1);
            s.extend_from_slice(&base[FFT_SIZE - GI..]);
            s.extend_from_slice(&base);
            s.push(base[0]);
            s
        }
    };

    let last = samples.len() - 1;
    samples[0] *= 0.5;
    samples[last] *= 0.5;
    samples
}

/// FFT the trailing 64 samples of one received symbol and return the 52
/// tones in −26..+26 order (DC dropped).
pub fn to_frequency_domain(samples: &[Complex64]) -> Vec<Complex64> {
    debug_assert!(samples.len() >= FFT_SIZE);
    let mut bins = [Complex64::default(); FFT_SIZE];
    bins.copy_from_slice(&samples[samples.len() - FFT_SIZE..]);
    FFT_FORWARD.process(&mut bins);

    let mut tones = Vec::with_capacity(52);
    tones.extend_from_slice(&bins[38..]);
    tones.extend_from_slice(&bins[1..27]);
    tones
}

/// Interleave the four pilot tones, `(1, 1, 1, −1) × polarity`, among 48
/// modulated data sub-carriers.
pub fn insert_pilots(data: &[Complex64], polarity: f64) -> Vec<Complex64> {
    debug_assert_eq!(data.len(), 48);
    let pilots = [polarity, polarity, polarity, -polarity];
    let mut tones = Vec::with_capacity(52);
    let mut next_pilot = 0;
    let mut next_data = 0;
    for index in 0..52 {
        if PILOT_INDICES.contains(&index) {
            tones.push(Complex64::new(pilots[next_pilot], 0.0));
            next_pilot += 1;
        } else {
            tones.push(data[next_data]);
            next_data += 1;
        }
    }
    tones
}

/// Divide each tone by the channel estimate and drop the pilot positions.
pub fn equalize(tones: &[Complex64], estimate: &[Complex64]) -> Vec<Complex64> {
    debug_assert_eq!(tones.len(), 52);
    tones
        .iter()
        .zip(estimate)
        .enumerate()
        .filter(|(index, _)| !PILOT_INDICES.contains(index))
        .map(|(_, (tone, h))| tone / h)
        .collect()
}

/// Precomputed time-domain short training field, 161 samples.
pub fn time_domain_stf() -> &'static [Complex64] {
    static STF: LazyLock<Vec<Complex64>> =
        LazyLock::new(|| to_time_domain(&*FREQUENCY_DOMAIN_STF, FieldKind::Stf));
    &STF
}

/// Precomputed time-domain long training field, 161 samples.
pub fn time_domain_ltf() -> &'static [Complex64] {
    static LTF: LazyLock<Vec<Complex64>> =
        LazyLock::new(|| to_time_domain(&*FREQUENCY_DOMAIN_LTF, FieldKind::Ltf));
    &LTF
}

/// STF and LTF joined with the single-sample overlap, 321 samples.
pub fn preamble() -> Vec<Complex64> {
    let stf = time_domain_stf();
    let ltf = time_domain_ltf();
    let mut samples = Vec::with_capacity(PREAMBLE_LEN);
    samples.extend_from_slice(&stf[..stf.len() - 1]);
    samples.push(stf[stf.len() - 1] + ltf[0]);
    samples.extend_from_slice(&ltf[1..]);
    samples
}

/// Matched-filter the received buffer against the time-reversed STF and
/// return the peak index, or `None` when the peak magnitude stays under the
/// detection threshold.
pub fn detect_frame(samples: &[Complex64]) -> Option<usize> {
    let template = time_domain_stf();
    let n = template.len();
    if samples.len() < n {
        return None;
    }

    let mut best_index = 0;
    let mut best_magnitude = -1.0f64;
    for offset in 0..=samples.len() - n {
        let mut acc = Complex64::default();
        for (m, &tap) in template.iter().enumerate() {
            acc += samples[offset + n - 1 - m] * tap;
        }
        let magnitude = acc.norm();
        if magnitude > best_magnitude {
            best_magnitude = magnitude;
            best_index = offset;
        }
    }

    (best_magnitude >= FRAME_DETECTION_THRESHOLD).then_some(best_index)
}

/// Per-sub-carrier complex response from the received LTF: FFT of the second
/// long symbol divided by the known pattern, with near-zero values clamped to
/// a small real epsilon before they can blow up the equalizer.
pub fn estimate_channel(ltf_samples: &[Complex64]) -> Vec<Complex64> {
    const EPSILON: f64 = 1e-10;
    to_frequency_domain(ltf_samples)
        .iter()
        .zip(FREQUENCY_DOMAIN_LTF.iter())
        .map(|(received, reference)| {
            let h = received / reference;
            if h.norm() < EPSILON {
                Complex64::new(EPSILON, 0.0)
            } else {
                h
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_fields_are_161_samples_with_half_edges() {
        for field in [time_domain_stf(), time_domain_ltf()] {
            assert_eq!(field.len(), 161);
        }
        // The STF repeats with period 16 inside its unwindowed run.
        let stf = time_domain_stf();
        for n in 1..100 {
            assert!((stf[n] - stf[n + 16]).norm() < 1e-9);
        }
    }

    #[test]
    fn time_frequency_roundtrip_recovers_tones() {
        let tones: Vec<Complex64> = (0..52)
            .map(|i| Complex64::new(((i % 2) as f64) * 2.0 - 1.0, 0.0))
            .collect();
        let symbol = to_time_domain(&tones, FieldKind::Data);
        // Body samples GI..GI+64 avoid the windowed edges.
        let recovered = to_frequency_domain(&symbol[GI..GI + FFT_SIZE]);
        for (a, b) in recovered.iter().zip(&tones) {
            assert!((a - b).norm() < 0.05);
        }
    }

    #[test]
    fn clean_preamble_detects_at_zero() {
        let p = preamble();
        assert_eq!(detect_frame(&p), Some(0));
    }

    #[test]
    fn noise_alone_is_idle() {
        let noise: Vec<Complex64> = (0..500)
            .map(|i| Complex64::new(((i % 7) as f64 - 3.0) * 0.01, ((i % 5) as f64 - 2.0) * 0.01))
            .collect();
        assert_eq!(detect_frame(&noise), None);
    }

    #[test]
    fn identity_channel_estimates_near_unity() {
        let ltf = time_domain_ltf();
        let estimate = estimate_channel(&ltf[..160]);
        for h in estimate {
            assert!((h - Complex64::new(1.0, 0.0)).norm() < 0.05, "{h}");
        }
    }
}
