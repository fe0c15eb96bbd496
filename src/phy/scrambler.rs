//! Length-127 PPDU-synchronous scrambler (17.3.5.5).
//!
//! The generator is x⁷ + x⁴ + 1: the feedback bit is x7 XOR x4 of the shift
//! register, and the output equals the feedback. Descrambling is the same
//! XOR with the same seed.

/// Generate `length` bits from the 7-bit non-zero `seed`.
///
/// Seed bit `i` loads shift-register stage `i`; only the low seven bits are
/// used.
pub fn lfsr_sequence(length: usize, seed: u8) -> Vec<u8> {
    let mut state = seed & 0x7F;
    let mut sequence = Vec::with_capacity(length);
    for _ in 0..length {
        let feedback = ((state >> 6) ^ (state >> 3)) & 1;
        sequence.push(feedback);
        state = ((state << 1) | feedback) & 0x7F;
    }
    sequence
}

/// XOR `bits` with the scrambler `sequence`, element-wise.
pub fn apply(bits: &[u8], sequence: &[u8]) -> Vec<u8> {
    bits.iter().zip(sequence).map(|(b, s)| b ^ s).collect()
}

/// Search 1..=127 for the seed whose first 16 output bits equal the received
/// SERVICE field. The transmitted SERVICE field is all zero, so the decoded
/// SERVICE bits are the scrambler output itself.
pub fn find_seed(service: &[u8]) -> Option<u8> {
    (1..=127).find(|&seed| lfsr_sequence(service.len(), seed) == service)
}

/// Pilot polarity sequence p₀..p₁₂₆: the scrambler run from the all-ones
/// seed with 0 mapped to +1 and 1 mapped to −1 (17.3.5.10). p₀ multiplies
/// the SIGNAL pilots, p₁ onward the DATA symbols.
pub fn pilot_polarity() -> [f64; 127] {
    let mut polarity = [1.0; 127];
    for (slot, bit) in polarity.iter_mut().zip(lfsr_sequence(127, 127)) {
        *slot = if bit == 0 { 1.0 } else { -1.0 };
    }
    polarity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_cycle_is_127() {
        let one = lfsr_sequence(127, 45);
        let two = lfsr_sequence(254, 45);
        assert_eq!(two[..127], one[..]);
        assert_eq!(two[127..], one[..]);
    }

    #[test]
    fn scramble_is_self_inverse() {
        for seed in [1u8, 17, 93, 127] {
            let bits: Vec<u8> = (0..240).map(|i| ((i * 7) % 3 == 0) as u8).collect();
            let sequence = lfsr_sequence(bits.len(), seed);
            let scrambled = apply(&bits, &sequence);
            assert_eq!(apply(&scrambled, &sequence), bits);
        }
    }

    #[test]
    fn seed_recovered_from_service_field() {
        for seed in 1..=127 {
            let service = lfsr_sequence(16, seed);
            assert_eq!(find_seed(&service), Some(seed));
        }
    }

    #[test]
    fn all_ones_polarity_starts_positive() {
        // First feedback of the all-ones state is 1^1 = 0, mapped to +1.
        assert_eq!(pilot_polarity()[0], 1.0);
    }
}
