//! Two-step block interleaver over one OFDM symbol (17.3.5.7).
//!
//! The first permutation maps adjacent coded bits onto nonadjacent
//! sub-carriers; the second alternates them between more and less significant
//! constellation bits.

use crate::parameters::Mcs;

/// Final position of each input bit: `out[map[k]] = in[k]`.
fn permutation(n_cbps: usize, n_bpsc: usize) -> Vec<usize> {
    let s = (n_bpsc / 2).max(1);
    (0..n_cbps)
        .map(|k| {
            let i = (n_cbps / 16) * (k % 16) + k / 16;
            s * (i / s) + (i + n_cbps - (16 * i) / n_cbps) % s
        })
        .collect()
}

/// Interleave one symbol of `mcs.n_cbps` coded bits.
pub fn interleave(bits: &[u8], mcs: &Mcs) -> Vec<u8> {
    let map = permutation(mcs.n_cbps, mcs.n_bpsc);
    let mut out = vec![0u8; bits.len()];
    for (k, &bit) in bits.iter().enumerate() {
        out[map[k]] = bit;
    }
    out
}

/// Invert [`interleave`] for one received symbol.
pub fn deinterleave(bits: &[u8], mcs: &Mcs) -> Vec<u8> {
    let map = permutation(mcs.n_cbps, mcs.n_bpsc);
    let mut out = vec![0u8; bits.len()];
    for (k, slot) in out.iter_mut().enumerate() {
        *slot = bits[map[k]];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PhyRate;

    #[test]
    fn interleave_then_deinterleave_is_identity_at_every_rate() {
        for rate in PhyRate::LADDER {
            let mcs = rate.mcs();
            let bits: Vec<u8> = (0..mcs.n_cbps).map(|i| ((i * 31) % 5 < 2) as u8).collect();
            assert_eq!(deinterleave(&interleave(&bits, mcs), mcs), bits, "{rate:?}");
        }
    }

    #[test]
    fn permutation_is_a_bijection() {
        for rate in PhyRate::LADDER {
            let mcs = rate.mcs();
            let mut seen = vec![false; mcs.n_cbps];
            for j in permutation(mcs.n_cbps, mcs.n_bpsc) {
                assert!(!seen[j]);
                seen[j] = true;
            }
        }
    }
}
