//! WEP-style challenge encryption for shared-key authentication: RC4 keyed
//! with IV ∥ WEP-40 key. An obsolete mechanism, present only because the
//! authentication exchange transports it; decryption is the same keystream
//! XOR.

use rc4::consts::U8;
use rc4::{KeyInit, Rc4, StreamCipher};

pub const IV_LEN: usize = 3;
pub const KEY_LEN: usize = 5;

/// XOR `data` with the RC4 keystream seeded by `iv ∥ key`, in place.
pub fn apply_keystream(iv: &[u8; IV_LEN], key: &[u8; KEY_LEN], data: &mut [u8]) {
    let mut seed = [0u8; IV_LEN + KEY_LEN];
    seed[..IV_LEN].copy_from_slice(iv);
    seed[IV_LEN..].copy_from_slice(key);
    let mut cipher = Rc4::<U8>::new(&seed.into());
    cipher.apply_keystream(data);
}

/// Encrypt (or decrypt) a copy of `challenge`.
pub fn apply(iv: &[u8; IV_LEN], key: &[u8; KEY_LEN], challenge: &[u8]) -> Vec<u8> {
    let mut out = challenge.to_vec();
    apply_keystream(iv, key, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_is_identity() {
        let iv = [0x01, 0x02, 0x03];
        let key = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE];
        let challenge: Vec<u8> = (0..128).map(|i| (i * 7) as u8).collect();
        let encrypted = apply(&iv, &key, &challenge);
        assert_ne!(encrypted, challenge);
        assert_eq!(apply(&iv, &key, &encrypted), challenge);
    }

    #[test]
    fn different_keys_disagree() {
        let iv = [9, 9, 9];
        let challenge = [0u8; 32];
        let a = apply(&iv, &[1, 2, 3, 4, 5], &challenge);
        let b = apply(&iv, &[5, 4, 3, 2, 1], &challenge);
        assert_ne!(a, b);
    }
}
