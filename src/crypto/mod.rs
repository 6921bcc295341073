//! PC1 (Pukall Cipher 1, 128-bit) and the content key it is keyed with.
//!
//! PC1 is an autokey stream cipher: every plaintext byte is folded back into
//! the key schedule, so the state after byte `n` depends on all earlier
//! plaintext. The same primitive unwraps DRM vouchers and deciphers text.
//!
//! State: eight 16-bit key words plus two running sums. Per byte:
//!
//! ```text
//! t = 0, x = 0
//! for j in 0..8:
//!     t ^= w[j]
//!     s2 = (s2 + j) * 20021 + s1
//!     s1 = t * 346
//!     s2 = s2 + s1
//!     t  = t * 20021 + 1
//!     x ^= t ^ s2
//! out = in ^ (x >> 8) ^ x          (low byte)
//! w[*] ^= plaintext * 257
//! ```
//!
//! All arithmetic wraps at 16 bits.

pub mod voucher;

use std::fmt;

pub const KEY_LEN: usize = 16;

/// Running PC1 state. Cloning forks the keystream.
#[derive(Clone)]
pub struct Pc1 {
    words: [u16; 8],
    sum1:  u16,
    sum2:  u16,
}

impl Pc1 {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let mut words = [0u16; 8];
        for (i, w) in words.iter_mut().enumerate() {
            *w = u16::from_be_bytes([key[i * 2], key[i * 2 + 1]]);
        }
        Self { words, sum1: 0, sum2: 0 }
    }

    #[inline]
    fn next_mask(&mut self) -> u8 {
        let mut temp: u16 = 0;
        let mut mask: u16 = 0;
        for (j, &word) in self.words.iter().enumerate() {
            temp ^= word;
            self.sum2 = self.sum2
                .wrapping_add(j as u16)
                .wrapping_mul(20021)
                .wrapping_add(self.sum1);
            self.sum1 = temp.wrapping_mul(346);
            self.sum2 = self.sum2.wrapping_add(self.sum1);
            temp = temp.wrapping_mul(20021).wrapping_add(1);
            mask ^= temp ^ self.sum2;
        }
        ((mask >> 8) ^ mask) as u8
    }

    #[inline]
    fn feed_back(&mut self, plain: u8) {
        let k = plain as u16 * 257;
        for w in &mut self.words {
            *w ^= k;
        }
    }

    pub fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.next_mask();
        self.feed_back(plain);
        plain
    }

    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.next_mask();
        self.feed_back(plain);
        cipher
    }

    pub fn decrypt_in_place(&mut self, data: &mut [u8]) {
        for b in data {
            *b = self.decrypt_byte(*b);
        }
    }

    pub fn encrypt_in_place(&mut self, data: &mut [u8]) {
        for b in data {
            *b = self.encrypt_byte(*b);
        }
    }
}

impl fmt::Debug for Pc1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pc1").finish_non_exhaustive()
    }
}

/// One-shot PC1 encryption with a fresh state.
pub fn pc1_encrypt(key: &[u8; KEY_LEN], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    Pc1::new(key).encrypt_in_place(&mut out);
    out
}

/// One-shot PC1 decryption with a fresh state.
pub fn pc1_decrypt(key: &[u8; KEY_LEN], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    Pc1::new(key).decrypt_in_place(&mut out);
    out
}

/// The book's 16-byte text key, recovered from a voucher.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey([u8; KEY_LEN]);

impl ContentKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn cipher(&self) -> Pc1 {
        Pc1::new(&self.0)
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(<redacted>)")
    }
}
