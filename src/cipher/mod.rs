//! Keystream obfuscation for argument stub payloads.
//!
//! This is not encryption in any cryptographic sense.  It hides plaintext
//! byte patterns behind a keyed, per-byte transform that the native runtime
//! can undo in a few instructions:
//!
//! ```text
//! encode: b ^= s; b = rotl(b, s % 8); b ^= key[i]; b += (ctr ^ s); b = rotr(b, s % 8)
//! decode: b = rotl(b, s % 8); b -= (ctr ^ s); b ^= key[i]; b = rotr(b, s % 8); b ^= s
//! ```
//!
//! After every byte, in both directions, `i` steps through the 32-byte key,
//! `ctr` increments and `s` advances by one xorshift step.
//!
//! # Profiles
//! `s` and `ctr` are read from the start of the key as 32-bit words
//! ([`CipherProfile::Word32`], what the runtime loader implements) or as
//! 64-bit words ([`CipherProfile::Word64`]).  The profiles are not
//! wire-compatible with each other.

use serde::{Deserialize, Serialize};

/// Byte length of the stub key.
pub const KEY_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CipherProfile {
    /// 32-bit state and counter, xorshift32 (13, 17, 5).
    #[default]
    Word32,
    /// 64-bit state and counter, xorshift64 (13, 7, 17).
    Word64,
}

impl CipherProfile {
    pub fn name(self) -> &'static str {
        match self {
            CipherProfile::Word32 => "word32",
            CipherProfile::Word64 => "word64",
        }
    }
}

/// Word type driving the keystream.
pub trait KeystreamWord: Copy {
    /// Read the word from the first `size_of::<Self>()` bytes of `bytes`.
    fn from_key(bytes: &[u8]) -> Self;
    fn xorshift(self) -> Self;
    fn wrapping_inc(self) -> Self;
    fn xor(self, other: Self) -> Self;
    fn low_byte(self) -> u8;
    /// `self mod m` for a small modulus.
    fn modulo(self, m: u8) -> usize;
}

impl KeystreamWord for u32 {
    fn from_key(bytes: &[u8]) -> Self {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
    fn xorshift(self) -> Self {
        let mut x = self;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        x
    }
    fn wrapping_inc(self) -> Self {
        self.wrapping_add(1)
    }
    fn xor(self, other: Self) -> Self {
        self ^ other
    }
    fn low_byte(self) -> u8 {
        self as u8
    }
    fn modulo(self, m: u8) -> usize {
        (self % m as u32) as usize
    }
}

impl KeystreamWord for u64 {
    fn from_key(bytes: &[u8]) -> Self {
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(word)
    }
    fn xorshift(self) -> Self {
        let mut x = self;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        x
    }
    fn wrapping_inc(self) -> Self {
        self.wrapping_add(1)
    }
    fn xor(self, other: Self) -> Self {
        self ^ other
    }
    fn low_byte(self) -> u8 {
        self as u8
    }
    fn modulo(self, m: u8) -> usize {
        (self % m as u64) as usize
    }
}

/// Rolling state of one encode or decode pass.  Build one per call and drop
/// it afterwards; a context is never reused across buffers.
#[derive(Debug, Clone)]
pub struct CipherContext<'k, W: KeystreamWord> {
    key:       &'k [u8; KEY_SIZE],
    state:     W,
    counter:   W,
    key_index: usize,
}

impl<'k, W: KeystreamWord> CipherContext<'k, W> {
    pub fn new(key: &'k [u8; KEY_SIZE]) -> Self {
        let width = std::mem::size_of::<W>();
        let state = W::from_key(&key[..width]);
        let counter = W::from_key(&key[width..2 * width]);
        Self {
            key,
            state,
            counter,
            key_index: state.modulo(KEY_SIZE as u8),
        }
    }

    fn rotation(&self) -> u32 {
        self.state.modulo(8) as u32
    }

    fn mask(&self) -> u8 {
        self.counter.xor(self.state).low_byte()
    }

    /// Step to the next byte position. Identical for both directions.
    fn advance(&mut self) {
        self.key_index = (self.key_index + 1) % KEY_SIZE;
        self.counter = self.counter.wrapping_inc();
        self.state = self.state.xorshift();
    }

    pub fn encrypt_byte(&mut self, byte: u8) -> u8 {
        let rotation = self.rotation();
        let mut b = byte ^ self.state.low_byte();
        b = b.rotate_left(rotation);
        b ^= self.key[self.key_index];
        b = b.wrapping_add(self.mask());
        b = b.rotate_right(rotation);
        self.advance();
        b
    }

    pub fn decrypt_byte(&mut self, byte: u8) -> u8 {
        let rotation = self.rotation();
        let mut b = byte.rotate_left(rotation);
        b = b.wrapping_sub(self.mask());
        b ^= self.key[self.key_index];
        b = b.rotate_right(rotation);
        b ^= self.state.low_byte();
        self.advance();
        b
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte = self.encrypt_byte(*byte);
        }
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte = self.decrypt_byte(*byte);
        }
    }
}

/// Obfuscate `data` in place with a fresh context derived from `key`.
pub fn encrypt(profile: CipherProfile, key: &[u8; KEY_SIZE], data: &mut [u8]) {
    match profile {
        CipherProfile::Word32 => CipherContext::<u32>::new(key).encrypt(data),
        CipherProfile::Word64 => CipherContext::<u64>::new(key).encrypt(data),
    }
}

/// Invert [`encrypt`] in place.
pub fn decrypt(profile: CipherProfile, key: &[u8; KEY_SIZE], data: &mut [u8]) {
    match profile {
        CipherProfile::Word32 => CipherContext::<u32>::new(key).decrypt(data),
        CipherProfile::Word64 => CipherContext::<u64>::new(key).decrypt(data),
    }
}
