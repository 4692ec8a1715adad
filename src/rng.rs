//! Pluggable RNG source.
//!
//! The core depends only on the statistical quality and thread-safety of
//! `random_bytes`. External adjunct RNG sources are one possible
//! implementation of this trait; they are out of scope here.

use rand::{rngs::OsRng, RngCore};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Thread-safe source of random bytes. Concurrent callers must not collide
/// on token values.
pub trait RandomSource: Send + Sync {
    fn random_bytes(&self, n: usize) -> Vec<u8>;

    fn random_token_128(&self) -> [u8; 16] {
        let bytes = self.random_bytes(16);
        let mut out = [0u8; 16];
        out.copy_from_slice(&bytes);
        out
    }
}

/// Default system CSPRNG. `OsRng` draws from the OS entropy source and is
/// safe to share across threads without external synchronization.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRandomSource;

impl RandomSource for SystemRandomSource {
    fn random_bytes(&self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        OsRng.fill_bytes(&mut buf);
        buf
    }
}

/// Deterministic generator seeded from a tracking token. Used only by
/// `DeceptionFactory`, never by token generation itself — tokens always
/// come from a `RandomSource`.
pub struct SeededGenerator {
    rng: ChaCha8Rng,
}

impl SeededGenerator {
    /// The token's 16 bytes are expanded to a 32-byte seed by repeating
    /// them twice; `ChaCha8Rng` requires a full 32-byte seed and the token
    /// is already the sole source of entropy we want (same token, same
    /// stream), so padding with a fixed transform rather than extra
    /// randomness keeps generation reproducible.
    pub fn from_token(token: &crate::types::TrackingToken) -> Self {
        let mut seed = [0u8; 32];
        seed[..16].copy_from_slice(&token.0);
        seed[16..].copy_from_slice(&token.0);
        Self {
            rng: ChaCha8Rng::from_seed(seed),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    pub fn gen_range_usize(&mut self, lo: usize, hi_exclusive: usize) -> usize {
        if hi_exclusive <= lo {
            return lo;
        }
        let span = (hi_exclusive - lo) as u64;
        lo + (self.rng.next_u64() % span) as usize
    }

    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        let idx = self.gen_range_usize(0, items.len());
        &items[idx]
    }

    pub fn hex_string(&mut self, byte_len: usize) -> String {
        let mut buf = vec![0u8; byte_len];
        self.rng.fill_bytes(&mut buf);
        hex::encode(buf)
    }
}
