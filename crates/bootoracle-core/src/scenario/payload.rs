//! Deterministic test payloads.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::definition::PayloadPattern;

/// Builds `size` bytes of `pattern`.
///
/// Every pattern is reproducible: the same arguments always give the same
/// bytes, so a failing run can be replayed.
#[must_use]
pub fn generate_payload(pattern: PayloadPattern, size: usize, seed: u64) -> Vec<u8> {
    match pattern {
        PayloadPattern::Incremental => (0..size).map(|i| (i % 256) as u8).collect(),
        PayloadPattern::Alternating => {
            (0..size).map(|i| if i % 2 == 0 { 0xAA } else { 0x55 }).collect()
        },
        PayloadPattern::SeededRandom => {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut payload = vec![0; size];
            rng.fill_bytes(&mut payload);
            payload
        },
    }
}
