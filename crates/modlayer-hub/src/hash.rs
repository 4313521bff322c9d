//! Deterministic hashing for content fingerprints and staleness keys
//!
//! Unlike `std::collections::hash_map::DefaultHasher`, which uses random keys,
//! these functions produce the same output for the same input across runs and
//! platforms, so fingerprints can be persisted and compared later.
//!
//! ```
//! use modlayer_hub::hash::{hash_sequence, DEFAULT_SEED};
//!
//! let a = hash_sequence(["mod1", "mod2"], DEFAULT_SEED);
//! let b = hash_sequence(["mod2", "mod1"], DEFAULT_SEED);
//! assert_ne!(a, b); // order-sensitive
//! ```

/// FNV-1a offset basis, used as the default seed
pub const DEFAULT_SEED: u64 = 0xcbf2_9ce4_8422_2325;

const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Hash a byte slice with a seed (FNV-1a, seed as the initial state)
pub fn hash_bytes_with_seed(bytes: &[u8], seed: u64) -> u64 {
    let mut h = seed;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Hash a string with the default seed
pub fn hash_str(value: &str) -> u64 {
    hash_bytes_with_seed(value.as_bytes(), DEFAULT_SEED)
}

/// Hash an ordered sequence of strings
///
/// Each element is length-prefixed, so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn hash_sequence<I, S>(items: I, seed: u64) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut h = seed;
    for item in items {
        let bytes = item.as_ref().as_bytes();
        h = hash_bytes_with_seed(&(bytes.len() as u64).to_le_bytes(), h);
        h = hash_bytes_with_seed(bytes, h);
    }
    h
}

/// Hex fingerprint of `text`, suitable for a definition's `content_sha`
pub fn content_fingerprint(text: &str) -> String {
    format!("{:016x}", hash_str(text))
}
