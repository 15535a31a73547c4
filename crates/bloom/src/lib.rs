//! # Bloom Filter Policy
//!
//! A space-efficient probabilistic structure for set membership testing,
//! exposed to the table layer through the [`FilterPolicy`] capability trait.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the set
//! (no false negatives), but may occasionally report that a key **is** in the
//! set when it isn't (false positives). With 10 bits per key the false
//! positive rate is roughly 1%.
//!
//! ## Usage in RiptideKV
//!
//! Every sorted table embeds one filter block. The filter block groups keys
//! by data offset and asks the policy to build one filter per group; point
//! lookups consult the matching filter before touching the data block.
//!
//! ## Serialized Filter
//!
//! ```text
//! [bit array: ceil(n * bits_per_key / 8) bytes][k: u8]
//! ```
//!
//! The hash count `k` travels with the filter so readers never depend on the
//! writer's configuration.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bloom::{BloomFilterPolicy, FilterPolicy};
//!
//! let policy = BloomFilterPolicy::new(10);
//! let mut filter = Vec::new();
//! policy.create_filter(&[b"hello".as_slice()], &mut filter);
//! assert!(policy.key_may_match(b"hello", &filter));
//! ```

/// Capability interface for per-group key filters.
///
/// Implementations must never produce false negatives: every key passed to
/// [`create_filter`](FilterPolicy::create_filter) must later make
/// [`key_may_match`](FilterPolicy::key_may_match) return `true`.
pub trait FilterPolicy: Send + Sync {
    /// Stable name, used for diagnostics.
    fn name(&self) -> &str;

    /// Appends a filter summarizing `keys` to `dst`.
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    /// Returns `false` only if `key` was definitely not in the set that built
    /// `filter`.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// Upper bound on hashes per key; filters declaring more are treated as
/// produced by a future encoding and always match.
const MAX_HASHES: u8 = 30;

/// Bloom filter policy with a fixed bits-per-key budget.
///
/// Uses double hashing: `h(i) = h1 + i * h2` where `h1` and `h2` are derived
/// from FNV-1a with two different seeds and then mixed.
#[derive(Debug, Clone, Copy)]
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    num_hashes: u8,
}

impl BloomFilterPolicy {
    /// Creates a policy spending `bits_per_key` bits on each key.
    ///
    /// # Panics
    ///
    /// Panics if `bits_per_key` is 0.
    pub fn new(bits_per_key: usize) -> Self {
        assert!(bits_per_key > 0, "bits_per_key must be > 0");

        // Optimal number of hashes: k = bits_per_key * ln(2)
        let k = (bits_per_key as f64 * std::f64::consts::LN_2) as usize;
        let k = k.clamp(1, MAX_HASHES as usize) as u8;

        Self {
            bits_per_key,
            num_hashes: k,
        }
    }

    /// Returns the configured bits-per-key budget.
    #[must_use]
    pub fn bits_per_key(&self) -> usize {
        self.bits_per_key
    }

    /// Returns the number of hash functions per key.
    #[must_use]
    pub fn num_hashes(&self) -> u8 {
        self.num_hashes
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &str {
        "riptide.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        // Very small key sets would give a high false positive rate, so
        // enforce a minimum filter length.
        let bits = (keys.len() * self.bits_per_key).max(64);
        let bytes = (bits + 7) / 8;
        let bits = (bytes * 8) as u64;

        let start = dst.len();
        dst.resize(start + bytes, 0);
        dst.push(self.num_hashes);

        let array = &mut dst[start..start + bytes];
        for key in keys {
            let (h1, h2) = hash_pair(key);
            for i in 0..self.num_hashes {
                let bit = bit_index(h1, h2, i, bits);
                array[(bit / 8) as usize] |= 1 << (bit % 8);
            }
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            // Too short to have been built by `create_filter`.
            return true;
        }
        let bytes = filter.len() - 1;
        let bits = (bytes * 8) as u64;
        let k = filter[bytes];
        if k > MAX_HASHES {
            return true;
        }

        let (h1, h2) = hash_pair(key);
        for i in 0..k {
            let bit = bit_index(h1, h2, i, bits);
            if filter[(bit / 8) as usize] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }
}

// ---- Internal helpers ----

/// Double hashing: h(i) = (h1 + i * h2) mod bits.
fn bit_index(h1: u64, h2: u64, i: u8, bits: u64) -> u64 {
    h1.wrapping_add((i as u64).wrapping_mul(h2)) % bits
}

/// Computes two independent 64-bit hashes using FNV-1a with different seeds.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    let h1 = mix64(fnv1a_64(key, 0xcbf29ce484222325));
    let h2 = mix64(fnv1a_64(key, 0x517cc1b727220a95)) | 1;
    (h1, h2)
}

/// FNV-1a 64-bit hash with a configurable starting basis.
fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x00000100000001b3;
    let mut hash = basis;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// 64-bit finalizer; FNV alone leaves the low bits of short keys correlated.
fn mix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h
}
