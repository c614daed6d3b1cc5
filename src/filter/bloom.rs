//! Fixed-size bloom filter with double hashing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const LN2: f64 = std::f64::consts::LN_2;

/// Highest false-positive target a filter is built for.
pub const MAX_FP_RATE: f64 = 0.5;

/// A classic bloom filter sized for `capacity` items at `fp_rate`.
///
/// Tracks the number of set bits so the element count can be estimated
/// without a separate counter.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    words: Vec<u64>,
    bits: u64,
    hashes: u32,
    set_bits: u64,
    capacity: u64,
    fp_rate: f64,
}

impl BloomFilter {
    /// Allocate a filter for `capacity` items at false-positive target `fp_rate`.
    ///
    /// `capacity` is clamped to at least 1 and `fp_rate` into `(0, MAX_FP_RATE]`.
    pub fn with_capacity(capacity: u64, fp_rate: f64) -> Self {
        let capacity = capacity.max(1);
        let fp_rate = fp_rate.clamp(f64::MIN_POSITIVE, MAX_FP_RATE);
        let bits = optimal_bits(capacity, fp_rate);
        let hashes = optimal_hashes(bits, capacity);
        let words = vec![0u64; bits.div_ceil(64) as usize];
        Self {
            words,
            bits,
            hashes,
            set_bits: 0,
            capacity,
            fp_rate,
        }
    }

    /// Insert an item. Returns `true` if at least one new bit was set.
    pub fn insert(&mut self, item: &str) -> bool {
        let mut changed = false;
        for idx in self.indexes(item) {
            let (word, mask) = locate(idx);
            if self.words[word] & mask == 0 {
                self.words[word] |= mask;
                self.set_bits += 1;
                changed = true;
            }
        }
        changed
    }

    /// `false` means definitely absent; `true` means possibly present.
    pub fn contains(&self, item: &str) -> bool {
        self.indexes(item).all(|idx| {
            let (word, mask) = locate(idx);
            self.words[word] & mask != 0
        })
    }

    /// Estimated number of distinct inserted items, `-(m/k) ln(1 - X/m)`.
    pub fn estimated_items(&self) -> f64 {
        if self.set_bits >= self.bits {
            return f64::INFINITY;
        }
        let m = self.bits as f64;
        let x = self.set_bits as f64;
        -(m / self.hashes as f64) * (1.0 - x / m).ln()
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn hashes(&self) -> u32 {
        self.hashes
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn fp_rate(&self) -> f64 {
        self.fp_rate
    }

    pub fn set_bits(&self) -> u64 {
        self.set_bits
    }

    // Kirsch-Mitzenmacher: g_i(x) = h1(x) + i * h2(x) mod m
    fn indexes(&self, item: &str) -> impl Iterator<Item = u64> + use<> {
        let h1 = seeded_hash(item, 0x9e37_79b9_7f4a_7c15);
        let h2 = seeded_hash(item, 0xc2b2_ae3d_27d4_eb4f) | 1;
        let bits = self.bits;
        (0..self.hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % bits)
    }
}

/// `m = ceil(-n ln p / (ln 2)^2)`
pub fn optimal_bits(capacity: u64, fp_rate: f64) -> u64 {
    let n = capacity.max(1) as f64;
    let m = (-n * fp_rate.ln() / (LN2 * LN2)).ceil();
    (m as u64).max(1)
}

/// `k = max(1, ceil((m / n) ln 2))`
pub fn optimal_hashes(bits: u64, capacity: u64) -> u32 {
    let k = ((bits as f64 / capacity.max(1) as f64) * LN2).ceil();
    (k as u32).max(1)
}

fn seeded_hash(item: &str, seed: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    item.hash(&mut hasher);
    hasher.finish()
}

fn locate(idx: u64) -> (usize, u64) {
    ((idx / 64) as usize, 1u64 << (idx % 64))
}
