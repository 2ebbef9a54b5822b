//! Dense/sparse bitset over 64-bit column positions.

use std::collections::BTreeMap;

use shrike_common::Attrs;

/// A set of 64-bit column positions, stored as 64-bit words keyed by word
/// index. Sparse rows stay cheap; dense runs collapse into full words.
///
/// The popcount is cached: bit-level mutations maintain it incrementally,
/// set-algebra constructors leave it unset, and `invalidate_count` drops it
/// after in-place composition. `count` recomputes on demand.
#[derive(Debug, Clone, Default)]
pub struct Bitmap {
    words: BTreeMap<u64, u64>,
    n: Option<u64>,
    attrs: Option<Attrs>,
}

/// Equality is set equality plus attributes; the cached popcount is not
/// observable.
impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.words == other.words && self.attrs == other.attrs
    }
}

impl Bitmap {
    pub fn new() -> Self {
        Bitmap {
            words: BTreeMap::new(),
            n: Some(0),
            attrs: None,
        }
    }

    /// Build a bitmap from bit positions, the shape bitmaps take on the wire.
    pub fn from_bits(bits: impl IntoIterator<Item = u64>) -> Self {
        let mut bm = Bitmap::new();
        for bit in bits {
            bm.set_bit(bit);
        }
        bm
    }

    /// Set a bit. Returns true iff the bit was previously unset.
    pub fn set_bit(&mut self, bit: u64) -> bool {
        let word = self.words.entry(bit / 64).or_insert(0);
        let mask = 1u64 << (bit % 64);
        if *word & mask != 0 {
            return false;
        }
        *word |= mask;
        if let Some(n) = self.n.as_mut() {
            *n += 1;
        }
        true
    }

    /// Clear a bit. Returns true iff the bit was previously set.
    pub fn clear_bit(&mut self, bit: u64) -> bool {
        let Some(word) = self.words.get_mut(&(bit / 64)) else {
            return false;
        };
        let mask = 1u64 << (bit % 64);
        if *word & mask == 0 {
            return false;
        }
        *word &= !mask;
        if *word == 0 {
            self.words.remove(&(bit / 64));
        }
        if let Some(n) = self.n.as_mut() {
            *n -= 1;
        }
        true
    }

    pub fn contains(&self, bit: u64) -> bool {
        self.words
            .get(&(bit / 64))
            .is_some_and(|w| w & (1u64 << (bit % 64)) != 0)
    }

    /// Number of set bits. Uses the cached popcount when valid.
    pub fn count(&self) -> u64 {
        match self.n {
            Some(n) => n,
            None => self.words.values().map(|w| w.count_ones() as u64).sum(),
        }
    }

    /// Mark the cached popcount stale. Called after a bitmap is composed from
    /// multiple operands.
    pub fn invalidate_count(&mut self) {
        self.n = None;
    }

    pub fn union(&self, other: &Bitmap) -> Bitmap {
        let mut words = self.words.clone();
        for (idx, w) in &other.words {
            *words.entry(*idx).or_insert(0) |= w;
        }
        Bitmap {
            words,
            n: None,
            attrs: None,
        }
    }

    pub fn intersect(&self, other: &Bitmap) -> Bitmap {
        let mut words = BTreeMap::new();
        for (idx, w) in &self.words {
            if let Some(ow) = other.words.get(idx) {
                let and = w & ow;
                if and != 0 {
                    words.insert(*idx, and);
                }
            }
        }
        Bitmap {
            words,
            n: None,
            attrs: None,
        }
    }

    /// Bits in `self` that are not in `other`.
    pub fn difference(&self, other: &Bitmap) -> Bitmap {
        let mut words = BTreeMap::new();
        for (idx, w) in &self.words {
            let diff = w & !other.words.get(idx).copied().unwrap_or(0);
            if diff != 0 {
                words.insert(*idx, diff);
            }
        }
        Bitmap {
            words,
            n: None,
            attrs: None,
        }
    }

    /// Popcount of the intersection without materializing it.
    pub fn intersection_count(&self, other: &Bitmap) -> u64 {
        self.words
            .iter()
            .filter_map(|(idx, w)| other.words.get(idx).map(|ow| (w & ow).count_ones() as u64))
            .sum()
    }

    /// Merge another bitmap into this one in place. Callers follow with
    /// `invalidate_count`.
    pub fn merge(&mut self, other: &Bitmap) {
        for (idx, w) in &other.words {
            *self.words.entry(*idx).or_insert(0) |= w;
        }
        self.n = None;
    }

    /// Set bit positions in ascending order.
    pub fn bits(&self) -> Vec<u64> {
        let mut out = Vec::new();
        for (idx, word) in &self.words {
            let mut w = *word;
            while w != 0 {
                let tz = w.trailing_zeros() as u64;
                out.push(idx * 64 + tz);
                w &= w - 1;
            }
        }
        out
    }

    pub fn attrs(&self) -> Option<&Attrs> {
        self.attrs.as_ref()
    }

    /// Attach the attribute side-channel. Only the coordinator does this,
    /// once, after cross-slice reduction.
    pub fn set_attrs(&mut self, attrs: Attrs) {
        self.attrs = Some(attrs);
    }
}
