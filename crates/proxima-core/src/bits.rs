//! Ordinal sets: search filters and the concurrent soft-delete bitset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use roaring::RoaringBitmap;

/// An ordinal filter supplied to searches.
///
/// Filters gate admission into the result set only; traversal still passes
/// through filtered-out nodes so the graph stays navigable.
#[derive(Debug, Clone, Default)]
pub enum Bits {
    /// Accepts every ordinal.
    #[default]
    All,
    /// Accepts only the members of the bitmap.
    Members(Arc<RoaringBitmap>),
    /// Accepts everything except the members of the bitmap.
    Excluding(Arc<RoaringBitmap>),
}

impl Bits {
    /// Returns true if the ordinal passes the filter.
    #[inline]
    #[must_use]
    pub fn contains(&self, ordinal: u32) -> bool {
        match self {
            Self::All => true,
            Self::Members(set) => set.contains(ordinal),
            Self::Excluding(set) => !set.contains(ordinal),
        }
    }
}

impl From<RoaringBitmap> for Bits {
    fn from(set: RoaringBitmap) -> Self {
        Self::Members(Arc::new(set))
    }
}

const WORD_BITS: usize = 64;

/// A thread-safe bitset that grows on demand.
///
/// Set/clear/test on existing words are lock-free atomic operations; only
/// growth takes the write lock and publishes a longer word array. Reads past
/// the current length report false rather than growing.
#[derive(Debug, Default)]
pub struct AtomicBitSet {
    words: RwLock<Vec<AtomicU64>>,
}

impl AtomicBitSet {
    /// Creates an empty bitset with capacity for `bits` entries.
    #[must_use]
    pub fn new(bits: usize) -> Self {
        let words = (0..bits.div_ceil(WORD_BITS))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            words: RwLock::new(words),
        }
    }

    /// Sets the bit at `index`, growing the set if needed.
    pub fn set(&self, index: usize) {
        let word = index / WORD_BITS;
        let mask = 1u64 << (index % WORD_BITS);
        {
            let words = self.words.read();
            if word < words.len() {
                words[word].fetch_or(mask, Ordering::Release);
                return;
            }
        }

        let mut words = self.words.write();
        while words.len() <= word {
            words.push(AtomicU64::new(0));
        }
        words[word].fetch_or(mask, Ordering::Release);
    }

    /// Clears the bit at `index`. Out-of-range indices are already clear.
    pub fn clear(&self, index: usize) {
        let word = index / WORD_BITS;
        let mask = !(1u64 << (index % WORD_BITS));
        let words = self.words.read();
        if word < words.len() {
            words[word].fetch_and(mask, Ordering::Release);
        }
    }

    /// Returns the bit at `index`; false beyond the current capacity.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        let word = index / WORD_BITS;
        let words = self.words.read();
        word < words.len() && words[word].load(Ordering::Acquire) & (1u64 << (index % WORD_BITS)) != 0
    }

    /// Counts the set bits.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.words
            .read()
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    /// Returns true if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words
            .read()
            .iter()
            .all(|w| w.load(Ordering::Acquire) == 0)
    }

    /// Snapshots the set bits into a [`RoaringBitmap`].
    #[must_use]
    pub fn to_bitmap(&self) -> RoaringBitmap {
        let mut bitmap = RoaringBitmap::new();
        let words = self.words.read();
        for (w, word) in words.iter().enumerate() {
            let mut value = word.load(Ordering::Acquire);
            while value != 0 {
                let bit = value.trailing_zeros();
                bitmap.insert((w * WORD_BITS) as u32 + bit);
                value &= value - 1;
            }
        }
        bitmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let bits = AtomicBitSet::new(16);
        assert!(!bits.get(3));
        bits.set(3);
        assert!(bits.get(3));
        bits.clear(3);
        assert!(!bits.get(3));
    }

    #[test]
    fn test_grows_on_demand() {
        let bits = AtomicBitSet::new(0);
        bits.set(1000);
        assert!(bits.get(1000));
        assert!(!bits.get(999));
        assert_eq!(bits.cardinality(), 1);
    }

    #[test]
    fn test_out_of_range_reads_are_false() {
        let bits = AtomicBitSet::new(8);
        assert!(!bits.get(1_000_000));
        bits.clear(1_000_000); // no-op, must not grow
        assert!(bits.is_empty());
    }

    #[test]
    fn test_to_bitmap_snapshot() {
        let bits = AtomicBitSet::new(256);
        bits.set(0);
        bits.set(65);
        bits.set(130);
        let bitmap = bits.to_bitmap();
        assert_eq!(bitmap.len(), 3);
        assert!(bitmap.contains(65));
    }

    #[test]
    fn test_bits_filter_variants() {
        let mut set = RoaringBitmap::new();
        set.insert(7);

        assert!(Bits::All.contains(7));

        let members: Bits = set.clone().into();
        assert!(members.contains(7));
        assert!(!members.contains(8));

        let excluding = Bits::Excluding(Arc::new(set));
        assert!(!excluding.contains(7));
        assert!(excluding.contains(8));
    }

    #[test]
    fn test_concurrent_set() {
        let bits = Arc::new(AtomicBitSet::new(0));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let bits = Arc::clone(&bits);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        bits.set(t * 500 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bits.cardinality(), 2000);
    }
}
