/// A bit set with a capacity chosen at construction.
///
/// Unlike a growable flag vector, indices past the capacity are a bug in the
/// caller and panic instead of silently extending the storage.
#[derive(Clone, Debug)]
pub struct FixedBitSet {
    words: Box<[u64]>,
    capacity: usize,
    ones: usize,
}

impl FixedBitSet {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let num_words = (capacity + 63) / 64;
        Self {
            words: vec![0; num_words].into_boxed_slice(),
            capacity,
            ones: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of bits currently set.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.ones
    }

    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.ones == 0
    }

    /// Sets the bit at `index` to `value` and returns the previous value.
    ///
    /// ## Panics
    ///
    /// Panics if `index` is not less than the capacity.
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        assert!(
            index < self.capacity,
            "bit index {index} out of range for capacity {}",
            self.capacity
        );

        let word = &mut self.words[index / 64];
        let mask = 1u64 << (index % 64);
        let old = *word & mask != 0;

        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }

        match (old, value) {
            (false, true) => self.ones += 1,
            (true, false) => self.ones -= 1,
            _ => {}
        }

        old
    }

    /// Returns the bit at `index`, or false if out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }

        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.ones = 0;
    }

    /// Iterates over the indices of set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        None
                    } else {
                        let bit = bits.trailing_zeros() as usize;
                        bits &= bits - 1;
                        Some(word_index * 64 + bit)
                    }
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_count() {
        let mut set = FixedBitSet::new(130);

        assert!(set.is_clear());
        assert!(!set.get(129));
        assert!(!set.get(10_000));

        assert!(!set.set(0, true));
        assert!(!set.set(129, true));
        assert!(set.set(129, true));
        assert_eq!(set.count_ones(), 2);

        assert!(set.set(0, false));
        assert_eq!(set.count_ones(), 1);
        assert_eq!(set.iter_ones().collect::<Vec<_>>(), vec![129]);

        set.clear();
        assert!(set.is_clear());
    }

    #[test]
    #[should_panic]
    fn out_of_range_set() {
        let mut set = FixedBitSet::new(8);
        set.set(8, true);
    }

    #[test]
    fn iter_across_words() {
        let mut set = FixedBitSet::new(256);
        for i in [1, 63, 64, 200] {
            set.set(i, true);
        }
        assert_eq!(set.iter_ones().collect::<Vec<_>>(), vec![1, 63, 64, 200]);
    }
}
