use crate::bitset::FixedBitSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotError {
    /// Every slot is in use. The allocator never grows.
    Exhausted { capacity: u32 },
}

/// A fixed-capacity allocator of slot indices in `0..capacity`.
///
/// Slots that have never been handed out are served from a bump counter, so
/// construction is cheap even for very large capacities. Freed slots go on a
/// LIFO free list and are reused before the bump counter advances.
#[derive(Debug)]
pub struct SlotAllocator {
    capacity: u32,
    next_unused: u32,
    free_list: Vec<u32>,
    occupied: FixedBitSet,
}

impl SlotAllocator {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            next_unused: 0,
            free_list: Vec::new(),
            occupied: FixedBitSet::new(capacity as usize),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The number of slots currently allocated.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.occupied.count_ones() as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupied.is_clear()
    }

    #[must_use]
    pub fn available(&self) -> u32 {
        self.capacity - self.len()
    }

    #[must_use]
    pub fn is_allocated(&self, slot: u32) -> bool {
        self.occupied.get(slot as usize)
    }

    /// Allocates one slot.
    ///
    /// ## Errors
    ///
    /// Returns `SlotError::Exhausted` if every slot is in use. The allocator
    /// state is unchanged on failure.
    pub fn allocate(&mut self) -> Result<u32, SlotError> {
        let slot = if let Some(slot) = self.free_list.pop() {
            slot
        } else if self.next_unused < self.capacity {
            let slot = self.next_unused;
            self.next_unused += 1;
            slot
        } else {
            return Err(SlotError::Exhausted {
                capacity: self.capacity,
            });
        };

        let was_set = self.occupied.set(slot as usize, true);
        debug_assert!(!was_set, "free list handed out a live slot");

        Ok(slot)
    }

    /// Returns a slot to the allocator.
    ///
    /// ## Panics
    ///
    /// Panics if the slot is not currently allocated. Freeing a slot twice is
    /// a bug in the calling code.
    pub fn free(&mut self, slot: u32) {
        assert!(
            self.occupied.set(slot as usize, false),
            "slot {slot} freed while not allocated"
        );
        self.free_list.push(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_until_exhausted() {
        let mut slots = SlotAllocator::new(3);

        assert_eq!(slots.allocate(), Ok(0));
        assert_eq!(slots.allocate(), Ok(1));
        assert_eq!(slots.allocate(), Ok(2));
        assert_eq!(slots.allocate(), Err(SlotError::Exhausted { capacity: 3 }));
        assert_eq!(slots.len(), 3);
        assert_eq!(slots.available(), 0);
    }

    #[test]
    fn freed_slots_are_reused_lifo() {
        let mut slots = SlotAllocator::new(4);

        let a = slots.allocate().unwrap();
        let b = slots.allocate().unwrap();
        let _c = slots.allocate().unwrap();

        slots.free(a);
        slots.free(b);

        assert_eq!(slots.allocate(), Ok(b));
        assert_eq!(slots.allocate(), Ok(a));
        assert_eq!(slots.allocate(), Ok(3));
        assert!(slots.allocate().is_err());
    }

    #[test]
    fn failed_allocation_does_not_change_state() {
        let mut slots = SlotAllocator::new(1);
        slots.allocate().unwrap();

        let len = slots.len();
        assert!(slots.allocate().is_err());
        assert_eq!(slots.len(), len);
    }

    #[test]
    #[should_panic]
    fn double_free_panics() {
        let mut slots = SlotAllocator::new(2);
        let a = slots.allocate().unwrap();
        slots.free(a);
        slots.free(a);
    }
}
