//! A ring of per-frame allocations retired by fence value.
//!
//! Allocations are bump-allocated from a ring. Each frame's allocations are
//! closed off with the fence value that proves the GPU is done with them, and
//! whole frames are returned to the ring in order once their fence completes.

use std::collections::VecDeque;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("ring out of memory: {requested} bytes requested, {available} of {capacity} available")]
    OutOfMemory {
        capacity: u64,
        available: u64,
        requested: u64,
    },
    #[error("allocation larger than the ring")]
    InsufficientCapacity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingAllocation {
    pub size: u64,
    /// Offset into the backing memory.
    pub offset: u64,
    virtual_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameMarker {
    start: u64,
    end: u64,
}

#[derive(Debug)]
pub struct RingAllocator {
    capacity: u64,
    bytes_freed: u64,
    bytes_allocated: u64,
    frame_start: u64,
    frames: VecDeque<(FrameMarker, u64)>,
}

impl RingAllocator {
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            bytes_freed: 0,
            bytes_allocated: 0,
            frame_start: 0,
            frames: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes handed out and not yet reclaimed, including alignment padding.
    #[must_use]
    pub fn bytes_in_use(&self) -> u64 {
        self.bytes_allocated - self.bytes_freed
    }

    /// The number of closed frames still waiting on their fence.
    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<RingAllocation, RingError> {
        enum Adjust {
            Align,
            Wrap,
        }

        if size > self.capacity {
            return Err(RingError::InsufficientCapacity);
        }

        let out_of_memory = RingError::OutOfMemory {
            capacity: self.capacity,
            available: self.capacity - self.bytes_in_use(),
            requested: size,
        };

        let tail_ptr = self.bytes_freed % self.capacity;
        let base_ptr = self.bytes_allocated % self.capacity;
        let aligned_ptr = next_multiple_of(base_ptr, alignment.max(1));
        let is_full = self.bytes_in_use() == self.capacity;

        let adjust = match tail_ptr.cmp(&base_ptr) {
            std::cmp::Ordering::Less => {
                // [      free      |    used    |   free   ]
                //                  ^tail_ptr    ^base_ptr
                if aligned_ptr <= self.capacity && self.capacity - aligned_ptr >= size {
                    Some(Adjust::Align)
                } else if tail_ptr >= size {
                    Some(Adjust::Wrap)
                } else {
                    None
                }
            }
            std::cmp::Ordering::Equal if is_full => None,
            std::cmp::Ordering::Equal => {
                // [      free      |      free      ]
                //                  ^base_ptr/tail_ptr
                if aligned_ptr <= self.capacity && self.capacity - aligned_ptr >= size {
                    Some(Adjust::Align)
                } else if tail_ptr >= size || self.bytes_in_use() == 0 {
                    Some(Adjust::Wrap)
                } else {
                    None
                }
            }
            std::cmp::Ordering::Greater => {
                // [    used    |   free   |    used    ]
                //              ^base_ptr  ^tail_ptr
                match tail_ptr.checked_sub(aligned_ptr) {
                    Some(free) if free >= size => Some(Adjust::Align),
                    _ => None,
                }
            }
        }
        .ok_or(out_of_memory)?;

        let (adjust_amount, heap_ptr) = match adjust {
            Adjust::Align => (aligned_ptr - base_ptr, aligned_ptr),
            Adjust::Wrap => (self.capacity - base_ptr, 0),
        };

        let allocation = RingAllocation {
            size,
            offset: heap_ptr,
            virtual_offset: self.bytes_allocated + adjust_amount,
        };

        self.bytes_allocated += adjust_amount + size;
        Ok(allocation)
    }

    /// Closes the current frame. Its allocations are reclaimed once
    /// `fence_value` has completed.
    pub fn finish_frame(&mut self, fence_value: u64) {
        let marker = FrameMarker {
            start: self.frame_start,
            end: self.bytes_allocated,
        };
        self.frame_start = self.bytes_allocated;

        if marker.start != marker.end {
            self.frames.push_back((marker, fence_value));
        }
    }

    /// Returns every closed frame whose fence value is at most `completed`.
    pub fn reclaim(&mut self, completed: u64) -> u64 {
        let before = self.bytes_freed;
        while let Some(&(marker, fence_value)) = self.frames.front() {
            if fence_value > completed {
                break;
            }
            self.frames.pop_front();
            self.free_frame(marker);
        }
        self.bytes_freed - before
    }

    fn free_frame(&mut self, marker: FrameMarker) {
        assert!(marker.start == self.bytes_freed, "frames freed out of order");
        self.bytes_freed += marker.end - marker.start;
    }
}

fn next_multiple_of(a: u64, b: u64) -> u64 {
    match a % b {
        0 => a,
        r => a + b - r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_wrap_around_the_ring() {
        let mut ring = RingAllocator::new(100);

        // Aligned from an empty ring.
        let a = ring.allocate(20, 4).unwrap();
        assert_eq!((a.offset, a.virtual_offset), (0, 0));
        ring.finish_frame(1);

        // Fits after the first frame.
        let b = ring.allocate(70, 4).unwrap();
        assert_eq!((b.offset, b.virtual_offset), (20, 20));
        ring.finish_frame(2);

        assert_eq!(ring.reclaim(1), 20);

        // Not enough room at the end, wraps to the freed start.
        let c = ring.allocate(20, 8).unwrap();
        assert_eq!((c.offset, c.virtual_offset), (0, 100));
        ring.finish_frame(3);

        assert_eq!(ring.reclaim(2), 70);

        // Aligned ahead of the tail.
        let d = ring.allocate(15, 64).unwrap();
        assert_eq!((d.offset, d.virtual_offset), (64, 164));
        ring.finish_frame(4);

        ring.reclaim(4);
        assert_eq!(ring.bytes_in_use(), 0);
        assert_eq!(ring.frames_in_flight(), 0);

        let e = ring.allocate(80, 16).unwrap();
        assert_eq!(e.offset, 0);
    }

    #[test]
    fn pending_frames_block_allocation() {
        let mut ring = RingAllocator::new(64);

        ring.allocate(48, 1).unwrap();
        ring.finish_frame(10);

        assert_eq!(
            ring.allocate(32, 1),
            Err(RingError::OutOfMemory {
                capacity: 64,
                available: 16,
                requested: 32,
            })
        );

        assert_eq!(ring.reclaim(9), 0);
        assert_eq!(ring.reclaim(10), 48);
        assert!(ring.allocate(32, 1).is_ok());
    }

    #[test]
    fn full_ring_reports_out_of_memory() {
        let mut ring = RingAllocator::new(32);
        ring.allocate(32, 1).unwrap();

        assert!(matches!(ring.allocate(1, 1), Err(RingError::OutOfMemory { .. })));
        assert_eq!(ring.allocate(33, 1), Err(RingError::InsufficientCapacity));
    }
}
